use std::os::raw::c_int;
use std::ptr;

use ffmpeg_next::{ffi, format::Pixel};

use crate::{
    error::{Error, Result},
    frame::Frame,
    handle::{Handle, Resource},
};

pub struct SwsKind;

unsafe impl Resource for SwsKind {
    type Raw = ffi::SwsContext;
    const NAME: &'static str = "scaler context";

    unsafe fn release(raw: *mut ffi::SwsContext) {
        unsafe { ffi::sws_freeContext(raw) };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    width: u32,
    height: u32,
    format: Pixel,
}

/// Converts frames to a target geometry and pixel format. The conversion
/// context is kept between calls and rebuilt when either side changes.
#[derive(Default)]
pub struct Scaler {
    context: Option<(Handle<SwsKind>, Geometry, Geometry)>,
}

impl Scaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new frame holding `source` converted to `width` x
    /// `height` in `format`. `source` is left untouched.
    pub fn scale(&mut self, source: &Frame, width: u32, height: u32, format: Pixel) -> Result<Frame> {
        let src = Geometry {
            width: source.width(),
            height: source.height(),
            format: source.format(),
        };
        let dst = Geometry {
            width,
            height,
            format,
        };
        let mut target = Frame::video(width, height, format)?;
        let context = self.context_for(src, dst)?;

        let rows = unsafe {
            let s = source.as_ptr();
            let d = target.as_mut_ptr();
            ffi::sws_scale(
                context,
                (*s).data.as_ptr() as *const *const u8,
                (*s).linesize.as_ptr(),
                0,
                (*s).height,
                (*d).data.as_ptr(),
                (*d).linesize.as_ptr(),
            )
        };
        check_rows(rows, height)?;

        target.set_pts(source.pts());
        Ok(target)
    }

    fn context_for(&mut self, src: Geometry, dst: Geometry) -> Result<*mut ffi::SwsContext> {
        if let Some((handle, cached_src, cached_dst)) = self.context.as_mut() {
            if *cached_src == src && *cached_dst == dst {
                return Ok(handle.as_mut_ptr());
            }
        }
        if src.width == 0 || src.height == 0 || src.format == Pixel::None {
            return Err(Error::Scale(format!(
                "invalid source {}x{} {:?}",
                src.width, src.height, src.format
            )));
        }
        // drop the stale context before building a new one
        self.context = None;
        let raw = unsafe {
            ffi::sws_getContext(
                src.width as c_int,
                src.height as c_int,
                src.format.into(),
                dst.width as c_int,
                dst.height as c_int,
                dst.format.into(),
                (ffi::SWS_BILINEAR | ffi::SWS_ACCURATE_RND) as c_int,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        let handle = unsafe { Handle::<SwsKind>::from_raw(raw) }.map_err(|_| {
            Error::Scale(format!(
                "no conversion from {}x{} {:?} to {}x{} {:?}",
                src.width, src.height, src.format, dst.width, dst.height, dst.format
            ))
        })?;
        log::debug!(
            "scaler: {}x{} {:?} -> {}x{} {:?}",
            src.width,
            src.height,
            src.format,
            dst.width,
            dst.height,
            dst.format
        );
        let (handle, _, _) = self.context.insert((handle, src, dst));
        Ok(handle.as_mut_ptr())
    }
}

/// A conversion must produce every row of the target.
fn check_rows(rows: c_int, expected: u32) -> Result<()> {
    if rows < 0 || rows as u32 != expected {
        return Err(Error::Scale(format!(
            "converted {} rows, expected {}",
            rows, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(width: u32, height: u32, format: Pixel, value: u8) -> Frame {
        let mut frame = Frame::video(width, height, format).unwrap();
        for plane in 0..frame.planes() {
            frame.data_mut(plane).fill(value);
        }
        frame
    }

    #[test]
    fn test_scale_to_other_geometry() {
        let mut source = filled(64, 48, Pixel::RGB24, 0x80);
        source.set_pts(Some(42));
        let mut scaler = Scaler::new();
        let scaled = scaler.scale(&source, 32, 24, Pixel::YUV420P).unwrap();

        assert_eq!(scaled.width(), 32);
        assert_eq!(scaled.height(), 24);
        assert_eq!(scaled.format(), Pixel::YUV420P);
        assert_eq!(scaled.planes(), 3);
        assert!(scaled.stride(0) >= 32);
        assert!(scaled.stride(1) >= 16);
        assert!(scaled.stride(2) >= 16);
        assert_eq!(scaled.data(0).len(), scaled.stride(0) * 24);
        assert_eq!(scaled.data(1).len(), scaled.stride(1) * 12);
        assert_eq!(scaled.pts(), Some(42));

        // source is untouched
        assert_eq!(source.width(), 64);
        assert_eq!(source.format(), Pixel::RGB24);
        assert!(source.data(0).iter().all(|b| *b == 0x80));
    }

    #[test]
    fn test_uniform_grey_stays_uniform() {
        let source = filled(16, 16, Pixel::GRAY8, 0x60);
        let mut scaler = Scaler::new();
        let scaled = scaler.scale(&source, 8, 8, Pixel::GRAY8).unwrap();
        for row in 0..8 {
            let line = &scaled.data(0)[row * scaled.stride(0)..row * scaled.stride(0) + 8];
            assert!(
                line.iter().all(|b| b.abs_diff(0x60) <= 1),
                "row {}: {:?}",
                row,
                line
            );
        }
    }

    #[test]
    fn test_context_is_reused_and_rebuilt() {
        let mut scaler = Scaler::new();
        let a = filled(32, 32, Pixel::YUV420P, 0x10);
        scaler.scale(&a, 16, 16, Pixel::YUV420P).unwrap();
        let first = scaler.context.as_ref().map(|(h, _, _)| h.as_ptr()).unwrap();
        scaler.scale(&a, 16, 16, Pixel::YUV420P).unwrap();
        let second = scaler.context.as_ref().map(|(h, _, _)| h.as_ptr()).unwrap();
        assert_eq!(first, second);

        let b = filled(48, 32, Pixel::YUV420P, 0x10);
        let scaled = scaler.scale(&b, 16, 16, Pixel::YUV420P).unwrap();
        assert_eq!(scaled.width(), 16);
        let (_, src, _) = scaler.context.as_ref().unwrap();
        assert_eq!(src.width, 48);
    }

    #[test]
    fn test_empty_source_fails() {
        let source = Frame::empty().unwrap();
        let mut scaler = Scaler::new();
        assert!(matches!(
            scaler.scale(&source, 16, 16, Pixel::YUV420P),
            Err(Error::Scale(_))
        ));
    }

    #[test]
    fn test_row_mismatch_is_failure() {
        assert!(check_rows(24, 24).is_ok());
        assert!(matches!(check_rows(23, 24), Err(Error::Scale(_))));
        assert!(matches!(check_rows(-22, 24), Err(Error::Scale(_))));
    }
}
