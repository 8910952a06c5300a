use ffmpeg_next::{ffi, format::Pixel};

use crate::{
    error::{Error, Result, check},
    handle::{Handle, Resource},
};

pub struct FrameKind;

unsafe impl Resource for FrameKind {
    type Raw = ffi::AVFrame;
    const NAME: &'static str = "frame";

    unsafe fn release(raw: *mut ffi::AVFrame) {
        let mut raw = raw;
        unsafe { ffi::av_frame_free(&mut raw) };
    }
}

/// A decoded or to-be-encoded picture.
pub struct Frame {
    handle: Handle<FrameKind>,
}

impl Frame {
    /// Frame without a buffer, to be filled by a decoder.
    pub fn empty() -> Result<Self> {
        let handle = unsafe { Handle::from_raw(ffi::av_frame_alloc())? };
        Ok(Self { handle })
    }

    /// Frame with a buffer sized for `width` x `height` in `format`.
    pub fn video(width: u32, height: u32, format: Pixel) -> Result<Self> {
        if width == 0 || height == 0 || format == Pixel::None {
            return Err(Error::InvalidArgument(format!(
                "invalid video frame {}x{} {:?}",
                width, height, format
            )));
        }
        let mut frame = Self::empty()?;
        let raw = frame.handle.get_mut();
        raw.width = width as i32;
        raw.height = height as i32;
        raw.format = ffi::AVPixelFormat::from(format) as i32;
        check(
            unsafe { ffi::av_frame_get_buffer(frame.handle.as_mut_ptr(), 0) },
            |_| Error::Allocation("frame buffer"),
        )?;
        Ok(frame)
    }

    pub fn width(&self) -> u32 {
        self.handle.get().width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.handle.get().height.max(0) as u32
    }

    pub fn format(&self) -> Pixel {
        let format = self.handle.get().format;
        if format < 0 {
            return Pixel::None;
        }
        // the field holds an AVPixelFormat written by FFmpeg or Frame::video
        Pixel::from(unsafe { std::mem::transmute::<i32, ffi::AVPixelFormat>(format) })
    }

    pub fn pts(&self) -> Option<i64> {
        match self.handle.get().pts {
            ffi::AV_NOPTS_VALUE => None,
            pts => Some(pts),
        }
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.handle.get_mut().pts = pts.unwrap_or(ffi::AV_NOPTS_VALUE);
    }

    pub fn dts(&self) -> Option<i64> {
        match self.handle.get().pkt_dts {
            ffi::AV_NOPTS_VALUE => None,
            dts => Some(dts),
        }
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.handle.get_mut().pkt_dts = dts.unwrap_or(ffi::AV_NOPTS_VALUE);
    }

    /// Lets the encoder pick the frame type on its own.
    pub fn clear_picture_type(&mut self) {
        self.handle.get_mut().pict_type = ffi::AVPictureType::AV_PICTURE_TYPE_NONE;
    }

    pub fn planes(&self) -> usize {
        self.handle
            .get()
            .data
            .iter()
            .take_while(|p| !p.is_null())
            .count()
    }

    pub fn stride(&self, plane: usize) -> usize {
        if plane >= self.planes() {
            return 0;
        }
        self.handle.get().linesize[plane].max(0) as usize
    }

    /// Bytes of one plane, `stride * rows` long.
    pub fn data(&self, plane: usize) -> &[u8] {
        if plane >= self.planes() {
            return &[];
        }
        let rows = self.plane_rows(plane);
        let len = self.stride(plane) * rows;
        unsafe { std::slice::from_raw_parts((*self.handle.as_ptr()).data[plane], len) }
    }

    pub fn data_mut(&mut self, plane: usize) -> &mut [u8] {
        if plane >= self.planes() {
            return &mut [];
        }
        let len = self.stride(plane) * self.plane_rows(plane);
        unsafe { std::slice::from_raw_parts_mut((*self.handle.as_mut_ptr()).data[plane], len) }
    }

    fn plane_rows(&self, plane: usize) -> usize {
        let height = self.height() as usize;
        if plane == 0 {
            return height;
        }
        let desc = unsafe { ffi::av_pix_fmt_desc_get(self.format().into()) };
        if desc.is_null() {
            return height;
        }
        let shift = unsafe { (*desc).log2_chroma_h } as usize;
        // chroma planes only for planar YUV; alpha/packed planes use full height
        let is_chroma = plane == 1 || plane == 2;
        if is_chroma {
            (height + (1 << shift) - 1) >> shift
        } else {
            height
        }
    }

    pub fn as_ptr(&self) -> *const ffi::AVFrame {
        self.handle.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut ffi::AVFrame {
        self.handle.as_mut_ptr()
    }
}
