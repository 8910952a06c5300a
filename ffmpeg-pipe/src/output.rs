use std::ffi::CString;
use std::path::Path;
use std::ptr;

use ffmpeg_next::{Rational, ffi};

use crate::{
    encoder::EncoderContext,
    error::{Error, Result, check},
    handle::{Handle, Resource},
    packet::Packet,
};

pub struct MuxerKind;

unsafe impl Resource for MuxerKind {
    type Raw = ffi::AVFormatContext;
    const NAME: &'static str = "muxer context";

    unsafe fn release(raw: *mut ffi::AVFormatContext) {
        unsafe {
            if !(*raw).pb.is_null() && !has_flag((*raw).oformat, ffi::AVFMT_NOFILE) {
                ffi::avio_closep(&mut (*raw).pb);
            }
            ffi::avformat_free_context(raw);
        }
    }
}

unsafe fn has_flag(format: *const ffi::AVOutputFormat, flag: u32) -> bool {
    !format.is_null() && unsafe { (*format).flags } & flag as i32 != 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    HeaderWritten,
    TrailerWritten,
}

/// Muxer writing one container file.
pub struct OutputContainer {
    inner: Handle<MuxerKind>,
    url: String,
    phase: Phase,
    interleaved: bool,
}

impl OutputContainer {
    /// Allocates a muxer for `path` and opens the sink for writing. The
    /// container format is inferred from the path unless `format` names one.
    pub fn open(path: impl AsRef<Path>, format: Option<&str>) -> Result<Self> {
        let url = path.as_ref().to_string_lossy().into_owned();
        let curl = CString::new(url.as_str())
            .map_err(|e| Error::InvalidArgument(format!("output {:?}: {}", url, e)))?;
        let cformat = format
            .map(CString::new)
            .transpose()
            .map_err(|e| Error::InvalidArgument(format!("output format: {}", e)))?;

        let mut raw = ptr::null_mut();
        check(
            unsafe {
                ffi::avformat_alloc_output_context2(
                    &mut raw,
                    ptr::null(),
                    cformat.as_ref().map_or(ptr::null(), |f| f.as_ptr()),
                    curl.as_ptr(),
                )
            },
            |source| Error::Open {
                op: "avformat_alloc_output_context2",
                source,
            },
        )?;
        let mut inner = unsafe { Handle::<MuxerKind>::from_raw(raw)? };

        unsafe {
            let ctx = inner.as_mut_ptr();
            if !has_flag((*ctx).oformat, ffi::AVFMT_NOFILE) {
                check(
                    ffi::avio_open(&mut (*ctx).pb, curl.as_ptr(), ffi::AVIO_FLAG_WRITE as i32),
                    |source| Error::Open {
                        op: "avio_open",
                        source,
                    },
                )?;
            }
        }

        log::info!("output opened: {}", url);
        Ok(Self {
            inner,
            url,
            phase: Phase::Open,
            interleaved: false,
        })
    }

    /// Use `av_interleaved_write_frame` instead of `av_write_frame`.
    pub fn set_interleaved(&mut self, interleaved: bool) {
        self.interleaved = interleaved;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True when the container wants codec headers in extradata.
    pub fn requires_global_header(&self) -> bool {
        unsafe { has_flag((*self.inner.as_ptr()).oformat, ffi::AVFMT_GLOBALHEADER) }
    }

    pub fn nb_streams(&self) -> usize {
        self.inner.get().nb_streams as usize
    }

    /// Adds a stream for `encoder`: copies its parameters and time base,
    /// and marks the encoder for global headers when the format needs
    /// them. Must run before the encoder is opened for the flag to apply.
    pub fn create_stream(&mut self, encoder: &mut EncoderContext) -> Result<usize> {
        if self.phase != Phase::Open {
            return Err(Error::Sequence("stream created after header"));
        }
        if self.requires_global_header() {
            encoder.set_global_header();
        }
        let stream = unsafe { ffi::avformat_new_stream(self.inner.as_mut_ptr(), ptr::null()) };
        if stream.is_null() {
            return Err(Error::Allocation("output stream"));
        }
        let index = unsafe {
            (*stream).time_base = encoder.time_base().into();
            (*stream).index.max(0) as usize
        };
        self.update_stream_parameters(index, encoder)?;
        log::debug!(
            "output stream {} created, time_base {}",
            index,
            encoder.time_base()
        );
        Ok(index)
    }

    /// Re-copies encoder parameters, e.g. extradata produced by opening it.
    pub fn update_stream_parameters(&mut self, index: usize, encoder: &EncoderContext) -> Result<()> {
        let stream = self.raw_stream(index)?;
        check(
            unsafe { ffi::avcodec_parameters_from_context((*stream).codecpar, encoder.as_ptr()) },
            |source| Error::Open {
                op: "avcodec_parameters_from_context",
                source,
            },
        )?;
        Ok(())
    }

    pub fn stream_time_base(&self, index: usize) -> Result<Rational> {
        let stream = self.raw_stream(index)?;
        Ok(unsafe { (*stream).time_base.into() })
    }

    fn raw_stream(&self, index: usize) -> Result<*mut ffi::AVStream> {
        if index >= self.nb_streams() {
            return Err(Error::InvalidArgument(format!("no output stream {}", index)));
        }
        Ok(unsafe { *(*self.inner.as_ptr()).streams.add(index) })
    }

    pub fn write_header(&mut self) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(Error::Sequence("header written twice"));
        }
        if self.nb_streams() == 0 {
            return Err(Error::Sequence("header written without streams"));
        }
        unsafe {
            let url = CString::new(self.url.as_str()).unwrap_or_default();
            ffi::av_dump_format(self.inner.as_mut_ptr(), 0, url.as_ptr(), 1);
        }
        check(
            unsafe { ffi::avformat_write_header(self.inner.as_mut_ptr(), ptr::null_mut()) },
            |source| Error::Write {
                op: "avformat_write_header",
                source,
            },
        )?;
        self.phase = Phase::HeaderWritten;
        log::debug!("output header written: {}", self.url);
        Ok(())
    }

    /// Writes one packet, rescaled from its own time base to the stream's.
    pub fn write_packet(&mut self, mut packet: Packet) -> Result<()> {
        match self.phase {
            Phase::Open => return Err(Error::Sequence("packet before header")),
            Phase::TrailerWritten => return Err(Error::Sequence("packet after trailer")),
            Phase::HeaderWritten => {}
        }
        let out_time_base = self.stream_time_base(packet.stream_index())?;
        packet.rescale_ts(out_time_base);
        packet.set_pos(-1);
        let ret = unsafe {
            if self.interleaved {
                ffi::av_interleaved_write_frame(self.inner.as_mut_ptr(), packet.as_mut_ptr())
            } else {
                ffi::av_write_frame(self.inner.as_mut_ptr(), packet.as_mut_ptr())
            }
        };
        check(ret, |source| Error::Write {
            op: "av_write_frame",
            source,
        })?;
        Ok(())
    }

    /// Writes the trailer once. Later calls are no-ops.
    pub fn write_trailer(&mut self) -> Result<()> {
        match self.phase {
            Phase::Open => return Err(Error::Sequence("trailer before header")),
            Phase::TrailerWritten => {
                log::debug!("output trailer already written: {}", self.url);
                return Ok(());
            }
            Phase::HeaderWritten => {}
        }
        // a failed trailer is not retried
        self.phase = Phase::TrailerWritten;
        check(
            unsafe { ffi::av_write_trailer(self.inner.as_mut_ptr()) },
            |source| Error::Write {
                op: "av_write_trailer",
                source,
            },
        )?;
        log::info!("output finished: {}", self.url);
        Ok(())
    }
}

impl Drop for OutputContainer {
    fn drop(&mut self) {
        if self.phase == Phase::HeaderWritten {
            log::warn!("output {} dropped without trailer, finishing it", self.url);
            if let Err(e) = self.write_trailer() {
                log::error!("write trailer on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        crate::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = OutputContainer::open(dir.path().join("out.mkv"), None).unwrap();
        assert_eq!(output.phase(), Phase::Open);
        assert!(output.requires_global_header());
        assert!(dir.path().join("out.mkv").exists());
    }

    #[test]
    fn test_unknown_extension() {
        crate::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let res = OutputContainer::open(dir.path().join("out.nosuchformat"), None);
        assert!(matches!(
            res,
            Err(Error::Open {
                op: "avformat_alloc_output_context2",
                ..
            })
        ));
    }

    #[test]
    fn test_write_order_is_enforced() {
        crate::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut output = OutputContainer::open(dir.path().join("out.mp4"), None).unwrap();
        let packet = Packet::alloc(Rational::new(1, 30)).unwrap();
        assert!(matches!(
            output.write_packet(packet),
            Err(Error::Sequence("packet before header"))
        ));
        assert!(matches!(
            output.write_trailer(),
            Err(Error::Sequence("trailer before header"))
        ));
        assert!(matches!(
            output.write_header(),
            Err(Error::Sequence("header written without streams"))
        ));
    }
}
