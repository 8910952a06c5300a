use std::collections::BTreeMap;
use std::ffi::CString;
use std::ptr;

use ffmpeg_next::{Dictionary, Rational, ffi, media};

use crate::{
    error::{Error, Result, check},
    handle::{Handle, Resource},
    packet::Packet,
    stream::StreamInfo,
};

pub struct DemuxerKind;

unsafe impl Resource for DemuxerKind {
    type Raw = ffi::AVFormatContext;
    const NAME: &'static str = "demuxer context";

    unsafe fn release(raw: *mut ffi::AVFormatContext) {
        let mut raw = raw;
        unsafe { ffi::avformat_close_input(&mut raw) };
    }
}

/// Opened capture/input source with its discovered streams.
pub struct InputContainer {
    inner: Handle<DemuxerKind>,
    streams: Vec<StreamInfo>,
}

impl InputContainer {
    /// Resolve input format by name (e.g. "x11grab", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> Result<*const ffi::AVInputFormat> {
        let cname = CString::new(name)
            .map_err(|e| Error::InvalidArgument(format!("format name {:?}: {}", name, e)))?;
        let ptr = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(Error::Open {
                op: "av_find_input_format",
                source: ffmpeg_next::Error::DemuxerNotFound,
            });
        }
        Ok(ptr)
    }

    /// Allocates a demuxer, opens `device` with it and reads its stream info.
    ///
    /// `format` names the capture format; `None` lets FFmpeg detect the
    /// source. `options` go to the demuxer (`framerate`, `video_size`, ...).
    pub fn open(
        format: Option<&str>,
        device: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let input_format = match format {
            Some(name) => Self::find_input_format(name)?,
            None => ptr::null(),
        };
        let url = CString::new(device)
            .map_err(|e| Error::InvalidArgument(format!("device {:?}: {}", device, e)))?;

        let ctx = unsafe { Handle::<DemuxerKind>::from_raw(ffi::avformat_alloc_context())? };

        let mut opts = Dictionary::new();
        for (key, value) in options.iter() {
            opts.set(key, value);
        }

        // avformat_open_input frees the context itself when it fails
        let mut raw = ctx.into_raw();
        unsafe {
            let mut opts_ptr = opts.disown();
            let ret = ffi::avformat_open_input(&mut raw, url.as_ptr(), input_format, &mut opts_ptr);
            let unused = Dictionary::own(opts_ptr);
            check(ret, |source| Error::Open {
                op: "avformat_open_input",
                source,
            })?;
            for (key, _) in unused.iter() {
                log::warn!("input option not used: {}", key);
            }
        }
        let mut inner = unsafe { Handle::<DemuxerKind>::from_raw(raw)? };

        check(
            unsafe { ffi::avformat_find_stream_info(inner.as_mut_ptr(), ptr::null_mut()) },
            |source| Error::Open {
                op: "avformat_find_stream_info",
                source,
            },
        )?;

        let mut streams = Vec::new();
        unsafe {
            let ctx = inner.as_ptr();
            for i in 0..(*ctx).nb_streams as usize {
                streams.push(StreamInfo::from_raw(*(*ctx).streams.add(i))?);
            }
        }

        log::info!(
            "input opened: {} ({}), {} stream(s)",
            device,
            format.unwrap_or("detected"),
            streams.len()
        );
        for stream in streams.iter() {
            log::debug!("input stream: {:?}", stream);
        }

        Ok(Self { inner, streams })
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    /// Picks the most representative stream of `medium`; `preferred = -1`
    /// lets FFmpeg choose.
    pub fn find_best_stream(&self, medium: media::Type, preferred: i32) -> Result<&StreamInfo> {
        let ret = unsafe {
            ffi::av_find_best_stream(
                self.inner.as_ptr() as *mut _,
                medium.into(),
                preferred,
                -1,
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 {
            return Err(Error::StreamNotFound(medium));
        }
        self.streams
            .get(ret as usize)
            .ok_or(Error::StreamNotFound(medium))
    }

    /// Frame rate guess for `stream`, falling back to its average rate.
    pub fn guess_frame_rate(&self, stream: &StreamInfo) -> Result<Rational> {
        let guessed: Rational = unsafe {
            let ctx = self.inner.as_ptr() as *mut ffi::AVFormatContext;
            let raw_stream = *(*ctx).streams.add(stream.index());
            ffi::av_guess_frame_rate(ctx, raw_stream, ptr::null_mut()).into()
        };
        let rate = if is_valid_rate(guessed) {
            guessed
        } else {
            stream.rate()
        };
        if !is_valid_rate(rate) {
            return Err(Error::Open {
                op: "av_guess_frame_rate",
                source: ffmpeg_next::Error::InvalidData,
            });
        }
        Ok(rate)
    }

    /// Next compressed unit, `None` at end of input.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = Packet::alloc(Rational::new(0, 1))?;
        let ret = unsafe { ffi::av_read_frame(self.inner.as_mut_ptr(), packet.as_mut_ptr()) };
        if ret < 0 {
            return match ffmpeg_next::Error::from(ret) {
                ffmpeg_next::Error::Eof => Ok(None),
                err => Err(Error::Read(err)),
            };
        }
        let time_base = self
            .streams
            .get(packet.stream_index())
            .map(|s| s.time_base())
            .unwrap_or(Rational::new(0, 1));
        packet.set_time_base(time_base);
        Ok(Some(packet))
    }
}

fn is_valid_rate(rate: Rational) -> bool {
    rate.numerator() > 0 && rate.denominator() > 0
}
