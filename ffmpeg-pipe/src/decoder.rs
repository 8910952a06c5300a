use std::ptr;

use ffmpeg_next::{Rational, ffi, format::Pixel};

use crate::{
    codec::{Codec, CodecContextKind, Received},
    error::{Error, Flow, Result, check, flow},
    frame::Frame,
    handle::Handle,
    packet::Packet,
    stream::StreamInfo,
};

/// Opened decoder for one input stream.
pub struct DecoderContext {
    inner: Handle<CodecContextKind>,
    stream_index: usize,
    time_base: Rational,
}

impl DecoderContext {
    /// Finds a decoder for the stream's codec and opens it with the
    /// stream's parameters.
    pub fn open(stream: &StreamInfo) -> Result<Self> {
        let codec = unsafe { ffi::avcodec_find_decoder(stream.codec_id().into()) };
        if codec.is_null() {
            return Err(Error::CodecNotFound(format!("{:?}", stream.codec_id())));
        }
        let mut inner =
            unsafe { Handle::<CodecContextKind>::from_raw(ffi::avcodec_alloc_context3(codec))? };

        unsafe {
            let ctx = inner.as_mut_ptr();
            check(
                ffi::avcodec_parameters_to_context(ctx, stream.parameters().as_ptr()),
                |source| Error::Open {
                    op: "avcodec_parameters_to_context",
                    source,
                },
            )?;
            (*ctx).pkt_timebase = stream.time_base().into();
            check(ffi::avcodec_open2(ctx, codec, ptr::null_mut()), |source| {
                Error::Open {
                    op: "avcodec_open2 (decoder)",
                    source,
                }
            })?;
        }

        let decoder = Self {
            inner,
            stream_index: stream.index(),
            time_base: stream.time_base(),
        };
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            return Err(Error::Open {
                op: "decoder parameters",
                source: ffmpeg_next::Error::InvalidData,
            });
        }
        log::debug!(
            "decoder opened: {:?} {}x{} {:?}",
            stream.codec_id(),
            decoder.width(),
            decoder.height(),
            decoder.format()
        );
        Ok(decoder)
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn width(&self) -> u32 {
        self.inner.get().width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.inner.get().height.max(0) as u32
    }

    pub fn format(&self) -> Pixel {
        Pixel::from(self.inner.get().pix_fmt)
    }

    pub fn sample_aspect_ratio(&self) -> Rational {
        self.inner.get().sample_aspect_ratio.into()
    }

    /// Time base of the packets this decoder consumes.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }
}

impl Codec for DecoderContext {
    type Input = Packet;
    type Output = Frame;
    const STAGE: &'static str = "decoder";

    fn send(&mut self, input: Option<&mut Packet>) -> Result<()> {
        let packet = match input {
            Some(packet) => {
                packet.rescale_ts(self.time_base);
                packet.as_ptr()
            }
            None => ptr::null(),
        };
        check(
            unsafe { ffi::avcodec_send_packet(self.inner.as_mut_ptr(), packet) },
            |source| Error::Pump {
                stage: Self::STAGE,
                source,
            },
        )?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Received<Frame>> {
        let mut frame = Frame::empty()?;
        let ret = unsafe { ffi::avcodec_receive_frame(self.inner.as_mut_ptr(), frame.as_mut_ptr()) };
        match flow(ret) {
            Ok(Flow::Ready) => Ok(Received::Unit(frame)),
            Ok(Flow::Again) => Ok(Received::Again),
            Ok(Flow::Eof) => Ok(Received::Eof),
            Err(source) => Err(Error::Pump {
                stage: Self::STAGE,
                source,
            }),
        }
    }
}
