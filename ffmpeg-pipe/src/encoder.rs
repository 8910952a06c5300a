use std::collections::BTreeMap;
use std::ffi::CString;
use std::ptr;

use ffmpeg_next::{Dictionary, Rational, ffi, format::Pixel};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Codec, CodecContextKind, Received},
    decoder::DecoderContext,
    error::{Error, Flow, Result, check, flow},
    frame::Frame,
    handle::Handle,
    packet::Packet,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Encoder name, e.g. "libx264", "mpeg4".
    pub codec: String,
    /// Target pixel format name, e.g. "yuv420p".
    pub pixel_format: String,
    /// None = keep the decoder's geometry.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bit_rate: i64,
    pub rc_buffer_size: i32,
    pub rc_max_rate: i64,
    /// None leaves the encoder's own minimum in place.
    pub rc_min_rate: Option<i64>,
    pub gop_size: Option<u32>,
    /// B-frames between references. Defaults to 0 so packets leave the
    /// encoder in presentation order; None keeps the encoder default.
    pub max_b_frames: Option<u32>,
    /// Value of the encoder private "preset" option.
    pub preset: Option<String>,
    /// Extra encoder private options.
    pub options: BTreeMap<String, String>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            width: None,
            height: None,
            bit_rate: 2_000_000,
            rc_buffer_size: 4_000_000,
            rc_max_rate: 2_000_000,
            rc_min_rate: None,
            gop_size: None,
            max_b_frames: Some(0),
            preset: Some("fast".to_string()),
            options: BTreeMap::new(),
        }
    }
}

impl EncoderSettings {
    pub fn pixel(&self) -> Result<Pixel> {
        parse_pixel(&self.pixel_format)
    }
}

/// Resolves a pixel format name the way `-pix_fmt` does.
pub fn parse_pixel(name: &str) -> Result<Pixel> {
    let cname = CString::new(name)
        .map_err(|e| Error::InvalidArgument(format!("pixel format {:?}: {}", name, e)))?;
    let format = unsafe { ffi::av_get_pix_fmt(cname.as_ptr()) };
    match Pixel::from(format) {
        Pixel::None => Err(Error::InvalidArgument(format!(
            "unknown pixel format: {}",
            name
        ))),
        pixel => Ok(pixel),
    }
}

/// Encoder context. Configured first, then opened; pumping an encoder
/// that was never opened fails.
pub struct EncoderContext {
    inner: Handle<CodecContextKind>,
    codec: *const ffi::AVCodec,
    name: String,
    opened: bool,
}

impl EncoderContext {
    pub fn by_name(name: &str) -> Result<Self> {
        let cname = CString::new(name)
            .map_err(|e| Error::InvalidArgument(format!("codec name {:?}: {}", name, e)))?;
        let codec = unsafe { ffi::avcodec_find_encoder_by_name(cname.as_ptr()) };
        if codec.is_null() {
            return Err(Error::CodecNotFound(name.to_string()));
        }
        let inner =
            unsafe { Handle::<CodecContextKind>::from_raw(ffi::avcodec_alloc_context3(codec))? };
        Ok(Self {
            inner,
            codec,
            name: name.to_string(),
            opened: false,
        })
    }

    /// Copies geometry and aspect ratio from `source`, applies the rate
    /// control settings and sets `time_base`.
    pub fn configure(
        &mut self,
        settings: &EncoderSettings,
        source: &DecoderContext,
        time_base: Rational,
    ) -> Result<()> {
        self.configure_with(
            settings,
            settings.width.unwrap_or(source.width()),
            settings.height.unwrap_or(source.height()),
            source.sample_aspect_ratio(),
            time_base,
        )
    }

    pub fn configure_with(
        &mut self,
        settings: &EncoderSettings,
        width: u32,
        height: u32,
        aspect_ratio: Rational,
        time_base: Rational,
    ) -> Result<()> {
        if self.opened {
            return Err(Error::InvalidState("encoder configured after open"));
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument(format!(
                "invalid encoder size {}x{}",
                width, height
            )));
        }
        let pixel = settings.pixel()?;
        let ctx = self.inner.get_mut();
        ctx.pix_fmt = pixel.into();
        ctx.width = width as i32;
        ctx.height = height as i32;
        ctx.sample_aspect_ratio = aspect_ratio.into();
        ctx.bit_rate = settings.bit_rate;
        ctx.rc_buffer_size = settings.rc_buffer_size;
        ctx.rc_max_rate = settings.rc_max_rate;
        if let Some(min_rate) = settings.rc_min_rate {
            ctx.rc_min_rate = min_rate;
        }
        if let Some(gop) = settings.gop_size {
            ctx.gop_size = gop as i32;
        }
        // reordered frames would reach the muxer with decreasing pts
        if let Some(b_frames) = settings.max_b_frames {
            ctx.max_b_frames = b_frames as i32;
        }
        ctx.time_base = time_base.into();
        ctx.framerate = time_base.invert().into();
        if let Some(min_rate) = settings.rc_min_rate {
            if min_rate > settings.rc_max_rate {
                log::warn!(
                    "rc_min_rate {} is above rc_max_rate {}",
                    min_rate,
                    settings.rc_max_rate
                );
            }
        }
        Ok(())
    }

    /// Makes the encoder put codec headers in extradata.
    pub fn set_global_header(&mut self) {
        self.inner.get_mut().flags |= ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
    }

    pub fn has_global_header(&self) -> bool {
        self.inner.get().flags & ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32 != 0
    }

    /// Opens the encoder with the preset and private options of `settings`.
    pub fn open(&mut self, settings: &EncoderSettings) -> Result<()> {
        if self.opened {
            return Err(Error::InvalidState("encoder opened twice"));
        }
        let mut opts = Dictionary::new();
        if let Some(ref preset) = settings.preset {
            opts.set("preset", preset);
        }
        for (key, value) in settings.options.iter() {
            opts.set(key, value);
        }
        unsafe {
            let mut opts_ptr = opts.disown();
            let ret = ffi::avcodec_open2(self.inner.as_mut_ptr(), self.codec, &mut opts_ptr);
            let unused = Dictionary::own(opts_ptr);
            check(ret, |source| Error::Open {
                op: "avcodec_open2 (encoder)",
                source,
            })?;
            for (key, _) in unused.iter() {
                log::warn!("encoder {} ignored option: {}", self.name, key);
            }
        }
        self.opened = true;
        log::info!(
            "encoder opened: {} {}x{} {:?}, time_base {}",
            self.name,
            self.width(),
            self.height(),
            self.pixel_format(),
            self.time_base()
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.inner.get().width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.inner.get().height.max(0) as u32
    }

    pub fn pixel_format(&self) -> Pixel {
        Pixel::from(self.inner.get().pix_fmt)
    }

    pub fn time_base(&self) -> Rational {
        self.inner.get().time_base.into()
    }

    pub fn max_b_frames(&self) -> i32 {
        self.inner.get().max_b_frames
    }

    pub fn bit_rate(&self) -> i64 {
        self.inner.get().bit_rate
    }

    pub fn as_ptr(&self) -> *const ffi::AVCodecContext {
        self.inner.as_ptr()
    }
}

impl Codec for EncoderContext {
    type Input = Frame;
    type Output = Packet;
    const STAGE: &'static str = "encoder";

    fn send(&mut self, input: Option<&mut Frame>) -> Result<()> {
        if !self.opened {
            return Err(Error::InvalidState("encoder pumped before open"));
        }
        let frame = match input {
            Some(frame) => {
                frame.clear_picture_type();
                frame.as_ptr()
            }
            None => ptr::null(),
        };
        check(
            unsafe { ffi::avcodec_send_frame(self.inner.as_mut_ptr(), frame) },
            |source| Error::Pump {
                stage: Self::STAGE,
                source,
            },
        )?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Received<Packet>> {
        if !self.opened {
            return Err(Error::InvalidState("encoder pumped before open"));
        }
        let mut packet = Packet::alloc(self.time_base())?;
        let ret =
            unsafe { ffi::avcodec_receive_packet(self.inner.as_mut_ptr(), packet.as_mut_ptr()) };
        match flow(ret) {
            Ok(Flow::Ready) => Ok(Received::Unit(packet)),
            Ok(Flow::Again) => Ok(Received::Again),
            Ok(Flow::Eof) => Ok(Received::Eof),
            Err(source) => Err(Error::Pump {
                stage: Self::STAGE,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pump;

    fn mpeg4() -> Option<EncoderContext> {
        crate::init().unwrap();
        match EncoderContext::by_name("mpeg4") {
            Ok(encoder) => Some(encoder),
            Err(e) => {
                eprintln!("skip: {}", e);
                None
            }
        }
    }

    fn settings() -> EncoderSettings {
        EncoderSettings {
            codec: "mpeg4".to_string(),
            bit_rate: 400_000,
            rc_buffer_size: 0,
            rc_max_rate: 0,
            preset: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = EncoderSettings::default();
        assert_eq!(settings.codec, "libx264");
        assert_eq!(settings.bit_rate, 2_000_000);
        assert_eq!(settings.rc_buffer_size, 4_000_000);
        assert_eq!(settings.rc_max_rate, 2_000_000);
        assert_eq!(settings.rc_min_rate, None);
        assert_eq!(settings.max_b_frames, Some(0));
        assert_eq!(settings.preset.as_deref(), Some("fast"));
        assert_eq!(settings.pixel().unwrap(), Pixel::YUV420P);
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings: EncoderSettings =
            serde_json::from_str(r#"{"codec": "mpeg4", "rc_min_rate": 1000000}"#).unwrap();
        assert_eq!(settings.codec, "mpeg4");
        assert_eq!(settings.rc_min_rate, Some(1_000_000));
        assert_eq!(settings.bit_rate, 2_000_000);
    }

    #[test]
    fn test_unknown_pixel_format() {
        assert!(matches!(
            parse_pixel("not-a-format"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_encoder() {
        crate::init().unwrap();
        assert!(matches!(
            EncoderContext::by_name("no-such-encoder"),
            Err(Error::CodecNotFound(_))
        ));
    }

    #[test]
    fn test_pump_before_open_is_rejected() {
        let Some(mut encoder) = mpeg4() else { return };
        let mut frame = Frame::video(32, 32, Pixel::YUV420P).unwrap();
        let err = pump(&mut encoder, Some(&mut frame), |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_encode_and_flush() {
        let Some(mut encoder) = mpeg4() else { return };
        let time_base = Rational::new(1, 10);
        encoder
            .configure_with(&settings(), 64, 48, Rational::new(1, 1), time_base)
            .unwrap();
        encoder.open(&settings()).unwrap();
        assert!(encoder.is_open());
        assert_eq!(encoder.time_base(), time_base);

        let mut packets = Vec::new();
        for i in 0..5 {
            let mut frame = Frame::video(64, 48, Pixel::YUV420P).unwrap();
            frame.set_pts(Some(i));
            pump(&mut encoder, Some(&mut frame), |p| {
                packets.push(p);
                Ok(())
            })
            .unwrap();
        }
        pump(&mut encoder, None, |p| {
            packets.push(p);
            Ok(())
        })
        .unwrap();

        assert_eq!(packets.len(), 5);
        let dts: Vec<i64> = packets.iter().filter_map(|p| p.dts()).collect();
        assert!(dts.windows(2).all(|w| w[0] <= w[1]));
        assert!(packets.iter().all(|p| p.time_base() == time_base));
    }

    #[test]
    fn test_default_settings_disable_b_frames() {
        let Some(mut encoder) = mpeg4() else { return };
        let settings = EncoderSettings {
            max_b_frames: Some(2),
            ..settings()
        };
        encoder
            .configure_with(&settings, 32, 32, Rational::new(1, 1), Rational::new(1, 25))
            .unwrap();
        assert_eq!(encoder.max_b_frames(), 2);

        let Some(mut encoder) = mpeg4() else { return };
        encoder
            .configure_with(
                &EncoderSettings::default(),
                32,
                32,
                Rational::new(1, 1),
                Rational::new(1, 25),
            )
            .unwrap();
        assert_eq!(encoder.max_b_frames(), 0);
    }

    #[test]
    fn test_configure_after_open_is_rejected() {
        let Some(mut encoder) = mpeg4() else { return };
        encoder
            .configure_with(&settings(), 32, 32, Rational::new(1, 1), Rational::new(1, 25))
            .unwrap();
        encoder.open(&settings()).unwrap();
        assert!(matches!(
            encoder.configure_with(&settings(), 32, 32, Rational::new(1, 1), Rational::new(1, 25)),
            Err(Error::InvalidState(_))
        ));
    }
}
