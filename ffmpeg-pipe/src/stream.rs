use ffmpeg_next::{Rational, codec::Parameters, ffi, media};

use crate::error::{Error, Result};

/// Snapshot of one stream discovered in an input container.
pub struct StreamInfo {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
}

impl StreamInfo {
    /// Copies the metadata of `stream`.
    ///
    /// # Safety
    ///
    /// `stream` must point to a live stream of an open format context.
    pub(crate) unsafe fn from_raw(stream: *const ffi::AVStream) -> Result<Self> {
        let mut parameters = Parameters::new();
        let ret = unsafe { ffi::avcodec_parameters_copy(parameters.as_mut_ptr(), (*stream).codecpar) };
        if ret < 0 {
            return Err(Error::Allocation("codec parameters"));
        }
        unsafe {
            Ok(Self {
                index: (*stream).index.max(0) as usize,
                parameters,
                time_base: (*stream).time_base.into(),
                rate: (*stream).avg_frame_rate.into(),
            })
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Average frame rate as reported by the demuxer; `0/0` when unknown.
    pub fn rate(&self) -> Rational {
        self.rate
    }

    pub fn medium(&self) -> media::Type {
        self.parameters.medium()
    }

    pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
        self.parameters.id()
    }

    pub fn is_video(&self) -> bool {
        self.medium() == media::Type::Video
    }

    pub fn width(&self) -> u32 {
        unsafe { (*self.parameters.as_ptr()).width.max(0) as u32 }
    }

    pub fn height(&self) -> u32 {
        unsafe { (*self.parameters.as_ptr()).height.max(0) as u32 }
    }

    pub fn fps(&self) -> f32 {
        if self.rate.denominator() == 0 {
            return 0.0;
        }
        self.rate.numerator() as f32 / self.rate.denominator() as f32
    }
}

impl Clone for StreamInfo {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
        }
    }
}

impl std::fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamInfo")
            .field("index", &self.index)
            .field("medium", &self.medium())
            .field("codec_id", &self.codec_id())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("time_base", &self.time_base)
            .field("rate", &self.rate)
            .finish()
    }
}
