use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ffmpeg_next::{Rational, format::Pixel, media};
use serde::{Deserialize, Serialize};

use crate::{
    decoder::DecoderContext,
    encoder::{EncoderContext, EncoderSettings},
    error::Result,
    frame::Frame,
    input::InputContainer,
    output::OutputContainer,
    packet::Packet,
    pipeline::{
        Backend, CompressedUnit, Demuxer, EncoderParams, FrameScaler, Muxer, Picture, Pipeline,
        PipelineOptions, Stages,
    },
    scaler::Scaler,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Capture format, e.g. "x11grab", "v4l2", "lavfi". None = detect from the device.
    pub format: Option<String>,
    /// Device descriptor handed to the capture format.
    pub device: String,
    /// Demuxer options such as `framerate` or `video_size`.
    pub options: BTreeMap<String, String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            format: Some("x11grab".to_string()),
            device: ":0.0".to_string(),
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    /// Muxer name; inferred from `path` when unset.
    pub format: Option<String>,
    pub interleaved: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("out.mp4"),
            format: None,
            interleaved: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub encoder: EncoderSettings,
    /// Stop after this many seconds; None = until end of input or Ctrl-C.
    pub max_duration_secs: Option<u64>,
    pub flush_on_stop: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            output: OutputConfig::default(),
            encoder: EncoderSettings::default(),
            max_duration_secs: None,
            flush_on_stop: true,
        }
    }
}

impl CaptureConfig {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_duration: self.max_duration_secs.map(Duration::from_secs),
            flush_on_stop: self.flush_on_stop,
        }
    }
}

/// FFmpeg-backed stages.
pub struct Ffmpeg;

impl Backend for Ffmpeg {
    type Packet = Packet;
    type Frame = Frame;
    type Input = InputContainer;
    type Decoder = DecoderContext;
    type Scaler = Scaler;
    type Encoder = EncoderContext;
    type Output = OutputContainer;
}

impl CompressedUnit for Packet {
    fn stream_index(&self) -> usize {
        Packet::stream_index(self)
    }
    fn set_stream_index(&mut self, index: usize) {
        Packet::set_stream_index(self, index)
    }
    fn pts(&self) -> Option<i64> {
        Packet::pts(self)
    }
    fn dts(&self) -> Option<i64> {
        Packet::dts(self)
    }
}

impl Picture for Frame {
    fn set_pts(&mut self, pts: Option<i64>) {
        Frame::set_pts(self, pts)
    }
    fn set_dts(&mut self, dts: Option<i64>) {
        Frame::set_dts(self, dts)
    }
}

impl Demuxer for InputContainer {
    type Packet = Packet;

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        InputContainer::read_packet(self)
    }
}

impl Muxer for OutputContainer {
    type Packet = Packet;

    fn write_header(&mut self) -> Result<()> {
        OutputContainer::write_header(self)
    }
    fn write_packet(&mut self, packet: Packet) -> Result<()> {
        OutputContainer::write_packet(self, packet)
    }
    fn write_trailer(&mut self) -> Result<()> {
        OutputContainer::write_trailer(self)
    }
}

impl FrameScaler for Scaler {
    type Frame = Frame;

    fn scale(&mut self, source: &Frame, width: u32, height: u32, format: Pixel) -> Result<Frame> {
        Scaler::scale(self, source, width, height, format)
    }
}

impl EncoderParams for EncoderContext {
    fn width(&self) -> u32 {
        EncoderContext::width(self)
    }
    fn height(&self) -> u32 {
        EncoderContext::height(self)
    }
    fn pixel_format(&self) -> Pixel {
        EncoderContext::pixel_format(self)
    }
    fn time_base(&self) -> Rational {
        EncoderContext::time_base(self)
    }
}

/// Opens every stage of a capture and returns the pipeline ready to run.
///
/// The encoder's time base is the reciprocal of the input frame rate. The
/// output stream is created before the encoder opens so a container that
/// wants global headers gets them, and refreshed afterwards to pick up
/// the encoder's extradata. On failure everything opened so far is
/// released.
pub fn open(config: &CaptureConfig) -> Result<Pipeline<Ffmpeg>> {
    let input = InputContainer::open(
        config.input.format.as_deref(),
        &config.input.device,
        &config.input.options,
    )?;
    let stream = input.find_best_stream(media::Type::Video, -1)?.clone();
    let decoder = DecoderContext::open(&stream)?;
    let rate = input.guess_frame_rate(&stream)?;
    let time_base = rate.invert();
    log::info!(
        "capture source: stream {} {}x{} {:?} at {} fps",
        stream.index(),
        decoder.width(),
        decoder.height(),
        decoder.format(),
        rate
    );

    let mut output = OutputContainer::open(&config.output.path, config.output.format.as_deref())?;
    output.set_interleaved(config.output.interleaved);

    let mut encoder = EncoderContext::by_name(&config.encoder.codec)?;
    encoder.configure(&config.encoder, &decoder, time_base)?;
    let output_stream = output.create_stream(&mut encoder)?;
    encoder.open(&config.encoder)?;
    output.update_stream_parameters(output_stream, &encoder)?;

    let stages = Stages {
        scaler: Scaler::new(),
        encoder,
        output,
        decoder,
        input,
        input_stream: stream.index(),
        output_stream,
    };
    Ok(Pipeline::new(stages, config.pipeline_options()))
}
