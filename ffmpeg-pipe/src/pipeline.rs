//! The capture driver: read, decode, scale, encode, write.
//!
//! One read drives every downstream step for that unit before the next
//! read. Cancellation and the time limit are checked once per read, so the
//! cascade for the current unit always completes. Whatever happens after
//! the header is written, the trailer is written exactly once.
//!
//! The driver only talks to its stages through the traits below, so tests
//! can run it against in-memory stand-ins.

use std::time::{Duration, Instant};

use ffmpeg_next::{Rational, format::Pixel};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{self, Codec},
    error::{Error, Result},
};

pub trait CompressedUnit {
    fn stream_index(&self) -> usize;
    fn set_stream_index(&mut self, index: usize);
    fn pts(&self) -> Option<i64>;
    fn dts(&self) -> Option<i64>;
}

pub trait Picture {
    fn set_pts(&mut self, pts: Option<i64>);
    fn set_dts(&mut self, dts: Option<i64>);
}

pub trait Demuxer {
    type Packet;

    /// `Ok(None)` at end of input.
    fn read_packet(&mut self) -> Result<Option<Self::Packet>>;
}

pub trait Muxer {
    type Packet;

    fn write_header(&mut self) -> Result<()>;
    fn write_packet(&mut self, packet: Self::Packet) -> Result<()>;
    fn write_trailer(&mut self) -> Result<()>;
}

pub trait FrameScaler {
    type Frame;

    fn scale(
        &mut self,
        source: &Self::Frame,
        width: u32,
        height: u32,
        format: Pixel,
    ) -> Result<Self::Frame>;
}

/// What the driver needs to know about the configured encoder.
pub trait EncoderParams {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn pixel_format(&self) -> Pixel;
    fn time_base(&self) -> Rational;
}

/// The concrete stage types a pipeline is built from.
pub trait Backend {
    type Packet: CompressedUnit;
    type Frame: Picture;
    type Input: Demuxer<Packet = Self::Packet>;
    type Decoder: Codec<Input = Self::Packet, Output = Self::Frame>;
    type Scaler: FrameScaler<Frame = Self::Frame>;
    type Encoder: Codec<Input = Self::Frame, Output = Self::Packet> + EncoderParams;
    type Output: Muxer<Packet = Self::Packet>;
}

/// Opened stages of one capture.
///
/// The stages are opened input, decoder, output, encoder, scaler. Fields
/// drop in declaration order, so they are released in exactly the
/// reverse.
pub struct Stages<B: Backend> {
    pub scaler: B::Scaler,
    pub encoder: B::Encoder,
    pub output: B::Output,
    pub decoder: B::Decoder,
    pub input: B::Input,
    /// Input stream fed to the decoder.
    pub input_stream: usize,
    /// Output stream created for the encoder.
    pub output_stream: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfInput,
    Cancelled,
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Stop as if cancelled once this much time has passed.
    pub max_duration: Option<Duration>,
    /// Drain frames and packets still buffered in the codecs on stop.
    pub flush_on_stop: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_duration: None,
            flush_on_stop: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub packets_read: u64,
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub packets_written: u64,
    pub reason: StopReason,
}

#[derive(Debug, Default)]
struct Counters {
    packets_read: u64,
    frames_decoded: u64,
    frames_encoded: u64,
    packets_written: u64,
    last_dts: Option<i64>,
    last_pts: Option<i64>,
}

pub struct Pipeline<B: Backend> {
    stages: Stages<B>,
    options: PipelineOptions,
    state: State,
    counters: Counters,
}

impl<B: Backend> Pipeline<B> {
    pub fn new(stages: Stages<B>, options: PipelineOptions) -> Self {
        Self {
            stages,
            options,
            state: State::Initializing,
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stages(&self) -> &Stages<B> {
        &self.stages
    }

    /// Runs the capture until end of input, cancellation or the time limit.
    ///
    /// A failed header write ends the run without a trailer. Any later
    /// failure still writes the trailer and then returns the failure.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<Summary> {
        if self.state != State::Initializing {
            return Err(Error::InvalidState("pipeline already ran"));
        }
        if let Err(e) = self.stages.output.write_header() {
            self.state = State::Stopped;
            return Err(e);
        }

        self.state = State::Running;
        log::info!(
            "capture running: input stream {} -> output stream {}",
            self.stages.input_stream,
            self.stages.output_stream
        );
        let mut result = self.running(cancel, Instant::now());

        self.state = State::Draining;
        if let Ok(reason) = result {
            log::debug!("draining after {:?}", reason);
            if self.options.flush_on_stop {
                result = self.flush().map(|_| reason);
            }
        }

        self.state = State::Stopped;
        let trailer = self.stages.output.write_trailer();
        match (result, trailer) {
            (Ok(reason), Ok(())) => {
                let summary = self.summary(reason);
                log::info!("capture stopped: {:?}", summary);
                Ok(summary)
            }
            (Ok(_), Err(e)) => {
                log::error!("write trailer: {}", e);
                Err(e)
            }
            (Err(e), trailer) => {
                if let Err(te) = trailer {
                    log::error!("write trailer after failure: {}", te);
                }
                log::error!(
                    "capture failed after {} packets written: {}",
                    self.counters.packets_written,
                    e
                );
                Err(e)
            }
        }
    }

    fn running(&mut self, cancel: &CancellationToken, started: Instant) -> Result<StopReason> {
        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            if let Some(limit) = self.options.max_duration {
                if started.elapsed() >= limit {
                    return Ok(StopReason::TimeLimit);
                }
            }
            let Some(mut packet) = self.stages.input.read_packet()? else {
                return Ok(StopReason::EndOfInput);
            };
            self.counters.packets_read += 1;
            if packet.stream_index() != self.stages.input_stream {
                continue;
            }
            self.decode(Some(&mut packet))?;
        }
    }

    /// Flushes the decoder, then the encoder.
    fn flush(&mut self) -> Result<()> {
        self.decode(None)?;
        let Stages {
            encoder,
            output,
            output_stream,
            ..
        } = &mut self.stages;
        let output_stream = *output_stream;
        let counters = &mut self.counters;
        codec::pump(encoder, None, |packet| {
            write_packet(output, output_stream, counters, packet)
        })?;
        Ok(())
    }

    fn decode(&mut self, packet: Option<&mut B::Packet>) -> Result<usize> {
        let Stages {
            decoder,
            scaler,
            encoder,
            output,
            output_stream,
            ..
        } = &mut self.stages;
        let output_stream = *output_stream;
        let counters = &mut self.counters;
        codec::pump(decoder, packet, |frame| {
            counters.frames_decoded += 1;
            encode_frame::<B>(scaler, encoder, output, output_stream, counters, frame)
        })
    }

    fn summary(&self, reason: StopReason) -> Summary {
        Summary {
            packets_read: self.counters.packets_read,
            frames_decoded: self.counters.frames_decoded,
            frames_encoded: self.counters.frames_encoded,
            packets_written: self.counters.packets_written,
            reason,
        }
    }
}

/// Scales a decoded frame to the encoder's format, stamps the next
/// synthetic timestamp and encodes it.
fn encode_frame<B: Backend>(
    scaler: &mut B::Scaler,
    encoder: &mut B::Encoder,
    output: &mut B::Output,
    output_stream: usize,
    counters: &mut Counters,
    frame: B::Frame,
) -> Result<()> {
    let mut scaled = scaler.scale(
        &frame,
        encoder.width(),
        encoder.height(),
        encoder.pixel_format(),
    )?;
    drop(frame);

    let pts = counters.frames_encoded as i64 * encoder.time_base().numerator() as i64;
    scaled.set_pts(Some(pts));
    scaled.set_dts(Some(pts));
    counters.frames_encoded += 1;

    codec::pump(encoder, Some(&mut scaled), |packet| {
        write_packet(output, output_stream, counters, packet)
    })?;
    Ok(())
}

fn write_packet<M>(
    output: &mut M,
    stream_index: usize,
    counters: &mut Counters,
    mut packet: M::Packet,
) -> Result<()>
where
    M: Muxer,
    M::Packet: CompressedUnit,
{
    packet.set_stream_index(stream_index);
    let dts = packet.dts();
    let pts = packet.pts();
    if let (Some(previous), Some(current)) = (counters.last_dts, dts) {
        if current < previous {
            return Err(Error::NonMonotonicDts { previous, current });
        }
    }
    if let (Some(previous), Some(current)) = (counters.last_pts, pts) {
        if current < previous {
            return Err(Error::NonMonotonicPts { previous, current });
        }
    }
    counters.last_dts = dts.or(counters.last_dts);
    counters.last_pts = pts.or(counters.last_pts);
    output.write_packet(packet)?;
    counters.packets_written += 1;
    Ok(())
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
