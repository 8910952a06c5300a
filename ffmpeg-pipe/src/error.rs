use std::os::raw::c_int;

use ffmpeg_next::media;
use ffmpeg_next::util::error::{EAGAIN, EINVAL, ENOMEM};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A native allocation returned null.
    #[error("failed to allocate {0}")]
    Allocation(&'static str),

    /// An allocate, open or stream info step returned a negative code during setup.
    #[error("{op} failed: {source}")]
    Open {
        op: &'static str,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("no {0:?} stream found")]
    StreamNotFound(media::Type),

    #[error("codec not found: {0}")]
    CodecNotFound(String),

    /// Submission or drain failed with a code that is not flow control.
    #[error("{stage} pump failed: {source}")]
    Pump {
        stage: &'static str,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("scale failed: {0}")]
    Scale(String),

    #[error("read failed: {0}")]
    Read(#[source] ffmpeg_next::Error),

    #[error("{op} failed: {source}")]
    Write {
        op: &'static str,
        #[source]
        source: ffmpeg_next::Error,
    },

    /// Header/packet/trailer written out of order.
    #[error("out of order write: {0}")]
    Sequence(&'static str),

    #[error("non monotonic dts: {current} after {previous}")]
    NonMonotonicDts { previous: i64, current: i64 },

    /// Output pts went backwards, e.g. an encoder reordering B-frames.
    #[error("non monotonic pts: {current} after {previous}")]
    NonMonotonicPts { previous: i64, current: i64 },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Negative error code in the FFmpeg `AVERROR` space.
    pub fn code(&self) -> c_int {
        match self {
            Error::Open { source, .. }
            | Error::Pump { source, .. }
            | Error::Read(source)
            | Error::Write { source, .. } => c_int::from(*source),
            Error::Allocation(_) => averror(ENOMEM),
            Error::StreamNotFound(_) => c_int::from(ffmpeg_next::Error::StreamNotFound),
            Error::CodecNotFound(_) => c_int::from(ffmpeg_next::Error::EncoderNotFound),
            Error::Scale(_) | Error::Sequence(_) | Error::InvalidArgument(_) => {
                averror(EINVAL)
            }
            Error::NonMonotonicDts { .. } | Error::NonMonotonicPts { .. } => {
                c_int::from(ffmpeg_next::Error::InvalidData)
            }
            Error::InvalidState(_) => averror(EINVAL),
        }
    }

    /// True when the error came out of a codec pump.
    pub fn is_pump_failure(&self) -> bool {
        matches!(self, Error::Pump { .. } | Error::Scale(_))
    }
}

fn averror(errno: c_int) -> c_int {
    -errno
}

/// Maps a negative return code to `Err`, passing non-negative values through.
pub(crate) fn check(
    ret: c_int,
    wrap: impl FnOnce(ffmpeg_next::Error) -> Error,
) -> Result<c_int> {
    if ret < 0 {
        Err(wrap(ffmpeg_next::Error::from(ret)))
    } else {
        Ok(ret)
    }
}

/// Result of a single drain attempt on a codec.
pub(crate) enum Flow {
    Ready,
    Again,
    Eof,
}

/// Classifies a receive return code as flow control or failure.
pub(crate) fn flow(ret: c_int) -> Result<Flow, ffmpeg_next::Error> {
    if ret >= 0 {
        return Ok(Flow::Ready);
    }
    match ffmpeg_next::Error::from(ret) {
        ffmpeg_next::Error::Eof => Ok(Flow::Eof),
        ffmpeg_next::Error::Other { errno } if errno == EAGAIN => {
            Ok(Flow::Again)
        }
        err => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_codes_are_not_errors() {
        let again = c_int::from(ffmpeg_next::Error::Other {
            errno: EAGAIN,
        });
        assert!(matches!(flow(again), Ok(Flow::Again)));
        assert!(matches!(flow(c_int::from(ffmpeg_next::Error::Eof)), Ok(Flow::Eof)));
        assert!(matches!(flow(0), Ok(Flow::Ready)));
        assert!(flow(c_int::from(ffmpeg_next::Error::InvalidData)).is_err());
    }

    #[test]
    fn test_error_codes_are_negative() {
        let errors = [
            Error::Allocation("packet"),
            Error::Pump {
                stage: "decoder",
                source: ffmpeg_next::Error::InvalidData,
            },
            Error::Scale("rows".to_string()),
            Error::Sequence("packet before header"),
            Error::NonMonotonicDts {
                previous: 2,
                current: 1,
            },
            Error::NonMonotonicPts {
                previous: 2,
                current: 1,
            },
            Error::StreamNotFound(media::Type::Video),
        ];
        for err in errors.iter() {
            assert!(err.code() < 0, "{} -> {}", err, err.code());
        }
    }

    #[test]
    fn test_check_passes_non_negative() {
        assert_eq!(check(3, Error::Read).unwrap(), 3);
        let err = check(c_int::from(ffmpeg_next::Error::InvalidData), Error::Read).unwrap_err();
        assert!(matches!(err, Error::Read(ffmpeg_next::Error::InvalidData)));
    }
}
