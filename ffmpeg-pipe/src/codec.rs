//! The submit/drain protocol shared by decoders and encoders.
//!
//! One submission turns into a finite run of outputs. [`Codec::submit`]
//! hands that run out as a [`Drain`] iterator which ends on flow control
//! (`EAGAIN` / end of stream) and yields at most one error; [`pump`]
//! consumes it eagerly and feeds every unit to a callback.

use ffmpeg_next::ffi;

use crate::{error::Result, handle::Resource};

/// Decoder and encoder contexts share one release function.
pub struct CodecContextKind;

unsafe impl Resource for CodecContextKind {
    type Raw = ffi::AVCodecContext;
    const NAME: &'static str = "codec context";

    unsafe fn release(raw: *mut ffi::AVCodecContext) {
        let mut raw = raw;
        unsafe { ffi::avcodec_free_context(&mut raw) };
    }
}

/// Outcome of one drain attempt.
#[derive(Debug)]
pub enum Received<T> {
    Unit(T),
    /// The codec needs more input before it can produce output.
    Again,
    /// The codec was flushed and has nothing left.
    Eof,
}

pub trait Codec {
    type Input;
    type Output;

    /// Name used in pump errors and logs.
    const STAGE: &'static str;

    /// Submits one unit, or end of stream when `input` is `None`.
    fn send(&mut self, input: Option<&mut Self::Input>) -> Result<()>;

    fn receive(&mut self) -> Result<Received<Self::Output>>;

    /// Submits `input` and returns the outputs it produced.
    fn submit(&mut self, input: Option<&mut Self::Input>) -> Result<Drain<'_, Self>>
    where
        Self: Sized,
    {
        self.send(input)?;
        Ok(Drain {
            codec: self,
            done: false,
        })
    }
}

/// Outputs of a single submission, in emission order.
pub struct Drain<'a, C: Codec> {
    codec: &'a mut C,
    done: bool,
}

impl<C: Codec> Iterator for Drain<'_, C> {
    type Item = Result<C::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.codec.receive() {
            Ok(Received::Unit(unit)) => Some(Ok(unit)),
            Ok(Received::Again) | Ok(Received::Eof) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<C: Codec> std::iter::FusedIterator for Drain<'_, C> {}

/// Submits `input` and passes each output to `on_output`.
///
/// Returns the number of outputs handed over. A codec error or an error
/// from `on_output` stops draining and is returned as is.
pub fn pump<C, F>(codec: &mut C, input: Option<&mut C::Input>, mut on_output: F) -> Result<usize>
where
    C: Codec,
    F: FnMut(C::Output) -> Result<()>,
{
    let mut emitted = 0;
    for unit in codec.submit(input)? {
        on_output(unit?)?;
        emitted += 1;
    }
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::error::Error;

    /// Emits a scripted burst of outputs per submission.
    struct Scripted {
        bursts: VecDeque<Vec<Result<Received<u32>>>>,
        current: VecDeque<Result<Received<u32>>>,
        receives: usize,
    }

    impl Scripted {
        fn new(bursts: Vec<Vec<Result<Received<u32>>>>) -> Self {
            Self {
                bursts: bursts.into(),
                current: VecDeque::new(),
                receives: 0,
            }
        }
    }

    impl Codec for Scripted {
        type Input = u32;
        type Output = u32;
        const STAGE: &'static str = "scripted";

        fn send(&mut self, _input: Option<&mut u32>) -> Result<()> {
            self.current = self.bursts.pop_front().unwrap_or_default().into();
            Ok(())
        }

        fn receive(&mut self) -> Result<Received<u32>> {
            self.receives += 1;
            self.current.pop_front().unwrap_or(Ok(Received::Again))
        }
    }

    fn units(n: u32) -> Vec<Result<Received<u32>>> {
        (0..n).map(|i| Ok(Received::Unit(i))).collect()
    }

    fn failure() -> Error {
        Error::Pump {
            stage: "scripted",
            source: ffmpeg_next::Error::InvalidData,
        }
    }

    #[test]
    fn test_callback_once_per_output_in_order() {
        let mut codec = Scripted::new(vec![units(3)]);
        let mut seen = Vec::new();
        let n = pump(&mut codec, Some(&mut 0), |u| {
            seen.push(u);
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_again_and_eof_end_drain_without_error() {
        let mut codec = Scripted::new(vec![vec![Ok(Received::Again)], {
            let mut b = units(1);
            b.push(Ok(Received::Eof));
            b.push(Ok(Received::Unit(99)));
            b
        }]);
        assert_eq!(pump(&mut codec, Some(&mut 0), |_| Ok(())).unwrap(), 0);
        let mut seen = Vec::new();
        let n = pump(&mut codec, None, |u| {
            seen.push(u);
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn test_codec_error_propagates() {
        let mut codec = Scripted::new(vec![vec![
            Ok(Received::Unit(1)),
            Err(failure()),
            Ok(Received::Unit(2)),
        ]]);
        let mut seen = Vec::new();
        let err = pump(&mut codec, Some(&mut 0), |u| {
            seen.push(u);
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_pump_failure());
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_callback_error_stops_draining() {
        let mut codec = Scripted::new(vec![units(4)]);
        let err = pump(&mut codec, Some(&mut 0), |u| {
            if u == 1 {
                Err(Error::Scale("rows".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert!(matches!(err, Error::Scale(_)));
        // units 2 and 3 were never pulled out of the codec
        assert_eq!(codec.receives, 2);
    }

    #[test]
    fn test_drain_is_fused() {
        let mut codec = Scripted::new(vec![units(1)]);
        let mut drain = codec.submit(Some(&mut 0)).unwrap();
        assert!(matches!(drain.next(), Some(Ok(0))));
        assert!(drain.next().is_none());
        assert!(drain.next().is_none());
        drop(drain);
        assert_eq!(codec.receives, 2);
    }
}
