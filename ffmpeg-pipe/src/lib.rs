/// Registers FFmpeg components (formats, devices). Call once at startup
/// before opening capture inputs like x11grab or v4l2.
pub fn init() -> Result<()> {
    ffmpeg_next::init().map_err(|source| Error::Open {
        op: "ffmpeg init",
        source,
    })
}

pub mod capture;
pub mod codec;
pub mod decoder;
pub mod device;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod handle;
pub mod input;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod scaler;
pub mod stream;

pub use error::{Error, Result};
