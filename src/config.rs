use std::path::{Path, PathBuf};

use anyhow::Context;
use ffmpeg_pipe::capture::CaptureConfig;

const OUTPUT_ENV: &str = "XGRAB_OUTPUT";

/// Reads the capture configuration from `path` (JSON, every field
/// optional), or uses the defaults. `XGRAB_OUTPUT` overrides the output path.
pub fn load(path: Option<&Path>) -> anyhow::Result<CaptureConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            parse(&text).with_context(|| format!("parse config {}", path.display()))?
        }
        None => CaptureConfig::default(),
    };
    apply_output_override(&mut config, std::env::var(OUTPUT_ENV).ok());
    Ok(config)
}

fn parse(text: &str) -> serde_json::Result<CaptureConfig> {
    serde_json::from_str(text)
}

fn apply_output_override(config: &mut CaptureConfig, output: Option<String>) {
    if let Some(output) = output.filter(|o| !o.is_empty()) {
        log::debug!("{} overrides output path: {}", OUTPUT_ENV, output);
        config.output.path = PathBuf::from(output);
    }
}
