use std::fmt::{Display, Formatter};

/// A capture input format together with `device` strings it can open.
#[derive(Clone, Debug)]
pub struct CaptureSource {
    /// Value for the input `format` (e.g. "x11grab", "v4l2").
    pub format: String,
    pub description: String,
    /// Candidate `device` values. Empty when they cannot be enumerated.
    pub devices: Vec<String>,
}

impl Display for CaptureSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<12} {}", self.format, self.description)?;
        for device in self.devices.iter() {
            write!(f, "\n    {}", device)?;
        }
        Ok(())
    }
}

/// Guess openable devices for a capture format.
fn devices_for_format(format: &str) -> Vec<String> {
    match format {
        "x11grab" => {
            let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
            vec![format!("{}.0", display.split('.').next().unwrap_or(":0"))]
        }
        #[cfg(target_os = "linux")]
        "v4l2" | "video4linux2" => v4l2_device_paths()
            .into_iter()
            .filter_map(|p| p.into_os_string().into_string().ok())
            .collect(),
        "lavfi" => vec![
            "testsrc=size=1280x720:rate=30".to_string(),
            "color=c=blue:s=1280x720".to_string(),
        ],
        _ => Vec::new(),
    }
}

#[cfg(target_os = "linux")]
fn v4l2_device_paths() -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|s| s.starts_with("video"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

/// Video capture formats registered by libavdevice, plus lavfi.
pub fn capture_sources() -> Vec<CaptureSource> {
    let mut sources: Vec<CaptureSource> = ffmpeg_next::device::input::video()
        .map(|format| CaptureSource {
            format: format.name().to_string(),
            description: format.description().to_string(),
            devices: devices_for_format(format.name()),
        })
        .collect();
    if !sources.iter().any(|s| s.format == "lavfi") {
        sources.push(CaptureSource {
            format: "lavfi".to_string(),
            description: "Libavfilter virtual input device".to_string(),
            devices: devices_for_format("lavfi"),
        });
    }
    log::debug!("{} capture formats available", sources.len());
    sources
}
