use std::path::Path;

use anyhow::Context;
use ffmpeg_pipe::{capture, device};
use tokio_util::sync::CancellationToken;

mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_pipe", log::LevelFilter::Debug)
        .filter_module("xgrab", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_pipe::init().context("ffmpeg_pipe init")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--list-devices") {
        for source in device::capture_sources() {
            println!("{}", source);
        }
        return Ok(());
    }

    let config = config::load(args.first().map(Path::new))?;
    log::info!(
        "capturing {} ({}) to {}",
        config.input.device,
        config.input.format.as_deref().unwrap_or("detected"),
        config.output.path.display()
    );

    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let mut worker = tokio::task::spawn_blocking(move || -> ffmpeg_pipe::Result<_> {
        let mut pipeline = capture::open(&config)?;
        pipeline.run(&worker_cancel)
    });

    loop {
        tokio::select! {
            joined = &mut worker => {
                let summary = joined.context("capture worker")??;
                log::info!(
                    "{} packets written ({:?})",
                    summary.packets_written,
                    summary.reason
                );
                return Ok(());
            },
            _ = tokio::signal::ctrl_c() => {
                if on_interrupt(&cancel) == Interrupt::Abort {
                    log::warn!("second interrupt, aborting without a trailer");
                    // the blocking worker would keep the runtime alive
                    std::process::exit(130);
                }
                log::info!("interrupt received, finishing capture");
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Finish,
    Abort,
}

/// The first interrupt cancels the capture so it drains and finalizes;
/// any later one asks for an immediate exit.
fn on_interrupt(cancel: &CancellationToken) -> Interrupt {
    if cancel.is_cancelled() {
        return Interrupt::Abort;
    }
    cancel.cancel();
    Interrupt::Finish
}
