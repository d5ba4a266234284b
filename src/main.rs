//! screenreel
//!
//! Records the screen to a timestamped video file through a virtual
//! display and an ffmpeg encode pipeline, driven by a capture session
//! controller that reconciles every way a recording can end.

mod auth;
mod config;
mod display;
mod error;
mod logging;
mod notify;
mod pipeline;
mod session;
mod storage;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use auth::CaptureGrant;
use config::RecorderConfig;
use notify::{MediaIndex, NotificationSink, SharedStopSignal, StopSignalRegistry};
use pipeline::FfmpegPipelineFactory;
use session::SessionController;

enum RecorderEvent {
    Started,
    Progress(u64),
    Saved(PathBuf),
    Cleared,
}

/// Forwards session notifications to the main thread.
struct ChannelNotifier {
    tx: mpsc::Sender<RecorderEvent>,
}

impl NotificationSink for ChannelNotifier {
    fn on_recording_started(&self) {
        let _ = self.tx.send(RecorderEvent::Started);
    }

    fn on_recording_progress(&self, elapsed_millis: u64) {
        let _ = self.tx.send(RecorderEvent::Progress(elapsed_millis));
    }

    fn on_recording_cleared(&self) {
        let _ = self.tx.send(RecorderEvent::Cleared);
    }
}

/// Forwards finished-file signals to the main thread.
struct ChannelMediaIndex {
    tx: mpsc::Sender<RecorderEvent>,
}

impl MediaIndex for ChannelMediaIndex {
    fn add_file(&self, path: &std::path::Path) {
        let _ = self.tx.send(RecorderEvent::Saved(path.to_path_buf()));
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let no_audio = args.iter().any(|a| a == "--no-audio");

    let _log_guard = logging::init_logging()?;
    info!("screenreel starting...");

    // The ffmpeg pipeline supervises its child process on a tokio runtime.
    let runtime = tokio::runtime::Runtime::new()?;
    let _runtime_guard = runtime.enter();

    let mut config = RecorderConfig::load()?;
    info!("Configuration loaded from {:?}", config.config_path()?);

    if no_audio {
        config.audio.enabled = false;
    }

    let factory = FfmpegPipelineFactory::new();
    if !factory.is_available() {
        error!("ffmpeg binary not found or not runnable");
        eprintln!("screenreel requires ffmpeg on PATH");
        std::process::exit(1);
    }

    let (event_tx, event_rx) = mpsc::channel();
    let stop_signal = Arc::new(SharedStopSignal::new());

    let mut controller = SessionController::new(
        config,
        display::create_display_backend(),
        Arc::new(factory),
        Arc::new(ChannelNotifier {
            tx: event_tx.clone(),
        }),
        Arc::new(ChannelMediaIndex { tx: event_tx }),
        Arc::clone(&stop_signal) as Arc<dyn StopSignalRegistry>,
    );

    // Stand-in for a platform consent flow: this host grants itself
    // capture authorization.
    controller.authorize(CaptureGrant::accepted(u64::from(std::process::id())))?;

    // Ctrl+C acts as the platform's stop affordance. Outside a recording
    // there is no registered trigger; fall back to a direct stop request.
    let stop_handle = controller.stop_handle();
    let ctrl_c_signal = Arc::clone(&stop_signal);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping recording...");
        if !ctrl_c_signal.fire() {
            stop_handle.request_stop();
        }
    })?;

    controller.start_capture()?;
    println!("Recording... press Ctrl+C to stop.");

    let mut last_reported_secs = 0;
    for event in event_rx {
        match event {
            RecorderEvent::Started => info!("Encoder running"),
            RecorderEvent::Progress(millis) => {
                let secs = millis / 1000;
                if secs >= last_reported_secs + 10 {
                    last_reported_secs = secs;
                    info!("Recording for {}s", secs);
                }
            }
            RecorderEvent::Saved(path) => {
                println!("Saved recording to {}", path.display());
            }
            RecorderEvent::Cleared => break,
        }
    }

    controller.destroy();
    info!("Shutdown complete");
    Ok(())
}

fn print_help() {
    println!("screenreel - screen recording session controller");
    println!();
    println!("USAGE:");
    println!("    screenreel [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help     Print this help message");
    println!("    --no-audio     Record video only for this run");
    println!();
    println!("ENVIRONMENT:");
    println!("    SCREENREEL_LOG         Set log level (e.g., debug, info, warn)");
    println!("    SCREENREEL_LOG_PATH    Override the log directory");
    println!();
    println!("Recordings are written to the platform videos directory by");
    println!("default; edit config.toml under the platform config directory");
    println!("to change output, encoding, and audio settings.");
}
