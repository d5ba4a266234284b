//! Encode pipeline seam.
//!
//! The encode pipeline is an external collaborator: the session controller
//! starts it, stops it, and listens to its lifecycle events. Encoding
//! internals (codec negotiation, frame pacing, muxing) stay behind this
//! boundary.

pub mod ffmpeg;

use std::path::Path;
use std::sync::Arc;

use crate::config::{AudioEncodeConfig, VideoEncodeConfig};
use crate::display::VirtualDisplay;
use crate::error::PipelineError;

pub use ffmpeg::FfmpegPipelineFactory;

/// Receives pipeline lifecycle events.
///
/// Events arrive on pipeline-owned threads, possibly while the caller of
/// `start`/`stop` is still inside those methods. A started pipeline fires
/// `on_stop` exactly once, whether the stop was requested, fault-induced,
/// or platform-forced.
pub trait PipelineObserver: Send + Sync {
    /// Capture began and the first frames are flowing.
    fn on_start(&self);

    /// Presentation timestamp of the newest encoded frame, in microseconds.
    /// Monotonically non-decreasing with an arbitrary origin.
    fn on_progress(&self, elapsed_micros: u64);

    /// Terminal event. `Some` means the recording is unusable.
    fn on_stop(&self, error: Option<PipelineError>);
}

/// Everything a factory needs to build a pipeline for one recording.
pub struct PipelineSpec<'a> {
    pub video: &'a VideoEncodeConfig,
    pub audio: Option<&'a AudioEncodeConfig>,
    pub display: &'a VirtualDisplay,
    pub output_path: &'a Path,
    pub observer: Arc<dyn PipelineObserver>,
}

/// An encode pipeline bound to one output file.
///
/// Implementations synchronize internally: `start` and `stop` take `&self`
/// and are callable from any thread. `stop` is idempotent and safe to call
/// before `start` or more than once; a `start` arriving after a `stop` is
/// rejected rather than racing the shutdown.
pub trait EncodePipeline: Send + Sync {
    /// Begin capturing and encoding. A rejection here means no events will
    /// follow; once `start` returns `Ok`, the terminal outcome arrives via
    /// [`PipelineObserver::on_stop`].
    fn start(&self) -> Result<(), PipelineError>;

    /// Request a stop. Returns immediately; completion is reported through
    /// the observer.
    fn stop(&self);

    /// The file this pipeline writes.
    fn output_path(&self) -> &Path;
}

/// Builds encode pipelines and answers codec support probes.
pub trait EncodePipelineFactory: Send + Sync {
    /// Whether this factory can encode the given configuration.
    fn can_encode(&self, video: &VideoEncodeConfig, audio: Option<&AudioEncodeConfig>) -> bool;

    /// Build a pipeline for one recording.
    fn create(&self, spec: PipelineSpec<'_>) -> Result<Arc<dyn EncodePipeline>, PipelineError>;
}
