//! Capture session controller.
//!
//! [`SessionController`] owns one capture authorization end to end: token
//! validation, virtual display provisioning, the per-recording encode
//! pipeline, and the reconciliation of the three stop triggers (explicit
//! stop, platform revocation, pipeline fault) into a single teardown.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use crate::auth::{CaptureGrant, CaptureToken};
use crate::config::RecorderConfig;
use crate::display::{DisplayBackend, DisplayProvisioner, VirtualDisplay};
use crate::error::{PipelineError, SessionError};
use crate::notify::{MediaIndex, NotificationSink, StopSignalRegistry, StopTrigger};
use crate::pipeline::{EncodePipeline, EncodePipelineFactory, PipelineObserver, PipelineSpec};
use crate::storage;

use super::state::SessionState;

/// Drives the capture session lifecycle.
///
/// Control operations (`authorize`, `start_capture`, `destroy`) belong to
/// one owning thread and take `&mut self`. Stop triggers and pipeline
/// events may arrive from any thread at any time; they go through the
/// shared session core, which serializes them against each other and
/// against the control path under a single mutex.
pub struct SessionController {
    core: Arc<SessionCore>,
    provisioner: DisplayProvisioner,
    factory: Arc<dyn EncodePipelineFactory>,
    config: RecorderConfig,
}

impl SessionController {
    /// Assemble a controller from its collaborator seams.
    pub fn new(
        config: RecorderConfig,
        display_backend: Box<dyn DisplayBackend>,
        factory: Arc<dyn EncodePipelineFactory>,
        notifier: Arc<dyn NotificationSink>,
        media_index: Arc<dyn MediaIndex>,
        stop_signal: Arc<dyn StopSignalRegistry>,
    ) -> Self {
        let display_name = config.display.name.clone();

        Self {
            core: Arc::new(SessionCore {
                inner: Mutex::new(SessionInner {
                    state: SessionState::Uninitialized,
                    token: None,
                    pipeline: None,
                    output: None,
                    progress_origin: None,
                    stop_registered: false,
                }),
                notifier,
                media_index,
                stop_signal,
            }),
            provisioner: DisplayProvisioner::new(display_backend, display_name),
            factory,
            config,
        }
    }

    /// Install the capture authorization for this session.
    ///
    /// A denied or empty grant fails with `InvalidAuthorization` and leaves
    /// the session untouched. Authorizing again while already authorized
    /// replaces the held token.
    pub fn authorize(&mut self, grant: CaptureGrant) -> Result<(), SessionError> {
        let mut inner = self.core.lock_inner();

        match inner.state {
            SessionState::Uninitialized | SessionState::Authorized => {}
            SessionState::Terminated => return Err(SessionError::SessionTerminated),
            state => {
                return Err(SessionError::InvalidState {
                    operation: "authorize",
                    state,
                })
            }
        }

        let token = CaptureToken::from_grant(grant).ok_or(SessionError::InvalidAuthorization)?;
        debug!(
            "Capture authorization accepted (code {}, payload {})",
            token.code(),
            token.payload()
        );

        if inner.token.replace(token).is_some() {
            debug!("Replaced previously held capture authorization");
        }
        inner.transition_to(SessionState::Authorized);

        Ok(())
    }

    /// Start a recording.
    ///
    /// Resolves the encode configuration, prepares the output location,
    /// provisions (or resizes) the virtual display, and starts an encode
    /// pipeline. Any failure before the pipeline is running aborts the
    /// start, keeps the token and display for a later attempt, and emits a
    /// cancellation through the notification sink.
    pub fn start_capture(&mut self) -> Result<(), SessionError> {
        {
            let inner = self.core.lock_inner();
            match inner.state {
                SessionState::Authorized => {}
                SessionState::Terminated => return Err(SessionError::SessionTerminated),
                state => {
                    return Err(SessionError::InvalidState {
                        operation: "start_capture",
                        state,
                    })
                }
            }
            match inner.token.as_ref() {
                Some(token) if token.is_valid() => {}
                _ => return Err(SessionError::InvalidAuthorization),
            }
        }

        self.try_start().map_err(|e| {
            warn!("Start aborted: {}", e);
            self.core.notifier.on_recording_cleared();
            e
        })
    }

    fn try_start(&mut self) -> Result<(), SessionError> {
        // Encode configuration, with a video-only retry when the factory
        // cannot take the configured audio.
        let video = self
            .config
            .resolve_video()
            .ok_or(SessionError::NoEncoderAvailable)?;
        let mut audio = self.config.resolve_audio();
        if !self.factory.can_encode(&video, audio.as_ref()) {
            if audio.is_some() && self.factory.can_encode(&video, None) {
                debug!("Configured audio encoding unsupported; recording video only");
                audio = None;
            } else {
                return Err(SessionError::NoEncoderAvailable);
            }
        }

        // Output location, named from the wall clock and the resolution.
        let output_dir = storage::resolve_output_dir(&self.config.storage)?;
        let output = storage::new_output_path(&output_dir, video.width, video.height, video.container);

        // Virtual display at the capture resolution.
        let display = self.provisioner.provision(video.width, video.height)?;

        // Write probe, after provisioning: a denial here leaves the token
        // and the display in place for the next attempt.
        storage::ensure_writable(&output_dir)?;

        // Build the pipeline, publish it in the session slot, and only then
        // start it. Events racing in from the pipeline's threads always
        // observe a fully registered recording.
        let observer: Arc<dyn PipelineObserver> = Arc::new(SessionObserver {
            core: Arc::clone(&self.core),
        });
        let pipeline = self.factory.create(PipelineSpec {
            video: &video,
            audio: audio.as_ref(),
            display: &display,
            output_path: &output,
            observer,
        })?;

        let handle = self.stop_handle();
        self.core
            .stop_signal
            .register(StopTrigger::new(move || handle.request_stop()));

        {
            let mut inner = self.core.lock_inner();
            inner.pipeline = Some(Arc::clone(&pipeline));
            inner.output = Some(output.clone());
            inner.progress_origin = None;
            inner.stop_registered = true;
            inner.transition_to(SessionState::Recording);
        }

        info!(
            "Recording {}x{} at {} fps to {:?}",
            video.width, video.height, video.frame_rate, output
        );

        if let Err(e) = pipeline.start() {
            warn!("Encode pipeline rejected start: {}", e);
            self.core.unwind_rejected_start();
            return Err(e.into());
        }

        Ok(())
    }

    /// Request a stop of the active recording. No-op outside `Recording`;
    /// safe to call from any thread and to race with the other stop
    /// triggers.
    pub fn request_stop(&self) {
        self.core.request_stop();
    }

    /// The platform revoked the capture authorization out-of-band.
    ///
    /// Invalidates the token and stops any active recording. This is not an
    /// error: the recorded file's fate is decided by the pipeline's
    /// terminal event like any other stop.
    pub fn authorization_revoked(&self) {
        self.core.authorization_revoked();
    }

    /// Tear the session down for good.
    ///
    /// Stops any active pipeline, then releases the stop-trigger listener,
    /// the virtual display, and the token. Idempotent; every operation
    /// afterwards fails with `SessionTerminated`. A pipeline terminal event
    /// arriving after destruction still settles the output file.
    pub fn destroy(&mut self) {
        let (pipeline, unregister) = {
            let mut inner = self.core.lock_inner();
            if inner.state.is_terminated() {
                debug!("Session already terminated");
                return;
            }
            if inner.state.is_capturing() {
                info!("Terminating session with a recording in flight");
            }
            let pipeline = inner.pipeline.take();
            let unregister = std::mem::take(&mut inner.stop_registered);
            inner.transition_to(SessionState::Terminated);
            (pipeline, unregister)
        };

        if let Some(pipeline) = pipeline {
            pipeline.stop();
        }

        // A registry failure here must not keep the display or token from
        // being released.
        if unregister {
            if let Err(e) = self.core.stop_signal.unregister() {
                warn!("Failed to unregister stop trigger: {}", e);
            }
        }

        self.provisioner.release();

        if let Some(token) = self.core.lock_inner().token.as_mut() {
            token.invalidate();
        }

        info!("Capture session destroyed");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.lock_inner().state
    }

    /// The virtual display currently held, if one has been provisioned.
    pub fn current_display(&self) -> Option<&VirtualDisplay> {
        self.provisioner.current()
    }

    /// The active configuration.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Mutable access to the configuration. Changes apply to the next
    /// `start_capture`.
    pub fn config_mut(&mut self) -> &mut RecorderConfig {
        &mut self.config
    }

    /// A cloneable handle for delivering stop triggers from signal handlers
    /// and platform channels without sharing the controller itself.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            core: Arc::downgrade(&self.core),
        }
    }
}

/// Delivers stop triggers to a session from other threads. Outlives the
/// controller safely; triggers after the session is gone are dropped.
#[derive(Clone)]
pub struct StopHandle {
    core: Weak<SessionCore>,
}

impl StopHandle {
    /// See [`SessionController::request_stop`].
    pub fn request_stop(&self) {
        if let Some(core) = self.core.upgrade() {
            core.request_stop();
        }
    }

    /// See [`SessionController::authorization_revoked`].
    pub fn authorization_revoked(&self) {
        if let Some(core) = self.core.upgrade() {
            core.authorization_revoked();
        }
    }
}

/// Session state shared between the controller, the pipeline observer, and
/// stop handles.
struct SessionCore {
    inner: Mutex<SessionInner>,
    notifier: Arc<dyn NotificationSink>,
    media_index: Arc<dyn MediaIndex>,
    stop_signal: Arc<dyn StopSignalRegistry>,
}

struct SessionInner {
    state: SessionState,
    token: Option<CaptureToken>,
    pipeline: Option<Arc<dyn EncodePipeline>>,
    output: Option<PathBuf>,
    progress_origin: Option<u64>,
    stop_registered: bool,
}

impl SessionInner {
    /// Apply `target` if the state machine allows it.
    fn transition_to(&mut self, target: SessionState) -> bool {
        if !self.state.can_transition_to(target) {
            debug!("Ignoring {} -> {} transition", self.state, target);
            return false;
        }
        debug!("Session state {} -> {}", self.state, target);
        self.state = target;
        true
    }
}

impl SessionCore {
    fn lock_inner(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn request_stop(&self) {
        let pipeline = {
            let mut inner = self.lock_inner();
            // The Recording -> Stopping transition is the teardown claim:
            // only the first of the racing stop triggers gets it.
            if !inner.transition_to(SessionState::Stopping) {
                return;
            }
            inner.pipeline.take()
        };

        if let Some(pipeline) = pipeline {
            info!("Stop requested for {:?}", pipeline.output_path());
            pipeline.stop();
        }
    }

    fn authorization_revoked(&self) {
        let pipeline = {
            let mut inner = self.lock_inner();
            if inner.state.is_terminated() {
                return;
            }
            if let Some(token) = inner.token.as_mut() {
                token.invalidate();
            }
            if !inner.transition_to(SessionState::Stopping) {
                debug!("Capture authorization revoked outside a recording");
                return;
            }
            inner.pipeline.take()
        };

        warn!("Capture authorization revoked by the platform; stopping recording");
        if let Some(pipeline) = pipeline {
            pipeline.stop();
        }
    }

    fn pipeline_started(&self) {
        // A started event from a pipeline that has already been torn down
        // (or destroyed) is stale.
        if self.lock_inner().pipeline.is_none() {
            return;
        }
        self.notifier.on_recording_started();
    }

    fn pipeline_progress(&self, raw_micros: u64) {
        let elapsed_micros = {
            let mut inner = self.lock_inner();
            if inner.pipeline.is_none() {
                return;
            }
            let origin = *inner.progress_origin.get_or_insert(raw_micros);
            raw_micros.saturating_sub(origin)
        };
        self.notifier.on_recording_progress(elapsed_micros / 1000);
    }

    fn pipeline_finished(&self, error: Option<PipelineError>) {
        match &error {
            Some(e) => warn!("Encode pipeline terminated with error: {}", e),
            None => debug!("Encode pipeline terminated cleanly"),
        }
        self.complete_teardown(error.is_some());
    }

    /// Second half of a teardown, run on the pipeline's terminal event:
    /// release the stop listener, clear the recording slots, return to
    /// `Authorized`, and settle the output file.
    fn complete_teardown(&self, failed: bool) {
        let (output, unregister, completed) = {
            let mut inner = self.lock_inner();
            // A fault arriving without a prior stop request claims the
            // teardown itself.
            if inner.state.is_recording() {
                inner.transition_to(SessionState::Stopping);
            }
            let completed = inner.state == SessionState::Stopping;

            inner.pipeline.take();
            let output = inner.output.take();
            let unregister = std::mem::take(&mut inner.stop_registered);
            inner.progress_origin = None;

            if completed {
                inner.transition_to(SessionState::Authorized);
            }
            (output, unregister, completed)
        };

        if unregister {
            if let Err(e) = self.stop_signal.unregister() {
                warn!("Failed to unregister stop trigger: {}", e);
            }
        }

        match output {
            Some(path) if failed => storage::delete_output(&path),
            Some(path) => {
                info!("Recording saved to {:?}", path);
                self.media_index.add_file(&path);
            }
            None => {}
        }

        if completed {
            self.notifier.on_recording_cleared();
        }
    }

    /// Unwind a start whose pipeline rejected `start()`. No events will
    /// follow from the pipeline, so the slots are cleared here; the caller
    /// emits the cancellation notification.
    fn unwind_rejected_start(&self) {
        let (output, unregister) = {
            let mut inner = self.lock_inner();
            inner.pipeline.take();
            let output = inner.output.take();
            let unregister = std::mem::take(&mut inner.stop_registered);
            inner.progress_origin = None;
            if inner.state.is_recording() {
                inner.transition_to(SessionState::Stopping);
            }
            inner.transition_to(SessionState::Authorized);
            (output, unregister)
        };

        if unregister {
            if let Err(e) = self.stop_signal.unregister() {
                warn!("Failed to unregister stop trigger: {}", e);
            }
        }

        // The pipeline may have opened its output before rejecting.
        if let Some(path) = output {
            storage::delete_output(&path);
        }
    }
}

/// Routes pipeline events into the session core.
struct SessionObserver {
    core: Arc<SessionCore>,
}

impl PipelineObserver for SessionObserver {
    fn on_start(&self) {
        self.core.pipeline_started();
    }

    fn on_progress(&self, elapsed_micros: u64) {
        self.core.pipeline_progress(elapsed_micros);
    }

    fn on_stop(&self, error: Option<PipelineError>) {
        self.core.pipeline_finished(error);
    }
}
