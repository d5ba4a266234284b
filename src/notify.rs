//! Outbound notification seams.
//!
//! The controller reports recording lifecycle changes through these traits
//! and never renders UI itself; hosts decide what a notification looks
//! like.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Receives user-facing recording state changes.
pub trait NotificationSink: Send + Sync {
    /// A recording began.
    fn on_recording_started(&self);

    /// The active recording has run for `elapsed_millis`, normalized so the
    /// first report is zero.
    fn on_recording_progress(&self, elapsed_millis: u64);

    /// The recording ended: finished, cancelled, or failed. Whether a file
    /// survived is reported separately through [`MediaIndex`].
    fn on_recording_cleared(&self);
}

/// Receives "new media file" signals for cleanly finished recordings.
pub trait MediaIndex: Send + Sync {
    fn add_file(&self, path: &Path);
}

/// Trigger handed to a [`StopSignalRegistry`] while a recording is active.
/// Invoking it requests a stop of the current recording.
#[derive(Clone)]
pub struct StopTrigger {
    inner: Arc<dyn Fn() + Send + Sync>,
}

impl StopTrigger {
    pub(crate) fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    pub fn trigger(&self) {
        (self.inner)()
    }
}

/// Registration seam for the platform's user-facing stop affordance
/// (notification action, tray item, signal handler).
///
/// The controller registers a trigger when a recording starts and
/// unregisters during teardown. An unregister failure is logged by the
/// controller and never blocks the rest of the teardown.
pub trait StopSignalRegistry: Send + Sync {
    fn register(&self, trigger: StopTrigger);
    fn unregister(&self) -> Result<(), String>;
}

/// Registry that holds the registered trigger so hosts can fire it from a
/// signal handler or UI callback.
#[derive(Default)]
pub struct SharedStopSignal {
    slot: Mutex<Option<StopTrigger>>,
}

impl SharedStopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the registered trigger, if any. Returns whether one was
    /// registered.
    pub fn fire(&self) -> bool {
        // Clone the trigger out first: it may re-enter this registry
        // through the controller's teardown.
        let trigger = match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        match trigger {
            Some(trigger) => {
                trigger.trigger();
                true
            }
            None => {
                debug!("Stop signal fired with no recording active");
                false
            }
        }
    }
}

impl StopSignalRegistry for SharedStopSignal {
    fn register(&self, trigger: StopTrigger) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.replace(trigger).is_some() {
                warn!("Stop trigger replaced while one was still registered");
            }
        }
    }

    fn unregister(&self) -> Result<(), String> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| "stop signal registry poisoned".to_string())?;

        match slot.take() {
            Some(_) => Ok(()),
            None => Err("no stop trigger registered".to_string()),
        }
    }
}
