//! Error types for the recording session lifecycle.
//!
//! The controller surfaces a small closed taxonomy (`SessionError`); the
//! display, storage, and pipeline seams each have their own error enum that
//! converts into it.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by [`SessionController`](crate::session::SessionController)
/// operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture authorization missing, denied, or invalidated")]
    InvalidAuthorization,

    #[error("no encoder available for the requested codec/resolution")]
    NoEncoderAvailable,

    #[error("output storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("virtual display unavailable: {0}")]
    Display(#[from] DisplayError),

    #[error("encode pipeline fault: {0}")]
    PipelineFault(#[from] PipelineError),

    #[error("session has been terminated")]
    SessionTerminated,

    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

/// Errors from the output storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("cannot create output directory {dir:?}: {source}")]
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("output directory {dir:?} is not writable")]
    NotWritable { dir: PathBuf },

    #[error("no videos directory could be resolved for this platform")]
    NoVideosDir,
}

/// Errors from the virtual display backend.
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display creation failed: {reason}")]
    CreateFailed { reason: String },

    #[error("display resize failed: {reason}")]
    ResizeFailed { reason: String },
}

/// Errors from an encode pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline rejected start: {reason}")]
    StartRejected { reason: String },

    #[error("encoder process exited with {status}")]
    EncoderExited { status: String },

    #[error("encoder fault: {reason}")]
    EncoderFault { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
