//! Capture session lifecycle: the controller, its state machine, and the
//! stop handle for cross-thread stop delivery.

pub mod controller;
pub mod state;

pub use controller::SessionController;
pub use state::SessionState;
