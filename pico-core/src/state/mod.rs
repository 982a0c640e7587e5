//! Session state tracked alongside the viewer link.

pub mod session;

pub use session::{SessionEvent, SessionPhase, SessionState, Target};
