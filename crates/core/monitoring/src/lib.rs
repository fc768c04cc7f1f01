//! Logging setup shared by every crate in the workspace.
//!
//! Services call [`logging::init`] once at startup. Tests may call it as well, repeated
//! initialization is a no-op.

pub mod logging;
