//! The composition engine: patch application, transform evaluation,
//! readiness checks, connection-detail extraction, and deterministic
//! composed-resource naming (§4.B).

pub mod connection;
pub mod naming;
pub mod patch;
pub mod readiness;
pub mod render;
pub mod transform;

pub use connection::ConnectionError;
pub use naming::NameError;
pub use patch::PatchError;
pub use readiness::ReadinessError;
pub use render::{render, ComposeError, Observation};
pub use transform::TransformError;
