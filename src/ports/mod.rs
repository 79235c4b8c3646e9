//! Port traits for the collaborators the orchestration core depends on.

pub mod artifact_port;
pub mod config_port;
pub mod engine_port;
pub mod identity_port;
pub mod report_port;
pub mod store_port;
