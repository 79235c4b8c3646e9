//! Concrete adapter implementations for ports.

pub mod command_engine;
pub mod file_config_adapter;
pub mod fs_storage;
pub mod sqlite_adapter;
pub mod static_identity;
#[cfg(feature = "web")]
pub mod web;
