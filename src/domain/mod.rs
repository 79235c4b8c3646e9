//! Core domain types, validation and orchestration.

pub mod algorithm;
pub mod backtest;
pub mod catalog;
pub mod condition;
pub mod config_validation;
pub mod dispatch;
pub mod error;
pub mod feature_config;
pub mod features;
pub mod locks;
pub mod management;
pub mod normalize;
pub mod services;
pub mod training;
pub mod versioning;
