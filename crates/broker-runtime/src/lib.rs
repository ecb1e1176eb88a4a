//! # Broker Runtime Library
//!
//! Exposes the runtime's modules for testing. The binary entry point is
//! `main.rs`.
//!
//! - `config`  - defaults plus `MQ_*` environment overrides
//! - `runtime` - paging manager, transaction coordinator, large-message receiver
//! - `workers` - background reclamation

#![allow(clippy::type_complexity)]

pub mod config;
pub mod runtime;
pub mod workers;

pub use config::{load_config, BrokerConfig, ConfigError};
pub use runtime::BrokerRuntime;
