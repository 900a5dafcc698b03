//! Core module - shared infrastructure for tabpilot
//!
//! This module contains foundational types, configuration, and error handling
//! used throughout the crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AgentConfig, BrowserConfig, Config, FailureMode, OracleConfig, ReobservePolicy,
    SchedulerConfig,
};
pub use error::{PilotError, Result};
pub use types::*;
