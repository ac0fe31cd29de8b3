//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (defaults, timeouts, limits)
//! - CLI option types and parsing
//! - The JSON detection configuration file and its validation

mod constants;
mod file;
mod types;

// Re-export all constants
pub use constants::*;
pub use file::{
    AdvisorSettings, AuthConfig, AuthType, DetectionSettings, DetectorConfig, EndpointSpec,
    NetworkSettings, RetryPolicy, RotationSettings, StorageSettings, TargetSite, TierDefinition,
    DEFAULT_MAX_TEST_DURATION_SECS,
};
pub use types::{Config, LogFormat, LogLevel};
