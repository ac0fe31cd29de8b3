//! Error type definitions.
//!
//! This module defines the error enums returned across the crate and the
//! transport failure kinds recorded for individual probes.

use std::path::PathBuf;

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),
}

/// Error types for loading and validating the detection configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON or has the wrong shape.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parsed but violates a constraint.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A site was requested on the command line that the file does not define.
    #[error("Unknown site '{0}'")]
    UnknownSite(String),
}

/// Error types surfaced by a detection run.
///
/// Limit discovery itself never fails with an error: a tier that cannot
/// continue reports an aborted outcome instead. These variants cover the cases
/// where no meaningful profile can be produced at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// A tier definition is internally inconsistent.
    #[error("Invalid tier '{tier}': {reason}")]
    InvalidTier { tier: String, reason: String },

    /// The site has no endpoints to probe.
    #[error("Site '{site}' has no endpoints configured")]
    NoEndpoints { site: String },

    /// The pre-flight probe kept failing transiently.
    #[error("Site '{site}' is unreachable: {detail}")]
    Unreachable { site: String, detail: String },

    /// The base URL cannot be used to build request URLs.
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// A configured request header cannot be sent.
    #[error("Invalid request header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// An authentication secret is referenced but missing from the environment.
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Error types for persisting results.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize results: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The temporary file could not be moved into place.
    #[error("Failed to persist results to {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

/// Error types for the recommendation advisor.
#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Advisor API key not found in environment variable {0}")]
    MissingApiKey(String),

    #[error("Advisor request failed: {0}")]
    Request(#[from] ReqwestError),

    #[error("Advisor returned status {0}")]
    Status(u16),

    /// The response did not contain a usable recommendation.
    #[error("Advisor response could not be parsed: {0}")]
    InvalidResponse(String),
}

/// Kinds of transport failure a probe can end with.
///
/// Only `Builder` and `Redirect` are unrecoverable; the rest are worth
/// retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The request failed while being sent.
    Request,
    /// The response body could not be read.
    Body,
    /// Too many redirects or a redirect loop.
    Redirect,
    /// The request could not be built (bad URL, bad header value).
    Builder,
    /// Anything else, including a crashed probe task.
    Other,
}

impl FailureKind {
    /// Returns true when retrying cannot help.
    pub fn is_fatal(self) -> bool {
        matches!(self, FailureKind::Builder | FailureKind::Redirect)
    }
}

/// A transport-level probe failure: no HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}
