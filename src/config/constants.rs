//! Configuration constants.
//!
//! This module defines the defaults used when a configuration file leaves a
//! setting out, plus fixed operational parameters of the detector.

use std::time::Duration;

// HTTP status codes with special meaning to the classifier
/// 429 Too Many Requests
pub const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;
/// 420 Enhance Your Calm (legacy Twitter rate-limit status)
pub const HTTP_STATUS_ENHANCE_YOUR_CALM: u16 = 420;
/// 503 Service Unavailable, treated as a limit signal regardless of configuration
pub const HTTP_STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Status codes that indicate throttling when the configuration does not list any.
pub const DEFAULT_RATE_LIMIT_STATUS_CODES: &[u16] =
    &[HTTP_STATUS_TOO_MANY_REQUESTS, HTTP_STATUS_ENHANCE_YOUR_CALM];

// Ramp defaults
/// Fraction of a batch that must succeed for the batch to count as clean.
pub const DEFAULT_SUCCESS_THRESHOLD: f64 = 0.95;
/// Safety margin (percent) subtracted from a discovered limit.
pub const DEFAULT_SAFETY_MARGIN_PERCENT: f64 = 10.0;
/// Consecutive soft limit signals after which a signal is treated as hard.
pub const DEFAULT_CONSECUTIVE_SOFT_SIGNAL_THRESHOLD: u32 = 3;
/// Consecutive batches that must report the same header-declared limit.
pub const DEFAULT_HEADER_CONFIRMATION_BATCHES: u32 = 2;
/// Upper bound on probes in flight at once for a single site.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

// Cooldown between tiers
/// Pause after an error-rate limit when the server gave no Retry-After.
pub const DEFAULT_COOLDOWN_AFTER_LIMIT_SECS: u64 = 30;
/// Longest cooldown honoured, even if the server asks for more.
pub const DEFAULT_MAX_COOLDOWN_SECS: u64 = 300;

// Endpoint rotation
/// Maximum times the same endpoint may be chosen back to back.
pub const DEFAULT_MAX_CONSECUTIVE_SAME_ENDPOINT: usize = 5;
/// Requests sent to one endpoint before sequential rotation advances.
pub const DEFAULT_ROTATION_INTERVAL_REQUESTS: usize = 2;
/// Weight bonus per inverse second of average latency when weights adapt.
pub const DEFAULT_LATENCY_WEIGHT_FACTOR: f64 = 0.1;
/// Response times kept per endpoint for weight adaptation.
pub const LATENCY_HISTORY_SIZE: usize = 50;
/// Samples an endpoint needs before its weight adapts.
pub const MIN_LATENCY_SAMPLES: usize = 3;

// Retry policy for transient failures
/// Retries after the first attempt
pub const RETRY_MAX_RETRIES: u32 = 3;
/// Delay before the first retry
pub const RETRY_BASE_DELAY_MS: u64 = 1000;
/// Factor applied to the delay on each further retry
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Ceiling on any single retry delay
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

// Network
/// Per-request timeout in seconds
pub const NETWORK_TIMEOUT_SECS: u64 = 30;
/// Maximum redirect hops followed when redirects are enabled
pub const MAX_REDIRECT_HOPS: usize = 10;

/// Default User-Agent string for probe requests.
///
/// A browser-like value; some APIs serve different limits to obvious automation.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Header used for API key authentication when the site does not name one.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

// Header analysis
/// Reset header values above this are Unix timestamps rather than deltas.
pub const EPOCH_RESET_THRESHOLD: u64 = 1_000_000_000;
/// Maximum header snapshots retained per tier.
pub const MAX_HEADER_SNAPSHOTS_PER_TIER: usize = 50;
/// A shorter window may exceed a longer one by this fraction before a warning.
pub const CONSISTENCY_TOLERANCE: f64 = 0.10;

// Advisor
/// OpenAI-compatible endpoint used for recommendations.
pub const DEFAULT_ADVISOR_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// Model requested from the advisor endpoint.
pub const DEFAULT_ADVISOR_MODEL: &str = "anthropic/claude-3.5-sonnet";
/// Environment variable holding the advisor API key.
pub const DEFAULT_ADVISOR_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
/// Timeout for a single advisor request.
pub const ADVISOR_TIMEOUT: Duration = Duration::from_secs(60);

// Storage
/// Directory results are written to when none is configured.
pub const DEFAULT_OUTPUT_DIR: &str = "results";
/// Results file name before any timestamp suffix.
pub const DEFAULT_OUTPUT_FILE: &str = "rate_limit_results.json";
