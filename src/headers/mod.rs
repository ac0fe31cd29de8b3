//! Rate-limit header analysis.
//!
//! Servers announce their quotas in a zoo of header conventions. This module
//! extracts every declared `(window, limit, remaining, reset)` it can find from
//! a response's headers. Parsing never fails: a malformed value is logged at
//! debug level, counted, and skipped.

mod matchers;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::EPOCH_RESET_THRESHOLD;

pub use matchers::{basic_limits, ietf_limits, windowed_limits};

/// Response headers with lowercase names. Repeated headers are joined by `", "`.
pub type HeaderSnapshot = BTreeMap<String, String>;

static NUMERIC_WINDOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+)[-_]?(s|sec|secs|second|seconds|m|min|mins|minute|minutes|h|hr|hrs|hour|hours|d|day|days)?$",
    )
    .expect("numeric window pattern is valid")
});

/// Window a declared limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowHint {
    Seconds(u64),
    /// The header named a quota but no recognisable window.
    Unknown,
}

impl WindowHint {
    pub fn seconds(&self) -> Option<u64> {
        match self {
            WindowHint::Seconds(secs) => Some(*secs),
            WindowHint::Unknown => None,
        }
    }
}

/// A quota the server announced in its response headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredLimit {
    pub window: WindowHint,
    pub limit: u64,
    pub remaining: Option<u64>,
    pub reset_time: Option<DateTime<Utc>>,
    /// Header the limit was read from.
    pub source: String,
}

/// A header value that looked like rate-limit metadata but did not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedHeader {
    pub name: String,
    pub value: String,
}

/// Per-response parsing state handed to every matcher.
#[derive(Debug)]
pub struct ParseContext {
    pub observed_at: DateTime<Utc>,
    pub malformed: Vec<MalformedHeader>,
}

impl ParseContext {
    pub fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            malformed: Vec::new(),
        }
    }

    pub fn record_malformed(&mut self, name: &str, value: &str) {
        self.malformed.push(MalformedHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// Parses a non-negative count such as a limit or remaining value.
    ///
    /// Accepts a bare integer or a list whose first element is one
    /// (`"100, 100;w=60"`).
    pub fn count(&mut self, name: &str, value: &str) -> Option<u64> {
        let trimmed = value.trim();
        let parsed = trimmed.parse::<u64>().ok().or_else(|| {
            trimmed
                .split([',', ';'])
                .next()
                .and_then(|first| first.trim().parse::<u64>().ok())
        });
        if parsed.is_none() {
            self.record_malformed(name, value);
        }
        parsed
    }

    /// Parses a reset value into an absolute time.
    pub fn reset(&mut self, name: &str, value: &str) -> Option<DateTime<Utc>> {
        let parsed = parse_reset(value, self.observed_at);
        if parsed.is_none() {
            self.record_malformed(name, value);
        }
        parsed
    }
}

/// A matcher extracts the limits of one header family.
pub type HeaderMatcher = fn(&HeaderSnapshot, &mut ParseContext) -> Vec<DeclaredLimit>;

/// Registry of header matchers.
///
/// The default registry understands windowed `X-RateLimit-*-<window>`
/// headers, plain `X-RateLimit-Limit` (with optional `X-RateLimit-Window`) and
/// the IETF `RateLimit-*` draft. Further families can be added with
/// [`HeaderLimitParser::with_matcher`].
pub struct HeaderLimitParser {
    matchers: Vec<(&'static str, HeaderMatcher)>,
    malformed: AtomicUsize,
}

impl HeaderLimitParser {
    pub fn new() -> Self {
        Self::empty()
            .with_matcher("windowed", windowed_limits)
            .with_matcher("basic", basic_limits)
            .with_matcher("ietf", ietf_limits)
    }

    /// A parser with no matchers registered.
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
            malformed: AtomicUsize::new(0),
        }
    }

    pub fn with_matcher(mut self, name: &'static str, matcher: HeaderMatcher) -> Self {
        self.matchers.push((name, matcher));
        self
    }

    /// Extracts every declared limit from one response.
    ///
    /// Duplicate declarations of the same `(window, limit)` from different
    /// header families are reported once.
    ///
    /// # Arguments
    ///
    /// * `headers` - Response headers with lowercase names
    /// * `observed_at` - When the response arrived; relative reset values count from here
    pub fn parse(&self, headers: &HeaderSnapshot, observed_at: DateTime<Utc>) -> Vec<DeclaredLimit> {
        let mut ctx = ParseContext::new(observed_at);
        let mut found: Vec<DeclaredLimit> = Vec::new();
        for (name, matcher) in &self.matchers {
            for declared in matcher(headers, &mut ctx) {
                log::trace!(
                    "Matcher {} found limit {} for {:?}",
                    name,
                    declared.limit,
                    declared.window
                );
                if !found
                    .iter()
                    .any(|f| f.window == declared.window && f.limit == declared.limit)
                {
                    found.push(declared);
                }
            }
        }

        if !ctx.malformed.is_empty() {
            for bad in &ctx.malformed {
                log::debug!(
                    "Ignoring malformed rate limit header {}: {:?}",
                    bad.name,
                    bad.value
                );
            }
            self.malformed
                .fetch_add(ctx.malformed.len(), Ordering::Relaxed);
        }
        found
    }

    /// Number of malformed header values skipped so far.
    pub fn malformed_count(&self) -> usize {
        self.malformed.load(Ordering::Relaxed)
    }
}

impl Default for HeaderLimitParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a snapshot from a `reqwest` header map.
///
/// Values that are not valid UTF-8 are dropped.
pub fn snapshot_from(map: &reqwest::header::HeaderMap) -> HeaderSnapshot {
    let mut snapshot = HeaderSnapshot::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        snapshot
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    snapshot
}

/// Returns true for headers that carry rate-limit metadata.
pub fn is_rate_limit_header(name: &str) -> bool {
    name.contains("ratelimit") || name.contains("rate-limit") || name == "retry-after"
}

/// Keeps only the rate-limit related headers of a snapshot.
pub fn rate_limit_subset(headers: &HeaderSnapshot) -> HeaderSnapshot {
    headers
        .iter()
        .filter(|(name, _)| is_rate_limit_header(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Maps a window token such as `minute`, `daily`, `15min` or `3600` to a window.
pub fn window_from_token(token: &str) -> WindowHint {
    let token = token.trim().to_ascii_lowercase();
    let named = match token.as_str() {
        "second" | "sec" | "s" | "secondly" => Some(1),
        "minute" | "min" | "m" | "minutely" => Some(60),
        "hour" | "hr" | "h" | "hourly" => Some(3_600),
        "day" | "daily" | "d" => Some(86_400),
        "week" | "weekly" | "w" => Some(604_800),
        "month" | "monthly" => Some(2_592_000),
        _ => None,
    };
    if let Some(secs) = named {
        return WindowHint::Seconds(secs);
    }

    let Some(caps) = NUMERIC_WINDOW.captures(&token) else {
        return WindowHint::Unknown;
    };
    let Some(amount) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) else {
        return WindowHint::Unknown;
    };
    let unit = match caps.get(2).map(|m| m.as_str()) {
        None | Some("s" | "sec" | "secs" | "second" | "seconds") => 1,
        Some("m" | "min" | "mins" | "minute" | "minutes") => 60,
        Some("h" | "hr" | "hrs" | "hour" | "hours") => 3_600,
        Some(_) => 86_400,
    };
    match amount.checked_mul(unit) {
        Some(secs) if secs > 0 => WindowHint::Seconds(secs),
        _ => WindowHint::Unknown,
    }
}

/// Parses a reset header value.
///
/// Integers above [`EPOCH_RESET_THRESHOLD`] are Unix timestamps, smaller
/// numbers are seconds from `observed_at`, and anything else is tried as an
/// HTTP date.
pub fn parse_reset(value: &str, observed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(number) = trimmed.parse::<f64>() {
        if !number.is_finite() || number < 0.0 {
            return None;
        }
        if number >= EPOCH_RESET_THRESHOLD as f64 {
            return DateTime::from_timestamp(number as i64, 0);
        }
        let delta = TimeDelta::try_milliseconds((number * 1000.0) as i64)?;
        return observed_at.checked_add_signed(delta);
    }
    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Reads `Retry-After` as a delay, in either delta-seconds or HTTP-date form.
///
/// A date in the past yields a zero delay. Negative, non-finite and
/// out-of-range delays are treated as absent.
pub fn retry_after(headers: &HeaderSnapshot, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get("retry-after")?.trim();
    if let Ok(secs) = value.parse::<f64>() {
        let delay = (secs >= 0.0)
            .then(|| Duration::try_from_secs_f64(secs).ok())
            .flatten();
        if delay.is_none() {
            log::debug!("Ignoring out-of-range Retry-After: {:?}", value);
        }
        return delay;
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        (date.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Returns true when the response tells the client when it may try again.
///
/// Either a parseable `Retry-After` or any parseable reset header counts.
pub fn has_retry_metadata(headers: &HeaderSnapshot, now: DateTime<Utc>) -> bool {
    if retry_after(headers, now).is_some() {
        return true;
    }
    headers.iter().any(|(name, value)| {
        is_rate_limit_header(name) && name.contains("reset") && parse_reset(value, now).is_some()
    })
}

/// The single limit declared for `window_seconds`, if the declarations agree.
///
/// Returns `None` when nothing was declared for the window or when different
/// values were declared for it.
pub fn declared_for_window(limits: &[DeclaredLimit], window_seconds: u64) -> Option<u64> {
    let mut values = limits
        .iter()
        .filter(|declared| declared.window == WindowHint::Seconds(window_seconds))
        .map(|declared| declared.limit);
    let first = values.next()?;
    values.all(|value| value == first).then_some(first)
}
