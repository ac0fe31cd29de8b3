//! Built-in header matchers.
//!
//! Each matcher recognises one naming family of rate-limit headers and turns
//! it into [`DeclaredLimit`]s. Matchers are plain functions so new families can
//! be registered on a [`super::HeaderLimitParser`] without touching the others.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{window_from_token, DeclaredLimit, HeaderSnapshot, ParseContext, WindowHint};

static WINDOWED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^x-?rate-?limit-(limit|remaining|reset)-([a-z0-9][a-z0-9_-]*)$")
        .expect("windowed header pattern is valid")
});

#[derive(Default)]
struct WindowFields<'a> {
    limit: Option<(&'a str, &'a str)>,
    remaining: Option<(&'a str, &'a str)>,
    reset: Option<(&'a str, &'a str)>,
}

/// `X-RateLimit-Limit-Minute`, `X-Rate-Limit-Remaining-Daily` and friends.
///
/// The suffix names the window. Families without a limit header are dropped
/// since remaining or reset alone do not declare a quota.
pub fn windowed_limits(headers: &HeaderSnapshot, ctx: &mut ParseContext) -> Vec<DeclaredLimit> {
    let mut by_token: BTreeMap<&str, WindowFields> = BTreeMap::new();
    for (name, value) in headers {
        let Some(caps) = WINDOWED_NAME.captures(name) else {
            continue;
        };
        let (Some(field), Some(token)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let entry = by_token.entry(token.as_str()).or_default();
        let slot = (name.as_str(), value.as_str());
        match field.as_str() {
            "limit" => entry.limit = Some(slot),
            "remaining" => entry.remaining = Some(slot),
            _ => entry.reset = Some(slot),
        }
    }

    let mut limits = Vec::new();
    for (token, fields) in by_token {
        let Some((limit_name, limit_value)) = fields.limit else {
            continue;
        };
        let Some(limit) = ctx.count(limit_name, limit_value) else {
            continue;
        };
        limits.push(DeclaredLimit {
            window: window_from_token(token),
            limit,
            remaining: fields
                .remaining
                .and_then(|(name, value)| ctx.count(name, value)),
            reset_time: fields.reset.and_then(|(name, value)| ctx.reset(name, value)),
            source: limit_name.to_string(),
        });
    }
    limits
}

/// Plain `X-RateLimit-Limit` with an optional `X-RateLimit-Window`.
///
/// Without a window header the window is unknown.
pub fn basic_limits(headers: &HeaderSnapshot, ctx: &mut ParseContext) -> Vec<DeclaredLimit> {
    let mut limits = Vec::new();
    for prefix in ["x-ratelimit", "x-rate-limit"] {
        let field = move |suffix: &str| {
            let name = format!("{}-{}", prefix, suffix);
            headers.get(&name).map(|value| (name, value.as_str()))
        };
        let Some((limit_name, limit_value)) = field("limit") else {
            continue;
        };
        let Some(limit) = ctx.count(&limit_name, limit_value) else {
            continue;
        };

        let window = match field("window") {
            Some((name, value)) => match window_from_token(value) {
                WindowHint::Unknown => {
                    ctx.record_malformed(&name, value);
                    WindowHint::Unknown
                }
                hint => hint,
            },
            None => WindowHint::Unknown,
        };

        limits.push(DeclaredLimit {
            window,
            limit,
            remaining: field("remaining").and_then(|(name, value)| ctx.count(&name, value)),
            reset_time: field("reset").and_then(|(name, value)| ctx.reset(&name, value)),
            source: limit_name,
        });
    }
    limits
}

/// IETF draft `RateLimit-Limit` / `RateLimit-Policy` headers.
///
/// Every policy item (`100;w=60`) yields a declared limit for its window. The
/// remaining and reset values belong to the policy whose quota equals
/// `RateLimit-Limit`.
pub fn ietf_limits(headers: &HeaderSnapshot, ctx: &mut ParseContext) -> Vec<DeclaredLimit> {
    let current = headers
        .get("ratelimit-limit")
        .and_then(|value| ctx.count("ratelimit-limit", value));
    let remaining = headers
        .get("ratelimit-remaining")
        .and_then(|value| ctx.count("ratelimit-remaining", value));
    let reset_time = headers
        .get("ratelimit-reset")
        .and_then(|value| ctx.reset("ratelimit-reset", value));

    let mut policies = Vec::new();
    if let Some(policy) = headers.get("ratelimit-policy") {
        for item in policy.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match parse_policy_item(item) {
                Some(parsed) => policies.push(parsed),
                None => ctx.record_malformed("ratelimit-policy", item),
            }
        }
    }

    if policies.is_empty() {
        return current
            .map(|limit| DeclaredLimit {
                window: WindowHint::Unknown,
                limit,
                remaining,
                reset_time,
                source: "ratelimit-limit".to_string(),
            })
            .into_iter()
            .collect();
    }

    let single = policies.len() == 1;
    policies
        .into_iter()
        .map(|(quota, window)| {
            let active = single || current == Some(quota);
            DeclaredLimit {
                window: WindowHint::Seconds(window),
                limit: quota,
                remaining: if active { remaining } else { None },
                reset_time: if active { reset_time } else { None },
                source: "ratelimit-policy".to_string(),
            }
        })
        .collect()
}

/// Parses `quota;w=window[;other=params]`.
fn parse_policy_item(item: &str) -> Option<(u64, u64)> {
    let mut parts = item.split(';').map(str::trim);
    let quota = parts.next()?.parse::<u64>().ok()?;
    let window = parts
        .filter_map(|param| param.strip_prefix("w="))
        .find_map(|w| w.trim().parse::<u64>().ok())?;
    (window > 0).then_some((quota, window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot(pairs: &[(&str, &str)]) -> HeaderSnapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ctx() -> ParseContext {
        ParseContext::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_policy_item_parsing() {
        assert_eq!(parse_policy_item("100;w=60"), Some((100, 60)));
        assert_eq!(parse_policy_item("5000; w=3600; comment=\"x\""), Some((5000, 3600)));
        assert_eq!(parse_policy_item("100"), None);
        assert_eq!(parse_policy_item("abc;w=60"), None);
        assert_eq!(parse_policy_item("10;w=0"), None);
    }

    #[test]
    fn test_ietf_multiple_policies() {
        let headers = snapshot(&[
            ("ratelimit-limit", "100"),
            ("ratelimit-remaining", "42"),
            ("ratelimit-reset", "30"),
            ("ratelimit-policy", "100;w=60, 1000;w=3600"),
        ]);
        let mut ctx = ctx();
        let limits = ietf_limits(&headers, &mut ctx);

        assert_eq!(limits.len(), 2);
        assert_eq!(limits[0].window, WindowHint::Seconds(60));
        assert_eq!(limits[0].remaining, Some(42));
        assert!(limits[0].reset_time.is_some());
        assert_eq!(limits[1].window, WindowHint::Seconds(3600));
        assert_eq!(limits[1].limit, 1000);
        assert_eq!(limits[1].remaining, None);
        assert!(ctx.malformed.is_empty());
    }

    #[test]
    fn test_ietf_without_policy_has_unknown_window() {
        let headers = snapshot(&[("ratelimit-limit", "250")]);
        let limits = ietf_limits(&headers, &mut ctx());
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].window, WindowHint::Unknown);
        assert_eq!(limits[0].limit, 250);
    }

    #[test]
    fn test_windowed_requires_limit_header() {
        let headers = snapshot(&[
            ("x-ratelimit-remaining-minute", "10"),
            ("x-ratelimit-reset-minute", "20"),
        ]);
        assert!(windowed_limits(&headers, &mut ctx()).is_empty());
    }

    #[test]
    fn test_basic_with_bad_window_header_is_unknown() {
        let headers = snapshot(&[
            ("x-ratelimit-limit", "60"),
            ("x-ratelimit-window", "fortnightish"),
        ]);
        let mut ctx = ctx();
        let limits = basic_limits(&headers, &mut ctx);
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].window, WindowHint::Unknown);
        assert_eq!(ctx.malformed.len(), 1);
    }
}
