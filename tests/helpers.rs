// Shared test helpers: a simulated API and configuration builders.
//
// This module is included by several test files; not every helper is used by each.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use rate_limit_detector::classify::RawOutcome;
use rate_limit_detector::config::{EndpointSpec, TargetSite, TierDefinition};
use rate_limit_detector::headers::HeaderSnapshot;
use rate_limit_detector::probe::Prober;

/// An API that declares fixed headers on every response and optionally
/// throttles once `limit` requests were accepted in the trailing window.
///
/// Throttled requests do not use up quota.
pub struct SimulatedApi {
    quota: Option<(usize, Duration)>,
    declared: Vec<(String, String)>,
    accepted: Mutex<VecDeque<Instant>>,
    calls: AtomicU64,
}

impl SimulatedApi {
    /// Never throttles.
    pub fn unlimited() -> Self {
        Self {
            quota: None,
            declared: Vec::new(),
            accepted: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Throttles above `limit` accepted requests per `window`.
    pub fn with_quota(limit: usize, window: Duration) -> Self {
        Self {
            quota: Some((limit, window)),
            ..Self::unlimited()
        }
    }

    /// Adds a header to every response.
    pub fn declaring(mut self, name: &str, value: &str) -> Self {
        self.declared
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn admit(&self) -> bool {
        let Some((limit, window)) = self.quota else {
            return true;
        };
        let now = Instant::now();
        let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        while accepted
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            accepted.pop_front();
        }
        if accepted.len() < limit {
            accepted.push_back(now);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Prober for SimulatedApi {
    async fn probe(&self, _endpoint: &str) -> RawOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut headers: HeaderSnapshot = self.declared.iter().cloned().collect();
        let status = if self.admit() {
            200
        } else {
            if let Some((_, window)) = self.quota {
                headers.insert("retry-after".to_string(), window.as_secs().to_string());
            }
            429
        };
        RawOutcome::response(status, headers, Duration::from_millis(40))
    }
}

pub fn site(base_url: &str) -> TargetSite {
    TargetSite {
        base_url: base_url.to_string(),
        endpoints: vec![
            EndpointSpec::Path("/users".to_string()),
            EndpointSpec::Path("/orders".to_string()),
            EndpointSpec::Weighted {
                path: "/search".to_string(),
                weight: 2.0,
            },
        ],
        headers: Default::default(),
        auth: Default::default(),
    }
}

pub fn tier(
    name: &str,
    window_seconds: u64,
    start_rate: u32,
    max_rate: u32,
    increment: u32,
    batch_interval_seconds: f64,
) -> TierDefinition {
    TierDefinition {
        name: name.to_string(),
        window_seconds,
        start_rate,
        max_rate,
        increment,
        batch_interval_seconds: Some(batch_interval_seconds),
        max_test_duration_seconds: 86_400,
        safety_margin_percent: 10.0,
    }
}
