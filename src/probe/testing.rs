//! Simulated probers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::Prober;
use crate::classify::RawOutcome;
use crate::error_handling::{FailureKind, TransportFailure};
use crate::headers::HeaderSnapshot;

type Responder = dyn Fn(u64, &str) -> RawOutcome + Send + Sync;

/// Answers each call with a closure of `(call index, endpoint)`.
pub(crate) struct ScriptedProber {
    responder: Box<Responder>,
    calls: AtomicU64,
    delay: Duration,
}

impl ScriptedProber {
    pub(crate) fn new(responder: impl Fn(u64, &str) -> RawOutcome + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, endpoint: &str) -> RawOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(call, endpoint)
    }
}

/// A server that throttles once more than `limit` requests arrived in the
/// trailing `window`. Every arrival counts, throttled or not.
pub(crate) struct SlidingWindowServer {
    limit: usize,
    window: Duration,
    arrivals: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowServer {
    pub(crate) fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            arrivals: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl Prober for SlidingWindowServer {
    async fn probe(&self, _endpoint: &str) -> RawOutcome {
        let now = Instant::now();
        let in_window = {
            let mut arrivals = self.arrivals.lock().unwrap_or_else(|e| e.into_inner());
            arrivals.push_back(now);
            while arrivals
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                arrivals.pop_front();
            }
            arrivals.len()
        };
        if in_window > self.limit {
            throttled(Some(self.window.as_secs()))
        } else {
            ok()
        }
    }
}

pub(crate) fn headers(pairs: &[(&str, &str)]) -> HeaderSnapshot {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub(crate) fn ok() -> RawOutcome {
    RawOutcome::response(200, HeaderSnapshot::new(), Duration::from_millis(25))
}

pub(crate) fn ok_with(pairs: &[(&str, &str)]) -> RawOutcome {
    RawOutcome::response(200, headers(pairs), Duration::from_millis(25))
}

pub(crate) fn status(code: u16) -> RawOutcome {
    RawOutcome::response(code, HeaderSnapshot::new(), Duration::from_millis(25))
}

pub(crate) fn server_error() -> RawOutcome {
    status(500)
}

pub(crate) fn throttled(retry_after_secs: Option<u64>) -> RawOutcome {
    let retry_after = retry_after_secs.map(|secs| secs.to_string());
    let pairs: Vec<(&str, &str)> = retry_after
        .as_deref()
        .map(|value| vec![("retry-after", value)])
        .unwrap_or_default();
    RawOutcome::response(429, headers(&pairs), Duration::from_millis(5))
}

pub(crate) fn timeout() -> RawOutcome {
    RawOutcome::failed(
        TransportFailure::new(FailureKind::Timeout, "simulated timeout"),
        Duration::from_secs(30),
    )
}
