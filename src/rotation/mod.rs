//! Endpoint rotation.
//!
//! Probes are spread over a site's endpoints so a per-endpoint quota does not
//! masquerade as a site-wide one. The rotator also keeps per-endpoint request
//! and limit-signal counts plus the limits each endpoint declared, from which
//! it guesses whether a discovered limit is global or scoped to individual
//! endpoints. Under the weighted strategy it can optionally favour endpoints
//! that answer faster.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::classify::ProbeCategory;
use crate::config::{EndpointSpec, RotationSettings, LATENCY_HISTORY_SIZE, MIN_LATENCY_SAMPLES};
use crate::error_handling::DetectionError;
use crate::headers::{DeclaredLimit, WindowHint};

/// Endpoint selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// Uniform choice, never more than `max_consecutive_same` repeats.
    #[default]
    Random,
    /// Round robin, advancing every `rotation_interval_requests` picks.
    Sequential,
    /// Choice proportional to endpoint weight, with the same repeat bound.
    Weighted,
}

/// Whether throttling looked site-wide or endpoint specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    PerEndpoint,
    Undetermined,
}

/// Per-endpoint counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointUsage {
    pub requests: u64,
    pub successes: u64,
    pub limit_signals: u64,
    /// Latest limit this endpoint declared for each window.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_limits: Vec<DeclaredLimit>,
}

impl EndpointUsage {
    /// Keeps the newest declaration per window.
    fn remember(&mut self, declared: &DeclaredLimit) {
        match self
            .declared_limits
            .iter_mut()
            .find(|d| d.window == declared.window)
        {
            Some(existing) => *existing = declared.clone(),
            None => self.declared_limits.push(declared.clone()),
        }
    }
}

/// Hands out endpoints for successive probes.
pub struct EndpointRotator {
    endpoints: Vec<String>,
    weights: Vec<f64>,
    strategy: RotationStrategy,
    max_consecutive_same: usize,
    rotation_interval: usize,
    position: usize,
    last: Option<usize>,
    run_length: usize,
    usage: Vec<EndpointUsage>,
    /// Recent response times per endpoint, in seconds.
    latencies: Vec<VecDeque<f64>>,
    adapt_to_latency: bool,
    latency_weight_factor: f64,
    rng: StdRng,
}

impl EndpointRotator {
    /// Builds a rotator over the site's endpoints.
    ///
    /// # Errors
    ///
    /// Returns `DetectionError::NoEndpoints` when `endpoints` is empty.
    pub fn new(
        site: &str,
        endpoints: &[EndpointSpec],
        settings: &RotationSettings,
    ) -> Result<Self, DetectionError> {
        if endpoints.is_empty() {
            return Err(DetectionError::NoEndpoints {
                site: site.to_string(),
            });
        }
        Ok(Self {
            endpoints: endpoints.iter().map(|e| e.path().to_string()).collect(),
            weights: endpoints.iter().map(EndpointSpec::weight).collect(),
            strategy: settings.strategy,
            max_consecutive_same: settings.max_consecutive_same.max(1),
            rotation_interval: settings.rotation_interval_requests.max(1),
            position: 0,
            last: None,
            run_length: 0,
            usage: vec![EndpointUsage::default(); endpoints.len()],
            latencies: vec![VecDeque::new(); endpoints.len()],
            adapt_to_latency: settings.adapt_weights_to_latency,
            latency_weight_factor: settings.latency_weight_factor,
            rng: StdRng::from_os_rng(),
        })
    }

    /// Replaces the random source with a seeded one for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Picks the endpoint for the next probe.
    pub fn next_endpoint(&mut self) -> &str {
        let index = match self.strategy {
            RotationStrategy::Sequential => self.next_sequential(),
            RotationStrategy::Random => self.next_random(),
            RotationStrategy::Weighted => self.next_weighted(),
        };

        if self.last == Some(index) {
            self.run_length += 1;
        } else {
            self.last = Some(index);
            self.run_length = 1;
        }
        &self.endpoints[index]
    }

    fn next_sequential(&mut self) -> usize {
        let interval = self.rotation_interval.min(self.max_consecutive_same);
        if self.last.is_some() && self.run_length >= interval {
            self.position = (self.position + 1) % self.endpoints.len();
        }
        self.position
    }

    /// Index that must not be picked next, if the repeat bound was reached.
    fn blocked(&self) -> Option<usize> {
        if self.endpoints.len() > 1 && self.run_length >= self.max_consecutive_same {
            self.last
        } else {
            None
        }
    }

    fn candidates(&self) -> Vec<usize> {
        let blocked = self.blocked();
        (0..self.endpoints.len())
            .filter(|i| Some(*i) != blocked)
            .collect()
    }

    fn next_random(&mut self) -> usize {
        let candidates = self.candidates();
        candidates[self.rng.random_range(0..candidates.len())]
    }

    fn next_weighted(&mut self) -> usize {
        let candidates = self.candidates();
        let weights: Vec<f64> = candidates.iter().map(|&i| self.effective_weight(i)).collect();
        match WeightedIndex::new(weights) {
            Ok(distribution) => candidates[distribution.sample(&mut self.rng)],
            Err(e) => {
                log::debug!("Falling back to uniform endpoint choice: {}", e);
                candidates[self.rng.random_range(0..candidates.len())]
            }
        }
    }

    /// Configured weight, scaled up for fast endpoints when latency
    /// adaptation is on and enough samples were recorded.
    fn effective_weight(&self, index: usize) -> f64 {
        let base = self.weights[index];
        if !self.adapt_to_latency {
            return base;
        }
        let history = &self.latencies[index];
        if history.len() < MIN_LATENCY_SAMPLES {
            return base;
        }
        let average = history.iter().sum::<f64>() / history.len() as f64;
        if average <= 0.0 {
            return base;
        }
        base * (1.0 + self.latency_weight_factor / average)
    }

    /// Current selection weight per endpoint, keyed by path.
    pub fn current_weights(&self) -> BTreeMap<String, f64> {
        (0..self.endpoints.len())
            .map(|i| (self.endpoints[i].clone(), self.effective_weight(i)))
            .collect()
    }

    fn index_of(&self, endpoint: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e == endpoint)
    }

    /// Records the classified result of a probe sent to `endpoint`.
    pub fn record(&mut self, endpoint: &str, category: ProbeCategory) {
        let Some(index) = self.index_of(endpoint) else {
            return;
        };
        let usage = &mut self.usage[index];
        usage.requests += 1;
        if category == ProbeCategory::Success {
            usage.successes += 1;
        }
        if category.is_limit_signal() {
            usage.limit_signals += 1;
        }
    }

    /// Records how long `endpoint` took to answer.
    pub fn record_latency(&mut self, endpoint: &str, latency: Duration) {
        let Some(index) = self.index_of(endpoint) else {
            return;
        };
        let history = &mut self.latencies[index];
        if history.len() == LATENCY_HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(latency.as_secs_f64());
    }

    /// Records limits `endpoint` declared in its response headers.
    pub fn record_declared(&mut self, endpoint: &str, declared: &[DeclaredLimit]) {
        let Some(index) = self.index_of(endpoint) else {
            return;
        };
        for limit in declared {
            if self.usage[index]
                .declared_limits
                .iter()
                .all(|d| d.window != limit.window || d.limit != limit.limit)
            {
                log::debug!(
                    "Endpoint {} declares {} per {:?} via {}",
                    endpoint,
                    limit.limit,
                    limit.window,
                    limit.source
                );
            }
            self.usage[index].remember(limit);
        }
    }

    /// Latest declared limits per endpoint; endpoints that declared nothing are left out.
    pub fn detected_limits(&self) -> BTreeMap<String, Vec<DeclaredLimit>> {
        self.endpoints
            .iter()
            .zip(&self.usage)
            .filter(|(_, usage)| !usage.declared_limits.is_empty())
            .map(|(path, usage)| (path.clone(), usage.declared_limits.clone()))
            .collect()
    }

    /// Counters per endpoint, keyed by path.
    pub fn usage(&self) -> BTreeMap<String, EndpointUsage> {
        self.endpoints
            .iter()
            .cloned()
            .zip(self.usage.iter().cloned())
            .collect()
    }

    /// Clears the counters, e.g. between tiers.
    pub fn reset_usage(&mut self) {
        self.usage.iter_mut().for_each(|u| *u = EndpointUsage::default());
    }

    /// Guesses the scope of the observed throttling.
    ///
    /// Per-endpoint when endpoints declared different limits for the same
    /// window. Otherwise global when every endpoint that was probed got
    /// throttled, per-endpoint when some were throttled while others with a
    /// comparable share of traffic never were. Anything else is undetermined.
    pub fn limit_scope(&self) -> LimitScope {
        limit_scope(&self.usage)
    }
}

/// Scope heuristic over per-endpoint counters.
pub fn limit_scope(usage: &[EndpointUsage]) -> LimitScope {
    let probed: Vec<&EndpointUsage> = usage.iter().filter(|u| u.requests > 0).collect();
    if probed.len() < 2 {
        return LimitScope::Undetermined;
    }
    if declarations_differ(&probed) {
        return LimitScope::PerEndpoint;
    }
    let throttled = probed.iter().filter(|u| u.limit_signals > 0).count();
    if throttled == 0 {
        return LimitScope::Undetermined;
    }
    if throttled == probed.len() {
        return LimitScope::Global;
    }

    // An unthrottled endpoint only counts as evidence if it saw at least as
    // many requests as the least-probed throttled one.
    let min_throttled_requests = probed
        .iter()
        .filter(|u| u.limit_signals > 0)
        .map(|u| u.requests)
        .min()
        .unwrap_or(0);
    let clean_with_traffic = probed
        .iter()
        .any(|u| u.limit_signals == 0 && u.requests >= min_throttled_requests);
    if clean_with_traffic {
        LimitScope::PerEndpoint
    } else {
        LimitScope::Undetermined
    }
}

/// True when two endpoints declared different limits for one window.
fn declarations_differ(probed: &[&EndpointUsage]) -> bool {
    let mut first_seen: HashMap<WindowHint, u64> = HashMap::new();
    probed
        .iter()
        .flat_map(|u| u.declared_limits.iter())
        .any(|d| *first_seen.entry(d.window).or_insert(d.limit) != d.limit)
}
