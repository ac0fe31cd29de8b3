//! Probe statistics tracking.
//!
//! This module provides thread-safe counters for probe outcomes, transport
//! failures and retries during a detection run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::FailureKind;
use crate::classify::ProbeCategory;

/// Thread-safe probe statistics tracker.
///
/// Tracks classified probe outcomes and transport failures using atomic
/// counters, allowing concurrent updates from every in-flight probe task. All
/// categories are initialized to zero on creation.
///
/// # Thread Safety
///
/// This struct is thread-safe and can be shared across multiple tasks using `Arc`.
pub struct ProbeStats {
    categories: HashMap<ProbeCategory, AtomicUsize>,
    failures: HashMap<FailureKind, AtomicUsize>,
    retries: AtomicUsize,
    malformed_headers: AtomicUsize,
}

impl ProbeStats {
    pub fn new() -> Self {
        let mut categories = HashMap::new();
        for category in ProbeCategory::iter() {
            categories.insert(category, AtomicUsize::new(0));
        }

        let mut failures = HashMap::new();
        for kind in FailureKind::iter() {
            failures.insert(kind, AtomicUsize::new(0));
        }

        ProbeStats {
            categories,
            failures,
            retries: AtomicUsize::new(0),
            malformed_headers: AtomicUsize::new(0),
        }
    }

    /// Increment the counter for a classified outcome.
    pub fn increment_category(&self, category: ProbeCategory) {
        if let Some(counter) = self.categories.get(&category) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment category counter for {:?} which is not in the map. \
                 This indicates a bug in ProbeStats initialization.",
                category
            );
        }
    }

    /// Increment the counter for a transport failure kind.
    pub fn increment_failure(&self, kind: FailureKind) {
        if let Some(counter) = self.failures.get(&kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment failure counter for {:?} which is not in the map. \
                 This indicates a bug in ProbeStats initialization.",
                kind
            );
        }
    }

    pub fn add_retries(&self, count: usize) {
        self.retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_malformed_headers(&self, count: usize) {
        self.malformed_headers.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the count for a probe category.
    ///
    /// Returns 0 if the category is not in the map (should never happen if properly initialized).
    pub fn get_category_count(&self, category: ProbeCategory) -> usize {
        self.categories
            .get(&category)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn get_failure_count(&self, kind: FailureKind) -> usize {
        self.failures
            .get(&kind)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn malformed_headers(&self) -> usize {
        self.malformed_headers.load(Ordering::SeqCst)
    }

    /// Total classified probes across all categories.
    pub fn total_probes(&self) -> usize {
        ProbeCategory::iter()
            .map(|c| self.get_category_count(c))
            .sum()
    }

    /// Total transport failures across all kinds.
    pub fn total_failures(&self) -> usize {
        FailureKind::iter().map(|k| self.get_failure_count(k)).sum()
    }
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new()
    }
}
