//! Application initialization and resource setup.
//!
//! This module provides functions to initialize the shared resources of a
//! detection run:
//! - The logger (plain or JSON)
//! - The HTTP client used by every prober
//! - The semaphore bounding concurrent probes
//!
//! All initialization functions return proper error types for error handling.

mod client;
mod logger;

use std::sync::Arc;

use tokio::sync::Semaphore;

// Re-export public API
pub use client::init_client;
pub use logger::init_logger_with;

/// Initializes a semaphore for controlling concurrency.
///
/// Creates a new semaphore with the specified permit count. This semaphore is used
/// to limit the number of probes in flight for one site.
///
/// # Arguments
///
/// * `count` - Maximum number of concurrent operations allowed (at least one)
///
/// # Returns
///
/// An `Arc<Semaphore>` that can be shared across multiple tasks.
pub fn init_semaphore(count: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(count.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_semaphore_has_requested_permits() {
        assert_eq!(init_semaphore(10).available_permits(), 10);
    }

    #[test]
    fn test_init_semaphore_never_zero() {
        assert_eq!(init_semaphore(0).available_permits(), 1);
    }
}
