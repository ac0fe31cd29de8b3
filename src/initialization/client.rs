//! HTTP client initialization.
//!
//! One client is built per run and shared by every prober, so connections are
//! pooled across probes of the same site.

use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::{NetworkSettings, MAX_REDIRECT_HOPS};
use crate::error_handling::InitializationError;

/// Initializes the HTTP client used for probing.
///
/// Creates a `reqwest::Client` configured with:
/// - User-Agent header from the network settings
/// - Per-request timeout from the network settings
/// - Redirect following (up to 10 hops) or none, per `follow_redirects`
///
/// # Arguments
///
/// * `network` - Network settings from the configuration file
///
/// # Returns
///
/// A configured HTTP client ready for making requests.
///
/// # Errors
///
/// Returns `InitializationError::HttpClientError` if client creation fails.
pub fn init_client(network: &NetworkSettings) -> Result<reqwest::Client, InitializationError> {
    let redirect = if network.follow_redirects {
        reqwest::redirect::Policy::limited(MAX_REDIRECT_HOPS)
    } else {
        reqwest::redirect::Policy::none()
    };
    let client = ClientBuilder::new()
        .timeout(network.timeout())
        .connect_timeout(network.timeout().min(Duration::from_secs(10)))
        .user_agent(network.user_agent.clone())
        .redirect(redirect)
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_client_with_defaults() {
        assert!(init_client(&NetworkSettings::default()).is_ok());
    }

    #[test]
    fn test_init_client_without_redirects() {
        let network = NetworkSettings {
            follow_redirects: false,
            ..NetworkSettings::default()
        };
        assert!(init_client(&network).is_ok());
    }
}
