//! Probe transport.
//!
//! A [`Prober`] sends one request to one endpoint and reports what happened.
//! The detector only ever talks to this trait, so tests can substitute a
//! simulated server for [`HttpProber`].

mod retry;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::Instant;

use crate::classify::RawOutcome;
use crate::config::{AuthConfig, AuthType, TargetSite, DEFAULT_API_KEY_HEADER};
use crate::error_handling::{categorize_reqwest_error, DetectionError};
use crate::headers::snapshot_from;

pub use retry::{attempt_once, probe_with_retry, ProbeAttempt, RetrySchedule};

/// Sends a single probe request.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Requests `endpoint` once. Failures are reported in the outcome, never panicked on.
    async fn probe(&self, endpoint: &str) -> RawOutcome;
}

/// Credentials resolved from the environment.
#[derive(Clone)]
enum ResolvedAuth {
    None,
    Header(HeaderName, HeaderValue),
    Bearer(String),
    Basic { username: String, password: Option<String> },
}

/// [`Prober`] backed by a shared `reqwest` client.
pub struct HttpProber {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    auth: ResolvedAuth,
}

impl HttpProber {
    /// Prepares a prober for one site.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client (timeouts, user agent, redirects)
    /// * `site` - Site whose base URL, headers and credentials are applied
    ///
    /// # Errors
    ///
    /// Returns `DetectionError::InvalidBaseUrl` for an unusable base URL,
    /// `DetectionError::InvalidHeader` for a header that cannot be encoded, and
    /// `DetectionError::MissingCredential` when a referenced secret is not set.
    pub fn new(client: reqwest::Client, site: &TargetSite) -> Result<Self, DetectionError> {
        url::Url::parse(&site.base_url).map_err(|e| DetectionError::InvalidBaseUrl {
            url: site.base_url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &site.headers {
            let (name, value) = encode_header(name, value)?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_url: site.base_url.trim_end_matches('/').to_string(),
            headers,
            auth: resolve_auth(&site.auth)?,
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &str) -> RawOutcome {
        let url = self.url_for(endpoint);
        let mut request = self.client.get(&url).headers(self.headers.clone());
        request = match &self.auth {
            ResolvedAuth::None => request,
            ResolvedAuth::Header(name, value) => request.header(name.clone(), value.clone()),
            ResolvedAuth::Bearer(token) => request.bearer_auth(token),
            ResolvedAuth::Basic { username, password } => {
                request.basic_auth(username, password.as_ref())
            }
        };

        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let latency = started.elapsed();
                let status = response.status().as_u16();
                let headers = snapshot_from(response.headers());
                // Read the body so the connection goes back to the pool.
                if let Err(e) = response.bytes().await {
                    log::debug!("Discarding unreadable body from {}: {}", url, e);
                }
                RawOutcome::response(status, headers, latency)
            }
            Err(e) => {
                let failure = categorize_reqwest_error(&e);
                log::debug!("Probe to {} failed: {}", url, failure);
                RawOutcome::failed(failure, started.elapsed())
            }
        }
    }
}

fn encode_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), DetectionError> {
    let invalid = |reason: String| DetectionError::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((header_name, header_value))
}

fn secret(var: Option<&String>, field: &str) -> Result<String, DetectionError> {
    let var = var.ok_or_else(|| DetectionError::MissingCredential(format!("<{}>", field)))?;
    std::env::var(var).map_err(|_| DetectionError::MissingCredential(var.clone()))
}

fn resolve_auth(auth: &AuthConfig) -> Result<ResolvedAuth, DetectionError> {
    match auth.kind {
        AuthType::None => Ok(ResolvedAuth::None),
        AuthType::ApiKey => {
            let key = secret(auth.key_env.as_ref(), "key_env")?;
            let header = auth
                .header_name
                .as_deref()
                .unwrap_or(DEFAULT_API_KEY_HEADER);
            let (name, mut value) = encode_header(header, &key)?;
            value.set_sensitive(true);
            Ok(ResolvedAuth::Header(name, value))
        }
        AuthType::BearerToken => Ok(ResolvedAuth::Bearer(secret(
            auth.token_env.as_ref(),
            "token_env",
        )?)),
        AuthType::BasicAuth => Ok(ResolvedAuth::Basic {
            username: secret(auth.username_env.as_ref(), "username_env")?,
            password: auth
                .password_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ProbeCategory, ResponseClassifier};
    use crate::config::EndpointSpec;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::collections::BTreeMap;

    fn site(base_url: String, auth: AuthConfig) -> TargetSite {
        TargetSite {
            base_url,
            endpoints: vec![EndpointSpec::Path("/users".to_string())],
            headers: BTreeMap::from([("Accept".to_string(), "application/json".to_string())]),
            auth,
        }
    }

    #[tokio::test]
    async fn test_probe_reports_status_and_rate_limit_headers() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v1/users"),
                request::headers(contains(("accept", "application/json"))),
            ])
            .respond_with(
                status_code(200)
                    .append_header("X-RateLimit-Limit-Minute", "60")
                    .append_header("X-RateLimit-Remaining-Minute", "59")
                    .body("[]"),
            ),
        );

        let prober = HttpProber::new(
            reqwest::Client::new(),
            &site(format!("http://{}/v1/", server.addr()), AuthConfig::default()),
        )
        .expect("prober should build");
        let outcome = prober.probe("/users").await;

        assert_eq!(outcome.status, Some(200));
        assert_eq!(
            outcome.headers.get("x-ratelimit-limit-minute").map(String::as_str),
            Some("60")
        );
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn test_throttled_response_classifies_as_soft_signal() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/users")).respond_with(
                status_code(429).append_header("Retry-After", "12"),
            ),
        );

        let prober = HttpProber::new(
            reqwest::Client::new(),
            &site(format!("http://{}", server.addr()), AuthConfig::default()),
        )
        .unwrap();
        let outcome = prober.probe("users").await;
        let classifier = ResponseClassifier::new(vec![429], 3);

        assert_eq!(outcome.status, Some(429));
        assert_eq!(classifier.classify(&outcome, 0), ProbeCategory::SoftSignal);
    }

    #[tokio::test]
    async fn test_api_key_auth_header_is_sent() {
        std::env::set_var("RLD_TEST_PROBE_API_KEY", "s3cret");
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/users"),
                request::headers(contains(("x-api-key", "s3cret"))),
            ])
            .respond_with(status_code(200)),
        );

        let auth = AuthConfig {
            kind: AuthType::ApiKey,
            key_env: Some("RLD_TEST_PROBE_API_KEY".to_string()),
            ..AuthConfig::default()
        };
        let prober =
            HttpProber::new(reqwest::Client::new(), &site(format!("http://{}", server.addr()), auth))
                .unwrap();
        assert_eq!(prober.probe("/users").await.status, Some(200));
    }

    #[tokio::test]
    async fn test_bearer_auth_header_is_sent() {
        std::env::set_var("RLD_TEST_PROBE_TOKEN", "tok-123");
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/users"),
                request::headers(contains(("authorization", "Bearer tok-123"))),
            ])
            .respond_with(status_code(200)),
        );

        let auth = AuthConfig {
            kind: AuthType::BearerToken,
            token_env: Some("RLD_TEST_PROBE_TOKEN".to_string()),
            ..AuthConfig::default()
        };
        let prober =
            HttpProber::new(reqwest::Client::new(), &site(format!("http://{}", server.addr()), auth))
                .unwrap();
        assert_eq!(prober.probe("/users").await.status, Some(200));
    }

    #[test]
    fn test_missing_credential_is_reported() {
        let auth = AuthConfig {
            kind: AuthType::BearerToken,
            token_env: Some("RLD_TEST_TOKEN_THAT_IS_NEVER_SET".to_string()),
            ..AuthConfig::default()
        };
        let result = HttpProber::new(
            reqwest::Client::new(),
            &site("https://api.example.com".to_string(), auth),
        );
        assert!(matches!(
            result,
            Err(DetectionError::MissingCredential(var)) if var == "RLD_TEST_TOKEN_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn test_url_joining() {
        let prober = HttpProber::new(
            reqwest::Client::new(),
            &site("https://api.example.com/v2/".to_string(), AuthConfig::default()),
        )
        .unwrap();
        assert_eq!(prober.url_for("/users"), "https://api.example.com/v2/users");
        assert_eq!(prober.url_for("users"), "https://api.example.com/v2/users");
        assert_eq!(
            prober.url_for("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut target = site("https://api.example.com".to_string(), AuthConfig::default());
        target
            .headers
            .insert("Bad Header".to_string(), "value".to_string());
        assert!(matches!(
            HttpProber::new(reqwest::Client::new(), &target),
            Err(DetectionError::InvalidHeader { .. })
        ));
    }
}
