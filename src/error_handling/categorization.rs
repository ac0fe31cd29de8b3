//! Error categorization.
//!
//! Maps `reqwest` errors onto the transport failure kinds used by the
//! classifier and the statistics tracker.

use super::types::{FailureKind, TransportFailure};

/// Categorizes a `reqwest::Error` into a `TransportFailure`.
///
/// Status errors never reach this function because probes read the status
/// directly instead of calling `error_for_status`.
///
/// # Arguments
///
/// * `error` - The `reqwest::Error` to categorize
///
/// # Returns
///
/// The failure kind together with the error's message.
pub fn categorize_reqwest_error(error: &reqwest::Error) -> TransportFailure {
    let kind = if error.is_builder() {
        FailureKind::Builder
    } else if error.is_redirect() {
        FailureKind::Redirect
    } else if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::Connect
    } else if error.is_request() {
        FailureKind::Request
    } else if error.is_body() || error.is_decode() {
        FailureKind::Body
    } else {
        FailureKind::Other
    };
    TransportFailure::new(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_error_is_categorized_as_connect() {
        // Port 9 on localhost is almost never listening.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .expect("client should build");
        let err = client
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .expect_err("nothing listens on the discard port");

        let failure = categorize_reqwest_error(&err);
        assert!(
            matches!(failure.kind, FailureKind::Connect | FailureKind::Timeout),
            "unexpected kind {:?}",
            failure.kind
        );
        assert!(!failure.kind.is_fatal());
    }

    #[tokio::test]
    async fn test_builder_error_is_fatal() {
        let client = reqwest::Client::new();
        let err = client
            .get("not a url")
            .send()
            .await
            .expect_err("invalid URL must fail");

        let failure = categorize_reqwest_error(&err);
        assert_eq!(failure.kind, FailureKind::Builder);
        assert!(failure.kind.is_fatal());
    }
}
