//! Detection configuration file.
//!
//! The detector is driven by a JSON document that names the target sites, the
//! tiers (time windows) to probe, and the knobs of the ramp. String values may
//! reference environment variables as `${NAME}`; they are substituted before the
//! document is deserialized, so credentials never have to live in the file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::config::constants::*;
use crate::error_handling::{ConfigError, DetectionError};
use crate::rotation::RotationStrategy;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("environment reference pattern is valid")
});

/// Default test budget for a tier that does not set one.
pub const DEFAULT_MAX_TEST_DURATION_SECS: u64 = 3600;

/// Complete detection configuration, as loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Sites to probe, keyed by a short site name.
    pub target_sites: BTreeMap<String, TargetSite>,
    /// Tiers to test for every site. Sorted by window after loading.
    pub tiers: Vec<TierDefinition>,
    #[serde(default)]
    pub detection: DetectionSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub advisor: AdvisorSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

/// One API under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSite {
    /// Scheme and host (optionally a path prefix) every endpoint is appended to.
    pub base_url: String,
    pub endpoints: Vec<EndpointSpec>,
    /// Extra request headers sent with every probe.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// An endpoint path, optionally weighted for the weighted rotation strategy.
///
/// Accepts either a bare string (`"/users"`) or an object
/// (`{"path": "/users", "weight": 3}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointSpec {
    Path(String),
    Weighted {
        path: String,
        #[serde(default = "default_weight")]
        weight: f64,
    },
}

impl EndpointSpec {
    pub fn path(&self) -> &str {
        match self {
            EndpointSpec::Path(path) => path,
            EndpointSpec::Weighted { path, .. } => path,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            EndpointSpec::Path(_) => default_weight(),
            EndpointSpec::Weighted { weight, .. } => *weight,
        }
    }
}

/// How probe requests authenticate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    ApiKey,
    BearerToken,
    BasicAuth,
}

/// Authentication settings. Secrets are named by environment variable, never inlined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type", default)]
    pub kind: AuthType,
    /// Variable holding the API key (`api_key`).
    #[serde(default)]
    pub key_env: Option<String>,
    /// Variable holding the bearer token (`bearer_token`).
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub username_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    /// Header carrying the API key. Defaults to `X-API-Key`.
    #[serde(default)]
    pub header_name: Option<String>,
}

/// One time window to probe.
///
/// A rate in this tier means "requests per `window_seconds`". The ramp starts
/// at `start_rate`, adds `increment` after every clean batch and never exceeds
/// `max_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub name: String,
    pub window_seconds: u64,
    pub start_rate: u32,
    pub max_rate: u32,
    pub increment: u32,
    /// Length of one probe batch. Defaults to the window itself.
    #[serde(default)]
    pub batch_interval_seconds: Option<f64>,
    #[serde(default = "default_max_test_duration")]
    pub max_test_duration_seconds: u64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin_percent: f64,
}

impl TierDefinition {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Batch length; only meaningful after [`TierDefinition::validate`] succeeded.
    pub fn batch_interval(&self) -> Duration {
        match self.batch_interval_seconds {
            Some(secs) if secs > 0.0 => {
                Duration::try_from_secs_f64(secs).unwrap_or_else(|_| self.window())
            }
            _ => self.window(),
        }
    }

    pub fn max_test_duration(&self) -> Duration {
        Duration::from_secs(self.max_test_duration_seconds)
    }

    /// Converts a per-window count into requests per second.
    pub fn per_second(&self, per_window: f64) -> f64 {
        per_window / self.window_seconds.max(1) as f64
    }

    /// Checks the tier is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns `DetectionError::InvalidTier` naming the first violated constraint.
    pub fn validate(&self) -> Result<(), DetectionError> {
        let invalid = |reason: &str| DetectionError::InvalidTier {
            tier: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.window_seconds == 0 {
            return Err(invalid("window_seconds must be positive"));
        }
        if self.start_rate == 0 {
            return Err(invalid("start_rate must be at least 1"));
        }
        if self.max_rate < self.start_rate {
            return Err(invalid("max_rate must be greater than or equal to start_rate"));
        }
        if self.increment == 0 {
            return Err(invalid("increment must be at least 1"));
        }
        if let Some(secs) = self.batch_interval_seconds {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(invalid("batch_interval_seconds must be a positive number"));
            }
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(invalid("batch_interval_seconds is out of range"));
            }
        }
        if self.max_test_duration_seconds == 0 {
            return Err(invalid("max_test_duration_seconds must be positive"));
        }
        if !self.safety_margin_percent.is_finite()
            || self.safety_margin_percent <= 0.0
            || self.safety_margin_percent >= 100.0
        {
            return Err(invalid("safety_margin_percent must be between 0 and 100 (exclusive)"));
        }
        Ok(())
    }
}

/// Parameters of the ramp shared by all tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum fraction of successful probes for a batch to be clean.
    pub success_threshold: f64,
    /// Status codes treated as limit signals (503 is always included).
    pub rate_limit_status_codes: Vec<u16>,
    pub stop_on_first_limit: bool,
    pub rotation: RotationSettings,
    pub max_concurrent_requests: usize,
    pub consecutive_soft_signal_threshold: u32,
    pub header_confirmation_batches: u32,
    pub cooldown_after_limit_seconds: u64,
    pub max_cooldown_seconds: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            rate_limit_status_codes: DEFAULT_RATE_LIMIT_STATUS_CODES.to_vec(),
            stop_on_first_limit: false,
            rotation: RotationSettings::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            consecutive_soft_signal_threshold: DEFAULT_CONSECUTIVE_SOFT_SIGNAL_THRESHOLD,
            header_confirmation_batches: DEFAULT_HEADER_CONFIRMATION_BATCHES,
            cooldown_after_limit_seconds: DEFAULT_COOLDOWN_AFTER_LIMIT_SECS,
            max_cooldown_seconds: DEFAULT_MAX_COOLDOWN_SECS,
        }
    }
}

impl DetectionSettings {
    /// Pause before the next tier after a limit was provoked.
    ///
    /// Honours the server's Retry-After when given, otherwise the configured
    /// cooldown, and never exceeds `max_cooldown_seconds`.
    pub fn cooldown(&self, retry_after: Option<Duration>) -> Duration {
        let requested =
            retry_after.unwrap_or(Duration::from_secs(self.cooldown_after_limit_seconds));
        requested.min(Duration::from_secs(self.max_cooldown_seconds))
    }
}

/// How probes are spread over a site's endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    pub strategy: RotationStrategy,
    pub max_consecutive_same: usize,
    pub rotation_interval_requests: usize,
    /// Scale weighted choices towards endpoints that answer faster.
    pub adapt_weights_to_latency: bool,
    pub latency_weight_factor: f64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::Random,
            max_consecutive_same: DEFAULT_MAX_CONSECUTIVE_SAME_ENDPOINT,
            rotation_interval_requests: DEFAULT_ROTATION_INTERVAL_REQUESTS,
            adapt_weights_to_latency: false,
            latency_weight_factor: DEFAULT_LATENCY_WEIGHT_FACTOR,
        }
    }
}

/// Retry policy applied to transient probe failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Randomize each delay to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: RETRY_MAX_RETRIES,
            base_delay_ms: RETRY_BASE_DELAY_MS,
            backoff_multiplier: RETRY_BACKOFF_MULTIPLIER,
            max_delay_ms: RETRY_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero based), without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub follow_redirects: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: NETWORK_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: true,
        }
    }
}

impl NetworkSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Settings for the optional AI advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_ADVISOR_BASE_URL.to_string(),
            model: DEFAULT_ADVISOR_MODEL.to_string(),
            api_key_env: DEFAULT_ADVISOR_API_KEY_ENV.to_string(),
            timeout_seconds: ADVISOR_TIMEOUT.as_secs(),
        }
    }
}

impl AdvisorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub save_results: bool,
    pub output_dir: PathBuf,
    pub output_file: String,
    /// Insert a `_YYYYmmdd_HHMMSS` suffix before the file extension.
    pub append_timestamp: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            save_results: true,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_file: DEFAULT_OUTPUT_FILE.to_string(),
            append_timestamp: true,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_test_duration() -> u64 {
    DEFAULT_MAX_TEST_DURATION_SECS
}

fn default_safety_margin() -> f64 {
    DEFAULT_SAFETY_MARGIN_PERCENT
}

impl DetectorConfig {
    /// Loads, substitutes and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, `ConfigError::Parse`
    /// if it is not valid JSON of the expected shape, and `ConfigError::Invalid`
    /// if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::from_json_str(&raw)
    }

    /// Parses a configuration document held in memory.
    ///
    /// # Errors
    ///
    /// Same as [`DetectorConfig::load`] minus the I/O case.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut document: serde_json::Value = serde_json::from_str(raw)?;
        substitute_env_vars(&mut document);
        let mut config: DetectorConfig = serde_json::from_value(document)?;
        config.validate()?;
        config.tiers.sort_by_key(|tier| tier.window_seconds);
        Ok(config)
    }

    /// Validates every section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_sites.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one target site is required".to_string(),
            ));
        }
        for (name, site) in &self.target_sites {
            validate_site(name, site)?;
        }

        if self.tiers.is_empty() {
            return Err(ConfigError::Invalid("at least one tier is required".to_string()));
        }
        let mut names = HashSet::new();
        for tier in &self.tiers {
            tier.validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !names.insert(tier.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tier name '{}'",
                    tier.name
                )));
            }
        }

        let detection = &self.detection;
        if !(detection.success_threshold > 0.0 && detection.success_threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "detection.success_threshold must be in (0, 1]".to_string(),
            ));
        }
        if detection.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "detection.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if detection.header_confirmation_batches == 0 {
            return Err(ConfigError::Invalid(
                "detection.header_confirmation_batches must be at least 1".to_string(),
            ));
        }
        if detection.consecutive_soft_signal_threshold == 0 {
            return Err(ConfigError::Invalid(
                "detection.consecutive_soft_signal_threshold must be at least 1".to_string(),
            ));
        }
        if detection.rotation.max_consecutive_same == 0
            || detection.rotation.rotation_interval_requests == 0
        {
            return Err(ConfigError::Invalid(
                "rotation limits must be at least 1".to_string(),
            ));
        }
        let factor = detection.rotation.latency_weight_factor;
        if !factor.is_finite() || factor < 0.0 {
            return Err(ConfigError::Invalid(
                "rotation.latency_weight_factor must be a non-negative number".to_string(),
            ));
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.network.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "network.timeout_seconds must be positive".to_string(),
            ));
        }
        check_user_agent(&self.network.user_agent)?;
        Ok(())
    }

    /// Looks up the requested sites, or all of them when `names` is empty.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownSite` for a name missing from the file.
    pub fn select_sites<'a>(
        &'a self,
        names: &[String],
    ) -> Result<Vec<(&'a str, &'a TargetSite)>, ConfigError> {
        if names.is_empty() {
            return Ok(self
                .target_sites
                .iter()
                .map(|(name, site)| (name.as_str(), site))
                .collect());
        }
        names
            .iter()
            .map(|name| {
                self.target_sites
                    .get_key_value(name)
                    .map(|(key, site)| (key.as_str(), site))
                    .ok_or_else(|| ConfigError::UnknownSite(name.clone()))
            })
            .collect()
    }
}

fn validate_site(name: &str, site: &TargetSite) -> Result<(), ConfigError> {
    let url = url::Url::parse(&site.base_url).map_err(|e| {
        ConfigError::Invalid(format!("site '{}' has an invalid base_url: {}", name, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "site '{}' base_url must use http or https",
            name
        )));
    }
    if site.endpoints.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "site '{}' needs at least one endpoint",
            name
        )));
    }
    for endpoint in &site.endpoints {
        let weight = endpoint.weight();
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "site '{}' endpoint '{}' has a non-positive weight",
                name,
                endpoint.path()
            )));
        }
    }
    for (header, value) in &site.headers {
        if header.eq_ignore_ascii_case("user-agent") {
            check_user_agent(value)?;
        }
    }
    Ok(())
}

/// Rejects User-Agent strings that announce a bot; many APIs block them outright.
fn check_user_agent(value: &str) -> Result<(), ConfigError> {
    if value.to_ascii_lowercase().contains("bot") {
        return Err(ConfigError::Invalid(format!(
            "user agent '{}' identifies itself as a bot",
            value
        )));
    }
    Ok(())
}

/// Replaces `${NAME}` references in every string of the document.
///
/// Unset variables are left untouched and logged, so validation can point at
/// the literal reference.
pub(crate) fn substitute_env_vars(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(text) => {
            if ENV_REFERENCE.is_match(text) {
                let replaced = ENV_REFERENCE.replace_all(text, |caps: &Captures| {
                    match std::env::var(&caps[1]) {
                        Ok(resolved) => resolved,
                        Err(_) => {
                            log::warn!("Environment variable {} is not set", &caps[1]);
                            caps[0].to_string()
                        }
                    }
                });
                *text = replaced.into_owned();
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(substitute_env_vars),
        serde_json::Value::Object(map) => map.values_mut().for_each(substitute_env_vars),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> serde_json::Value {
        serde_json::json!({
            "target_sites": {
                "demo": {
                    "base_url": "https://api.example.com",
                    "endpoints": ["/users", {"path": "/orders", "weight": 3}]
                }
            },
            "tiers": [
                {"name": "hour", "window_seconds": 3600, "start_rate": 100, "max_rate": 2000, "increment": 100},
                {"name": "minute", "window_seconds": 60, "start_rate": 10, "max_rate": 200, "increment": 5}
            ]
        })
    }

    #[test]
    fn test_minimal_config_uses_defaults_and_sorts_tiers() {
        let config = DetectorConfig::from_json_str(&minimal_config().to_string())
            .expect("minimal config should load");

        assert_eq!(config.tiers[0].name, "minute", "tiers sorted by window");
        assert_eq!(config.tiers[1].name, "hour");
        assert_eq!(config.detection.success_threshold, DEFAULT_SUCCESS_THRESHOLD);
        assert_eq!(config.detection.rate_limit_status_codes, vec![429, 420]);
        assert_eq!(config.tiers[0].safety_margin_percent, 10.0);
        assert_eq!(config.tiers[0].batch_interval(), Duration::from_secs(60));

        let site = &config.target_sites["demo"];
        assert_eq!(site.endpoints[0].weight(), 1.0);
        assert_eq!(site.endpoints[1].path(), "/orders");
        assert_eq!(site.endpoints[1].weight(), 3.0);
        assert_eq!(site.auth.kind, AuthType::None);
    }

    #[test]
    fn test_env_substitution_in_nested_strings() {
        std::env::set_var("RLD_TEST_BASE_HOST", "api.internal.test");
        let mut doc = serde_json::json!({
            "a": "https://${RLD_TEST_BASE_HOST}/v1",
            "b": ["${RLD_TEST_BASE_HOST}", 3],
            "c": {"d": "${RLD_TEST_DEFINITELY_UNSET}"}
        });
        substitute_env_vars(&mut doc);

        assert_eq!(doc["a"], "https://api.internal.test/v1");
        assert_eq!(doc["b"][0], "api.internal.test");
        assert_eq!(doc["b"][1], 3);
        assert_eq!(doc["c"]["d"], "${RLD_TEST_DEFINITELY_UNSET}");
    }

    #[test]
    fn test_rejects_invalid_tier() {
        let mut doc = minimal_config();
        doc["tiers"][0]["max_rate"] = serde_json::json!(1);
        let err = DetectorConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(
            err.to_string().contains("max_rate"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_rotation_latency_settings() {
        let mut doc = minimal_config();
        doc["detection"] = serde_json::json!({
            "rotation": {"strategy": "weighted", "adapt_weights_to_latency": true}
        });
        let config = DetectorConfig::from_json_str(&doc.to_string()).expect("valid rotation");
        assert!(config.detection.rotation.adapt_weights_to_latency);
        assert_eq!(
            config.detection.rotation.latency_weight_factor,
            DEFAULT_LATENCY_WEIGHT_FACTOR
        );

        doc["detection"]["rotation"]["latency_weight_factor"] = serde_json::json!(-1.0);
        let err = DetectorConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("latency_weight_factor"), "{}", err);
    }

    #[test]
    fn test_rejects_duplicate_tier_names() {
        let mut doc = minimal_config();
        doc["tiers"][1]["name"] = serde_json::json!("hour");
        let err = DetectorConfig::from_json_str(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {}", err);
    }

    #[test]
    fn test_rejects_bot_user_agent() {
        let mut doc = minimal_config();
        doc["network"] = serde_json::json!({"user_agent": "MyCrawlerBot/1.0"});
        assert!(DetectorConfig::from_json_str(&doc.to_string()).is_err());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut doc = minimal_config();
        doc["target_sites"]["demo"]["base_url"] = serde_json::json!("ftp://files.example.com");
        assert!(DetectorConfig::from_json_str(&doc.to_string()).is_err());
    }

    #[test]
    fn test_rejects_empty_endpoints() {
        let mut doc = minimal_config();
        doc["target_sites"]["demo"]["endpoints"] = serde_json::json!([]);
        assert!(DetectorConfig::from_json_str(&doc.to_string()).is_err());
    }

    #[test]
    fn test_select_sites() {
        let config = DetectorConfig::from_json_str(&minimal_config().to_string()).unwrap();
        assert_eq!(config.select_sites(&[]).unwrap().len(), 1);
        assert_eq!(config.select_sites(&["demo".to_string()]).unwrap()[0].0, "demo");
        assert!(matches!(
            config.select_sites(&["missing".to_string()]),
            Err(ConfigError::UnknownSite(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_tier_validation_rules() {
        let base = TierDefinition {
            name: "minute".to_string(),
            window_seconds: 60,
            start_rate: 10,
            max_rate: 100,
            increment: 5,
            batch_interval_seconds: None,
            max_test_duration_seconds: 600,
            safety_margin_percent: 10.0,
        };
        assert!(base.validate().is_ok());

        let cases = [
            TierDefinition { window_seconds: 0, ..base.clone() },
            TierDefinition { start_rate: 0, ..base.clone() },
            TierDefinition { increment: 0, ..base.clone() },
            TierDefinition { batch_interval_seconds: Some(0.0), ..base.clone() },
            TierDefinition { batch_interval_seconds: Some(f64::NAN), ..base.clone() },
            TierDefinition { batch_interval_seconds: Some(1e20), ..base.clone() },
            TierDefinition { safety_margin_percent: 0.0, ..base.clone() },
            TierDefinition { safety_margin_percent: 100.0, ..base.clone() },
            TierDefinition { name: " ".to_string(), ..base.clone() },
        ];
        for tier in cases {
            assert!(
                matches!(tier.validate(), Err(DetectionError::InvalidTier { .. })),
                "tier should be invalid: {:?}",
                tier
            );
        }
    }

    #[test]
    fn test_oversized_batch_interval_falls_back_to_window() {
        let tier = TierDefinition {
            name: "minute".to_string(),
            window_seconds: 60,
            start_rate: 10,
            max_rate: 100,
            increment: 5,
            batch_interval_seconds: Some(1e20),
            max_test_duration_seconds: 600,
            safety_margin_percent: 10.0,
        };
        assert_eq!(tier.batch_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 500,
            jitter: false,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(30), Duration::from_millis(500));
    }

    #[test]
    fn test_cooldown_respects_retry_after_and_cap() {
        let settings = DetectionSettings::default();
        assert_eq!(settings.cooldown(None), Duration::from_secs(30));
        assert_eq!(
            settings.cooldown(Some(Duration::from_secs(12))),
            Duration::from_secs(12)
        );
        assert_eq!(
            settings.cooldown(Some(Duration::from_secs(3600))),
            Duration::from_secs(300)
        );
    }
}
