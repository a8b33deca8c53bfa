//! Pipeline configuration.
//!
//! [`PipelineConfig`] is resolved once, validated by the builder, and never
//! mutated afterward. It can be assembled in code or loaded from JSON using the
//! same key names:
//!
//! ```json
//! {
//!   "base_url": "https://example.com/api/",
//!   "ensure_attempts": 3,
//!   "pace": 0.5,
//!   "multiple_ip_config": { "ip_addresses": ["10.0.0.2", "10.0.0.3"], "random": false }
//! }
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::request::{CallOptions, parse_header};

/// Default number of ensure attempts (a single try).
pub const DEFAULT_ENSURE_ATTEMPTS: u32 = 1;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Source-address pool settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultipleIpConfig {
    /// Explicit pool. `None` discovers every non-loopback IPv4 interface address.
    pub ip_addresses: Option<Vec<String>>,
    /// Pick uniformly at random instead of round-robin.
    pub random: bool,
}

impl MultipleIpConfig {
    /// Parses the explicit pool, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an entry that is not an IP address.
    pub fn parsed_addresses(&self) -> Result<Option<Vec<IpAddr>>, ConfigError> {
        let Some(raw) = &self.ip_addresses else {
            return Ok(None);
        };
        raw.iter()
            .map(|entry| {
                entry.trim().parse::<IpAddr>().map_err(|e| {
                    ConfigError::invalid_value(
                        "multiple_ip_config.ip_addresses",
                        format!("{entry:?}: {e}"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// Options merged under every call made through a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestDefaults {
    /// Default headers. Call headers with the same name win.
    pub headers: BTreeMap<String, String>,
    /// Default query parameters as `[key, value]` pairs, sent in order before
    /// call parameters. Keys may repeat.
    pub query: Vec<(String, String)>,
    /// Default request timeout in seconds.
    pub timeout: Option<f64>,
}

impl RequestDefaults {
    /// Converts into call options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for illegal headers or timeouts.
    pub fn to_call_options(&self) -> Result<CallOptions, ConfigError> {
        let mut options = CallOptions::new();
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            options.headers.insert(name, value);
        }
        options.query.clone_from(&self.query);
        if let Some(timeout) = self.timeout {
            options.timeout = Some(positive_seconds("request_defaults.timeout", timeout)?);
        }
        Ok(options)
    }
}

/// Construction-time configuration for one pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Base that relative URLs are joined onto.
    pub base_url: Option<String>,
    /// Attempts made by the ensure layer (at least 1).
    pub ensure_attempts: u32,
    /// Base backoff in seconds between ensure attempts (0 retries immediately).
    pub ensure_backoff: f64,
    /// Minimum seconds between the end of one call and the start of the next (0 disables).
    pub pace: f64,
    /// Source-address pool settings.
    pub multiple_ip_config: Option<MultipleIpConfig>,
    /// Custom User-Agent template for the identity layer.
    pub user_agent_template: Option<String>,
    /// Options merged under every call.
    pub request_defaults: RequestDefaults,
    /// Connect timeout in seconds for the HTTP client.
    pub connect_timeout: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            ensure_attempts: DEFAULT_ENSURE_ATTEMPTS,
            ensure_backoff: 0.0,
            pace: 0.0,
            multiple_ip_config: None,
            user_agent_template: None,
            request_defaults: RequestDefaults::default(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS).as_secs_f64(),
        }
    }
}

impl PipelineConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown keys.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse { source })
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not a valid config.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_json_str(&raw)
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the ensure attempt count.
    #[must_use]
    pub fn with_ensure_attempts(mut self, attempts: u32) -> Self {
        self.ensure_attempts = attempts;
        self
    }

    /// Sets the ensure backoff in seconds.
    #[must_use]
    pub fn with_ensure_backoff(mut self, seconds: f64) -> Self {
        self.ensure_backoff = seconds;
        self
    }

    /// Sets the pace interval in seconds.
    #[must_use]
    pub fn with_pace(mut self, seconds: f64) -> Self {
        self.pace = seconds;
        self
    }

    /// Sets the source-address pool.
    #[must_use]
    pub fn with_ip_addresses<I, S>(mut self, addresses: I, random: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.multiple_ip_config = Some(MultipleIpConfig {
            ip_addresses: Some(addresses.into_iter().map(Into::into).collect()),
            random,
        });
        self
    }

    /// Sets a custom User-Agent template.
    #[must_use]
    pub fn with_user_agent_template(mut self, template: impl Into<String>) -> Self {
        self.user_agent_template = Some(template.into());
        self
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ensure_attempts < 1 {
            return Err(ConfigError::invalid_value(
                "ensure_attempts",
                format!("must be at least 1, got {}", self.ensure_attempts),
            ));
        }
        self.ensure_backoff_interval()?;
        self.pace_interval()?;
        positive_seconds("connect_timeout", self.connect_timeout)?;

        if let Some(base_url) = &self.base_url {
            validate_base_url(base_url)?;
        }
        if let Some(ip_config) = &self.multiple_ip_config {
            ip_config.parsed_addresses()?;
        }
        self.request_defaults.to_call_options()?;
        Ok(())
    }

    /// Pace interval; zero disables pacing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for negative or non-finite values.
    pub fn pace_interval(&self) -> Result<Duration, ConfigError> {
        non_negative_seconds("pace", self.pace)
    }

    /// Base ensure backoff; zero disables it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for negative or non-finite values.
    pub fn ensure_backoff_interval(&self) -> Result<Duration, ConfigError> {
        non_negative_seconds("ensure_backoff", self.ensure_backoff)
    }

    /// HTTP connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] unless the value is finite and positive.
    pub fn connect_timeout_interval(&self) -> Result<Duration, ConfigError> {
        positive_seconds("connect_timeout", self.connect_timeout)
    }
}

fn non_negative_seconds(key: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        ConfigError::invalid_value(key, format!("expected finite seconds >= 0, got {seconds}"))
    })
}

fn positive_seconds(key: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    match non_negative_seconds(key, seconds) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ConfigError::invalid_value(
            key,
            format!("expected finite seconds > 0, got {seconds}"),
        )),
    }
}

fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(base_url)
        .map_err(|e| ConfigError::invalid_value("base_url", format!("{base_url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::invalid_value(
            "base_url",
            format!("unsupported scheme {other:?} in {base_url:?}"),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    // ==================== Defaults ====================

    #[test]
    fn test_default_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.ensure_attempts, 1);
        assert_eq!(config.pace_interval().unwrap(), Duration::ZERO);
        assert_eq!(
            config.connect_timeout_interval().unwrap(),
            Duration::from_secs(30)
        );
        assert!(config.base_url.is_none());
        assert!(config.validate().is_ok());
    }

    // ==================== JSON Loading ====================

    #[test]
    fn test_from_json_recognized_keys() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "base_url": "https://example.com/api/",
                "ensure_attempts": 3,
                "pace": 0.25,
                "multiple_ip_config": {"ip_addresses": ["10.0.0.2", "10.0.0.3"], "random": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("https://example.com/api/"));
        assert_eq!(config.ensure_attempts, 3);
        assert_eq!(config.pace_interval().unwrap(), Duration::from_millis(250));
        let ip_config = config.multiple_ip_config.as_ref().unwrap();
        assert!(ip_config.random);
        assert_eq!(ip_config.parsed_addresses().unwrap().unwrap().len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_missing_keys_use_defaults() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_from_json_rejects_unknown_key() {
        let result = PipelineConfig::from_json_str(r#"{"ensure_attempt": 3}"#);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pace": 1.5}}"#).unwrap();
        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.pace_interval().unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_from_path_missing_file_is_io_error() {
        let result = PipelineConfig::from_path(Path::new("/nonexistent/digger.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    // ==================== Validation ====================

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let err = PipelineConfig::default()
            .with_ensure_attempts(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ensure_attempts", .. }));
    }

    #[test]
    fn test_validate_rejects_negative_pace() {
        let err = PipelineConfig::default().with_pace(-1.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "pace", .. }));
    }

    #[test]
    fn test_validate_rejects_nan_backoff() {
        let err = PipelineConfig::default()
            .with_ensure_backoff(f64::NAN)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ensure_backoff", .. }));
    }

    #[test]
    fn test_validate_rejects_relative_base_url() {
        let err = PipelineConfig::default()
            .with_base_url("example.com/api")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "base_url", .. }));
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let err = PipelineConfig::default()
            .with_base_url("ftp://example.com/")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_validate_rejects_bad_ip_address() {
        let err = PipelineConfig::default()
            .with_ip_addresses(["10.0.0.1", "ten.zero"], false)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("ten.zero"));
    }

    #[test]
    fn test_validate_rejects_zero_connect_timeout() {
        let config = PipelineConfig {
            connect_timeout: 0.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    // ==================== Request Defaults ====================

    #[test]
    fn test_request_defaults_to_call_options() {
        let config = PipelineConfig::from_json_str(
            r#"{"request_defaults": {"headers": {"Accept": "text/html"}, "query": [["lang", "en"]], "timeout": 2}}"#,
        )
        .unwrap();
        let options = config.request_defaults.to_call_options().unwrap();
        assert_eq!(options.headers["accept"], "text/html");
        assert_eq!(options.query, vec![("lang".to_string(), "en".to_string())]);
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_request_defaults_query_keeps_order_and_repeats() {
        let config = PipelineConfig::from_json_str(
            r#"{"request_defaults": {"query": [["tag", "b"], ["page", "1"], ["tag", "a"]]}}"#,
        )
        .unwrap();
        let options = config.request_defaults.to_call_options().unwrap();
        assert_eq!(
            options.query,
            vec![
                ("tag".to_string(), "b".to_string()),
                ("page".to_string(), "1".to_string()),
                ("tag".to_string(), "a".to_string())
            ]
        );
    }

    #[test]
    fn test_request_defaults_query_rejects_object_form() {
        let result =
            PipelineConfig::from_json_str(r#"{"request_defaults": {"query": {"lang": "en"}}}"#);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_request_defaults_reject_bad_header() {
        let mut defaults = RequestDefaults::default();
        defaults
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(defaults.to_call_options().is_err());
    }
}
