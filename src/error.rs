//! Error types for pipeline construction and request execution.
//!
//! Two enums split the failure space by when it happens:
//! - [`ConfigError`] is raised while a pipeline is being built and is always fatal.
//! - [`PipelineError`] is raised while a call travels through the layers.
//!
//! Only [`PipelineError::is_transient`] failures are ever retried, and only by
//! the ensure layer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving configuration or constructing a pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is present but unusable.
    #[error("invalid config value for `{key}`: {reason}")]
    InvalidValue {
        /// The configuration key.
        key: &'static str,
        /// What is wrong with the value.
        reason: String,
    },

    /// A layer was declared but the value it depends on was not configured.
    #[error("missing config value `{key}` required by the {layer} layer")]
    MissingValue {
        /// The configuration key.
        key: &'static str,
        /// The layer that needs it.
        layer: &'static str,
    },

    /// An optional capability a layer depends on was declared absent.
    #[error("capability unavailable: {capability}")]
    CapabilityUnavailable {
        /// Human-readable capability name.
        capability: &'static str,
    },

    /// The same built-in layer was declared twice.
    #[error("layer `{layer}` declared more than once")]
    DuplicateLayer {
        /// Layer name.
        layer: &'static str,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// A configuration document could not be parsed.
    #[error("failed to parse config: {source}")]
    Parse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration file could not be read.
    #[error("IO error reading config {path}: {source}")]
    Io {
        /// The config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    pub fn invalid_value(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }

    /// Creates a missing-value error.
    pub fn missing_value(key: &'static str, layer: &'static str) -> Self {
        Self::MissingValue { key, layer }
    }

    /// Creates a capability-unavailable error.
    pub fn capability_unavailable(capability: &'static str) -> Self {
        Self::CapabilityUnavailable { capability }
    }

    /// Creates a client construction error.
    pub fn client(source: reqwest::Error) -> Self {
        Self::Client { source }
    }

    /// Creates an IO error for a config file.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while a call travels through a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network-level failure (DNS, connection refused, reset, protocol, body read).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL being requested.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request timed out before a response was read.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL being requested.
        url: String,
    },

    /// The caller cancelled the call.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// The URL being requested.
        url: String,
    },

    /// The HTTP verb is not in the verb table.
    #[error("unsupported HTTP method: {method}")]
    UnsupportedMethod {
        /// The verb as given.
        method: String,
    },

    /// The URL could not be turned into a request.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Configuration failure surfaced at call time.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates an unsupported-method error.
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod {
            method: method.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Whether the ensure layer may retry this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Whether this failure is a caller-initiated cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// No `From<reqwest::Error>` for `PipelineError`: every variant needs the URL,
// which reqwest errors do not always carry. Use the helper constructors.
