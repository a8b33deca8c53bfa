//! Call description types: the verb table, per-call options, and [`CallSpec`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cancel::CancelToken;
use crate::error::{ConfigError, PipelineError};

/// HTTP verbs the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `OPTIONS`
    Options,
}

/// Verb table. Lookups are case-insensitive; anything not listed is rejected.
const VERBS: &[(&str, Method)] = &[
    ("GET", Method::Get),
    ("HEAD", Method::Head),
    ("POST", Method::Post),
    ("PUT", Method::Put),
    ("PATCH", Method::Patch),
    ("DELETE", Method::Delete),
    ("OPTIONS", Method::Options),
];

impl Method {
    /// Canonical upper-case verb.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        VERBS
            .iter()
            .find(|(_, method)| *method == self)
            .map_or("GET", |(name, _)| *name)
    }

    /// Converts to the reqwest method type.
    #[must_use]
    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Head => reqwest::Method::HEAD,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl FromStr for Method {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let verb = s.trim();
        VERBS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(verb))
            .map(|(_, method)| *method)
            .ok_or_else(|| PipelineError::unsupported_method(verb))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options.
///
/// Layers only read or write `headers` and `cancel`; everything else is handed
/// to the transport untouched.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Request headers. Names are case-insensitive; inserting replaces.
    pub headers: HeaderMap,
    /// Query parameters appended to the URL, in order.
    pub query: Vec<(String, String)>,
    /// Raw request body.
    pub body: Option<Vec<u8>>,
    /// JSON request body. Takes precedence over `form` and `body`.
    pub json: Option<serde_json::Value>,
    /// URL-encoded form fields, in order. Takes precedence over `body`.
    pub form: Option<Vec<(String, String)>>,
    /// Total request timeout, enforced by the transport.
    pub timeout: Option<Duration>,
    /// Cancellation token checked by the executor and by layer sleeps.
    pub cancel: Option<CancelToken>,
}

impl CallOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a header.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when the name or value is not a legal header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, PipelineError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.json = Some(value);
        self
    }

    /// Sets an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.form = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Layers `self` over pipeline-wide defaults.
    ///
    /// Headers merge per name with `self` winning, default query parameters
    /// come first, and the timeout from `self` overrides the default one.
    #[must_use]
    pub fn over_defaults(self, defaults: &CallOptions) -> Self {
        let mut headers = defaults.headers.clone();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut query = defaults.query.clone();
        query.extend(self.query);

        Self {
            headers,
            query,
            body: self.body.or_else(|| defaults.body.clone()),
            json: self.json.or_else(|| defaults.json.clone()),
            form: self.form.or_else(|| defaults.form.clone()),
            timeout: self.timeout.or(defaults.timeout),
            cancel: self.cancel.or_else(|| defaults.cancel.clone()),
        }
    }
}

/// Parses a header pair.
///
/// # Errors
///
/// Returns a config error naming `headers` when either half is invalid.
pub(crate) fn parse_header(
    name: &str,
    value: &str,
) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
        ConfigError::invalid_value("headers", format!("bad name {name:?}: {e}"))
    })?;
    let header_value = HeaderValue::from_str(value.trim()).map_err(|e| {
        ConfigError::invalid_value("headers", format!("bad value for {name}: {e}"))
    })?;
    Ok((header_name, header_value))
}

/// One call travelling through the pipeline.
///
/// Layers receive it by value and may rewrite it before passing it inward.
/// The transport only ever sees `&CallSpec`.
#[derive(Debug, Clone)]
pub struct CallSpec {
    /// HTTP verb.
    pub method: Method,
    /// Target URL, relative until the base-url layer resolves it.
    pub url: String,
    /// Per-call options.
    pub options: CallOptions,
}

impl CallSpec {
    /// Creates a call.
    pub fn new(method: Method, url: impl Into<String>, options: CallOptions) -> Self {
        Self {
            method,
            url: url.into(),
            options,
        }
    }

    /// The call's cancellation token, if any.
    #[must_use]
    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.options.cancel.as_ref()
    }

    /// Fails with [`PipelineError::Cancelled`] if the call was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] when the token is set.
    pub fn check_cancelled(&self) -> Result<(), PipelineError> {
        match self.cancel_token() {
            Some(token) if token.is_cancelled() => Err(PipelineError::cancelled(&self.url)),
            _ => Ok(()),
        }
    }
}
