//! Network collaborator behind the terminal executor.
//!
//! [`Transport`] is the seam between the pipeline and the network: one
//! `send` per attempt plus a hook to pin the local source address.
//! [`HttpTransport`] implements it over a pooled `reqwest::blocking::Client`.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};
use tracing::{debug, instrument};
use url::Url;

use crate::config::CONNECT_TIMEOUT_SECS;
use crate::error::{ConfigError, PipelineError};
use crate::request::CallSpec;
use crate::response::Response;
use crate::user_agent;

/// Performs one HTTP exchange.
pub trait Transport: Send {
    /// Sends the call and reads the full response.
    ///
    /// # Errors
    ///
    /// Returns a transient [`PipelineError`] for network and timeout failures,
    /// and [`PipelineError::InvalidUrl`] when no request can be formed.
    fn send(&self, call: &CallSpec) -> Result<Response, PipelineError>;

    /// Pins all subsequent connections to `address` as their local source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the transport cannot be rebound.
    fn bind_local_address(&mut self, address: IpAddr) -> Result<(), ConfigError>;
}

/// Blocking reqwest transport.
///
/// The client pools connections and keeps a cookie jar, so one transport
/// should live as long as its pipeline. Cookies set by a response are sent
/// on later calls to the same site.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    connect_timeout: Duration,
    local_address: Option<IpAddr>,
}

impl HttpTransport {
    /// Creates a transport with the default connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Client`] if the client cannot be built.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
    }

    /// Creates a transport with an explicit connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Client`] if the client cannot be built.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, ConfigError> {
        let client = build_client(connect_timeout, None)?;
        Ok(Self {
            client,
            connect_timeout,
            local_address: None,
        })
    }

    /// The bound local address, if any.
    #[must_use]
    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }
}

impl Transport for HttpTransport {
    #[instrument(level = "debug", skip_all, fields(method = %call.method, url = %call.url))]
    fn send(&self, call: &CallSpec) -> Result<Response, PipelineError> {
        let url = Url::parse(&call.url).map_err(|_| PipelineError::invalid_url(&call.url))?;

        let options = &call.options;
        let mut request = self
            .client
            .request(call.method.to_reqwest(), url)
            .headers(options.headers.clone());
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(json) = &options.json {
            request = request.json(json);
        } else if let Some(form) = &options.form {
            request = request.form(form);
        } else if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().map_err(|e| map_reqwest_error(&call.url, e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(|e| map_reqwest_error(&call.url, e))?;

        debug!(status, bytes = body.len(), "response received");
        Ok(Response::new(status, final_url)
            .with_headers(headers)
            .with_body(body.to_vec()))
    }

    /// Rebuilding the client also starts a fresh cookie jar. The builder binds
    /// before the first call, so no session state is lost.
    #[instrument(level = "debug", skip(self))]
    fn bind_local_address(&mut self, address: IpAddr) -> Result<(), ConfigError> {
        // The client owns the connection pools for both http and https, so
        // rebuilding it rebinds every future connection.
        self.client = build_client(self.connect_timeout, Some(address))?;
        self.local_address = Some(address);
        debug!("transport bound to local address");
        Ok(())
    }
}

fn build_client(
    connect_timeout: Duration,
    local_address: Option<IpAddr>,
) -> Result<Client, ConfigError> {
    ClientBuilder::new()
        .connect_timeout(connect_timeout)
        .user_agent(user_agent::default_user_agent())
        .gzip(true)
        .cookie_store(true)
        .local_address(local_address)
        .build()
        .map_err(ConfigError::client)
}

/// Maps a reqwest failure onto the pipeline taxonomy.
fn map_reqwest_error(url: &str, error: reqwest::Error) -> PipelineError {
    if error.is_timeout() {
        PipelineError::timeout(url)
    } else if error.is_builder() {
        PipelineError::invalid_url(url)
    } else {
        PipelineError::network(url, error)
    }
}
