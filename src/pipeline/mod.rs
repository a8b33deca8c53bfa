//! Layer composition and the pipeline entry point.
//!
//! A pipeline is a chain of [`Layer`]s. Each layer owns the next inward layer
//! and receives every call on its way in; it may rewrite the call, delegate,
//! and observe the result on the way out. The innermost layer is the
//! [`Executor`], which hands the call to a [`Transport`](crate::Transport).
//!
//! ```no_run
//! use digger::{CallOptions, LayerKind, PipelineBuilder, PipelineConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default()
//!     .with_base_url("https://example.com/api")
//!     .with_ensure_attempts(3)
//!     .with_pace(0.5);
//!
//! let mut pipeline = PipelineBuilder::new(config)
//!     .layer(LayerKind::BaseUrl)
//!     .layer(LayerKind::UserAgent)
//!     .layer(LayerKind::Ensure)
//!     .layer(LayerKind::Pacing)
//!     .build()?;
//!
//! let response = pipeline.get("/items", CallOptions::new())?;
//! println!("{} {}", response.status(), response.text());
//! # Ok(())
//! # }
//! ```

mod builder;
mod executor;

use std::net::IpAddr;

use tracing::{debug, info, instrument};

use crate::error::PipelineError;
use crate::request::{CallOptions, CallSpec, Method};
use crate::response::Response;

pub use builder::{LayerFactory, LayerKind, PipelineBuilder};
pub use executor::Executor;

/// One unit of the request chain.
///
/// `call` takes `&mut self`: layers may own mutable state, so a chain is driven
/// by one thread at a time.
pub trait Layer: Send {
    /// Handles a call, normally by delegating to the next inward layer.
    ///
    /// # Errors
    ///
    /// Returns whatever the inward layers return, unless the layer recovers.
    fn call(&mut self, call: CallSpec) -> Result<Response, PipelineError>;
}

impl<F> Layer for F
where
    F: FnMut(CallSpec) -> Result<Response, PipelineError> + Send,
{
    fn call(&mut self, call: CallSpec) -> Result<Response, PipelineError> {
        self(call)
    }
}

/// A constructed, ordered stack of layers.
///
/// Not `Sync` in spirit: `execute` takes `&mut self`. Share one pipeline across
/// threads only behind a `Mutex`; separate pipelines share nothing.
pub struct Pipeline {
    chain: Box<dyn Layer>,
    layer_names: Vec<String>,
    defaults: CallOptions,
    local_address: Option<IpAddr>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.layer_names)
            .field("local_address", &self.local_address)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub(crate) fn new(
        chain: Box<dyn Layer>,
        layer_names: Vec<String>,
        defaults: CallOptions,
        local_address: Option<IpAddr>,
    ) -> Self {
        Self {
            chain,
            layer_names,
            defaults,
            local_address,
        }
    }

    /// Layer names, outermost first. The executor is implicit and not listed.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&str> {
        self.layer_names.iter().map(String::as_str).collect()
    }

    /// Local source address the transport was bound to, if any.
    #[must_use]
    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }

    /// Sends one call through every layer.
    ///
    /// Pipeline-wide request defaults are merged under `options` first.
    ///
    /// # Errors
    ///
    /// Returns the error of the innermost failing layer that no outer layer
    /// recovered from.
    #[instrument(skip_all, fields(method = %method, url = %url))]
    pub fn execute(
        &mut self,
        method: Method,
        url: &str,
        options: CallOptions,
    ) -> Result<Response, PipelineError> {
        let options = options.over_defaults(&self.defaults);
        info!("{method} : {url}");
        debug!(?options, "call options");
        self.chain.call(CallSpec::new(method, url, options))
    }

    /// Like [`execute`](Self::execute) with the verb given as text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedMethod`] for verbs outside the verb
    /// table, otherwise the same errors as [`execute`](Self::execute).
    pub fn request(
        &mut self,
        method: &str,
        url: &str,
        options: CallOptions,
    ) -> Result<Response, PipelineError> {
        let method = method.parse::<Method>()?;
        self.execute(method, url, options)
    }

    /// Sends a `GET`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn get(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Get, url, options)
    }

    /// Sends a `HEAD`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn head(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Head, url, options)
    }

    /// Sends a `POST`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn post(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Post, url, options)
    }

    /// Sends a `PUT`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn put(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Put, url, options)
    }

    /// Sends a `PATCH`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn patch(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Patch, url, options)
    }

    /// Sends a `DELETE`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn delete(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Delete, url, options)
    }

    /// Sends an `OPTIONS`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn options(&mut self, url: &str, options: CallOptions) -> Result<Response, PipelineError> {
        self.execute(Method::Options, url, options)
    }
}
