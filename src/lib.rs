//! Digger Core Library
//!
//! Composable HTTP request pipelines. A pipeline is an ordered stack of layers
//! wrapped around a terminal executor; every call travels inward through each
//! layer and its response travels back out.
//!
//! # Architecture
//!
//! - [`pipeline`] - the [`Layer`] trait, [`PipelineBuilder`], and [`Pipeline`]
//! - [`layers`] - built-in layers: base URL, User-Agent, ensure, pacing, source address
//! - [`transport`] - the network seam and its reqwest implementation
//! - [`config`] - construction-time settings, loadable from JSON
//! - [`interfaces`] - local interface discovery for source-address rotation
//! - [`user_agent`] - randomized browser identities

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod layers;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;
pub mod user_agent;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{
    CONNECT_TIMEOUT_SECS, DEFAULT_ENSURE_ATTEMPTS, MultipleIpConfig, PipelineConfig,
    RequestDefaults,
};
pub use error::{ConfigError, PipelineError};
#[cfg(feature = "interfaces")]
pub use interfaces::SystemInterfaces;
pub use interfaces::{AddressFamily, InterfaceAddresses, InterfaceEnumerator};
pub use layers::EnsurePolicy;
pub use pipeline::{Executor, Layer, LayerFactory, LayerKind, Pipeline, PipelineBuilder};
pub use request::{CallOptions, CallSpec, Method};
pub use response::Response;
pub use transport::{HttpTransport, Transport};
pub use user_agent::UserAgentGenerator;
