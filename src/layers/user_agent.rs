//! Identity randomization: a fresh User-Agent on every call.

use reqwest::header::{HeaderValue, USER_AGENT};
use tracing::{trace, warn};

use crate::error::PipelineError;
use crate::pipeline::Layer;
use crate::request::CallSpec;
use crate::response::Response;
use crate::user_agent::UserAgentGenerator;

/// Overwrites the outgoing `User-Agent` header, then delegates.
pub struct UserAgentLayer {
    inner: Box<dyn Layer>,
    generator: UserAgentGenerator,
}

impl UserAgentLayer {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn Layer>, generator: UserAgentGenerator) -> Self {
        Self { inner, generator }
    }
}

impl Layer for UserAgentLayer {
    fn call(&mut self, mut call: CallSpec) -> Result<Response, PipelineError> {
        let user_agent = self.generator.generate();
        match HeaderValue::from_str(&user_agent) {
            Ok(value) => {
                trace!(user_agent = %user_agent, "randomized identity");
                call.options.headers.insert(USER_AGENT, value);
            }
            // Templates are validated when the generator is built.
            Err(e) => warn!(error = %e, "generated User-Agent is not a valid header value"),
        }
        self.inner.call(call)
    }
}
