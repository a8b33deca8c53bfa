//! Terminal layer: the only place a call touches the network.

use tracing::{debug, instrument};

use super::Layer;
use crate::error::PipelineError;
use crate::request::CallSpec;
use crate::response::Response;
use crate::transport::Transport;

/// Innermost layer. Sends each call through its transport.
///
/// Cancellation is checked before the request goes out and again once the
/// response has been read, so a cancel issued during I/O still wins.
pub struct Executor {
    transport: Box<dyn Transport>,
}

impl Executor {
    /// Wraps a transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Layer for Executor {
    #[instrument(level = "debug", name = "executor", skip_all, fields(url = %call.url))]
    fn call(&mut self, call: CallSpec) -> Result<Response, PipelineError> {
        call.check_cancelled()?;
        let response = self.transport.send(&call)?;
        call.check_cancelled()?;
        debug!(status = response.status(), ok = response.ok(), "executed");
        Ok(response)
    }
}
