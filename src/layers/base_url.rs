//! Destination resolution: joins relative paths onto a configured base URL.

use tracing::trace;

use crate::error::PipelineError;
use crate::pipeline::Layer;
use crate::request::CallSpec;
use crate::response::Response;

/// Schemes that mark a URL as already absolute.
const ABSOLUTE_SCHEMES: &[&str] = &["http://", "https://"];

/// Rewrites relative URLs against a base before delegating.
pub struct BaseUrlLayer {
    inner: Box<dyn Layer>,
    base_url: String,
}

impl BaseUrlLayer {
    /// Wraps `inner`. `base_url` is expected to be validated already.
    pub fn new(inner: Box<dyn Layer>, base_url: impl Into<String>) -> Self {
        Self {
            inner,
            base_url: base_url.into(),
        }
    }
}

impl Layer for BaseUrlLayer {
    fn call(&mut self, mut call: CallSpec) -> Result<Response, PipelineError> {
        if !is_absolute(&call.url) {
            let resolved = join_url(&self.base_url, &call.url);
            trace!(from = %call.url, to = %resolved, "resolved relative URL");
            call.url = resolved;
        }
        self.inner.call(call)
    }
}

/// Whether `url` starts with a recognized scheme (case-insensitive).
#[must_use]
pub fn is_absolute(url: &str) -> bool {
    ABSOLUTE_SCHEMES.iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Joins `base` and `path` with exactly one `/`, however many each side carries.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
