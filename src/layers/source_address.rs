//! Source-address rotation.
//!
//! The local address is chosen once, when a pipeline is built, and the
//! transport is bound to it before any layer wraps the executor. Rotation
//! state lives in the [`PipelineBuilder`](crate::PipelineBuilder), so each
//! successive build takes the next address of the pool.

use std::net::IpAddr;

use rand::seq::SliceRandom;
use tracing::{debug, trace, warn};

use crate::config::MultipleIpConfig;
use crate::error::{ConfigError, PipelineError};
use crate::interfaces::{InterfaceEnumerator, non_loopback_ipv4};
use crate::pipeline::Layer;
use crate::request::CallSpec;
use crate::response::Response;

/// Builds the address pool for one pipeline construction.
///
/// An explicit `ip_addresses` list wins. Otherwise every non-loopback IPv4
/// address reported by `enumerator` is used.
///
/// # Errors
///
/// - [`ConfigError::InvalidValue`] for an unparseable explicit entry.
/// - [`ConfigError::CapabilityUnavailable`] when discovery is needed and no
///   enumerator is available.
/// - Whatever the enumerator itself reports.
pub fn resolve_pool(
    config: &MultipleIpConfig,
    enumerator: Option<&dyn InterfaceEnumerator>,
) -> Result<Vec<IpAddr>, ConfigError> {
    if let Some(explicit) = config.parsed_addresses()? {
        debug!(count = explicit.len(), "using configured source addresses");
        return Ok(explicit);
    }

    let enumerator =
        enumerator.ok_or_else(|| ConfigError::capability_unavailable("interface enumeration"))?;
    let discovered = non_loopback_ipv4(&enumerator.interfaces()?);
    debug!(count = discovered.len(), "discovered source addresses");
    Ok(discovered)
}

/// Round-robin cursor over successive address pools.
#[derive(Debug, Default, Clone)]
pub struct AddressRotation {
    next: usize,
}

impl AddressRotation {
    /// Picks an address from `pool`.
    ///
    /// Random mode draws uniformly and leaves the cursor alone. Sequential mode
    /// takes `pool[next % len]` and advances. An empty pool yields `None`.
    pub fn select(&mut self, pool: &[IpAddr], randomize: bool) -> Option<IpAddr> {
        if pool.is_empty() {
            warn!("source address pool is empty, leaving connections unbound");
            return None;
        }
        if randomize {
            return pool.choose(&mut rand::thread_rng()).copied();
        }
        let address = pool[self.next % pool.len()];
        self.next = self.next.wrapping_add(1);
        Some(address)
    }

    /// Index the next sequential selection starts from.
    #[must_use]
    pub fn position(&self) -> usize {
        self.next
    }
}

/// Call-time half of source-address rotation: the binding already happened on
/// the transport, so calls pass straight through.
pub struct SourceAddressLayer {
    inner: Box<dyn Layer>,
    local_address: Option<IpAddr>,
}

impl SourceAddressLayer {
    /// Wraps `inner`, remembering the address the transport was bound to.
    pub fn new(inner: Box<dyn Layer>, local_address: Option<IpAddr>) -> Self {
        Self {
            inner,
            local_address,
        }
    }
}

impl Layer for SourceAddressLayer {
    fn call(&mut self, call: CallSpec) -> Result<Response, PipelineError> {
        if let Some(address) = self.local_address {
            trace!(%address, url = %call.url, "outbound from bound address");
        }
        self.inner.call(call)
    }
}
