//! Local network interface enumeration.
//!
//! The source-address layer needs this capability only when no explicit
//! address list is configured. It is injected into the builder rather than
//! probed globally; with the `interfaces` feature disabled the builder starts
//! without one and construction fails with
//! [`ConfigError::CapabilityUnavailable`] when discovery would be needed.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::error::ConfigError;

/// Address family of an interface address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
}

impl AddressFamily {
    /// Family of an address.
    #[must_use]
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Self::Inet,
            IpAddr::V6(_) => Self::Inet6,
        }
    }
}

/// `{interface name: {family: [address]}}`.
pub type InterfaceAddresses = BTreeMap<String, BTreeMap<AddressFamily, Vec<IpAddr>>>;

/// Lists addresses bound to local network interfaces.
pub trait InterfaceEnumerator: Send {
    /// Returns every interface with its addresses grouped by family.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the system cannot be queried.
    fn interfaces(&self) -> Result<InterfaceAddresses, ConfigError>;
}

/// A fixed table, handy for tests and for hosts with a known layout.
impl InterfaceEnumerator for InterfaceAddresses {
    fn interfaces(&self) -> Result<InterfaceAddresses, ConfigError> {
        Ok(self.clone())
    }
}

/// Every non-loopback IPv4 address, ordered by interface name, without duplicates.
#[must_use]
pub fn non_loopback_ipv4(interfaces: &InterfaceAddresses) -> Vec<IpAddr> {
    let mut addresses: Vec<IpAddr> = Vec::new();
    for families in interfaces.values() {
        let Some(inet) = families.get(&AddressFamily::Inet) else {
            continue;
        };
        for address in inet {
            if address.is_ipv4() && !address.is_loopback() && !addresses.contains(address) {
                addresses.push(*address);
            }
        }
    }
    addresses
}

/// Groups flat `(interface, address)` pairs into [`InterfaceAddresses`].
pub fn group_by_interface<I, S>(pairs: I) -> InterfaceAddresses
where
    I: IntoIterator<Item = (S, IpAddr)>,
    S: Into<String>,
{
    let mut grouped = InterfaceAddresses::new();
    for (name, address) in pairs {
        grouped
            .entry(name.into())
            .or_default()
            .entry(AddressFamily::of(&address))
            .or_default()
            .push(address);
    }
    grouped
}

/// Enumerates interfaces through the operating system.
#[cfg(feature = "interfaces")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

#[cfg(feature = "interfaces")]
impl InterfaceEnumerator for SystemInterfaces {
    fn interfaces(&self) -> Result<InterfaceAddresses, ConfigError> {
        let networks = sysinfo::Networks::new_with_refreshed_list();
        let pairs = networks.iter().flat_map(|(name, data)| {
            data.ip_networks()
                .iter()
                .map(move |network| (name.clone(), network.addr))
        });
        let grouped = group_by_interface(pairs);
        tracing::debug!(interfaces = grouped.len(), "enumerated network interfaces");
        Ok(grouped)
    }
}
