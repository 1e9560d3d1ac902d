use std::collections::HashSet;
use std::net::IpAddr;

use crate::error::{GuardError, Result};
use crate::identity::{Identity, IdentityResolver};

/// Identities exempt from every policy. Fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    exempt: HashSet<Identity>,
}

impl Allowlist {
    /// Parse a comma-separated list of IP addresses. Entries are normalized
    /// the same way request identities are, so an IPv6 entry exempts its
    /// whole aggregation prefix.
    pub fn parse(list: &str, resolver: &IdentityResolver) -> Result<Self> {
        let addrs = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry.parse::<IpAddr>().map_err(|_| {
                    GuardError::Configuration(format!("Invalid allowlist entry '{}': expected an IP address", entry))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_addrs(addrs, resolver))
    }

    pub fn from_addrs(addrs: impl IntoIterator<Item = IpAddr>, resolver: &IdentityResolver) -> Self {
        Self {
            exempt: addrs.into_iter().map(|ip| resolver.identity_for(ip)).collect(),
        }
    }

    pub fn is_exempt(&self, identity: &Identity) -> bool {
        self.exempt.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.exempt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exempt.is_empty()
    }
}
