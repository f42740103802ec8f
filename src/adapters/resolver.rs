//! Hostname resolution

use std::net::IpAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;

use crate::error::{Error, Result};

/// Resolves a hostname to the addresses it points at
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Resolver using the system's DNS configuration
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        // lookup_host wants a port; it is dropped from the result
        let addrs = lookup_host((host, 0))
            .await
            .map_err(|e| Error::endpoint(format!("failed to lookup ips for {}: {}", host, e)))?;

        let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
        if ips.is_empty() {
            return Err(Error::endpoint(format!("no addresses found for {}", host)));
        }
        Ok(ips)
    }
}
