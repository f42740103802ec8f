//! Endpoint resolution for in-cluster backup services
//!
//! Short service names are expanded to `<name>.<namespace>.svc` so that the
//! operator, which runs in its own namespace, reaches the service in the
//! namespace of the backup object.

use url::Url;

use crate::adapters::HostResolver;
use crate::error::{Error, Result};

/// Resolved endpoint of a backup service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Fully qualified URL
    pub fqdn_url: String,
    /// URL with the host replaced by its IP address
    pub ip_url: String,
    /// Plain hostname of the FQDN URL
    pub hostname: String,
}

fn parse(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::endpoint(format!("failed to parse url {:?}: {}", raw, e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::endpoint(format!("url {:?} has no host", raw)));
    }
    Ok(url)
}

/// Render `url` without the root slash the parser adds when `raw` had no path
fn render(url: &Url, raw: &str) -> String {
    let mut rendered = url.to_string();
    if url.path() == "/" && url.query().is_none() && !raw.ends_with('/') {
        rendered.pop();
    }
    rendered
}

/// Expand a single-label hostname to `<host>.<namespace>.svc`, keeping the port
pub fn fqdn(raw: &str, namespace: &str) -> Result<String> {
    let mut url = parse(raw)?;
    let host = url.host_str().unwrap_or_default().to_string();

    if host.split('.').count() < 2 {
        let expanded = format!("{}.{}.svc", host, namespace);
        url.set_host(Some(&expanded))
            .map_err(|e| Error::endpoint(format!("invalid host {:?}: {}", expanded, e)))?;
    }

    Ok(render(&url, raw))
}

/// Hostname part of a URL
pub fn hostname(raw: &str) -> Result<String> {
    Ok(parse(raw)?.host_str().unwrap_or_default().to_string())
}

/// Replace the URL's host with the first address it resolves to
pub async fn url_with_ip(raw: &str, resolver: &dyn HostResolver) -> Result<String> {
    let mut url = parse(raw)?;
    let host = url.host_str().unwrap_or_default().to_string();

    let ips = resolver.lookup(&host).await?;
    let ip = ips
        .first()
        .ok_or_else(|| Error::endpoint(format!("no addresses found for {}", host)))?;

    url.set_ip_host(*ip)
        .map_err(|_| Error::endpoint(format!("cannot set ip host on {:?}", raw)))?;

    Ok(render(&url, raw))
}

/// Run the full resolution chain for a service address
pub async fn resolve(
    raw: &str,
    namespace: &str,
    resolver: &dyn HostResolver,
) -> Result<ResolvedEndpoint> {
    let fqdn_url = fqdn(raw, namespace)?;
    let ip_url = url_with_ip(&fqdn_url, resolver).await?;
    let hostname = hostname(&fqdn_url)?;

    Ok(ResolvedEndpoint {
        fqdn_url,
        ip_url,
        hostname,
    })
}
