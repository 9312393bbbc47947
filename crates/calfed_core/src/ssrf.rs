/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use http::Uri;
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SsrfError {
    #[error("invalid uri")]
    InvalidUri,
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("uri has no host")]
    MissingHost,
    #[error("host did not resolve: {0}")]
    Resolve(String),
    #[error("host resolves to a non-public address")]
    PrivateAddress,
}

/// Name resolution used by [`SsrfGuard`].
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|sa| sa.ip()).collect())
    }
}

#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn HostResolver>,
}

impl SsrfGuard {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    pub fn with_system_dns() -> Self {
        Self::new(Arc::new(SystemResolver))
    }

    /// Every address the host resolves to must be public; one private answer
    /// is enough to reject.
    pub async fn validate_not_private(&self, uri: &str) -> Result<(), SsrfError> {
        let parsed: Uri = uri.parse().map_err(|_| SsrfError::InvalidUri)?;
        let scheme = parsed.scheme_str().unwrap_or("").to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "https" => 443,
            "http" => 80,
            "" => return Err(SsrfError::InvalidUri),
            other => return Err(SsrfError::UnsupportedScheme(other.to_string())),
        };
        let host = parsed
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or(SsrfError::MissingHost)?;
        let port = parsed.port_u16().unwrap_or(default_port);

        resolve_public(self.resolver.as_ref(), host, port).await.map(|_| ())
    }
}

/// Addresses for `host`, refused if any of them is non-public.
pub async fn resolve_public(resolver: &dyn HostResolver, host: &str, port: u16) -> Result<Vec<IpAddr>, SsrfError> {
    let addrs = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => resolver
            .resolve(host, port)
            .await
            .map_err(|e| SsrfError::Resolve(e.to_string()))?,
    };
    if addrs.is_empty() {
        return Err(SsrfError::Resolve("no addresses".to_string()));
    }
    if addrs.iter().copied().any(is_forbidden_ip) {
        return Err(SsrfError::PrivateAddress);
    }
    Ok(addrs)
}

pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => is_forbidden_v6(v6),
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        // 0.0.0.0/8 and 100.64.0.0/10 (carrier-grade NAT)
        || a == 0
        || (a == 100 && (64..128).contains(&b))
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_forbidden_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local, fe80::/10 link local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
