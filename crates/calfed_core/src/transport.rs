/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;

use crate::ssrf::{resolve_public, HostResolver};

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound HTTP. Implementations must not follow redirects: a 3xx comes back
/// as a plain response so the target is never fetched unchecked.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn fetch(
        &self,
        uri: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    async fn post(
        &self,
        uri: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Connects only to addresses from `dns` that pass the SSRF rules at
    /// connect time.
    pub fn new(user_agent: &str, dns: Arc<dyn HostResolver>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .dns_resolver(Arc::new(PublicOnlyDns { inner: dns }))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }

    async fn finish(
        res: reqwest::Result<reqwest::Response>,
    ) -> Result<TransportResponse, TransportError> {
        let resp = res.map_err(map_reqwest_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(
        &self,
        uri: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let res = self
            .client
            .get(uri)
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await;
        Self::finish(res).await
    }

    async fn post(
        &self,
        uri: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let res = self
            .client
            .post(uri)
            .headers(headers.clone())
            .body(body)
            .timeout(timeout)
            .send()
            .await;
        Self::finish(res).await
    }
}

struct PublicOnlyDns {
    inner: Arc<dyn HostResolver>,
}

impl reqwest::dns::Resolve for PublicOnlyDns {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let inner = self.inner.clone();
        let host = name.as_str().to_string();
        Box::pin(async move {
            let ips = resolve_public(inner.as_ref(), &host, 0)
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            let addrs: reqwest::dns::Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Transport(e.to_string())
    }
}
