/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

use crate::object_cache::RemoteObjectCache;
use crate::ssrf::{SsrfError, SsrfGuard};
use crate::transport::{HttpTransport, TransportError};

pub const ACTIVITY_ACCEPT: &str = "application/activity+json";
pub const JRD_ACCEPT: &str = "application/jrd+json, application/json";

#[derive(Debug, Error)]
enum FetchFailure {
    #[error("blocked: {0}")]
    Blocked(SsrfError),
    #[error("timed out")]
    Timeout,
    #[error("http status {0}")]
    HttpStatus(StatusCode),
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid json")]
    InvalidJson,
}

impl FetchFailure {
    fn category(&self) -> &'static str {
        match self {
            FetchFailure::Blocked(_) => "blocked",
            FetchFailure::Timeout => "timeout",
            FetchFailure::HttpStatus(_) => "http_status",
            FetchFailure::Transport(_) => "transport",
            FetchFailure::InvalidJson => "invalid_json",
        }
    }
}

/// GETs JSON documents from peers. Every failure collapses to `None`, which
/// callers must read as "unknown": it is never cached.
#[derive(Clone)]
pub struct RemoteFetcher {
    guard: SsrfGuard,
    cache: Arc<RemoteObjectCache>,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    user_agent: String,
}

impl RemoteFetcher {
    pub fn new(
        guard: SsrfGuard,
        cache: Arc<RemoteObjectCache>,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            guard,
            cache,
            transport,
            timeout,
            user_agent: user_agent.into(),
        }
    }

    pub async fn fetch_remote_object(&self, uri: &str) -> Option<Value> {
        self.fetch_json(uri, ACTIVITY_ACCEPT).await
    }

    pub async fn fetch_webfinger(&self, uri: &str) -> Option<Value> {
        self.fetch_json(uri, JRD_ACCEPT).await
    }

    pub fn cache(&self) -> &RemoteObjectCache {
        &self.cache
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.transport.clone()
    }

    pub fn guard(&self) -> &SsrfGuard {
        &self.guard
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_json(&self, uri: &str, accept: &'static str) -> Option<Value> {
        if let Some(hit) = self.cache.get(uri) {
            debug!(%uri, "remote object cache hit");
            return Some(hit);
        }
        match self.try_fetch(uri, accept).await {
            Ok(v) => {
                self.cache.set(uri, v.clone(), None);
                Some(v)
            }
            Err(e) => {
                warn!(%uri, category = e.category(), "remote fetch failed: {e}");
                None
            }
        }
    }

    async fn try_fetch(&self, uri: &str, accept: &'static str) -> Result<Value, FetchFailure> {
        self.guard
            .validate_not_private(uri)
            .await
            .map_err(FetchFailure::Blocked)?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(header::USER_AGENT, ua);
        }

        let resp = self
            .transport
            .fetch(uri, &headers, self.timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => FetchFailure::Timeout,
                TransportError::Transport(msg) => FetchFailure::Transport(msg),
            })?;
        if resp.status != StatusCode::OK {
            return Err(FetchFailure::HttpStatus(resp.status));
        }
        serde_json::from_slice(&resp.body).map_err(|_| FetchFailure::InvalidJson)
    }
}
