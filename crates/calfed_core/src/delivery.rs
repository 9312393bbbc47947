/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use calfed_protocol::{Activity, ACTIVITY_JSON};
use http::{HeaderMap, HeaderValue, Method, Uri};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::http_sig::sign_request_rsa_sha256;
use crate::ssrf::SsrfGuard;
use crate::transport::HttpTransport;

/// Key material of the local actor an activity is sent as.
#[derive(Debug, Clone)]
pub struct SigningActor {
    pub key_id: String,
    pub private_key_pem: String,
}

/// Outbound side. One attempt per call; retry and backoff are the
/// implementor's business.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, from: &SigningActor, inbox_url: &str, activity: &Activity) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpDelivery {
    guard: SsrfGuard,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl HttpDelivery {
    pub fn new(guard: SsrfGuard, transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self {
            guard,
            transport,
            timeout,
        }
    }
}

#[async_trait]
impl DeliverySink for HttpDelivery {
    async fn deliver(&self, from: &SigningActor, inbox_url: &str, activity: &Activity) -> Result<()> {
        self.guard
            .validate_not_private(inbox_url)
            .await
            .with_context(|| format!("inbox not deliverable: {inbox_url}"))?;
        let uri: Uri = inbox_url.parse().context("parse inbox url")?;
        let body = serde_json::to_vec(activity).context("encode activity")?;

        let mut headers = HeaderMap::new();
        headers.insert(http::header::ACCEPT, HeaderValue::from_static(ACTIVITY_JSON));
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(ACTIVITY_JSON));
        sign_request_rsa_sha256(
            &from.private_key_pem,
            &from.key_id,
            &Method::POST,
            &uri,
            &mut headers,
            &body,
            &["(request-target)", "host", "date", "digest", "content-type"],
        )?;

        let resp = match self.transport.post(inbox_url, &headers, body, self.timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(inbox = %inbox_url, id = %activity.id, "delivery failed: {e}");
                return Err(anyhow!("delivery to {inbox_url} failed: {e}"));
            }
        };
        if !resp.status.is_success() {
            warn!(inbox = %inbox_url, id = %activity.id, status = resp.status.as_u16(), "delivery rejected");
            return Err(anyhow!("delivery rejected: {}", resp.status));
        }
        info!(inbox = %inbox_url, id = %activity.id, kind = activity.kind.as_str(), "activity delivered");
        Ok(())
    }
}
