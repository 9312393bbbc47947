/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use calfed_protocol::{Activity, ActivityType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::actor::RemoteActorKey;
use crate::calendar_store::{Account, Calendar};
use crate::error::{FedResult, FederationError};

/// Local actor whose inbox received the activity.
#[derive(Debug, Clone)]
pub enum InboxTarget {
    Calendar(Calendar),
    User(Account),
}

#[derive(Debug, Clone)]
pub struct InboxContext {
    pub target: InboxTarget,
    pub local_actor_url: String,
    /// Verified owner of the signing key. Already checked against `actor`.
    pub signer: RemoteActorKey,
}

/// One method per activity type. Anything not overridden answers 501.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn on_create(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_update(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_delete(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_follow(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_announce(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_undo(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_add(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }

    async fn on_remove(&self, _ctx: &InboxContext, _activity: &Activity) -> FedResult<()> {
        Err(FederationError::NotImplemented)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn ActivityHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn ActivityHandler>) -> Self {
        Self { handler }
    }

    pub async fn dispatch(&self, ctx: &InboxContext, body: Value) -> FedResult<ActivityType> {
        let activity = parse_activity(body)?;
        info!(
            kind = activity.kind.as_str(),
            id = %activity.id,
            actor = %activity.actor_id(),
            "inbox activity"
        );
        let h = &self.handler;
        let res = match activity.kind {
            ActivityType::Create => h.on_create(ctx, &activity).await,
            ActivityType::Update => h.on_update(ctx, &activity).await,
            ActivityType::Delete => h.on_delete(ctx, &activity).await,
            ActivityType::Follow => h.on_follow(ctx, &activity).await,
            ActivityType::Announce => h.on_announce(ctx, &activity).await,
            ActivityType::Undo => h.on_undo(ctx, &activity).await,
            ActivityType::Add => h.on_add(ctx, &activity).await,
            ActivityType::Remove => h.on_remove(ctx, &activity).await,
        };
        res.map(|()| activity.kind)
    }
}

/// Unknown `type` and shape errors are both "invalid message".
pub fn parse_activity(body: Value) -> FedResult<Activity> {
    let kind = body.get("type").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    if ActivityType::parse(&kind).is_none() {
        debug!(%kind, "unrecognized activity type");
        return Err(invalid_message());
    }
    serde_json::from_value(body).map_err(|e| {
        debug!(%kind, "activity does not deserialize: {e}");
        invalid_message()
    })
}

fn invalid_message() -> FederationError {
    FederationError::Validation("invalid message".to_string())
}
