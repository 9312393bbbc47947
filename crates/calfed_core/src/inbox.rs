/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use calfed_protocol::{Activity, ActivityType};
use std::sync::Arc;
use tracing::{debug, info};

use crate::actor::ActorResolver;
use crate::calendar_store::{Account, Calendar, CalendarStore};
use crate::dispatch::{ActivityHandler, InboxContext, InboxTarget};
use crate::error::{FedResult, FederationError};
use crate::http_sig::actor_matches_signer;
use crate::membership::{now_ms, MembershipError, MembershipStore};

/// Applies inbound activities to the calendar store and the membership
/// records. Follow, Announce and unrelated Undo stay unimplemented.
#[derive(Clone)]
pub struct CalendarInboxHandler {
    store: Arc<dyn CalendarStore>,
    membership: MembershipStore,
    resolver: ActorResolver,
}

impl CalendarInboxHandler {
    pub fn new(store: Arc<dyn CalendarStore>, membership: MembershipStore, resolver: ActorResolver) -> Self {
        Self {
            store,
            membership,
            resolver,
        }
    }

    fn require_editor(&self, calendar: &Calendar, ctx: &InboxContext) -> FedResult<()> {
        if self.membership.is_remote_editor(&calendar.id, &ctx.signer.actor_url)? {
            Ok(())
        } else {
            debug!(calendar = %calendar.name, actor = %ctx.signer.actor_url, "not a remote editor");
            Err(FederationError::forbidden())
        }
    }

    async fn upsert_event(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        let InboxTarget::Calendar(calendar) = &ctx.target else {
            return Err(FederationError::NotImplemented);
        };
        let Some(event) = activity.object.as_object() else {
            return Err(FederationError::Validation("invalid message".to_string()));
        };
        if let Some(author) = event.attributed_to.as_deref() {
            if !actor_matches_signer(author, &ctx.signer.actor_url) {
                return Err(FederationError::forbidden());
            }
        }
        self.require_editor(calendar, ctx)?;
        self.store.upsert_remote_event(calendar, event).await?;
        info!(calendar = %calendar.name, event = %event.id, "remote event stored");
        Ok(())
    }

    async fn apply_add(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        match &ctx.target {
            InboxTarget::Calendar(calendar) => {
                // Replays of an existing grant are fine; new grants only come
                // from a local admin.
                if !actor_matches_signer(activity.object_id(), &ctx.signer.actor_url) {
                    return Err(FederationError::forbidden());
                }
                self.require_editor(calendar, ctx)
            }
            InboxTarget::User(account) => self.grant_access(ctx, account, activity).await,
        }
    }

    async fn apply_remove(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        match &ctx.target {
            InboxTarget::Calendar(calendar) => {
                if !actor_matches_signer(activity.object_id(), &ctx.signer.actor_url) {
                    return Err(FederationError::forbidden());
                }
                match self.membership.revoke_remote_editor(&calendar.id, &ctx.signer.actor_url) {
                    Ok(()) => {
                        info!(calendar = %calendar.name, actor = %ctx.signer.actor_url, "remote editor resigned");
                        Ok(())
                    }
                    Err(MembershipError::NotFound) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            InboxTarget::User(account) => {
                if !actor_matches_signer(activity.object_id(), &ctx.local_actor_url) {
                    return Err(FederationError::forbidden());
                }
                let remote_calendar_id = remote_calendar_id(ctx, activity)?;
                match self
                    .membership
                    .revoke_remote_calendar_access(&account.id, &remote_calendar_id)
                {
                    Ok(()) => {
                        info!(account = %account.username, %remote_calendar_id, "remote calendar access revoked");
                        Ok(())
                    }
                    Err(MembershipError::NotFound) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn grant_access(&self, ctx: &InboxContext, account: &Account, activity: &Activity) -> FedResult<()> {
        if !actor_matches_signer(activity.object_id(), &ctx.local_actor_url) {
            return Err(FederationError::forbidden());
        }
        let remote_calendar_id = remote_calendar_id(ctx, activity)?;
        if self
            .membership
            .get_remote_calendar_access(&account.id, &remote_calendar_id)?
            .is_some()
        {
            return Ok(());
        }
        let inbox = self
            .resolver
            .resolve_remote_actor(&ctx.signer.actor_url)
            .await
            .and_then(|a| a.inbox)
            .ok_or_else(|| FederationError::Validation("remote actor has no inbox".to_string()))?;
        match self.membership.grant_remote_calendar_access(
            &account.id,
            &remote_calendar_id,
            &ctx.signer.actor_url,
            &inbox,
            now_ms(),
        ) {
            Ok(_) => {
                info!(account = %account.username, %remote_calendar_id, "remote calendar access granted");
                Ok(())
            }
            Err(MembershipError::AlreadyExists) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The signing calendar actor. A `target` naming any other calendar is
/// refused so one peer cannot speak for another's calendar.
fn remote_calendar_id(ctx: &InboxContext, activity: &Activity) -> FedResult<String> {
    if let Some(target) = activity.target_id() {
        if !actor_matches_signer(target, &ctx.signer.actor_url) {
            debug!(%target, actor = %ctx.signer.actor_url, "target is not the signing calendar");
            return Err(FederationError::forbidden());
        }
    }
    Ok(ctx.signer.actor_url.clone())
}

#[async_trait]
impl ActivityHandler for CalendarInboxHandler {
    async fn on_create(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        self.upsert_event(ctx, activity).await
    }

    async fn on_update(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        self.upsert_event(ctx, activity).await
    }

    async fn on_delete(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        let InboxTarget::Calendar(calendar) = &ctx.target else {
            return Err(FederationError::NotImplemented);
        };
        self.require_editor(calendar, ctx)?;
        let event_id = activity.object_id();
        if self.store.delete_remote_event(calendar, event_id).await? {
            info!(calendar = %calendar.name, event = %event_id, "remote event deleted");
        }
        Ok(())
    }

    async fn on_add(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        self.apply_add(ctx, activity).await
    }

    async fn on_remove(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        self.apply_remove(ctx, activity).await
    }

    async fn on_undo(&self, ctx: &InboxContext, activity: &Activity) -> FedResult<()> {
        let Some(inner) = activity.object.as_activity() else {
            return Err(FederationError::NotImplemented);
        };
        if !matches!(inner.kind, ActivityType::Add | ActivityType::Remove) {
            return Err(FederationError::NotImplemented);
        }
        if !actor_matches_signer(inner.actor_id(), &ctx.signer.actor_url) {
            return Err(FederationError::forbidden());
        }
        match inner.kind {
            ActivityType::Add => self.apply_remove(ctx, inner).await,
            _ => self.apply_add(ctx, inner).await,
        }
    }
}
