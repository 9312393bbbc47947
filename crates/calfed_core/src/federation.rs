/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::anyhow;
use calfed_protocol::{Activity, ActivityType};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

use crate::actor::{ActorKind, ActorResolver};
use crate::calendar_store::{Account, Calendar, CalendarStore};
use crate::config::FederationConfig;
use crate::delivery::{DeliverySink, HttpDelivery, SigningActor};
use crate::dispatch::{ActivityHandler, Dispatcher, InboxContext, InboxTarget};
use crate::error::{FedResult, FederationError};
use crate::http_sig::{Rejection, SignatureVerifier};
use crate::inbox::CalendarInboxHandler;
use crate::keys::main_key_id;
use crate::membership::{MembershipError, MembershipStore, RemoteEditorGrant};
use crate::object_cache::RemoteObjectCache;
use crate::remote_fetch::RemoteFetcher;
use crate::ssrf::{HostResolver, SsrfGuard};
use crate::transport::HttpTransport;

/// Collaborators handed to [`Federation::new`].
pub struct FederationDeps {
    pub store: Arc<dyn CalendarStore>,
    pub membership: MembershipStore,
    pub transport: Arc<dyn HttpTransport>,
    pub dns: Arc<dyn HostResolver>,
    /// Defaults to signed HTTP POST over `transport`.
    pub delivery: Option<Arc<dyn DeliverySink>>,
}

/// Outcome of an admin membership change.
#[derive(Debug, Clone)]
pub struct EditorChange {
    pub grant: RemoteEditorGrant,
    /// False when the peer could not be notified; the local change stands.
    pub delivered: bool,
}

/// The assembled federation layer. Owns the one remote object cache of the
/// process.
#[derive(Clone)]
pub struct Federation {
    cache: Arc<RemoteObjectCache>,
    resolver: ActorResolver,
    verifier: SignatureVerifier,
    dispatcher: Dispatcher,
    membership: MembershipStore,
    store: Arc<dyn CalendarStore>,
    delivery: Arc<dyn DeliverySink>,
}

impl Federation {
    pub fn new(cfg: &FederationConfig, deps: FederationDeps) -> Self {
        let guard = SsrfGuard::new(deps.dns);
        let cache = Arc::new(RemoteObjectCache::new(cfg.cache_ttl()));
        let fetcher = RemoteFetcher::new(
            guard.clone(),
            cache.clone(),
            deps.transport.clone(),
            cfg.http_timeout(),
            cfg.user_agent(),
        );
        let resolver = ActorResolver::new(cfg.base_url(), cfg.domain.trim(), deps.store.clone(), fetcher);
        let verifier = SignatureVerifier::new(resolver.clone(), cfg.max_date_skew());
        let handler = CalendarInboxHandler::new(deps.store.clone(), deps.membership.clone(), resolver.clone());
        let delivery = deps
            .delivery
            .unwrap_or_else(|| Arc::new(HttpDelivery::new(guard, deps.transport, cfg.http_timeout())));
        Self {
            cache,
            resolver,
            verifier,
            dispatcher: Dispatcher::new(Arc::new(handler)),
            membership: deps.membership,
            store: deps.store,
            delivery,
        }
    }

    /// Swap the inbox handler, keeping everything else.
    pub fn with_handler(mut self, handler: Arc<dyn ActivityHandler>) -> Self {
        self.dispatcher = Dispatcher::new(handler);
        self
    }

    pub fn resolver(&self) -> &ActorResolver {
        &self.resolver
    }

    pub fn membership(&self) -> &MembershipStore {
        &self.membership
    }

    pub fn store(&self) -> &Arc<dyn CalendarStore> {
        &self.store
    }

    pub fn cache(&self) -> &RemoteObjectCache {
        &self.cache
    }

    /// Inbox delivery: local actor lookup, signature verification, then
    /// dispatch to the handler for the activity type.
    pub async fn receive_activity(
        &self,
        kind: ActorKind,
        name: &str,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> FedResult<ActivityType> {
        let target = match kind {
            ActorKind::Calendar => self.store.get_calendar_by_name(name).await?.map(InboxTarget::Calendar),
            ActorKind::User => self.store.get_account_by_username(name).await?.map(InboxTarget::User),
        };
        let Some(target) = target else {
            return Err(FederationError::NotFound("not found".to_string()));
        };

        let verified = self
            .verifier
            .verify(method, uri, headers, body)
            .await
            .map_err(rejection_to_error)?;

        let ctx = InboxContext {
            target,
            local_actor_url: self.resolver.local_actor_url(kind, name),
            signer: verified.signer,
        };
        self.dispatcher.dispatch(&ctx, verified.body).await
    }

    /// Local admin action: `account` lets the remote `user@domain` edit the
    /// calendar, and the remote actor is told with an `Add`.
    pub async fn add_remote_editor(
        &self,
        calendar_name: &str,
        account: &Account,
        remote_handle: &str,
    ) -> FedResult<EditorChange> {
        let calendar = self.editable_calendar(calendar_name, account).await?;
        let (username, domain) = parse_handle(remote_handle)
            .ok_or_else(|| FederationError::Validation("invalid remote account".to_string()))?;
        let signing = signing_actor(&calendar, &self.resolver)?;

        let Some(remote) = self.resolver.discover_remote_actor(username, domain).await else {
            return Err(FederationError::NotFound("remote actor not found".to_string()));
        };
        let grant = match self
            .membership
            .grant_remote_editor(&calendar.id, &remote.id, username, domain, &account.id)
        {
            Ok(g) => g,
            Err(MembershipError::AlreadyExists) => {
                return Err(FederationError::Validation("remote editor already exists".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        info!(calendar = %calendar.name, actor = %remote.id, by = %account.id, "remote editor granted");

        let calendar_url = self.resolver.local_actor_url(ActorKind::Calendar, &calendar.name);
        let activity = Activity::new(ActivityType::Add, calendar_url.as_str(), remote.id.as_str(), published_now())
            .with_target(calendar_url.as_str())
            .with_to(vec![remote.id.clone()]);
        let delivered = self.notify(&signing, remote.inbox.as_deref(), &activity).await;
        Ok(EditorChange { grant, delivered })
    }

    /// Inverse of [`Federation::add_remote_editor`], announced with a `Remove`.
    pub async fn remove_remote_editor(
        &self,
        calendar_name: &str,
        account: &Account,
        actor_uri: &str,
    ) -> FedResult<EditorChange> {
        let calendar = self.editable_calendar(calendar_name, account).await?;
        let signing = signing_actor(&calendar, &self.resolver)?;
        let Some(grant) = self
            .membership
            .list_remote_editors(&calendar.id)?
            .into_iter()
            .find(|g| g.actor_uri == actor_uri)
        else {
            return Err(FederationError::NotFound("remote editor not found".to_string()));
        };
        match self.membership.revoke_remote_editor(&calendar.id, actor_uri) {
            Ok(()) | Err(MembershipError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        info!(calendar = %calendar.name, actor = %actor_uri, by = %account.id, "remote editor revoked");

        let calendar_url = self.resolver.local_actor_url(ActorKind::Calendar, &calendar.name);
        let activity = Activity::new(ActivityType::Remove, calendar_url.as_str(), actor_uri, published_now())
            .with_target(calendar_url.as_str())
            .with_to(vec![actor_uri.to_string()]);
        let inbox = self.resolver.resolve_remote_actor(actor_uri).await.and_then(|a| a.inbox);
        let delivered = self.notify(&signing, inbox.as_deref(), &activity).await;
        Ok(EditorChange { grant, delivered })
    }

    /// Cascade for a calendar deleted in the calendar store.
    pub fn calendar_deleted(&self, calendar_id: &str) -> FedResult<usize> {
        let n = self.membership.delete_calendar(calendar_id)?;
        if n > 0 {
            info!(calendar_id, grants = n, "remote editor grants dropped");
        }
        Ok(n)
    }

    async fn editable_calendar(&self, calendar_name: &str, account: &Account) -> FedResult<Calendar> {
        let Some(calendar) = self.store.get_calendar_by_name(calendar_name).await? else {
            return Err(FederationError::NotFound("calendar not found".to_string()));
        };
        if !self.store.user_can_modify_calendar(account, &calendar).await? {
            return Err(FederationError::forbidden());
        }
        Ok(calendar)
    }

    async fn notify(&self, from: &SigningActor, inbox: Option<&str>, activity: &Activity) -> bool {
        let Some(inbox) = inbox else {
            warn!(id = %activity.id, "remote actor has no inbox, not notified");
            return false;
        };
        match self.delivery.deliver(from, inbox, activity).await {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %activity.id, "notify failed: {e:#}");
                false
            }
        }
    }
}

fn signing_actor(calendar: &Calendar, resolver: &ActorResolver) -> FedResult<SigningActor> {
    let private_key_pem = calendar
        .private_key_pem
        .clone()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| FederationError::Internal(anyhow!("calendar {} has no signing key", calendar.name)))?;
    Ok(SigningActor {
        key_id: main_key_id(&resolver.local_actor_url(ActorKind::Calendar, &calendar.name)),
        private_key_pem,
    })
}

fn rejection_to_error(r: Rejection) -> FederationError {
    let reason = r.reason.to_string();
    match r.status {
        StatusCode::UNAUTHORIZED => FederationError::Authentication(reason),
        StatusCode::FORBIDDEN => FederationError::Authorization(reason),
        StatusCode::BAD_REQUEST => FederationError::Validation(reason),
        _ => FederationError::Internal(anyhow!("signature check: {reason}")),
    }
}

/// `user@domain`, also written `@user@domain`.
pub fn parse_handle(handle: &str) -> Option<(&str, &str)> {
    let h = handle.trim();
    let h = h.strip_prefix('@').unwrap_or(h);
    let (user, domain) = h.split_once('@')?;
    if user.is_empty() || domain.is_empty() || domain.contains('@') || domain.contains('/') {
        return None;
    }
    Some((user, domain))
}

pub fn published_now() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
