/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use calfed_protocol::{
    ActorDocument, ActorEndpoints, PublicKey, WebFingerLink, WebFingerRecord, ACTIVITY_JSON,
    AS_CONTEXT, SECURITY_CONTEXT,
};
use http::Uri;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::calendar_store::CalendarStore;
use crate::keys::main_key_id;
use crate::remote_fetch::RemoteFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Calendar,
    User,
}

impl ActorKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            ActorKind::Calendar => "calendars",
            ActorKind::User => "users",
        }
    }

    pub fn from_path_segment(s: &str) -> Option<Self> {
        match s {
            "calendars" => Some(ActorKind::Calendar),
            "users" => Some(ActorKind::User),
            _ => None,
        }
    }

    pub fn actor_type(self) -> &'static str {
        match self {
            ActorKind::Calendar => "Organization",
            ActorKind::User => "Person",
        }
    }
}

pub fn actor_url(base_url: &str, kind: ActorKind, name: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), kind.path_segment(), name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebFingerResource {
    pub username: String,
    pub domain: String,
}

/// Accepts `acct:name@domain`, also with a leading `@` on the name.
pub fn parse_webfinger_resource(resource: &str) -> Option<WebFingerResource> {
    let rest = resource.trim().strip_prefix("acct:")?;
    let rest = rest.strip_prefix('@').unwrap_or(rest);
    let (username, domain) = rest.rsplit_once('@')?;
    if username.is_empty() || domain.is_empty() || username.contains('@') {
        return None;
    }
    Some(WebFingerResource {
        username: username.to_string(),
        domain: domain.to_ascii_lowercase(),
    })
}

/// Local WebFinger answer, computed from the name alone.
pub fn lookup_webfinger(username: &str, domain: &str, kind: ActorKind) -> Option<WebFingerRecord> {
    webfinger_record(&format!("https://{domain}"), username, domain, kind)
}

fn webfinger_record(base_url: &str, username: &str, domain: &str, kind: ActorKind) -> Option<WebFingerRecord> {
    if username.is_empty() || domain.is_empty() {
        return None;
    }
    let subject = match kind {
        ActorKind::Calendar => format!("acct:{username}@{domain}"),
        ActorKind::User => format!("acct:@{username}@{domain}"),
    };
    Some(WebFingerRecord {
        subject,
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            kind: Some(ACTIVITY_JSON.to_string()),
            href: Some(actor_url(base_url, kind, username)),
        }],
    })
}

/// `keyId` minus fragment and query: `{scheme}://{authority}{path}`.
pub fn actor_url_from_key_id(key_id: &str) -> Option<String> {
    let without_fragment = key_id.split('#').next().unwrap_or(key_id);
    let uri: Uri = without_fragment.parse().ok()?;
    let scheme = uri.scheme_str()?;
    let authority = uri.authority()?;
    Some(format!("{scheme}://{}{}", authority.as_str(), uri.path()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteActorKey {
    pub actor_url: String,
    pub key_id: String,
    pub public_key_pem: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteActor {
    pub id: String,
    pub kind: String,
    pub preferred_username: Option<String>,
    pub inbox: Option<String>,
    pub public_key_pem: Option<String>,
}

impl RemoteActor {
    fn from_document(doc: ActorDocument) -> Self {
        let inbox = doc
            .inbox
            .clone()
            .or_else(|| doc.endpoints.as_ref().and_then(|e| e.shared_inbox.clone()));
        Self {
            id: doc.id,
            kind: doc.kind,
            preferred_username: doc.preferred_username,
            inbox,
            public_key_pem: doc
                .public_key
                .map(|k| k.public_key_pem)
                .filter(|p| !p.trim().is_empty()),
        }
    }
}

#[derive(Clone)]
pub struct ActorResolver {
    base_url: String,
    domain: String,
    store: Arc<dyn CalendarStore>,
    fetcher: RemoteFetcher,
}

impl ActorResolver {
    pub fn new(
        base_url: impl Into<String>,
        domain: impl Into<String>,
        store: Arc<dyn CalendarStore>,
        fetcher: RemoteFetcher,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            domain: domain.into(),
            store,
            fetcher,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn local_actor_url(&self, kind: ActorKind, name: &str) -> String {
        actor_url(&self.base_url, kind, name)
    }

    /// WebFinger for a resource naming one of our actors. Calendars win over
    /// users when both carry the same name.
    pub async fn webfinger_for_resource(&self, resource: &str) -> Result<Option<WebFingerRecord>> {
        let Some(res) = parse_webfinger_resource(resource) else {
            return Ok(None);
        };
        if !res.domain.eq_ignore_ascii_case(&self.domain) {
            return Ok(None);
        }
        let kind = if self.store.get_calendar_by_name(&res.username).await?.is_some() {
            ActorKind::Calendar
        } else if self.store.get_account_by_username(&res.username).await?.is_some() {
            ActorKind::User
        } else {
            return Ok(None);
        };
        Ok(webfinger_record(&self.base_url, &res.username, &self.domain, kind))
    }

    /// Profile for a local calendar (Organization) or user (Person).
    pub async fn lookup_profile(&self, kind: ActorKind, name: &str) -> Result<Option<ActorDocument>> {
        let (display_name, summary, pem) = match kind {
            ActorKind::Calendar => match self.store.get_calendar_by_name(name).await? {
                Some(c) => (c.display_name, c.summary, c.public_key_pem),
                None => return Ok(None),
            },
            ActorKind::User => match self.store.get_account_by_username(name).await? {
                Some(a) => (a.display_name, None, a.public_key_pem),
                None => return Ok(None),
            },
        };
        let id = self.local_actor_url(kind, name);
        Ok(Some(ActorDocument {
            context: Some(Value::from(vec![AS_CONTEXT, SECURITY_CONTEXT])),
            id: id.clone(),
            kind: kind.actor_type().to_string(),
            preferred_username: Some(name.to_string()),
            name: Some(display_name.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| name.to_string())),
            summary,
            url: Some(id.clone()),
            inbox: Some(format!("{id}/inbox")),
            outbox: Some(format!("{id}/outbox")),
            endpoints: Some(ActorEndpoints {
                shared_inbox: None,
            }),
            public_key: Some(PublicKey {
                id: main_key_id(&id),
                owner: id,
                public_key_pem: pem.unwrap_or_default(),
            }),
        }))
    }

    /// Public key of whoever signed with `key_id`. `None` when the actor
    /// cannot be fetched, disowns the URL, or carries no key.
    pub async fn resolve_remote_key(&self, key_id: &str) -> Option<RemoteActorKey> {
        let actor_url = actor_url_from_key_id(key_id)?;
        let doc = self.fetcher.fetch_remote_object(&actor_url).await?;
        let doc: ActorDocument = match serde_json::from_value(doc) {
            Ok(d) => d,
            Err(e) => {
                debug!(%actor_url, "actor document unusable: {e}");
                return None;
            }
        };
        if doc.id.trim_end_matches('/') != actor_url.trim_end_matches('/') {
            debug!(%actor_url, doc_id = %doc.id, "actor document id mismatch");
            return None;
        }
        let pk = doc.public_key?;
        if pk.public_key_pem.trim().is_empty() {
            return None;
        }
        Some(RemoteActorKey {
            actor_url,
            key_id: pk.id,
            public_key_pem: pk.public_key_pem,
        })
    }

    /// Drops the cached actor document and resolves the key again, for
    /// signers that may have rotated their key.
    pub async fn refresh_remote_key(&self, key_id: &str) -> Option<RemoteActorKey> {
        let actor_url = actor_url_from_key_id(key_id)?;
        self.fetcher.cache().delete(&actor_url);
        self.resolve_remote_key(key_id).await
    }

    pub async fn resolve_remote_actor(&self, actor_url: &str) -> Option<RemoteActor> {
        let doc = self.fetcher.fetch_remote_object(actor_url).await?;
        let doc: ActorDocument = serde_json::from_value(doc).ok()?;
        Some(RemoteActor::from_document(doc))
    }

    /// `user@domain` on another instance, via its WebFinger endpoint.
    pub async fn discover_remote_actor(&self, username: &str, domain: &str) -> Option<RemoteActor> {
        let resource = format!("acct:{username}@{domain}");
        let url = format!(
            "https://{domain}/.well-known/webfinger?resource={}",
            urlencoding::encode(&resource)
        );
        let jrd = self.fetcher.fetch_webfinger(&url).await?;
        let jrd: WebFingerRecord = serde_json::from_value(jrd).ok()?;
        let href = jrd.self_link()?.to_string();
        self.resolve_remote_actor(&href).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar_store::InMemoryCalendarStore;
    use crate::test_support::{fetcher_with, ScriptedTransport, StaticResolver};
    use serde_json::json;

    #[test]
    fn calendar_webfinger() {
        let wf = lookup_webfinger("acme", "example.org", ActorKind::Calendar).unwrap();
        assert_eq!(wf.subject, "acct:acme@example.org");
        assert_eq!(wf.links.len(), 1);
        assert_eq!(wf.links[0].rel, "self");
        assert_eq!(wf.links[0].kind.as_deref(), Some("application/activity+json"));
        assert_eq!(wf.links[0].href.as_deref(), Some("https://example.org/calendars/acme"));
    }

    #[test]
    fn user_webfinger() {
        let wf = lookup_webfinger("alice", "example.org", ActorKind::User).unwrap();
        assert_eq!(wf.subject, "acct:@alice@example.org");
        assert_eq!(wf.links[0].href.as_deref(), Some("https://example.org/users/alice"));
        assert!(lookup_webfinger("", "example.org", ActorKind::User).is_none());
    }

    #[test]
    fn parse_resource_variants() {
        let want = WebFingerResource {
            username: "acme".to_string(),
            domain: "example.org".to_string(),
        };
        assert_eq!(parse_webfinger_resource("acct:acme@example.org"), Some(want.clone()));
        assert_eq!(parse_webfinger_resource("acct:@acme@Example.org"), Some(want));
        assert_eq!(parse_webfinger_resource("acme@example.org"), None);
        assert_eq!(parse_webfinger_resource("acct:acme"), None);
        assert_eq!(parse_webfinger_resource("acct:@example.org"), None);
        assert_eq!(parse_webfinger_resource("acct:a@b@c"), None);
    }

    #[test]
    fn key_id_to_actor_url() {
        assert_eq!(
            actor_url_from_key_id("https://remote.example/users/bob#main-key").as_deref(),
            Some("https://remote.example/users/bob")
        );
        assert_eq!(
            actor_url_from_key_id("https://remote.example:8443/users/bob?x=1#k").as_deref(),
            Some("https://remote.example:8443/users/bob")
        );
        assert_eq!(actor_url_from_key_id("bob#main-key"), None);
    }

    fn resolver(transport: Arc<ScriptedTransport>) -> (ActorResolver, Arc<InMemoryCalendarStore>) {
        let store = Arc::new(InMemoryCalendarStore::default());
        let fetcher = fetcher_with(transport, StaticResolver::default().with("remote.example", "93.184.216.34"));
        (
            ActorResolver::new("https://example.org", "example.org", store.clone(), fetcher),
            store,
        )
    }

    #[tokio::test]
    async fn local_profiles_embed_key() {
        let (r, store) = resolver(Arc::new(ScriptedTransport::default()));
        let mut cal = store.add_calendar("cal-1", "acme", None);
        cal.public_key_pem = Some("PEM-A".to_string());
        store.put_calendar(cal);
        store.add_account("acct-1", "alice", None);

        let cal = r.lookup_profile(ActorKind::Calendar, "acme").await.unwrap().unwrap();
        assert_eq!(cal.kind, "Organization");
        assert_eq!(cal.id, "https://example.org/calendars/acme");
        assert_eq!(cal.inbox.as_deref(), Some("https://example.org/calendars/acme/inbox"));
        let key = cal.public_key.unwrap();
        assert_eq!(key.id, "https://example.org/calendars/acme#main-key");
        assert_eq!(key.public_key_pem, "PEM-A");

        let user = r.lookup_profile(ActorKind::User, "alice").await.unwrap().unwrap();
        assert_eq!(user.kind, "Person");
        assert_eq!(user.public_key.unwrap().public_key_pem, "");

        assert!(r.lookup_profile(ActorKind::User, "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn webfinger_resource_lookup() {
        let (r, store) = resolver(Arc::new(ScriptedTransport::default()));
        store.add_calendar("cal-1", "acme", None);
        store.add_account("acct-1", "alice", None);

        let wf = r.webfinger_for_resource("acct:acme@example.org").await.unwrap().unwrap();
        assert_eq!(wf.subject, "acct:acme@example.org");
        let wf = r.webfinger_for_resource("acct:alice@example.org").await.unwrap().unwrap();
        assert_eq!(wf.subject, "acct:@alice@example.org");
        assert!(r.webfinger_for_resource("acct:acme@other.org").await.unwrap().is_none());
        assert!(r.webfinger_for_resource("acct:nobody@example.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_key_resolution() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .json(
                    "https://remote.example/users/bob",
                    json!({
                        "id": "https://remote.example/users/bob",
                        "type": "Person",
                        "inbox": "https://remote.example/users/bob/inbox",
                        "publicKey": {"id": "https://remote.example/users/bob#main-key", "owner": "https://remote.example/users/bob", "publicKeyPem": "PEM-B"}
                    }),
                )
                .json("https://remote.example/users/nokey", json!({"id": "https://remote.example/users/nokey", "type": "Person"}))
                .json(
                    "https://remote.example/users/imposter",
                    json!({
                        "id": "https://remote.example/users/bob",
                        "type": "Person",
                        "publicKey": {"id": "x", "publicKeyPem": "PEM-X"}
                    }),
                ),
        );
        let (r, _) = resolver(transport);
        let key = r
            .resolve_remote_key("https://remote.example/users/bob#main-key")
            .await
            .unwrap();
        assert_eq!(key.actor_url, "https://remote.example/users/bob");
        assert_eq!(key.public_key_pem, "PEM-B");

        assert!(r.resolve_remote_key("https://remote.example/users/nokey#main-key").await.is_none());
        assert!(r.resolve_remote_key("https://remote.example/users/imposter#main-key").await.is_none());
        assert!(r.resolve_remote_key("https://remote.example/users/missing#main-key").await.is_none());
    }

    #[tokio::test]
    async fn remote_discovery_via_webfinger() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .json(
                    "https://remote.example/.well-known/webfinger?resource=acct%3Abob%40remote.example",
                    json!({
                        "subject": "acct:bob@remote.example",
                        "links": [{"rel": "self", "type": "application/activity+json", "href": "https://remote.example/users/bob"}]
                    }),
                )
                .json(
                    "https://remote.example/users/bob",
                    json!({
                        "id": "https://remote.example/users/bob",
                        "type": "Person",
                        "preferredUsername": "bob",
                        "endpoints": {"sharedInbox": "https://remote.example/inbox"}
                    }),
                ),
        );
        let (r, _) = resolver(transport);
        let bob = r.discover_remote_actor("bob", "remote.example").await.unwrap();
        assert_eq!(bob.id, "https://remote.example/users/bob");
        assert_eq!(bob.preferred_username.as_deref(), Some("bob"));
        assert_eq!(bob.inbox.as_deref(), Some("https://remote.example/inbox"));
        assert!(bob.public_key_pem.is_none());
        assert!(r.discover_remote_actor("carol", "remote.example").await.is_none());
    }
}
