/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebFingerRecord {
    pub subject: String,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

impl WebFingerRecord {
    /// The `self` link pointing at an ActivityPub actor, if any.
    pub fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .filter(|l| l.rel == "self")
            .find(|l| {
                l.kind
                    .as_deref()
                    .map(|t| t.contains("activity+json") || t.contains("ld+json"))
                    .unwrap_or(false)
            })
            .and_then(|l| l.href.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(rename = "publicKeyPem")]
    pub public_key_pem: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorEndpoints {
    #[serde(rename = "sharedInbox", default, skip_serializing_if = "Option::is_none")]
    pub shared_inbox: Option<String>,
}

/// Actor profile, both as served for local actors and as parsed from peers.
/// Only `id` and `type` are mandatory on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDocument {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(
        rename = "preferredUsername",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<ActorEndpoints>,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedCollection {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "totalItems")]
    pub total_items: u64,
    #[serde(rename = "orderedItems")]
    pub ordered_items: Vec<Value>,
}

impl OrderedCollection {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            context: crate::AS_CONTEXT.to_string(),
            id: id.into(),
            kind: "OrderedCollection".to_string(),
            total_items: 0,
            ordered_items: Vec::new(),
        }
    }
}
