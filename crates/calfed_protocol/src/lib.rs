/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire types exchanged between calendar instances.

mod activity;
mod documents;

pub use activity::{Activity, ActivityType, ActorRef, ApObject, ObjectRef};
pub use documents::{
    ActorDocument, ActorEndpoints, OrderedCollection, PublicKey, WebFingerLink, WebFingerRecord,
};

pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";
pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";
pub const ACTIVITY_JSON: &str = "application/activity+json";
