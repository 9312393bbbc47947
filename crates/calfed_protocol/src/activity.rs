/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::documents::ActorDocument;
use crate::{AS_CONTEXT, SECURITY_CONTEXT};

/// The closed set of activities a calendar instance understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Announce,
    Undo,
    Add,
    Remove,
}

impl ActivityType {
    pub const ALL: [ActivityType; 8] = [
        ActivityType::Create,
        ActivityType::Update,
        ActivityType::Delete,
        ActivityType::Follow,
        ActivityType::Announce,
        ActivityType::Undo,
        ActivityType::Add,
        ActivityType::Remove,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Create => "Create",
            ActivityType::Update => "Update",
            ActivityType::Delete => "Delete",
            ActivityType::Follow => "Follow",
            ActivityType::Announce => "Announce",
            ActivityType::Undo => "Undo",
            ActivityType::Add => "Add",
            ActivityType::Remove => "Remove",
        }
    }

    pub fn id_suffix(self) -> &'static str {
        match self {
            ActivityType::Create => "/create",
            ActivityType::Update => "/update",
            ActivityType::Delete => "/delete",
            ActivityType::Follow => "/follow",
            ActivityType::Announce => "/announce",
            ActivityType::Undo => "/undo",
            ActivityType::Add => "/add",
            ActivityType::Remove => "/remove",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// `{objectId}/{suffix}`: the same object and type always yield the same id.
    pub fn activity_id(self, object_id: &str) -> String {
        format!("{}{}", object_id.trim_end_matches('/'), self.id_suffix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActorRef {
    Id(String),
    Embedded(Box<ActorDocument>),
}

impl ActorRef {
    pub fn id(&self) -> &str {
        match self {
            ActorRef::Id(id) => id,
            ActorRef::Embedded(doc) => &doc.id,
        }
    }
}

impl From<&str> for ActorRef {
    fn from(id: &str) -> Self {
        ActorRef::Id(id.to_string())
    }
}

impl From<String> for ActorRef {
    fn from(id: String) -> Self {
        ActorRef::Id(id)
    }
}

/// Target of an activity. Embedded activities are tried before plain objects,
/// so an `Undo` carrying its original `Follow` comes back typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Activity(Box<Activity>),
    Object(Box<ApObject>),
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) => id,
            ObjectRef::Activity(a) => &a.id,
            ObjectRef::Object(o) => &o.id,
        }
    }

    pub fn as_object(&self) -> Option<&ApObject> {
        match self {
            ObjectRef::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_activity(&self) -> Option<&Activity> {
        match self {
            ObjectRef::Activity(a) => Some(a),
            _ => None,
        }
    }
}

impl From<&str> for ObjectRef {
    fn from(id: &str) -> Self {
        ObjectRef::Id(id.to_string())
    }
}

impl From<ApObject> for ObjectRef {
    fn from(o: ApObject) -> Self {
        ObjectRef::Object(Box::new(o))
    }
}

impl From<Activity> for ObjectRef {
    fn from(a: Activity) -> Self {
        ObjectRef::Activity(Box::new(a))
    }
}

/// An event (or any other non-activity object). Properties beyond the common
/// ones are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(
        rename = "attributedTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attributed_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApObject {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            published: None,
            attributed_to: None,
            url: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub actor: ActorRef,
    pub object: ObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
}

impl Activity {
    pub fn new(
        kind: ActivityType,
        actor: impl Into<ActorRef>,
        object: impl Into<ObjectRef>,
        published: impl Into<String>,
    ) -> Self {
        let object = object.into();
        Self {
            context: Some(Value::from(vec![AS_CONTEXT, SECURITY_CONTEXT])),
            id: kind.activity_id(object.id()),
            kind,
            actor: actor.into(),
            object,
            target: None,
            published: Some(published.into()),
            to: Vec::new(),
            cc: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<ObjectRef>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_to(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    pub fn actor_id(&self) -> &str {
        self.actor.id()
    }

    pub fn object_id(&self) -> &str {
        self.object.id()
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target.as_ref().map(ObjectRef::id)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Null(()) => Vec::new(),
    })
}
