// Instance and trail types
//
// An instance is one running execution of a workflow bound to one business
// subject. It is created by `start` and mutated only by transitions and the
// advisory lock. Every applied transition leaves one immutable trail entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::{ActorId, RoleId};

/// Free-form payload sub-record carried by an instance.
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Instance {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Business subject this instance is bound to (e.g. a job application id).
    pub subject_id: String,
    /// State of the last applied route.
    pub state: String,
    /// View that the next action is expected at.
    pub next_view: String,
    /// Role that owns the next action. None means nobody does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_role_id: Option<RoleId>,
    /// Every actor that applied a transition, without duplicates.
    pub processed_by_user_ids: Vec<ActorId>,
    /// Current advisory lock holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub being_held_by_user_id: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub payload: Option<Payload>,
    /// Incremented by every transition. Starts at 1.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn processed_by(&self, actor_id: &str) -> bool {
        self.processed_by_user_ids.iter().any(|id| id == actor_id)
    }

    /// Add an actor to the processed-by set. Returns false if already present.
    pub fn record_actor(&mut self, actor_id: &str) -> bool {
        if self.processed_by(actor_id) {
            return false;
        }
        self.processed_by_user_ids.push(actor_id.to_string());
        true
    }

    pub fn is_held_by(&self, actor_id: &str) -> bool {
        self.being_held_by_user_id.as_deref() == Some(actor_id)
    }
}

/// Metadata for a file attached to a trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct FileRef {
    pub id: String,
    pub display_name: String,
}

/// One immutable audit record of an applied transition.
///
/// View and state names are copied by value so later route-table edits
/// never alter history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TrailEntry {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub view: String,
    pub state: String,
    pub next_view: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_role_id: Option<RoleId>,
    pub processed_by_user_id: ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    pub created_at: DateTime<Utc>,
}

/// Shallow merge: every top-level key of `patch` overwrites the same key.
pub fn merge_payload(current: Option<Payload>, patch: Option<&Payload>) -> Option<Payload> {
    match (current, patch) {
        (current, None) => current,
        (None, Some(patch)) => Some(patch.clone()),
        (Some(mut current), Some(patch)) => {
            for (key, value) in patch {
                current.insert(key.clone(), value.clone());
            }
            Some(current)
        }
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LockOutcome {
    /// The lock was free and now belongs to the caller.
    Acquired,
    /// The caller already held the lock.
    AlreadyMine,
    /// Someone else holds the lock; nothing changed.
    HeldByOther { holder: ActorId },
}

impl LockOutcome {
    pub fn is_held_by_caller(&self) -> bool {
        matches!(self, Self::Acquired | Self::AlreadyMine)
    }
}

/// Current lock holder of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LockStatus {
    pub instance_id: Uuid,
    pub holder: Option<ActorId>,
}
