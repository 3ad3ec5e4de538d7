// Route graph types
//
// A route is an edge (view, state) -> (next view, next role) within one
// workflow. (workflow, view, state) is unique, and at most one route per
// workflow carries the start sign.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::Result;
use crate::workflow::validate_name;
use crate::RoleId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Route {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// View the edge leaves from.
    pub view: String,
    /// State chosen at `view` that selects this edge.
    pub state: String,
    /// View the instance moves to.
    pub next_view: String,
    /// Role that owns the next action. None means nobody does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_role_id: Option<RoleId>,
    /// Whether this is the workflow's entry point.
    pub start_sign: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn matches(&self, view: &str, state: &str) -> bool {
        self.view == view && self.state == state
    }
}

/// Input for creating a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NewRoute {
    pub view: String,
    pub state: String,
    pub next_view: String,
    #[serde(default)]
    pub next_role_id: Option<RoleId>,
    #[serde(default)]
    pub start_sign: bool,
}

impl NewRoute {
    pub fn new(
        view: impl Into<String>,
        state: impl Into<String>,
        next_view: impl Into<String>,
    ) -> Self {
        Self {
            view: view.into(),
            state: state.into(),
            next_view: next_view.into(),
            next_role_id: None,
            start_sign: false,
        }
    }

    pub fn with_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.next_role_id = Some(role_id.into());
        self
    }

    pub fn as_start(mut self) -> Self {
        self.start_sign = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("view", &self.view)?;
        validate_name("state", &self.state)?;
        validate_name("view", &self.next_view)
    }
}

/// Partial route update. Only provided fields change.
///
/// `next_role_id` is doubly optional: `Some(None)` clears the role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RouteUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_view: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    pub next_role_id: Option<Option<RoleId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sign: Option<bool>,
}

impl RouteUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(view) = &self.view {
            validate_name("view", view)?;
        }
        if let Some(state) = &self.state {
            validate_name("state", state)?;
        }
        if let Some(next_view) = &self.next_view {
            validate_name("view", next_view)?;
        }
        Ok(())
    }

    /// Apply the update to a route in place.
    pub fn apply_to(&self, route: &mut Route) {
        if let Some(view) = &self.view {
            route.view = view.clone();
        }
        if let Some(state) = &self.state {
            route.state = state.clone();
        }
        if let Some(next_view) = &self.next_view {
            route.next_view = next_view.clone();
        }
        if let Some(next_role_id) = &self.next_role_id {
            route.next_role_id = next_role_id.clone();
        }
        if let Some(start_sign) = self.start_sign {
            route.start_sign = start_sign;
        }
    }
}

// Distinguishes an absent field from an explicit null.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
