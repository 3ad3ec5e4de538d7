//! Visibility predicates for instance reads.
//!
//! The engine makes no permission decisions. It maintains two queryable
//! fields on every instance (`next_role_id` and `processed_by_user_ids`) and
//! exposes a small closed predicate algebra over them. An external
//! authorization layer builds the predicate for a caller, combines it with
//! its own static predicates through [`InstancePredicate::and`] /
//! [`InstancePredicate::or`], and hands the result to `list`.
//!
//! Storage backends translate the structural variants into their own query
//! language. [`InstancePredicate::Custom`] is opaque to them; backends treat
//! it as "maybe" and re-check every candidate with
//! [`InstancePredicate::matches`].

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::instance::Instance;
use crate::{ActorId, RoleId};

/// Caller-supplied predicate evaluated in process.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    check: Arc<dyn Fn(&Instance) -> bool + Send + Sync>,
}

impl CustomPredicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Instance) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn check(&self, instance: &Instance) -> bool {
        (self.check)(instance)
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Custom").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum InstancePredicate {
    /// Matches every instance.
    Any,
    Workflow(Uuid),
    Subject(String),
    /// The instance currently awaits an action from this role.
    AwaitingRole(RoleId),
    /// This user has applied at least one transition on the instance.
    TouchedByUser(ActorId),
    /// This user holds the advisory lock.
    HeldBy(ActorId),
    Custom(CustomPredicate),
    And(Vec<InstancePredicate>),
    Or(Vec<InstancePredicate>),
}

impl InstancePredicate {
    /// The engine's read filter for one caller: the instance awaits one of
    /// the caller's roles, or the caller has already touched it.
    pub fn visible_to(roles: &[RoleId], user_id: &str) -> Self {
        let mut terms: Vec<Self> = roles
            .iter()
            .map(|role| Self::AwaitingRole(role.clone()))
            .collect();
        terms.push(Self::TouchedByUser(user_id.to_string()));
        Self::Or(terms)
    }

    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Instance) -> bool + Send + Sync + 'static,
    {
        Self::Custom(CustomPredicate::new(name, check))
    }

    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Any, p) | (p, Self::Any) => p,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), p) => {
                left.push(p);
                Self::And(left)
            }
            (p, Self::And(mut right)) => {
                right.insert(0, p);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => Self::Any,
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), p) => {
                left.push(p);
                Self::Or(left)
            }
            (p, Self::Or(mut right)) => {
                right.insert(0, p);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        match self {
            Self::Any => true,
            Self::Workflow(id) => instance.workflow_id == *id,
            Self::Subject(subject_id) => instance.subject_id == *subject_id,
            Self::AwaitingRole(role) => instance.next_role_id.as_deref() == Some(role.as_str()),
            Self::TouchedByUser(user) => instance.processed_by(user),
            Self::HeldBy(user) => instance.is_held_by(user),
            Self::Custom(custom) => custom.check(instance),
            // Empty conjunction is true, empty disjunction is false
            Self::And(terms) => terms.iter().all(|p| p.matches(instance)),
            Self::Or(terms) => terms.iter().any(|p| p.matches(instance)),
        }
    }

    /// Whether the predicate contains a variant only evaluable in process.
    pub fn has_custom(&self) -> bool {
        match self {
            Self::Custom(_) => true,
            Self::And(terms) | Self::Or(terms) => terms.iter().any(Self::has_custom),
            _ => false,
        }
    }
}

impl Default for InstancePredicate {
    fn default() -> Self {
        Self::Any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn instance(next_role: Option<&str>, processed_by: &[&str]) -> Instance {
        let now = Utc::now();
        Instance {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            subject_id: "job-1".into(),
            state: "GO".into(),
            next_view: "A".into(),
            next_role_id: next_role.map(String::from),
            processed_by_user_ids: processed_by.iter().map(|s| s.to_string()).collect(),
            being_held_by_user_id: None,
            payload: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_visible_to_awaiting_role() {
        let pred = InstancePredicate::visible_to(&["roleX".into()], "u9");
        assert!(pred.matches(&instance(Some("roleX"), &["u1"])));
        assert!(!pred.matches(&instance(Some("roleY"), &["u1"])));
        assert!(!pred.matches(&instance(None, &["u1"])));
    }

    #[test]
    fn test_visible_to_touched_by_user() {
        let pred = InstancePredicate::visible_to(&["roleX".into()], "u1");
        assert!(pred.matches(&instance(None, &["u1", "u2"])));
        assert!(pred.matches(&instance(Some("roleY"), &["u1"])));
    }

    #[test]
    fn test_visible_to_without_roles() {
        let pred = InstancePredicate::visible_to(&[], "u2");
        assert!(pred.matches(&instance(Some("roleX"), &["u2"])));
        assert!(!pred.matches(&instance(Some("roleX"), &["u1"])));
    }

    #[test]
    fn test_composition_with_external_predicate() {
        let subject_only = InstancePredicate::Subject("job-1".into());
        let pred = InstancePredicate::visible_to(&["roleX".into()], "u1").and(subject_only);

        assert!(pred.matches(&instance(Some("roleX"), &[])));
        let mut other = instance(Some("roleX"), &[]);
        other.subject_id = "job-2".into();
        assert!(!pred.matches(&other));
    }

    #[test]
    fn test_any_is_identity_for_and() {
        let pred = InstancePredicate::Any.and(InstancePredicate::AwaitingRole("r".into()));
        assert!(matches!(pred, InstancePredicate::AwaitingRole(_)));

        let pred = InstancePredicate::Any.or(InstancePredicate::AwaitingRole("r".into()));
        assert!(matches!(pred, InstancePredicate::Any));
    }

    #[test]
    fn test_and_flattens() {
        let pred = InstancePredicate::HeldBy("a".into())
            .and(InstancePredicate::HeldBy("b".into()))
            .and(InstancePredicate::HeldBy("c".into()));
        match pred {
            InstancePredicate::And(terms) => assert_eq!(terms.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_predicate() {
        let pred = InstancePredicate::custom("has-payload", |i| i.payload.is_some());
        assert!(pred.has_custom());
        assert!(!pred.matches(&instance(None, &[])));

        let nested = InstancePredicate::Any.and(InstancePredicate::Or(vec![pred]));
        assert!(nested.has_custom());
        assert!(!InstancePredicate::visible_to(&[], "u").has_custom());
    }

    #[test]
    fn test_empty_combinators() {
        let i = instance(None, &[]);
        assert!(InstancePredicate::And(vec![]).matches(&i));
        assert!(!InstancePredicate::Or(vec![]).matches(&i));
    }
}
