// Authentication
//
// Resolves the caller of every API request into an engine Actor.

pub mod config;
pub mod middleware;

pub use config::{AuthConfig, AuthMode};
pub use middleware::{AuthActor, AuthError, AuthState, ACTOR_ID_HEADER};
