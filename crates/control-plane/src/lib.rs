// Stepflow Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and integration tests

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Authentication module
pub mod auth;

// Server configuration
pub mod config;

// Services layer
pub mod services;
pub use services::{Collaborators, Engine};

// OpenAPI spec generation
pub mod openapi;

use auth::AuthState;
use axum::Router;

/// Every API route, unprefixed, wired to the engine's services
pub fn api_routes(engine: &Engine, auth: AuthState) -> Router {
    Router::new()
        .merge(api::workflows::routes(api::workflows::AppState {
            service: engine.workflows.clone(),
            auth: auth.clone(),
        }))
        .merge(api::routes::routes(api::routes::AppState {
            service: engine.routes.clone(),
            auth: auth.clone(),
        }))
        .merge(api::instances::routes(api::instances::AppState {
            service: engine.instances.clone(),
            auth: auth.clone(),
        }))
        .merge(api::locks::routes(api::locks::AppState {
            service: engine.locks.clone(),
            auth,
        }))
}

/// Nest routes under an optional API prefix
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
