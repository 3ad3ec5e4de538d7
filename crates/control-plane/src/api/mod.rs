// HTTP API routes
//
// This module contains all HTTP route handlers for the public API.
// Each submodule handles a specific resource type with its own AppState.

pub mod common;
pub mod instances;
pub mod locks;
pub mod routes;
pub mod workflows;

// Re-export common types
pub use common::{ApiError, ApiResult, ErrorResponse, ListResponse};
