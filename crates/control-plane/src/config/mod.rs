// Server configuration
//
// Decision: Without DATABASE_URL the server runs on the in-memory store
// (local development and demos); nothing survives a restart in that mode.

use axum::http::HeaderValue;
use std::path::PathBuf;

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:9000";

/// Process-level settings for the API server
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// PostgreSQL connection string. None selects the in-memory store.
    pub database_url: Option<String>,
    pub http_addr: String,
    /// Prefix for every API route, e.g. "/api". Health stays unprefixed.
    pub api_prefix: String,
    /// YAML file with actors, roles and bearer tokens.
    pub directory_file: Option<PathBuf>,
    pub cors_origins: Vec<HeaderValue>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `DATABASE_URL`
    /// - `HTTP_ADDR` (default "0.0.0.0:9000")
    /// - `API_PREFIX` (default empty)
    /// - `DIRECTORY_FILE`
    /// - `CORS_ALLOWED_ORIGINS`: comma separated origins
    pub fn from_env() -> Self {
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            http_addr: non_empty_var("HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            api_prefix: std::env::var("API_PREFIX").unwrap_or_default(),
            directory_file: non_empty_var("DIRECTORY_FILE").map(PathBuf::from),
            cors_origins: non_empty_var("CORS_ALLOWED_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or_default(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_origins(value: &str) -> Vec<HeaderValue> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}
