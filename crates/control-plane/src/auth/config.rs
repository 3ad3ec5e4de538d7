// Authentication configuration loaded from environment variables.
// Decision: Default to "none" mode for local development
// Decision: Credentials are opaque bearer tokens resolved by the ActorResolver;
//           the control-plane never parses them

/// Authentication mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// No authentication required (local development)
    #[default]
    None,
    /// Bearer token resolved through the actor directory
    Token,
}

impl AuthMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "token" => AuthMode::Token,
            _ => AuthMode::None,
        }
    }
}

/// Complete authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Authentication mode
    pub mode: AuthMode,
}

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// - `AUTH_MODE`: "none" (default) or "token"
    pub fn from_env() -> Self {
        let mode = std::env::var("AUTH_MODE")
            .map(|s| AuthMode::from_str(&s))
            .unwrap_or_default();
        Self { mode }
    }

    pub fn token() -> Self {
        Self {
            mode: AuthMode::Token,
        }
    }
}
