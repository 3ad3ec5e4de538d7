// Authentication extractor
// Decision: In "none" mode, every request runs as an administrator whose id
//           may be chosen with X-Actor-Id (local development only)
// Decision: In "token" mode, the bearer token is handed to the ActorResolver

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use stepflow_core::{Actor, ActorResolver};

use super::config::{AuthConfig, AuthMode};

/// Header selecting the acting user when authentication is disabled
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Authentication error
#[derive(Debug, Clone, Serialize)]
pub struct AuthError {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl AuthError {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::UNAUTHORIZED,
        }
    }

    pub fn forbidden(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::FORBIDDEN,
        }
    }

    fn internal() -> Self {
        Self {
            error: "Internal server error".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Auth state shared across routes
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub actors: Arc<dyn ActorResolver>,
}

impl AuthState {
    pub fn new(config: AuthConfig, actors: Arc<dyn ActorResolver>) -> Self {
        Self { config, actors }
    }
}

/// Authenticated caller extracted from the request.
/// Rejects with 401 when no valid credential is present.
#[derive(Debug, Clone)]
pub struct AuthActor(pub Actor);

impl AuthActor {
    /// Fail with 403 unless the caller is an administrator
    pub fn require_admin(&self) -> Result<&Actor, AuthError> {
        if self.0.admin {
            Ok(&self.0)
        } else {
            Err(AuthError::forbidden("Administrator access required"))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthActor
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);
        extract_actor(parts, &auth).await.map(AuthActor)
    }
}

async fn extract_actor(parts: &Parts, auth: &AuthState) -> Result<Actor, AuthError> {
    match auth.config.mode {
        AuthMode::None => {
            let actor = header_value(parts, ACTOR_ID_HEADER)
                .filter(|id| !id.is_empty())
                .map(|id| Actor::new(id).admin())
                .unwrap_or_else(Actor::anonymous);
            Ok(actor)
        }
        AuthMode::Token => {
            let token = header_value(parts, header::AUTHORIZATION.as_str())
                .and_then(|v| v.strip_prefix("Bearer ").map(str::trim))
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AuthError::unauthorized("Missing bearer token"))?;

            auth.actors
                .resolve(token)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to resolve actor: {}", e);
                    AuthError::internal()
                })?
                .ok_or_else(|| AuthError::unauthorized("Invalid token"))
        }
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use stepflow_core::StaticDirectory;

    fn state(mode: AuthMode) -> AuthState {
        let directory = StaticDirectory::from_yaml(
            r#"
actors:
  - id: u1
    roles: [roleX]
    tokens: [token-u1]
"#,
        )
        .unwrap();
        AuthState::new(AuthConfig { mode }, Arc::new(directory))
    }

    async fn extract(mode: AuthMode, request: Request<()>) -> Result<AuthActor, AuthError> {
        let (mut parts, _) = request.into_parts();
        AuthActor::from_request_parts(&mut parts, &state(mode)).await
    }

    #[tokio::test]
    async fn test_none_mode_is_anonymous_admin() {
        let actor = extract(AuthMode::None, Request::new(())).await.unwrap().0;
        assert_eq!(actor, Actor::anonymous());

        let request = Request::builder()
            .header(ACTOR_ID_HEADER, "u7")
            .body(())
            .unwrap();
        let actor = extract(AuthMode::None, request).await.unwrap().0;
        assert_eq!(actor.id, "u7");
        assert!(actor.admin);
    }

    #[tokio::test]
    async fn test_token_mode() {
        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer token-u1")
            .body(())
            .unwrap();
        let actor = extract(AuthMode::Token, request).await.unwrap();
        assert_eq!(actor.0.roles, vec!["roleX".to_string()]);
        assert!(actor.require_admin().is_err());

        let err = extract(AuthMode::Token, Request::new(())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(())
            .unwrap();
        let err = extract(AuthMode::Token, request).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
