// Stepflow API server
// Decision: Postgres when DATABASE_URL is set, in-memory store otherwise
// Decision: Identity, roles and tokens come from a static directory file until an
//           external identity service is wired in

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use stepflow_control_plane::auth::{AuthConfig, AuthState, ACTOR_ID_HEADER};
use stepflow_control_plane::config::ServerConfig;
use stepflow_control_plane::openapi::ApiDoc;
use stepflow_control_plane::{api_routes, build_router_with_prefix, Collaborators, Engine};
use stepflow_core::telemetry::{init_telemetry, TelemetryConfig};
use stepflow_core::{EngineConfig, StaticDirectory};
use stepflow_storage::{InMemoryWorkflowStore, PostgresWorkflowStore, WorkflowStore};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    auth_mode: String,
    store: &'static str,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    auth_mode: String,
    store: &'static str,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        auth_mode: state.auth_mode.clone(),
        store: state.store,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - SERVICE_NAME: Service name (default: "stepflow-control-plane")
    // - RUST_LOG: Log filter (default: "stepflow=debug,tower_http=debug")
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "stepflow" {
        telemetry_config.service_name = "stepflow-control-plane".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some(
            "stepflow_control_plane=debug,stepflow_storage=debug,tower_http=debug".to_string(),
        );
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!("stepflow-control-plane starting...");

    let config = ServerConfig::from_env();

    // Initialize store
    let (store, store_kind): (Arc<dyn WorkflowStore>, &'static str) = match &config.database_url {
        Some(url) => {
            let store = PostgresWorkflowStore::from_url(url)
                .await
                .context("Failed to connect to database")?;
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Connected to database");
            (Arc::new(store), "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is not persisted)");
            (Arc::new(InMemoryWorkflowStore::new()), "memory")
        }
    };

    // Load actor directory
    let directory = match &config.directory_file {
        Some(path) => {
            let directory = StaticDirectory::load(path)
                .with_context(|| format!("Failed to load directory {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                actors = directory.actor_count(),
                "Actor directory loaded"
            );
            directory
        }
        None => StaticDirectory::default(),
    };

    let engine_config = EngineConfig::from_env();
    tracing::info!(strict_view_order = engine_config.strict_view_order, "Engine configured");
    let engine = Engine::new(store, Collaborators::from_directory(directory), engine_config);

    // Load authentication configuration
    let auth_config = AuthConfig::from_env();
    tracing::info!(mode = ?auth_config.mode, "Authentication configured");
    let auth_state = AuthState::new(auth_config.clone(), engine.actors.clone());

    let health_state = HealthState {
        auth_mode: format!("{:?}", auth_config.mode),
        store: store_kind,
    };

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    // Build main router with health (not prefixed) and prefixed API routes
    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(build_router_with_prefix(
            api_routes(&engine, auth_state),
            &config.api_prefix,
        ));

    // Add Swagger UI
    let app =
        app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // Add CORS layer only if origins are configured
    let app = if config.cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS origins configured");
        app.layer(cors_layer(config.cors_origins.clone()))
    };

    // Add tracing
    let app = app.layer(TraceLayer::new_for_http());

    // Start HTTP server
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::HeaderName::from_static(ACTOR_ID_HEADER),
        ])
        .allow_credentials(true)
}
