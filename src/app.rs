use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    ai::OpenAiServices,
    config::Config,
    error::AppError,
    gateway::ZapiGateway,
    store::PgStore,
    types::AppState,
    webhook::{set_contact_automation, zapi_webhook},
};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/zapi/{account_id}", post(zapi_webhook))
        .route(
            "/api/accounts/{account_id}/contacts/{phone}/automation",
            patch(set_contact_automation),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .map_err(sqlx::Error::from)?;

    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; automated replies will fail");
    }
    if config.zapi_instance_id.is_none() || config.zapi_token.is_none() {
        tracing::warn!("Z-API credentials not set; outbound sends will fail");
    }

    let port = config.port;
    let state = Arc::new(AppState {
        store: Arc::new(PgStore::new(db)),
        gateway: Arc::new(ZapiGateway::new(&config)?),
        ai: Arc::new(OpenAiServices::new(&config)?),
        config,
    });

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("zapi-inbox listening on http://localhost:{port}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
