//! Web server: axum REST API over the live contact database.
//!
//! Handlers read straight from the shared `ContactDb`; transport control
//! goes through the `TransportManager`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use nmea_core::contact_db::ContactDb;

use crate::error::Result;
use crate::pipeline::SentencePipeline;
use crate::transport::TransportManager;

pub mod ingest;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub db: Arc<ContactDb>,
    pub pipeline: Arc<SentencePipeline>,
    pub transports: TransportManager,
}

impl AppState {
    pub fn new(transports: TransportManager) -> Self {
        let pipeline = Arc::clone(transports.pipeline());
        let db = Arc::clone(pipeline.dispatcher().db());
        AppState {
            db,
            pipeline,
            transports,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/contacts", get(routes::api_contacts))
        .route("/api/contacts/:label", get(routes::api_contact_detail))
        .route("/api/tracks", get(routes::api_tracks))
        .route("/api/status", get(routes::api_status))
        .route("/api/transports/connect", post(routes::api_connect))
        .route("/api/transports/disconnect", post(routes::api_disconnect))
        // Inbound message bus
        .route("/api/v1/sentences", post(ingest::api_ingest_sentences))
        .with_state(state)
        .layer(cors)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
