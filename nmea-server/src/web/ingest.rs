//! Inbound message bus: other systems POST sentences here.
//!
//! Bus traffic is parsed into the contact database only. It is never handed
//! to listeners, retransmitted or raw-logged, so two plotters pointed at each
//! other can't loop sentences forever.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::web::AppState;

/// Largest batch accepted in one request.
const MAX_BATCH: usize = 1000;

#[derive(Deserialize)]
pub struct IngestRequest {
    /// Free-form sender name, for the log only.
    source: Option<String>,
    sentences: Vec<String>,
}

/// POST /api/v1/sentences: batch of raw sentences from the bus.
pub async fn api_ingest_sentences(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestRequest>,
) -> (StatusCode, Json<Value>) {
    if body.sentences.len() > MAX_BATCH {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({"error": format!("at most {MAX_BATCH} sentences per request")})),
        );
    }

    let mut parsed = 0u64;
    let mut labels: Vec<String> = Vec::new();
    let mut errors: Vec<Value> = Vec::new();

    for (i, sentence) in body.sentences.iter().enumerate() {
        match state.pipeline.ingest_external(sentence) {
            Ok(d) => {
                parsed += 1;
                for label in d.labels {
                    if !labels.contains(&label) {
                        labels.push(label);
                    }
                }
            }
            Err(e) => errors.push(json!({"index": i, "error": e.to_string()})),
        }
    }

    tracing::debug!(
        source = body.source.as_deref().unwrap_or("-"),
        received = body.sentences.len(),
        parsed,
        "bus sentences ingested"
    );

    (
        StatusCode::OK,
        Json(json!({
            "received": body.sentences.len(),
            "parsed": parsed,
            "contacts": labels,
            "errors": errors,
        })),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
