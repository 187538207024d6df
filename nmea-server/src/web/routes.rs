//! REST API route handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use nmea_core::types::{now, Contact};

use crate::transport::TransportKind;
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Query param types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ContactParams {
    all: Option<bool>,
}

#[derive(Deserialize)]
pub struct TransportParams {
    kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn contact_json(c: &Contact, now: f64) -> Value {
    json!({
        "label": c.label,
        "name": c.name,
        "mmsi": c.mmsi,
        "lat": c.position().map(|p| p.0),
        "lon": c.position().map(|p| p.1),
        "heading": c.display_heading(),
        "cog": c.cog_deg,
        "sog": c.sog_kts,
        "ship": c.ship,
        "source": c.source,
        "first_seen": c.first_seen,
        "last_update": c.last_update,
        "age_sec": (c.age(now) * 10.0).round() / 10.0,
    })
}

fn parse_kind(kind: Option<&str>) -> Result<Option<TransportKind>, (StatusCode, Json<Value>)> {
    match kind {
        None => Ok(None),
        Some(k) => TransportKind::parse(k).map(Some).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("unknown transport kind '{k}'")})),
            )
        }),
    }
}

// ---------------------------------------------------------------------------
// Contact endpoints
// ---------------------------------------------------------------------------

/// GET /api/contacts: contacts with a fix, newest first; `?all=true`
/// includes those still waiting for a position.
pub async fn api_contacts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ContactParams>,
) -> impl IntoResponse {
    let now = now();
    let include_all = params.all.unwrap_or(false);
    let contacts: Vec<Value> = state
        .db
        .list()
        .iter()
        .filter(|c| include_all || c.has_fix())
        .map(|c| contact_json(c, now))
        .collect();
    Json(json!({"contacts": contacts, "count": contacts.len()}))
}

/// GET /api/contacts/:label
pub async fn api_contact_detail(
    State(state): State<Arc<AppState>>,
    Path(label): Path<String>,
) -> impl IntoResponse {
    match state.db.get(&label) {
        Some(contact) => {
            let track = state.db.track(&label).map(|t| t.points).unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({
                    "contact": contact_json(&contact, now()),
                    "track": track,
                })),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no contact '{label}'")})),
        ),
    }
}

/// GET /api/tracks
pub async fn api_tracks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"tracks": state.db.tracks()}))
}

// ---------------------------------------------------------------------------
// Status and transport control
// ---------------------------------------------------------------------------

/// GET /api/status: transport states, pipeline counters, contact count.
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let transports = state.transports.status();
    let connected: Vec<&str> = transports
        .iter()
        .filter(|t| t.state == crate::transport::LinkState::Connected)
        .map(|t| t.kind.as_str())
        .collect();
    Json(json!({
        "connected": state.transports.is_connected(),
        "connected_kinds": connected,
        "desired": state.transports.is_desired(),
        "transports": transports,
        "pipeline": state.pipeline.stats(),
        "contacts": state.db.len(),
        "own_ship": state.pipeline.dispatcher().own_ship_label(),
    }))
}

/// POST /api/transports/connect[?kind=udp]
pub async fn api_connect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransportParams>,
) -> (StatusCode, Json<Value>) {
    let kind = match parse_kind(params.kind.as_deref()) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let results = match kind {
        Some(kind) => vec![(kind, state.transports.connect_kind(kind).await)],
        None => state.transports.connect().await,
    };

    let mut any_failed = false;
    let outcome: Vec<Value> = results
        .iter()
        .map(|(kind, r)| match r {
            Ok(()) => json!({"kind": kind, "ok": true}),
            Err(e) => {
                any_failed = true;
                json!({"kind": kind, "ok": false, "error": e.to_string()})
            }
        })
        .collect();

    let status = if any_failed && kind.is_some() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "results": outcome,
            "connected": state.transports.is_connected(),
        })),
    )
}

/// POST /api/transports/disconnect[?kind=tcp]
pub async fn api_disconnect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransportParams>,
) -> (StatusCode, Json<Value>) {
    let kind = match parse_kind(params.kind.as_deref()) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match kind {
        Some(kind) => state.transports.disconnect_kind(kind).await,
        None => state.transports.disconnect().await,
    }
    (
        StatusCode::OK,
        Json(json!({"connected": state.transports.is_connected()})),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
