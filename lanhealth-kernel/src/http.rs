/**
 * API REST LANHEALTH - Serveur HTTP du kernel
 *
 * RÔLE :
 * Reçoit les rapports de santé poussés par les appareils du LAN et sert
 * le dernier rapport connu, par appareil ou pour toute la flotte.
 *
 * ROUTES :
 * - GET  /                 -> sonde de connectivité (valide aussi la clé)
 * - POST /device/report    -> stocke le rapport (remplace le précédent)
 * - GET  /device/health    -> dernier rapport, 503 si trop vieux
 * - GET  /devices/health   -> tous les rapports, sans filtre de fraîcheur
 *
 * SÉCURITÉ :
 * - Header de clé API obligatoire sur toutes les routes, y compris /
 * - Le middleware rejette avant toute validation ou écriture dans le store
 */

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::config::KernelConfig;
use crate::error::ApiError;
use crate::models::{parse_report, ApiStatus, ReportAck, ReportRecord};
use crate::state::{freshness, Freshness, ReportStore};

#[derive(Clone)]
pub struct AppState {
    pub store: ReportStore,
    pub cfg: Arc<KernelConfig>,
}

impl AppState {
    pub fn new(store: ReportStore, cfg: KernelConfig) -> Self {
        Self {
            store,
            cfg: Arc::new(cfg),
        }
    }

    fn stale_after(&self) -> Duration {
        Duration::seconds(self.cfg.stale_seconds)
    }
}

#[derive(Debug, Deserialize)]
struct HealthParams {
    device_id: String,
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ok = req
        .headers()
        .get(&app.cfg.api_key_header)
        .map(|v| v.as_bytes() == app.cfg.api_key.as_bytes())
        .unwrap_or(false);

    if !ok {
        tracing::warn!(
            method = %req.method(),
            path = %req.uri().path(),
            "[kernel] rejected request: invalid or missing api key"
        );
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/device/report", post(report_health))
        .route("/device/health", get(get_health))
        .route("/devices/health", get(all_health))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response, latency: StdDuration, _span: &Span| {
                    tracing::info!(
                        status = %res.status(),
                        latency_ms = %latency.as_millis(),
                        "response"
                    )
                }),
        )
        .with_state(app_state)
}

// GET / (validation connexion + clé côté orchestrateur)
async fn root() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "API is running",
    })
}

// POST /device/report
async fn report_health(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<ReportAck>, ApiError> {
    let (device_id, record) = parse_report(&body)?;
    let fields = record.len();
    app.store.upsert(device_id.clone(), record);
    tracing::debug!(device_id = %device_id, fields, "[kernel] report stored");

    Ok(Json(ReportAck {
        ok: true,
        stored_for: device_id,
    }))
}

// GET /device/health?device_id=...
async fn get_health(
    State(app): State<AppState>,
    params: Result<Query<HealthParams>, QueryRejection>,
) -> Result<Json<ReportRecord>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let entry = app.store.latest(&params.device_id).ok_or(ApiError::NotFound)?;

    match freshness(entry.received_at, OffsetDateTime::now_utc(), app.stale_after()) {
        Freshness::Fresh => Ok(Json(entry.record)),
        Freshness::Stale { age_seconds } => {
            tracing::info!(device_id = %params.device_id, age_seconds, "[kernel] stale report requested");
            Err(ApiError::Stale { age_seconds })
        }
    }
}

// GET /devices/health (pas de contrôle de fraîcheur ici)
async fn all_health(State(app): State<AppState>) -> Json<BTreeMap<String, ReportRecord>> {
    Json(app.store.snapshot())
}

async fn not_found() -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "detail": "Not Found" })),
    )
}
