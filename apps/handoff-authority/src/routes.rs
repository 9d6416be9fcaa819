use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use handoff_core::wire::{
    ActiveTokenResponse, CanGenerateResponse, ErrorBody, GenerateRequest, GenerateResponse,
    RedeemRequest, RedeemResponse, StatusQuery,
};
use handoff_core::{CoreError, HandoffPair, LedgerError, StatusReport, TokenId};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::metrics;
use crate::state::AppState;
use crate::store::StoreError;

/// Error response with a machine-readable `{"error": reason}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, reason: &'static str) -> Self {
        Self { status, reason }
    }

    /// Label used for outcome metrics.
    fn reason(&self) -> &'static str {
        self.reason
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::QrEncoding(_) => {
                error!(error = %err, "qr rendering failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "qr_encoding_failed")
            }
            _ => {
                debug!(error = %err, "rejecting malformed identifier");
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_identifier")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ledger(LedgerError::Ineligible(_)) => {
                ApiError::new(StatusCode::FORBIDDEN, "already_used")
            }
            StoreError::Ledger(LedgerError::Conflict { .. }) => {
                ApiError::new(StatusCode::CONFLICT, "active_token_exists")
            }
            StoreError::Ledger(LedgerError::NotFound | LedgerError::PairMismatch(_)) => {
                ApiError::new(StatusCode::NOT_FOUND, "token_not_found")
            }
            StoreError::Ledger(LedgerError::AlreadyUsed) => {
                ApiError::new(StatusCode::CONFLICT, "already_used")
            }
            StoreError::Ledger(LedgerError::Expired) => ApiError::new(StatusCode::GONE, "expired"),
            other => {
                error!(error = %other, "token store failure");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.reason.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    uptime_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        uptime_secs: state.uptime_secs(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

async fn can_generate(
    State(state): State<AppState>,
    Path((visa_id, page)): Path<(String, String)>,
) -> Result<Json<CanGenerateResponse>, ApiError> {
    let pair = HandoffPair::parse(&visa_id, &page)?;
    let can_generate = state.store().can_generate(&pair).await?;
    Ok(Json(CanGenerateResponse { can_generate }))
}

async fn active_token(
    State(state): State<AppState>,
    Path((visa_id, page)): Path<(String, String)>,
) -> Result<Json<ActiveTokenResponse>, ApiError> {
    let pair = HandoffPair::parse(&visa_id, &page)?;
    let response = match state.store().active_token(&pair).await? {
        Some(record) => ActiveTokenResponse::active(state.links(), &record),
        None => ActiveTokenResponse::none(&pair),
    };
    Ok(Json(response))
}

async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let pair = body.pair();
    match state.store().issue(&pair, body.replace).await {
        Ok(record) => {
            metrics::TOKENS_ISSUED.with_label_values(&["issued"]).inc();
            info!(
                %pair,
                replace = body.replace,
                expires_at = %record.expires_at,
                "issued handoff token"
            );
            let descriptor = state.links().describe(&record);
            Ok(Json(GenerateResponse::from_descriptor(&descriptor)))
        }
        Err(err) => {
            let err = ApiError::from(err);
            metrics::TOKENS_ISSUED
                .with_label_values(&[err.reason()])
                .inc();
            debug!(%pair, reason = err.reason(), "generate rejected");
            Err(err)
        }
    }
}

async fn status(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusReport>, ApiError> {
    let token = TokenId::from(token);
    let pair = query.pair();
    match state.store().status(&token, pair.as_ref()).await {
        Ok(report) => {
            metrics::STATUS_QUERIES
                .with_label_values(&[report.status.as_str()])
                .inc();
            Ok(Json(report))
        }
        Err(err) => {
            let err = ApiError::from(err);
            metrics::STATUS_QUERIES
                .with_label_values(&[err.reason()])
                .inc();
            Err(err)
        }
    }
}

/// SVG rendering of the continuation link. Only the pair's active token is
/// drawn, so a superseded or consumed code cannot be re-displayed.
async fn qr_image(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, ApiError> {
    let pair = query
        .pair()
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "invalid_identifier"))?;
    let token = TokenId::from(token);
    let record = state
        .store()
        .active_token(&pair)
        .await?
        .filter(|record| record.token == token)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "token_not_found"))?;
    let svg = state.links().describe(&record).qr_svg()?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        svg,
    )
        .into_response())
}

async fn redeem(
    State(state): State<AppState>,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let pair = body.pair();
    match state.store().redeem(&body.token, &pair).await {
        Ok(record) => {
            metrics::REDEMPTIONS.with_label_values(&["redeemed"]).inc();
            info!(%pair, "handoff token redeemed");
            Ok(Json(RedeemResponse {
                visa_id: record.pair.application_id,
                page: record.pair.step,
                redeemed_at: record.used_at.unwrap_or(record.issued_at),
            }))
        }
        Err(err) => {
            let err = ApiError::from(err);
            metrics::REDEMPTIONS.with_label_values(&[err.reason()]).inc();
            info!(%pair, reason = err.reason(), "redemption rejected");
            Err(err)
        }
    }
}

async fn reset(
    State(state): State<AppState>,
    Path((visa_id, page)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let pair = HandoffPair::parse(&visa_id, &page)?;
    state.store().reset(&pair).await?;
    info!(%pair, "handoff eligibility reset");
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/qr/can-generate/:visa_id/:page", get(can_generate))
        .route("/api/qr/active/:visa_id/:page", get(active_token))
        .route("/api/qr/generate", post(generate))
        .route("/api/qr/status/:token", get(status))
        .route("/api/qr/image/:token", get(qr_image))
        .route("/api/qr/redeem", post(redeem))
        .route("/api/qr/reset/:visa_id/:page", post(reset))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
