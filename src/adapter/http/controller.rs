use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::middleware::Caller;
use crate::app_state::AppState;
use crate::domain::error::{EngineError, ErrorImpact};
use crate::domain::model::booking::BookingRecord;
use crate::domain::model::channel::ChannelId;
use crate::domain::model::currency::ExchangeRateSnapshot;
use crate::repository::rule_store::RuleFormat;
use crate::usecase::forecast_metric::ForecastRequest;
use crate::usecase::generate_report::{ReportFormat, ReportRequest};

// Respuesta genérica con posible error
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse { success: true, code: None, message: None, data: Some(data) }
    }

    pub fn error(code: &str, msg: &str) -> Self {
        ApiResponse { success: false, code: Some(code.to_string()), message: Some(msg.to_string()), data: None }
    }
}

/// Error de caso de uso traducido a HTTP.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err.kind() {
        "unsupported_format" => StatusCode::NOT_IMPLEMENTED,
        "unknown_principal" => StatusCode::UNAUTHORIZED,
        "read_only_scope" | "column_restricted" | "forbidden" => StatusCode::FORBIDDEN,
        "alert_not_found" | "delivery_not_found" => StatusCode::NOT_FOUND,
        "duplicate_record" => StatusCode::CONFLICT,
        "insufficient_history" | "degenerate_series" => StatusCode::UNPROCESSABLE_ENTITY,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "store_unavailable" | "directory_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => match err.impact() {
            ErrorImpact::NonRecoverable => StatusCode::BAD_REQUEST,
            ErrorImpact::Recoverable => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        (status, Json(ApiResponse::<()>::error(self.0.kind(), &self.0.to_string()))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn ok<T: Serialize>(status: StatusCode, data: T) -> ApiResult {
    Ok((status, Json(ApiResponse::success(data))).into_response())
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok", "time": Utc::now() })))
}

/// POST /api/v1/reports
pub async fn generate_report(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    Json(req): Json<ReportRequest>,
) -> ApiResult {
    let report = state.reports.execute(&principal, req).await?;
    info!(metric = %report.result.metric, rows = report.result.rows.len(), "report served");
    match report.format {
        ReportFormat::Csv => Ok((StatusCode::OK, [(header::CONTENT_TYPE, report.content_type)], report.body).into_response()),
        _ => ok(StatusCode::OK, report.result.as_ref()),
    }
}

/// POST /api/v1/forecasts
pub async fn forecast_metric(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    Json(req): Json<ForecastRequest>,
) -> ApiResult {
    let outcome = state.forecasts.execute(&principal, req).await?;
    ok(StatusCode::OK, outcome)
}

/// POST /api/v1/bookings
pub async fn ingest_bookings(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    Json(records): Json<Vec<BookingRecord>>,
) -> ApiResult {
    let summary = state.ingest.execute(&principal, records).await?;
    ok(StatusCode::CREATED, summary)
}

/// POST /api/v1/rules (JSON o YAML según Content-Type)
pub async fn register_rule(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let format = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(RuleFormat::from_content_type)
        .unwrap_or(RuleFormat::Json);
    let version = state.register_rule.execute(&principal, &body, format).await?;
    ok(StatusCode::CREATED, version)
}

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
    #[serde(default)]
    pub rates: Option<ExchangeRateSnapshot>,
}

/// POST /api/v1/rules/evaluate
pub async fn evaluate_rules(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult {
    let as_of = req.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let summary = state.evaluate_rules.execute_for(&principal, as_of, req.rates.as_ref()).await?;
    ok(StatusCode::OK, summary)
}

/// GET /api/v1/alerts/:id
pub async fn get_alert(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    Path(alert_id): Path<Uuid>,
) -> ApiResult {
    let alert = state.track_alert.get(&principal, alert_id).await?;
    ok(StatusCode::OK, alert)
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationRequest {
    pub channel: ChannelId,
}

/// POST /api/v1/alerts/:id/confirmations
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Extension(Caller(principal)): Extension<Caller>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<ConfirmationRequest>,
) -> ApiResult {
    let alert = state.track_alert.confirm(&principal, alert_id, req.channel).await?;
    ok(StatusCode::OK, alert)
}

/// GET /api/v1/inbox
pub async fn inbox(State(state): State<AppState>, Extension(Caller(principal)): Extension<Caller>) -> ApiResult {
    let items = state.inbox.inbox(&principal).await;
    ok(StatusCode::OK, items)
}
