use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::{error, info};

use crate::ingest::TransferObservation;
use crate::ledger::{LedgerError, Thresholds};

use super::types::{
    ErrorResponse, GetQuotaResponse, ListQuotasResponse, QuotaView, ReportTransferRequest,
    ReportTransferResponse, RunAggregationResponse, SetLimitRequest, SetThresholdsRequest,
    SetThresholdsResponse, StatusResponse, UpsertActivityCounterRequest,
};
use super::ApiState;

const MAX_ACCOUNT_ID_LEN: usize = 64;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn validate_account_id(account_id: &str) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if account_id.trim().is_empty() {
        return Err(bad_request("invalid_account_id", "account_id cannot be empty"));
    }
    if account_id.len() > MAX_ACCOUNT_ID_LEN {
        return Err(bad_request("invalid_account_id", "account_id too long"));
    }
    Ok(())
}

pub async fn report_transfer(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ReportTransferRequest>,
) -> ApiResult<ReportTransferResponse> {
    validate_account_id(&request.account_id)?;
    if request.bytes < 0 {
        return Err(bad_request("invalid_bytes", "bytes cannot be negative"));
    }

    let outcome = state
        .pipeline
        .report(TransferObservation {
            probe: request.probe,
            account_id: request.account_id,
            bytes: request.bytes,
            object_id: request.object_id,
            action: request.action,
            path: request.path,
            observed_at: Utc::now(),
        })
        .await;

    Ok(Json(ReportTransferResponse { outcome }))
}

pub async fn list_quotas(State(state): State<Arc<ApiState>>) -> ApiResult<ListQuotasResponse> {
    let records = state.ledger.list_quotas().map_err(internal_error)?;
    let thresholds = state.ledger.thresholds().map_err(internal_error)?;

    Ok(Json(ListQuotasResponse {
        quotas: records.into_iter().map(QuotaView::from).collect(),
        warning_threshold_pct: thresholds.warning_pct,
        critical_threshold_pct: thresholds.critical_pct,
    }))
}

pub async fn get_quota(
    State(state): State<Arc<ApiState>>,
    Path(account_id): Path<String>,
) -> ApiResult<GetQuotaResponse> {
    validate_account_id(&account_id)?;

    let record = state.ledger.get_quota(&account_id).map_err(internal_error)?;
    Ok(Json(GetQuotaResponse {
        quota: QuotaView::from(record),
    }))
}

pub async fn set_limit(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SetLimitRequest>,
) -> ApiResult<StatusResponse> {
    validate_account_id(&request.account_id)?;
    if request.limit_bytes < 0 {
        return Err(bad_request("invalid_limit", "limit_bytes cannot be negative"));
    }

    state
        .ledger
        .set_quota(&request.account_id, request.limit_bytes)
        .await
        .map_err(internal_error)?;

    Ok(Json(StatusResponse { success: true }))
}

pub async fn set_thresholds(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SetThresholdsRequest>,
) -> ApiResult<SetThresholdsResponse> {
    let thresholds = Thresholds {
        warning_pct: request.warning_pct,
        critical_pct: request.critical_pct,
    };

    let accounts_checked = match state.ledger.set_thresholds(thresholds).await {
        Ok(count) => count,
        Err(LedgerError::InvalidThresholds(message)) => {
            return Err(bad_request("invalid_thresholds", &message));
        }
        Err(err) => return Err(internal_error(err)),
    };

    info!(
        warning_pct = request.warning_pct,
        critical_pct = request.critical_pct,
        accounts_checked,
        "thresholds updated"
    );

    Ok(Json(SetThresholdsResponse { accounts_checked }))
}

pub async fn reset_quota(
    State(state): State<Arc<ApiState>>,
    Path(account_id): Path<String>,
) -> ApiResult<StatusResponse> {
    validate_account_id(&account_id)?;

    state.ledger.reset_usage(&account_id).map_err(internal_error)?;
    Ok(Json(StatusResponse { success: true }))
}

pub async fn upsert_activity_counter(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<UpsertActivityCounterRequest>,
) -> ApiResult<StatusResponse> {
    validate_account_id(&request.account_id)?;
    if request.download_count < 0 {
        return Err(bad_request(
            "invalid_count",
            "download_count cannot be negative",
        ));
    }

    state
        .storage
        .upsert_activity_count(&request.account_id, request.download_count, Utc::now())
        .map_err(internal_error)?;

    Ok(Json(StatusResponse { success: true }))
}

pub async fn run_aggregation(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<RunAggregationResponse> {
    let stats = state.aggregation.run_once().await.map_err(internal_error)?;
    Ok(Json(RunAggregationResponse { stats }))
}

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "transfer-quota-monitor"
    })))
}

fn bad_request(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %err, "quota API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            details: Some(serde_json::json!({ "message": err.to_string() })),
        }),
    )
}
