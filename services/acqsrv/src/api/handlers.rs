//! Request handlers

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use common::{AppError, HealthStatus, SuccessResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AppState;
use crate::control::{ReadResult, WriteResult};
use crate::core::poller::CycleReport;
use crate::error::AcqError;
use crate::storage::StoredParameter;

/// Query string of a write request
#[derive(Debug, Default, Deserialize)]
pub struct WriteQuery {
    pub value: Option<String>,
}

/// Unit with its member devices and last persisted availability
#[derive(Debug, Serialize)]
pub struct UnitView {
    pub unit_id: String,
    pub devices: Vec<String>,
    pub available: Option<bool>,
}

/// Liveness probe
///
/// @route GET /health
/// @output `Json<SuccessResponse<HealthStatus>>`
/// @status 200 - Service is running
pub async fn health_check(State(state): State<AppState>) -> Json<SuccessResponse<HealthStatus>> {
    Json(SuccessResponse::new(HealthStatus {
        status: "healthy".to_string(),
        service: state.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// On-demand read of a device function
///
/// @route GET /api/devices/{device}/{function}
/// @output `Json<SuccessResponse<ReadResult>>` - Decoded value
/// @status 200 - Value read
/// @status 404 - Unknown device or function
/// @status 502 - Device answered badly or not at all
/// @status 503 - Device locked by another transaction
/// @status 504 - Device timed out
pub async fn read_function(
    State(state): State<AppState>,
    Path((device, function)): Path<(String, String)>,
) -> Result<Json<SuccessResponse<ReadResult>>, AppError> {
    let result = state.control.read(&device, &function).await?;
    Ok(Json(SuccessResponse::new(result)))
}

/// On-demand write to a device control
///
/// @route POST /api/devices/{device}/{function}?value=N
/// @input Query(value): optional register value, the control default applies when missing
/// @output `Json<SuccessResponse<WriteResult>>`
/// @status 200 - Register written
/// @status 400 - Missing or malformed value
/// @status 404 - Unknown device or function
/// @status 502/503/504 - Device failure
pub async fn write_function(
    State(state): State<AppState>,
    Path((device, function)): Path<(String, String)>,
    Query(query): Query<WriteQuery>,
) -> Result<Json<SuccessResponse<WriteResult>>, AppError> {
    let value = match query.value.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
            AppError::from(AcqError::validation(format!(
                "value must be an integer 0-65535, got {}",
                raw
            )))
        })?),
    };

    let result = state.control.write(&device, &function, value).await?;
    Ok(Json(SuccessResponse::new(result)))
}

/// Units with their devices and stored availability
///
/// @route GET /api/units
/// @status 200 - Unit list
/// @status 500 - Storage unreadable
pub async fn list_units(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<UnitView>>>, AppError> {
    let stored: BTreeMap<String, bool> = state.store.load_availability().await?;
    let units = state
        .control
        .map()
        .units()
        .iter()
        .map(|(unit_id, devices)| UnitView {
            unit_id: unit_id.clone(),
            devices: devices.clone(),
            available: stored.get(unit_id).copied(),
        })
        .collect();
    Ok(Json(SuccessResponse::new(units)))
}

/// Latest stored parameter values
///
/// @route GET /api/params
/// @status 200 - Parameter rows
/// @status 500 - Storage unreadable
pub async fn list_params(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<StoredParameter>>>, AppError> {
    let rows = state.store.load_parameters().await?;
    Ok(Json(SuccessResponse::new(rows)))
}

/// Report of the last finished cycle, if any
///
/// @route GET /api/cycle
/// @status 200 - Report, or null before the first cycle
pub async fn last_cycle(State(state): State<AppState>) -> Json<SuccessResponse<Option<CycleReport>>> {
    let report = state.last_cycle.read().clone();
    Json(SuccessResponse::new(report))
}
