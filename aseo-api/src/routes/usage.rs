//! `GET /usage`: current-cycle usage snapshot.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use aseo_core::billing::Alert;
use aseo_core::models::cycle_tag;

use crate::error::ApiError;
use crate::extractors::TenantCredential;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UsageSnapshot {
    pub plan_id: String,
    pub current_usage: i64,
    pub allowance: i64,
    pub remaining: i64,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub days_left: i64,
    pub alerts: Vec<Alert>,
}

pub async fn get_usage(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
) -> Result<Json<UsageSnapshot>, ApiError> {
    let tenant = &gate.tenant;
    let now = Utc::now();
    let current_usage = state
        .persistence
        .count_usage_events(tenant.id, &cycle_tag(now))
        .await?;
    let alerts = state.billing.alerts(tenant.id, now).await?;

    Ok(Json(UsageSnapshot {
        plan_id: tenant.plan_id.clone(),
        current_usage,
        allowance: tenant.allowance,
        remaining: (tenant.allowance - current_usage).max(0),
        cycle_start: tenant.cycle_start,
        cycle_end: tenant.cycle_end,
        days_left: (tenant.cycle_end - now).num_days().max(0),
        alerts,
    }))
}
