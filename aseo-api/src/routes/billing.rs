//! `GET /billing/history`, `POST /billing/reset` (admin-only).

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use aseo_core::models::BillingRecord;

use crate::error::ApiError;
use crate::extractors::{AdminSecret, TenantCredential};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BillingRecordResponse {
    pub id: Uuid,
    pub plan_id: String,
    pub cycle_start: chrono::DateTime<Utc>,
    pub cycle_end: chrono::DateTime<Utc>,
    pub usage: i64,
    pub overage: i64,
    pub status: &'static str,
    pub amount: Option<f64>,
}

impl From<BillingRecord> for BillingRecordResponse {
    fn from(record: BillingRecord) -> Self {
        Self {
            id: record.id,
            plan_id: record.plan_id,
            cycle_start: record.cycle_start,
            cycle_end: record.cycle_end,
            usage: record.usage,
            overage: record.overage,
            status: record.status.as_str(),
            amount: record.amount,
        }
    }
}

pub async fn billing_history(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
) -> Result<Json<Vec<BillingRecordResponse>>, ApiError> {
    let records = state.persistence.list_billing_records_by_tenant(gate.tenant.id).await?;
    Ok(Json(records.into_iter().map(BillingRecordResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct ResetSummary {
    pub tenants_rolled: usize,
}

pub async fn force_reset(
    State(state): State<AppState>,
    _admin: AdminSecret,
) -> Result<Json<ResetSummary>, ApiError> {
    let tenants_rolled = state.admin.force_reset_all(Utc::now()).await?;
    Ok(Json(ResetSummary { tenants_rolled }))
}
