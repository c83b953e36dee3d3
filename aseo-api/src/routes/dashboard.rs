//! `GET /dashboard`: aggregate summary for a tenant.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use aseo_core::models::cycle_tag;

use crate::error::ApiError;
use crate::extractors::TenantCredential;
use crate::state::AppState;

const ACTIVITY_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
pub struct DailyActivity {
    pub day: chrono::NaiveDate,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub plan_id: String,
    pub current_usage: i64,
    pub allowance: i64,
    pub site_count: i64,
    pub audit_count: i64,
    pub average_score: Option<f64>,
    pub recent_activity: Vec<DailyActivity>,
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
) -> Result<Json<DashboardSummary>, ApiError> {
    let tenant = &gate.tenant;
    let now = Utc::now();

    let current_usage = state.persistence.count_usage_events(tenant.id, &cycle_tag(now)).await?;
    let site_count = state.persistence.count_sites_by_tenant(tenant.id).await?;
    let audit_count = state.persistence.count_audits_by_tenant(tenant.id).await?;
    let average_score = state.persistence.average_score_by_tenant(tenant.id).await?;
    let since = now - chrono::Duration::days(ACTIVITY_WINDOW_DAYS);
    let recent_activity = state
        .persistence
        .daily_usage_counts(tenant.id, since)
        .await?
        .into_iter()
        .map(|d| DailyActivity { day: d.day, count: d.count })
        .collect();

    Ok(Json(DashboardSummary {
        plan_id: tenant.plan_id.clone(),
        current_usage,
        allowance: tenant.allowance,
        site_count,
        audit_count,
        average_score,
        recent_activity,
    }))
}
