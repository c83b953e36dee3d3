//! Admin routes: plan catalog retargeting and revenue rollups, both
//! shared-secret gated like `POST /billing/reset`.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aseo_core::admin::RevenueReport;

use crate::error::ApiError;
use crate::extractors::AdminSecret;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub allowance: i64,
    pub price_monthly: f64,
    pub price_yearly: f64,
}

pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanSummary>> {
    Json(
        state
            .catalog
            .all()
            .iter()
            .map(|p| PlanSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                allowance: p.allowance,
                price_monthly: p.price_monthly,
                price_yearly: p.price_yearly,
            })
            .collect(),
    )
}

#[derive(Debug, Serialize)]
pub struct RetargetSummary {
    pub tenants_updated: usize,
}

pub async fn retarget_allowances(
    State(state): State<AppState>,
    _admin: AdminSecret,
) -> Result<Json<RetargetSummary>, ApiError> {
    let tenants_updated = state.admin.retarget_allowances(Utc::now()).await?;
    Ok(Json(RetargetSummary { tenants_updated }))
}

#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub async fn revenue(
    State(state): State<AppState>,
    _admin: AdminSecret,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<RevenueReport>, ApiError> {
    let report = state.admin.revenue(query.start, query.end).await?;
    Ok(Json(report))
}
