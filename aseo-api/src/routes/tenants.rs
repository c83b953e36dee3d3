//! `POST /tenants`, `POST /tenants/{id}/plan`, `POST /tenants/credential/rotate`.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aseo_core::models::CycleKind;

use crate::error::ApiError;
use crate::extractors::{AdminSecret, TenantCredential};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterTenantRequest {
    pub name: String,
    pub email: String,
    pub plan_type: String,
    pub billing_cycle: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterTenantResponse {
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub plan_id: String,
    pub allowance: i64,
    pub api_key: String,
}

pub async fn register_tenant(
    State(state): State<AppState>,
    Json(request): Json<RegisterTenantRequest>,
) -> Result<(axum::http::StatusCode, Json<RegisterTenantResponse>), ApiError> {
    let cycle_kind = parse_cycle_kind(&request.billing_cycle);
    let (tenant, api_key) = state
        .billing
        .register_tenant(request.name, request.email, &request.plan_type, cycle_kind, Utc::now())
        .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(RegisterTenantResponse {
            tenant_id: tenant.id,
            name: tenant.name,
            email: tenant.email,
            plan_id: tenant.plan_id,
            allowance: tenant.allowance,
            api_key,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: String,
    pub billing_cycle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangePlanResponse {
    pub tenant_id: Uuid,
    pub plan_id: String,
    pub allowance: i64,
    pub cycle_end: chrono::DateTime<Utc>,
}

pub async fn change_plan(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    _admin: AdminSecret,
    Json(request): Json<ChangePlanRequest>,
) -> Result<Json<ChangePlanResponse>, ApiError> {
    let cycle_kind = request.billing_cycle.as_deref().map(parse_cycle_kind);
    let tenant = state
        .billing
        .change_plan(tenant_id, &request.plan_id, cycle_kind, Utc::now())
        .await?;

    Ok(Json(ChangePlanResponse {
        tenant_id: tenant.id,
        plan_id: tenant.plan_id,
        allowance: tenant.allowance,
        cycle_end: tenant.cycle_end,
    }))
}

#[derive(Debug, Serialize)]
pub struct RotateCredentialResponse {
    pub tenant_id: Uuid,
    pub api_key: String,
}

/// Rotates the calling tenant's own credential. The prior credential stops
/// resolving the instant this call completes.
pub async fn rotate_credential(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
) -> Result<Json<RotateCredentialResponse>, ApiError> {
    let (tenant, api_key) = state.billing.rotate_credential(gate.tenant.id, Utc::now()).await?;
    Ok(Json(RotateCredentialResponse { tenant_id: tenant.id, api_key }))
}

fn parse_cycle_kind(value: &str) -> CycleKind {
    match value {
        "yearly" => CycleKind::Yearly,
        _ => CycleKind::Monthly,
    }
}
