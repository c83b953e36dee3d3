//! `POST /sites`, `GET /sites`, `GET /sites/{id}`, `GET /sites/{id}/audits`,
//! `POST /sites/{id}/audit`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aseo_core::models::{Audit, Issue, Site, SiteStatus};
use aseo_core::CoreError;

use crate::error::ApiError;
use crate::extractors::TenantCredential;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterSiteRequest {
    pub url: String,
    pub name: Option<String>,
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SiteResponse {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub status: &'static str,
    pub last_audit_id: Option<Uuid>,
    pub last_score: Option<f64>,
    pub audit_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Site> for SiteResponse {
    fn from(site: Site) -> Self {
        Self {
            id: site.id,
            url: site.url,
            name: site.name,
            status: site.status.as_str(),
            last_audit_id: site.last_audit_id,
            last_score: site.last_score,
            audit_count: site.audit_count,
            created_at: site.created_at,
        }
    }
}

pub async fn register_site(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
    Json(request): Json<RegisterSiteRequest>,
) -> Result<(StatusCode, Json<SiteResponse>), ApiError> {
    let tenant_id = gate.tenant.id;

    if state
        .persistence
        .get_site_by_tenant_url(tenant_id, &request.url)
        .await?
        .is_some()
    {
        return Err(CoreError::DuplicateResource(format!("site with url {}", request.url)).into());
    }

    let now = Utc::now();
    let site = Site {
        id: Uuid::new_v4(),
        tenant_id,
        url: request.url,
        name: request.name.unwrap_or_default(),
        status: SiteStatus::Pending,
        last_audit_id: None,
        last_score: None,
        audit_count: 0,
        settings: request.settings.unwrap_or_else(|| serde_json::json!({})),
        created_at: now,
        updated_at: now,
    };
    state.persistence.insert_site(&site).await?;

    Ok((StatusCode::CREATED, Json(site.into())))
}

pub async fn list_sites(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
) -> Result<Json<Vec<SiteResponse>>, ApiError> {
    let sites = state.persistence.list_sites_by_tenant(gate.tenant.id).await?;
    Ok(Json(sites.into_iter().map(SiteResponse::from).collect()))
}

async fn owned_site(state: &AppState, tenant_id: Uuid, site_id: Uuid) -> Result<Site, ApiError> {
    let site = state
        .persistence
        .get_site(site_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("site {site_id}")))?;
    if site.tenant_id != tenant_id {
        return Err(CoreError::NotFound(format!("site {site_id}")).into());
    }
    Ok(site)
}

pub async fn get_site(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
    Path(site_id): Path<Uuid>,
) -> Result<Json<SiteResponse>, ApiError> {
    let site = owned_site(&state, gate.tenant.id, site_id).await?;
    Ok(Json(site.into()))
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub id: Uuid,
    pub score: f64,
    pub issues: Vec<Issue>,
    pub pages_analyzed: i64,
    pub created_at: DateTime<Utc>,
    pub billing_cycle: String,
}

impl From<Audit> for AuditResponse {
    fn from(audit: Audit) -> Self {
        Self {
            id: audit.id,
            score: audit.score,
            issues: audit.issues,
            pages_analyzed: audit.pages_analyzed,
            created_at: audit.created_at,
            billing_cycle: audit.billing_cycle,
        }
    }
}

pub async fn list_site_audits(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
    Path(site_id): Path<Uuid>,
) -> Result<Json<Vec<AuditResponse>>, ApiError> {
    owned_site(&state, gate.tenant.id, site_id).await?;
    let audits = state.persistence.list_audits_by_site(site_id).await?;
    Ok(Json(audits.into_iter().map(AuditResponse::from).collect()))
}

pub async fn queue_audit(
    State(state): State<AppState>,
    TenantCredential(gate): TenantCredential,
    Path(site_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let site = owned_site(&state, gate.tenant.id, site_id).await?;
    let plan = state.catalog.resolve(&gate.tenant.plan_id);

    let orchestrator = state.orchestrator.clone();
    let tenant_id = gate.tenant.id;
    let url = site.url.clone();
    let now = Utc::now();
    tokio::spawn(async move {
        orchestrator.run_audit(site.id, url, tenant_id, plan.max_pages_per_audit, now).await;
    });

    Ok(StatusCode::ACCEPTED)
}
