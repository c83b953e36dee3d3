//! REST surface composition: handlers grouped into one module per concern
//! (tenants, sites, usage, billing, dashboard, admin) and merged into a
//! single router.

pub mod admin;
pub mod billing;
pub mod dashboard;
pub mod health;
pub mod sites;
pub mod tenants;
pub mod usage;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors_enabled = state.cors_enabled;
    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/tenants", post(tenants::register_tenant))
        .route("/tenants/{id}/plan", post(tenants::change_plan))
        .route("/tenants/credential/rotate", post(tenants::rotate_credential))
        .route("/sites", post(sites::register_site).get(sites::list_sites))
        .route("/sites/{id}", get(sites::get_site))
        .route("/sites/{id}/audits", get(sites::list_site_audits))
        .route("/sites/{id}/audit", post(sites::queue_audit))
        .route("/usage", get(usage::get_usage))
        .route("/billing/history", get(billing::billing_history))
        .route("/billing/reset", post(billing::force_reset))
        .route("/dashboard", get(dashboard::get_dashboard))
        .route("/admin/plans", get(admin::list_plans))
        .route("/admin/retarget", post(admin::retarget_allowances))
        .route("/admin/revenue", get(admin::revenue))
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}
