//! Shared application state: one `Clone`-able struct of `Arc` handles
//! passed into `axum::Router::with_state`.

use std::sync::Arc;

use aseo_core::billing::BillingEngine;
use aseo_core::config::ServiceConfig;
use aseo_core::persistence::Persistence;
use aseo_core::plans::PlanCatalog;
use aseo_core::AdminService;
use aseo_core::AuditOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub persistence: Arc<dyn Persistence>,
    pub billing: Arc<BillingEngine>,
    pub orchestrator: Arc<AuditOrchestrator>,
    pub admin: Arc<AdminService>,
    pub catalog: Arc<PlanCatalog>,
    pub admin_secret: String,
    pub cors_enabled: bool,
}

impl AppState {
    pub fn new(persistence: Arc<dyn Persistence>, config: &ServiceConfig) -> Self {
        let catalog = Arc::new(PlanCatalog::seeded());
        let retention_days = (config.orchestrator.usage_retention.as_secs() / 86_400) as i64;
        let billing = Arc::new(BillingEngine::with_retention_days(persistence.clone(), catalog.clone(), retention_days));
        let orchestrator = Arc::new(AuditOrchestrator::new(
            persistence.clone(),
            billing.clone(),
            config.orchestrator.worker_pool_size,
            chrono::Duration::from_std(config.orchestrator.stuck_running_threshold)
                .unwrap_or_else(|_| chrono::Duration::minutes(30)),
        ));
        let admin = Arc::new(AdminService::new(persistence.clone(), billing.clone(), catalog.clone()));

        Self {
            persistence,
            billing,
            orchestrator,
            admin,
            catalog,
            admin_secret: config.admin.shared_secret.clone(),
            cors_enabled: config.http.cors_enabled,
        }
    }
}
