//! End-to-end audit runs through `AuditOrchestrator` against a mocked site,
//! using `wiremock` to control the crawled responses. Billing and admin
//! rollover behavior is covered inline in `billing.rs`/`admin.rs`, closer to
//! the units they exercise.

use std::sync::Arc;

use aseo_core::billing::BillingEngine;
use aseo_core::models::{CycleKind, Site, SiteStatus};
use aseo_core::persistence::{MemPersistence, Persistence};
use aseo_core::plans::PlanCatalog;
use aseo_core::AuditOrchestrator;
use chrono::{TimeZone, Utc};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (AuditOrchestrator, Arc<dyn Persistence>, Uuid) {
    let persistence: Arc<dyn Persistence> = Arc::new(MemPersistence::new());
    let catalog = Arc::new(PlanCatalog::seeded());
    let billing = Arc::new(BillingEngine::new(persistence.clone(), catalog));
    let orchestrator = AuditOrchestrator::new(persistence.clone(), billing.clone(), 4, chrono::Duration::minutes(30));

    let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
    let (tenant, _credential) = billing
        .register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, now)
        .await
        .unwrap();

    (orchestrator, persistence, tenant.id)
}

#[tokio::test]
async fn single_page_audit_scores_55_with_three_issues() {
    let (orchestrator, persistence, tenant_id) = setup().await;

    let server = MockServer::start().await;
    let filler = "lorem ".repeat(120);
    let page = format!(
        "<html><head><title></title><meta name=\"description\" content=\"{}\"></head><body>{}</body></html>",
        "a description that is long enough to clear the seventy character floor comfortably",
        filler
    );
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string(page)).mount(&server).await;

    let site = Site {
        id: Uuid::new_v4(),
        tenant_id,
        url: server.uri(),
        name: "e".to_string(),
        status: SiteStatus::Pending,
        last_audit_id: None,
        last_score: None,
        audit_count: 0,
        settings: serde_json::json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    persistence.insert_site(&site).await.unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
    orchestrator.run_audit(site.id, site.url.clone(), tenant_id, 50, now).await;

    let refreshed = persistence.get_site(site.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, SiteStatus::Completed);
    assert_eq!(refreshed.audit_count, 1);
    assert_eq!(refreshed.last_score, Some(55.0));

    let audits = persistence.list_audits_by_site(site.id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].issues.len(), 3);

    let tenant = persistence.get_tenant(tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.usage_count, 1);
}

#[tokio::test]
async fn unreachable_start_url_fails_site_without_audit_or_usage() {
    let (orchestrator, persistence, tenant_id) = setup().await;

    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

    let site = Site {
        id: Uuid::new_v4(),
        tenant_id,
        url: server.uri(),
        name: "e".to_string(),
        status: SiteStatus::Pending,
        last_audit_id: None,
        last_score: None,
        audit_count: 0,
        settings: serde_json::json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    persistence.insert_site(&site).await.unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
    orchestrator.run_audit(site.id, site.url.clone(), tenant_id, 50, now).await;

    let refreshed = persistence.get_site(site.id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, SiteStatus::Failed);
    assert!(persistence.list_audits_by_site(site.id).await.unwrap().is_empty());

    let tenant = persistence.get_tenant(tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.usage_count, 0);
}
