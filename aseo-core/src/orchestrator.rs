//! Audit orchestrator: the background pipeline that crawls, scores, and
//! records a site audit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer;
use crate::billing::BillingEngine;
use crate::crawler::Crawler;
use crate::errors::CoreResult;
use crate::models::{cycle_tag, Audit, SiteId, SiteStatus, TenantId};
use crate::persistence::Persistence;

/// Quota-guarded background task runner for site audits, bounded by a
/// `tokio::sync::Semaphore` so the worker pool has a fixed ceiling rather
/// than growing unboundedly with queued audits.
pub struct AuditOrchestrator {
    persistence: Arc<dyn Persistence>,
    billing: Arc<BillingEngine>,
    permits: Arc<Semaphore>,
    worker_pool_size: usize,
    stuck_running_threshold: chrono::Duration,
}

impl AuditOrchestrator {
    pub fn new(persistence: Arc<dyn Persistence>, billing: Arc<BillingEngine>, worker_pool_size: usize, stuck_running_threshold: chrono::Duration) -> Self {
        let worker_pool_size = worker_pool_size.max(1);
        Self {
            persistence,
            billing,
            permits: Arc::new(Semaphore::new(worker_pool_size)),
            worker_pool_size,
            stuck_running_threshold,
        }
    }

    /// Number of audit workers currently busy, surfaced by the liveness
    /// endpoint as an operational diagnostic.
    pub fn active_worker_count(&self) -> usize {
        self.worker_pool_size.saturating_sub(self.permits.available_permits())
    }

    /// Startup recovery sweep: sites stuck in `running` longer than the
    /// configured threshold are reset to `failed`.
    pub async fn recover_stuck_sites(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let running = self.persistence.list_sites_by_status(SiteStatus::Running).await?;
        let mut recovered = 0;
        for mut site in running {
            if now - site.updated_at >= self.stuck_running_threshold {
                site.status = SiteStatus::Failed;
                site.updated_at = now;
                self.persistence.update_site(&site).await?;
                recovered += 1;
                warn!(site_id = %site.id, "recovered stuck running site at startup");
            }
        }
        Ok(recovered)
    }

    /// Queues an audit. Acquires a worker permit, then runs the pipeline to
    /// completion; the permit is released when the returned future resolves.
    /// The caller should `tokio::spawn` this so the HTTP response returns as
    /// soon as the audit is queued.
    pub async fn run_audit(&self, site_id: SiteId, url: String, tenant_id: TenantId, max_pages: i64, now: DateTime<Utc>) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(site_id = %site_id, "orchestrator semaphore closed, dropping audit");
                return;
            }
        };
        let _permit = permit;

        if let Err(err) = self.run_audit_inner(site_id, &url, tenant_id, max_pages, now).await {
            error!(site_id = %site_id, error = %err, "audit pipeline failed");
            if let Err(mark_err) = self.mark_site_failed(site_id, now).await {
                error!(site_id = %site_id, error = %mark_err, "failed to mark site as failed after pipeline error");
            }
        }
    }

    async fn run_audit_inner(&self, site_id: SiteId, url: &str, tenant_id: TenantId, max_pages: i64, now: DateTime<Utc>) -> CoreResult<()> {
        // Step 1: re-check the quota gate. A denial fails the audit without
        // ever transitioning the site to `running`.
        if self.billing.roll_if_expired(tenant_id, now).await.is_err() {
            self.mark_site_failed(site_id, now).await?;
            return Ok(());
        }
        let tenant = match self.persistence.get_tenant(tenant_id).await? {
            Some(t) => t,
            None => {
                self.mark_site_failed(site_id, now).await?;
                return Ok(());
            }
        };
        if tenant.subscription_status != crate::models::SubscriptionStatus::Active {
            self.mark_site_failed(site_id, now).await?;
            return Ok(());
        }
        let cycle = cycle_tag(now);
        let current_usage = self.persistence.count_usage_events(tenant_id, &cycle).await?;
        if current_usage >= tenant.allowance {
            self.mark_site_failed(site_id, now).await?;
            return Ok(());
        }

        // Step 2: transition to running.
        let mut site = self
            .persistence
            .get_site(site_id)
            .await?
            .ok_or_else(|| crate::errors::CoreError::NotFound(format!("site {site_id}")))?;
        site.status = SiteStatus::Running;
        site.updated_at = now;
        self.persistence.update_site(&site).await?;

        // Step 3: crawl. A crawl that yields no pages at all (the start URL
        // itself was unreachable) is treated as a failed audit rather than a
        // zero-page one, so the site ends `failed` with no audit row or
        // usage event.
        let crawler = Crawler::new()?;
        let pages = crawler.crawl(url, max_pages).await;
        if pages.is_empty() {
            return Err(crate::errors::CoreError::Internal(anyhow::anyhow!(
                "crawl of {url} produced no reachable pages"
            )));
        }

        // Step 4: analyze.
        let result = analyzer::analyze(&pages);

        // Step 5: persist the audit.
        let audit = Audit {
            id: Uuid::new_v4(),
            site_id,
            tenant_id,
            score: result.score,
            issues: result.issues,
            pages_analyzed: pages.len() as i64,
            created_at: now,
            billing_cycle: cycle,
        };
        self.persistence.insert_audit(&audit).await?;

        // Step 6: transition to completed.
        site.status = SiteStatus::Completed;
        site.last_audit_id = Some(audit.id);
        site.last_score = Some(audit.score);
        site.audit_count += 1;
        site.updated_at = now;
        self.persistence.update_site(&site).await?;

        // Step 7: record usage for the completed audit.
        self.billing.record_usage(tenant_id, "audit_completed", Some(site_id.to_string()), now).await?;

        info!(site_id = %site_id, score = audit.score, pages = audit.pages_analyzed, "audit completed");
        Ok(())
    }

    async fn mark_site_failed(&self, site_id: SiteId, now: DateTime<Utc>) -> CoreResult<()> {
        if let Some(mut site) = self.persistence.get_site(site_id).await? {
            site.status = SiteStatus::Failed;
            site.updated_at = now;
            self.persistence.update_site(&site).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Site, SubscriptionStatus, Tenant};
    use crate::plans::PlanCatalog;
    use crate::persistence::MemPersistence;
    use chrono::TimeZone;

    async fn setup() -> (AuditOrchestrator, Arc<dyn Persistence>, Tenant, Site) {
        let persistence: Arc<dyn Persistence> = Arc::new(MemPersistence::new());
        let billing = Arc::new(BillingEngine::new(persistence.clone(), Arc::new(PlanCatalog::seeded())));
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, _credential) = billing
            .register_tenant("A".into(), "a@x".into(), "free", crate::models::CycleKind::Monthly, now)
            .await
            .unwrap();

        let site = Site {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            url: "https://e.test".to_string(),
            name: "e".to_string(),
            status: SiteStatus::Pending,
            last_audit_id: None,
            last_score: None,
            audit_count: 0,
            settings: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        persistence.insert_site(&site).await.unwrap();

        let orchestrator = AuditOrchestrator::new(persistence.clone(), billing, 4, chrono::Duration::minutes(30));
        (orchestrator, persistence, tenant, site)
    }

    #[tokio::test]
    async fn recovery_sweep_fails_stale_running_sites() {
        let (orchestrator, persistence, _tenant, mut site) = setup().await;
        site.status = SiteStatus::Running;
        site.updated_at = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        persistence.update_site(&site).await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        let recovered = orchestrator.recover_stuck_sites(now).await.unwrap();
        assert_eq!(recovered, 1);

        let refreshed = persistence.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, SiteStatus::Failed);
    }

    #[tokio::test]
    async fn gate_denial_fails_site_without_crawling() {
        let (orchestrator, persistence, tenant, site) = setup().await;

        let mut suspended = tenant.clone();
        suspended.subscription_status = SubscriptionStatus::PastDue;
        persistence.update_tenant(&suspended).await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        orchestrator.run_audit(site.id, site.url.clone(), tenant.id, 50, now).await;

        let refreshed = persistence.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, SiteStatus::Failed);
        assert!(persistence.list_audits_by_site(site.id).await.unwrap().is_empty());
    }
}
