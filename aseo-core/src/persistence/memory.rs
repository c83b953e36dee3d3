//! In-memory `Persistence` implementation used by unit and integration
//! tests, so the billing engine and audit pipeline can be exercised without
//! a live Postgres instance.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::CoreResult;
use crate::models::{
    Audit, BillingRecord, Site, SiteId, SiteStatus, Tenant, TenantId, UsageEvent,
};

use super::{DailyUsage, Persistence};

#[derive(Default)]
struct Store {
    tenants: HashMap<TenantId, Tenant>,
    sites: HashMap<SiteId, Site>,
    audits: Vec<Audit>,
    usage_events: Vec<UsageEvent>,
    billing_records: Vec<BillingRecord>,
}

/// Thread-safe in-memory persistence backend.
#[derive(Default)]
pub struct MemPersistence {
    store: RwLock<Store>,
}

impl MemPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemPersistence {
    async fn insert_tenant(&self, tenant: &Tenant) -> CoreResult<()> {
        self.store.write().await.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> CoreResult<Option<Tenant>> {
        Ok(self.store.read().await.tenants.get(&id).cloned())
    }

    async fn get_tenant_by_email(&self, email: &str) -> CoreResult<Option<Tenant>> {
        Ok(self
            .store
            .read()
            .await
            .tenants
            .values()
            .find(|t| t.email == email)
            .cloned())
    }

    async fn get_tenant_by_credential_hash(&self, hash: &[u8]) -> CoreResult<Option<Tenant>> {
        Ok(self
            .store
            .read()
            .await
            .tenants
            .values()
            .find(|t| t.credential_hash == hash)
            .cloned())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> CoreResult<()> {
        self.store.write().await.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn list_tenants(&self) -> CoreResult<Vec<Tenant>> {
        Ok(self.store.read().await.tenants.values().cloned().collect())
    }

    async fn delete_tenant(&self, id: TenantId) -> CoreResult<()> {
        let mut store = self.store.write().await;
        store.audits.retain(|a| a.tenant_id != id);
        store.sites.retain(|_, s| s.tenant_id != id);
        store.usage_events.retain(|e| e.tenant_id != id);
        store.billing_records.retain(|b| b.tenant_id != id);
        store.tenants.remove(&id);
        Ok(())
    }

    async fn insert_site(&self, site: &Site) -> CoreResult<()> {
        self.store.write().await.sites.insert(site.id, site.clone());
        Ok(())
    }

    async fn get_site(&self, id: SiteId) -> CoreResult<Option<Site>> {
        Ok(self.store.read().await.sites.get(&id).cloned())
    }

    async fn get_site_by_tenant_url(&self, tenant_id: TenantId, url: &str) -> CoreResult<Option<Site>> {
        Ok(self
            .store
            .read()
            .await
            .sites
            .values()
            .find(|s| s.tenant_id == tenant_id && s.url == url)
            .cloned())
    }

    async fn list_sites_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Vec<Site>> {
        Ok(self
            .store
            .read()
            .await
            .sites
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_sites_by_status(&self, status: SiteStatus) -> CoreResult<Vec<Site>> {
        Ok(self
            .store
            .read()
            .await
            .sites
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn update_site(&self, site: &Site) -> CoreResult<()> {
        self.store.write().await.sites.insert(site.id, site.clone());
        Ok(())
    }

    async fn insert_audit(&self, audit: &Audit) -> CoreResult<()> {
        self.store.write().await.audits.push(audit.clone());
        Ok(())
    }

    async fn list_audits_by_site(&self, site_id: SiteId) -> CoreResult<Vec<Audit>> {
        Ok(self
            .store
            .read()
            .await
            .audits
            .iter()
            .filter(|a| a.site_id == site_id)
            .cloned()
            .collect())
    }

    async fn record_usage_event(&self, event: &UsageEvent) -> CoreResult<()> {
        let mut store = self.store.write().await;
        store.usage_events.push(event.clone());
        if let Some(tenant) = store.tenants.get_mut(&event.tenant_id) {
            tenant.usage_count += 1;
            tenant.updated_at = event.created_at;
        }
        Ok(())
    }

    async fn count_usage_events(&self, tenant_id: TenantId, cycle: &str) -> CoreResult<i64> {
        Ok(self
            .store
            .read()
            .await
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.billing_cycle == cycle)
            .count() as i64)
    }

    async fn delete_usage_events_before(&self, tenant_id: TenantId, before: DateTime<Utc>) -> CoreResult<()> {
        self.store
            .write()
            .await
            .usage_events
            .retain(|e| !(e.tenant_id == tenant_id && e.created_at < before));
        Ok(())
    }

    async fn daily_usage_counts(&self, tenant_id: TenantId, since: DateTime<Utc>) -> CoreResult<Vec<DailyUsage>> {
        let store = self.store.read().await;
        let mut counts: HashMap<chrono::NaiveDate, i64> = HashMap::new();
        for event in store
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.created_at >= since)
        {
            *counts.entry(event.created_at.date_naive()).or_insert(0) += 1;
        }
        let mut result: Vec<DailyUsage> = counts
            .into_iter()
            .map(|(day, count)| DailyUsage { day, count })
            .collect();
        result.sort_by_key(|d| d.day);
        Ok(result)
    }

    async fn insert_billing_record(&self, record: &BillingRecord) -> CoreResult<()> {
        self.store.write().await.billing_records.push(record.clone());
        Ok(())
    }

    async fn find_billing_record(
        &self,
        tenant_id: TenantId,
        cycle_start: DateTime<Utc>,
        cycle_end: DateTime<Utc>,
    ) -> CoreResult<Option<BillingRecord>> {
        Ok(self
            .store
            .read()
            .await
            .billing_records
            .iter()
            .find(|b| b.tenant_id == tenant_id && b.cycle_start == cycle_start && b.cycle_end == cycle_end)
            .cloned())
    }

    async fn list_billing_records_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Vec<BillingRecord>> {
        Ok(self
            .store
            .read()
            .await
            .billing_records
            .iter()
            .filter(|b| b.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn billing_records_paid_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<BillingRecord>> {
        Ok(self
            .store
            .read()
            .await
            .billing_records
            .iter()
            .filter(|b| matches!(b.payment_date, Some(d) if d >= start && d < end))
            .cloned()
            .collect())
    }

    async fn count_sites_by_tenant(&self, tenant_id: TenantId) -> CoreResult<i64> {
        Ok(self
            .store
            .read()
            .await
            .sites
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .count() as i64)
    }

    async fn count_audits_by_tenant(&self, tenant_id: TenantId) -> CoreResult<i64> {
        Ok(self
            .store
            .read()
            .await
            .audits
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .count() as i64)
    }

    async fn average_score_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Option<f64>> {
        let store = self.store.read().await;
        let scores: Vec<f64> = store
            .audits
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .map(|a| a.score)
            .collect();
        if scores.is_empty() {
            return Ok(None);
        }
        Ok(Some(scores.iter().sum::<f64>() / scores.len() as f64))
    }
}
