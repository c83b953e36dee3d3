//! Persistence layer.
//!
//! Exposes transactional key operations plus the aggregate queries needed by
//! the dashboard and admin rollups. Every mutation is atomic; aggregates may
//! be read-committed.
//!
//! Two implementations exist: [`postgres::PgPersistence`] for production,
//! backed by `sqlx::PgPool`, and [`memory::MemPersistence`] for tests, so
//! unit tests never need a live database.

mod memory;
mod postgres;

pub use memory::MemPersistence;
pub use postgres::PgPersistence;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::CoreResult;
use crate::models::{Audit, BillingRecord, Site, SiteId, Tenant, TenantId, UsageEvent};

/// Per-day usage count, used by the dashboard's 7-day activity view.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyUsage {
    pub day: NaiveDate,
    pub count: i64,
}

/// The persistence contract every component in this crate depends on.
///
/// Implementors must guarantee: insert/update/delete on a single entity are
/// atomic; tenant deletion cascades audits, sites, usage events, and billing
/// records (in that order) before removing the tenant row.
#[async_trait]
pub trait Persistence: Send + Sync {
    // -- Tenants ---------------------------------------------------------
    async fn insert_tenant(&self, tenant: &Tenant) -> CoreResult<()>;
    async fn get_tenant(&self, id: TenantId) -> CoreResult<Option<Tenant>>;
    async fn get_tenant_by_email(&self, email: &str) -> CoreResult<Option<Tenant>>;
    async fn get_tenant_by_credential_hash(&self, hash: &[u8]) -> CoreResult<Option<Tenant>>;
    async fn update_tenant(&self, tenant: &Tenant) -> CoreResult<()>;
    async fn list_tenants(&self) -> CoreResult<Vec<Tenant>>;
    async fn delete_tenant(&self, id: TenantId) -> CoreResult<()>;

    // -- Plan catalog overrides -------------------------------------------
    // The catalog itself lives in `plans::PlanCatalog`; persistence only
    // needs to know about it for admin retargeting, which re-reads tenants
    // and writes their `allowance` back. No separate plan storage is
    // required since the catalog is immutable at runtime.

    // -- Sites -------------------------------------------------------------
    async fn insert_site(&self, site: &Site) -> CoreResult<()>;
    async fn get_site(&self, id: SiteId) -> CoreResult<Option<Site>>;
    async fn get_site_by_tenant_url(&self, tenant_id: TenantId, url: &str) -> CoreResult<Option<Site>>;
    async fn list_sites_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Vec<Site>>;
    async fn list_sites_by_status(&self, status: crate::models::SiteStatus) -> CoreResult<Vec<Site>>;
    async fn update_site(&self, site: &Site) -> CoreResult<()>;

    // -- Audits --------------------------------------------------------------
    async fn insert_audit(&self, audit: &Audit) -> CoreResult<()>;
    async fn list_audits_by_site(&self, site_id: SiteId) -> CoreResult<Vec<Audit>>;

    // -- Usage events --------------------------------------------------------
    /// Appends a usage event and increments the owning tenant's denormalized
    /// `usage_count` atomically, so the counter is never incremented without
    /// a matching event row.
    async fn record_usage_event(&self, event: &UsageEvent) -> CoreResult<()>;
    async fn count_usage_events(&self, tenant_id: TenantId, cycle: &str) -> CoreResult<i64>;
    async fn delete_usage_events_before(&self, tenant_id: TenantId, before: DateTime<Utc>) -> CoreResult<()>;
    async fn daily_usage_counts(&self, tenant_id: TenantId, since: DateTime<Utc>) -> CoreResult<Vec<DailyUsage>>;

    // -- Billing history -----------------------------------------------------
    async fn insert_billing_record(&self, record: &BillingRecord) -> CoreResult<()>;
    async fn find_billing_record(
        &self,
        tenant_id: TenantId,
        cycle_start: DateTime<Utc>,
        cycle_end: DateTime<Utc>,
    ) -> CoreResult<Option<BillingRecord>>;
    async fn list_billing_records_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Vec<BillingRecord>>;
    /// Billing records whose `payment_date` falls within `[start, end)`,
    /// used by the admin revenue rollup. Grouping by plan is
    /// done by the caller since it is plain, allocation-free aggregation.
    async fn billing_records_paid_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<BillingRecord>>;

    // -- Aggregates for the dashboard -----------------------------------------
    async fn count_sites_by_tenant(&self, tenant_id: TenantId) -> CoreResult<i64>;
    async fn count_audits_by_tenant(&self, tenant_id: TenantId) -> CoreResult<i64>;
    async fn average_score_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Option<f64>>;
}
