//! Billing engine: cycle lifecycle, usage accounting, quota gate, overage
//! calculation, and invoice assembly.
//!
//! Per-tenant serialization uses `dashmap` to hold one `tokio::sync::Mutex`
//! per tenant, so that rollover and usage-append for the same tenant are
//! serialized while distinct tenants never contend.

use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credentials::CredentialService;
use crate::errors::{CoreError, CoreResult, GateError};
use crate::models::{
    cycle_tag, BillingRecord, BillingRecordStatus, CycleKind, SubscriptionStatus, Tenant, TenantId,
    UsageEvent,
};
use crate::persistence::Persistence;
use crate::plans::PlanCatalog;

/// Usage events older than this are pruned at rollover.
pub const RETENTION_DAYS: i64 = 90;

/// Alert emitted by `BillingEngine::alerts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    UsageThreshold { percent: u8, current_usage: i64, limit: i64 },
    CycleEndingSoon { days_left: i64 },
}

/// Result of a successful `authenticate_and_gate` call.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub tenant: Tenant,
    pub current_usage: i64,
    pub limit: i64,
    pub remaining: i64,
    pub days_left: i64,
}

pub struct BillingEngine {
    persistence: Arc<dyn Persistence>,
    catalog: Arc<PlanCatalog>,
    credentials: CredentialService,
    tenant_locks: DashMap<TenantId, Arc<tokio::sync::Mutex<()>>>,
    retention_days: i64,
}

impl BillingEngine {
    pub fn new(persistence: Arc<dyn Persistence>, catalog: Arc<PlanCatalog>) -> Self {
        Self::with_retention_days(persistence, catalog, RETENTION_DAYS)
    }

    /// Same as `new`, but with an explicit usage-event retention window
    /// (config's `OrchestratorConfig::usage_retention`), applied at rollover.
    pub fn with_retention_days(persistence: Arc<dyn Persistence>, catalog: Arc<PlanCatalog>, retention_days: i64) -> Self {
        Self {
            persistence,
            catalog,
            credentials: CredentialService::new(),
            tenant_locks: DashMap::new(),
            retention_days,
        }
    }

    fn lock_for(&self, tenant_id: TenantId) -> Arc<tokio::sync::Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Computes the next cycle boundary from `now`, clamping the day of
    /// month to the target month's last day when `now`'s day doesn't exist
    /// there (e.g. Jan 31 -> Feb 28).
    pub fn next_boundary(now: DateTime<Utc>, cycle_kind: CycleKind) -> DateTime<Utc> {
        match cycle_kind {
            CycleKind::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                let day = now.day().min(days_in_month(year, month));
                rebuild(now, year, month, day)
            }
            CycleKind::Yearly => {
                let year = now.year() + 1;
                let day = now.day().min(days_in_month(year, now.month()));
                rebuild(now, year, now.month(), day)
            }
        }
    }

    /// Operation 1: initializes a fresh billing cycle starting at `now`.
    pub fn initialize_cycle(now: DateTime<Utc>, cycle_kind: CycleKind) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
        (now, Self::next_boundary(now, cycle_kind), now)
    }

    /// Registers a brand-new tenant with a fresh cycle and issues its
    /// credential. The plaintext credential is returned exactly once.
    pub async fn register_tenant(
        &self,
        name: String,
        email: String,
        plan_id: &str,
        cycle_kind: CycleKind,
        now: DateTime<Utc>,
    ) -> CoreResult<(Tenant, String)> {
        if self.persistence.get_tenant_by_email(&email).await?.is_some() {
            return Err(CoreError::DuplicateResource(format!("tenant with email {email}")));
        }

        let plan = self.catalog.resolve(plan_id);
        let issued = self.credentials.issue();
        let (cycle_start, cycle_end, last_reset) = Self::initialize_cycle(now, cycle_kind);

        let tenant = Tenant {
            id: Uuid::new_v4(),
            name,
            email,
            credential_hash: issued.hash,
            plan_id: plan.id,
            cycle_kind,
            usage_count: 0,
            allowance: plan.allowance,
            subscription_status: SubscriptionStatus::Active,
            cycle_start,
            cycle_end,
            last_reset,
            settings: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };

        self.persistence.insert_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, "tenant registered");
        Ok((tenant, issued.plaintext))
    }

    /// Authenticates an opaque credential and gates the request against the
    /// tenant's current quota and subscription status, rolling over an
    /// expired cycle first if needed.
    ///
    /// Returns `CoreError::Gate` for the three denial kinds spec §7 assigns
    /// to the gate; any other persistence failure passes through as
    /// `CoreError::Internal` rather than being collapsed into
    /// `invalid_credential` — a transient DB error on a valid credential
    /// must surface as `500`, not `401`.
    pub async fn authenticate_and_gate(&self, opaque_credential: &str, now: DateTime<Utc>) -> CoreResult<GateOutcome> {
        if !self.credentials.has_valid_prefix(opaque_credential) {
            return Err(GateError::InvalidCredential.into());
        }
        let hash = CredentialService::digest(opaque_credential);

        let tenant_id = self
            .persistence
            .get_tenant_by_credential_hash(&hash)
            .await?
            .ok_or(GateError::InvalidCredential)?
            .id;

        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        self.roll_if_expired_locked(tenant_id, now).await?;

        let tenant = self
            .persistence
            .get_tenant(tenant_id)
            .await?
            .ok_or(GateError::InvalidCredential)?;

        if tenant.subscription_status != SubscriptionStatus::Active {
            return Err(GateError::SubscriptionInactive {
                status: tenant.subscription_status.as_str().to_string(),
            }
            .into());
        }

        let cycle = cycle_tag(now);
        let current_usage = self.persistence.count_usage_events(tenant_id, &cycle).await?;

        if current_usage >= tenant.allowance {
            let overage = current_usage - tenant.allowance;
            let days_left = (tenant.cycle_end - now).num_days().max(0);
            return Err(GateError::RateLimitExceeded {
                current_usage,
                limit: tenant.allowance,
                overage,
                days_left,
                cycle_end: tenant.cycle_end,
            }
            .into());
        }

        // Already holding the per-tenant lock: use the locked variant so
        // this doesn't deadlock on the non-reentrant mutex.
        self.record_usage_locked(tenant_id, "api_call", None, now).await?;

        let new_usage = current_usage + 1;
        Ok(GateOutcome {
            days_left: (tenant.cycle_end - now).num_days().max(0),
            remaining: (tenant.allowance - new_usage).max(0),
            current_usage: new_usage,
            limit: tenant.allowance,
            tenant,
        })
    }

    /// Operation 3: appends a usage event tagged with the current cycle and
    /// increments the denormalized counter atomically. Serialized with
    /// rollover via the per-tenant lock, so an append can never land in a
    /// cycle whose rollover has already committed.
    pub async fn record_usage(
        &self,
        tenant_id: TenantId,
        action: &str,
        resource_id: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;
        self.record_usage_locked(tenant_id, action, resource_id, now).await
    }

    /// Same as `record_usage` but assumes the caller already holds the
    /// per-tenant lock (used by `authenticate_and_gate`).
    async fn record_usage_locked(
        &self,
        tenant_id: TenantId,
        action: &str,
        resource_id: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let event = UsageEvent {
            id: Uuid::new_v4(),
            tenant_id,
            action: action.to_string(),
            resource_id,
            created_at: now,
            billing_cycle: cycle_tag(now),
        };
        self.persistence.record_usage_event(&event).await
    }

    /// Operation 4: rolls a tenant's cycle forward if it has expired.
    /// Returns `true` if a rollover occurred.
    pub async fn roll_if_expired(&self, tenant_id: TenantId, now: DateTime<Utc>) -> CoreResult<bool> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;
        self.roll_if_expired_locked(tenant_id, now).await
    }

    /// Same as `roll_if_expired` but assumes the caller already holds the
    /// per-tenant lock (used by `authenticate_and_gate` to avoid deadlocking
    /// on a re-entrant lock acquisition).
    async fn roll_if_expired_locked(&self, tenant_id: TenantId, now: DateTime<Utc>) -> CoreResult<bool> {
        let tenant = self
            .persistence
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;

        if now <= tenant.cycle_end {
            return Ok(false);
        }

        let closing_cycle = cycle_tag(tenant.cycle_start);
        let usage = self.persistence.count_usage_events(tenant_id, &closing_cycle).await?;
        let overage = (usage - tenant.allowance).max(0);

        // Archive before rolling cycle dates forward: a crash between these
        // two steps must leave usage recoverable.
        if self
            .persistence
            .find_billing_record(tenant_id, tenant.cycle_start, tenant.cycle_end)
            .await?
            .is_none()
        {
            let record = BillingRecord {
                id: Uuid::new_v4(),
                tenant_id,
                plan_id: tenant.plan_id.clone(),
                cycle_start: tenant.cycle_start,
                cycle_end: tenant.cycle_end,
                usage,
                overage,
                status: BillingRecordStatus::Pending,
                payment_date: None,
                amount: None,
                invoice_reference: None,
                created_at: now,
            };
            self.persistence.insert_billing_record(&record).await?;
            debug!(tenant_id = %tenant_id, usage, overage, "billing cycle archived");
        }

        let mut rolled = tenant.clone();
        rolled.cycle_start = now;
        rolled.cycle_end = Self::next_boundary(now, tenant.cycle_kind);
        rolled.usage_count = 0;
        rolled.last_reset = now;
        rolled.updated_at = now;
        self.persistence.update_tenant(&rolled).await?;

        let retention_cutoff = now - chrono::Duration::days(self.retention_days);
        self.persistence
            .delete_usage_events_before(tenant_id, retention_cutoff)
            .await?;

        info!(tenant_id = %tenant_id, new_cycle_end = %rolled.cycle_end, "rolled billing cycle");
        Ok(true)
    }

    /// Rotates a tenant's credential: issues a fresh opaque string and
    /// overwrites the stored digest, invalidating the prior one immediately.
    /// The new plaintext is returned exactly once.
    pub async fn rotate_credential(&self, tenant_id: TenantId, now: DateTime<Utc>) -> CoreResult<(Tenant, String)> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let mut tenant = self
            .persistence
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;

        let issued = self.credentials.rotate();
        tenant.credential_hash = issued.hash;
        tenant.updated_at = now;
        self.persistence.update_tenant(&tenant).await?;

        Ok((tenant, issued.plaintext))
    }

    /// Operation 5: overage charge for a closed cycle's billing record.
    pub fn overage_for(&self, record: &BillingRecord, overage_rate: f64) -> (i64, f64) {
        if record.overage <= 0 {
            return (0, 0.0);
        }
        let blocks = (record.overage as f64 / 100.0).ceil() as i64;
        (blocks, blocks as f64 * overage_rate)
    }

    /// Changes a tenant's plan, optionally re-initializing the cycle.
    /// In-flight usage is neither archived nor zeroed by plan change alone.
    pub async fn change_plan(
        &self,
        tenant_id: TenantId,
        new_plan_id: &str,
        cycle_kind: Option<CycleKind>,
        now: DateTime<Utc>,
    ) -> CoreResult<Tenant> {
        if !self.catalog.is_known(new_plan_id) {
            return Err(CoreError::InvalidPlan(new_plan_id.to_string()));
        }
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let mut tenant = self
            .persistence
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;

        let plan = self.catalog.resolve(new_plan_id);
        tenant.plan_id = plan.id;
        tenant.allowance = plan.allowance;

        if let Some(kind) = cycle_kind {
            if kind != tenant.cycle_kind {
                tenant.cycle_kind = kind;
                let (start, end, reset) = Self::initialize_cycle(now, kind);
                tenant.cycle_start = start;
                tenant.cycle_end = end;
                tenant.last_reset = reset;
            }
        }
        tenant.updated_at = now;

        self.persistence.update_tenant(&tenant).await?;
        Ok(tenant)
    }

    /// Operation 7: threshold alerts for the tenant's current cycle usage.
    pub async fn alerts(&self, tenant_id: TenantId, now: DateTime<Utc>) -> CoreResult<Vec<Alert>> {
        let tenant = self
            .persistence
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;

        let cycle = cycle_tag(now);
        let usage = self.persistence.count_usage_events(tenant_id, &cycle).await?;
        let mut alerts = Vec::new();

        if tenant.allowance > 0 {
            let pct = (usage as f64 / tenant.allowance as f64) * 100.0;
            // Every crossed threshold is reported, not just the highest one:
            // a tenant at 100% usage has crossed 80%, 90%, and 100% alike.
            for threshold in [80u8, 90, 100] {
                if pct >= threshold as f64 {
                    alerts.push(Alert::UsageThreshold {
                        percent: threshold,
                        current_usage: usage,
                        limit: tenant.allowance,
                    });
                }
            }

            let days_left = (tenant.cycle_end - now).num_days();
            if days_left <= 3 && pct > 50.0 {
                alerts.push(Alert::CycleEndingSoon { days_left: days_left.max(0) });
            }
        }

        Ok(alerts)
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).unwrap()
    } else {
        Utc.with_ymd_and_hms(year, month + 1, 1, 0, 0, 0).unwrap()
    };
    let this_month_first = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
    (next_month_first - this_month_first).num_days() as u32
}

fn rebuild(template: DateTime<Utc>, year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(
        year,
        month,
        day,
        template.hour(),
        template.minute(),
        template.second(),
    )
    .single()
    .unwrap_or_else(|| {
        warn!(year, month, day, "ambiguous cycle boundary, falling back to midnight");
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemPersistence;

    fn engine() -> BillingEngine {
        BillingEngine::new(Arc::new(MemPersistence::new()), Arc::new(PlanCatalog::seeded()))
    }

    #[test]
    fn next_boundary_clamps_to_last_day_of_target_month() {
        let jan31_2024 = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let rolled = BillingEngine::next_boundary(jan31_2024, CycleKind::Monthly);
        assert_eq!(rolled, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());

        let jan31_2023 = Utc.with_ymd_and_hms(2023, 1, 31, 0, 0, 0).unwrap();
        let rolled = BillingEngine::next_boundary(jan31_2023, CycleKind::Monthly);
        assert_eq!(rolled, Utc.with_ymd_and_hms(2023, 2, 28, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn gate_allows_up_to_allowance_then_denies() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, credential) = engine
            .register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, now)
            .await
            .unwrap();
        assert_eq!(tenant.allowance, 100);
        assert_eq!(tenant.cycle_end, Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap());

        for _ in 0..100 {
            engine.authenticate_and_gate(&credential, now).await.unwrap();
        }

        let err = engine.authenticate_and_gate(&credential, now).await.unwrap_err();
        match err {
            CoreError::Gate(GateError::RateLimitExceeded { overage, current_usage, limit, .. }) => {
                assert_eq!(overage, 0);
                assert_eq!(current_usage, 100);
                assert_eq!(limit, 100);
            }
            other => panic!("expected rate_limit_exceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rollover_archives_and_resets() {
        let engine = engine();
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, credential) = engine
            .register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, start)
            .await
            .unwrap();

        for _ in 0..101 {
            let _ = engine.record_usage(tenant.id, "api_call", None, start).await;
        }

        let after = Utc.with_ymd_and_hms(2024, 2, 11, 0, 0, 0).unwrap();
        engine.authenticate_and_gate(&credential, after).await.unwrap();

        let records = engine.persistence().list_billing_records_by_tenant(tenant.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].usage, 101);
        assert_eq!(records[0].overage, 1);
        assert_eq!(records[0].status, BillingRecordStatus::Pending);

        let refreshed = engine.persistence().get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(refreshed.cycle_start, after);
        assert_eq!(refreshed.cycle_end, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        assert_eq!(refreshed.usage_count, 1);
    }

    #[tokio::test]
    async fn overage_for_pro_plan() {
        let engine = engine();
        let record = BillingRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: "pro".to_string(),
            cycle_start: Utc::now(),
            cycle_end: Utc::now(),
            usage: 1237,
            overage: 1237 - 1000,
            status: BillingRecordStatus::Pending,
            payment_date: None,
            amount: None,
            invoice_reference: None,
            created_at: Utc::now(),
        };
        let (blocks, charge) = engine.overage_for(&record, 5.0);
        assert_eq!(blocks, 3);
        assert_eq!(charge, 15.0);
    }

    #[tokio::test]
    async fn rollover_is_idempotent_per_cycle_pair() {
        let engine = engine();
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, _credential) = engine
            .register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, start)
            .await
            .unwrap();

        let after = Utc.with_ymd_and_hms(2024, 2, 11, 0, 0, 0).unwrap();
        engine.roll_if_expired(tenant.id, after).await.unwrap();
        engine.roll_if_expired(tenant.id, after).await.unwrap();

        let records = engine.persistence().list_billing_records_by_tenant(tenant.id).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn rotated_credential_invalidates_the_prior_one() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, old_credential) = engine
            .register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, now)
            .await
            .unwrap();

        engine.authenticate_and_gate(&old_credential, now).await.unwrap();

        let (_, new_credential) = engine.rotate_credential(tenant.id, now).await.unwrap();
        assert_ne!(old_credential, new_credential);

        let err = engine.authenticate_and_gate(&old_credential, now).await.unwrap_err();
        assert!(matches!(err, CoreError::Gate(GateError::InvalidCredential)));

        engine.authenticate_and_gate(&new_credential, now).await.unwrap();
    }

    #[tokio::test]
    async fn subscription_inactive_denies_regardless_of_quota() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, credential) = engine
            .register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, now)
            .await
            .unwrap();

        let mut suspended = tenant.clone();
        suspended.subscription_status = SubscriptionStatus::PastDue;
        engine.persistence().update_tenant(&suspended).await.unwrap();

        let err = engine.authenticate_and_gate(&credential, now).await.unwrap_err();
        assert!(matches!(err, CoreError::Gate(GateError::SubscriptionInactive { .. })));
    }
}
