//! Admin/maintenance operations: forced cycle rollover sweeps,
//! catalog-driven allowance retargeting, and revenue rollups.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::billing::BillingEngine;
use crate::errors::CoreResult;
use crate::persistence::Persistence;
use crate::plans::PlanCatalog;

/// Revenue total for one plan over a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRevenue {
    pub plan_id: String,
    pub total_amount: f64,
    pub overage_count: i64,
    pub record_count: i64,
}

/// Revenue rollup across all plans for a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueReport {
    pub by_plan: Vec<PlanRevenue>,
    pub total_amount: f64,
    pub total_overage_count: i64,
}

pub struct AdminService {
    persistence: Arc<dyn Persistence>,
    billing: Arc<BillingEngine>,
    catalog: Arc<PlanCatalog>,
}

impl AdminService {
    pub fn new(persistence: Arc<dyn Persistence>, billing: Arc<BillingEngine>, catalog: Arc<PlanCatalog>) -> Self {
        Self { persistence, billing, catalog }
    }

    /// Invokes `roll_if_expired` on every tenant. Idempotent: a second
    /// invocation with no newly-expired cycles archives nothing.
    pub async fn force_reset_all(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let tenants = self.persistence.list_tenants().await?;
        let mut rolled = 0;
        for tenant in tenants {
            if self.billing.roll_if_expired(tenant.id, now).await? {
                rolled += 1;
            }
        }
        Ok(rolled)
    }

    /// Re-applies the current plan catalog's allowances to every tenant,
    /// used after the catalog itself changes.
    pub async fn retarget_allowances(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let tenants = self.persistence.list_tenants().await?;
        let mut retargeted = 0;
        for mut tenant in tenants {
            let plan = self.catalog.resolve(&tenant.plan_id);
            if tenant.allowance != plan.allowance {
                tenant.allowance = plan.allowance;
                tenant.updated_at = now;
                self.persistence.update_tenant(&tenant).await?;
                retargeted += 1;
            }
        }
        Ok(retargeted)
    }

    /// Aggregates billing records with `payment_date` in `[start, end)`,
    /// grouped by the plan each record was closed under.
    pub async fn revenue(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<RevenueReport> {
        let records = self.persistence.billing_records_paid_in_range(start, end).await?;

        let mut by_plan: HashMap<String, PlanRevenue> = HashMap::new();
        for record in &records {
            let entry = by_plan.entry(record.plan_id.clone()).or_insert_with(|| PlanRevenue {
                plan_id: record.plan_id.clone(),
                total_amount: 0.0,
                overage_count: 0,
                record_count: 0,
            });
            entry.total_amount += record.amount.unwrap_or(0.0);
            entry.overage_count += record.overage;
            entry.record_count += 1;
        }

        let mut by_plan: Vec<PlanRevenue> = by_plan.into_values().collect();
        by_plan.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));

        let total_amount = by_plan.iter().map(|p| p.total_amount).sum();
        let total_overage_count = by_plan.iter().map(|p| p.overage_count).sum();

        Ok(RevenueReport { by_plan, total_amount, total_overage_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CycleKind;
    use crate::persistence::MemPersistence;
    use chrono::TimeZone;

    #[tokio::test]
    async fn force_reset_rolls_expired_tenants_once() {
        let persistence: Arc<dyn Persistence> = Arc::new(MemPersistence::new());
        let catalog = Arc::new(PlanCatalog::seeded());
        let billing = Arc::new(BillingEngine::new(persistence.clone(), catalog.clone()));
        let admin = AdminService::new(persistence.clone(), billing.clone(), catalog);

        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        billing.register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, start).await.unwrap();
        billing.register_tenant("B".into(), "b@x".into(), "free", CycleKind::Monthly, start).await.unwrap();

        let after = Utc.with_ymd_and_hms(2024, 2, 11, 0, 0, 0).unwrap();
        let rolled = admin.force_reset_all(after).await.unwrap();
        assert_eq!(rolled, 2);

        let rolled_again = admin.force_reset_all(after).await.unwrap();
        assert_eq!(rolled_again, 0);
    }

    #[tokio::test]
    async fn retarget_allowances_applies_catalog_changes() {
        let persistence: Arc<dyn Persistence> = Arc::new(MemPersistence::new());
        let catalog = Arc::new(PlanCatalog::seeded());
        let billing = Arc::new(BillingEngine::new(persistence.clone(), catalog.clone()));
        let admin = AdminService::new(persistence.clone(), billing.clone(), catalog);

        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (tenant, _) = billing.register_tenant("A".into(), "a@x".into(), "free", CycleKind::Monthly, now).await.unwrap();

        let mut drifted = tenant.clone();
        drifted.allowance = 1;
        persistence.update_tenant(&drifted).await.unwrap();

        let retargeted = admin.retarget_allowances(now).await.unwrap();
        assert_eq!(retargeted, 1);

        let refreshed = persistence.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(refreshed.allowance, 100);
    }
}
