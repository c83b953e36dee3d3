//! Postgres-backed `Persistence` implementation.
//!
//! Schema creation is idempotent: `CREATE TABLE IF NOT EXISTS` statements
//! issued once at connect time, plus the indexes the aggregate queries and
//! lookups in this module need.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{debug, info};

use crate::errors::CoreResult;
use crate::models::{
    Audit, BillingRecord, BillingRecordStatus, CycleKind, Issue, Site, SiteId, SiteStatus, Tenant,
    TenantId, UsageEvent, SubscriptionStatus,
};

use super::{DailyUsage, Persistence};

pub struct PgPersistence {
    pool: PgPool,
}

impl PgPersistence {
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        info!("connecting to postgres persistence backend");
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> CoreResult<()> {
        debug!("initializing schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id UUID PRIMARY KEY,
                name VARCHAR NOT NULL,
                email VARCHAR NOT NULL UNIQUE,
                credential_hash BYTEA NOT NULL UNIQUE,
                plan_id VARCHAR NOT NULL,
                cycle_kind VARCHAR NOT NULL,
                usage_count BIGINT NOT NULL DEFAULT 0,
                allowance BIGINT NOT NULL,
                subscription_status VARCHAR NOT NULL,
                cycle_start TIMESTAMPTZ NOT NULL,
                cycle_end TIMESTAMPTZ NOT NULL,
                last_reset TIMESTAMPTZ NOT NULL,
                settings JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                url VARCHAR NOT NULL,
                name VARCHAR NOT NULL,
                status VARCHAR NOT NULL,
                last_audit_id UUID,
                last_score DOUBLE PRECISION,
                audit_count BIGINT NOT NULL DEFAULT 0,
                settings JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE(tenant_id, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audits (
                id UUID PRIMARY KEY,
                site_id UUID NOT NULL REFERENCES sites(id),
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                score DOUBLE PRECISION NOT NULL,
                issues JSONB NOT NULL,
                pages_analyzed BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                billing_cycle VARCHAR NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_logs (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                action VARCHAR NOT NULL,
                resource_id VARCHAR,
                created_at TIMESTAMPTZ NOT NULL,
                billing_cycle VARCHAR NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS billing_history (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                plan_id VARCHAR NOT NULL,
                cycle_start TIMESTAMPTZ NOT NULL,
                cycle_end TIMESTAMPTZ NOT NULL,
                usage BIGINT NOT NULL,
                overage BIGINT NOT NULL DEFAULT 0,
                status VARCHAR NOT NULL,
                payment_date TIMESTAMPTZ,
                amount DOUBLE PRECISION,
                invoice_reference VARCHAR,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE(tenant_id, cycle_start, cycle_end)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tenants_credential_hash ON tenants(credential_hash)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tenants_cycle_end ON tenants(cycle_end)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_tenant ON sites(tenant_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_logs_tenant_cycle ON usage_logs(tenant_id, billing_cycle)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_billing_history_tenant ON billing_history(tenant_id)")
            .execute(&self.pool)
            .await?;

        info!("schema initialized");
        Ok(())
    }

    fn row_to_tenant(row: &sqlx::postgres::PgRow) -> sqlx::Result<Tenant> {
        let cycle_kind: String = row.try_get("cycle_kind")?;
        let status: String = row.try_get("subscription_status")?;
        Ok(Tenant {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            credential_hash: row.try_get("credential_hash")?,
            plan_id: row.try_get("plan_id")?,
            cycle_kind: if cycle_kind == "yearly" { CycleKind::Yearly } else { CycleKind::Monthly },
            usage_count: row.try_get("usage_count")?,
            allowance: row.try_get("allowance")?,
            subscription_status: parse_subscription_status(&status),
            cycle_start: row.try_get("cycle_start")?,
            cycle_end: row.try_get("cycle_end")?,
            last_reset: row.try_get("last_reset")?,
            settings: row.try_get("settings")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_site(row: &sqlx::postgres::PgRow) -> sqlx::Result<Site> {
        let status: String = row.try_get("status")?;
        Ok(Site {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            url: row.try_get("url")?,
            name: row.try_get("name")?,
            status: parse_site_status(&status),
            last_audit_id: row.try_get("last_audit_id")?,
            last_score: row.try_get("last_score")?,
            audit_count: row.try_get("audit_count")?,
            settings: row.try_get("settings")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_audit(row: &sqlx::postgres::PgRow) -> sqlx::Result<Audit> {
        let issues: serde_json::Value = row.try_get("issues")?;
        let issues: Vec<Issue> = serde_json::from_value(issues).unwrap_or_default();
        Ok(Audit {
            id: row.try_get("id")?,
            site_id: row.try_get("site_id")?,
            tenant_id: row.try_get("tenant_id")?,
            score: row.try_get("score")?,
            issues,
            pages_analyzed: row.try_get("pages_analyzed")?,
            created_at: row.try_get("created_at")?,
            billing_cycle: row.try_get("billing_cycle")?,
        })
    }

    fn row_to_billing_record(row: &sqlx::postgres::PgRow) -> sqlx::Result<BillingRecord> {
        let status: String = row.try_get("status")?;
        Ok(BillingRecord {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            plan_id: row.try_get("plan_id")?,
            cycle_start: row.try_get("cycle_start")?,
            cycle_end: row.try_get("cycle_end")?,
            usage: row.try_get("usage")?,
            overage: row.try_get("overage")?,
            status: parse_billing_status(&status),
            payment_date: row.try_get("payment_date")?,
            amount: row.try_get("amount")?,
            invoice_reference: row.try_get("invoice_reference")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn parse_subscription_status(value: &str) -> SubscriptionStatus {
    match value {
        "past_due" => SubscriptionStatus::PastDue,
        "canceled" => SubscriptionStatus::Canceled,
        "trial" => SubscriptionStatus::Trial,
        _ => SubscriptionStatus::Active,
    }
}

fn parse_site_status(value: &str) -> SiteStatus {
    match value {
        "running" => SiteStatus::Running,
        "completed" => SiteStatus::Completed,
        "failed" => SiteStatus::Failed,
        _ => SiteStatus::Pending,
    }
}

fn parse_billing_status(value: &str) -> BillingRecordStatus {
    match value {
        "paid" => BillingRecordStatus::Paid,
        "failed" => BillingRecordStatus::Failed,
        _ => BillingRecordStatus::Pending,
    }
}

#[async_trait]
impl Persistence for PgPersistence {
    async fn insert_tenant(&self, tenant: &Tenant) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO tenants
               (id, name, email, credential_hash, plan_id, cycle_kind, usage_count, allowance,
                subscription_status, cycle_start, cycle_end, last_reset, settings, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)"#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.email)
        .bind(&tenant.credential_hash)
        .bind(&tenant.plan_id)
        .bind(if tenant.cycle_kind == CycleKind::Yearly { "yearly" } else { "monthly" })
        .bind(tenant.usage_count)
        .bind(tenant.allowance)
        .bind(tenant.subscription_status.as_str())
        .bind(tenant.cycle_start)
        .bind(tenant.cycle_end)
        .bind(tenant.last_reset)
        .bind(&tenant.settings)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> CoreResult<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_tenant).transpose().map_err(Into::into)
    }

    async fn get_tenant_by_email(&self, email: &str) -> CoreResult<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_tenant).transpose().map_err(Into::into)
    }

    async fn get_tenant_by_credential_hash(&self, hash: &[u8]) -> CoreResult<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE credential_hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_tenant).transpose().map_err(Into::into)
    }

    async fn update_tenant(&self, tenant: &Tenant) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE tenants SET name=$2, email=$3, credential_hash=$4, plan_id=$5, cycle_kind=$6,
               usage_count=$7, allowance=$8, subscription_status=$9, cycle_start=$10, cycle_end=$11,
               last_reset=$12, settings=$13, updated_at=$14 WHERE id=$1"#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.email)
        .bind(&tenant.credential_hash)
        .bind(&tenant.plan_id)
        .bind(if tenant.cycle_kind == CycleKind::Yearly { "yearly" } else { "monthly" })
        .bind(tenant.usage_count)
        .bind(tenant.allowance)
        .bind(tenant.subscription_status.as_str())
        .bind(tenant.cycle_start)
        .bind(tenant.cycle_end)
        .bind(tenant.last_reset)
        .bind(&tenant.settings)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tenants(&self) -> CoreResult<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM tenants").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_tenant).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    async fn delete_tenant(&self, id: TenantId) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM audits WHERE tenant_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sites WHERE tenant_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM usage_logs WHERE tenant_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM billing_history WHERE tenant_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tenants WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_site(&self, site: &Site) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO sites (id, tenant_id, url, name, status, last_audit_id, last_score,
               audit_count, settings, created_at, updated_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)"#,
        )
        .bind(site.id)
        .bind(site.tenant_id)
        .bind(&site.url)
        .bind(&site.name)
        .bind(site.status.as_str())
        .bind(site.last_audit_id)
        .bind(site.last_score)
        .bind(site.audit_count)
        .bind(&site.settings)
        .bind(site.created_at)
        .bind(site.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_site(&self, id: SiteId) -> CoreResult<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_site).transpose().map_err(Into::into)
    }

    async fn get_site_by_tenant_url(&self, tenant_id: TenantId, url: &str) -> CoreResult<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE tenant_id = $1 AND url = $2")
            .bind(tenant_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_site).transpose().map_err(Into::into)
    }

    async fn list_sites_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Vec<Site>> {
        let rows = sqlx::query("SELECT * FROM sites WHERE tenant_id = $1 ORDER BY created_at DESC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_site).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    async fn list_sites_by_status(&self, status: SiteStatus) -> CoreResult<Vec<Site>> {
        let rows = sqlx::query("SELECT * FROM sites WHERE status = $1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_site).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    async fn update_site(&self, site: &Site) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE sites SET url=$2, name=$3, status=$4, last_audit_id=$5, last_score=$6,
               audit_count=$7, settings=$8, updated_at=$9 WHERE id=$1"#,
        )
        .bind(site.id)
        .bind(&site.url)
        .bind(&site.name)
        .bind(site.status.as_str())
        .bind(site.last_audit_id)
        .bind(site.last_score)
        .bind(site.audit_count)
        .bind(&site.settings)
        .bind(site.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_audit(&self, audit: &Audit) -> CoreResult<()> {
        let issues = serde_json::to_value(&audit.issues).unwrap_or(serde_json::Value::Array(vec![]));
        sqlx::query(
            r#"INSERT INTO audits (id, site_id, tenant_id, score, issues, pages_analyzed, created_at, billing_cycle)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
        )
        .bind(audit.id)
        .bind(audit.site_id)
        .bind(audit.tenant_id)
        .bind(audit.score)
        .bind(issues)
        .bind(audit.pages_analyzed)
        .bind(audit.created_at)
        .bind(&audit.billing_cycle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audits_by_site(&self, site_id: SiteId) -> CoreResult<Vec<Audit>> {
        let rows = sqlx::query("SELECT * FROM audits WHERE site_id = $1 ORDER BY created_at DESC")
            .bind(site_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_audit).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    async fn record_usage_event(&self, event: &UsageEvent) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO usage_logs (id, tenant_id, action, resource_id, created_at, billing_cycle)
               VALUES ($1,$2,$3,$4,$5,$6)"#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(&event.action)
        .bind(&event.resource_id)
        .bind(event.created_at)
        .bind(&event.billing_cycle)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE tenants SET usage_count = usage_count + 1, updated_at = $2 WHERE id = $1")
            .bind(event.tenant_id)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count_usage_events(&self, tenant_id: TenantId, cycle: &str) -> CoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM usage_logs WHERE tenant_id = $1 AND billing_cycle = $2")
            .bind(tenant_id)
            .bind(cycle)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("c")?)
    }

    async fn delete_usage_events_before(&self, tenant_id: TenantId, before: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("DELETE FROM usage_logs WHERE tenant_id = $1 AND created_at < $2")
            .bind(tenant_id)
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn daily_usage_counts(&self, tenant_id: TenantId, since: DateTime<Utc>) -> CoreResult<Vec<DailyUsage>> {
        let rows = sqlx::query(
            r#"SELECT DATE(created_at) AS day, COUNT(*) AS c FROM usage_logs
               WHERE tenant_id = $1 AND created_at >= $2 GROUP BY day ORDER BY day"#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| -> sqlx::Result<DailyUsage> {
                Ok(DailyUsage {
                    day: row.try_get("day")?,
                    count: row.try_get("c")?,
                })
            })
            .collect::<sqlx::Result<_>>()
            .map_err(Into::into)
    }

    async fn insert_billing_record(&self, record: &BillingRecord) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO billing_history
               (id, tenant_id, plan_id, cycle_start, cycle_end, usage, overage, status, payment_date,
                amount, invoice_reference, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)"#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(&record.plan_id)
        .bind(record.cycle_start)
        .bind(record.cycle_end)
        .bind(record.usage)
        .bind(record.overage)
        .bind(record.status.as_str())
        .bind(record.payment_date)
        .bind(record.amount)
        .bind(&record.invoice_reference)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_billing_record(
        &self,
        tenant_id: TenantId,
        cycle_start: DateTime<Utc>,
        cycle_end: DateTime<Utc>,
    ) -> CoreResult<Option<BillingRecord>> {
        let row = sqlx::query(
            "SELECT * FROM billing_history WHERE tenant_id = $1 AND cycle_start = $2 AND cycle_end = $3",
        )
        .bind(tenant_id)
        .bind(cycle_start)
        .bind(cycle_end)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_billing_record).transpose().map_err(Into::into)
    }

    async fn list_billing_records_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Vec<BillingRecord>> {
        let rows = sqlx::query("SELECT * FROM billing_history WHERE tenant_id = $1 ORDER BY created_at DESC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_billing_record).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    async fn billing_records_paid_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<BillingRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM billing_history WHERE payment_date >= $1 AND payment_date < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_billing_record).collect::<sqlx::Result<_>>().map_err(Into::into)
    }

    async fn count_sites_by_tenant(&self, tenant_id: TenantId) -> CoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM sites WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("c")?)
    }

    async fn count_audits_by_tenant(&self, tenant_id: TenantId) -> CoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM audits WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("c")?)
    }

    async fn average_score_by_tenant(&self, tenant_id: TenantId) -> CoreResult<Option<f64>> {
        let row = sqlx::query("SELECT AVG(score) AS avg FROM audits WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<f64>, _>("avg")?)
    }
}
