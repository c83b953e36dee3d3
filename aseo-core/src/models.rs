//! Core data model shared by the persistence layer, billing engine, and audit
//! pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

pub type TenantId = Uuid;
pub type SiteId = Uuid;
pub type AuditId = Uuid;

/// Billing cycle granularity a tenant subscribes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Monthly,
    Yearly,
}

/// Subscription lifecycle state for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trial,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Trial => "trial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub email: String,
    pub credential_hash: Vec<u8>,
    pub plan_id: String,
    pub cycle_kind: CycleKind,
    pub usage_count: i64,
    pub allowance: i64,
    pub subscription_status: SubscriptionStatus,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
    pub settings: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable plan catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub allowance: i64,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub overage_rate: f64,
    pub max_sites: i64,
    pub max_pages_per_audit: i64,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Pending => "pending",
            SiteStatus::Running => "running",
            SiteStatus::Completed => "completed",
            SiteStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub tenant_id: TenantId,
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    pub last_audit_id: Option<AuditId>,
    pub last_score: Option<f64>,
    pub audit_count: i64,
    pub settings: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: String,
    pub severity: String,
    pub penalty: i64,
    pub message: String,
    pub page_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub id: AuditId,
    pub site_id: SiteId,
    pub tenant_id: TenantId,
    pub score: f64,
    pub issues: Vec<Issue>,
    pub pages_analyzed: i64,
    pub created_at: DateTime<Utc>,
    /// `YYYY-MM` of `created_at`, the billing cycle this audit's usage event
    /// was recorded against.
    pub billing_cycle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub action: String,
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub billing_cycle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingRecordStatus {
    Pending,
    Paid,
    Failed,
}

impl BillingRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingRecordStatus::Pending => "pending",
            BillingRecordStatus::Paid => "paid",
            BillingRecordStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Plan the tenant was on when this cycle closed, captured at rollover
    /// time so revenue rollups don't depend on the tenant's *current* plan.
    pub plan_id: String,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub usage: i64,
    pub overage: i64,
    pub status: BillingRecordStatus,
    pub payment_date: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    pub invoice_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `YYYY-MM` tag used to partition usage events and audits by billing cycle.
pub fn cycle_tag(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m").to_string()
}
