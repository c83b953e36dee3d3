//! Static plan catalog.
//!
//! The catalog is seeded once at process startup and treated as read-only at
//! runtime. Resolution by unknown id falls back to `free`.

use crate::models::Plan;

/// Read-only plan catalog.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::seeded()
    }
}

impl PlanCatalog {
    /// Builds the default three-tier catalog (`free`, `pro`, `enterprise`).
    pub fn seeded() -> Self {
        Self {
            plans: vec![
                Plan {
                    id: "free".to_string(),
                    name: "Free".to_string(),
                    allowance: 100,
                    price_monthly: 0.0,
                    price_yearly: 0.0,
                    overage_rate: 0.0,
                    max_sites: 3,
                    max_pages_per_audit: 50,
                    features: vec![],
                },
                Plan {
                    id: "pro".to_string(),
                    name: "Pro".to_string(),
                    allowance: 1000,
                    price_monthly: 29.0,
                    price_yearly: 290.0,
                    overage_rate: 5.0,
                    max_sites: 20,
                    max_pages_per_audit: 500,
                    features: vec!["priority_crawl".to_string()],
                },
                Plan {
                    id: "enterprise".to_string(),
                    name: "Enterprise".to_string(),
                    allowance: 10_000,
                    price_monthly: 99.0,
                    price_yearly: 990.0,
                    overage_rate: 2.0,
                    max_sites: 100,
                    max_pages_per_audit: 5000,
                    features: vec!["priority_crawl".to_string(), "dedicated_support".to_string()],
                },
            ],
        }
    }

    /// Resolves a plan id, falling back to `free` when unknown.
    pub fn resolve(&self, plan_id: &str) -> Plan {
        self.plans
            .iter()
            .find(|p| p.id == plan_id)
            .cloned()
            .unwrap_or_else(|| self.free())
    }

    /// True when `plan_id` names a known plan (used by request validation).
    pub fn is_known(&self, plan_id: &str) -> bool {
        self.plans.iter().any(|p| p.id == plan_id)
    }

    pub fn free(&self) -> Plan {
        self.plans
            .iter()
            .find(|p| p.id == "free")
            .cloned()
            .expect("free plan is always seeded")
    }

    pub fn all(&self) -> &[Plan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_plan() {
        let catalog = PlanCatalog::seeded();
        let pro = catalog.resolve("pro");
        assert_eq!(pro.allowance, 1000);
        assert_eq!(pro.overage_rate, 5.0);
    }

    #[test]
    fn unknown_plan_falls_back_to_free() {
        let catalog = PlanCatalog::seeded();
        let resolved = catalog.resolve("does-not-exist");
        assert_eq!(resolved.id, "free");
    }
}
