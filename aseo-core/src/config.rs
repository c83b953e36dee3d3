//! Service configuration: a database handle, the admin shared secret, and
//! the knobs the orchestrator and billing engine read at startup. Loading
//! from the environment is done in `aseo-api` via the `config` crate; this
//! module only defines shape and sane defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::billing::RETENTION_DAYS;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub admin: AdminConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. `None` selects the in-memory backend,
    /// which is only appropriate for tests and local exploration.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bounded worker pool size for background audit tasks.
    pub worker_pool_size: usize,
    /// Usage-event retention window applied at rollover.
    #[serde(with = "duration_days")]
    pub usage_retention: Duration,
    /// Sites still `running` longer than this at startup are recovery-swept
    /// to `failed`.
    #[serde(with = "duration_minutes")]
    pub stuck_running_threshold: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret admin routes compare against `X-Admin-Key`.
    pub shared_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
    /// Permissive CORS for browser-based API consumers, off by default.
    pub cors_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            admin: AdminConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: 16 }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            usage_retention: Duration::from_secs(RETENTION_DAYS as u64 * 86_400),
            stuck_running_threshold: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { shared_secret: "change-me".to_string() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".to_string(), cors_enabled: false }
    }
}

mod duration_days {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs() / 86_400)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let days = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(days * 86_400))
    }
}

mod duration_minutes {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs() / 60)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(minutes * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_in_memory_fallback() {
        let config = ServiceConfig::default();
        assert!(config.database.url.is_none());
        assert_eq!(config.orchestrator.worker_pool_size, 8);
    }
}
