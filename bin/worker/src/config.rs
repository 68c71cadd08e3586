//! Centralized worker configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested keys use
//! `__`, so `SCHEDULER__POLL_INTERVAL_SECONDS=30` sets
//! `scheduler.poll_interval_seconds`.

use keel_scheduler::SchedulerConfig;
use serde::Deserialize;

/// Worker configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Base URL used to build `<%entity_link%>` merge fields.
    #[serde(default = "default_application_url")]
    pub application_url: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// SMTP relay. Without it, `send_email` actions are not available.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Outbound mail relay.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender used when an action does not name one.
    pub from_address: String,
}

fn default_application_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let config: WorkerConfig = config::Config::builder()
            .set_override("database_url", "postgres://localhost/keel")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.application_url, "http://localhost:8080");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.scheduler.poll_interval_seconds, 60);
        assert_eq!(config.scheduler.periodic_interval_seconds, 3600);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn smtp_port_defaults_to_submission() {
        let smtp: SmtpConfig = serde_json::from_value(serde_json::json!({
            "host": "smtp.example.com",
            "from_address": "keel@example.com"
        }))
        .unwrap();
        assert_eq!(smtp.port, 587);
        assert!(smtp.username.is_none());
    }
}
