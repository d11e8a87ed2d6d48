//! Runtime configuration.
//!
//! Loaded once at startup from an optional YAML file, then overlaid with
//! environment variables (env always wins). Read-only afterwards.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub kubernetes: KubernetesConfig,
    pub agent: AgentConfig,
    pub email: EmailConfig,
    pub remediation: RemediationConfig,
    pub monitoring: MonitoringConfig,
}

/// Cluster connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Use in-cluster service account credentials.
    pub in_cluster: bool,
    /// Path to a kubeconfig file for out-of-cluster use.
    pub kube_config_path: String,
    /// Namespaces to monitor; empty means all namespaces.
    pub namespaces: Vec<String>,
}

/// LLM agent settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// Gemini API key; usually supplied via `GOOGLE_API_KEY`.
    pub api_key: String,
    pub model: String,
}

/// SMTP settings for escalation mail.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    /// Recipient for success reports and escalation alerts.
    pub engineer_email: String,
    pub use_tls: bool,
}

/// Remediation attempt limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemediationConfig {
    pub max_retries: u32,
    pub retry_backoff_seconds: u64,
    pub dedup_window_seconds: u64,
    pub enable_rollback: bool,
}

/// Watcher and health endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitoringConfig {
    /// Interval for re-running classification against the cached state.
    pub resync_interval_seconds: u64,
    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubernetes: KubernetesConfig::default(),
            agent: AgentConfig::default(),
            email: EmailConfig::default(),
            remediation: RemediationConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            in_cluster: true,
            kube_config_path: String::new(),
            namespaces: Vec::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            engineer_email: String::new(),
            use_tls: true,
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_seconds: 30,
            dedup_window_seconds: 300,
            enable_rollback: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            resync_interval_seconds: 300,
            health_port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, then apply env overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self =
            serde_yaml::from_str(&raw).context("failed to parse config YAML")?;
        config.apply_env();
        Ok(config)
    }

    /// Build configuration from defaults and environment variables only.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AMOS_IN_CLUSTER") {
            if v == "false" {
                self.kubernetes.in_cluster = false;
            }
        }
        if let Ok(v) = std::env::var("KUBECONFIG") {
            if !v.is_empty() {
                self.kubernetes.kube_config_path = v;
            }
        }
        if let Ok(v) = std::env::var("GOOGLE_API_KEY") {
            if !v.is_empty() {
                self.agent.api_key = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_ADK_MODEL") {
            if !v.is_empty() {
                self.agent.model = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_SMTP_HOST") {
            if !v.is_empty() {
                self.email.smtp_host = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_SMTP_PORT") {
            if let Ok(port) = v.parse() {
                self.email.smtp_port = port;
            }
        }
        if let Ok(v) = std::env::var("AMOS_SMTP_USERNAME") {
            if !v.is_empty() {
                self.email.username = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_SMTP_PASSWORD") {
            if !v.is_empty() {
                self.email.password = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_FROM_EMAIL") {
            if !v.is_empty() {
                self.email.from_address = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_ENGINEER_EMAIL") {
            if !v.is_empty() {
                self.email.engineer_email = v;
            }
        }
        if let Ok(v) = std::env::var("AMOS_MAX_RETRIES") {
            if let Ok(retries) = v.parse() {
                self.remediation.max_retries = retries;
            }
        }
    }

    /// Startup validation; failures here are fatal (exit code 1).
    pub fn validate(&self) -> Result<()> {
        if self.agent.api_key.is_empty() {
            anyhow::bail!("GOOGLE_API_KEY is required");
        }
        if self.email.smtp_host.is_empty() {
            anyhow::bail!("SMTP host is required");
        }
        if self.email.engineer_email.is_empty() {
            anyhow::bail!("engineer email is required");
        }
        Ok(())
    }
}

impl RemediationConfig {
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    #[must_use]
    pub const fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_seconds)
    }
}

impl MonitoringConfig {
    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Mutex;

    // Loading reads process env, so tests that touch it must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.remediation.max_retries, 2);
        assert_eq!(config.remediation.retry_backoff_seconds, 30);
        assert_eq!(config.remediation.dedup_window_seconds, 300);
        assert!(config.remediation.enable_rollback);
        assert!(config.kubernetes.namespaces.is_empty());
        assert_eq!(config.agent.model, "gemini-2.0-flash");
        assert_eq!(config.email.smtp_port, 587);
        assert_eq!(config.monitoring.health_port, 8080);
    }

    #[test]
    fn file_values_override_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "remediation:\n  maxRetries: 5\n  enableRollback: false\nkubernetes:\n  namespaces: [prod, staging]\nemail:\n  smtpHost: mail.example.com"
        )
        .expect("write");

        let config = Config::from_file(file.path()).expect("load");
        assert_eq!(config.remediation.max_retries, 5);
        assert!(!config.remediation.enable_rollback);
        assert_eq!(config.kubernetes.namespaces, vec!["prod", "staging"]);
        assert_eq!(config.email.smtp_host, "mail.example.com");
        // Untouched sections keep their defaults.
        assert_eq!(config.remediation.retry_backoff_seconds, 30);
    }

    #[test]
    fn env_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("AMOS_MAX_RETRIES", "7");
        std::env::set_var("AMOS_ENGINEER_EMAIL", "oncall@example.com");

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "remediation:\n  maxRetries: 3\nemail:\n  engineerEmail: file@example.com"
        )
        .expect("write");

        let config = Config::from_file(file.path()).expect("load");
        assert_eq!(config.remediation.max_retries, 7);
        assert_eq!(config.email.engineer_email, "oncall@example.com");

        std::env::remove_var("AMOS_MAX_RETRIES");
        std::env::remove_var("AMOS_ENGINEER_EMAIL");
    }

    #[test]
    fn validation_requires_credentials() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.agent.api_key = "key".into();
        config.email.smtp_host = "mail.example.com".into();
        config.email.engineer_email = "oncall@example.com".into();
        assert!(config.validate().is_ok());
    }
}
