use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};
use wrench_core::BrokerConfig;
use wrench_notifications::{DEFAULT_RECORD_CAPACITY, EmailConfig, SmsConfig};
use wrench_storage::EquipmentStatus;

use crate::observers::DEFAULT_MEMORY_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Event broker settings (history capacity)
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Notification channels and dispatcher settings
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Equipment state projection
    #[serde(default)]
    pub projector: ProjectorConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        self.host()?;
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Audit validation
        if self.audit.enabled && self.audit.sink == AuditSinkKind::File && self.audit.path.is_none()
        {
            return Err("audit.sink = \"file\" requires audit.path".into());
        }
        if self.audit.memory_capacity == 0 {
            return Err("audit.memory_capacity must be > 0".into());
        }
        // Notification validations
        if self.notifications.record_capacity == 0 {
            return Err("notifications.record_capacity must be > 0".into());
        }
        let email = &self.notifications.email;
        if email.enabled {
            if email.smtp_host.is_empty() {
                return Err("notifications.email.enabled=true requires smtp_host".into());
            }
            if email.from.is_empty() {
                return Err("notifications.email.from must not be empty".into());
            }
            if email.timeout_ms == 0 {
                return Err("notifications.email.timeout_ms must be > 0".into());
            }
        }
        let sms = &self.notifications.sms;
        if sms.enabled {
            if !(sms.gateway_url.starts_with("http://") || sms.gateway_url.starts_with("https://"))
            {
                return Err("notifications.sms.gateway_url must be an http(s) URL".into());
            }
            if sms.timeout_ms == 0 {
                return Err("notifications.sms.timeout_ms must be > 0".into());
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> Result<SocketAddr, String> {
        Ok(SocketAddr::from((self.host()?, self.server.port)))
    }

    fn host(&self) -> Result<IpAddr, String> {
        self.server.host.parse().map_err(|_| {
            format!(
                "server.host must be an IP address, got {:?}",
                self.server.host
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Where audit records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Structured log lines on the `wrench::audit` target.
    #[default]
    Tracing,
    /// Append-only JSON lines file at `audit.path`.
    File,
    /// Kept in memory; useful for tests and inspection.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sink: AuditSinkKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Records retained by the `memory` sink.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: AuditSinkKind::default(),
            path: None,
            memory_capacity: default_memory_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `GET /metrics`.
    #[serde(default = "default_true")]
    pub prometheus: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { prometheus: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_record_capacity")]
    pub record_capacity: usize,
    /// Deliver through a dedicated worker instead of inside `publish()`.
    #[serde(default = "default_true")]
    pub queued: bool,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub in_app: InAppConfig,
}

fn default_record_capacity() -> usize {
    DEFAULT_RECORD_CAPACITY
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            record_capacity: default_record_capacity(),
            queued: true,
            email: EmailConfig::default(),
            sms: SmsConfig::default(),
            in_app: InAppConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for InAppConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Status restored on completion when the prior status is unknown.
    #[serde(default)]
    pub fallback_status: EquipmentStatus,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_status: EquipmentStatus::Operational,
        }
    }
}

fn default_true() -> bool {
    true
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "wrench.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., WRENCH__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("WRENCH")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.broker.history_capacity, 1000);
        assert_eq!(cfg.notifications.record_capacity, 10_000);
        assert_eq!(cfg.projector.fallback_status, EquipmentStatus::Operational);
    }

    #[test]
    fn file_sink_requires_path() {
        let mut cfg = AppConfig::default();
        cfg.audit.sink = AuditSinkKind::File;
        assert!(cfg.validate().unwrap_err().contains("audit.path"));

        cfg.audit.path = Some(PathBuf::from("audit.jsonl"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn enabled_sms_requires_gateway() {
        let mut cfg = AppConfig::default();
        cfg.notifications.sms.enabled = true;
        assert!(cfg.validate().unwrap_err().contains("gateway_url"));

        cfg.notifications.sms.gateway_url = "https://sms.example.com/send".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn memory_sink_capacity_must_be_positive() {
        let mut cfg = AppConfig::default();
        cfg.audit.sink = AuditSinkKind::Memory;
        assert_eq!(cfg.audit.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        cfg.audit.memory_capacity = 0;
        assert!(cfg.validate().unwrap_err().contains("memory_capacity"));
    }

    #[test]
    fn unparsable_host_rejected() {
        let mut cfg = AppConfig::default();
        cfg.server.host = "not a host".into();
        assert!(cfg.validate().unwrap_err().contains("server.host"));
        assert!(cfg.addr().is_err());

        cfg.server.host = "::1".into();
        assert_eq!(cfg.addr().unwrap().to_string(), "[::1]:8080");
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }
}
