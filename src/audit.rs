//! Audit logging for destructive maintenance and finished runs
//!
//! Writes JSON lines to `~/.local/state/convoy/audit.log` unless configured
//! elsewhere. Events are best effort and never fail the caller.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Event names written to the audit log
pub mod events {
    pub const STORE_GC: &str = "store.gc";
    pub const STORE_REMOVE: &str = "store.remove";
    pub const STORE_CLEAR: &str = "store.clear";
    pub const WORKSPACE_CLEAN: &str = "workspace.clean";
    pub const RUN_FINISHED: &str = "run.finished";
}

/// File-based audit logger that appends JSON lines
#[derive(Debug, Clone)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: ConfigManager::audit_path(config),
        }
    }

    /// Logger that drops every event
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log an audit event as a JSON line
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, enabled: bool) -> Config {
        let mut config = Config::default();
        config.general.audit_log = enabled;
        config.general.audit_path = Some(dir.path().join("logs").join("audit.log"));
        config
    }

    #[tokio::test]
    async fn writes_json_line() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(&config_in(&dir, true));

        audit
            .log(events::STORE_GC, &serde_json::json!({"removed": 3}))
            .await;

        let content = tokio::fs::read_to_string(audit.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();

        assert_eq!(parsed["event"], "store.gc");
        assert_eq!(parsed["data"]["removed"], 3);
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn appends_multiple_lines() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(&config_in(&dir, true));

        audit.log(events::WORKSPACE_CLEAN, &serde_json::json!({})).await;
        audit.log(events::RUN_FINISHED, &serde_json::json!({})).await;

        let content = tokio::fs::read_to_string(audit.path()).await.unwrap();
        assert_eq!(content.trim().lines().count(), 2);
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(&config_in(&dir, false));

        audit.log("should.not.appear", &serde_json::json!({})).await;

        assert!(!audit.path().exists());
        AuditLog::disabled()
            .log("nowhere", &serde_json::json!({}))
            .await;
    }
}
