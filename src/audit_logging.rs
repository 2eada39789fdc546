//! Structured event emission (spec §6 "Observability Emission"): every
//! component that changes coordination state appends one JSON line here
//! rather than only logging through `tracing`, so downstream tooling can
//! replay `{trace_id, span_id, tenant_id, task_id, agent_id, event,
//! attributes}` without scraping log text.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub id: String,
    pub timestamp_ms: u64,
    pub trace_id: String,
    pub span_id: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub event: String,
    pub attributes: serde_json::Value,
}

pub struct EventBuilder {
    event: CoordinationEvent,
}

impl EventBuilder {
    pub fn new(tenant_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            event: CoordinationEvent {
                id: String::new(),
                timestamp_ms: 0,
                trace_id: Uuid::new_v4().to_string(),
                span_id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.into(),
                task_id: None,
                agent_id: None,
                event: event.into(),
                attributes: serde_json::json!({}),
            },
        }
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.event.trace_id = trace_id.into();
        self
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.event.task_id = Some(task_id.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.event.agent_id = Some(agent_id.into());
        self
    }

    pub fn attributes(mut self, attributes: serde_json::Value) -> Self {
        self.event.attributes = attributes;
        self
    }

    pub fn build(self) -> CoordinationEvent {
        self.event
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    log_file: Arc<Mutex<BufWriter<File>>>,
    _retention_days: u32,
}

impl AuditLogger {
    pub fn new(log_path: &str, retention_days: u32) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(parent) = Path::new(log_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(log_path)?;

        Ok(Self {
            log_file: Arc::new(Mutex::new(BufWriter::new(file))),
            _retention_days: retention_days,
        })
    }

    pub fn log_event(&self, mut event: CoordinationEvent) -> Result<(), Box<dyn std::error::Error>> {
        if event.timestamp_ms == 0 {
            event.timestamp_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
        }
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }

        let line = serde_json::to_string(&event)? + "\n";
        let mut writer = self.log_file.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

static GLOBAL_LOGGER: OnceCell<Arc<AuditLogger>> = OnceCell::new();

/// Installs the process-wide logger; called once during platform startup.
/// Components reached through [`crate::platform::PlatformContext`] should
/// prefer `ctx.audit_logger()` over this global, which exists for the rare
/// call site (e.g. a panic hook) with no context in scope.
pub fn install_global(logger: Arc<AuditLogger>) {
    let _ = GLOBAL_LOGGER.set(logger);
}

pub fn get_audit_logger() -> Option<Arc<AuditLogger>> {
    GLOBAL_LOGGER.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn logs_well_formed_coordination_event() {
        let temp_file = NamedTempFile::new().unwrap();
        let logger = AuditLogger::new(temp_file.path().to_str().unwrap(), 7).unwrap();

        let event = EventBuilder::new("tenant-a", "task.assigned")
            .task_id("11111111-1111-1111-1111-111111111111")
            .agent_id("agent-1")
            .attributes(serde_json::json!({ "strategy": "least_loaded" }))
            .build();

        assert!(logger.log_event(event).is_ok());

        let contents = std::fs::read_to_string(temp_file.path()).unwrap();
        let parsed: CoordinationEvent = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(parsed.tenant_id, "tenant-a");
        assert_eq!(parsed.event, "task.assigned");
    }
}
