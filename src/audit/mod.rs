//! Structured audit trail
//!
//! Every significant pipeline step is recorded as an `AuditEvent`. Sinks never fail the
//! caller: write errors are logged and dropped.

use crate::config::{expand_path, AuditConfig};
use crate::error::{LesionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub event_type: String,
    pub level: AuditLevel,
    pub message: String,
    pub context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,
}

impl AuditEvent {
    pub fn new(
        component: impl Into<String>,
        event_type: impl Into<String>,
        level: AuditLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            component: component.into(),
            event_type: event_type.into(),
            level,
            message: message.into(),
            context: Value::Object(Default::default()),
            error: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_error(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(AuditError {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

fn trace_event(event: &AuditEvent) {
    match event.level {
        AuditLevel::Debug => tracing::debug!(
            "[{}] {} | event_id={}",
            event.event_type,
            event.message,
            event.event_id
        ),
        AuditLevel::Info => tracing::info!(
            "[{}] {} | event_id={}",
            event.event_type,
            event.message,
            event.event_id
        ),
        AuditLevel::Warning => tracing::warn!(
            "[{}] {} | event_id={}",
            event.event_type,
            event.message,
            event.event_id
        ),
        AuditLevel::Error => tracing::error!(
            "[{}] {} | event_id={}",
            event.event_type,
            event.message,
            event.event_id
        ),
    }
}

/// Mirrors events to the tracing subscriber only
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        trace_event(event);
    }
}

/// Appends one JSON line per event to `{log_dir}/{component}_{YYYYmmdd}.jsonl`
pub struct JsonlAuditSink {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&log_dir).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to create audit log directory: {}", log_dir.display()),
        })?;
        Ok(Self {
            log_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_file(&self, component: &str, at: DateTime<Utc>) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.jsonl", component, at.format("%Y%m%d")))
    }

    fn append(&self, event: &AuditEvent) -> std::result::Result<(), String> {
        let mut line = serde_json::to_string(event).map_err(|e| e.to_string())?;
        line.push('\n');

        let path = self.log_file(&event.component, event.timestamp);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| format!("{}: {}", path.display(), e))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!("Failed to write audit event {}: {}", event.event_id, e);
        }
        trace_event(event);
    }
}

/// Build the sink described by configuration
pub fn open_audit_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>> {
    if !config.enabled {
        return Ok(Arc::new(TracingAuditSink));
    }
    let log_dir = expand_path(&config.log_dir)?;
    Ok(Arc::new(JsonlAuditSink::new(log_dir)?))
}
