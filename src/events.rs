//! Fire-and-forget observability events.
//!
//! Components report security-relevant transitions (triggered bot signals,
//! hijack recovery, lockouts) through an [`EventSink`]. A sink must never
//! block the request or fail it: `fire` has no return value and
//! implementations swallow their own errors.

use serde_json::Value;
use std::sync::Mutex;
use tracing::{error, info};

pub const BOT_SIGNAL: &str = "bot_signal";
pub const BOT_SCORE: &str = "bot_score";
pub const SESSION_STARTED: &str = "session_started";
pub const SESSION_REGENERATED: &str = "session_regenerated";
pub const SESSION_HIJACK_DETECTED: &str = "session_hijack_detected";
pub const AUTH_LOGIN_SUCCEEDED: &str = "auth_login_succeeded";
pub const AUTH_LOGIN_FAILED: &str = "auth_login_failed";
pub const AUTH_LOCKED: &str = "auth_locked";
pub const AUTH_LOGIN_REJECTED_LOCKED: &str = "auth_login_rejected_locked";
pub const AUTH_TIMEOUT: &str = "auth_timeout";
pub const AUTH_LOGOUT: &str = "auth_logout";
pub const AUTH_STORE_CONFLICT: &str = "auth_store_conflict";

pub trait EventSink: Send + Sync {
    fn fire(&self, name: &str, data: &Value);
}

/// Forwards events to `tracing` under the `aegis_guard::events` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn fire(&self, name: &str, data: &Value) {
        info!(target: "aegis_guard::events", event = name, data = %data);
    }
}

/// Drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn fire(&self, _name: &str, _data: &Value) {}
}

/// A fired event, as captured by [`RecordingEventSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub data: Value,
}

/// Keeps every event in memory. Used by tests and the CLI's `score` report.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name == name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.named(name).len()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for RecordingEventSink {
    fn fire(&self, name: &str, data: &Value) {
        match self.events.lock() {
            Ok(mut events) => events.push(RecordedEvent {
                name: name.to_string(),
                data: data.clone(),
            }),
            // Never propagate; a poisoned recorder only loses the event
            Err(_) => error!("Event recorder poisoned, dropping '{}'", name),
        }
    }
}
