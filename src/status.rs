//! Per-endpoint status records.
//!
//! A [`StatusRecord`] accumulates every anomaly seen during one polling
//! attempt.  Events are only ever appended; the top-level [`State`] is
//! derived from them, except for OFFLINE which only the scheduler sets.

use serde::{Deserialize, Serialize};

use crate::errors::{Category, PollError, Severity};

/// Overall endpoint health for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Ok,
    Warning,
    Error,
    Offline,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warning => "WARNING",
            State::Error => "ERROR",
            State::Offline => "OFFLINE",
        }
    }
}

/// One classified event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub severity: Severity,
    pub category: Category,
    pub name: String,
    pub code: String,
    pub message: String,
}

impl StatusEvent {
    /// `[SEVERITY][Name][code]`
    pub fn tag(&self) -> String {
        format!("[{}][{}][{}]", self.severity.as_str(), self.name, self.code)
    }
}

impl From<&PollError> for StatusEvent {
    fn from(err: &PollError) -> Self {
        StatusEvent {
            severity: err.severity(),
            category: err.category(),
            name: err.name().to_string(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Ordered history of status events for one endpoint and one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    events: Vec<StatusEvent>,
    #[serde(default)]
    offline: bool,
}

impl StatusRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a classified event.
    pub fn push(&mut self, err: &PollError) {
        self.events.push(StatusEvent::from(err));
    }

    /// Mark the endpoint offline for this cycle. Scheduler only.
    pub(crate) fn mark_offline(&mut self) {
        self.offline = true;
        self.push(&PollError::EndpointOffline);
    }

    pub fn state(&self) -> State {
        if self.offline {
            return State::Offline;
        }
        match self.events.iter().map(|e| e.severity).max() {
            None => State::Ok,
            Some(Severity::Warning) => State::Warning,
            Some(Severity::Error) => State::Error,
        }
    }

    /// The most severe event, latest among equals.
    pub fn status(&self) -> Option<&StatusEvent> {
        self.events
            .iter()
            .enumerate()
            .max_by_key(|(idx, e)| (e.severity, *idx))
            .map(|(_, e)| e)
    }

    /// Full ordered history.
    pub fn debug(&self) -> &[StatusEvent] {
        &self.events
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Codes of every recorded event, in order.
    pub fn codes(&self) -> Vec<String> {
        self.events.iter().map(|e| e.code.clone()).collect()
    }

    #[cfg(test)]
    pub fn has(&self, name: &str) -> bool {
        self.events.iter().any(|e| e.name == name)
    }

    /// Comma-separated event tags, or `[OK][OK][200]` when nothing happened.
    pub fn status_line(&self) -> String {
        if self.events.is_empty() {
            return "[OK][OK][200]".to_string();
        }
        self.events
            .iter()
            .map(|e| e.tag())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// -- Tests -------------------------------------------------------------------
