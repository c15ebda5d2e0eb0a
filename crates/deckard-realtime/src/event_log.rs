//! Bounded, append-only diagnostic trail.
//!
//! Every error and warning the engine encounters ends up here rather than being
//! returned to the caller. Each append is mirrored to `tracing` so headless
//! deployments get the same trail in their logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_MAX_LOG_ENTRIES: usize = 200;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// What part of the session an entry is about.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Connection,
    Capture,
    Playback,
    History,
    Persona,
    Presentation,
    Tool,
    Agent,
    Guardrail,
    Model,
    Image,
    Protocol,
    Generic,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Connection => "connection",
            Category::Capture => "capture",
            Category::Playback => "playback",
            Category::History => "history",
            Category::Persona => "persona",
            Category::Presentation => "presentation",
            Category::Tool => "tool",
            Category::Agent => "agent",
            Category::Guardrail => "guardrail",
            Category::Model => "model",
            Category::Image => "image",
            Category::Protocol => "protocol",
            Category::Generic => "generic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventLogEntry {
    pub id: u64,
    pub category: Category,
    pub title: String,
    pub detail: Option<String>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity log; the oldest entry is evicted once `capacity` is exceeded.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
    next_id: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    /// Appends an entry and returns a copy of it.
    pub fn append(
        &mut self,
        severity: Severity,
        category: Category,
        title: impl Into<String>,
        detail: Option<String>,
    ) -> EventLogEntry {
        let entry = EventLogEntry {
            id: self.next_id,
            category,
            title: title.into(),
            detail,
            severity,
            timestamp: Utc::now(),
        };
        self.next_id += 1;

        let detail = entry.detail.as_deref().unwrap_or("");
        match severity {
            Severity::Info => tracing::info!(
                target: "deckard_realtime::diagnostics",
                category = %category,
                detail,
                "{}",
                entry.title
            ),
            Severity::Warn => tracing::warn!(
                target: "deckard_realtime::diagnostics",
                category = %category,
                detail,
                "{}",
                entry.title
            ),
            Severity::Error => tracing::error!(
                target: "deckard_realtime::diagnostics",
                category = %category,
                detail,
                "{}",
                entry.title
            ),
        }

        self.entries.push_back(entry.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in append order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.entries.iter()
    }

    /// Entries in reverse-chronological order, the way the log is displayed.
    pub fn newest_first(&self) -> Vec<EventLogEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn last(&self) -> Option<&EventLogEntry> {
        self.entries.back()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_increasing_ids() {
        let mut log = EventLog::new(10);
        let a = log.append(Severity::Info, Category::Connection, "Connecting", None);
        let b = log.append(Severity::Warn, Category::Capture, "Muted", None);
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(b.severity, Severity::Warn);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_oldest_entries_are_evicted() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.append(Severity::Info, Category::Generic, format!("entry {}", i), None);
        }
        assert_eq!(log.len(), 3);
        let titles: Vec<_> = log.iter().map(|e| e.title.clone()).collect();
        assert_eq!(titles, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_newest_first_order() {
        let mut log = EventLog::new(10);
        log.append(Severity::Info, Category::Generic, "first", None);
        log.append(Severity::Error, Category::Protocol, "second", Some("bad json".into()));
        let entries = log.newest_first();
        assert_eq!(entries[0].title, "second");
        assert_eq!(entries[0].detail.as_deref(), Some("bad json"));
        assert_eq!(entries[1].title, "first");
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(serde_json::to_string(&Severity::Warn).unwrap(), "\"warn\"");
        assert_eq!(format!("{}", Severity::Error), "error");
        assert_eq!(format!("{}", Category::Guardrail), "guardrail");
    }
}
