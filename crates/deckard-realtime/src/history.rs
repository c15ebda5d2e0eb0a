//! Conversation History Reconciler
//!
//! Keeps a single transcript ordered by creation time, fed by two sources:
//! optimistic entries created locally (for example right after an image is
//! sent) and peer-confirmed entries arriving as snapshots or single appends.
//! Records with the same identifier are merged field by field, never replaced.

use chrono::{DateTime, TimeZone, Utc};
use deckard_realtime_types::HistoryItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_MAX_HISTORY: usize = 200;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    LocalOptimistic,
    PeerConfirmed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationMessage {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl ConversationMessage {
    /// A locally generated entry shown before the peer confirms it.
    pub fn optimistic(role: MessageRole, text: impl Into<String>, images: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            role,
            text: text.into(),
            images,
            created_at: now,
            updated_at: now,
            provenance: Provenance::LocalOptimistic,
        }
    }
}

/// An incoming record, before it is merged. `role` is optional because
/// streaming updates may not carry it yet.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub id: String,
    pub role: Option<MessageRole>,
    pub text: String,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl IncomingMessage {
    /// Builds a peer-confirmed record from a wire history item.
    ///
    /// Returns `None` for items that are not messages or have no identifier.
    /// `received_at` stands in for a missing or unreadable `created_at`.
    pub fn from_item(item: &HistoryItem, received_at: DateTime<Utc>) -> Option<Self> {
        if !item.is_message() {
            return None;
        }
        let id = item.item_id.clone().filter(|id| !id.is_empty())?;
        let parts = item.content.as_deref().unwrap_or_default();
        let text = parts
            .iter()
            .filter_map(|p| p.text())
            .collect::<Vec<_>>()
            .join("\n");
        let images = parts
            .iter()
            .filter_map(|p| p.image().map(str::to_owned))
            .collect();
        let created_at = item
            .created_at
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or(received_at);
        Some(Self {
            id,
            role: item.role.as_deref().and_then(MessageRole::parse),
            text,
            images,
            created_at,
            provenance: Provenance::PeerConfirmed,
        })
    }

    /// Parses a raw JSON history item; anything unreadable is skipped.
    pub fn from_value(value: &Value, received_at: DateTime<Utc>) -> Option<Self> {
        let item: HistoryItem = serde_json::from_value(value.clone()).ok()?;
        Self::from_item(&item, received_at)
    }
}

impl From<ConversationMessage> for IncomingMessage {
    fn from(msg: ConversationMessage) -> Self {
        Self {
            id: msg.id,
            role: Some(msg.role),
            text: msg.text,
            images: msg.images,
            created_at: msg.created_at,
            provenance: msg.provenance,
        }
    }
}

/// Accepts epoch seconds, epoch milliseconds or an RFC 3339 string.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            // Anything past year ~5138 in seconds is taken to be milliseconds.
            let millis = if raw.abs() >= 1e11 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

#[derive(Debug)]
pub struct HistoryReconciler {
    messages: Vec<ConversationMessage>,
    max_messages: usize,
}

impl HistoryReconciler {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Merges one record. Returns `true` if the transcript changed.
    pub fn reconcile(&mut self, incoming: IncomingMessage) -> bool {
        let changed = self.merge(incoming);
        if changed {
            self.normalize();
        }
        changed
    }

    /// Merges a batch of records with a single re-sort/eviction pass at the end.
    pub fn reconcile_all(&mut self, incoming: impl IntoIterator<Item = IncomingMessage>) -> bool {
        let mut changed = false;
        for record in incoming {
            changed |= self.merge(record);
        }
        if changed {
            self.normalize();
        }
        changed
    }

    /// Index of the record `incoming` merges into: the same id, else a local
    /// optimistic record the peer is now confirming under its own id.
    fn position(&self, incoming: &IncomingMessage) -> Option<usize> {
        if let Some(index) = self.messages.iter().position(|m| m.id == incoming.id) {
            return Some(index);
        }
        if incoming.provenance != Provenance::PeerConfirmed || incoming.images.is_empty() {
            return None;
        }
        self.messages.iter().position(|m| {
            m.provenance == Provenance::LocalOptimistic
                && incoming.role.is_none_or(|role| role == m.role)
                && m.images.iter().any(|image| incoming.images.contains(image))
        })
    }

    fn merge(&mut self, incoming: IncomingMessage) -> bool {
        let Some(existing) = self
            .position(&incoming)
            .map(|index| &mut self.messages[index])
        else {
            self.messages.push(ConversationMessage {
                id: incoming.id,
                role: incoming.role.unwrap_or(MessageRole::Assistant),
                text: incoming.text,
                images: incoming.images,
                created_at: incoming.created_at,
                updated_at: Utc::now(),
                provenance: incoming.provenance,
            });
            return true;
        };

        let mut merged = existing.clone();
        merged.id = incoming.id;
        merged.created_at = merged.created_at.min(incoming.created_at);
        if !incoming.text.is_empty() {
            merged.text = incoming.text;
        }
        if !incoming.images.is_empty() {
            merged.images = incoming.images;
        }
        if let Some(role) = incoming.role {
            merged.role = role;
        }
        if incoming.provenance == Provenance::PeerConfirmed {
            merged.provenance = Provenance::PeerConfirmed;
        }

        if merged == *existing {
            return false;
        }
        merged.updated_at = Utc::now();
        *existing = merged;
        true
    }

    fn normalize(&mut self) {
        // Stable: equal timestamps keep their arrival order.
        self.messages.sort_by_key(|m| m.created_at);
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for HistoryReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}
