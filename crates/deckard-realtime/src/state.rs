//! Observable engine state.
//!
//! The runtime owns every field; subscribers only ever see copies delivered as
//! [`EngineEvent`] diffs or a full [`EngineSnapshot`].

use crate::event_log::EventLogEntry;
use crate::history::ConversationMessage;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KNOWN_PERSONAS: &[&str] = &["mayank", "ryan", "agastya"];
pub const DEFAULT_PERSONA: &str = "mayank";

/// Normalizes a persona id the way the peer compares them.
pub fn normalize_persona(id: &str) -> String {
    id.trim().to_lowercase()
}

pub fn is_known_persona(id: &str) -> bool {
    KNOWN_PERSONAS.contains(&id)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// What a status indicator shows: the connection state, plus `Error` for a
/// session that ended in a failed connect or an unclean closure.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl StatusIndicator {
    pub fn from_state(state: ConnectionState, last_close_failed: bool) -> Self {
        match state {
            ConnectionState::Connecting => StatusIndicator::Connecting,
            ConnectionState::Connected => StatusIndicator::Connected,
            ConnectionState::Disconnected if last_close_failed => StatusIndicator::Error,
            ConnectionState::Disconnected => StatusIndicator::Disconnected,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    #[default]
    Idle,
    Thinking,
    Talking,
}

/// The single presentation hint the dispatcher maintains for the avatar view.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PresentationHint {
    pub mode: PresentationMode,
    pub persona: Option<String>,
    pub video_url: Option<String>,
    pub sentiment: Option<String>,
    /// Set for talk videos produced in step with the audio they lip-sync.
    pub coordinated: bool,
}

/// State diffs broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionChanged {
        state: ConnectionState,
        status: StatusIndicator,
    },
    MutedChanged(bool),
    CaptureChanged(bool),
    PersonaChanged(String),
    PresentationChanged(PresentationHint),
    ThinkingChanged {
        thinking: bool,
        message: Option<String>,
    },
    HistoryChanged(Vec<ConversationMessage>),
    LogAppended(EventLogEntry),
    PlaybackIdle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub session_id: Option<String>,
    pub state: ConnectionState,
    pub status: StatusIndicator,
    pub persona: String,
    pub muted: bool,
    pub capture_active: bool,
    pub thinking: bool,
    pub presentation: PresentationHint,
    pub history: Vec<ConversationMessage>,
    /// Newest first.
    pub log: Vec<EventLogEntry>,
    pub playback_queue_len: usize,
}
