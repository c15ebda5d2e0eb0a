//! Wire types for the Deckard realtime session protocol.
//!
//! Every frame on the session socket is a UTF-8 text message holding one JSON
//! object with a mandatory `type` discriminator. [`ClientMessage`] covers the
//! client → peer direction, [`ServerEvent`] the peer → client direction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from the client to the conversational peer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One captured block of 24 kHz mono PCM16 audio.
    Audio { data: Vec<i16> },
    /// Requests a persona switch on the peer.
    SetPersona { persona: String },
    /// Asks the peer to stop producing output for the in-flight turn.
    Interrupt,
    /// Acknowledges an end-of-utterance signal by closing the input buffer.
    CommitAudio,
    /// Opens a chunked image upload.
    ImageStart { id: String, text: String },
    /// One contiguous slice of the image payload.
    ImageChunk { id: String, chunk: String },
    /// Closes a chunked image upload.
    ImageEnd { id: String },
}

impl ClientMessage {
    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Audio { .. } => "audio",
            ClientMessage::SetPersona { .. } => "set_persona",
            ClientMessage::Interrupt => "interrupt",
            ClientMessage::CommitAudio => "commit_audio",
            ClientMessage::ImageStart { .. } => "image_start",
            ClientMessage::ImageChunk { .. } => "image_chunk",
            ClientMessage::ImageEnd { .. } => "image_end",
        }
    }
}

/// Events pushed by the peer.
///
/// Fields the peer may omit are optional so that a sparse but otherwise valid
/// event is still routed rather than rejected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A lip-synced video for the last spoken turn is ready.
    TalkVideo {
        url: Option<String>,
        #[serde(default)]
        coordinated: bool,
        persona: Option<String>,
        talk_id: Option<String>,
        status: Option<String>,
    },
    /// Video generation for the last turn failed.
    TalkError {
        error: Option<String>,
        persona: Option<String>,
    },
    /// One base64 encoded block of PCM16 output audio.
    Audio { audio: String },
    AudioInterrupted,
    AudioEnd,
    /// A full snapshot of the conversation history.
    HistoryUpdated {
        #[serde(default)]
        history: Vec<Value>,
    },
    /// A single history item was appended.
    HistoryAdded { item: Option<Value> },
    ToolStart { tool: String },
    ToolEnd {
        tool: String,
        output: Option<String>,
    },
    Handoff { from: String, to: String },
    AgentStart { agent: String },
    AgentEnd { agent: String },
    ClientInfo(ClientInfo),
    GuardrailTripped {
        #[serde(default)]
        guardrail_results: Vec<GuardrailResult>,
    },
    /// The peer detected end-of-utterance silence.
    InputAudioTimeoutTriggered,
    RawModelEvent { raw_model_event: Option<Value> },
    Error { error: Option<String> },
}

impl ServerEvent {
    /// Every `type` value this crate knows how to decode.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "talk_video",
        "talk_error",
        "audio",
        "audio_interrupted",
        "audio_end",
        "history_updated",
        "history_added",
        "tool_start",
        "tool_end",
        "handoff",
        "agent_start",
        "agent_end",
        "client_info",
        "guardrail_tripped",
        "input_audio_timeout_triggered",
        "raw_model_event",
        "error",
    ];

    pub fn is_known_type(kind: &str) -> bool {
        Self::KNOWN_TYPES.contains(&kind)
    }
}

/// Informational side-channel messages (`type: "client_info"`).
///
/// The `info` value selects which of the optional fields are meaningful.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ClientInfo {
    pub info: String,
    pub message: Option<String>,
    pub video: Option<String>,
    pub persona: Option<String>,
    pub sentiment: Option<String>,
    pub id: Option<String>,
    pub count: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GuardrailResult {
    pub name: String,
}

/// One conversation item as carried by `history_updated` / `history_added`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HistoryItem {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub item_id: Option<String>,
    pub role: Option<String>,
    pub content: Option<Vec<ContentPart>>,
    /// Epoch seconds, epoch milliseconds or an RFC 3339 string.
    pub created_at: Option<Value>,
}

impl HistoryItem {
    pub fn is_message(&self) -> bool {
        self.kind.as_deref() == Some("message")
    }
}

/// One part of a history item's content list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<String>,
    pub transcript: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
}

impl ContentPart {
    /// The textual payload of this part, preferring `text` over `transcript`.
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.transcript.as_deref().filter(|t| !t.is_empty()))
    }

    pub fn image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.is_empty())
    }
}
