//! Engine configuration.

use crate::capture::DEFAULT_CAPTURE_BLOCK_SIZE;
use crate::event_log::DEFAULT_MAX_LOG_ENTRIES;
use crate::history::DEFAULT_MAX_HISTORY;
use crate::state::DEFAULT_PERSONA;
use crate::upload::DEFAULT_IMAGE_CHUNK_SIZE;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Base URL of the peer; the session path is appended per connect.
    pub server_url: String,
    /// Fixed session id. When unset a random one is chosen on first connect
    /// and kept for the lifetime of the engine.
    pub session_id: Option<String>,
    pub persona: String,
    pub max_history: usize,
    pub max_log_entries: usize,
    pub image_chunk_size: usize,
    pub capture_block_size: usize,
    pub command_capacity: usize,
    pub outbound_capacity: usize,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_id: None,
            persona: DEFAULT_PERSONA.to_string(),
            max_history: DEFAULT_MAX_HISTORY,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            image_chunk_size: DEFAULT_IMAGE_CHUNK_SIZE,
            capture_block_size: DEFAULT_CAPTURE_BLOCK_SIZE,
            command_capacity: 64,
            outbound_capacity: 256,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// The WebSocket endpoint for one session: `{server_url}/ws/{session_id}`.
    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/ws/{}", self.server_url.trim_end_matches('/'), session_id)
    }
}
