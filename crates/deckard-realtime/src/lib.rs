//! Deckard Realtime Engine
//!
//! The client side of a persona voice conversation: it streams microphone
//! audio to the conversation server over one WebSocket, plays back the
//! audio it receives, keeps a reconciled transcript, uploads images in
//! chunks, and records everything notable in a bounded diagnostic log.
//!
//! Start an [`Engine`] with [`Engine::builder`], plugging in the platform
//! seams ([`CaptureDevice`], [`AudioOutput`], [`Connector`]) and observe it
//! through [`Engine::subscribe`] and [`Engine::snapshot`].

pub mod audio_utils;
pub mod capture;
pub mod config;
mod dispatcher;
pub mod error;
pub mod event_log;
pub mod history;
pub mod playback;
pub mod protocol;
mod session;
pub mod state;
pub mod transport;
pub mod upload;

pub use capture::{CaptureDevice, CaptureError, CaptureOptions, CaptureStream, SampleCallback};
pub use config::EngineConfig;
pub use error::EngineError;
pub use event_log::{Category, EventLogEntry, Severity};
pub use history::{ConversationMessage, MessageRole, Provenance};
pub use playback::{AudioOutput, PlaybackError, PlaybackUnit, Voice, VoiceControl};
pub use session::{Engine, EngineBuilder};
pub use state::{
    ConnectionState, EngineEvent, EngineSnapshot, PresentationHint, PresentationMode,
    StatusIndicator,
};
pub use transport::{Connector, Transport, TransportError, TransportEvent, WsConnector};
