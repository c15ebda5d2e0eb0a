//! The engine handle and the runtime task behind it.

mod runtime;
mod state;

pub(crate) use state::SessionState;

use crate::capture::{CaptureDevice, NoCaptureDevice};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::playback::{AudioOutput, SilentOutput};
use crate::state::{EngineEvent, EngineSnapshot};
use crate::transport::{Connector, WsConnector};
use runtime::Runtime;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

pub(crate) enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    SetMuted(bool, oneshot::Sender<()>),
    Interrupt(oneshot::Sender<()>),
    SendImage {
        payload: String,
        prompt: String,
        ack: oneshot::Sender<()>,
    },
    SetPersona(String, oneshot::Sender<()>),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Wires the platform seams into a new engine.
pub struct EngineBuilder {
    config: EngineConfig,
    connector: Option<Arc<dyn Connector>>,
    capture: Arc<dyn CaptureDevice>,
    output: Arc<dyn AudioOutput>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            connector: None,
            capture: Arc::new(NoCaptureDevice),
            output: Arc::new(SilentOutput),
        }
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn capture_device(mut self, capture: Arc<dyn CaptureDevice>) -> Self {
        self.capture = capture;
        self
    }

    pub fn audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = output;
        self
    }

    /// Spawns the runtime task. Must be called from within a Tokio runtime.
    pub fn spawn(self) -> (Engine, JoinHandle<()>) {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new(self.config.outbound_capacity)));
        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (events_tx, _) = broadcast::channel(self.config.event_capacity.max(1));
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let state = SessionState::new(&self.config, self.output, notices_tx, events_tx.clone());
        let runtime = Runtime::new(
            self.config,
            connector,
            self.capture,
            state,
            commands_rx,
            notices_rx,
        );
        let handle = tokio::spawn(runtime.run());
        (
            Engine {
                commands: commands_tx,
                events: events_tx,
            },
            handle,
        )
    }
}

/// A cheap, cloneable handle to a running engine.
///
/// Every operation is queued to the runtime and resolves once the runtime has
/// handled it. Outcomes that take longer, such as the connection actually
/// opening, are observed through [`Engine::subscribe`].
#[derive(Clone)]
pub struct Engine {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Starts connecting. Ignored unless the engine is disconnected.
    pub async fn connect(&self) -> Result<(), EngineError> {
        self.request(Command::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.request(Command::Disconnect).await
    }

    /// While muted, capture keeps running but no audio leaves the engine.
    pub async fn set_muted(&self, muted: bool) -> Result<(), EngineError> {
        self.request(|ack| Command::SetMuted(muted, ack)).await
    }

    pub async fn interrupt(&self) -> Result<(), EngineError> {
        self.request(Command::Interrupt).await
    }

    /// Sends an encoded image (typically a data URL) with an optional prompt.
    pub async fn send_image(
        &self,
        payload: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<(), EngineError> {
        let payload = payload.into();
        let prompt = prompt.into();
        self.request(|ack| Command::SendImage {
            payload,
            prompt,
            ack,
        })
        .await
    }

    pub async fn set_persona(&self, persona: impl Into<String>) -> Result<(), EngineError> {
        let persona = persona.into();
        self.request(|ack| Command::SetPersona(persona, ack)).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        self.request(Command::Snapshot).await
    }

    /// Disconnects and stops the runtime. Later calls on any handle fail with
    /// [`EngineError::Closed`].
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(Command::Shutdown).await
    }
}
