//! Connection Manager
//!
//! The runtime task owns the session: connection state, capture, playback,
//! history and the event log. Commands arrive from [`Engine`](super::Engine)
//! handles and are handled one at a time, so no two operations ever
//! interleave their outbound frames.

use super::{Command, SessionState};
use crate::capture::{self, CaptureDevice, CaptureError, CaptureOptions, CaptureStream};
use crate::config::EngineConfig;
use crate::dispatcher;
use crate::event_log::{Category, Severity};
use crate::history::{ConversationMessage, IncomingMessage, MessageRole};
use crate::playback::PlaybackNotice;
use crate::protocol::{self, ClientMessage};
use crate::state::{
    ConnectionState, EngineEvent, EngineSnapshot, StatusIndicator, is_known_persona,
    normalize_persona,
};
use crate::transport::{Connector, Transport, TransportError, TransportEvent};
use crate::upload::ImageUploadJob;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, info, instrument, trace, warn};
use uuid::Uuid;

/// Capture blocks waiting for the runtime. At 2400 samples per block this is
/// a few seconds of audio.
const CAPTURE_QUEUE_DEPTH: usize = 32;

type PendingConnect = JoinHandle<Result<Transport, TransportError>>;

pub(crate) struct Runtime {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    capture_device: Arc<dyn CaptureDevice>,
    commands: mpsc::Receiver<Command>,
    state: SessionState,
    connection: ConnectionState,
    last_close_failed: bool,
    session_id: Option<String>,
    pending_connect: Option<PendingConnect>,
    transport: Option<Transport>,
    capture: Option<Box<dyn CaptureStream>>,
    capture_tx: mpsc::Sender<Vec<i16>>,
    capture_rx: mpsc::Receiver<Vec<i16>>,
    playback_notices: mpsc::UnboundedReceiver<PlaybackNotice>,
}

impl Runtime {
    pub(crate) fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        capture_device: Arc<dyn CaptureDevice>,
        state: SessionState,
        commands: mpsc::Receiver<Command>,
        playback_notices: mpsc::UnboundedReceiver<PlaybackNotice>,
    ) -> Self {
        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_QUEUE_DEPTH);
        Self {
            config,
            connector,
            capture_device,
            commands,
            state,
            connection: ConnectionState::Disconnected,
            last_close_failed: false,
            session_id: None,
            pending_connect: None,
            transport: None,
            capture: None,
            capture_tx,
            capture_rx,
            playback_notices,
        }
    }

    /// Runs until a shutdown command arrives or every handle is dropped.
    #[instrument(name = "engine_runtime", skip_all, fields(session_id))]
    pub(crate) async fn run(mut self) {
        info!(persona = %self.state.persona, "Engine runtime started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All engine handles dropped.");
                        self.disconnect();
                        break;
                    }
                },
                result = wait_for_connect(&mut self.pending_connect) => {
                    self.on_connect_result(result).await;
                },
                event = next_transport_event(&mut self.transport) => {
                    self.on_transport_event(event).await;
                },
                Some(block) = self.capture_rx.recv() => self.on_capture_block(block),
                Some(notice) = self.playback_notices.recv() => self.on_playback_notice(notice),
            }
        }
        info!("Engine runtime stopped");
    }

    /// Returns false once the runtime should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(ack) => {
                self.connect();
                let _ = ack.send(());
            }
            Command::Disconnect(ack) => {
                self.disconnect();
                let _ = ack.send(());
            }
            Command::SetMuted(muted, ack) => {
                self.set_muted(muted);
                let _ = ack.send(());
            }
            Command::Interrupt(ack) => {
                self.interrupt().await;
                let _ = ack.send(());
            }
            Command::SendImage {
                payload,
                prompt,
                ack,
            } => {
                self.send_image(payload, prompt).await;
                let _ = ack.send(());
            }
            Command::SetPersona(persona, ack) => {
                self.set_persona(persona).await;
                let _ = ack.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(ack) => {
                self.disconnect();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> StatusIndicator {
        StatusIndicator::from_state(self.connection, self.last_close_failed)
    }

    /// Moves to `next` and appends the one log entry that records the move.
    fn transition(
        &mut self,
        next: ConnectionState,
        severity: Severity,
        title: &str,
        detail: Option<String>,
    ) {
        self.connection = next;
        let status = self.status();
        self.state.emit(EngineEvent::ConnectionChanged {
            state: next,
            status,
        });
        self.state
            .record(severity, Category::Connection, title, detail);
    }

    fn connect(&mut self) {
        if self.connection != ConnectionState::Disconnected {
            debug!(state = %self.connection, "Connect ignored");
            return;
        }

        let session_id = match &self.session_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .config
                    .session_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                tracing::Span::current().record("session_id", id.as_str());
                self.session_id = Some(id.clone());
                id
            }
        };
        let url = self.config.session_url(&session_id);

        self.last_close_failed = false;
        self.transition(
            ConnectionState::Connecting,
            Severity::Info,
            "Connecting",
            Some(url.clone()),
        );

        let connector = self.connector.clone();
        self.pending_connect = Some(tokio::spawn(
            async move { connector.connect(&url).await }.in_current_span(),
        ));
    }

    async fn on_connect_result(&mut self, result: Result<Transport, String>) {
        self.pending_connect = None;
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                let session_id = self.session_id.clone();
                self.transition(
                    ConnectionState::Connected,
                    Severity::Info,
                    "Connected",
                    session_id,
                );
                let persona = self.state.persona.clone();
                self.send(ClientMessage::SetPersona { persona }).await;
                self.start_capture().await;
            }
            Err(reason) => {
                self.last_close_failed = true;
                self.transition(
                    ConnectionState::Disconnected,
                    Severity::Error,
                    "Connection failed",
                    Some(reason),
                );
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => {
                if let Some(reply) = dispatcher::dispatch_text(&mut self.state, &text) {
                    self.send(reply).await;
                }
            }
            TransportEvent::Closed { clean, reason } => {
                self.last_close_failed = !clean;
                if clean {
                    self.teardown(Severity::Info, "Connection closed", reason);
                } else {
                    self.teardown(Severity::Warn, "Connection lost", reason);
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if self.connection == ConnectionState::Disconnected {
            return;
        }
        self.last_close_failed = false;
        self.teardown(Severity::Info, "Disconnected", None);
    }

    /// Releases everything tied to the connection, then records the move to
    /// `Disconnected`.
    fn teardown(&mut self, severity: Severity, title: &str, detail: Option<String>) {
        if let Some(pending) = self.pending_connect.take() {
            pending.abort();
        }
        self.stop_capture();
        let discarded = self.state.playback.interrupt();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.state.set_thinking(false, None);
        debug!(discarded, "Session resources released");
        self.transition(ConnectionState::Disconnected, severity, title, detail);
    }

    async fn start_capture(&mut self) {
        let on_samples =
            capture::block_forwarder(self.config.capture_block_size, self.capture_tx.clone());
        let device = self.capture_device.clone();
        let opened =
            tokio::task::spawn_blocking(move || device.open(&CaptureOptions::default(), on_samples))
                .await
                .unwrap_or_else(|e| Err(CaptureError::Device(e.to_string())));
        match opened {
            Ok(stream) => {
                self.capture = Some(stream);
                self.state.set_capture_active(true);
                self.state.record(
                    Severity::Info,
                    Category::Capture,
                    "Microphone capture started",
                    None,
                );
            }
            Err(e) => {
                self.state.record(
                    Severity::Error,
                    Category::Capture,
                    "Microphone unavailable",
                    Some(e.to_string()),
                );
            }
        }
    }

    fn stop_capture(&mut self) {
        if let Some(mut stream) = self.capture.take() {
            stream.stop();
            self.state.set_capture_active(false);
            self.state.record(
                Severity::Info,
                Category::Capture,
                "Microphone capture stopped",
                None,
            );
        }
        while self.capture_rx.try_recv().is_ok() {}
    }

    fn on_capture_block(&mut self, block: Vec<i16>) {
        if self.connection != ConnectionState::Connected || self.state.muted {
            trace!(len = block.len(), "Dropping capture block");
            return;
        }
        let Some(transport) = &self.transport else {
            return;
        };
        match protocol::encode(&ClientMessage::Audio { data: block }) {
            Ok(text) => {
                if transport.outbound.try_send(text).is_err() {
                    trace!("Outbound queue full; dropping capture block");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode capture block"),
        }
    }

    fn on_playback_notice(&mut self, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::Started { seq } => trace!(seq, "Playback unit started"),
            PlaybackNotice::UnitFailed { seq, reason } => self.state.record(
                Severity::Warn,
                Category::Playback,
                "Skipped audio unit",
                Some(format!("unit {}: {}", seq, reason)),
            ),
            PlaybackNotice::Idle => self.state.emit(EngineEvent::PlaybackIdle),
        }
    }

    /// Sends one control message, waiting for room in the outbound queue.
    /// Returns false if there is no open transport.
    async fn send(&mut self, message: ClientMessage) -> bool {
        let Some(transport) = &self.transport else {
            debug!(kind = message.kind(), "No transport; message not sent");
            return false;
        };
        let kind = message.kind();
        let text = match protocol::encode(&message) {
            Ok(text) => text,
            Err(e) => {
                self.state.record(
                    Severity::Error,
                    Category::Protocol,
                    "Failed to encode message",
                    Some(format!("{}: {}", kind, e)),
                );
                return false;
            }
        };
        if transport.outbound.send(text).await.is_err() {
            debug!(kind, "Transport closed before message was sent");
            return false;
        }
        trace!(kind, "Sent");
        true
    }

    fn set_muted(&mut self, muted: bool) {
        if self.state.set_muted(muted) {
            let title = if muted {
                "Microphone muted"
            } else {
                "Microphone unmuted"
            };
            self.state.record(Severity::Info, Category::Capture, title, None);
        }
    }

    async fn interrupt(&mut self) {
        let discarded = self.state.playback.interrupt();
        if self.connection == ConnectionState::Connected {
            self.send(ClientMessage::Interrupt).await;
        }
        self.state.record(
            Severity::Info,
            Category::Playback,
            "Interrupted",
            Some(format!("{} queued units discarded", discarded)),
        );
    }

    async fn send_image(&mut self, payload: String, prompt: String) {
        if self.connection != ConnectionState::Connected {
            self.state.record(
                Severity::Warn,
                Category::Image,
                "Image not sent",
                Some("not connected".to_string()),
            );
            return;
        }

        self.interrupt().await;

        let job = ImageUploadJob::new(payload, prompt);
        let optimistic = ConversationMessage::optimistic(
            MessageRole::User,
            job.prompt.clone(),
            vec![job.payload.clone()],
        );
        self.state.reconcile([IncomingMessage::from(optimistic)]);

        let id = job.id.clone();
        let size = job.payload.len();
        let frames = job.into_frames(self.config.image_chunk_size);
        let chunks = frames.len().saturating_sub(2);
        for frame in frames {
            if !self.send(frame).await {
                self.state.record(
                    Severity::Warn,
                    Category::Image,
                    "Image upload aborted",
                    Some(id),
                );
                return;
            }
        }
        self.state.record(
            Severity::Info,
            Category::Image,
            "Image sent",
            Some(format!("{} chunks, {} characters", chunks, size)),
        );
    }

    async fn set_persona(&mut self, persona: String) {
        let persona = normalize_persona(&persona);
        if persona.is_empty() {
            self.state.record(
                Severity::Warn,
                Category::Persona,
                "Persona not changed",
                Some("empty persona id".to_string()),
            );
            return;
        }
        if !is_known_persona(&persona) {
            self.state.record(
                Severity::Warn,
                Category::Persona,
                "Unknown persona",
                Some(persona.clone()),
            );
        }
        if self.state.set_persona(persona.clone()) {
            self.state.record(
                Severity::Info,
                Category::Persona,
                "Persona selected",
                Some(persona.clone()),
            );
        }
        if self.connection == ConnectionState::Connected {
            self.send(ClientMessage::SetPersona { persona }).await;
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session_id: self.session_id.clone(),
            state: self.connection,
            status: self.status(),
            persona: self.state.persona.clone(),
            muted: self.state.muted,
            capture_active: self.state.capture_active,
            thinking: self.state.thinking,
            presentation: self.state.presentation.clone(),
            history: self.state.history.messages().to_vec(),
            log: self.state.event_log.newest_first(),
            playback_queue_len: self.state.playback.queue_len(),
        }
    }
}

async fn wait_for_connect(pending: &mut Option<PendingConnect>) -> Result<Transport, String> {
    match pending {
        Some(handle) => match handle.await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("connect task failed: {}", e)),
        },
        None => std::future::pending().await,
    }
}

async fn next_transport_event(transport: &mut Option<Transport>) -> TransportEvent {
    match transport {
        Some(transport) => transport
            .inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed {
                clean: false,
                reason: Some("transport task ended".to_string()),
            }),
        None => std::future::pending().await,
    }
}
