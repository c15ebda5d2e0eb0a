use crate::config::EngineConfig;
use crate::event_log::{Category, EventLog, Severity};
use crate::history::{HistoryReconciler, IncomingMessage};
use crate::playback::{AudioOutput, PlaybackNotice, PlaybackScheduler};
use crate::state::{EngineEvent, PresentationHint, normalize_persona};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Everything the runtime owns apart from the connection itself.
///
/// Every mutator broadcasts the matching [`EngineEvent`] when, and only
/// when, the value actually changes.
pub(crate) struct SessionState {
    pub persona: String,
    pub muted: bool,
    pub capture_active: bool,
    pub thinking: bool,
    pub presentation: PresentationHint,
    /// Last idle video announced by a mood update, restored after thinking.
    pub idle_video: Option<String>,
    pub history: HistoryReconciler,
    pub event_log: EventLog,
    pub playback: PlaybackScheduler,
    events: broadcast::Sender<EngineEvent>,
}

impl SessionState {
    pub fn new(
        config: &EngineConfig,
        output: Arc<dyn AudioOutput>,
        notices: mpsc::UnboundedSender<PlaybackNotice>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            persona: normalize_persona(&config.persona),
            muted: false,
            capture_active: false,
            thinking: false,
            presentation: PresentationHint::default(),
            idle_video: None,
            history: HistoryReconciler::new(config.max_history),
            event_log: EventLog::new(config.max_log_entries),
            playback: PlaybackScheduler::new(output, notices),
            events,
        }
    }

    /// Subscribers may come and go; a send with none attached is fine.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn record(
        &mut self,
        severity: Severity,
        category: Category,
        title: impl Into<String>,
        detail: Option<String>,
    ) {
        let entry = self.event_log.append(severity, category, title, detail);
        self.emit(EngineEvent::LogAppended(entry));
    }

    pub fn set_persona(&mut self, persona: String) -> bool {
        if self.persona == persona {
            return false;
        }
        self.persona = persona.clone();
        self.emit(EngineEvent::PersonaChanged(persona));
        true
    }

    pub fn set_muted(&mut self, muted: bool) -> bool {
        if self.muted == muted {
            return false;
        }
        self.muted = muted;
        self.emit(EngineEvent::MutedChanged(muted));
        true
    }

    pub fn set_capture_active(&mut self, active: bool) {
        if self.capture_active != active {
            self.capture_active = active;
            self.emit(EngineEvent::CaptureChanged(active));
        }
    }

    pub fn set_thinking(&mut self, thinking: bool, message: Option<String>) {
        if self.thinking != thinking || message.is_some() {
            self.thinking = thinking;
            self.emit(EngineEvent::ThinkingChanged { thinking, message });
        }
    }

    pub fn set_presentation(&mut self, hint: PresentationHint) {
        if self.presentation != hint {
            self.presentation = hint.clone();
            self.emit(EngineEvent::PresentationChanged(hint));
        }
    }

    pub fn reconcile(&mut self, records: impl IntoIterator<Item = IncomingMessage>) {
        if self.history.reconcile_all(records) {
            self.emit(EngineEvent::HistoryChanged(self.history.messages().to_vec()));
        }
    }
}
