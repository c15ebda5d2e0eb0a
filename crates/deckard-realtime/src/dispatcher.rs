//! Event Protocol Dispatcher
//!
//! Routes each inbound frame to the component that owns its effect: audio to
//! playback, history to the reconciler, persona/mood/thinking updates to the
//! persona and presentation state, everything else to the diagnostic log.

use crate::event_log::{Category, Severity};
use crate::history::IncomingMessage;
use crate::protocol::{ClientInfo, ClientMessage, InboundFrame, ServerEvent};
use crate::session::SessionState;
use crate::state::{PresentationHint, PresentationMode, normalize_persona};
use chrono::Utc;
use tracing::{debug, trace};

/// Parses and routes one text frame. A frame that cannot be parsed is logged
/// and discarded.
///
/// Returns a message the caller must send back to the peer, if any.
pub(crate) fn dispatch_text(state: &mut SessionState, text: &str) -> Option<ClientMessage> {
    match InboundFrame::parse(text) {
        Ok(frame) => dispatch(state, frame),
        Err(e) => {
            state.record(
                Severity::Error,
                Category::Protocol,
                "Discarded malformed frame",
                Some(e.to_string()),
            );
            None
        }
    }
}

pub(crate) fn dispatch(state: &mut SessionState, frame: InboundFrame) -> Option<ClientMessage> {
    let event = match frame {
        InboundFrame::Known(event) => event,
        InboundFrame::Unknown { kind, .. } => {
            state.record(
                Severity::Info,
                Category::Generic,
                "Event received",
                Some(kind),
            );
            return None;
        }
    };

    match event {
        ServerEvent::Audio { audio } => match state.playback.enqueue_base64(&audio) {
            Ok(seq) => trace!(seq, "Queued audio unit"),
            Err(e) => state.record(
                Severity::Warn,
                Category::Playback,
                "Skipped undecodable audio frame",
                Some(e.to_string()),
            ),
        },
        ServerEvent::AudioInterrupted => {
            let discarded = state.playback.interrupt();
            state.record(
                Severity::Info,
                Category::Playback,
                "Playback interrupted by peer",
                Some(format!("{} queued units discarded", discarded)),
            );
        }
        ServerEvent::AudioEnd => {
            state.record(Severity::Info, Category::Playback, "Audio turn ended", None);
        }
        ServerEvent::HistoryUpdated { history } => {
            let received_at = Utc::now();
            let records: Vec<_> = history
                .iter()
                .filter_map(|item| IncomingMessage::from_value(item, received_at))
                .collect();
            debug!(items = history.len(), messages = records.len(), "History snapshot");
            state.reconcile(records);
        }
        ServerEvent::HistoryAdded { item } => {
            if let Some(record) = item
                .as_ref()
                .and_then(|item| IncomingMessage::from_value(item, Utc::now()))
            {
                state.reconcile([record]);
            }
        }
        ServerEvent::TalkVideo {
            url,
            coordinated,
            persona,
            ..
        } => match url {
            Some(url) => {
                let persona = persona.map(|p| normalize_persona(&p));
                let hint = PresentationHint {
                    mode: PresentationMode::Talking,
                    persona: persona.or_else(|| Some(state.persona.clone())),
                    video_url: Some(url.clone()),
                    sentiment: state.presentation.sentiment.clone(),
                    coordinated,
                };
                state.set_presentation(hint);
                state.record(
                    Severity::Info,
                    Category::Presentation,
                    "Talk video ready",
                    Some(url),
                );
            }
            None => state.record(
                Severity::Warn,
                Category::Presentation,
                "Talk video without URL",
                None,
            ),
        },
        ServerEvent::TalkError { error, .. } => {
            state.record(
                Severity::Warn,
                Category::Presentation,
                "Talk video failed",
                error,
            );
        }
        ServerEvent::ToolStart { tool } => {
            state.record(
                Severity::Info,
                Category::Tool,
                format!("Tool started: {}", tool),
                None,
            );
        }
        ServerEvent::ToolEnd { tool, output } => {
            state.record(
                Severity::Info,
                Category::Tool,
                format!("Tool finished: {}", tool),
                output,
            );
        }
        ServerEvent::Handoff { from, to } => {
            state.record(
                Severity::Info,
                Category::Agent,
                "Agent handoff",
                Some(format!("{} to {}", from, to)),
            );
        }
        ServerEvent::AgentStart { agent } => {
            state.record(Severity::Info, Category::Agent, "Agent started", Some(agent));
        }
        ServerEvent::AgentEnd { agent } => {
            state.record(Severity::Info, Category::Agent, "Agent finished", Some(agent));
        }
        ServerEvent::ClientInfo(info) => dispatch_client_info(state, info),
        ServerEvent::GuardrailTripped { guardrail_results } => {
            let names: Vec<_> = guardrail_results.into_iter().map(|r| r.name).collect();
            state.record(
                Severity::Warn,
                Category::Guardrail,
                "Guardrail tripped",
                Some(names.join(", ")).filter(|s| !s.is_empty()),
            );
        }
        ServerEvent::InputAudioTimeoutTriggered => {
            state.record(
                Severity::Info,
                Category::Capture,
                "End of utterance detected",
                None,
            );
            return Some(ClientMessage::CommitAudio);
        }
        ServerEvent::RawModelEvent { raw_model_event } => {
            let kind = raw_model_event
                .as_ref()
                .and_then(|raw| raw.get("type"))
                .and_then(|t| t.as_str())
                .map(str::to_owned);
            state.record(Severity::Info, Category::Model, "Model event", kind);
        }
        ServerEvent::Error { error } => {
            state.record(
                Severity::Error,
                Category::Protocol,
                "Peer reported an error",
                Some(error.unwrap_or_else(|| "Unknown error".to_string())),
            );
        }
    }
    None
}

fn dispatch_client_info(state: &mut SessionState, info: ClientInfo) {
    match info.info.as_str() {
        "persona_set" => {
            if let Some(persona) = info.persona.as_deref().map(normalize_persona) {
                state.set_persona(persona.clone());
                state.record(
                    Severity::Info,
                    Category::Persona,
                    "Persona confirmed",
                    Some(persona),
                );
            }
        }
        "mood_update" => {
            if let Some(persona) = info.persona.as_deref().map(normalize_persona) {
                state.set_persona(persona);
            }
            if info.video.is_some() {
                state.idle_video = info.video.clone();
            }
            let hint = PresentationHint {
                mode: if state.thinking {
                    PresentationMode::Thinking
                } else {
                    PresentationMode::Idle
                },
                persona: Some(state.persona.clone()),
                video_url: state.idle_video.clone(),
                sentiment: info.sentiment.clone(),
                coordinated: false,
            };
            state.set_presentation(hint);
            state.record(Severity::Info, Category::Persona, "Mood updated", info.sentiment);
        }
        "thinking" => {
            state.set_thinking(true, info.message.clone());
            let hint = PresentationHint {
                mode: PresentationMode::Thinking,
                persona: Some(state.persona.clone()),
                video_url: info.video.or_else(|| state.idle_video.clone()),
                sentiment: state.presentation.sentiment.clone(),
                coordinated: false,
            };
            state.set_presentation(hint);
            state.record(Severity::Info, Category::Persona, "Thinking", info.message);
        }
        "thinking_done" => {
            state.set_thinking(false, None);
            let hint = PresentationHint {
                mode: PresentationMode::Idle,
                persona: Some(state.persona.clone()),
                video_url: state.idle_video.clone(),
                sentiment: state.presentation.sentiment.clone(),
                coordinated: false,
            };
            state.set_presentation(hint);
            state.record(Severity::Info, Category::Persona, "Done thinking", None);
        }
        "image_start_ack" => {
            state.record(Severity::Info, Category::Image, "Image upload acknowledged", info.id);
        }
        "image_chunk_ack" => {
            let detail = info.count.map(|count| format!("{} chunks received", count));
            state.record(Severity::Info, Category::Image, "Image chunks acknowledged", detail);
        }
        "image_enqueued" => {
            let detail = info.size.map(|size| format!("{} characters", size));
            state.record(Severity::Info, Category::Image, "Image delivered to model", detail);
        }
        other => {
            state.record(
                Severity::Info,
                Category::Generic,
                format!("Client info: {}", other),
                info.message,
            );
        }
    }
}
