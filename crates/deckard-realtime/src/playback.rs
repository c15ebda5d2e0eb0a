//! Audio Playback Scheduler
//!
//! Inbound audio frames become independent playback units, each shaped by a
//! short linear fade-in/fade-out envelope so that consecutive units join without
//! clicks. A single playback loop task plays units strictly in arrival order,
//! one at a time, awaiting each unit's natural end before starting the next.
//!
//! Interruption clears the queue, fades the sounding unit down and bumps a
//! generation counter; a loop from an older generation exits at its next step
//! and never starts another unit.

use crate::audio_utils::{self, SESSION_PCM16_SAMPLE_RATE};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub const MIN_RAMP: Duration = Duration::from_millis(5);
pub const MAX_RAMP: Duration = Duration::from_millis(20);

/// `min(20 ms, max(5 ms, unit / 8))`.
pub fn ramp_duration(unit_duration: Duration) -> Duration {
    (unit_duration / 8).clamp(MIN_RAMP, MAX_RAMP)
}

/// Applies a linear ramp-up over the first `ramp` samples and a ramp-down over
/// the last `ramp` samples. The ramp is limited to half the buffer.
pub fn apply_envelope(samples: &mut [f32], ramp: usize) {
    let ramp = ramp.min(samples.len() / 2);
    if ramp == 0 {
        return;
    }
    let len = samples.len();
    for i in 0..ramp {
        let gain = i as f32 / ramp as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PlaybackError {
    #[error("failed to decode audio frame: {0}")]
    Decode(String),
    #[error("audio output error: {0}")]
    Device(String),
}

/// One decoded, enveloped audio block ready for output.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    pub seq: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub ramp_samples: usize,
}

impl PlaybackUnit {
    pub fn from_pcm16(seq: u64, pcm16: &[i16], sample_rate: u32) -> Self {
        let mut samples = audio_utils::convert_i16_to_f32(pcm16);
        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
        let ramp = ramp_duration(duration);
        let ramp_samples =
            ((ramp.as_secs_f64() * sample_rate as f64).round() as usize).min(samples.len() / 2);
        apply_envelope(&mut samples, ramp_samples);
        Self {
            seq,
            samples,
            sample_rate,
            ramp_samples,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn ramp(&self) -> Duration {
        Duration::from_secs_f64(self.ramp_samples as f64 / self.sample_rate as f64)
    }
}

/// Control over a unit that is currently sounding.
pub trait VoiceControl: Send {
    /// Ramps the gain down to silence over `ramp` and then stops the unit.
    fn fade_out(&mut self, ramp: Duration);
}

/// A unit handed to the output: completion signal plus control handle.
pub struct Voice {
    finished: oneshot::Receiver<()>,
    control: Box<dyn VoiceControl>,
}

impl Voice {
    /// `finished` must resolve when the unit reaches its natural end. An
    /// output that queues units back to back may resolve it slightly early.
    pub fn new(finished: oneshot::Receiver<()>, control: Box<dyn VoiceControl>) -> Self {
        Self { finished, control }
    }
}

/// Platform seam for sound output. `start` must not block.
pub trait AudioOutput: Send + Sync + 'static {
    fn start(&self, unit: PlaybackUnit) -> Result<Voice, PlaybackError>;
}

/// Output that produces no sound but honours each unit's duration, so the
/// scheduler behaves the same on hosts without a speaker.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

struct SilentVoice {
    timer: tokio::task::JoinHandle<()>,
}

impl VoiceControl for SilentVoice {
    fn fade_out(&mut self, _ramp: Duration) {
        self.timer.abort();
    }
}

impl AudioOutput for SilentOutput {
    fn start(&self, unit: PlaybackUnit) -> Result<Voice, PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();
        let duration = unit.duration();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = done_tx.send(());
        });
        Ok(Voice::new(done_rx, Box::new(SilentVoice { timer })))
    }
}

/// Reported by the playback loop back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackNotice {
    Started { seq: u64 },
    /// The output refused a unit; it was skipped.
    UnitFailed { seq: u64, reason: String },
    /// The queue drained without interruption.
    Idle,
}

struct Current {
    control: Box<dyn VoiceControl>,
    ramp: Duration,
}

#[derive(Default)]
struct LoopState {
    queue: VecDeque<PlaybackUnit>,
    generation: u64,
    loop_active: bool,
    current: Option<Current>,
}

struct Shared {
    state: Mutex<LoopState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    output: Arc<dyn AudioOutput>,
    notices: mpsc::UnboundedSender<PlaybackNotice>,
    sample_rate: u32,
    next_seq: u64,
}

impl PlaybackScheduler {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        notices: mpsc::UnboundedSender<PlaybackNotice>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoopState::default()),
            }),
            output,
            notices,
            sample_rate: SESSION_PCM16_SAMPLE_RATE,
            next_seq: 0,
        }
    }

    /// Decodes a base64 PCM16 frame and queues it. Returns the unit's sequence number.
    pub fn enqueue_base64(&mut self, audio: &str) -> Result<u64, PlaybackError> {
        let pcm16 = audio_utils::decode_i16(audio)
            .ok_or_else(|| PlaybackError::Decode("invalid base64 PCM16 payload".to_string()))?;
        if pcm16.is_empty() {
            return Err(PlaybackError::Decode("empty audio frame".to_string()));
        }
        Ok(self.enqueue_pcm16(&pcm16))
    }

    pub fn enqueue_pcm16(&mut self, pcm16: &[i16]) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.enqueue(PlaybackUnit::from_pcm16(seq, pcm16, self.sample_rate));
        seq
    }

    /// Queues a unit and starts the playback loop if none is running.
    pub fn enqueue(&mut self, unit: PlaybackUnit) {
        let mut state = self.shared.lock();
        state.queue.push_back(unit);
        if !state.loop_active {
            state.loop_active = true;
            let generation = state.generation;
            drop(state);
            debug!(generation, "Starting playback loop");
            tokio::spawn(run_loop(
                self.shared.clone(),
                self.output.clone(),
                self.notices.clone(),
                generation,
            ));
        }
    }

    /// Clears the queue and fades out the sounding unit. Returns how many
    /// queued units were discarded.
    pub fn interrupt(&mut self) -> usize {
        let mut state = self.shared.lock();
        let discarded = state.queue.len();
        state.queue.clear();
        state.generation += 1;
        state.loop_active = false;
        if let Some(mut current) = state.current.take() {
            current.control.fade_out(current.ramp);
        }
        discarded
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().loop_active
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    output: Arc<dyn AudioOutput>,
    notices: mpsc::UnboundedSender<PlaybackNotice>,
    generation: u64,
) {
    loop {
        let unit = {
            let mut state = shared.lock();
            if state.generation != generation {
                return;
            }
            match state.queue.pop_front() {
                Some(unit) => unit,
                None => {
                    state.loop_active = false;
                    state.current = None;
                    drop(state);
                    let _ = notices.send(PlaybackNotice::Idle);
                    return;
                }
            }
        };

        // `start` is called without the loop lock held.
        let seq = unit.seq;
        let ramp = unit.ramp();
        let finished = match output.start(unit) {
            Ok(Voice {
                finished,
                mut control,
            }) => {
                let mut state = shared.lock();
                if state.generation != generation {
                    // Interrupted while the unit was being started.
                    drop(state);
                    control.fade_out(ramp);
                    return;
                }
                state.current = Some(Current { control, ramp });
                drop(state);
                let _ = notices.send(PlaybackNotice::Started { seq });
                finished
            }
            Err(e) => {
                warn!(seq, error = %e, "Skipping playback unit");
                let _ = notices.send(PlaybackNotice::UnitFailed {
                    seq,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        // An Err here means the voice was torn down without completing.
        let _ = finished.await;

        let mut state = shared.lock();
        if state.generation == generation {
            state.current = None;
        }
    }
}
