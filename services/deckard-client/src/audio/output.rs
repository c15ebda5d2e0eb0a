use super::resample_all;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use deckard_realtime::{AudioOutput, PlaybackError, PlaybackUnit, Voice, VoiceControl};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};

/// How far ahead of a unit's end the scheduler is told it finished, so the
/// next unit is already queued when the boundary is reached.
const START_LEAD: Duration = Duration::from_millis(40);

struct Sounding {
    seq: u64,
    samples: Vec<f32>,
    pos: usize,
    /// Frames before the end at which `done` fires.
    lead: usize,
    /// Remaining and total fade-out length, in device frames.
    fade: Option<(usize, usize)>,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Mixer {
    current: Option<Sounding>,
    /// Units started while another was still sounding, in start order.
    queued: VecDeque<Sounding>,
}

impl Mixer {
    fn push(&mut self, unit: Sounding) {
        if self.current.is_none() && self.queued.is_empty() {
            self.current = Some(unit);
        } else {
            self.queued.push_back(unit);
        }
    }

    fn next_sample(&mut self) -> f32 {
        if self.current.is_none() {
            self.current = self.queued.pop_front();
        }
        let Some(unit) = self.current.as_mut() else {
            return 0.0;
        };
        let mut sample = unit.samples.get(unit.pos).copied().unwrap_or(0.0);
        unit.pos += 1;
        if let Some((remaining, total)) = unit.fade.as_mut() {
            sample *= *remaining as f32 / (*total).max(1) as f32;
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                // Faded out: stop without signalling a natural end.
                self.current = None;
                return sample;
            }
        }
        if unit.samples.len().saturating_sub(unit.pos) <= unit.lead {
            if let Some(done) = unit.done.take() {
                let _ = done.send(());
            }
        }
        if unit.pos >= unit.samples.len() {
            self.current = None;
        }
        sample
    }

    /// Fades `seq` out over `frames`. If `seq` is still queued it is dropped
    /// along with everything queued ahead of it, and the sounding unit fades
    /// in its place. A unit already fading keeps its ramp.
    fn fade_out(&mut self, seq: u64, frames: usize) {
        if let Some(index) = self.queued.iter().position(|u| u.seq == seq) {
            self.queued.drain(..=index);
        } else if self.current.as_ref().is_none_or(|u| u.seq != seq) {
            return;
        }
        if let Some(unit) = self.current.as_mut().filter(|u| u.fade.is_none()) {
            let remaining = unit.samples.len().saturating_sub(unit.pos);
            let frames = frames.min(remaining).max(1);
            unit.fade = Some((frames, frames));
        }
    }
}

/// Default output device. One unit sounds at a time, as the scheduler
/// guarantees.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
    _keepalive: mpsc::Sender<()>,
}

impl CpalOutput {
    pub fn new() -> anyhow::Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<u32>>();
        let (keepalive_tx, keepalive_rx) = mpsc::channel::<()>();

        let callback_mixer = mixer.clone();
        std::thread::Builder::new()
            .name("deckard-output".to_string())
            .spawn(move || {
                let stream = match build_output_stream(callback_mixer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(stream.1));
                let _ = keepalive_rx.recv();
                drop(stream);
                info!("Output stream closed");
            })?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("output thread exited"))??;
        Ok(Self {
            mixer,
            device_rate,
            _keepalive: keepalive_tx,
        })
    }
}

fn build_output_stream(mixer: Arc<Mutex<Mixer>>) -> anyhow::Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device available"))?;
    let supported = device.default_output_config()?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        anyhow::bail!("unsupported output sample format {:?}", supported.sample_format());
    }
    let channels = supported.channels() as usize;
    let device_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            // Never block the audio thread; emit silence if the engine holds the lock.
            let Ok(mut mixer) = mixer.try_lock() else {
                data.fill(0.0);
                return;
            };
            for frame in data.chunks_mut(channels.max(1)) {
                let sample = mixer.next_sample();
                frame.fill(sample);
            }
        },
        |err| error!(error = %err, "Output stream error"),
        None,
    )?;
    stream.play()?;
    info!(channels, device_rate, "Output device open");
    Ok((stream, device_rate))
}

struct CpalVoice {
    mixer: Arc<Mutex<Mixer>>,
    seq: u64,
    device_rate: u32,
}

impl VoiceControl for CpalVoice {
    fn fade_out(&mut self, ramp: Duration) {
        let frames = ((ramp.as_secs_f64() * self.device_rate as f64).round() as usize).max(1);
        self.mixer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .fade_out(self.seq, frames);
    }
}

impl AudioOutput for CpalOutput {
    fn start(&self, unit: PlaybackUnit) -> Result<Voice, PlaybackError> {
        let samples = resample_all(&unit.samples, unit.sample_rate, self.device_rate)
            .map_err(|e| PlaybackError::Device(e.to_string()))?;
        let (done_tx, done_rx) = oneshot::channel();
        let lead = (START_LEAD.as_secs_f64() * self.device_rate as f64).round() as usize;
        self.mixer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Sounding {
                seq: unit.seq,
                samples,
                pos: 0,
                lead,
                fade: None,
                done: Some(done_tx),
            });
        Ok(Voice::new(
            done_rx,
            Box::new(CpalVoice {
                mixer: self.mixer.clone(),
                seq: unit.seq,
                device_rate: self.device_rate,
            }),
        ))
    }
}
