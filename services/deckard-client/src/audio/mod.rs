//! Native audio through `cpal`.
//!
//! `cpal::Stream` is not `Send`, so each stream is built and kept alive on a
//! dedicated thread; the engine only ever holds a handle that stops it.

mod capture;
mod output;

pub use capture::CpalCapture;
pub use output::CpalOutput;

use deckard_realtime::audio_utils::create_resampler;
use rubato::{FastFixedIn, Resampler};
use tracing::warn;

const RESAMPLER_CHUNK: usize = 1024;

/// Feeds mono blocks of any length through a fixed-chunk resampler.
pub(crate) struct ChunkedResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl ChunkedResampler {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> anyhow::Result<Self> {
        Ok(Self {
            inner: create_resampler(from_rate as f64, to_rate as f64, RESAMPLER_CHUNK)?,
            pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
        })
    }

    pub(crate) fn process(&mut self, input: &[f32], mut emit: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(input);
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            match self.inner.process(&[&self.pending[..needed]], None) {
                Ok(out) => {
                    if let Some(channel) = out.first() {
                        emit(channel);
                    }
                }
                Err(e) => warn!(error = %e, "Resampling failed; block dropped"),
            }
            self.pending.drain(..needed);
        }
    }

    /// Resamples whatever is still buffered.
    pub(crate) fn flush(&mut self, mut emit: impl FnMut(&[f32])) {
        if self.pending.is_empty() {
            return;
        }
        match self.inner.process_partial(Some(&[&self.pending[..]]), None) {
            Ok(out) => {
                if let Some(channel) = out.first() {
                    emit(channel);
                }
            }
            Err(e) => warn!(error = %e, "Resampling failed; tail dropped"),
        }
        self.pending.clear();
    }
}

/// Resamples a whole buffer in one go.
pub(crate) fn resample_all(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
) -> anyhow::Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    let mut resampler = ChunkedResampler::new(from_rate, to_rate)?;
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLER_CHUNK);
    resampler.process(samples, |block| out.extend_from_slice(block));
    resampler.flush(|block| out.extend_from_slice(block));
    out.truncate(expected.max(1).min(out.len()));
    Ok(out)
}
