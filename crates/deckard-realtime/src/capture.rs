//! Audio Capture Encoder
//!
//! Turns a live microphone stream into fixed-size PCM16 blocks. The device
//! backend delivers mono `f32` samples at [`SESSION_PCM16_SAMPLE_RATE`] from
//! its own real-time callback; the encoder running inside that callback cuts
//! them into blocks, clamps them to i16 and hands each finished block off
//! without blocking.

use crate::audio_utils::{SESSION_PCM16_SAMPLE_RATE, sample_f32_to_i16};
use thiserror::Error;
use tokio::sync::mpsc;

pub const DEFAULT_CAPTURE_BLOCK_SIZE: usize = 2400;

/// Invoked from the device callback with mono samples at the session rate.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// What the engine asks of a capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            sample_rate: SESSION_PCM16_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no input device available")]
    NoDevice,
    #[error("audio capture is not supported here: {0}")]
    Unsupported(String),
    #[error("capture device error: {0}")]
    Device(String),
}

/// A running capture stream. Dropping it stops the capture.
pub trait CaptureStream: Send {
    /// Must not block.
    fn stop(&mut self);
}

/// Platform seam for microphone access.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureDevice: Send + Sync {
    /// Starts capturing. `on_samples` must only be called with mono samples
    /// at `options.sample_rate`. May block while the device opens; the engine
    /// calls it from a blocking thread.
    fn open(
        &self,
        options: &CaptureOptions,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// Used when the host has no audio input; every open fails as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCaptureDevice;

impl CaptureDevice for NoCaptureDevice {
    fn open(
        &self,
        _options: &CaptureOptions,
        _on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        Err(CaptureError::Unsupported(
            "no capture device configured".to_string(),
        ))
    }
}

/// Cuts a sample stream into fixed-size PCM16 blocks.
///
/// At most one partial block is held between calls.
#[derive(Debug)]
pub struct CaptureEncoder {
    block_size: usize,
    pending: Vec<i16>,
}

impl CaptureEncoder {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of samples waiting for the current block to fill.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Encodes `samples`, calling `emit` once per completed block, in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<i16>)) {
        for &sample in samples {
            self.pending.push(sample_f32_to_i16(sample));
            if self.pending.len() == self.block_size {
                let block =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(block);
            }
        }
    }
}

/// Builds the device callback that encodes samples and forwards finished
/// blocks to the engine.
///
/// A block that cannot be handed off immediately is dropped: the callback
/// never waits on the engine.
pub fn block_forwarder(block_size: usize, blocks: mpsc::Sender<Vec<i16>>) -> SampleCallback {
    let mut encoder = CaptureEncoder::new(block_size);
    Box::new(move |samples: &[f32]| {
        encoder.push(samples, |block| {
            let _ = blocks.try_send(block);
        });
    })
}
