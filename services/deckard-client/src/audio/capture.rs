use super::ChunkedResampler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use deckard_realtime::audio_utils::downmix_to_mono;
use deckard_realtime::{CaptureDevice, CaptureError, CaptureOptions, CaptureStream, SampleCallback};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{error, info};

/// Default input device, downmixed and resampled to the requested rate.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

struct CpalCaptureStream {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn stop(&mut self) {
        self.stop.take();
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Joining waits for the device to close; keep that off async workers.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || {
                    let _ = thread.join();
                });
            }
            Err(_) => {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CaptureDevice for CpalCapture {
    fn open(
        &self,
        options: &CaptureOptions,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let target_rate = options.sample_rate;

        let thread = std::thread::Builder::new()
            .name("deckard-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(target_rate, on_samples) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Returns once the handle is stopped or dropped.
                let _ = stop_rx.recv();
                drop(stream);
                info!("Capture stream closed");
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))??;
        Ok(Box::new(CpalCaptureStream {
            stop: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

fn build_input_stream(
    target_rate: u32,
    mut on_samples: SampleCallback,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(CaptureError::Unsupported(format!(
            "input sample format {:?}",
            supported.sample_format()
        )));
    }
    let channels = supported.channels() as usize;
    let device_rate = supported.sample_rate().0;
    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        channels,
        device_rate,
        target_rate,
        "Opening input device"
    );

    let mut resampler = if device_rate != target_rate {
        Some(
            ChunkedResampler::new(device_rate, target_rate)
                .map_err(|e| CaptureError::Unsupported(e.to_string()))?,
        )
    } else {
        None
    };

    let config: cpal::StreamConfig = supported.into();
    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                match resampler.as_mut() {
                    Some(resampler) => resampler.process(&mono, |block| on_samples(block)),
                    None => on_samples(&mono),
                }
            },
            |err| error!(error = %err, "Capture stream error"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NoDevice,
            other => CaptureError::Device(other.to_string()),
        })
}
