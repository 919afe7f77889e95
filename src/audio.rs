//! Audio capture
//!
//! The state machine only sees the [`Recorder`] trait: start a capture into a
//! file, stop it later. [`CpalRecorder`] is the real microphone backend.

mod recorder;

pub use recorder::CpalRecorder;

use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("no input device found{0}")]
    NoDevice(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("WAV writer error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture thread failed: {0}")]
    Thread(String),
}

/// Start/stop access to an audio capture device.
///
/// `start` hands back a capture handle which must be passed to `stop`; the
/// recording at `output` is complete once `stop` returns.
pub trait Recorder {
    type Capture;

    fn start(&mut self, output: &Path) -> Result<Self::Capture, RecorderError>;

    fn stop(&mut self, capture: Self::Capture) -> Result<(), RecorderError>;
}

/// Information about an available audio input device
#[derive(Debug)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supported_sample_rates: Vec<u32>,
    pub supported_formats: Vec<SampleFormat>,
}

/// List all available audio input devices
pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, RecorderError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| RecorderError::Device(e.to_string()))?;
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut infos = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        let is_default = default_name.as_deref() == Some(name.as_str());

        let configs: Vec<_> = match device.supported_input_configs() {
            Ok(configs) => configs.collect(),
            Err(e) => {
                tracing::debug!(device = %name, error = %e, "skipping device configs");
                Vec::new()
            }
        };

        let mut supported_sample_rates: Vec<u32> =
            configs.iter().map(|c| c.max_sample_rate().0).collect();
        supported_sample_rates.sort_unstable();
        supported_sample_rates.dedup();

        let mut supported_formats = Vec::new();
        for format in configs.iter().map(|c| c.sample_format()) {
            if !supported_formats.contains(&format) {
                supported_formats.push(format);
            }
        }

        infos.push(AudioDeviceInfo {
            name,
            is_default,
            supported_sample_rates,
            supported_formats,
        });
    }

    Ok(infos)
}
