//! Microphone capture through CPAL
//!
//! A cpal stream can't leave the thread that built it, so every capture runs
//! on its own thread which owns the stream and the WAV writer. The output is
//! always 16-bit stereo PCM; mono inputs are duplicated into both channels.

use super::{Recorder, RecorderError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

/// Records the default (or a named) input device to a WAV file
#[derive(Debug, Clone)]
pub struct CpalRecorder {
    device_name: Option<String>,
    sample_rate: u32,
}

/// An active capture; dropping it without `stop` still ends the thread
pub struct CaptureHandle {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<Result<(), RecorderError>>,
    path: PathBuf,
}

impl CpalRecorder {
    pub fn new(device_name: Option<String>, sample_rate: u32) -> Self {
        Self {
            device_name,
            sample_rate,
        }
    }
}

impl Recorder for CpalRecorder {
    type Capture = CaptureHandle;

    fn start(&mut self, output: &Path) -> Result<CaptureHandle, RecorderError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;
        let path = output.to_path_buf();

        let thread = thread::Builder::new()
            .name("chirp-capture".to_string())
            .spawn(move || capture(device_name, sample_rate, path, ready_tx, stop_rx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(path = %output.display(), "capture started");
                Ok(CaptureHandle {
                    stop_tx,
                    thread,
                    path: output.to_path_buf(),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => match thread.join() {
                Ok(Err(e)) => Err(e),
                _ => Err(RecorderError::Thread(
                    "capture thread exited before the stream started".to_string(),
                )),
            },
        }
    }

    fn stop(&mut self, capture: CaptureHandle) -> Result<(), RecorderError> {
        let _ = capture.stop_tx.send(());
        let result = capture
            .thread
            .join()
            .map_err(|_| RecorderError::Thread("capture thread panicked".to_string()))?;
        if result.is_ok() {
            tracing::debug!(path = %capture.path.display(), "capture finalized");
        }
        result
    }
}

/// Capture thread body: open the stream, report readiness, record until told
/// to stop (or the handle is dropped), then finalize the file.
fn capture(
    device_name: Option<String>,
    sample_rate: u32,
    path: PathBuf,
    ready: mpsc::Sender<Result<(), RecorderError>>,
    stop: mpsc::Receiver<()>,
) -> Result<(), RecorderError> {
    let (stream, writer, write_failed) =
        match open_stream(device_name.as_deref(), sample_rate, &path) {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };
    let _ = ready.send(Ok(()));

    // Err means the handle was dropped, which is a stop as well
    let _ = stop.recv();
    drop(stream);

    let wav = writer
        .lock()
        .map_err(|_| RecorderError::Thread("WAV writer lock poisoned".to_string()))?
        .take();
    if let Some(wav) = wav {
        wav.finalize()?;
    }

    if write_failed.load(Ordering::Acquire) {
        return Err(RecorderError::Device(format!(
            "failed writing samples to {}",
            path.display()
        )));
    }
    Ok(())
}

fn open_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    path: &Path,
) -> Result<(cpal::Stream, SharedWriter, Arc<AtomicBool>), RecorderError> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let (config, format) = pick_config(&device, sample_rate)?;

    let spec = WavSpec {
        channels: 2,
        sample_rate: config.sample_rate.0,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer: SharedWriter = Arc::new(Mutex::new(Some(WavWriter::create(path, spec)?)));
    let write_failed = Arc::new(AtomicBool::new(false));

    let stream = match format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, writer.clone(), write_failed.clone())?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, writer.clone(), write_failed.clone())?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, writer.clone(), write_failed.clone())?,
        other => {
            return Err(RecorderError::Device(format!(
                "unsupported sample format {other}"
            )));
        }
    };
    stream
        .play()
        .map_err(|e| RecorderError::Device(e.to_string()))?;

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "recording"
    );

    Ok((stream, writer, write_failed))
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<Device, RecorderError> {
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| RecorderError::NoDevice(String::new())),
        Some(name) => host
            .input_devices()
            .map_err(|e| RecorderError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| RecorderError::NoDevice(format!(" named '{name}'"))),
    }
}

/// Prefer a config that runs at the requested rate with two channels and
/// 16-bit samples; otherwise fall back to the device default.
fn pick_config(
    device: &Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat), RecorderError> {
    let wanted = cpal::SampleRate(sample_rate);
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| RecorderError::Device(e.to_string()))?
        .collect();

    let best = ranges
        .iter()
        .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
        .min_by_key(|r| (r.channels().abs_diff(2), format_rank(r.sample_format())));

    if let Some(range) = best {
        let config = range.clone().with_sample_rate(wanted);
        return Ok((config.config(), config.sample_format()));
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| RecorderError::Device(e.to_string()))?;
    tracing::warn!(
        requested = sample_rate,
        using = fallback.sample_rate().0,
        "device does not support the requested sample rate"
    );
    Ok((fallback.config(), fallback.sample_format()))
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        _ => 2,
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    writer: SharedWriter,
    write_failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, RecorderError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = usize::from(config.channels).max(1);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let Ok(mut guard) = writer.lock() else {
                    return;
                };
                let Some(wav) = guard.as_mut() else {
                    return;
                };
                for frame in data.chunks(channels) {
                    let left = to_i16(frame[0]);
                    let right = frame.get(1).map(|&s| to_i16(s)).unwrap_or(left);
                    if wav
                        .write_sample(left)
                        .and_then(|_| wav.write_sample(right))
                        .is_err()
                    {
                        write_failed.store(true, Ordering::Release);
                        return;
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio stream error");
            },
            None,
        )
        .map_err(|e| RecorderError::Device(e.to_string()))
}

fn to_i16<T>(sample: T) -> i16
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let value: f32 = cpal::Sample::from_sample(sample);
    (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i16_scales_and_clamps() {
        assert_eq!(to_i16(0.0f32), 0);
        assert_eq!(to_i16(1.0f32), i16::MAX);
        assert_eq!(to_i16(2.0f32), i16::MAX);
        assert_eq!(to_i16(-1.0f32), -i16::MAX);
        assert_eq!(to_i16(0i16), 0);
    }

    #[test]
    fn test_format_rank_prefers_i16() {
        assert!(format_rank(SampleFormat::I16) < format_rank(SampleFormat::F32));
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::U8));
    }
}
