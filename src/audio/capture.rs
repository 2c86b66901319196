//! Microphone capture and speaker output using CPAL (Cross-Platform Audio Library).

use crate::audio::playback::AudioSink;
use crate::audio::source::AudioSource;
use crate::audio::wav::{downmix, resample};
use crate::defaults;
use crate::error::{ParlanceError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA messages that occur during audio backend probing.
///
/// # Safety
/// Modifies environment variables; call at startup before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Input device name patterns that are never useful for a microphone.
const FILTERED_INPUT_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_input(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_INPUT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

impl DeviceKind {
    fn label(self) -> &'static str {
        match self {
            DeviceKind::Input => "input",
            DeviceKind::Output => "output",
        }
    }
}

fn unavailable(device: &str, message: impl Into<String>) -> ParlanceError {
    ParlanceError::DeviceUnavailable {
        device: device.to_string(),
        message: message.into(),
    }
}

/// List audio devices of one direction.
///
/// Preferred devices are marked with "\[recommended\]". Input devices that
/// are obviously unusable (surround channels, HDMI) are left out.
///
/// # Errors
/// Returns `DeviceUnavailable` if device enumeration fails.
pub fn list_devices(kind: DeviceKind) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match kind {
            DeviceKind::Input => host.input_devices(),
            DeviceKind::Output => host.output_devices(),
        }
    })
    .map_err(|e| unavailable(kind.label(), format!("Failed to enumerate devices: {e}")))?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if kind == DeviceKind::Input && should_filter_input(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Find a device by exact name, or the best default for its direction.
///
/// The default prefers PipeWire/PulseAudio so the desktop's device
/// selection is respected, then falls back to the host default.
fn find_device(kind: DeviceKind, device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match kind {
            DeviceKind::Input => host.input_devices(),
            DeviceKind::Output => host.output_devices(),
        };

        if let Some(name) = device_name {
            let devices = devices
                .map_err(|e| unavailable(name, format!("Failed to enumerate devices: {e}")))?;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    return Ok(dev);
                }
            }
            return Err(unavailable(name, format!("no {} device with this name", kind.label())));
        }

        if let Ok(devices) = devices {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        let default = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        default.ok_or_else(|| unavailable("default", format!("no {} device found", kind.label())))
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the owning source or sink,
/// which is itself used by one worker thread at a time.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture at 16kHz mono i16.
///
/// Tries i16/16kHz/mono first, then f32/16kHz/mono, then the device's
/// native config with software channel mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    device_label: String,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Select an input device. `None` picks the best default.
    ///
    /// # Errors
    /// `DeviceUnavailable` if no matching input device exists.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(DeviceKind::Input, device_name)?;
        Ok(Self {
            device_label: device_name.unwrap_or("default").to_string(),
            device,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            error!("Audio input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Capture at the device's native config and convert in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| unavailable(&self.device_label, format!("Failed to query input config: {e}")))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        info!(
            "using native input format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            error!("Audio input stream error: {}", err);
        };
        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let converted =
                        resample(&downmix(data, native_channels), native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    let converted =
                        resample(&downmix(&i16_data, native_channels), native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(unavailable(
                    &self.device_label,
                    format!("Unsupported native sample format: {fmt:?}"),
                ));
            }
        };

        stream.map_err(|e| unavailable(&self.device_label, format!("Failed to build input stream: {e}")))
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| unavailable(&self.device_label, format!("Failed to start input stream: {e}")))?;

        // Some PipeWire-ALSA setups accept non-native configs but never fire
        // the data callback.
        std::thread::sleep(Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native_stream = self.build_stream_native()?;
            native_stream.play().map_err(|e| {
                unavailable(&self.device_label, format!("Failed to start native input stream: {e}"))
            })?;
            native_stream
        } else {
            stream
        };

        self.stream = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sendable_stream) = self.stream.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| ParlanceError::Other(format!("Failed to stop input stream: {e}")))?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|e| ParlanceError::Other(format!("Failed to lock audio buffer: {e}")))?;
        Ok(std::mem::take(&mut *buffer))
    }
}

/// Speaker output fed from a short sample queue.
///
/// `write_frame` blocks while more than `PLAYBACK_QUEUE_FRAMES` frames are
/// queued, so `clear` never has more than that to discard. The stream
/// callback outputs silence whenever the queue is empty.
pub struct CpalAudioSink {
    device: cpal::Device,
    device_label: String,
    stream: Option<SendableStream>,
    queue: Arc<Mutex<VecDeque<i16>>>,
    source_rate: u32,
    device_rate: u32,
    frame_samples: usize,
}

impl CpalAudioSink {
    /// Select an output device. `None` picks the best default.
    ///
    /// `sample_rate` and `frame_ms` describe the clips that will be written.
    pub fn new(device_name: Option<&str>, sample_rate: u32, frame_ms: u32) -> Result<Self> {
        let device = find_device(DeviceKind::Output, device_name)?;
        Ok(Self {
            device_label: device_name.unwrap_or("default").to_string(),
            device,
            stream: None,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            source_rate: sample_rate,
            device_rate: sample_rate,
            frame_samples: defaults::samples_per_frame(sample_rate, frame_ms).max(1),
        })
    }

    fn build_stream(&mut self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.source_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err| {
            error!("Audio output stream error: {}", err);
        };

        let queue = Arc::clone(&self.queue);
        if let Ok(stream) = self.device.build_output_stream(
            &preferred_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                fill_output(&queue, data, 1, |s| s);
            },
            err_callback,
            None,
        ) {
            self.device_rate = self.source_rate;
            return Ok(stream);
        }

        let default_config = self
            .device
            .default_output_config()
            .map_err(|e| unavailable(&self.device_label, format!("Failed to query output config: {e}")))?;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();
        self.device_rate = default_config.sample_rate();

        info!(
            "using native output format ({}ch/{}Hz/{:?}), converting in software",
            channels,
            self.device_rate,
            default_config.sample_format(),
        );

        let queue = Arc::clone(&self.queue);
        let stream = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    fill_output(&queue, data, channels, |s| s);
                },
                err_callback,
                None,
            ),
            SampleFormat::F32 => self.device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_output(&queue, data, channels, i16_to_f32);
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(unavailable(
                    &self.device_label,
                    format!("Unsupported native sample format: {fmt:?}"),
                ));
            }
        };

        stream.map_err(|e| unavailable(&self.device_label, format!("Failed to build output stream: {e}")))
    }

    fn device_frame_samples(&self) -> usize {
        if self.source_rate == 0 {
            return self.frame_samples;
        }
        (self.frame_samples as u64 * self.device_rate as u64 / self.source_rate as u64).max(1)
            as usize
    }

    fn queued_samples(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Pops mono samples into every channel of an interleaved output buffer.
fn fill_output<T: Copy + Default>(
    queue: &Mutex<VecDeque<i16>>,
    data: &mut [T],
    channels: usize,
    convert: impl Fn(i16) -> T,
) {
    let Ok(mut queue) = queue.lock() else {
        data.fill(T::default());
        return;
    };
    for frame in data.chunks_mut(channels.max(1)) {
        let value = queue.pop_front().map(&convert).unwrap_or_default();
        frame.fill(value);
    }
}

impl AudioSink for CpalAudioSink {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| unavailable(&self.device_label, format!("Failed to start output stream: {e}")))?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.clear();
        if let Some(sendable_stream) = self.stream.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| ParlanceError::Other(format!("Failed to stop output stream: {e}")))?;
        }
        Ok(())
    }

    fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        let limit = defaults::PLAYBACK_QUEUE_FRAMES * self.device_frame_samples();
        while self.queued_samples() >= limit {
            std::thread::sleep(Duration::from_millis(2));
        }
        let converted = resample(samples, self.source_rate, self.device_rate);
        let mut queue = self
            .queue
            .lock()
            .map_err(|e| ParlanceError::Other(format!("Failed to lock output queue: {e}")))?;
        queue.extend(converted);
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    fn pending_frames(&self) -> usize {
        self.queued_samples().div_ceil(self.device_frame_samples())
    }
}
