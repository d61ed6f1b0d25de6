//! CPAL output stream hosting the engine
//!
//! The output callback is the render context: it owns the [`AudioEngine`]
//! exclusively, drains the command queue at each block start, renders one
//! master block and copies it to the device buffer. No locks are taken
//! anywhere on this path.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use crate::config::EngineConfig;
use crate::engine::{command_channel, AudioEngine, CommandSender, EngineCommand};
use crate::types::{StereoBuffer, MAX_BUFFER_SIZE};

use super::config::AudioConfig;
use super::device::{find_device_by_id, get_default_device};
use super::error::{AudioError, AudioResult};

/// Keeps the output stream alive; drop to stop audio
pub struct AudioHandle {
    _stream: Stream,
    sample_rate: u32,
    buffer_size: u32,
}

impl AudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Everything the control context needs after startup
pub struct AudioSystem {
    /// Keeps the stream alive (not Send; keep it on the starting thread)
    pub handle: AudioHandle,
    /// Lock-free command path into the engine
    pub command_sender: CommandSender,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub latency_ms: f32,
}

/// Render-context state moved into the output callback
struct CallbackState {
    engine: AudioEngine,
    command_rx: rtrb::Consumer<EngineCommand>,
    master: StereoBuffer,
}

impl CallbackState {
    fn process(&mut self, frames: usize) {
        // Working length only; capacity stays at MAX_BUFFER_SIZE
        self.master.set_len_from_capacity(frames.min(MAX_BUFFER_SIZE));
        self.engine.process_commands(&mut self.command_rx);
        self.engine.render(&mut self.master);
    }
}

/// Start the audio system: negotiate a device config, build the engine
/// and the stream, and hand back the control-side pieces
pub fn start_audio_system(
    config: &AudioConfig,
    engine_config: &EngineConfig,
) -> AudioResult<AudioSystem> {
    let device = match &config.device {
        Some(id) => find_device_by_id(id)?,
        None => get_default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let (supported_config, buffer_size) = get_output_config(&device, config)?;
    let sample_rate = supported_config.sample_rate().0;

    let stream_config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };
    let latency_ms = (buffer_size as f32 / sample_rate as f32) * 1000.0;

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        latency_ms
    );

    let engine = AudioEngine::new(sample_rate, engine_config);
    let (command_tx, command_rx) = command_channel();

    let state = CallbackState {
        engine,
        command_rx,
        master: StereoBuffer::silence(MAX_BUFFER_SIZE),
    };

    let stream = build_output_stream(&device, &stream_config, state)?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started");

    Ok(AudioSystem {
        handle: AudioHandle {
            _stream: stream,
            sample_rate,
            buffer_size,
        },
        command_sender: CommandSender::new(command_tx),
        sample_rate,
        buffer_size,
        latency_ms,
    })
}

/// Pick the best output configuration for a device
///
/// Prefers f32 stereo at the requested sample rate, falling back first to
/// any stereo config, then to whatever the device offers.
fn get_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    if supported.is_empty() {
        return Err(AudioError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    let target_rate = config.target_sample_rate();

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0)
        .or_else(|| supported.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported.first())
        .ok_or_else(|| {
            AudioError::ConfigError("No suitable output configuration found".to_string())
        })?;

    let sample_rate =
        if target_rate >= best.min_sample_rate().0 && target_rate <= best.max_sample_rate().0 {
            cpal::SampleRate(target_rate)
        } else {
            let fallback = best.max_sample_rate();
            log::warn!(
                "Device doesn't support {}Hz, falling back to {}Hz",
                target_rate,
                fallback.0
            );
            fallback
        };

    let stream_config = best.clone().with_sample_rate(sample_rate);
    let buffer_size = config.buffer_size.as_frames();

    Ok((stream_config, buffer_size))
}

/// Build the output stream around the moved-in callback state
fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: CallbackState,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                state.process(frames);

                let samples = state.master.as_slice();
                for (i, frame) in data.chunks_mut(channels).enumerate() {
                    if i < samples.len() {
                        let sample = samples[i];
                        frame[0] = sample.left;
                        if channels > 1 {
                            frame[1] = sample.right;
                        }
                        for ch in frame.iter_mut().skip(2) {
                            *ch = 0.0;
                        }
                    } else {
                        for ch in frame.iter_mut() {
                            *ch = 0.0;
                        }
                    }
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}
