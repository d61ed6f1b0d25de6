//! Cross-platform audio output for Stretto
//!
//! Hosts the engine inside a CPAL output stream. The architecture is
//! lock-free end to end:
//!
//! - **Control context** (scheduler timer + user input): sends commands
//!   via a wait-free ring buffer, writes continuous parameters to shared
//!   atomics
//! - **Render context** (CPAL callback): owns the [`crate::engine::AudioEngine`]
//!   exclusively, applies pending commands at block boundaries, renders
//!   fixed-size stereo blocks
//!
//! # Example
//!
//! ```ignore
//! use stretto_core::audio::{start_audio_system, AudioConfig};
//! use stretto_core::config::EngineConfig;
//! use stretto_core::scheduler::Scheduler;
//!
//! let system = start_audio_system(&AudioConfig::default(), &EngineConfig::default())?;
//! let mut scheduler = Scheduler::new(system.command_sender, system.sample_rate,
//!                                    &EngineConfig::default());
//! let track = scheduler.add_track("drums", source, true);
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE};
pub use cpal_backend::{start_audio_system, AudioHandle, AudioSystem};
pub use device::{find_device_by_id, get_default_device, get_output_devices, OutputDevice};
pub use error::{AudioError, AudioResult};
