//! Engine configuration
//!
//! Serializable settings with generic YAML load/save helpers. Missing or
//! unreadable config files fall back to defaults; configuration problems
//! must never keep audio from starting.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::timeline::{DEFAULT_BASE_TEMPO_BPM, DEFAULT_BEATS_PER_BAR};

/// Default control-context tick rate in Hz
pub const DEFAULT_TICK_HZ: u32 = 20;

/// Engine behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reference tempo the timeline counts bars/beats against
    pub base_tempo_bpm: f64,
    /// Beats per bar (time signature numerator)
    pub beats_per_bar: u32,
    /// Scheduler tick rate in Hz (10-20 is plenty for bar quantization)
    pub tick_hz: u32,
    /// Whether muted tracks keep advancing their cursor (mute != pause).
    /// Disable for players that expect mute to behave like pause.
    pub mute_advances_cursor: bool,
    /// Whether new play requests default to quantized (bar-aligned) starts
    pub quantize_starts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_tempo_bpm: DEFAULT_BASE_TEMPO_BPM,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            tick_hz: DEFAULT_TICK_HZ,
            mute_advances_cursor: true,
            quantize_starts: false,
        }
    }
}

/// Default config file path: `~/.config/stretto/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stretto")
        .join(filename)
}

/// Load configuration from a YAML file
///
/// A missing file yields defaults silently; an unparseable file logs a
/// warning and yields defaults.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("no config at {:?}, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to parse config {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("serializing config")?;
    std::fs::write(path, yaml).with_context(|| format!("writing config to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.base_tempo_bpm, 120.0);
        assert_eq!(config.beats_per_bar, 4);
        assert!(config.mute_advances_cursor);
        assert!(!config.quantize_starts);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: EngineConfig = serde_yaml::from_str("beats_per_bar: 3\n").unwrap();
        assert_eq!(config.beats_per_bar, 3);
        assert_eq!(config.base_tempo_bpm, 120.0);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/stretto.yaml"));
        assert_eq!(config.tick_hz, DEFAULT_TICK_HZ);
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("engine.yaml");
        assert!(path.ends_with("engine.yaml"));
    }
}
