use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Reads a JSON config file. Missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
            gain: 1.0,
        }
    }
}

/// Which clock drives the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// Stepped by the frame delta. Used by menus, the editor and tests.
    #[default]
    Simulated,
    /// Follows the audio callback's playback position.
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub clock: ClockSource,
    /// Zero disables the life counter.
    pub max_lives: u32,
    pub inputs_locked: bool,
    pub tick_rate_hz: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clock: ClockSource::Simulated,
            max_lives: 0,
            inputs_locked: false,
            tick_rate_hz: 60,
        }
    }
}

impl EngineConfig {
    pub fn tick_delta(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config =
            AppConfig::from_json(r#"{"engine":{"max_lives":3,"clock":"audio"}}"#).unwrap();
        assert_eq!(config.engine.max_lives, 3);
        assert_eq!(config.engine.clock, ClockSource::Audio);
        assert_eq!(config.engine.tick_rate_hz, 60);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(AppConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn tick_delta_never_divides_by_zero() {
        let config = EngineConfig {
            tick_rate_hz: 0,
            ..Default::default()
        };
        assert_eq!(config.tick_delta(), 1.0);
    }
}
