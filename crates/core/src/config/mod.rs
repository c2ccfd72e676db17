use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the overlay engine.
///
/// The engine keeps a live copy of this structure and its setters are the only
/// mutation path once the engine exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address of the analysis server.
    pub ws_url: String,
    /// Native id of the active output device, sent to the server on open.
    pub device_id: String,
    pub reconnect: ReconnectPolicy,
    /// Minimum spacing between processed frames.
    pub update_interval_ms: u64,
    /// Attack factor for the visual interpolation. Decay uses a fraction of it.
    pub lerp_factor: f32,
    pub intensity_multiplier: f32,
    pub dynamic_lerp: bool,
    pub dynamic_intensity: bool,
    pub artwork_colour: bool,
    pub adaptive_lerp: AdaptiveLerpConfig,
    pub overlay: OverlayOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:5343".to_string(),
            device_id: String::new(),
            reconnect: ReconnectPolicy::default(),
            update_interval_ms: 33,
            lerp_factor: 0.5,
            intensity_multiplier: 1.0,
            dynamic_lerp: true,
            dynamic_intensity: false,
            artwork_colour: false,
            adaptive_lerp: AdaptiveLerpConfig::default(),
            overlay: OverlayOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Values used when the overlay is embedded in the host player.
    pub fn host_defaults() -> Self {
        Self {
            lerp_factor: 0.2,
            reconnect: ReconnectPolicy {
                max_attempts: 100,
                ..ReconnectPolicy::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

/// Reconnect behaviour after an unexpected close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub max_attempts: u32,
    /// Delay unit; the n-th attempt waits `base_delay_ms * n`.
    pub base_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 5,
            base_delay_ms: 2000,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Shape applied to the normalised tempo before it is mapped to a lerp factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCurve {
    Linear,
    Exponential,
    Logarithmic,
}

/// Tunables for the tempo driven lerp factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveLerpConfig {
    pub bpm_min: f32,
    pub bpm_max: f32,
    pub lerp_min: f32,
    pub lerp_max: f32,
    pub curve: ResponseCurve,
    /// How quickly the live factor follows its target, in [0.01, 1].
    pub transition_speed: f32,
}

impl Default for AdaptiveLerpConfig {
    fn default() -> Self {
        Self {
            bpm_min: 60.0,
            bpm_max: 180.0,
            lerp_min: 0.15,
            lerp_max: 0.6,
            curve: ResponseCurve::Exponential,
            transition_speed: 0.1,
        }
    }
}

/// Flags for the optional on-screen widgets. The engine only carries these
/// through to the render surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayOptions {
    pub show_stats: bool,
    pub show_status: bool,
    pub z_index: i32,
    /// Frames are only processed while the now-playing view is visible.
    pub now_playing_visible: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            show_stats: false,
            show_status: false,
            z_index: -1,
            now_playing_visible: false,
        }
    }
}
