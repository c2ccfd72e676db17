//! User settings persisted between sessions and mirrored into the engine.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{engine::VignetteEngine, render::RenderSurface, stream::Transport, Result};

/// Intensity used whenever stored or typed input is not a usable number.
pub const DEFAULT_INTENSITY: f32 = 1.0;

/// The four user-facing toggles of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    #[serde(deserialize_with = "lenient_intensity")]
    pub vignette_intensity: f32,
    pub dynamic_lerp_enabled: bool,
    pub dynamic_intensity_enabled: bool,
    pub artwork_colour_enabled: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            vignette_intensity: DEFAULT_INTENSITY,
            dynamic_lerp_enabled: true,
            dynamic_intensity_enabled: false,
            artwork_colour_enabled: true,
        }
    }
}

impl OverlaySettings {
    /// Loads settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no stored settings, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Stores typed intensity input, coercing anything unusable to the default.
    pub fn set_intensity_input(&mut self, raw: &str) {
        self.vignette_intensity = coerce_intensity(raw);
    }

    /// Pushes every setting into a live engine through its setters.
    pub fn apply_to<T: Transport, S: RenderSurface>(&self, engine: &mut VignetteEngine<T, S>) {
        engine.set_intensity_multiplier(self.vignette_intensity);
        engine.set_dynamic_lerp_enabled(self.dynamic_lerp_enabled);
        engine.set_dynamic_intensity_enabled(self.dynamic_intensity_enabled);
        engine.set_dynamic_colour(self.artwork_colour_enabled);
    }
}

/// Parses intensity text. Non-numeric and non-finite input becomes 1.
pub fn coerce_intensity(raw: &str) -> f32 {
    match raw.trim().parse::<f32>() {
        Ok(value) if value.is_finite() => value,
        _ => DEFAULT_INTENSITY,
    }
}

fn lenient_intensity<'de, D>(deserializer: D) -> std::result::Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_INTENSITY),
        serde_json::Value::String(s) => coerce_intensity(&s),
        _ => DEFAULT_INTENSITY,
    })
}
