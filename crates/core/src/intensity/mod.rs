use crate::analysis::BassBlock;

/// Smoothing applied to the bass-presence and frequency-spread factors.
const FACTOR_SMOOTHING: f32 = 0.1;
/// Bass averages arrive around 1e-4 for loud material.
const PRESENCE_SCALE: f32 = 10_000.0;
/// Peak magnitudes arrive around 0.02 for loud material.
const MAGNITUDE_SCALE: f32 = 50.0;

const PRESENCE_WEIGHT: f32 = 0.6;
const SPREAD_WEIGHT: f32 = 0.2;
const MAGNITUDE_WEIGHT: f32 = 0.2;

/// Collapses the bass statistics of consecutive frames into a single
/// dynamic-intensity value in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct IntensitySmoother {
    presence: f32,
    spread: f32,
}

impl IntensitySmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one frame into the smoothed state and returns the combined factor.
    pub fn update(&mut self, bass: &BassBlock) -> f32 {
        let presence = bass_presence(bass);
        let spread = frequency_spread(bass);
        let magnitude = magnitude_strength(bass);

        self.presence += (presence - self.presence) * FACTOR_SMOOTHING;
        self.spread += (spread - self.spread) * FACTOR_SMOOTHING;

        let combined = self.presence * PRESENCE_WEIGHT
            + self.spread * SPREAD_WEIGHT
            + magnitude * MAGNITUDE_WEIGHT;
        combined.clamp(0.0, 1.0)
    }

    /// Zeroes the smoothed factors.
    pub fn reset(&mut self) {
        self.presence = 0.0;
        self.spread = 0.0;
    }

    pub fn smoothed_presence(&self) -> f32 {
        self.presence
    }

    pub fn smoothed_spread(&self) -> f32 {
        self.spread
    }
}

fn bass_presence(bass: &BassBlock) -> f32 {
    unit(bass.average * PRESENCE_SCALE)
}

/// Ratio of the band average to its peak. A flat, broadband band sits close
/// to 1 while a single narrow spike sits close to 0.
fn frequency_spread(bass: &BassBlock) -> f32 {
    if bass.max <= f32::EPSILON {
        return 0.0;
    }
    unit(bass.average / bass.max)
}

fn magnitude_strength(bass: &BassBlock) -> f32 {
    let magnitude = bass.strongest.map(|bin| bin.magnitude).unwrap_or(0.0);
    unit(magnitude * MAGNITUDE_SCALE)
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
