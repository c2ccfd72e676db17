//! Interpolation helpers and the tempo driven lerp factor.

use crate::config::{AdaptiveLerpConfig, ResponseCurve};

/// Share of the attack factor used when a value falls back.
pub const DECAY_RATIO: f32 = 0.15;

/// Moves `current` toward `target` by `factor` of the remaining distance.
pub fn lerp(current: f32, target: f32, factor: f32) -> f32 {
    current + (target - current) * factor
}

/// Asymmetric lerp: `attack` while rising toward the target and
/// `attack * DECAY_RATIO` while falling.
pub fn attack_decay(current: f32, target: f32, attack: f32) -> f32 {
    let factor = if target > current {
        attack
    } else {
        attack * DECAY_RATIO
    };
    lerp(current, target, factor)
}

impl ResponseCurve {
    /// Applies the curve to a value already normalised into `[0, 1]`.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ResponseCurve::Linear => x,
            ResponseCurve::Exponential => x.powf(1.5),
            ResponseCurve::Logarithmic => (9.0 * x).ln_1p() / 10.0_f32.ln(),
        }
    }
}

/// Maps tempo to a lerp factor and eases the live factor toward it.
#[derive(Debug, Clone)]
pub struct AdaptiveLerpController {
    config: AdaptiveLerpConfig,
    current: f32,
}

impl AdaptiveLerpController {
    pub fn new(config: AdaptiveLerpConfig) -> Self {
        let config = sanitise(config);
        Self {
            current: config.lerp_min,
            config,
        }
    }

    pub fn config(&self) -> &AdaptiveLerpConfig {
        &self.config
    }

    /// Returns the live, smoothed lerp factor.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Target factor for a tempo, without smoothing.
    pub fn lerp_for_bpm(&self, bpm: f32) -> f32 {
        let span = self.config.bpm_max - self.config.bpm_min;
        let normalised = if bpm.is_nan() {
            0.0
        } else if span <= f32::EPSILON {
            if bpm >= self.config.bpm_max {
                1.0
            } else {
                0.0
            }
        } else {
            ((bpm - self.config.bpm_min) / span).clamp(0.0, 1.0)
        };
        self.map_unit(normalised)
    }

    /// Target factor for a normalised energy value, without smoothing.
    pub fn lerp_for_energy(&self, energy: f32) -> f32 {
        self.map_unit(energy.clamp(0.0, 1.0))
    }

    /// Weighted blend of the tempo and energy mappings. `bpm_weight` is the
    /// share given to tempo and is clamped into `[0, 1]`.
    pub fn lerp_for_combined(&self, bpm: f32, energy: f32, bpm_weight: f32) -> f32 {
        let weight = bpm_weight.clamp(0.0, 1.0);
        let blended =
            self.lerp_for_bpm(bpm) * weight + self.lerp_for_energy(energy) * (1.0 - weight);
        blended.clamp(self.config.lerp_min, self.config.lerp_max)
    }

    /// Eases the live factor toward the target for `bpm` and returns it.
    pub fn update(&mut self, bpm: f32) -> f32 {
        let target = self.lerp_for_bpm(bpm);
        let speed = self.config.transition_speed;
        self.current = lerp(self.current, target, speed)
            .clamp(self.config.lerp_min, self.config.lerp_max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.config.lerp_min;
    }

    fn map_unit(&self, x: f32) -> f32 {
        let AdaptiveLerpConfig {
            lerp_min, lerp_max, ..
        } = self.config;
        // Endpoints are returned exactly so clamped tempos never drift.
        if x <= 0.0 {
            return lerp_min;
        }
        if x >= 1.0 {
            return lerp_max;
        }
        let curved = self.config.curve.apply(x).clamp(0.0, 1.0);
        (lerp_min + (lerp_max - lerp_min) * curved).clamp(lerp_min, lerp_max)
    }
}

fn sanitise(mut config: AdaptiveLerpConfig) -> AdaptiveLerpConfig {
    if config.lerp_min > config.lerp_max {
        std::mem::swap(&mut config.lerp_min, &mut config.lerp_max);
    }
    if config.bpm_min > config.bpm_max {
        std::mem::swap(&mut config.bpm_min, &mut config.bpm_max);
    }
    config.transition_speed = if config.transition_speed.is_nan() {
        0.1
    } else {
        config.transition_speed.clamp(0.01, 1.0)
    };
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn controller(curve: ResponseCurve) -> AdaptiveLerpController {
        AdaptiveLerpController::new(AdaptiveLerpConfig {
            curve,
            ..AdaptiveLerpConfig::default()
        })
    }

    #[test]
    fn attack_is_faster_than_decay() {
        let rising = attack_decay(0.0, 1.0, 0.5);
        assert!((rising - 0.5).abs() < 1e-6);

        let falling = attack_decay(1.0, 0.0, 0.5);
        assert!((falling - (1.0 - 0.5 * DECAY_RATIO)).abs() < 1e-6);
        assert!(1.0 - falling < rising);
    }

    #[test]
    fn curves_keep_endpoints() {
        for curve in [
            ResponseCurve::Linear,
            ResponseCurve::Exponential,
            ResponseCurve::Logarithmic,
        ] {
            assert!(curve.apply(0.0).abs() < 1e-6);
            assert!((curve.apply(1.0) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn exponential_curve_is_power_one_and_a_half() {
        assert!((ResponseCurve::Exponential.apply(0.25) - 0.125).abs() < 1e-6);
        assert!((ResponseCurve::Exponential.apply(0.04) - 0.008).abs() < 1e-6);
    }

    #[test]
    fn logarithmic_curve_is_log10_of_one_plus_nine_x() {
        let expected = 3.25f32.log10();
        assert!((ResponseCurve::Logarithmic.apply(0.25) - expected).abs() < 1e-5);
        assert!((ResponseCurve::Logarithmic.apply(0.25) - 0.5119).abs() < 1e-4);
    }

    #[test]
    fn tempo_midpoint_follows_exponential_curve() {
        let lerp = controller(ResponseCurve::Exponential);
        let expected = 0.15 + 0.45 * 0.5f32.powf(1.5);
        assert!((lerp.lerp_for_bpm(120.0) - expected).abs() < 1e-6);
    }

    #[test]
    fn tempo_midpoint_maps_linearly() {
        let lerp = controller(ResponseCurve::Linear);
        let mid = lerp.lerp_for_bpm(120.0);
        assert!((mid - 0.375).abs() < 1e-6);
    }

    #[test]
    fn update_eases_toward_target() {
        let mut lerp = controller(ResponseCurve::Linear);
        let first = lerp.update(180.0);
        assert!((first - (0.15 + (0.6 - 0.15) * 0.1)).abs() < 1e-6);

        for _ in 0..500 {
            lerp.update(180.0);
        }
        assert!((lerp.current() - 0.6).abs() < 1e-3);
    }

    #[test]
    fn transition_speed_is_clamped() {
        let lerp = AdaptiveLerpController::new(AdaptiveLerpConfig {
            transition_speed: 0.0,
            ..AdaptiveLerpConfig::default()
        });
        assert_eq!(lerp.config().transition_speed, 0.01);
    }

    #[test]
    fn combined_mapping_respects_weight() {
        let lerp = controller(ResponseCurve::Linear);
        assert!((lerp.lerp_for_combined(180.0, 0.0, 1.0) - 0.6).abs() < 1e-6);
        assert!((lerp.lerp_for_combined(180.0, 0.0, 0.0) - 0.15).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn tempo_outside_range_clamps_exactly(bpm in -1000.0f32..1000.0) {
            for curve in [ResponseCurve::Linear, ResponseCurve::Exponential, ResponseCurve::Logarithmic] {
                let lerp = controller(curve);
                let value = lerp.lerp_for_bpm(bpm);
                if bpm <= 60.0 {
                    prop_assert_eq!(value, 0.15);
                } else if bpm >= 180.0 {
                    prop_assert_eq!(value, 0.6);
                } else {
                    prop_assert!((0.15..=0.6).contains(&value));
                }
            }
        }

        #[test]
        fn live_factor_stays_in_range(bpms in proptest::collection::vec(-500.0f32..500.0, 1..64)) {
            let mut lerp = controller(ResponseCurve::Exponential);
            for bpm in bpms {
                let value = lerp.update(bpm);
                prop_assert!((0.15..=0.6).contains(&value));
            }
        }
    }
}
