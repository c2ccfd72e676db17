pub mod style;

use serde::{Deserialize, Serialize};

use crate::{colour::Rgb, config::OverlayOptions, Result, VignetteError};

/// Last accepted frame's raw statistics, for the optional stats panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub bass_average: f32,
    pub frequency: f32,
    pub bpm: Option<f32>,
}

/// Everything a surface needs to draw one frame of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualParameters {
    pub size: f32,
    pub blur: f32,
    pub intensity: f32,
    /// Glow hue in degrees, derived from the strongest bass frequency.
    pub hue: f32,
    pub ring_size: f32,
    pub left_intensity: f32,
    pub bottom_intensity: f32,
    pub colour: Rgb,
    pub stats: FrameStats,
}

/// Rendering backend the engine pushes parameters into. The engine never
/// draws; it only hands over numbers and the resolved colour.
pub trait RenderSurface {
    /// Claims the container the overlay lives in. An error here aborts
    /// engine construction.
    fn attach(&mut self, options: &OverlayOptions) -> Result<()>;

    fn apply(&mut self, params: &VisualParameters);

    /// Connection status for the optional status badge.
    fn set_status(&mut self, _connected: bool) {}

    /// Removes everything the surface added to its container.
    fn detach(&mut self);
}

/// Surface that keeps the most recent parameters in memory. Useful for hosts
/// that poll, and for tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySurface {
    container: Option<String>,
    attached: bool,
    connected: bool,
    applied: usize,
    last: Option<VisualParameters>,
}

impl MemorySurface {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: Some(container.into()),
            ..Self::default()
        }
    }

    /// A surface whose container cannot be found.
    pub fn without_container() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of frames applied since attaching.
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn last(&self) -> Option<&VisualParameters> {
        self.last.as_ref()
    }
}

impl RenderSurface for MemorySurface {
    fn attach(&mut self, _options: &OverlayOptions) -> Result<()> {
        if self.container.is_none() {
            return Err(VignetteError::MissingContainer("overlay container".into()));
        }
        self.attached = true;
        Ok(())
    }

    fn apply(&mut self, params: &VisualParameters) {
        if !self.attached {
            return;
        }
        self.applied += 1;
        self.last = Some(*params);
    }

    fn set_status(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn detach(&mut self) {
        self.attached = false;
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VisualParameters {
        VisualParameters {
            size: 100.0,
            blur: 10.0,
            intensity: 0.0,
            hue: 200.0,
            ring_size: 200.0,
            left_intensity: 0.0,
            bottom_intensity: 0.0,
            colour: Rgb::WHITE,
            stats: FrameStats::default(),
        }
    }

    #[test]
    fn missing_container_fails_attach() {
        let mut surface = MemorySurface::without_container();
        let err = surface.attach(&OverlayOptions::default()).unwrap_err();
        assert!(matches!(err, VignetteError::MissingContainer(_)));
    }

    #[test]
    fn keeps_last_parameters_while_attached() {
        let mut surface = MemorySurface::new("now-playing");
        surface.apply(&params());
        assert_eq!(surface.applied(), 0);

        surface.attach(&OverlayOptions::default()).unwrap();
        surface.apply(&params());
        assert_eq!(surface.applied(), 1);
        assert_eq!(surface.last().unwrap().size, 100.0);

        surface.detach();
        assert!(surface.last().is_none());
    }
}
