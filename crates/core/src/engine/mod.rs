//! The overlay engine: turns accepted analysis frames into smoothly animated
//! visual parameters and hands them to a [`RenderSurface`].

use std::time::Instant;

use crate::{
    analysis::AnalysisFrame,
    artwork::{ArtworkFetcher, ArtworkResult, ArtworkTask},
    colour::Rgb,
    config::EngineConfig,
    intensity::IntensitySmoother,
    lerp::{attack_decay, AdaptiveLerpController},
    render::{FrameStats, RenderSurface, VisualParameters},
    stream::{StreamClient, Transport, TransportEvent},
    Result,
};

const BASE_SIZE: f32 = 100.0;
const SIZE_RANGE: f32 = 300.0;
const BASE_BLUR: f32 = 10.0;
const BLUR_RANGE: f32 = 200.0;
/// Share of the dynamic intensity factor that may lift the base intensity.
const DYNAMIC_INTENSITY_SHARE: f32 = 0.5;

/// Animated state carried from frame to frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualState {
    pub current_size: f32,
    pub current_blur: f32,
    pub current_intensity: f32,
    pub target_size: f32,
    pub target_blur: f32,
    pub target_intensity: f32,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            current_size: BASE_SIZE,
            current_blur: BASE_BLUR,
            current_intensity: 0.0,
            target_size: BASE_SIZE,
            target_blur: BASE_BLUR,
            target_intensity: 0.0,
        }
    }
}

/// Colour resolved from the artwork and the URL it was taken from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColourCache {
    pub url: Option<String>,
    pub colour: Rgb,
}

impl ColourCache {
    pub fn clear(&mut self) {
        self.url = None;
        self.colour = Rgb::WHITE;
    }
}

/// Intensity of a frame before the multiplier: low, loud bass scores highest.
pub fn base_intensity(frequency: f32, average: f32) -> f32 {
    let low_frequency = (1.0 - (frequency - 20.0) / 200.0).max(0.0);
    let magnitude = (average * 10_000.0).clamp(0.0, 1.0);
    let value = low_frequency * magnitude;
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

/// Raises, never lowers, the base intensity with the dynamic factor.
pub fn blend_dynamic_intensity(base: f32, dynamic: f32) -> f32 {
    base.max(dynamic * DYNAMIC_INTENSITY_SHARE)
}

/// Audio-reactive vignette engine.
///
/// All mutation happens on the owner's thread through `&mut self`: transport
/// events, timer polls, setters and artwork completions are applied in the
/// order the owner delivers them.
pub struct VignetteEngine<T: Transport, S: RenderSurface> {
    config: EngineConfig,
    client: StreamClient<T>,
    surface: Option<S>,
    state: VisualState,
    smoother: IntensitySmoother,
    adaptive: AdaptiveLerpController,
    active_lerp: f32,
    artwork: ArtworkTask,
    artwork_url: Option<String>,
    colour: ColourCache,
    hue: f32,
    stats: FrameStats,
    reported_connected: bool,
}

impl<T: Transport, S: RenderSurface> VignetteEngine<T, S> {
    /// Attaches to the surface and starts connecting. Fails only when the
    /// surface has no container to draw into.
    pub fn new(
        config: EngineConfig,
        transport: T,
        mut surface: S,
        fetcher: impl ArtworkFetcher,
        now: Instant,
    ) -> Result<Self> {
        surface.attach(&config.overlay)?;

        let mut config = config;
        config.lerp_factor = sanitise_lerp(config.lerp_factor);
        config.intensity_multiplier = sanitise_multiplier(config.intensity_multiplier);

        let mut engine = Self {
            client: StreamClient::new(transport, &config),
            surface: Some(surface),
            state: VisualState::default(),
            smoother: IntensitySmoother::new(),
            adaptive: AdaptiveLerpController::new(config.adaptive_lerp.clone()),
            active_lerp: config.lerp_factor,
            artwork: ArtworkTask::new(fetcher),
            artwork_url: None,
            colour: ColourCache::default(),
            hue: 200.0,
            stats: FrameStats::default(),
            reported_connected: false,
            config,
        };

        tracing::info!(url = %engine.config.ws_url, "vignette engine created");
        engine.client.connect(now);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &VisualState {
        &self.state
    }

    pub fn client(&self) -> &StreamClient<T> {
        &self.client
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    /// Lerp factor used for the most recent interpolation.
    pub fn active_lerp(&self) -> f32 {
        self.active_lerp
    }

    pub fn colour(&self) -> Rgb {
        self.colour.colour
    }

    /// Artwork URL most recently reported by the host.
    pub fn artwork_url(&self) -> Option<&str> {
        self.artwork_url.as_deref()
    }

    pub fn colour_cache(&self) -> &ColourCache {
        &self.colour
    }

    pub fn is_destroyed(&self) -> bool {
        self.surface.is_none()
    }

    pub fn parameters(&self) -> VisualParameters {
        let intensity = self.state.current_intensity;
        VisualParameters {
            size: self.state.current_size,
            blur: self.state.current_blur,
            intensity,
            hue: self.hue,
            ring_size: 200.0 + intensity * 600.0,
            left_intensity: intensity * 0.7,
            bottom_intensity: intensity * 0.6,
            colour: self.colour.colour,
            stats: self.stats,
        }
    }

    /// Instant the owner should next call [`poll`](Self::poll) by.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.client.next_deadline()
    }

    /// Feeds one transport event through the client and renders the first
    /// frame it delivers.
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if self.is_destroyed() {
            return;
        }
        if let Some(frames) = self.client.handle_event(event, now) {
            if let Some(frame) = frames.first() {
                self.update(frame);
            }
        }
        self.report_status();
    }

    /// Fires due reconnects and picks up finished artwork extractions.
    pub fn poll(&mut self, now: Instant) {
        if self.is_destroyed() {
            return;
        }
        self.client.poll(now);
        self.collect_artwork();
        self.report_status();
    }

    /// Advances the animation by one accepted frame.
    pub fn update(&mut self, frame: &AnalysisFrame) {
        if self.is_destroyed() || !self.config.overlay.now_playing_visible {
            return;
        }
        let (Some(bass), Some(strongest)) = (frame.bass.as_ref(), frame.strongest()) else {
            return;
        };

        let mut intensity = base_intensity(strongest.frequency, bass.average);
        if self.config.dynamic_intensity {
            let dynamic = self.smoother.update(bass);
            intensity = blend_dynamic_intensity(intensity, dynamic);
        }
        let total = intensity * self.config.intensity_multiplier;

        self.state.target_size = BASE_SIZE + total * SIZE_RANGE;
        self.state.target_blur = BASE_BLUR + total * BLUR_RANGE;
        self.state.target_intensity = total;

        // Frames without a usable tempo fall back to the configured factor.
        self.active_lerp = match frame.tempo() {
            Some(bpm) if self.config.dynamic_lerp => self.adaptive.update(bpm),
            _ => self.config.lerp_factor,
        };

        let lerp = self.active_lerp;
        let state = &mut self.state;
        state.current_size = attack_decay(state.current_size, state.target_size, lerp);
        state.current_blur = attack_decay(state.current_blur, state.target_blur, lerp);
        state.current_intensity =
            attack_decay(state.current_intensity, state.target_intensity, lerp);

        self.hue = 200.0 + strongest.frequency / 10.0;
        self.stats = FrameStats {
            bass_average: bass.average,
            frequency: strongest.frequency,
            bpm: frame.bpm,
        };

        self.collect_artwork();
        self.resolve_colour();

        let params = self.parameters();
        if let Some(surface) = self.surface.as_mut() {
            surface.apply(&params);
        }
    }

    /// Records the artwork currently shown by the host. Extraction starts on
    /// the next frame.
    pub fn set_artwork_url(&mut self, url: Option<String>) {
        self.artwork_url = url;
    }

    pub fn set_lerp_factor(&mut self, factor: f32) {
        self.config.lerp_factor = sanitise_lerp(factor);
        if !self.config.dynamic_lerp {
            self.active_lerp = self.config.lerp_factor;
        }
    }

    pub fn set_intensity_multiplier(&mut self, multiplier: f32) {
        self.config.intensity_multiplier = sanitise_multiplier(multiplier);
    }

    pub fn set_dynamic_lerp_enabled(&mut self, enabled: bool) {
        self.config.dynamic_lerp = enabled;
        if !enabled {
            self.active_lerp = self.config.lerp_factor;
        }
    }

    pub fn set_dynamic_intensity_enabled(&mut self, enabled: bool) {
        if enabled && !self.config.dynamic_intensity {
            self.smoother.reset();
        }
        self.config.dynamic_intensity = enabled;
    }

    /// Toggles artwork-driven colour. Disabling pins the colour to white and
    /// forgets the last artwork so re-enabling extracts again.
    pub fn set_dynamic_colour(&mut self, enabled: bool) {
        self.config.artwork_colour = enabled;
        if !enabled {
            self.colour.clear();
        }
    }

    /// Clears the smoothed dynamic-intensity state, e.g. on a track change.
    pub fn reset_dynamic_intensity(&mut self) {
        self.smoother.reset();
    }

    /// Stops (`true`) or resumes (`false`) frame processing.
    pub fn toggle_pause(&mut self, paused: bool) {
        self.config.overlay.now_playing_visible = !paused;
    }

    pub fn is_paused(&self) -> bool {
        !self.config.overlay.now_playing_visible
    }

    pub fn device_changed(&mut self, device_id: &str) {
        self.config.device_id = device_id.to_string();
        self.client.device_changed(device_id);
    }

    pub fn reconnect(&mut self, now: Instant) {
        if self.is_destroyed() {
            return;
        }
        self.client.reconnect(now);
        self.report_status();
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
        self.report_status();
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Disconnects and detaches from the surface. The engine ignores every
    /// call that could render afterwards.
    pub fn destroy(&mut self) {
        self.client.disconnect();
        if let Some(mut surface) = self.surface.take() {
            surface.detach();
            tracing::info!("vignette engine destroyed");
        }
    }

    fn resolve_colour(&mut self) {
        if !self.config.artwork_colour {
            self.colour.clear();
            return;
        }
        let Some(url) = self.artwork_url.as_deref() else {
            return;
        };
        if self.colour.url.as_deref() == Some(url) || self.artwork.is_busy() {
            return;
        }

        tracing::debug!(url, "artwork changed, extracting colour");
        if self.artwork.start(url) {
            self.colour.url = Some(url.to_string());
        }
    }

    fn collect_artwork(&mut self) {
        while let Some(result) = self.artwork.try_complete() {
            self.apply_artwork_result(result);
        }
    }

    fn apply_artwork_result(&mut self, result: ArtworkResult) {
        if !self.config.artwork_colour {
            tracing::trace!(url = %result.url, "artwork colour disabled, dropping result");
            return;
        }
        if self.artwork_url.as_deref() != Some(result.url.as_str()) {
            tracing::debug!(url = %result.url, "artwork changed during extraction, dropping result");
            return;
        }

        self.colour.url = Some(result.url);
        if let Some(colour) = result.colour {
            tracing::info!(colour = %colour, "artwork colour resolved");
            self.colour.colour = colour;
        }
    }

    fn report_status(&mut self) {
        let connected = self.client.is_connected();
        if connected == self.reported_connected {
            return;
        }
        self.reported_connected = connected;
        if let Some(surface) = self.surface.as_mut() {
            surface.set_status(connected);
        }
    }
}

impl<T: Transport, S: RenderSurface> std::fmt::Debug for VignetteEngine<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VignetteEngine")
            .field("state", &self.state)
            .field("active_lerp", &self.active_lerp)
            .field("colour", &self.colour)
            .field("connected", &self.client.is_connected())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

fn sanitise_lerp(factor: f32) -> f32 {
    if factor.is_nan() {
        return EngineConfig::default().lerp_factor;
    }
    factor.clamp(0.0, 1.0)
}

fn sanitise_multiplier(multiplier: f32) -> f32 {
    if multiplier.is_nan() {
        return 1.0;
    }
    multiplier.max(0.0)
}
