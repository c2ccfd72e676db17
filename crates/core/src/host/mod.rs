//! Glue between the host player's lifecycle notifications and the engine.

use std::{collections::HashMap, time::Instant};

use crate::{
    artwork::upscale_url, config::EngineConfig, engine::VignetteEngine, render::RenderSurface,
    settings::OverlaySettings, stream::Transport, Result,
};

/// Currently playing item as reported by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaItem {
    pub title: Option<String>,
    pub artwork_url: Option<String>,
}

/// Lifecycle notifications the overlay reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    EnteredNowPlaying,
    ExitedNowPlaying,
    /// Host-side id of the new output device.
    ActiveDeviceChanged(String),
    MediaItemChanged(Option<MediaItem>),
    Unload,
}

/// Maps host device ids to the native ids the analysis server understands.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    native: HashMap<String, String>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host_id: impl Into<String>, native_id: impl Into<String>) {
        self.native.insert(host_id.into(), native_id.into());
    }

    pub fn native_id(&self, host_id: &str) -> Option<&str> {
        self.native.get(host_id).map(String::as_str)
    }
}

type EngineFactory<T, S> = Box<dyn FnMut(EngineConfig, Instant) -> Result<VignetteEngine<T, S>>>;

/// Owns the engine for the lifetime of the host session and creates it
/// lazily, the first time there is something to show.
pub struct Overlay<T: Transport, S: RenderSurface> {
    config: EngineConfig,
    settings: OverlaySettings,
    devices: DeviceDirectory,
    factory: EngineFactory<T, S>,
    engine: Option<VignetteEngine<T, S>>,
    visible: bool,
}

impl<T: Transport, S: RenderSurface> Overlay<T, S> {
    pub fn new<F>(
        config: EngineConfig,
        settings: OverlaySettings,
        devices: DeviceDirectory,
        factory: F,
    ) -> Self
    where
        F: FnMut(EngineConfig, Instant) -> Result<VignetteEngine<T, S>> + 'static,
    {
        Self {
            visible: config.overlay.now_playing_visible,
            config,
            settings,
            devices,
            factory: Box::new(factory),
            engine: None,
        }
    }

    pub fn engine(&self) -> Option<&VignetteEngine<T, S>> {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut VignetteEngine<T, S>> {
        self.engine.as_mut()
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn devices_mut(&mut self) -> &mut DeviceDirectory {
        &mut self.devices
    }

    /// Replaces the user settings and mirrors them into the live engine.
    pub fn update_settings(&mut self, settings: OverlaySettings) {
        if let Some(engine) = self.engine.as_mut() {
            settings.apply_to(engine);
        }
        self.settings = settings;
    }

    pub fn handle(&mut self, event: HostEvent, now: Instant) {
        tracing::debug!(?event, "host event");
        match event {
            HostEvent::EnteredNowPlaying => {
                self.visible = true;
                match self.engine.as_mut() {
                    Some(engine) => {
                        engine.toggle_pause(false);
                        engine.reconnect(now);
                    }
                    None => self.init(now),
                }
            }
            HostEvent::ExitedNowPlaying => {
                self.visible = false;
                if let Some(engine) = self.engine.as_mut() {
                    engine.toggle_pause(true);
                    engine.disconnect();
                }
            }
            HostEvent::ActiveDeviceChanged(host_id) => {
                let native = match self.devices.native_id(&host_id) {
                    Some(native) => native.to_string(),
                    None => {
                        tracing::debug!(host_id = %host_id, "unknown device, forwarding host id");
                        host_id
                    }
                };
                self.config.device_id = native.clone();
                if let Some(engine) = self.engine.as_mut() {
                    engine.device_changed(&native);
                }
            }
            HostEvent::MediaItemChanged(Some(item)) => {
                match self.engine.as_mut() {
                    Some(engine) => {
                        if !engine.is_connected() {
                            engine.reconnect(now);
                        }
                    }
                    None => self.init(now),
                }
                if let Some(engine) = self.engine.as_mut() {
                    engine.reset_dynamic_intensity();
                    engine.set_artwork_url(item.artwork_url.as_deref().map(upscale_url));
                }
            }
            HostEvent::MediaItemChanged(None) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.disconnect();
                }
            }
            HostEvent::Unload => {
                if let Some(mut engine) = self.engine.take() {
                    engine.destroy();
                }
            }
        }
    }

    fn init(&mut self, now: Instant) {
        let mut config = self.config.clone();
        config.overlay.now_playing_visible = self.visible;

        match (self.factory)(config, now) {
            Ok(mut engine) => {
                self.settings.apply_to(&mut engine);
                self.engine = Some(engine);
            }
            Err(err) => {
                tracing::error!(%err, "failed to initialise vignette engine");
            }
        }
    }
}

impl<T: Transport, S: RenderSurface> std::fmt::Debug for Overlay<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("visible", &self.visible)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artwork::testing::SolidFetcher,
        render::MemorySurface,
        stream::{testing::RecordingTransport, ClientState, TransportEvent, TransportEventKind},
    };

    type TestOverlay = Overlay<RecordingTransport, MemorySurface>;

    fn overlay() -> TestOverlay {
        let mut devices = DeviceDirectory::new();
        devices.insert("host-speaker", "hw:1,0");
        Overlay::new(
            EngineConfig::host_defaults(),
            OverlaySettings::default(),
            devices,
            |config, now| {
                VignetteEngine::new(
                    config,
                    RecordingTransport::default(),
                    MemorySurface::new("now-playing"),
                    SolidFetcher,
                    now,
                )
            },
        )
    }

    fn open(overlay: &mut TestOverlay, now: Instant) {
        let engine = overlay.engine_mut().unwrap();
        let generation = engine.client().generation();
        engine.handle_transport_event(
            TransportEvent {
                generation,
                kind: TransportEventKind::Open,
            },
            now,
        );
    }

    #[test]
    fn entering_creates_a_visible_engine() {
        let mut overlay = overlay();
        overlay.handle(HostEvent::EnteredNowPlaying, Instant::now());

        let engine = overlay.engine().unwrap();
        assert!(!engine.is_paused());
        assert!(engine.config().artwork_colour);
        assert_eq!(engine.config().lerp_factor, 0.2);
    }

    #[test]
    fn exiting_pauses_and_disconnects() {
        let now = Instant::now();
        let mut overlay = overlay();
        overlay.handle(HostEvent::EnteredNowPlaying, now);
        open(&mut overlay, now);
        assert!(overlay.engine().unwrap().is_connected());

        overlay.handle(HostEvent::ExitedNowPlaying, now);
        let engine = overlay.engine().unwrap();
        assert!(engine.is_paused());
        assert_eq!(engine.client().state(), ClientState::Disconnected);

        overlay.handle(HostEvent::EnteredNowPlaying, now);
        let engine = overlay.engine().unwrap();
        assert!(!engine.is_paused());
        assert_eq!(engine.client().state(), ClientState::Connecting);
    }

    #[test]
    fn entering_again_restarts_a_live_connection() {
        let now = Instant::now();
        let mut overlay = overlay();
        overlay.handle(HostEvent::EnteredNowPlaying, now);
        open(&mut overlay, now);
        let generation = overlay.engine().unwrap().client().generation();

        overlay.handle(HostEvent::EnteredNowPlaying, now);
        let engine = overlay.engine().unwrap();
        assert_eq!(engine.client().transport().opened.len(), 2);
        assert!(engine.client().generation() > generation);
        assert_eq!(engine.client().state(), ClientState::Connecting);
    }

    #[test]
    fn device_changes_are_translated() {
        let now = Instant::now();
        let mut overlay = overlay();
        overlay.handle(HostEvent::EnteredNowPlaying, now);
        open(&mut overlay, now);

        overlay.handle(HostEvent::ActiveDeviceChanged("host-speaker".into()), now);
        overlay.handle(HostEvent::ActiveDeviceChanged("unknown".into()), now);
        let sent = &overlay.engine().unwrap().client().transport().sent;
        assert_eq!(sent[1..], ["hw:1,0".to_string(), "unknown".to_string()]);
    }

    #[test]
    fn media_change_upscales_artwork() {
        let now = Instant::now();
        let mut overlay = overlay();
        overlay.handle(
            HostEvent::MediaItemChanged(Some(MediaItem {
                title: Some("Track".into()),
                artwork_url: Some("https://cdn.example/art/300x300.jpg".into()),
            })),
            now,
        );
        assert_eq!(
            overlay.engine().unwrap().artwork_url(),
            Some("https://cdn.example/art/1280x1280.jpg")
        );
        // Created before the view was entered, so frames stay gated.
        assert!(overlay.engine().unwrap().is_paused());

        overlay.handle(HostEvent::MediaItemChanged(None), now);
        assert!(!overlay.engine().unwrap().is_connected());
    }

    #[test]
    fn failed_init_leaves_no_engine() {
        let mut overlay: TestOverlay = Overlay::new(
            EngineConfig::default(),
            OverlaySettings::default(),
            DeviceDirectory::new(),
            |config, now| {
                VignetteEngine::new(
                    config,
                    RecordingTransport::default(),
                    MemorySurface::without_container(),
                    SolidFetcher,
                    now,
                )
            },
        );
        overlay.handle(HostEvent::EnteredNowPlaying, Instant::now());
        assert!(overlay.engine().is_none());
    }

    #[test]
    fn unload_destroys_the_engine() {
        let mut overlay = overlay();
        overlay.handle(HostEvent::EnteredNowPlaying, Instant::now());
        overlay.handle(HostEvent::Unload, Instant::now());
        assert!(overlay.engine().is_none());
    }
}
