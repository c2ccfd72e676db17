//! Core library for the audio-reactive vignette overlay.
//!
//! The crate is split by subsystem: the analysis stream client, the signal
//! shaping that turns bass statistics into animated visual parameters, and
//! the artwork colour extraction. Rendering and the host player are reached
//! through the [`render::RenderSurface`] trait and the [`host`] glue.

pub mod analysis;
pub mod artwork;
pub mod colour;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod intensity;
pub mod lerp;
pub mod render;
pub mod settings;
pub mod stream;

pub use analysis::{parse_payload, AnalysisFrame, BassBlock, StrongestBin};
pub use artwork::{upscale_url, ArtworkFetcher, ArtworkTask, HttpArtworkFetcher};
pub use colour::{extract_colour, extract_from_image, Hsv, Rgb};
pub use config::{AdaptiveLerpConfig, EngineConfig, OverlayOptions, ReconnectPolicy, ResponseCurve};
pub use engine::{VignetteEngine, VisualState};
pub use error::{Result, VignetteError};
pub use host::{DeviceDirectory, HostEvent, MediaItem, Overlay};
pub use intensity::IntensitySmoother;
pub use lerp::AdaptiveLerpController;
pub use render::{FrameStats, MemorySurface, RenderSurface, VisualParameters};
pub use settings::OverlaySettings;
pub use stream::{
    ClientState, ConnectionState, StreamClient, Transport, TransportEvent, TransportEventKind,
    WsTransport,
};
