use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use crossbeam_channel::select;
use tracing_subscriber::EnvFilter;
use vignette_core::{
    artwork::extract_artwork_colour,
    render::style,
    upscale_url, ClientState, EngineConfig, HttpArtworkFetcher, OverlayOptions, RenderSurface,
    VignetteEngine, VisualParameters, WsTransport,
};

/// Upper bound on how long the loop sleeps, so finished artwork is picked up.
const TICK: Duration = Duration::from_millis(100);

fn main() -> vignette_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            url,
            device,
            artwork,
            artwork_colour,
        } => {
            let mut engine_config = match config {
                Some(path) => EngineConfig::from_json_file(path)?,
                None => EngineConfig::default(),
            };
            if let Some(url) = url {
                engine_config.ws_url = url;
            }
            if let Some(device) = device {
                engine_config.device_id = device;
            }
            engine_config.artwork_colour |= artwork_colour;
            run(engine_config, artwork.as_deref())
        }
        Commands::Extract { source } => run_extract(&source),
    }
}

fn run(mut config: EngineConfig, artwork: Option<&str>) -> vignette_core::Result<()> {
    config.overlay.now_playing_visible = true;
    tracing::info!(url = %config.ws_url, device = %config.device_id, "starting overlay");

    let (transport, events) = WsTransport::channel();
    let mut engine = VignetteEngine::new(
        config,
        transport,
        LogSurface::default(),
        HttpArtworkFetcher::default(),
        Instant::now(),
    )?;
    if let Some(artwork) = artwork {
        engine.set_artwork_url(Some(upscale_url(artwork)));
    }

    loop {
        let now = Instant::now();
        let timeout = engine
            .next_deadline()
            .map(|due| due.saturating_duration_since(now).min(TICK))
            .unwrap_or(TICK);

        select! {
            recv(events) -> event => match event {
                Ok(event) => engine.handle_transport_event(event, Instant::now()),
                Err(_) => break,
            },
            default(timeout) => {}
        }
        engine.poll(Instant::now());

        if engine.client().state() == ClientState::Disconnected && engine.next_deadline().is_none() {
            tracing::info!(
                attempts = engine.client().reconnect_attempts(),
                "analysis stream unavailable, exiting"
            );
            break;
        }
    }

    engine.destroy();
    Ok(())
}

fn run_extract(source: &str) -> vignette_core::Result<()> {
    tracing::info!(source, "extracting artwork colour");
    let colour = extract_artwork_colour(&HttpArtworkFetcher::default(), source)?;
    println!("{colour}");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Surface that reports the overlay through the log instead of drawing it.
#[derive(Debug, Default)]
struct LogSurface {
    frames: u64,
    show_stats: bool,
}

impl RenderSurface for LogSurface {
    fn attach(&mut self, options: &OverlayOptions) -> vignette_core::Result<()> {
        self.show_stats = options.show_stats;
        tracing::debug!(z_index = options.z_index, "log surface attached");
        Ok(())
    }

    fn apply(&mut self, params: &VisualParameters) {
        self.frames += 1;
        tracing::debug!(
            size = params.size,
            blur = params.blur,
            intensity = params.intensity,
            colour = %params.colour,
            "vignette frame"
        );
        tracing::trace!(
            box_shadow = %style::vignette_box_shadow(params),
            glow = %style::glow_background(params),
            ring = %style::pulse_ring(params),
            "vignette css"
        );
        if self.show_stats {
            tracing::info!(
                bass = params.stats.bass_average,
                frequency = params.stats.frequency,
                bpm = ?params.stats.bpm,
                "frame stats"
            );
        }
    }

    fn set_status(&mut self, connected: bool) {
        tracing::info!(connected, "analysis stream status");
    }

    fn detach(&mut self) {
        tracing::info!(frames = self.frames, "log surface detached");
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive vignette overlay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the analysis server and drive the overlay.
    Run {
        /// JSON engine configuration to load.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Analysis server address, overriding the configuration.
        #[arg(long)]
        url: Option<String>,
        /// Native id of the output device to announce.
        #[arg(long)]
        device: Option<String>,
        /// Artwork of the current track.
        #[arg(long)]
        artwork: Option<String>,
        /// Tint the vignette with the artwork's dominant colour.
        #[arg(long)]
        artwork_colour: bool,
    },
    /// Print the colour extracted from an image path or URL.
    Extract {
        /// Image path, file:// URL or http(s) URL.
        source: String,
    },
}
