//! Artwork fetching and the single-slot background extraction task.

use std::{
    io::Read,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{
    colour::{extract_from_image, Rgb},
    Result, VignetteError,
};

/// Size segment substituted into artwork URLs so extraction sees the large
/// rendition.
const HIGH_RES: &str = "1280x1280";
/// Upper bound on downloaded artwork.
const MAX_ARTWORK_BYTES: u64 = 16 * 1024 * 1024;

/// Loads and decodes artwork for a URL.
pub trait ArtworkFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> Result<image::RgbaImage>;
}

/// Fetches `http(s)://` artwork with ureq and reads `file://` URLs or plain
/// paths from disk.
#[derive(Clone)]
pub struct HttpArtworkFetcher {
    agent: ureq::Agent,
}

impl HttpArtworkFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn read_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .agent
                .get(url)
                .set("User-Agent", "vignette-overlay")
                .call()
                .map_err(|err| VignetteError::Artwork(err.to_string()))?;

            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_ARTWORK_BYTES)
                .read_to_end(&mut bytes)?;
            return Ok(bytes);
        }

        let path = match url.strip_prefix("file://") {
            Some(path) => PathBuf::from(percent_decode(path)),
            None => PathBuf::from(url),
        };
        std::fs::read(&path)
            .map_err(|err| VignetteError::Artwork(format!("{}: {err}", path.display())))
    }
}

impl std::fmt::Debug for HttpArtworkFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpArtworkFetcher").finish_non_exhaustive()
    }
}

impl Default for HttpArtworkFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ArtworkFetcher for HttpArtworkFetcher {
    fn fetch(&self, url: &str) -> Result<image::RgbaImage> {
        let bytes = self.read_bytes(url)?;
        Ok(image::load_from_memory(&bytes)?.to_rgba8())
    }
}

/// Fetches and extracts the colour for `url` on the calling thread.
pub fn extract_artwork_colour(fetcher: &dyn ArtworkFetcher, url: &str) -> Result<Rgb> {
    let image = fetcher.fetch(url)?;
    Ok(extract_from_image(&image))
}

/// Rewrites the first `<w>x<h>` segment of an artwork URL to the high
/// resolution rendition. URLs without one are returned unchanged.
pub fn upscale_url(url: &str) -> String {
    let bytes = url.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'x' {
            let mut end = i + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > i + 1 {
                return format!("{}{HIGH_RES}{}", &url[..start], &url[end..]);
            }
        }
    }
    url.to_string()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Colour extracted for one artwork URL. `colour` is `None` when the artwork
/// could not be fetched or decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtworkResult {
    pub url: String,
    pub colour: Option<Rgb>,
}

/// Runs at most one extraction at a time on a background thread.
pub struct ArtworkTask {
    fetcher: Arc<dyn ArtworkFetcher>,
    results_tx: Sender<ArtworkResult>,
    results_rx: Receiver<ArtworkResult>,
    in_flight: Option<String>,
}

impl ArtworkTask {
    pub fn new(fetcher: impl ArtworkFetcher) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            fetcher: Arc::new(fetcher),
            results_tx,
            results_rx,
            in_flight: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// URL currently being extracted.
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Starts extracting `url`. Returns `false` without doing anything when an
    /// extraction is already running.
    pub fn start(&mut self, url: &str) -> bool {
        if self.is_busy() {
            return false;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.results_tx.clone();
        let owned = url.to_string();
        let spawned = thread::Builder::new()
            .name("artwork-colour".into())
            .spawn(move || {
                let colour = match extract_artwork_colour(fetcher.as_ref(), &owned) {
                    Ok(colour) => Some(colour),
                    Err(err) => {
                        tracing::warn!(url = %owned, %err, "artwork colour extraction failed");
                        None
                    }
                };
                let _ = tx.send(ArtworkResult { url: owned, colour });
            });

        match spawned {
            Ok(_) => {
                self.in_flight = Some(url.to_string());
                true
            }
            Err(err) => {
                tracing::warn!(%err, "could not spawn artwork worker");
                false
            }
        }
    }

    /// Returns the finished result, if the running extraction completed.
    pub fn try_complete(&mut self) -> Option<ArtworkResult> {
        let result = self.results_rx.try_recv().ok()?;
        self.in_flight = None;
        Some(result)
    }

    /// Blocks up to `timeout` for the running extraction.
    pub fn wait(&mut self, timeout: Duration) -> Option<ArtworkResult> {
        self.in_flight.as_ref()?;
        let result = self.results_rx.recv_timeout(timeout).ok()?;
        self.in_flight = None;
        Some(result)
    }
}

impl std::fmt::Debug for ArtworkTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtworkTask")
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Serves a solid image for URLs naming `red` or `blue` and fails otherwise.
    #[derive(Debug, Clone, Default)]
    pub struct SolidFetcher;

    impl ArtworkFetcher for SolidFetcher {
        fn fetch(&self, url: &str) -> Result<image::RgbaImage> {
            let pixel = if url.contains("red") {
                image::Rgba([200, 40, 40, 255])
            } else if url.contains("blue") {
                image::Rgba([40, 40, 200, 255])
            } else {
                return Err(VignetteError::Artwork(format!("no artwork at {url}")));
            };
            Ok(image::RgbaImage::from_pixel(24, 24, pixel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::SolidFetcher;
    use super::*;

    #[test]
    fn upscales_first_size_segment() {
        assert_eq!(
            upscale_url("https://cdn.example/images/ab/cd/320x320.jpg"),
            "https://cdn.example/images/ab/cd/1280x1280.jpg"
        );
        assert_eq!(
            upscale_url("https://cdn.example/v2x/80x80/9x9.jpg"),
            "https://cdn.example/v2x/1280x1280/9x9.jpg"
        );
        assert_eq!(upscale_url("https://cdn.example/a.jpg"), "https://cdn.example/a.jpg");
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(percent_decode("/music/My%20Album/cover.png"), "/music/My Album/cover.png");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn reads_file_urls() {
        let dir = std::env::temp_dir().join(format!("vignette-art-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cover art.png");
        image::RgbaImage::from_pixel(12, 12, image::Rgba([40, 200, 40, 255]))
            .save(&path)
            .unwrap();

        let url = format!("file://{}", path.display()).replace(' ', "%20");
        let colour = extract_artwork_colour(&HttpArtworkFetcher::default(), &url).unwrap();
        assert_eq!(colour.to_hsv().h.round(), 120.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn one_extraction_at_a_time() {
        let mut task = ArtworkTask::new(SolidFetcher);
        assert!(task.start("art://red"));
        assert!(!task.start("art://blue"));
        assert_eq!(task.in_flight(), Some("art://red"));

        let result = task.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(result.url, "art://red");
        assert_eq!(result.colour, Some(Rgb::new(230, 0, 0)));
        assert!(!task.is_busy());
    }

    #[test]
    fn failed_fetch_yields_no_colour() {
        let mut task = ArtworkTask::new(SolidFetcher);
        task.start("art://missing");
        let result = task.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(result.colour, None);
    }
}
