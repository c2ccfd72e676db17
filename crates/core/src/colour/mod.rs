//! Colour types and the artwork colour extractor.
//!
//! The extractor samples a bitmap on a coarse grid, groups the samples into
//! 15° hue buckets and picks the bucket that is both vivid and common. It
//! never fails: anything unexpected degrades to opaque white.

use std::{collections::BTreeMap, fmt};

use palette::{FromColor, Srgb};
use serde::{Deserialize, Serialize};

/// Every n-th pixel along each axis is sampled.
const SAMPLE_STRIDE: usize = 6;
const HUE_BUCKET_DEGREES: f32 = 15.0;
const MIN_ALPHA: u8 = 128;
const NEAR_BLACK: u8 = 20;
const VIBRANT_MIN_SATURATION: f32 = 0.3;
const VIBRANT_MIN_VALUE: f32 = 0.2;
const DOMINANT_HUE_COUNT: usize = 3;
const DOMINANT_HUE_BONUS: f32 = 2.0;
const SATURATION_BOOST: f32 = 1.35;
const VALUE_BOOST: f32 = 1.15;

/// 8-bit RGB triple. Formats as `"R, G, B"`, ready to drop into `rgba()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hsv(self) -> Hsv {
        let rgb: Srgb<f32> = Srgb::new(self.r, self.g, self.b).into_format();
        let hsv: palette::Hsv = palette::Hsv::from_color(rgb);
        Hsv {
            h: hsv.hue.into_positive_degrees(),
            s: hsv.saturation,
            v: hsv.value,
        }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.r, self.g, self.b)
    }
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Hsv {
    pub fn to_rgb(self) -> Rgb {
        let hsv = palette::Hsv::new_srgb(
            self.h.rem_euclid(360.0),
            self.s.clamp(0.0, 1.0),
            self.v.clamp(0.0, 1.0),
        );
        let rgb: Srgb = Srgb::from_color(hsv);
        Rgb::new(channel(rgb.red), channel(rgb.green), channel(rgb.blue))
    }

    /// Scales saturation and value, capping both at 1.
    pub fn boosted(self, saturation: f32, value: f32) -> Hsv {
        Hsv {
            h: self.h,
            s: (self.s * saturation).min(1.0),
            v: (self.v * value).min(1.0),
        }
    }
}

fn channel(unit: f32) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Running totals for one hue bucket.
#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    r: u64,
    g: u64,
    b: u64,
    count: u32,
    saturation: f32,
    value: f32,
}

impl Bucket {
    fn add(&mut self, rgb: Rgb, hsv: Hsv) {
        self.r += u64::from(rgb.r);
        self.g += u64::from(rgb.g);
        self.b += u64::from(rgb.b);
        self.count += 1;
        self.saturation += hsv.s;
        self.value += hsv.v;
    }

    fn avg_saturation(&self) -> f32 {
        self.saturation / self.count as f32
    }

    fn avg_value(&self) -> f32 {
        self.value / self.count as f32
    }

    fn average(&self) -> Rgb {
        let n = f64::from(self.count);
        let avg = |total: u64| (total as f64 / n).round().clamp(0.0, 255.0) as u8;
        Rgb::new(avg(self.r), avg(self.g), avg(self.b))
    }
}

/// Picks the representative colour of an RGBA8 bitmap laid out row by row.
///
/// Returns [`Rgb::WHITE`] for empty images, short pixel buffers or images
/// without any qualifying pixel.
pub fn extract_colour(width: usize, height: usize, rgba: &[u8]) -> Rgb {
    if width == 0 || height == 0 {
        tracing::warn!("artwork has no pixels, using white");
        return Rgb::WHITE;
    }
    let expected = width.checked_mul(height).and_then(|n| n.checked_mul(4));
    if expected.map_or(true, |len| rgba.len() < len) {
        tracing::warn!(width, height, len = rgba.len(), "pixel buffer is too short, using white");
        return Rgb::WHITE;
    }

    let (dominant, vibrant) = collect_buckets(width, height, rgba);
    let Some(bucket) = choose_bucket(&dominant, &vibrant) else {
        tracing::debug!("no qualifying pixels in artwork, using white");
        return Rgb::WHITE;
    };

    bucket
        .average()
        .to_hsv()
        .boosted(SATURATION_BOOST, VALUE_BOOST)
        .to_rgb()
}

/// Convenience wrapper for decoded images.
pub fn extract_from_image(image: &image::RgbaImage) -> Rgb {
    extract_colour(
        image.width() as usize,
        image.height() as usize,
        image.as_raw(),
    )
}

type Buckets = BTreeMap<u16, Bucket>;

fn collect_buckets(width: usize, height: usize, rgba: &[u8]) -> (Buckets, Buckets) {
    let mut dominant = Buckets::new();
    let mut vibrant = Buckets::new();

    for y in (0..height).step_by(SAMPLE_STRIDE) {
        for x in (0..width).step_by(SAMPLE_STRIDE) {
            let idx = (y * width + x) * 4;
            let Some(px) = rgba.get(idx..idx + 4) else {
                continue;
            };
            let (rgb, alpha) = (Rgb::new(px[0], px[1], px[2]), px[3]);

            if alpha < MIN_ALPHA {
                continue;
            }
            if rgb.r < NEAR_BLACK && rgb.g < NEAR_BLACK && rgb.b < NEAR_BLACK {
                continue;
            }

            let hsv = rgb.to_hsv();
            let key = hue_bucket(hsv.h);
            dominant.entry(key).or_default().add(rgb, hsv);

            if hsv.s >= VIBRANT_MIN_SATURATION && hsv.v >= VIBRANT_MIN_VALUE {
                vibrant.entry(key).or_default().add(rgb, hsv);
            }
        }
    }

    (dominant, vibrant)
}

fn hue_bucket(hue: f32) -> u16 {
    ((hue / HUE_BUCKET_DEGREES).round() * HUE_BUCKET_DEGREES) as u16
}

fn choose_bucket(dominant: &Buckets, vibrant: &Buckets) -> Option<Bucket> {
    let mut by_count: Vec<(u16, u32)> = dominant.iter().map(|(k, b)| (*k, b.count)).collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let top_hues: Vec<u16> = by_count
        .iter()
        .take(DOMINANT_HUE_COUNT)
        .map(|(key, _)| *key)
        .collect();

    let best_vibrant = best_by(vibrant, |key, bucket| {
        let bonus = if top_hues.contains(&key) {
            DOMINANT_HUE_BONUS
        } else {
            0.0
        };
        bucket.avg_saturation() * 2.5
            + bucket.avg_value() * 0.5
            + (bucket.count as f32 + 1.0).log10() * 0.3
            + bonus
    });

    best_vibrant.or_else(|| {
        best_by(dominant, |_, bucket| {
            bucket.avg_saturation() + bucket.avg_value() * 0.5
        })
    })
}

fn best_by(buckets: &Buckets, score: impl Fn(u16, &Bucket) -> f32) -> Option<Bucket> {
    let mut best: Option<(f32, Bucket)> = None;
    for (key, bucket) in buckets {
        let value = score(*key, bucket);
        if best.map_or(true, |(top, _)| value > top) {
            best = Some((value, *bucket));
        }
    }
    best.map(|(_, bucket)| bucket)
}
