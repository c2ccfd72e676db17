//! CSS fragments for surfaces backed by a web view.

use super::VisualParameters;

/// Secondary tint layered under the artwork colour.
const ACCENT: &str = "59, 130, 246";

/// Inset box-shadow stack that forms the vignette.
pub fn vignette_box_shadow(p: &VisualParameters) -> String {
    let (size, blur, i) = (p.size, p.blur, p.intensity);
    let colour = p.colour;
    [
        format!(
            "inset 0 0 {size:.1}px {blur:.1}px rgba({colour}, {:.3})",
            0.4 + i * 0.6
        ),
        format!(
            "inset 0 0 {:.1}px {:.1}px rgba({colour}, {:.3})",
            size * 0.7,
            blur * 0.7,
            i * 0.8
        ),
        format!(
            "inset 0 0 {:.1}px {:.1}px rgba({ACCENT}, {:.3})",
            size * 0.5,
            blur * 0.5,
            i * 0.6
        ),
        format!(
            "inset {:.1}px 0 {:.1}px {:.1}px rgba({colour}, {:.3})",
            size * 0.4,
            blur * 1.2,
            blur * 0.3,
            p.left_intensity
        ),
        format!(
            "inset 0 {:.1}px {:.1}px {:.1}px rgba({ACCENT}, {:.3})",
            size * 0.3,
            blur * 1.2,
            blur * 0.3,
            p.bottom_intensity
        ),
    ]
    .join(", ")
}

/// Radial glow tinted by the bass frequency hue.
pub fn glow_background(p: &VisualParameters) -> String {
    format!(
        "radial-gradient(ellipse 140% 120% at 35% 70%, \
         hsla({:.1}, 80%, 60%, {:.3}) 0%, \
         hsla({:.1}, 70%, 50%, {:.3}) 30%, \
         transparent 70%)",
        p.hue,
        p.intensity * 0.35,
        p.hue + 30.0,
        p.intensity * 0.18
    )
}

/// Width and height declarations for the pulse ring.
pub fn pulse_ring(p: &VisualParameters) -> String {
    format!("width: {0:.1}px; height: {0:.1}px;", p.ring_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{colour::Rgb, render::FrameStats};

    fn params(intensity: f32) -> VisualParameters {
        VisualParameters {
            size: 370.0,
            blur: 190.0,
            intensity,
            hue: 204.0,
            ring_size: 200.0 + intensity * 600.0,
            left_intensity: intensity * 0.7,
            bottom_intensity: intensity * 0.6,
            colour: Rgb::new(230, 0, 0),
            stats: FrameStats::default(),
        }
    }

    #[test]
    fn box_shadow_uses_resolved_colour() {
        let css = vignette_box_shadow(&params(0.5));
        assert!(css.starts_with("inset 0 0 370.0px 190.0px rgba(230, 0, 0, 0.700), "));
        assert!(css.contains("inset 0 0 259.0px 133.0px rgba(230, 0, 0, 0.400)"));
        assert_eq!(css.matches("inset").count(), 5);
        assert!(css.contains(ACCENT));
    }

    #[test]
    fn glow_follows_hue() {
        let css = glow_background(&params(1.0));
        assert!(css.contains("hsla(204.0, 80%, 60%, 0.350) 0%"));
        assert!(css.contains("hsla(234.0, 70%, 50%, 0.180) 30%"));
    }

    #[test]
    fn ring_scales_with_intensity() {
        assert_eq!(pulse_ring(&params(0.5)), "width: 500.0px; height: 500.0px;");
    }
}
