//! RGB to HSV conversion on the detector's scale

/// Convert one RGB pixel to HSV.
///
/// Hue is in degrees [0, 360), saturation and value in [0, 255].
/// Achromatic pixels get hue 0.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    if delta == 0.0 {
        return (0.0, s, v);
    }

    let mut h = if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        60.0 * (b - r) / delta + 120.0
    } else {
        60.0 * (r - g) / delta + 240.0
    };
    if h < 0.0 {
        h += 360.0;
    }

    (h, s, v)
}
