/*!
 # Color conversions

 Pure conversions between the three color representations used across the
 crate: `#RRGGBB` strings, 8-bit RGB triples and the lamp's native HSV
 (hue 0-359, saturation 0-999, value 0-999).
*/

use std::fmt;

use crate::{Error, Result};

/// Largest hue the lamp accepts
pub const HUE_MAX: u16 = 359;
/// Largest saturation the lamp accepts
pub const SAT_MAX: u16 = 999;
/// Largest value (brightness) the lamp accepts
pub const VAL_MAX: u16 = 999;

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Device-native HSV color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hsv {
    /// Hue in degrees (0-359)
    pub h: u16,
    /// Saturation (0-999)
    pub s: u16,
    /// Value (0-999)
    pub v: u16,
}

impl Hsv {
    /// Builds a color, rejecting components outside the device ranges
    pub fn new(h: u16, s: u16, v: u16) -> Result<Self> {
        if h > HUE_MAX {
            return Err(Error::ValueOutOfRange(h.into(), 0, HUE_MAX.into()));
        }
        if s > SAT_MAX {
            return Err(Error::ValueOutOfRange(s.into(), 0, SAT_MAX.into()));
        }
        if v > VAL_MAX {
            return Err(Error::ValueOutOfRange(v.into(), 0, VAL_MAX.into()));
        }
        Ok(Self { h, s, v })
    }

    /// Builds a color, clamping each component into the device range
    pub const fn clamped(h: u16, s: u16, v: u16) -> Self {
        Self {
            h: h % (HUE_MAX + 1),
            s: if s > SAT_MAX { SAT_MAX } else { s },
            v: if v > VAL_MAX { VAL_MAX } else { v },
        }
    }

    /// Scales the value channel by a brightness percentage (0-100)
    pub fn with_brightness(self, percent: u8) -> Self {
        let percent = u32::from(percent.min(100));
        let v = (u32::from(self.v) * percent + 50) / 100;
        Self {
            v: v as u16,
            ..self
        }
    }

    /// Encodes the color as the 12 character data point string (`hhhhssssvvvv`)
    pub fn to_dps(self) -> String {
        format!("{:04x}{:04x}{:04x}", self.h, self.s, self.v)
    }

    /// Decodes a 12 character data point string
    pub fn from_dps(raw: &str) -> Result<Self> {
        if raw.len() != 12 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ProtocolError(format!(
                "Color data point must be 12 hex digits, got {raw:?}"
            )));
        }

        let component = |range: std::ops::Range<usize>| {
            u16::from_str_radix(&raw[range], 16)
                .map_err(|e| Error::ProtocolError(format!("Bad color data point {raw:?}: {e}")))
        };

        let (h, s, v) = (component(0..4)?, component(4..8)?, component(8..12)?);
        Hsv::new(h, s, v).map_err(|_| {
            Error::ProtocolError(format!("Color data point {raw:?} is out of range"))
        })
    }
}

impl fmt::Display for Hsv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H:{} S:{} V:{}", self.h, self.s, self.v)
    }
}

/// Parses `#RRGGBB`
pub fn hex_to_rgb(hex: &str) -> Result<Rgb> {
    let digits = hex
        .strip_prefix('#')
        .filter(|d| d.len() == 6 && d.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| Error::InvalidFormat(format!("expected #RRGGBB, got {hex:?}")))?;

    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|e| Error::InvalidFormat(format!("{hex:?}: {e}")))
    };

    Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
}

/// Formats an RGB color as `#RRGGBB`
pub fn rgb_to_hex(rgb: Rgb) -> String {
    rgb.to_string()
}

/// Converts RGB to device-native HSV
///
/// Achromatic colors (r = g = b) get hue 0. Hue is rounded to whole
/// degrees, so converting back with [`hsv_to_rgb`] can be off by up to 2 per
/// channel for saturated colors. Greys, black, white, primaries and
/// secondaries come back exactly.
pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let r = f64::from(rgb.r) / 255.0;
    let g = f64::from(rgb.g) / 255.0;
    let b = f64::from(rgb.b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    Hsv {
        h: (hue.round() as u16) % (HUE_MAX + 1),
        s: (saturation * f64::from(SAT_MAX)).round() as u16,
        v: (max * f64::from(VAL_MAX)).round() as u16,
    }
}

/// Converts device-native HSV to RGB
pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    let hsv = Hsv::clamped(hsv.h, hsv.s, hsv.v);
    let h = f64::from(hsv.h);
    let s = f64::from(hsv.s) / f64::from(SAT_MAX);
    let v = f64::from(hsv.v) / f64::from(VAL_MAX);

    let c = v * s;
    let sector = h / 60.0;
    let x = c * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match sector as u8 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let channel = |value: f64| ((value + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb::new(channel(r), channel(g), channel(b))
}

/// `#RRGGBB` to device-native HSV
pub fn hex_to_hsv(hex: &str) -> Result<Hsv> {
    hex_to_rgb(hex).map(rgb_to_hsv)
}

/// Device-native HSV to `#RRGGBB`
pub fn hsv_to_hex(hsv: Hsv) -> String {
    rgb_to_hex(hsv_to_rgb(hsv))
}
