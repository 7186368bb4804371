use crate::limits::LimitTracker;
use crate::types::{Color, Matrix, Point, Rect};

/// Smallest magnitude written as-is; anything closer to zero becomes 0.
pub const MIN_MAGNITUDE: f64 = 2e-38;
/// Largest magnitude the consumer can parse.
pub const MAX_MAGNITUDE: f64 = 1e38;

// Scale at which fixed decimals stop being enough.
const ROUND_TRIP_SCALE: f64 = 1000.0;
const MIN_DIGITS: i32 = 1;
const MAX_DIGITS: i32 = 5;

/// Brings `value` into the representable range. The flag is set when the
/// value had to be clamped (too large or not finite).
pub fn clamp_range(value: f64) -> (f64, bool) {
    if value.is_nan() {
        return (0.0, true);
    }
    let magnitude = value.abs();
    if magnitude > MAX_MAGNITUDE {
        return (MAX_MAGNITUDE.copysign(value), true);
    }
    if magnitude < MIN_MAGNITUDE {
        return (0.0, false);
    }
    (value, false)
}

/// Coordinate format for one nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    digits: Option<usize>,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self::for_scale(1.0)
    }
}

impl NumberFormat {
    pub const ROUND_TRIP: NumberFormat = NumberFormat { digits: None };

    /// Enough fractional digits that one unit of the last digit stays below
    /// a hundredth of a device unit at `scale`.
    pub fn for_scale(scale: f64) -> Self {
        if scale >= ROUND_TRIP_SCALE {
            return Self::ROUND_TRIP;
        }
        if !(scale > 0.0) {
            return Self { digits: Some(2) };
        }
        let digits = (scale.log10().ceil() as i32 + 2).clamp(MIN_DIGITS, MAX_DIGITS);
        Self {
            digits: Some(digits as usize),
        }
    }

    /// Fractional digits, or `None` for shortest round-trip output.
    pub fn digits(self) -> Option<usize> {
        self.digits
    }

    /// Formats an in-range value. Callers clamp with [`clamp_range`] first.
    pub fn number(self, value: f64) -> String {
        let text = match self.digits {
            None => format!("{value}"),
            Some(digits) => trim_fraction(format!("{value:.digits$}")),
        };
        if text == "-0" { "0".to_string() } else { text }
    }
}

/// Writes numbers at one precision, reporting clamped values to the page's
/// limit tracker.
pub struct NumberWriter<'t> {
    format: NumberFormat,
    limits: &'t mut LimitTracker,
}

impl<'t> NumberWriter<'t> {
    pub fn new(format: NumberFormat, limits: &'t mut LimitTracker) -> Self {
        Self { format, limits }
    }

    pub fn format(&self) -> NumberFormat {
        self.format
    }

    pub fn limits(&mut self) -> &mut LimitTracker {
        self.limits
    }

    pub fn num(&mut self, value: f64) -> String {
        self.num_with(self.format, value)
    }

    fn num_with(&mut self, format: NumberFormat, value: f64) -> String {
        let (value, clamped) = clamp_range(value);
        if clamped {
            self.limits.flag_float_range();
        }
        format.number(value)
    }

    pub fn point(&mut self, p: Point) -> String {
        let x = self.num(p.x);
        let y = self.num(p.y);
        format!("{x},{y}")
    }

    pub fn points(&mut self, points: &[Point]) -> String {
        let parts: Vec<String> = points.iter().map(|p| self.point(*p)).collect();
        parts.join(" ")
    }

    pub fn rect(&mut self, r: Rect) -> String {
        let parts = [r.x, r.y, r.width, r.height].map(|v| self.num(v));
        parts.join(",")
    }

    /// `m11,m12,m21,m22,dx,dy`. The linear part is written at full
    /// precision; offsets use the writer's format.
    pub fn matrix(&mut self, m: Matrix) -> String {
        let linear = [m.a, m.b, m.c, m.d].map(|v| self.num_with(NumberFormat::ROUND_TRIP, v));
        let dx = self.num(m.e);
        let dy = self.num(m.f);
        format!("{},{dx},{dy}", linear.join(","))
    }
}

fn trim_fraction(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// `#AARRGGBB`, or `sc#A,R,G,B` for colors outside the sRGB gamut.
pub fn color(color: Color) -> String {
    if color.in_srgb_gamut() {
        let [a, r, g, b] = color.to_argb8();
        return format!("#{a:02X}{r:02X}{g:02X}{b:02X}");
    }
    let channel = |v: f32| {
        let (v, _) = clamp_range(v as f64);
        NumberFormat::ROUND_TRIP.number(v as f32 as f64)
    };
    format!(
        "sc#{},{},{},{}",
        channel(color.a.clamp(0.0, 1.0)),
        channel(color.r),
        channel(color.g),
        channel(color.b)
    )
}
