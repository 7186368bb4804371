#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (other - self).length()
    }

    pub fn lerp(self, other: Point, t: f64) -> Point {
        Point::new(self.x + (other.x - self.x) * t, self.y + (other.y - self.y) * t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        libm::sqrt(self.x * self.x + self.y * self.y)
    }

    pub fn dot(self, other: Vector) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(self, other: Vector) -> f64 {
        self.x * other.y - self.y * other.x
    }
}

impl std::ops::Sub for Point {
    type Output = Vector;
    fn sub(self, rhs: Point) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Add<Vector> for Point {
    type Output = Point;
    fn add(self, rhs: Vector) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Mul<f64> for Vector {
    type Output = Vector;
    fn mul(self, rhs: f64) -> Vector {
        Vector::new(self.x * rhs, self.y * rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn letter() -> Self {
        // 8.5in x 11in at 96 units/in.
        Self::new(816.0, 1056.0)
    }

    pub fn a4() -> Self {
        Self::from_mm(210.0, 297.0)
    }

    pub fn from_mm(width_mm: f64, height_mm: f64) -> Self {
        Self::new(width_mm * 96.0 / 25.4, height_mm * 96.0 / 25.4)
    }

    pub fn is_valid_page(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn from_points(a: Point, b: Point) -> Self {
        let x0 = a.x.min(b.x);
        let y0 = a.y.min(b.y);
        Self::new(x0, y0, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn right(self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(self) -> f64 {
        self.y + self.height
    }

    pub fn top_left(self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn corners(self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// True when the rectangle covers a positive, finite area.
    pub fn is_renderable(self) -> bool {
        self.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn intersect(self, other: Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 < x0 || y1 < y0 || x0.is_nan() || y0.is_nan() {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn union(self, other: Rect) -> Rect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn union_point(self, p: Point) -> Rect {
        self.union(Rect::new(p.x, p.y, 0.0, 0.0))
    }

    pub fn inflate(self, dx: f64, dy: f64) -> Rect {
        Rect::new(
            self.x - dx,
            self.y - dy,
            (self.width + 2.0 * dx).max(0.0),
            (self.height + 2.0 * dy).max(0.0),
        )
    }

    pub fn contains_rect(self, other: Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn approx_eq(self, other: Rect, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

/// Union of an optional running bounds with another rectangle.
pub(crate) fn union_bounds(acc: Option<Rect>, rect: Option<Rect>) -> Option<Rect> {
    match (acc, rect) {
        (Some(a), Some(b)) => Some(a.union(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Affine transform `[a b c d e f]`; a point maps to
/// `(a*x + c*y + e, b*x + d*y + f)`, matching the markup's `m11,m12,m21,m22,dx,dy`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub const fn identity() -> Self {
        Self::IDENTITY
    }

    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotate(deg: f64) -> Self {
        let rad = deg.to_radians();
        let s = libm::sin(rad);
        let c = libm::cos(rad);
        Self::new(c, s, -s, c, 0.0, 0.0)
    }

    /// `self * other`: the result applies `other` first, then `self`.
    pub fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    /// Applies `self` first, then `next`.
    pub fn then(self, next: Self) -> Self {
        next.mul(self)
    }

    pub fn apply(self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    pub fn apply_vector(self, v: Vector) -> Vector {
        Vector::new(self.a * v.x + self.c * v.y, self.b * v.x + self.d * v.y)
    }

    pub fn determinant(self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        let e = -(a * self.e + c * self.f);
        let f = -(b * self.e + d * self.f);
        Some(Self::new(a, b, c, d, e, f))
    }

    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }

    pub fn is_finite(self) -> bool {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Finite and invertible.
    pub fn is_valid(self) -> bool {
        self.is_finite() && self.determinant() != 0.0
    }

    pub fn is_translation_only(self) -> bool {
        self.a == 1.0 && self.b == 0.0 && self.c == 0.0 && self.d == 1.0
    }

    pub fn has_rotation_or_skew(self) -> bool {
        self.b != 0.0 || self.c != 0.0
    }

    /// Lengths of the transformed unit vectors along x and y.
    pub fn scale_factors(self) -> (f64, f64) {
        (
            libm::sqrt(self.a * self.a + self.b * self.b),
            libm::sqrt(self.c * self.c + self.d * self.d),
        )
    }

    pub fn min_scale(self) -> f64 {
        let (sx, sy) = self.scale_factors();
        sx.min(sy)
    }

    pub fn is_uniform_scale(self) -> bool {
        let (sx, sy) = self.scale_factors();
        (sx - sy).abs() <= 1e-9 * sx.max(sy).max(1.0)
            && (self.a * self.c + self.b * self.d).abs() <= 1e-9
    }

    /// Axis-aligned bounds of the transformed rectangle.
    pub fn transform_rect(self, rect: Rect) -> Rect {
        let corners = rect.corners().map(|p| self.apply(p));
        let mut out = Rect::new(corners[0].x, corners[0].y, 0.0, 0.0);
        for p in &corners[1..] {
            out = out.union_point(*p);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub a: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color::argb(1.0, 0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::argb(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::argb(0.0, 0.0, 0.0, 0.0);

    pub const fn argb(a: f32, r: f32, g: f32, b: f32) -> Self {
        Self { a, r, g, b }
    }

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::argb(1.0, r, g, b)
    }

    pub fn from_argb8(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self::argb(
            a as f32 / 255.0,
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
        )
    }

    pub fn to_argb8(self) -> [u8; 4] {
        [
            unit_to_u8(self.a),
            unit_to_u8(self.r),
            unit_to_u8(self.g),
            unit_to_u8(self.b),
        ]
    }

    pub fn is_transparent(self) -> bool {
        !(self.a > 0.0)
    }

    pub fn is_opaque(self) -> bool {
        self.a >= 1.0
    }

    pub fn with_opacity(self, opacity: f32) -> Self {
        Self {
            a: self.a * opacity.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Channels outside `0..=1` need scRGB notation.
    pub fn in_srgb_gamut(self) -> bool {
        [self.a, self.r, self.g, self.b]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }

    pub fn approx_eq(self, other: Color, tolerance: f32) -> bool {
        (self.a - other.a).abs() <= tolerance
            && (self.r - other.r).abs() <= tolerance
            && (self.g - other.g).abs() <= tolerance
            && (self.b - other.b).abs() <= tolerance
    }
}

fn unit_to_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Anti-aliasing hint carried down to emitted primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeMode {
    #[default]
    Unspecified,
    Aliased,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_applies_right_operand_first() {
        let m = Matrix::translate(10.0, 0.0).mul(Matrix::scale(2.0, 2.0));
        let p = m.apply(Point::new(1.0, 1.0));
        assert_eq!(p, Point::new(12.0, 2.0));
        let n = Matrix::scale(2.0, 2.0).then(Matrix::translate(10.0, 0.0));
        assert_eq!(n, m);
    }

    #[test]
    fn invert_round_trips() {
        let m = Matrix::rotate(30.0).mul(Matrix::scale(3.0, 0.5));
        let inv = m.invert().unwrap();
        let p = inv.apply(m.apply(Point::new(7.0, -4.0)));
        assert!((p.x - 7.0).abs() < 1e-9 && (p.y + 4.0).abs() < 1e-9);
        assert!(Matrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn rect_intersection_and_renderability() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersect(b), Some(Rect::new(5.0, 5.0, 5.0, 5.0)));
        assert!(a.intersect(Rect::new(20.0, 20.0, 1.0, 1.0)).is_none());
        assert!(!Rect::new(0.0, 0.0, 0.0, 5.0).is_renderable());
        assert!(!Rect::new(0.0, f64::NAN, 1.0, 1.0).is_renderable());
    }

    #[test]
    fn color_quantizes_to_bytes() {
        let c = Color::rgb(1.0, 0.0, 0.0);
        assert_eq!(c.to_argb8(), [255, 255, 0, 0]);
        assert!(Color::TRANSPARENT.is_transparent());
        assert!(!Color::argb(1.5, 0.0, 0.0, 0.0).in_srgb_gamut());
    }
}
