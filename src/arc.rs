//! Elliptical arc to cubic Bézier conversion.
//!
//! The arc is moved into the frame where the ellipse becomes the unit circle,
//! split into at most four pieces of no more than 90 degrees, and each piece is
//! approximated with a cubic whose control points sit on the end tangents at
//! `4/3 * (1 - cos(θ/2)) / sin(θ/2)` from the end points.

use crate::types::{Matrix, Point, Vector};
use std::f64::consts::PI;

const FUZZ: f64 = 1e-6;
const FUZZ_SQUARED: f64 = FUZZ * FUZZ;

/// Result of approximating one elliptical arc segment.
#[derive(Debug, Clone, PartialEq)]
pub enum ArcApproximation {
    /// Start and end coincide; the arc contributes nothing.
    Degenerate,
    /// A radius is too small for the chord; draw a straight line to the end point.
    Line,
    /// One to four cubic pieces `[control1, control2, end]`.
    Curves(Vec<[Point; 3]>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcParams {
    pub start: Point,
    pub end: Point,
    pub radius_x: f64,
    pub radius_y: f64,
    pub rotation_deg: f64,
    pub large_arc: bool,
    /// Clockwise sweep in a y-down coordinate system.
    pub sweep_positive: bool,
}

pub fn arc_to_beziers(params: ArcParams) -> ArcApproximation {
    let ArcParams {
        start,
        end,
        radius_x,
        radius_y,
        rotation_deg,
        large_arc,
        sweep_positive,
    } = params;

    if !start.is_finite() || !end.is_finite() {
        return ArcApproximation::Degenerate;
    }

    // Origin at the chord's midpoint.
    let mut x = (end.x - start.x) / 2.0;
    let mut y = (end.y - start.y) / 2.0;
    let half_chord2 = x * x + y * y;

    let magnitude = start
        .x
        .abs()
        .max(start.y.abs())
        .max(end.x.abs())
        .max(end.y.abs())
        .max(1.0);
    if half_chord2 < FUZZ_SQUARED * magnitude * magnitude {
        return ArcApproximation::Degenerate;
    }

    let Some(mut rx) = accept_radius(half_chord2, radius_x) else {
        return ArcApproximation::Line;
    };
    let Some(mut ry) = accept_radius(half_chord2, radius_y) else {
        return ArcApproximation::Line;
    };

    // Rotate into the ellipse's axes.
    let rotation = if rotation_deg.is_finite() {
        -rotation_deg.to_radians()
    } else {
        0.0
    };
    let cos = libm::cos(rotation);
    let sin = libm::sin(rotation);
    let rotated_x = x * cos - y * sin;
    y = x * sin + y * cos;
    x = rotated_x;

    // Scale so the ellipse becomes the unit circle.
    x /= rx;
    y /= ry;

    let half_chord2 = x * x + y * y;
    let (center_x, center_y, zero_center);
    if half_chord2 > 1.0 {
        // Chord longer than the diameter: grow both radii so the chord is a diameter.
        let r = libm::sqrt(half_chord2);
        rx *= r;
        ry *= r;
        x /= r;
        y /= r;
        center_x = 0.0;
        center_y = 0.0;
        zero_center = true;
    } else {
        let r = libm::sqrt((1.0 - half_chord2) / half_chord2);
        if large_arc != sweep_positive {
            center_x = -r * y;
            center_y = r * x;
        } else {
            center_x = r * y;
            center_y = -r * x;
        }
        zero_center = false;
    }

    let mut piece_start = Point::new(-x - center_x, -y - center_y);
    let piece_last = Point::new(x - center_x, y - center_y);

    let mut to_ellipse = Matrix::new(
        cos * rx,
        -sin * rx,
        sin * ry,
        cos * ry,
        (end.x + start.x) / 2.0,
        (end.y + start.y) / 2.0,
    );
    if !zero_center {
        to_ellipse.e += to_ellipse.a * center_x + to_ellipse.c * center_y;
        to_ellipse.f += to_ellipse.b * center_x + to_ellipse.d * center_y;
    }

    let (cos_piece, sin_piece, pieces) =
        piece_angle(piece_start, piece_last, large_arc, sweep_positive);

    let mut distance = bezier_distance(cos_piece);
    if !sweep_positive {
        distance = -distance;
    }

    let mut out = Vec::with_capacity(pieces);
    let mut to_control1 = Vector::new(-distance * piece_start.y, distance * piece_start.x);
    for _ in 1..pieces {
        let piece_end = Point::new(
            piece_start.x * cos_piece - piece_start.y * sin_piece,
            piece_start.x * sin_piece + piece_start.y * cos_piece,
        );
        let to_control2 = Vector::new(-distance * piece_end.y, distance * piece_end.x);
        out.push([
            to_ellipse.apply(piece_start + to_control1),
            to_ellipse.apply(piece_end + to_control2 * -1.0),
            to_ellipse.apply(piece_end),
        ]);
        piece_start = piece_end;
        to_control1 = to_control2;
    }
    let to_control2 = Vector::new(-distance * piece_last.y, distance * piece_last.x);
    out.push([
        to_ellipse.apply(piece_start + to_control1),
        to_ellipse.apply(piece_last + to_control2 * -1.0),
        end,
    ]);

    ArcApproximation::Curves(out)
}

fn accept_radius(half_chord2: f64, radius: f64) -> Option<f64> {
    if radius.is_finite() && radius * radius > half_chord2 * FUZZ_SQUARED {
        Some(radius.abs())
    } else {
        None
    }
}

/// Cosine/sine of each piece's angle and the piece count, for two points on
/// the unit circle.
fn piece_angle(start: Point, end: Point, large_arc: bool, sweep_positive: bool) -> (f64, f64, usize) {
    let cos_arc = start.x * end.x + start.y * end.y;
    let sin_arc = start.x * end.y - start.y * end.x;

    let pieces = match (cos_arc >= 0.0, large_arc) {
        (true, false) => return (cos_arc, sin_arc, 1),
        (true, true) => 4,
        (false, true) => 3,
        (false, false) => 2,
    };

    let mut angle = libm::atan2(sin_arc, cos_arc);
    if sweep_positive {
        if angle < 0.0 {
            angle += 2.0 * PI;
        }
    } else if angle > 0.0 {
        angle -= 2.0 * PI;
    }
    angle /= pieces as f64;
    (libm::cos(angle), libm::sin(angle), pieces)
}

/// Distance of a control point from its end point along the tangent, for a
/// unit-radius arc whose angle has cosine `cos_angle`.
fn bezier_distance(cos_angle: f64) -> f64 {
    // sin^2(θ/2) and cos^2(θ/2) by the half-angle identities.
    let sin_half2 = (1.0 - cos_angle) / 2.0;
    if sin_half2 < FUZZ_SQUARED {
        return 0.0;
    }
    let cos_half = libm::sqrt((1.0 - sin_half2).max(0.0));
    let sin_half = libm::sqrt(sin_half2);
    let distance = 4.0 / 3.0 * (1.0 - cos_half) / sin_half;
    if distance.is_finite() { distance } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_cubic(p0: Point, piece: &[Point; 3], t: f64) -> Point {
        let mt = 1.0 - t;
        let a = mt * mt * mt;
        let b = 3.0 * mt * mt * t;
        let c = 3.0 * mt * t * t;
        let d = t * t * t;
        Point::new(
            a * p0.x + b * piece[0].x + c * piece[1].x + d * piece[2].x,
            a * p0.y + b * piece[0].y + c * piece[1].y + d * piece[2].y,
        )
    }

    fn params(start: Point, end: Point, rx: f64, ry: f64) -> ArcParams {
        ArcParams {
            start,
            end,
            radius_x: rx,
            radius_y: ry,
            rotation_deg: 0.0,
            large_arc: false,
            sweep_positive: true,
        }
    }

    fn samples_on_ellipse(
        start: Point,
        pieces: &[[Point; 3]],
        on_curve: impl Fn(Point) -> f64,
        tolerance: f64,
    ) {
        let mut p0 = start;
        for piece in pieces {
            for step in 1..8 {
                let p = eval_cubic(p0, piece, step as f64 / 8.0);
                let err = on_curve(p);
                assert!(err.abs() < tolerance, "sample {p:?} off the ellipse by {err}");
            }
            p0 = piece[2];
        }
    }

    #[test]
    fn half_circle_ends_exactly_and_stays_on_circle() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(10.0, 0.0);
        let ArcApproximation::Curves(pieces) = arc_to_beziers(params(start, end, 5.0, 5.0)) else {
            panic!("expected curves");
        };
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces.last().unwrap()[2], end);
        samples_on_ellipse(start, &pieces, |p| p.distance_to(Point::new(5.0, 0.0)) - 5.0, 0.01);
    }

    #[test]
    fn large_arc_uses_more_pieces_on_axis_aligned_ellipse() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(10.0, 5.0);
        let mut p = params(start, end, 10.0, 5.0);
        p.large_arc = true;
        let ArcApproximation::Curves(pieces) = arc_to_beziers(p) else {
            panic!("expected curves");
        };
        assert!(pieces.len() >= 3 && pieces.len() <= 4);
        assert_eq!(pieces.last().unwrap()[2], end);
        // Large arc with positive sweep from (0,0) to (10,5) is centered at (10,0) or (0,5);
        // the unit-ellipse residual must vanish for one of them.
        let residual = |c: Point| {
            move |q: Point| {
                let dx = (q.x - c.x) / 10.0;
                let dy = (q.y - c.y) / 5.0;
                dx * dx + dy * dy - 1.0
            }
        };
        let first = eval_cubic(start, &pieces[0], 0.5);
        let center = if residual(Point::new(10.0, 0.0))(first).abs() < 0.01 {
            Point::new(10.0, 0.0)
        } else {
            Point::new(0.0, 5.0)
        };
        samples_on_ellipse(start, &pieces, residual(center), 0.01);
    }

    #[test]
    fn rotated_arc_still_reaches_end_point() {
        let start = Point::new(3.0, 4.0);
        let end = Point::new(40.0, -12.0);
        let mut p = params(start, end, 30.0, 12.0);
        p.rotation_deg = 33.0;
        p.sweep_positive = false;
        let ArcApproximation::Curves(pieces) = arc_to_beziers(p) else {
            panic!("expected curves");
        };
        assert_eq!(pieces.last().unwrap()[2], end);
        assert!(
            pieces
                .iter()
                .flat_map(|piece| piece.iter())
                .all(|q| q.is_finite())
        );
    }

    #[test]
    fn coincident_end_points_are_degenerate() {
        let p = Point::new(12.5, -3.0);
        assert_eq!(arc_to_beziers(params(p, p, 4.0, 4.0)), ArcApproximation::Degenerate);
        let almost = Point::new(12.5 + 1e-9, -3.0);
        assert_eq!(
            arc_to_beziers(params(p, almost, 4.0, 4.0)),
            ArcApproximation::Degenerate
        );
    }

    #[test]
    fn zero_radius_becomes_line() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(10.0, 10.0);
        assert_eq!(arc_to_beziers(params(start, end, 0.0, 5.0)), ArcApproximation::Line);
        assert_eq!(arc_to_beziers(params(start, end, 5.0, 0.0)), ArcApproximation::Line);
        assert_eq!(
            arc_to_beziers(params(start, end, f64::NAN, 5.0)),
            ArcApproximation::Line
        );
    }

    #[test]
    fn undersized_radius_is_scaled_to_the_chord() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(100.0, 0.0);
        let ArcApproximation::Curves(pieces) = arc_to_beziers(params(start, end, 1.0, 1.0)) else {
            panic!("expected curves");
        };
        samples_on_ellipse(start, &pieces, |p| p.distance_to(Point::new(50.0, 0.0)) - 50.0, 0.1);
    }

    #[test]
    fn bezier_distance_is_zero_for_tiny_angles() {
        assert_eq!(bezier_distance(1.0), 0.0);
        let quarter = bezier_distance(0.0);
        assert!((quarter - 0.552_284_75).abs() < 1e-6);
    }
}
