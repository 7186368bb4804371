use crate::arc::{ArcApproximation, ArcParams, arc_to_beziers};
use crate::error::{Result, XpsError};
use crate::types::{Matrix, Point, Rect, Size, union_bounds};

// Control-point distance of a quarter circle.
const KAPPA: f64 = 0.552_284_749_830_793_4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    EvenOdd,
    NonZero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    Line(Point),
    PolyLine(Vec<Point>),
    Bezier(Point, Point, Point),
    /// Flat list of points, three per curve.
    PolyBezier(Vec<Point>),
    Quadratic(Point, Point),
    /// Flat list of points, two per curve.
    PolyQuadratic(Vec<Point>),
    Arc {
        end: Point,
        size: Size,
        rotation_deg: f64,
        large_arc: bool,
        sweep_positive: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub kind: SegmentKind,
    pub is_stroked: bool,
}

impl PathSegment {
    pub fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            is_stroked: true,
        }
    }

    pub fn unstroked(kind: SegmentKind) -> Self {
        Self {
            kind,
            is_stroked: false,
        }
    }

    pub fn points(&self) -> Vec<Point> {
        match &self.kind {
            SegmentKind::Line(p) => vec![*p],
            SegmentKind::Bezier(a, b, c) => vec![*a, *b, *c],
            SegmentKind::Quadratic(a, b) => vec![*a, *b],
            SegmentKind::PolyLine(points)
            | SegmentKind::PolyBezier(points)
            | SegmentKind::PolyQuadratic(points) => points.clone(),
            SegmentKind::Arc { end, .. } => vec![*end],
        }
    }

    pub fn point_count(&self) -> usize {
        match &self.kind {
            SegmentKind::Line(_) | SegmentKind::Arc { .. } => 1,
            SegmentKind::Bezier(..) => 3,
            SegmentKind::Quadratic(..) => 2,
            SegmentKind::PolyLine(points)
            | SegmentKind::PolyBezier(points)
            | SegmentKind::PolyQuadratic(points) => points.len(),
        }
    }

    pub fn end_point(&self) -> Option<Point> {
        match &self.kind {
            SegmentKind::Line(p) => Some(*p),
            SegmentKind::Bezier(_, _, p) => Some(*p),
            SegmentKind::Quadratic(_, p) => Some(*p),
            SegmentKind::Arc { end, .. } => Some(*end),
            SegmentKind::PolyLine(points)
            | SegmentKind::PolyBezier(points)
            | SegmentKind::PolyQuadratic(points) => points.last().copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathFigure {
    pub start: Point,
    pub segments: Vec<PathSegment>,
    pub is_closed: bool,
    pub is_filled: bool,
}

impl PathFigure {
    pub fn new(start: Point) -> Self {
        Self {
            start,
            segments: Vec::new(),
            is_closed: false,
            is_filled: true,
        }
    }

    pub fn point_count(&self) -> usize {
        1 + self.segments.iter().map(PathSegment::point_count).sum::<usize>()
    }

    /// Arcs replaced by cubic pieces or lines.
    pub fn without_arcs(&self) -> PathFigure {
        let mut out = PathFigure {
            start: self.start,
            segments: Vec::with_capacity(self.segments.len()),
            is_closed: self.is_closed,
            is_filled: self.is_filled,
        };
        let mut current = self.start;
        for segment in &self.segments {
            if let SegmentKind::Arc {
                end,
                size,
                rotation_deg,
                large_arc,
                sweep_positive,
            } = segment.kind
            {
                let approximation = arc_to_beziers(ArcParams {
                    start: current,
                    end,
                    radius_x: size.width,
                    radius_y: size.height,
                    rotation_deg,
                    large_arc,
                    sweep_positive,
                });
                match approximation {
                    ArcApproximation::Degenerate => {}
                    ArcApproximation::Line => out.segments.push(PathSegment {
                        kind: SegmentKind::Line(end),
                        is_stroked: segment.is_stroked,
                    }),
                    ArcApproximation::Curves(pieces) => {
                        let points = pieces.iter().flat_map(|piece| piece.iter().copied()).collect();
                        out.segments.push(PathSegment {
                            kind: SegmentKind::PolyBezier(points),
                            is_stroked: segment.is_stroked,
                        });
                    }
                }
                current = end;
                continue;
            }
            if let Some(end) = segment.end_point() {
                current = end;
            }
            out.segments.push(segment.clone());
        }
        out
    }

    fn transformed(&self, m: Matrix) -> PathFigure {
        let map = |p: &Point| m.apply(*p);
        let figure = if self.segments.iter().any(|s| matches!(s.kind, SegmentKind::Arc { .. })) {
            self.without_arcs()
        } else {
            self.clone()
        };
        PathFigure {
            start: m.apply(figure.start),
            segments: figure
                .segments
                .iter()
                .map(|segment| PathSegment {
                    kind: match &segment.kind {
                        SegmentKind::Line(p) => SegmentKind::Line(m.apply(*p)),
                        SegmentKind::Bezier(a, b, c) => {
                            SegmentKind::Bezier(m.apply(*a), m.apply(*b), m.apply(*c))
                        }
                        SegmentKind::Quadratic(a, b) => {
                            SegmentKind::Quadratic(m.apply(*a), m.apply(*b))
                        }
                        SegmentKind::PolyLine(points) => {
                            SegmentKind::PolyLine(points.iter().map(map).collect())
                        }
                        SegmentKind::PolyBezier(points) => {
                            SegmentKind::PolyBezier(points.iter().map(map).collect())
                        }
                        SegmentKind::PolyQuadratic(points) => {
                            SegmentKind::PolyQuadratic(points.iter().map(map).collect())
                        }
                        // Only reachable for arcs `without_arcs` kept; none remain.
                        SegmentKind::Arc { .. } => segment.kind.clone(),
                    },
                    is_stroked: segment.is_stroked,
                })
                .collect(),
            is_closed: figure.is_closed,
            is_filled: figure.is_filled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathGeometry {
    pub figures: Vec<PathFigure>,
    pub fill_rule: FillRule,
}

impl PathGeometry {
    pub fn new(figures: Vec<PathFigure>, fill_rule: FillRule) -> Self {
        Self { figures, fill_rule }
    }

    pub fn is_empty(&self) -> bool {
        self.figures.iter().all(|f| f.segments.is_empty())
    }

    pub fn point_count(&self) -> usize {
        self.figures.iter().map(PathFigure::point_count).sum()
    }

    pub fn transformed(&self, m: Matrix) -> PathGeometry {
        if m.is_identity() {
            return self.clone();
        }
        PathGeometry {
            figures: self.figures.iter().map(|f| f.transformed(m)).collect(),
            fill_rule: self.fill_rule,
        }
    }

    pub fn without_arcs(&self) -> PathGeometry {
        PathGeometry {
            figures: self.figures.iter().map(PathFigure::without_arcs).collect(),
            fill_rule: self.fill_rule,
        }
    }

    /// Bounds of the control polygon; contains the curve.
    pub fn bounds(&self) -> Option<Rect> {
        let mut out: Option<Rect> = None;
        for figure in self.without_arcs().figures {
            if figure.segments.is_empty() {
                continue;
            }
            let mut rect = Rect::new(figure.start.x, figure.start.y, 0.0, 0.0);
            for segment in &figure.segments {
                for p in segment.points() {
                    rect = rect.union_point(p);
                }
            }
            out = union_bounds(out, Some(rect));
        }
        out
    }

    /// Parses the abbreviated path syntax (`F1 M 0,0 L 10,0 A ... Z`).
    pub fn parse(data: &str) -> Result<PathGeometry> {
        PathParser::new(data).parse()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Rectangle {
        rect: Rect,
        radius_x: f64,
        radius_y: f64,
    },
    Ellipse {
        center: Point,
        radius_x: f64,
        radius_y: f64,
    },
    Line {
        start: Point,
        end: Point,
    },
    Path(PathGeometry),
    Group {
        children: Vec<Geometry>,
        fill_rule: FillRule,
    },
    Transformed(Box<Geometry>, Matrix),
}

impl Geometry {
    pub fn rect(rect: Rect) -> Self {
        Geometry::Rectangle {
            rect,
            radius_x: 0.0,
            radius_y: 0.0,
        }
    }

    pub fn with_transform(self, m: Matrix) -> Self {
        if m.is_identity() {
            self
        } else {
            Geometry::Transformed(Box::new(self), m)
        }
    }

    /// Resolves every shape kind to explicit figures.
    pub fn to_path(&self) -> PathGeometry {
        match self {
            Geometry::Rectangle {
                rect,
                radius_x,
                radius_y,
            } => rectangle_path(*rect, *radius_x, *radius_y),
            Geometry::Ellipse {
                center,
                radius_x,
                radius_y,
            } => ellipse_path(*center, *radius_x, *radius_y),
            Geometry::Line { start, end } => {
                let mut figure = PathFigure::new(*start);
                figure.is_filled = false;
                figure.segments.push(PathSegment::new(SegmentKind::Line(*end)));
                PathGeometry::new(vec![figure], FillRule::EvenOdd)
            }
            Geometry::Path(path) => path.clone(),
            Geometry::Group {
                children,
                fill_rule,
            } => PathGeometry {
                figures: children
                    .iter()
                    .flat_map(|child| child.to_path().figures)
                    .collect(),
                fill_rule: *fill_rule,
            },
            Geometry::Transformed(inner, m) => inner.to_path().transformed(*m),
        }
    }

    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Geometry::Rectangle { rect, .. } => rect.is_finite().then_some(*rect),
            Geometry::Ellipse {
                center,
                radius_x,
                radius_y,
            } => Some(Rect::new(
                center.x - radius_x.abs(),
                center.y - radius_y.abs(),
                2.0 * radius_x.abs(),
                2.0 * radius_y.abs(),
            )),
            Geometry::Line { start, end } => Some(Rect::from_points(*start, *end)),
            Geometry::Transformed(inner, m) => {
                if let Geometry::Rectangle { rect, .. } = inner.as_ref() {
                    return Some(m.transform_rect(*rect));
                }
                self.to_path().bounds()
            }
            _ => self.to_path().bounds(),
        }
    }

    /// Bounds including a stroke of the given thickness.
    pub fn stroke_bounds(&self, thickness: f64, miter_limit: Option<f64>) -> Option<Rect> {
        let bounds = self.bounds()?;
        let half = thickness.abs() / 2.0;
        let grow = half * miter_limit.map(|m| m.max(1.0)).unwrap_or(1.0);
        Some(bounds.inflate(grow, grow))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::Rectangle { rect, .. } => !rect.is_renderable(),
            Geometry::Ellipse {
                radius_x, radius_y, ..
            } => !(radius_x.abs() > 0.0 && radius_y.abs() > 0.0),
            Geometry::Line { start, end } => start == end,
            Geometry::Path(path) => path.is_empty(),
            Geometry::Group { children, .. } => children.iter().all(Geometry::is_empty),
            Geometry::Transformed(inner, m) => !m.is_valid() || inner.is_empty(),
        }
    }

    /// The plain rectangle this geometry describes, if it is one.
    pub fn as_axis_aligned_rect(&self) -> Option<Rect> {
        match self {
            Geometry::Rectangle {
                rect,
                radius_x,
                radius_y,
            } if *radius_x == 0.0 || *radius_y == 0.0 => Some(*rect),
            Geometry::Transformed(inner, m) if !m.has_rotation_or_skew() => {
                inner.as_axis_aligned_rect().map(|r| m.transform_rect(r))
            }
            _ => None,
        }
    }
}

fn rectangle_path(rect: Rect, radius_x: f64, radius_y: f64) -> PathGeometry {
    let rx = radius_x.abs().min(rect.width / 2.0);
    let ry = radius_y.abs().min(rect.height / 2.0);
    let mut figure = PathFigure::new(Point::new(rect.x + rx, rect.y));
    figure.is_closed = true;
    if rx > 0.0 && ry > 0.0 {
        let arc = |end: Point| {
            PathSegment::new(SegmentKind::Arc {
                end,
                size: Size::new(rx, ry),
                rotation_deg: 0.0,
                large_arc: false,
                sweep_positive: true,
            })
        };
        let (l, t, r, b) = (rect.x, rect.y, rect.right(), rect.bottom());
        figure.segments = vec![
            PathSegment::new(SegmentKind::Line(Point::new(r - rx, t))),
            arc(Point::new(r, t + ry)),
            PathSegment::new(SegmentKind::Line(Point::new(r, b - ry))),
            arc(Point::new(r - rx, b)),
            PathSegment::new(SegmentKind::Line(Point::new(l + rx, b))),
            arc(Point::new(l, b - ry)),
            PathSegment::new(SegmentKind::Line(Point::new(l, t + ry))),
            arc(Point::new(l + rx, t)),
        ];
    } else {
        figure.segments.push(PathSegment::new(SegmentKind::PolyLine(vec![
            Point::new(rect.right(), rect.y),
            Point::new(rect.right(), rect.bottom()),
            Point::new(rect.x, rect.bottom()),
        ])));
    }
    PathGeometry::new(vec![figure], FillRule::EvenOdd)
}

fn ellipse_path(center: Point, radius_x: f64, radius_y: f64) -> PathGeometry {
    let rx = radius_x.abs();
    let ry = radius_y.abs();
    let kx = rx * KAPPA;
    let ky = ry * KAPPA;
    let (cx, cy) = (center.x, center.y);
    let mut figure = PathFigure::new(Point::new(cx + rx, cy));
    figure.is_closed = true;
    figure.segments.push(PathSegment::new(SegmentKind::PolyBezier(vec![
        Point::new(cx + rx, cy + ky),
        Point::new(cx + kx, cy + ry),
        Point::new(cx, cy + ry),
        Point::new(cx - kx, cy + ry),
        Point::new(cx - rx, cy + ky),
        Point::new(cx - rx, cy),
        Point::new(cx - rx, cy - ky),
        Point::new(cx - kx, cy - ry),
        Point::new(cx, cy - ry),
        Point::new(cx + kx, cy - ry),
        Point::new(cx + rx, cy - ky),
        Point::new(cx + rx, cy),
    ])));
    PathGeometry::new(vec![figure], FillRule::EvenOdd)
}

struct PathParser<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn parse(mut self) -> Result<PathGeometry> {
        let mut geometry = PathGeometry::default();
        let mut figure: Option<PathFigure> = None;
        let mut current = Point::ORIGIN;
        let mut figure_start = Point::ORIGIN;
        let mut last_cubic_ctrl: Option<Point> = None;
        let mut last_quad_ctrl: Option<Point> = None;
        let mut command = ' ';

        self.skip_ws();
        if self.peek() == Some(b'F') {
            self.i += 1;
            geometry.fill_rule = match self.next_number() {
                Some(v) if v == 1.0 => FillRule::NonZero,
                Some(v) if v == 0.0 => FillRule::EvenOdd,
                _ => return Err(self.error("fill rule must be F0 or F1")),
            };
        }

        loop {
            self.skip_ws();
            let Some(b) = self.peek() else {
                break;
            };
            if b.is_ascii_alphabetic() {
                command = b as char;
                self.i += 1;
            } else if command == ' ' || command == 'Z' || command == 'z' {
                return Err(self.error("number without a command"));
            }
            let relative = command.is_ascii_lowercase();
            let base = if relative { current } else { Point::ORIGIN };
            let offset = |p: (f64, f64)| Point::new(base.x + p.0, base.y + p.1);

            match command.to_ascii_uppercase() {
                'M' => {
                    let p = offset(self.pair()?);
                    if let Some(done) = figure.take() {
                        geometry.figures.push(done);
                    }
                    figure = Some(PathFigure::new(p));
                    current = p;
                    figure_start = p;
                    // Subsequent pairs are implicit line-tos.
                    command = if relative { 'l' } else { 'L' };
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                    continue;
                }
                'L' => {
                    let p = offset(self.pair()?);
                    self.push(&mut figure, current, SegmentKind::Line(p));
                    current = p;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                'H' => {
                    let x = self.number()?;
                    let p = Point::new(if relative { current.x + x } else { x }, current.y);
                    self.push(&mut figure, current, SegmentKind::Line(p));
                    current = p;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                'V' => {
                    let y = self.number()?;
                    let p = Point::new(current.x, if relative { current.y + y } else { y });
                    self.push(&mut figure, current, SegmentKind::Line(p));
                    current = p;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                'C' => {
                    let c1 = offset(self.pair()?);
                    let c2 = offset(self.pair()?);
                    let p = offset(self.pair()?);
                    self.push(&mut figure, current, SegmentKind::Bezier(c1, c2, p));
                    current = p;
                    last_cubic_ctrl = Some(c2);
                    last_quad_ctrl = None;
                }
                'S' => {
                    let c1 = reflect(last_cubic_ctrl, current);
                    let c2 = offset(self.pair()?);
                    let p = offset(self.pair()?);
                    self.push(&mut figure, current, SegmentKind::Bezier(c1, c2, p));
                    current = p;
                    last_cubic_ctrl = Some(c2);
                    last_quad_ctrl = None;
                }
                'Q' => {
                    let c = offset(self.pair()?);
                    let p = offset(self.pair()?);
                    self.push(&mut figure, current, SegmentKind::Quadratic(c, p));
                    current = p;
                    last_quad_ctrl = Some(c);
                    last_cubic_ctrl = None;
                }
                'T' => {
                    let c = reflect(last_quad_ctrl, current);
                    let p = offset(self.pair()?);
                    self.push(&mut figure, current, SegmentKind::Quadratic(c, p));
                    current = p;
                    last_quad_ctrl = Some(c);
                    last_cubic_ctrl = None;
                }
                'A' => {
                    let (rx, ry) = self.pair()?;
                    let rotation_deg = self.number()?;
                    let large_arc = self.flag()?;
                    let sweep_positive = self.flag()?;
                    let p = offset(self.pair()?);
                    self.push(
                        &mut figure,
                        current,
                        SegmentKind::Arc {
                            end: p,
                            size: Size::new(rx, ry),
                            rotation_deg,
                            large_arc,
                            sweep_positive,
                        },
                    );
                    current = p;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                'Z' => {
                    if let Some(mut done) = figure.take() {
                        done.is_closed = true;
                        geometry.figures.push(done);
                    }
                    current = figure_start;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                other => return Err(self.error(&format!("unknown path command '{other}'"))),
            }
        }

        if let Some(done) = figure.take() {
            geometry.figures.push(done);
        }
        Ok(geometry)
    }

    fn push(&self, figure: &mut Option<PathFigure>, current: Point, kind: SegmentKind) {
        figure
            .get_or_insert_with(|| PathFigure::new(current))
            .segments
            .push(PathSegment::new(kind));
    }

    fn error(&self, message: &str) -> XpsError {
        XpsError::InvalidInput(format!("path data at byte {}: {message}", self.i))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\n' || b == b'\r' || b == b'\t' || b == b',' {
                self.i += 1;
            } else {
                break;
            }
        }
    }

    fn number(&mut self) -> Result<f64> {
        self.next_number()
            .ok_or_else(|| self.error("expected a number"))
    }

    fn pair(&mut self) -> Result<(f64, f64)> {
        let x = self.number()?;
        let y = self.number()?;
        Ok((x, y))
    }

    fn flag(&mut self) -> Result<bool> {
        self.skip_ws();
        match self.peek() {
            Some(b'0') => {
                self.i += 1;
                Ok(false)
            }
            Some(b'1') => {
                self.i += 1;
                Ok(true)
            }
            _ => Err(self.error("expected an arc flag")),
        }
    }

    fn next_number(&mut self) -> Option<f64> {
        self.skip_ws();
        let start = self.i;
        let mut has = false;

        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.i += 1;
        }
        has |= self.digits();
        if self.peek() == Some(b'.') {
            self.i += 1;
            has |= self.digits();
        }
        if has && matches!(self.peek(), Some(b'e' | b'E')) {
            self.i += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.i += 1;
            }
            self.digits();
        }

        if !has {
            self.i = start;
            return None;
        }
        let s = std::str::from_utf8(&self.bytes[start..self.i]).ok()?;
        s.parse::<f64>().ok()
    }

    fn digits(&mut self) -> bool {
        let start = self.i;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.i += 1;
        }
        self.i > start
    }
}

fn reflect(control: Option<Point>, current: Point) -> Point {
    match control {
        Some(c) => Point::new(2.0 * current.x - c.x, 2.0 * current.y - c.y),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_closed_path() {
        let path = PathGeometry::parse("M 0,0 L 10,0 L 10,10 Z").unwrap();
        assert_eq!(path.figures.len(), 1);
        let figure = &path.figures[0];
        assert!(figure.is_closed);
        assert_eq!(figure.segments.len(), 2);
        assert_eq!(path.point_count(), 3);
    }

    #[test]
    fn parses_fill_rule_relative_and_arcs() {
        let path = PathGeometry::parse("F1 m 5 5 h 10 v 10 a 5 5 0 0 1 -10 0 q 0 -5 5 -5 t 5 0").unwrap();
        assert_eq!(path.fill_rule, FillRule::NonZero);
        let figure = &path.figures[0];
        assert_eq!(figure.start, Point::new(5.0, 5.0));
        assert_eq!(figure.segments[0].kind, SegmentKind::Line(Point::new(15.0, 5.0)));
        assert!(matches!(
            figure.segments[2].kind,
            SegmentKind::Arc { end, .. } if end == Point::new(5.0, 15.0)
        ));
        assert!(matches!(figure.segments[3].kind, SegmentKind::Quadratic(c, _) if c == Point::new(5.0, 10.0)));
        // The smooth quadratic reflects the previous control point.
        assert!(matches!(figure.segments[4].kind, SegmentKind::Quadratic(c, _) if c == Point::new(15.0, 10.0)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(PathGeometry::parse("M 0 0 X 1 1").is_err());
        assert!(PathGeometry::parse("10 10").is_err());
        assert!(PathGeometry::parse("F2 M 0 0").is_err());
    }

    #[test]
    fn rectangle_bounds_and_path_agree() {
        let g = Geometry::rect(Rect::new(1.0, 2.0, 30.0, 40.0));
        assert_eq!(g.bounds(), Some(Rect::new(1.0, 2.0, 30.0, 40.0)));
        assert_eq!(g.to_path().bounds(), g.bounds());
    }

    #[test]
    fn transformed_geometry_drops_arcs() {
        let g = Geometry::Rectangle {
            rect: Rect::new(0.0, 0.0, 20.0, 20.0),
            radius_x: 4.0,
            radius_y: 4.0,
        }
        .with_transform(Matrix::rotate(45.0));
        let path = g.to_path();
        assert!(
            path.figures[0]
                .segments
                .iter()
                .all(|s| !matches!(s.kind, SegmentKind::Arc { .. }))
        );
    }

    #[test]
    fn emptiness() {
        assert!(Geometry::rect(Rect::new(0.0, 0.0, 0.0, 10.0)).is_empty());
        assert!(Geometry::Path(PathGeometry::default()).is_empty());
        assert!(
            Geometry::rect(Rect::new(0.0, 0.0, 5.0, 5.0))
                .with_transform(Matrix::scale(0.0, 1.0))
                .is_empty()
        );
    }

    #[test]
    fn stroke_bounds_grow_by_half_thickness() {
        let g = Geometry::Line {
            start: Point::new(0.0, 0.0),
            end: Point::new(10.0, 0.0),
        };
        let b = g.stroke_bounds(4.0, None).unwrap();
        assert_eq!(b, Rect::new(-2.0, -2.0, 14.0, 4.0));
    }
}
