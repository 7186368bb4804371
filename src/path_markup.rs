//! Geometry encoding for `Data` and `Clip`.
//!
//! The abbreviated syntax (`M`, `L`, `C`, `Q`, `A`, `Z`) cannot toggle fill
//! per figure or stroke per segment. Geometry that needs either is written
//! as a `PathGeometry` element instead.

use crate::format::NumberWriter;
use crate::geometry::{FillRule, PathFigure, PathGeometry, PathSegment, SegmentKind};
use crate::markup::Element;
use crate::types::Matrix;

#[derive(Debug, Clone, PartialEq)]
pub enum PathData {
    Abbreviated(String),
    Verbose(Element),
}

impl PathData {
    /// Sets `attribute` on `owner`, or adds the `<Owner.attribute>` property
    /// element for verbose data.
    pub fn apply_to(self, owner: &mut Element, attribute: &str) {
        match self {
            PathData::Abbreviated(data) => owner.set_attr(attribute, data),
            PathData::Verbose(geometry) => {
                let property = Element::new(format!("{}.{attribute}", owner.name)).with_child(geometry);
                owner.push(property);
            }
        }
    }
}

/// What the encoded geometry is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathUse {
    pub filled: bool,
    pub stroked: bool,
}

impl PathUse {
    pub const CLIP: PathUse = PathUse {
        filled: true,
        stroked: false,
    };
}

/// Encodes `geometry` drawn under `world`. `None` when nothing is left to
/// draw.
pub fn encode_path(
    geometry: &PathGeometry,
    usage: PathUse,
    world: Matrix,
    w: &mut NumberWriter<'_>,
) -> Option<PathData> {
    // Arcs only keep their shape under a uniform scale.
    let flattened;
    let geometry = if has_arcs(geometry) && !world.is_uniform_scale() {
        flattened = geometry.without_arcs();
        &flattened
    } else {
        geometry
    };

    let figures: Vec<&PathFigure> = geometry
        .figures
        .iter()
        .filter(|figure| !figure.segments.is_empty())
        .collect();
    if figures.is_empty() {
        return None;
    }
    for figure in &figures {
        w.limits().check_figure_points(figure.point_count());
    }

    let needs_verbose = figures.iter().any(|figure| {
        (usage.filled && !figure.is_filled)
            || (usage.stroked && figure.segments.iter().any(|s| !s.is_stroked))
    });
    Some(if needs_verbose {
        PathData::Verbose(verbose(&figures, geometry.fill_rule, w))
    } else {
        PathData::Abbreviated(abbreviated(&figures, geometry.fill_rule, w))
    })
}

fn has_arcs(geometry: &PathGeometry) -> bool {
    geometry
        .figures
        .iter()
        .flat_map(|f| &f.segments)
        .any(|s| matches!(s.kind, SegmentKind::Arc { .. }))
}

fn abbreviated(figures: &[&PathFigure], fill_rule: FillRule, w: &mut NumberWriter<'_>) -> String {
    let mut parts = Vec::new();
    if fill_rule == FillRule::NonZero {
        parts.push("F1".to_string());
    }
    for figure in figures {
        parts.push(format!("M{}", w.point(figure.start)));
        for segment in &figure.segments {
            parts.push(abbreviated_segment(segment, w));
        }
        if figure.is_closed {
            parts.push("Z".to_string());
        }
    }
    parts.join(" ")
}

fn abbreviated_segment(segment: &PathSegment, w: &mut NumberWriter<'_>) -> String {
    match &segment.kind {
        SegmentKind::Line(p) => format!("L{}", w.point(*p)),
        SegmentKind::PolyLine(points) => format!("L{}", w.points(points)),
        SegmentKind::Bezier(a, b, c) => format!("C{}", w.points(&[*a, *b, *c])),
        SegmentKind::PolyBezier(points) => format!("C{}", w.points(points)),
        SegmentKind::Quadratic(a, b) => format!("Q{}", w.points(&[*a, *b])),
        SegmentKind::PolyQuadratic(points) => format!("Q{}", w.points(points)),
        SegmentKind::Arc {
            end,
            size,
            rotation_deg,
            large_arc,
            sweep_positive,
        } => {
            let rx = w.num(size.width);
            let ry = w.num(size.height);
            let rotation = w.num(*rotation_deg);
            format!(
                "A{rx},{ry} {rotation} {} {} {}",
                u8::from(*large_arc),
                u8::from(*sweep_positive),
                w.point(*end)
            )
        }
    }
}

fn verbose(figures: &[&PathFigure], fill_rule: FillRule, w: &mut NumberWriter<'_>) -> Element {
    let mut geometry = Element::new("PathGeometry");
    if fill_rule == FillRule::NonZero {
        geometry.set_attr("FillRule", "NonZero");
    }
    for figure in figures {
        let mut el = Element::new("PathFigure").with_attr("StartPoint", w.point(figure.start));
        if figure.is_closed {
            el.set_attr("IsClosed", "true");
        }
        if !figure.is_filled {
            el.set_attr("IsFilled", "false");
        }
        for segment in &figure.segments {
            el.push(verbose_segment(segment, w));
        }
        geometry.push(el);
    }
    geometry
}

fn verbose_segment(segment: &PathSegment, w: &mut NumberWriter<'_>) -> Element {
    let mut el = match &segment.kind {
        SegmentKind::Line(p) => Element::new("PolyLineSegment").with_attr("Points", w.point(*p)),
        SegmentKind::PolyLine(points) => {
            Element::new("PolyLineSegment").with_attr("Points", w.points(points))
        }
        SegmentKind::Bezier(a, b, c) => {
            Element::new("PolyBezierSegment").with_attr("Points", w.points(&[*a, *b, *c]))
        }
        SegmentKind::PolyBezier(points) => {
            Element::new("PolyBezierSegment").with_attr("Points", w.points(points))
        }
        SegmentKind::Quadratic(a, b) => {
            Element::new("PolyQuadraticBezierSegment").with_attr("Points", w.points(&[*a, *b]))
        }
        SegmentKind::PolyQuadratic(points) => {
            Element::new("PolyQuadraticBezierSegment").with_attr("Points", w.points(points))
        }
        SegmentKind::Arc {
            end,
            size,
            rotation_deg,
            large_arc,
            sweep_positive,
        } => {
            let size = format!("{},{}", w.num(size.width), w.num(size.height));
            Element::new("ArcSegment")
                .with_attr("Point", w.point(*end))
                .with_attr("Size", size)
                .with_attr("RotationAngle", w.num(*rotation_deg))
                .with_attr("IsLargeArc", large_arc.to_string())
                .with_attr(
                    "SweepDirection",
                    if *sweep_positive { "Clockwise" } else { "Counterclockwise" },
                )
        }
    };
    if !segment.is_stroked {
        el.set_attr("IsStroked", "false");
    }
    el
}
