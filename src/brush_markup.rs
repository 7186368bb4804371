//! Brush elements and the page's resource dictionary.

use crate::SerializationTarget;
use crate::brush::{
    ColorInterpolation, Gradient, GradientStop, LinearGradientBrush, RadialGradientBrush,
    SpreadMethod, TileMode, TileParams,
};
use crate::error::Result;
use crate::format::{self, NumberWriter};
use crate::limits::LimitTracker;
use crate::markup::Element;
use crate::types::Matrix;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Stops ordered by offset. Equal offsets keep their input order and NaN
/// offsets go last.
pub fn sort_gradient_stops(stops: &[GradientStop]) -> Vec<GradientStop> {
    let mut sorted = stops.to_vec();
    sorted.sort_by(|a, b| match (a.offset.is_nan(), b.offset.is_nan()) {
        (false, false) => a.offset.partial_cmp(&b.offset).unwrap_or(Ordering::Equal),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    });
    sorted
}

pub fn linear_gradient_element(brush: &LinearGradientBrush, w: &mut NumberWriter<'_>) -> Element {
    let el = Element::new("LinearGradientBrush")
        .with_attr("MappingMode", "Absolute")
        .with_attr("StartPoint", w.point(brush.start))
        .with_attr("EndPoint", w.point(brush.end));
    gradient_body(el, &brush.gradient, w)
}

pub fn radial_gradient_element(brush: &RadialGradientBrush, w: &mut NumberWriter<'_>) -> Element {
    let el = Element::new("RadialGradientBrush")
        .with_attr("MappingMode", "Absolute")
        .with_attr("Center", w.point(brush.center))
        .with_attr("GradientOrigin", w.point(brush.origin))
        .with_attr("RadiusX", w.num(brush.radius_x))
        .with_attr("RadiusY", w.num(brush.radius_y));
    gradient_body(el, &brush.gradient, w)
}

fn gradient_body(mut el: Element, gradient: &Gradient, w: &mut NumberWriter<'_>) -> Element {
    match gradient.spread {
        SpreadMethod::Pad => {}
        SpreadMethod::Reflect => el.set_attr("SpreadMethod", "Reflect"),
        SpreadMethod::Repeat => el.set_attr("SpreadMethod", "Repeat"),
    }
    if gradient.interpolation == ColorInterpolation::ScRgb {
        el.set_attr("ColorInterpolationMode", "ScRgbLinearInterpolation");
    }
    common_attributes(&mut el, gradient.opacity, gradient.transform, w);

    let sorted = sort_gradient_stops(&gradient.stops);
    let written = sorted.iter().filter(|s| !s.offset.is_nan()).count();
    if written < sorted.len() {
        log::debug!("{} gradient stops without an offset dropped", sorted.len() - written);
    }
    w.limits().check_gradient_stops(written);
    let mut stops = Element::new(format!("{}.GradientStops", el.name));
    for stop in sorted.into_iter().filter(|s| !s.offset.is_nan()) {
        stops.push(
            Element::new("GradientStop")
                .with_attr("Color", format::color(stop.color))
                .with_attr("Offset", w.num(stop.offset)),
        );
    }
    el.push(stops);
    el
}

fn common_attributes(
    el: &mut Element,
    opacity: f64,
    transform: Option<Matrix>,
    w: &mut NumberWriter<'_>,
) {
    if opacity < 1.0 {
        el.set_attr("Opacity", w.num(opacity.max(0.0)));
    }
    if let Some(m) = transform.filter(|m| !m.is_identity()) {
        el.set_attr("Transform", w.matrix(m));
    }
}

/// `ImageBrush` over an already written image part.
pub fn image_brush_element(image_source: String, tile: &TileParams, w: &mut NumberWriter<'_>) -> Element {
    let el = Element::new("ImageBrush").with_attr("ImageSource", image_source);
    tile_body(el, tile, w)
}

/// `VisualBrush` painting `canvas`.
pub fn visual_brush_element(canvas: Element, tile: &TileParams, w: &mut NumberWriter<'_>) -> Element {
    let el = tile_body(Element::new("VisualBrush"), tile, w);
    el.with_child(Element::new("VisualBrush.Visual").with_child(canvas))
}

fn tile_body(mut el: Element, tile: &TileParams, w: &mut NumberWriter<'_>) -> Element {
    if let Some(viewbox) = tile.viewbox {
        el.set_attr("Viewbox", w.rect(viewbox));
        el.set_attr("ViewboxUnits", "Absolute");
    }
    el.set_attr("Viewport", w.rect(tile.viewport));
    el.set_attr("ViewportUnits", "Absolute");
    let mode = match tile.tile_mode {
        TileMode::None => None,
        TileMode::Tile => Some("Tile"),
        TileMode::FlipX => Some("FlipX"),
        TileMode::FlipY => Some("FlipY"),
        TileMode::FlipXY => Some("FlipXY"),
    };
    if let Some(mode) = mode {
        el.set_attr("TileMode", mode);
    }
    common_attributes(&mut el, tile.opacity, tile.transform, w);
    el
}

/// Brushes shared through the page's `ResourceDictionary`. Identical markup
/// is stored once; keys are `b0`, `b1`, ... in first-seen order.
#[derive(Debug)]
pub struct BrushDictionary {
    target: SerializationTarget,
    entries: Vec<Element>,
    keys: HashMap<String, usize>,
}

impl BrushDictionary {
    pub fn new(target: SerializationTarget) -> Self {
        Self {
            target,
            entries: Vec::new(),
            keys: HashMap::new(),
        }
    }

    /// Returns the reference for `brush`, storing it on first sight.
    pub fn intern(&mut self, brush: Element, limits: &mut LimitTracker) -> Result<String> {
        let canonical = brush.to_xml()?;
        let index = match self.keys.get(&canonical) {
            Some(&index) => index,
            None => {
                let index = self.entries.len();
                self.entries.push(brush.with_attr("x:Key", key(index)));
                self.keys.insert(canonical, index);
                limits.count_resource();
                index
            }
        };
        Ok(self.reference(index))
    }

    fn reference(&self, index: usize) -> String {
        let kind = match self.target {
            SerializationTarget::Package => "StaticResource",
            SerializationTarget::LooseFiles => "DynamicResource",
        };
        format!("{{{kind} {}}}", key(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `ResourceDictionary` element, or `None` when nothing was interned.
    pub fn into_element(self) -> Option<Element> {
        if self.entries.is_empty() {
            return None;
        }
        let mut dictionary = Element::new("ResourceDictionary");
        for entry in self.entries {
            dictionary.push(entry);
        }
        Some(dictionary)
    }
}

fn key(index: usize) -> String {
    format!("b{index}")
}
