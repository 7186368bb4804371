use crate::brush::{Brush, ImageSource, Pen};
use crate::error::{Result, XpsError};
use crate::font::FontFace;
use crate::geometry::Geometry;
use crate::types::{Color, EdgeMode, Matrix, Point, Rect, Vector, union_bounds};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisualId(pub(crate) usize);

impl VisualId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Pixel effects. Markup cannot express them, so visuals carrying one are
/// rasterized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    Blur {
        radius: f64,
    },
    DropShadow {
        color: Color,
        offset: Vector,
        blur_radius: f64,
        opacity: f64,
    },
}

impl Effect {
    /// Area the effect can paint given content bounds.
    pub fn output_bounds(&self, content: Rect) -> Rect {
        match *self {
            Effect::Blur { radius } => {
                let r = radius.abs();
                content.inflate(r, r)
            }
            Effect::DropShadow {
                offset,
                blur_radius,
                ..
            } => {
                let r = blur_radius.abs();
                let shadow = Rect::new(
                    content.x + offset.x,
                    content.y + offset.y,
                    content.width,
                    content.height,
                )
                .inflate(r, r);
                content.union(shadow)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlyphRun {
    pub font: Arc<FontFace>,
    pub em_size: f64,
    /// Baseline origin of the first glyph.
    pub origin: Point,
    pub glyph_indices: Vec<u16>,
    /// Advance per glyph in page units. Empty uses the font's advances.
    pub advances: Vec<f64>,
    /// Per-glyph offsets in page units. May be empty.
    pub offsets: Vec<Vector>,
    pub characters: Vec<char>,
    /// For each character, the index of its first glyph. Empty means 1:1.
    pub cluster_map: Vec<u16>,
    /// One entry per character plus one. Empty means every position is a stop.
    pub caret_stops: Vec<bool>,
    pub bidi_level: i32,
    pub is_sideways: bool,
}

impl GlyphRun {
    pub fn new(font: Arc<FontFace>, em_size: f64, origin: Point, glyph_indices: Vec<u16>) -> Self {
        Self {
            font,
            em_size,
            origin,
            glyph_indices,
            advances: Vec::new(),
            offsets: Vec::new(),
            characters: Vec::new(),
            cluster_map: Vec::new(),
            caret_stops: Vec::new(),
            bidi_level: 0,
            is_sideways: false,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.characters = text.chars().collect();
        self
    }

    pub fn with_advances(mut self, advances: Vec<f64>) -> Self {
        self.advances = advances;
        self
    }

    pub fn is_right_to_left(&self) -> bool {
        self.bidi_level & 1 == 1
    }

    /// Advance of glyph `i` in page units.
    pub fn advance(&self, i: usize) -> f64 {
        match self.advances.get(i) {
            Some(v) => *v,
            None => {
                let glyph = self.glyph_indices.get(i).copied().unwrap_or(0);
                self.font.advance_em(glyph).unwrap_or(0.5) * self.em_size
            }
        }
    }

    pub fn total_advance(&self) -> f64 {
        (0..self.glyph_indices.len()).map(|i| self.advance(i)).sum()
    }

    /// Ink-independent box from the font's ascent and descent.
    pub fn bounds(&self) -> Option<Rect> {
        if self.glyph_indices.is_empty() || !(self.em_size > 0.0) {
            return None;
        }
        let width = self.total_advance();
        let x = if self.is_right_to_left() {
            self.origin.x - width
        } else {
            self.origin.x
        };
        let ascent = self.font.ascent_em() * self.em_size;
        let descent = self.font.descent_em() * self.em_size;
        let rect = Rect::new(x, self.origin.y - ascent, width.abs(), ascent + descent);
        rect.is_finite().then_some(rect)
    }
}

#[derive(Debug, Clone)]
pub struct DrawingGroup {
    pub transform: Option<Matrix>,
    pub clip: Option<Geometry>,
    pub opacity: f64,
    pub opacity_mask: Option<Brush>,
    pub children: Vec<Drawing>,
}

impl DrawingGroup {
    pub fn new(children: Vec<Drawing>) -> Self {
        Self {
            transform: None,
            clip: None,
            opacity: 1.0,
            opacity_mask: None,
            children,
        }
    }

    /// Whether the group changes how its children render.
    pub fn has_state(&self) -> bool {
        self.transform.is_some_and(|m| !m.is_identity())
            || self.clip.is_some()
            || self.opacity < 1.0
            || self.opacity_mask.is_some()
    }

    pub fn complexity(&self) -> Complexity {
        let mut result = Complexity::Empty;
        for child in &self.children {
            match (result, child.complexity()) {
                (_, Complexity::Empty) => {}
                (Complexity::Empty, c) => result = c,
                _ => return Complexity::Complex,
            }
        }
        result
    }

    /// Union of the children's bounds, before the group's own state.
    pub fn content_bounds(&self) -> Option<Rect> {
        self.children
            .iter()
            .fold(None, |acc, child| union_bounds(acc, child.bounds()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Empty,
    Single,
    Complex,
}

#[derive(Debug, Clone)]
pub enum Drawing {
    Geometry {
        brush: Option<Brush>,
        pen: Option<Pen>,
        geometry: Geometry,
    },
    GlyphRun {
        brush: Option<Brush>,
        run: GlyphRun,
    },
    Image {
        image: ImageSource,
        rect: Rect,
    },
    Group(DrawingGroup),
}

impl Drawing {
    pub fn fill(geometry: Geometry, brush: Brush) -> Self {
        Drawing::Geometry {
            brush: Some(brush),
            pen: None,
            geometry,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.complexity() == Complexity::Empty
    }

    /// Empty, a single primitive, or anything more. Groups holding exactly
    /// one non-empty primitive count as single.
    pub fn complexity(&self) -> Complexity {
        match self {
            Drawing::Geometry { geometry, .. } if geometry.is_empty() => Complexity::Empty,
            Drawing::GlyphRun { run, .. } if run.glyph_indices.is_empty() => Complexity::Empty,
            Drawing::Image { rect, .. } if !rect.is_renderable() => Complexity::Empty,
            Drawing::Geometry { .. } | Drawing::GlyphRun { .. } | Drawing::Image { .. } => {
                Complexity::Single
            }
            Drawing::Group(group) => group.complexity(),
        }
    }

    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Drawing::Geometry { pen, geometry, .. } => match pen {
                Some(pen) if !pen.is_invisible() => {
                    geometry.stroke_bounds(pen.thickness, pen.miter_limit_for_bounds())
                }
                _ => geometry.bounds(),
            },
            Drawing::GlyphRun { run, .. } => run.bounds(),
            Drawing::Image { rect, .. } => rect.is_finite().then_some(*rect),
            Drawing::Group(group) => {
                let mut bounds = group.content_bounds()?;
                if let Some(clip) = group.clip.as_ref().and_then(Geometry::bounds) {
                    bounds = bounds.intersect(clip)?;
                }
                match group.transform {
                    Some(m) => Some(m.transform_rect(bounds)),
                    None => Some(bounds),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Visual {
    pub content: Option<Drawing>,
    pub children: Vec<VisualId>,
    pub transform: Matrix,
    pub clip: Option<Geometry>,
    pub opacity: f64,
    pub opacity_mask: Option<Brush>,
    pub effect: Option<Effect>,
    /// Projected 3-D content; always rasterized.
    pub is_3d: bool,
    pub name: Option<String>,
    pub hyperlink: Option<String>,
    pub edge_mode: EdgeMode,
}

impl Default for Visual {
    fn default() -> Self {
        Self {
            content: None,
            children: Vec::new(),
            transform: Matrix::IDENTITY,
            clip: None,
            opacity: 1.0,
            opacity_mask: None,
            effect: None,
            is_3d: false,
            name: None,
            hyperlink: None,
            edge_mode: EdgeMode::Unspecified,
        }
    }
}

impl Visual {
    pub fn with_content(content: Drawing) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    pub fn needs_rasterization(&self) -> bool {
        self.effect.is_some() || self.is_3d
    }
}

/// Arena owning every visual of a document. Ids index into it.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    visuals: Vec<Visual>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, visual: Visual) -> VisualId {
        self.visuals.push(visual);
        VisualId(self.visuals.len() - 1)
    }

    /// Adds `visual` and appends it to `parent`'s children.
    pub fn add_child(&mut self, parent: VisualId, visual: Visual) -> Result<VisualId> {
        self.get(parent)?;
        let id = self.add(visual);
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    pub fn get(&self, id: VisualId) -> Result<&Visual> {
        self.visuals
            .get(id.0)
            .ok_or_else(|| XpsError::InvalidInput(format!("unknown visual {}", id.0)))
    }

    pub fn get_mut(&mut self, id: VisualId) -> Result<&mut Visual> {
        self.visuals
            .get_mut(id.0)
            .ok_or_else(|| XpsError::InvalidInput(format!("unknown visual {}", id.0)))
    }

    pub fn len(&self) -> usize {
        self.visuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visuals.is_empty()
    }

    /// Bounds of the visual's content and descendants in its own space,
    /// before its transform. Child links that loop back are ignored.
    pub fn descendant_bounds(&self, id: VisualId) -> Option<Rect> {
        let mut path = HashSet::new();
        self.bounds_inner(id, &mut path)
    }

    fn bounds_inner(&self, id: VisualId, path: &mut HashSet<VisualId>) -> Option<Rect> {
        let visual = self.visuals.get(id.0)?;
        if !path.insert(id) {
            return None;
        }
        let mut bounds = visual.content.as_ref().and_then(Drawing::bounds);
        for child_id in &visual.children {
            let Some(child) = self.visuals.get(child_id.0) else {
                continue;
            };
            let Some(mut child_bounds) = self.bounds_inner(*child_id, path) else {
                continue;
            };
            if let Some(clip) = child.clip.as_ref().and_then(Geometry::bounds) {
                match child_bounds.intersect(clip) {
                    Some(r) => child_bounds = r,
                    None => continue,
                }
            }
            if let Some(effect) = child.effect {
                child_bounds = effect.output_bounds(child_bounds);
            }
            bounds = union_bounds(bounds, Some(child.transform.transform_rect(child_bounds)));
        }
        path.remove(&id);
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    fn square(x: f64, size: f64) -> Drawing {
        Drawing::fill(
            Geometry::rect(Rect::new(x, 0.0, size, size)),
            Brush::solid(Color::BLACK),
        )
    }

    #[test]
    fn complexity_counts_non_empty_primitives() {
        assert_eq!(square(0.0, 10.0).complexity(), Complexity::Single);
        assert_eq!(square(0.0, 0.0).complexity(), Complexity::Empty);
        let nested = Drawing::Group(DrawingGroup::new(vec![
            square(0.0, 0.0),
            Drawing::Group(DrawingGroup::new(vec![square(0.0, 5.0)])),
        ]));
        assert_eq!(nested.complexity(), Complexity::Single);
        let two = Drawing::Group(DrawingGroup::new(vec![square(0.0, 5.0), square(9.0, 5.0)]));
        assert_eq!(two.complexity(), Complexity::Complex);
        assert!(Drawing::Group(DrawingGroup::new(Vec::new())).is_empty());
    }

    #[test]
    fn group_bounds_apply_clip_then_transform() {
        let mut group = DrawingGroup::new(vec![square(0.0, 10.0), square(20.0, 10.0)]);
        group.clip = Some(Geometry::rect(Rect::new(0.0, 0.0, 25.0, 5.0)));
        group.transform = Some(Matrix::translate(100.0, 0.0));
        let bounds = Drawing::Group(group).bounds().unwrap();
        assert!(bounds.approx_eq(Rect::new(100.0, 0.0, 25.0, 5.0), 1e-9));
    }

    #[test]
    fn descendant_bounds_follow_child_transforms() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::with_content(square(0.0, 10.0)));
        let mut child = Visual::with_content(square(0.0, 10.0));
        child.transform = Matrix::translate(50.0, 50.0);
        scene.add_child(root, child).unwrap();
        let bounds = scene.descendant_bounds(root).unwrap();
        assert!(bounds.approx_eq(Rect::new(0.0, 0.0, 60.0, 60.0), 1e-9));
    }

    #[test]
    fn descendant_bounds_survive_child_cycles() {
        let mut scene = Scene::new();
        let a = scene.add(Visual::with_content(square(0.0, 10.0)));
        let b = scene.add_child(a, Visual::default()).unwrap();
        scene.get_mut(b).unwrap().children.push(a);
        assert!(scene.descendant_bounds(a).is_some());
    }

    #[test]
    fn effects_grow_bounds() {
        let blur = Effect::Blur { radius: 4.0 };
        let r = blur.output_bounds(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(r.approx_eq(Rect::new(-4.0, -4.0, 18.0, 18.0), 1e-9));
        let shadow = Effect::DropShadow {
            color: Color::BLACK,
            offset: Vector::new(5.0, 5.0),
            blur_radius: 0.0,
            opacity: 1.0,
        };
        let r = shadow.output_bounds(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(r.approx_eq(Rect::new(0.0, 0.0, 15.0, 15.0), 1e-9));
    }

    #[test]
    fn unknown_visual_is_invalid_input() {
        let scene = Scene::new();
        assert!(matches!(scene.get(VisualId(3)), Err(XpsError::InvalidInput(_))));
    }
}
