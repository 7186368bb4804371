use crate::brush::Brush;
use crate::error::Result;
use crate::flatten::{Flattener, PrimitiveSink, Push};
use crate::scene::{Complexity, Drawing, Visual, VisualId};
use crate::types::{Color, Matrix, Rect};
use std::collections::HashSet;

// Distance in page units within which a rectangle counts as covering the page.
const PAGE_MATCH_TOLERANCE: f64 = 0.5;

/// Depth-first walk over the visual tree, feeding a [`Flattener`].
pub struct Walker<'n> {
    /// Names already emitted in this document. `None` drops every name.
    names: Option<&'n mut HashSet<String>>,
    on_path: HashSet<VisualId>,
    depth: usize,
    elide_root_background: bool,
    rasterize_effects: bool,
    ignore_root_transform: bool,
}

impl<'n> Walker<'n> {
    pub fn for_page(names: &'n mut HashSet<String>, elide_root_background: bool) -> Self {
        Self {
            names: Some(names),
            on_path: HashSet::new(),
            depth: 0,
            elide_root_background,
            rasterize_effects: true,
            ignore_root_transform: false,
        }
    }

    /// Walker for content detached from the page: brush content and
    /// rasterized subtrees. The root's transform is not applied and names
    /// are dropped.
    pub fn detached() -> Walker<'static> {
        Walker {
            names: None,
            on_path: HashSet::new(),
            depth: 0,
            elide_root_background: false,
            rasterize_effects: true,
            ignore_root_transform: true,
        }
    }

    pub fn walk<S: PrimitiveSink + ?Sized>(
        &mut self,
        f: &mut Flattener<'_, S>,
        id: VisualId,
    ) -> Result<()> {
        if !self.on_path.insert(id) {
            log::debug!("visual {} is its own ancestor; skipped", id.index());
            return Ok(());
        }
        let result = self.visit(f, id);
        self.on_path.remove(&id);
        result
    }

    /// Walks the content and children of `id` without applying the visual's
    /// own transform, clip, opacity, mask or effect.
    pub fn walk_contents<S: PrimitiveSink + ?Sized>(
        &mut self,
        f: &mut Flattener<'_, S>,
        id: VisualId,
    ) -> Result<()> {
        let visual = f.scene().get(id)?;
        if !self.on_path.insert(id) {
            return Ok(());
        }
        self.depth += 1;
        let result = self.walk_body(f, visual, false);
        self.depth -= 1;
        self.on_path.remove(&id);
        result
    }

    fn visit<S: PrimitiveSink + ?Sized>(
        &mut self,
        f: &mut Flattener<'_, S>,
        id: VisualId,
    ) -> Result<()> {
        let scene = f.scene();
        let visual = scene.get(id)?;
        let is_root = self.depth == 0;
        let transform = if is_root && self.ignore_root_transform {
            Matrix::IDENTITY
        } else {
            visual.transform
        };
        if !transform.is_valid() {
            log::debug!("visual {} has a singular transform; pruned", id.index());
            return Ok(());
        }
        let Some(bounds) = scene.descendant_bounds(id).filter(|b| b.is_renderable()) else {
            log::trace!("visual {} has no renderable bounds; pruned", id.index());
            return Ok(());
        };
        if let Some(clip) = &visual.clip {
            let visible = clip
                .bounds()
                .filter(|c| c.is_renderable())
                .and_then(|c| c.intersect(bounds))
                .filter(|r| r.is_renderable());
            if visible.is_none() {
                log::trace!("visual {} is clipped away; pruned", id.index());
                return Ok(());
            }
        }
        // An effect can paint where its input is transparent.
        if visual.effect.is_none() && !is_visible(visual) {
            log::trace!("visual {} is fully transparent; pruned", id.index());
            return Ok(());
        }

        let name = self.claim_name(visual.name.as_deref());
        if self.rasterize_effects && visual.needs_rasterization() {
            log::debug!("visual {} needs pixel output; rasterizing", id.index());
            return f.draw_rasterized_visual(id, transform, name);
        }

        let single_primitive = visual.children.is_empty()
            && visual
                .content
                .as_ref()
                .is_some_and(|c| c.complexity() == Complexity::Single);
        let push = Push {
            transform,
            clip: visual.clip.clone(),
            opacity: visual.opacity,
            opacity_mask: visual.opacity_mask.clone(),
            mask_bounds: Some(bounds),
            single_primitive,
            name,
            source: Some(id),
            hyperlink: visual.hyperlink.clone(),
            edge_mode: visual.edge_mode,
        };
        f.with_push(push, |f| {
            self.depth += 1;
            let result = self.walk_body(f, visual, is_root);
            self.depth -= 1;
            result
        })
    }

    fn walk_body<S: PrimitiveSink + ?Sized>(
        &mut self,
        f: &mut Flattener<'_, S>,
        visual: &Visual,
        is_root: bool,
    ) -> Result<()> {
        if let Some(content) = &visual.content {
            let elide = is_root && self.elide_root_background && visual.hyperlink.is_none();
            draw_content(f, content, elide)?;
        }
        for child in &visual.children {
            self.walk(f, *child)?;
        }
        Ok(())
    }

    /// Keeps the first use of each valid name per document.
    fn claim_name(&mut self, name: Option<&str>) -> Option<String> {
        let name = name?;
        let names = self.names.as_deref_mut()?;
        if !is_valid_name(name) {
            log::debug!("dropping invalid element name {name:?}");
            return None;
        }
        if !names.insert(name.to_string()) {
            log::debug!("dropping duplicate element name {name:?}");
            return None;
        }
        Some(name.to_string())
    }
}

fn is_visible(visual: &Visual) -> bool {
    if !(visual.opacity > 0.0) {
        return false;
    }
    visual
        .opacity_mask
        .as_ref()
        .is_none_or(|mask| mask.simplified().is_some())
}

fn draw_content<S: PrimitiveSink + ?Sized>(
    f: &mut Flattener<'_, S>,
    content: &Drawing,
    elide_background: bool,
) -> Result<()> {
    if elide_background {
        if is_page_background(f, content) {
            log::trace!("root background matches the page; elided");
            return Ok(());
        }
        if let Drawing::Group(group) = content {
            if !group.has_state() {
                if let Some((first, rest)) = group.children.split_first() {
                    if is_page_background(f, first) {
                        log::trace!("root background matches the page; elided");
                        for child in rest {
                            f.draw_drawing(child)?;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
    f.draw_drawing(content)
}

/// A white or transparent rectangle exactly covering the page, which adds
/// nothing to a page that is white already.
fn is_page_background<S: PrimitiveSink + ?Sized>(f: &Flattener<'_, S>, drawing: &Drawing) -> bool {
    let Some(page) = f.page_size() else {
        return false;
    };
    let Drawing::Geometry {
        brush,
        pen,
        geometry,
    } = drawing
    else {
        return false;
    };
    if pen.as_ref().is_some_and(|p| !p.is_invisible()) {
        return false;
    }
    let paints_page_color = match brush.as_ref().and_then(Brush::simplified) {
        None => true,
        Some(Brush::Solid { color, opacity }) => {
            opacity >= 1.0 && color.approx_eq(Color::WHITE, 1.0 / 512.0)
        }
        Some(_) => false,
    };
    if !paints_page_color {
        return false;
    }
    let Some(rect) = geometry.as_axis_aligned_rect() else {
        return false;
    };
    let world = f.world();
    if world.has_rotation_or_skew() {
        return false;
    }
    world
        .transform_rect(rect)
        .approx_eq(Rect::from_size(page), PAGE_MATCH_TOLERANCE)
}

/// Names follow the markup's identifier rule: a letter or underscore, then
/// letters, digits or underscores.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleGuard;
    use crate::flatten::FlattenContext;
    use crate::flatten::testing::RecordingSink;
    use crate::geometry::Geometry;
    use crate::scene::{DrawingGroup, Effect, Scene};
    use crate::types::Size;

    fn rect_drawing(rect: Rect, color: Color) -> Drawing {
        Drawing::fill(Geometry::rect(rect), Brush::solid(color))
    }

    fn page_walk(scene: &Scene, root: VisualId, names: &mut HashSet<String>) -> RecordingSink {
        let mut sink = RecordingSink::default();
        let mut guard = CycleGuard::new();
        let ctx = FlattenContext {
            page_size: Some(Size::new(100.0, 100.0)),
            ..FlattenContext::new(scene)
        };
        let mut f = Flattener::new(&mut sink, ctx, &mut guard);
        Walker::for_page(names, true).walk(&mut f, root).unwrap();
        assert_eq!(f.depth(), 0);
        sink
    }

    #[test]
    fn transparent_visual_is_pruned() {
        let mut scene = Scene::new();
        let mut visual = Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK));
        visual.opacity_mask = Some(Brush::solid(Color::TRANSPARENT));
        let root = scene.add(visual);
        let sink = page_walk(&scene, root, &mut HashSet::new());
        assert!(sink.events.is_empty());
    }

    #[test]
    fn singular_transform_and_empty_clip_prune() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        let mut flat = Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK));
        flat.transform = Matrix::scale(0.0, 1.0);
        scene.add_child(root, flat).unwrap();
        let mut clipped = Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK));
        clipped.clip = Some(Geometry::rect(Rect::new(50.0, 50.0, 5.0, 5.0)));
        scene.add_child(root, clipped).unwrap();
        let mut shown = Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK));
        shown.transform = Matrix::translate(1.0, 1.0);
        scene.add_child(root, shown).unwrap();
        let sink = page_walk(&scene, root, &mut HashSet::new());
        assert_eq!(sink.events, ["push", "push", "geometry", "pop", "pop"]);
    }

    #[test]
    fn root_background_is_elided() {
        let mut scene = Scene::new();
        let content = Drawing::Group(DrawingGroup::new(vec![
            rect_drawing(Rect::new(0.0, 0.0, 100.0, 100.0), Color::WHITE),
            rect_drawing(Rect::new(10.0, 10.0, 5.0, 5.0), Color::BLACK),
        ]));
        let root = scene.add(Visual::with_content(content));
        let sink = page_walk(&scene, root, &mut HashSet::new());
        assert_eq!(sink.events, ["push", "geometry", "pop"]);

        let mut scene = Scene::new();
        let root = scene.add(Visual::with_content(rect_drawing(
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Color::rgb(0.9, 0.9, 0.9),
        )));
        let sink = page_walk(&scene, root, &mut HashSet::new());
        assert_eq!(sink.events, ["push", "geometry", "pop"]);
    }

    #[test]
    fn names_are_kept_once_per_document() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        for name in ["title", "title", "9bad"] {
            let mut child = Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK));
            child.name = Some(name.to_string());
            scene.add_child(root, child).unwrap();
        }
        let mut names = HashSet::new();
        let sink = page_walk(&scene, root, &mut names);
        let kept: Vec<_> = sink.pushes.iter().map(|p| p.name.clone()).collect();
        assert_eq!(kept, [None, Some("title".to_string()), None, None]);
        assert!(names.contains("title"));
    }

    #[test]
    fn child_cycles_terminate() {
        let mut scene = Scene::new();
        let a = scene.add(Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK)));
        let b = scene.add_child(a, Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK))).unwrap();
        scene.get_mut(b).unwrap().children.push(a);
        let sink = page_walk(&scene, a, &mut HashSet::new());
        assert_eq!(sink.events, ["push", "geometry", "push", "geometry", "pop", "pop"]);
    }

    #[test]
    fn effect_keeps_transparent_visual_for_rasterization() {
        let mut scene = Scene::new();
        let mut visual = Visual::with_content(rect_drawing(Rect::new(0.0, 0.0, 5.0, 5.0), Color::BLACK));
        visual.opacity = 0.0;
        visual.effect = Some(Effect::Blur { radius: 1.0 });
        let root = scene.add(visual);
        let mut sink = RecordingSink::default();
        let mut guard = CycleGuard::new();
        let mut f = Flattener::new(&mut sink, FlattenContext::new(&scene), &mut guard);
        let err = Walker::for_page(&mut HashSet::new(), false).walk(&mut f, root);
        assert!(matches!(err, Err(crate::error::XpsError::MissingService(_))));
    }

    #[test]
    fn name_rule() {
        assert!(is_valid_name("_a1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a-b"));
    }
}
