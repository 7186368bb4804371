//! Reduces scene content to primitives a sink can emit directly.
//!
//! The flattener owns the stack of cumulative transforms and clip bounds,
//! turns content brushes (visual, drawing and vector-image brushes) into
//! fully flattened drawing brushes, and hands anything markup cannot express
//! to a [`Rasterizer`].

use crate::brush::{Bitmap, Brush, DrawingBrush, ImageBrush, ImageSource, Pen, TileParams};
use crate::cycle::CycleGuard;
use crate::error::{Result, XpsError};
use crate::font_cache::{EmbeddingAction, embedding_action};
use crate::geometry::Geometry;
use crate::raster::{RasterContent, RasterOutput, Rasterizer};
use crate::scene::{Complexity, Drawing, DrawingGroup, Effect, GlyphRun, Scene, VisualId};
use crate::types::{EdgeMode, Matrix, Rect, Size};
use crate::walk::Walker;
use std::sync::Arc;

/// Fraction of the page added on every side before clipping rasterized
/// content, so effect output near the page edge is not cut.
pub const RASTER_PAGE_MARGIN: f64 = 0.2;

/// One level of visual or drawing-group state.
#[derive(Debug, Clone)]
pub struct Push {
    pub transform: Matrix,
    /// Clip in the level's own coordinate space.
    pub clip: Option<Geometry>,
    pub opacity: f64,
    pub opacity_mask: Option<Brush>,
    /// Bounds the mask brush maps relative coordinates onto.
    pub mask_bounds: Option<Rect>,
    /// The level wraps at most one primitive.
    pub single_primitive: bool,
    pub name: Option<String>,
    pub source: Option<VisualId>,
    pub hyperlink: Option<String>,
    pub edge_mode: EdgeMode,
}

impl Default for Push {
    fn default() -> Self {
        Self {
            transform: Matrix::IDENTITY,
            clip: None,
            opacity: 1.0,
            opacity_mask: None,
            mask_bounds: None,
            single_primitive: false,
            name: None,
            source: None,
            hyperlink: None,
            edge_mode: EdgeMode::Unspecified,
        }
    }
}

impl Push {
    pub fn transform(transform: Matrix) -> Self {
        Self {
            transform,
            ..Self::default()
        }
    }

    pub fn clip(clip: Geometry) -> Self {
        Self {
            clip: Some(clip),
            ..Self::default()
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_mask(mut self, mask: Brush, bounds: Option<Rect>) -> Self {
        self.opacity_mask = Some(mask);
        self.mask_bounds = bounds;
        self
    }

    pub fn with_hyperlink(mut self, uri: impl Into<String>) -> Self {
        self.hyperlink = Some(uri.into());
        self
    }
}

/// Receiver of flattened primitives. Brushes arriving here are already
/// reduced: no visual brushes, no relative gradient coordinates.
pub trait PrimitiveSink {
    /// `world` is the cumulative transform including `push.transform`.
    fn push(&mut self, push: &Push, world: Matrix) -> Result<()>;
    fn pop(&mut self) -> Result<()>;
    /// Called even with no fill and no stroke so hyperlinks keep a hit area.
    fn draw_geometry(&mut self, fill: Option<&Brush>, pen: Option<&Pen>, geometry: &Geometry)
    -> Result<()>;
    fn draw_glyph_run(&mut self, brush: &Brush, run: &GlyphRun) -> Result<()>;
    fn draw_image(&mut self, image: &Arc<Bitmap>, rect: Rect) -> Result<()>;
}

/// Read-only inputs shared by a flattener and the sub-flatteners it spawns.
#[derive(Clone, Copy)]
pub struct FlattenContext<'a> {
    pub scene: &'a Scene,
    pub rasterizer: Option<&'a dyn Rasterizer>,
    pub raster_dpi: f64,
    /// Page size when flattening a page; `None` for brush content.
    pub page_size: Option<Size>,
    /// The sink paints pixels itself, so image-only fonts and drawing
    /// images need no fallback.
    pub pixel_sink: bool,
}

impl<'a> FlattenContext<'a> {
    pub fn new(scene: &'a Scene) -> Self {
        Self {
            scene,
            rasterizer: None,
            raster_dpi: 96.0,
            page_size: None,
            pixel_sink: false,
        }
    }

    fn detached(self) -> Self {
        Self {
            page_size: None,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FlattenState {
    world: Matrix,
    /// World-space bound of every clip on the stack.
    clip_bounds: Option<Rect>,
}

pub struct Flattener<'a, S: PrimitiveSink + ?Sized> {
    sink: &'a mut S,
    ctx: FlattenContext<'a>,
    guard: &'a mut CycleGuard,
    stack: Vec<FlattenState>,
    rasterized: usize,
}

impl<'a, S: PrimitiveSink + ?Sized> Flattener<'a, S> {
    pub fn new(sink: &'a mut S, ctx: FlattenContext<'a>, guard: &'a mut CycleGuard) -> Self {
        Self {
            sink,
            ctx,
            guard,
            stack: vec![FlattenState {
                world: Matrix::IDENTITY,
                clip_bounds: None,
            }],
            rasterized: 0,
        }
    }

    pub fn scene(&self) -> &'a Scene {
        self.ctx.scene
    }

    pub fn context(&self) -> FlattenContext<'a> {
        self.ctx
    }

    pub fn page_size(&self) -> Option<Size> {
        self.ctx.page_size
    }

    fn state(&self) -> FlattenState {
        self.stack.last().copied().unwrap_or(FlattenState {
            world: Matrix::IDENTITY,
            clip_bounds: None,
        })
    }

    pub fn world(&self) -> Matrix {
        self.state().world
    }

    pub fn clip_bounds(&self) -> Option<Rect> {
        self.state().clip_bounds
    }

    /// Levels pushed and not yet popped.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Visuals and drawings handed to the rasterizer so far.
    pub fn rasterized_count(&self) -> usize {
        self.rasterized
    }

    pub fn push(&mut self, mut push: Push) -> Result<()> {
        let parent = self.state();
        let world = parent.world.mul(push.transform);
        let mut clip_bounds = parent.clip_bounds;
        if let Some(clip) = &push.clip {
            let clip_world = clip
                .bounds()
                .filter(|r| r.is_finite())
                .map(|r| world.transform_rect(r))
                .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));
            clip_bounds = Some(match clip_bounds {
                Some(outer) => outer
                    .intersect(clip_world)
                    .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0)),
                None => clip_world,
            });
        }
        push.opacity = normalize_opacity(push.opacity);
        if let Some(mask) = push.opacity_mask.take() {
            let bounds = if mask.needs_bounds() { push.mask_bounds } else { None };
            match self.reduce_brush(&mask, bounds)? {
                Some(reduced) => push.opacity_mask = Some(reduced),
                // A mask that paints nothing hides the whole level.
                None => push.opacity = 0.0,
            }
        }
        self.stack.push(FlattenState { world, clip_bounds });
        self.sink.push(&push, world)
    }

    pub fn pop(&mut self) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(XpsError::InvalidInput("pop without matching push".to_string()));
        }
        self.stack.pop();
        self.sink.pop()
    }

    /// Runs `body` between a push and its pop. The pop happens on every path
    /// out of `body`, including errors.
    pub fn with_push<F>(&mut self, push: Push, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.push(push)?;
        let result = body(self);
        let popped = self.pop();
        result.and(popped)
    }

    pub fn draw_drawing(&mut self, drawing: &Drawing) -> Result<()> {
        match drawing {
            Drawing::Geometry {
                brush,
                pen,
                geometry,
            } => self.draw_geometry(brush.as_ref(), pen.as_ref(), geometry),
            Drawing::GlyphRun { brush, run } => self.draw_glyph_run(brush.as_ref(), run),
            Drawing::Image { image, rect } => self.draw_image(image, *rect),
            Drawing::Group(group) => self.draw_group(group),
        }
    }

    fn draw_group(&mut self, group: &DrawingGroup) -> Result<()> {
        let complexity = group.complexity();
        if complexity == Complexity::Empty {
            return Ok(());
        }
        if !group.has_state() {
            for child in &group.children {
                self.draw_drawing(child)?;
            }
            return Ok(());
        }
        if !(group.opacity > 0.0) {
            return Ok(());
        }
        let mask_bounds = match &group.opacity_mask {
            Some(mask) if mask.needs_bounds() => group.content_bounds(),
            _ => None,
        };
        let push = Push {
            transform: group.transform.unwrap_or(Matrix::IDENTITY),
            clip: group.clip.clone(),
            opacity: group.opacity,
            opacity_mask: group.opacity_mask.clone(),
            mask_bounds,
            single_primitive: complexity == Complexity::Single,
            ..Push::default()
        };
        self.with_push(push, |f| {
            for child in &group.children {
                f.draw_drawing(child)?;
            }
            Ok(())
        })
    }

    pub fn draw_geometry(
        &mut self,
        brush: Option<&Brush>,
        pen: Option<&Pen>,
        geometry: &Geometry,
    ) -> Result<()> {
        if geometry.is_empty() {
            return Ok(());
        }
        let fill = match brush {
            Some(brush) => {
                let bounds = if brush.needs_bounds() { geometry.bounds() } else { None };
                self.reduce_brush(brush, bounds)?
            }
            None => None,
        };
        let stroke = match pen {
            Some(pen) if !pen.is_invisible() => self.reduce_pen(pen, geometry)?,
            _ => None,
        };
        self.sink.draw_geometry(fill.as_ref(), stroke.as_ref(), geometry)
    }

    fn reduce_pen(&mut self, pen: &Pen, geometry: &Geometry) -> Result<Option<Pen>> {
        let Some(brush) = &pen.brush else {
            return Ok(None);
        };
        // Stroke bounds are only worth computing for brushes that map onto them.
        let bounds = if brush.needs_bounds() {
            geometry.stroke_bounds(pen.thickness, pen.miter_limit_for_bounds())
        } else {
            None
        };
        Ok(self.reduce_brush(brush, bounds)?.map(|reduced| Pen {
            brush: Some(reduced),
            dash: pen.dash.clone(),
            ..*pen
        }))
    }

    pub fn draw_glyph_run(&mut self, brush: Option<&Brush>, run: &GlyphRun) -> Result<()> {
        if run.glyph_indices.is_empty() {
            return Ok(());
        }
        let Some(brush) = brush else {
            return Ok(());
        };
        let action = embedding_action(run.font.embedding_rights());
        if action == EmbeddingAction::ImageOnly && !self.ctx.pixel_sink {
            log::debug!(
                "font {} may not be embedded; rasterizing {} glyphs",
                run.font.name(),
                run.glyph_indices.len()
            );
            let drawing = Drawing::GlyphRun {
                brush: Some(brush.clone()),
                run: run.clone(),
            };
            return self.draw_rasterized_drawing(&drawing);
        }
        let bounds = if brush.needs_bounds() { run.bounds() } else { None };
        match self.reduce_brush(brush, bounds)? {
            Some(reduced) => self.sink.draw_glyph_run(&reduced, run),
            None => Ok(()),
        }
    }

    pub fn draw_image(&mut self, image: &ImageSource, rect: Rect) -> Result<()> {
        if !rect.is_renderable() {
            return Ok(());
        }
        match image {
            ImageSource::Bitmap(bitmap) => self.sink.draw_image(bitmap, rect),
            ImageSource::Drawing(drawing) => {
                let brush = Brush::Drawing(DrawingBrush::new(drawing.clone(), TileParams::default()));
                self.draw_geometry(Some(&brush), None, &Geometry::rect(rect))
            }
            ImageSource::Snapshot(source) => {
                let bitmap = Arc::new(source.snapshot()?);
                self.sink.draw_image(&bitmap, rect)
            }
        }
    }

    /// Reduces `brush` to a form the sink can emit: `None` when it paints
    /// nothing or paints itself, a solid color for uniform gradients,
    /// absolute gradient coordinates, and drawing brushes holding only
    /// flattened content.
    pub fn reduce_brush(&mut self, brush: &Brush, bounds: Option<Rect>) -> Result<Option<Brush>> {
        let Some(brush) = brush.simplified() else {
            return Ok(None);
        };
        let Some(brush) = brush.with_absolute_mapping(bounds) else {
            return Ok(None);
        };
        match brush {
            Brush::Visual(visual) => {
                if !self.guard.enter(visual.id) {
                    log::debug!("visual brush {} paints itself; skipped", visual.id.get());
                    return Ok(None);
                }
                let collected = self.collect_visual(visual.visual);
                self.guard.exit(visual.id);
                Ok(collected?.and_then(|drawing| {
                    tile_from_drawing(DrawingBrush {
                        id: visual.id,
                        drawing: Arc::new(drawing),
                        tile: visual.tile,
                    }, bounds)
                }))
            }
            Brush::Drawing(drawing) => self.reduce_drawing_brush(drawing, bounds),
            Brush::Image(image) => self.reduce_image_brush(image, bounds),
            other => Ok(Some(other)),
        }
    }

    fn reduce_drawing_brush(
        &mut self,
        brush: DrawingBrush,
        bounds: Option<Rect>,
    ) -> Result<Option<Brush>> {
        if !self.guard.enter(brush.id) {
            log::debug!("drawing brush {} paints itself; skipped", brush.id.get());
            return Ok(None);
        }
        let collected = self.collect_drawing(&brush.drawing);
        self.guard.exit(brush.id);
        Ok(collected?.and_then(|drawing| {
            tile_from_drawing(DrawingBrush {
                drawing: Arc::new(drawing),
                ..brush
            }, bounds)
        }))
    }

    fn reduce_image_brush(&mut self, brush: ImageBrush, bounds: Option<Rect>) -> Result<Option<Brush>> {
        match brush.image {
            ImageSource::Bitmap(bitmap) => {
                let content = Rect::from_size(bitmap.size());
                Ok(brush.tile.resolve(content, bounds).map(|tile| {
                    Brush::Image(ImageBrush {
                        image: ImageSource::Bitmap(bitmap),
                        tile,
                    })
                }))
            }
            ImageSource::Drawing(drawing) => {
                self.reduce_drawing_brush(DrawingBrush::new(drawing, brush.tile), bounds)
            }
            ImageSource::Snapshot(source) => {
                let bitmap = Arc::new(source.snapshot()?);
                self.reduce_image_brush(
                    ImageBrush {
                        image: ImageSource::Bitmap(bitmap),
                        tile: brush.tile,
                    },
                    bounds,
                )
            }
        }
    }

    fn collect_visual(&mut self, id: VisualId) -> Result<Option<Drawing>> {
        let mut collector = DrawingCollector::new();
        let rasterized = {
            let mut sub = Flattener::new(&mut collector, self.ctx.detached(), &mut *self.guard);
            Walker::detached().walk(&mut sub, id)?;
            sub.rasterized
        };
        self.rasterized += rasterized;
        Ok(collector.finish())
    }

    fn collect_drawing(&mut self, drawing: &Drawing) -> Result<Option<Drawing>> {
        let mut collector = DrawingCollector::new();
        let rasterized = {
            let mut sub = Flattener::new(&mut collector, self.ctx.detached(), &mut *self.guard);
            sub.draw_drawing(drawing)?;
            sub.rasterized
        };
        self.rasterized += rasterized;
        Ok(collector.finish())
    }

    /// Replaces a visual that needs pixel effects or 3-D projection with one
    /// bitmap of the whole subtree, wrapped in the visual's own state.
    pub fn draw_rasterized_visual(
        &mut self,
        id: VisualId,
        transform: Matrix,
        name: Option<String>,
    ) -> Result<()> {
        let scene = self.ctx.scene;
        let visual = scene.get(id)?;
        let Some(mut bounds) = scene.descendant_bounds(id) else {
            return Ok(());
        };
        if let Some(clip) = &visual.clip {
            match clip.bounds().and_then(|c| bounds.intersect(c)) {
                Some(clipped) => bounds = clipped,
                None => return Ok(()),
            }
        }
        let push = Push {
            transform,
            clip: visual.clip.clone(),
            opacity: visual.opacity,
            opacity_mask: visual.opacity_mask.clone(),
            mask_bounds: Some(bounds),
            single_primitive: true,
            name,
            source: Some(id),
            hyperlink: visual.hyperlink.clone(),
            edge_mode: visual.edge_mode,
        };
        self.with_push(push, |f| {
            f.rasterize_content(RasterContent::Visual { scene, id }, bounds, visual.effect)
        })
    }

    /// Rasterizes one drawing in place, e.g. glyphs of a font that may only
    /// be embedded as pixels.
    pub fn draw_rasterized_drawing(&mut self, drawing: &Drawing) -> Result<()> {
        let Some(bounds) = drawing.bounds() else {
            return Ok(());
        };
        let scene = self.ctx.scene;
        self.rasterize_content(RasterContent::Drawing { scene, drawing }, bounds, None)
    }

    fn rasterize_content(
        &mut self,
        content: RasterContent<'_>,
        bounds: Rect,
        effect: Option<Effect>,
    ) -> Result<()> {
        let Some(visible) = self.visible_local_bounds() else {
            return Ok(());
        };
        let Some(mut bounds) = bounds.intersect(visible).filter(|r| r.is_renderable()) else {
            log::trace!("rasterized content lies outside the visible area");
            return Ok(());
        };
        if let Some(effect) = effect {
            bounds = effect.output_bounds(bounds);
        }
        let rasterizer = self
            .ctx
            .rasterizer
            .ok_or(XpsError::MissingService("rasterizer"))?;
        let world = self.world();
        // One call for the whole subtree; banding happens downstream.
        let output = rasterizer.rasterize(content, bounds, world, self.ctx.raster_dpi)?;
        self.rasterized += 1;
        match output {
            Some(output) => self.emit_raster(output),
            None => Ok(()),
        }
    }

    /// Local-space rectangle outside of which nothing can be seen: the clip
    /// stack and, on a page, the page inflated by [`RASTER_PAGE_MARGIN`].
    /// `None` when nothing is visible.
    fn visible_local_bounds(&self) -> Option<Rect> {
        let state = self.state();
        let mut world_limit = state.clip_bounds;
        if let Some(page) = self.ctx.page_size {
            let margin_x = page.width * RASTER_PAGE_MARGIN;
            let margin_y = page.height * RASTER_PAGE_MARGIN;
            let page_rect = Rect::from_size(page).inflate(margin_x, margin_y);
            world_limit = Some(match world_limit {
                Some(clip) => clip.intersect(page_rect)?,
                None => page_rect,
            });
        }
        match world_limit {
            Some(limit) if !limit.is_renderable() => None,
            Some(limit) => Some(state.world.invert()?.transform_rect(limit)),
            None => Some(Rect::new(-1e30, -1e30, 2e30, 2e30)),
        }
    }

    fn emit_raster(&mut self, output: RasterOutput) -> Result<()> {
        let pixels = Rect::new(
            0.0,
            0.0,
            output.bitmap.width as f64,
            output.bitmap.height as f64,
        );
        let bitmap = Arc::new(output.bitmap);
        if output.transform.has_rotation_or_skew() {
            self.with_push(Push::transform(output.transform), |f| {
                f.sink.draw_image(&bitmap, pixels)
            })
        } else {
            let rect = output.transform.transform_rect(pixels);
            self.sink.draw_image(&bitmap, rect)
        }
    }
}

fn normalize_opacity(opacity: f64) -> f64 {
    if opacity.is_nan() { 0.0 } else { opacity.clamp(0.0, 1.0) }
}

fn tile_from_drawing(brush: DrawingBrush, bounds: Option<Rect>) -> Option<Brush> {
    let content = brush.drawing.bounds()?;
    let tile = brush.tile.resolve(content, bounds)?;
    Some(Brush::Drawing(DrawingBrush { tile, ..brush }))
}

/// Sink that records flattened primitives as a drawing tree. Used to turn
/// brush content into plain drawings.
#[derive(Debug)]
pub struct DrawingCollector {
    stack: Vec<DrawingGroup>,
}

impl Default for DrawingCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingCollector {
    pub fn new() -> Self {
        Self {
            stack: vec![DrawingGroup::new(Vec::new())],
        }
    }

    fn top(&mut self) -> Result<&mut DrawingGroup> {
        self.stack
            .last_mut()
            .ok_or_else(|| XpsError::InvalidInput("drawing collector has no open group".to_string()))
    }

    /// The collected drawing, or `None` when nothing was drawn.
    pub fn finish(mut self) -> Option<Drawing> {
        let root = self.stack.drain(..).next()?;
        let drawing = Drawing::Group(root);
        (!drawing.is_empty()).then_some(drawing)
    }
}

impl PrimitiveSink for DrawingCollector {
    fn push(&mut self, push: &Push, _world: Matrix) -> Result<()> {
        self.stack.push(DrawingGroup {
            transform: (!push.transform.is_identity()).then_some(push.transform),
            clip: push.clip.clone(),
            opacity: push.opacity,
            opacity_mask: push.opacity_mask.clone(),
            children: Vec::new(),
        });
        Ok(())
    }

    fn pop(&mut self) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(XpsError::InvalidInput("pop without matching push".to_string()));
        }
        let Some(group) = self.stack.pop() else {
            return Ok(());
        };
        if group.opacity > 0.0 && group.complexity() != Complexity::Empty {
            self.top()?.children.push(Drawing::Group(group));
        }
        Ok(())
    }

    fn draw_geometry(
        &mut self,
        fill: Option<&Brush>,
        pen: Option<&Pen>,
        geometry: &Geometry,
    ) -> Result<()> {
        if fill.is_none() && pen.is_none() {
            return Ok(());
        }
        self.top()?.children.push(Drawing::Geometry {
            brush: fill.cloned(),
            pen: pen.cloned(),
            geometry: geometry.clone(),
        });
        Ok(())
    }

    fn draw_glyph_run(&mut self, brush: &Brush, run: &GlyphRun) -> Result<()> {
        self.top()?.children.push(Drawing::GlyphRun {
            brush: Some(brush.clone()),
            run: run.clone(),
        });
        Ok(())
    }

    fn draw_image(&mut self, image: &Arc<Bitmap>, rect: Rect) -> Result<()> {
        self.top()?.children.push(Drawing::Image {
            image: ImageSource::Bitmap(image.clone()),
            rect,
        });
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Sink that records calls as short strings.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub events: Vec<String>,
        pub worlds: Vec<Matrix>,
        pub pushes: Vec<Push>,
        pub fills: Vec<Option<Brush>>,
    }

    impl PrimitiveSink for RecordingSink {
        fn push(&mut self, push: &Push, world: Matrix) -> Result<()> {
            self.events.push("push".to_string());
            self.worlds.push(world);
            self.pushes.push(push.clone());
            Ok(())
        }

        fn pop(&mut self) -> Result<()> {
            self.events.push("pop".to_string());
            Ok(())
        }

        fn draw_geometry(
            &mut self,
            fill: Option<&Brush>,
            _pen: Option<&Pen>,
            _geometry: &Geometry,
        ) -> Result<()> {
            self.events.push("geometry".to_string());
            self.fills.push(fill.cloned());
            Ok(())
        }

        fn draw_glyph_run(&mut self, _brush: &Brush, _run: &GlyphRun) -> Result<()> {
            self.events.push("glyphs".to_string());
            Ok(())
        }

        fn draw_image(&mut self, _image: &Arc<Bitmap>, rect: Rect) -> Result<()> {
            self.events.push(format!("image {}x{}", rect.width, rect.height));
            Ok(())
        }
    }
}
