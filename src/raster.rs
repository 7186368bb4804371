use crate::brush::{
    Bitmap, Brush, DrawingBrush, Gradient, ImageBrush, ImageSource, LineCap, LineJoin, Pen,
    SpreadMethod, TileMode, TileParams,
};
use crate::brush_markup::sort_gradient_stops;
use crate::cycle::CycleGuard;
use crate::error::{Result, XpsError};
use crate::flatten::{FlattenContext, Flattener, PrimitiveSink, Push};
use crate::geometry::{FillRule as PathFillRule, Geometry, PathGeometry, SegmentKind};
use crate::scene::{Drawing, Effect, GlyphRun, Scene, VisualId};
use crate::types::{Color, Matrix, Rect};
use crate::walk::Walker;
use std::sync::Arc;
use tiny_skia::{
    FillRule, FilterQuality, GradientStop, LinearGradient, Mask, MaskType, Paint, Path,
    PathBuilder, Pattern, Pixmap, PixmapPaint, Point, RadialGradient, Shader, SpreadMode, Stroke,
    StrokeDash, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

// Longest side of any bitmap this module allocates.
const MAX_RASTER_SIDE: f64 = 8192.0;
// Box blur passes approximating a gaussian.
const BLUR_PASSES: usize = 3;

/// What to rasterize.
#[derive(Debug, Clone, Copy)]
pub enum RasterContent<'a> {
    /// A visual's content and descendants plus its effect, without its
    /// transform, clip, opacity or mask.
    Visual { scene: &'a Scene, id: VisualId },
    Drawing {
        scene: &'a Scene,
        drawing: &'a Drawing,
    },
}

#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub bitmap: Bitmap,
    /// Maps bitmap pixel coordinates into the content's coordinate space.
    pub transform: Matrix,
}

/// Turns content the markup cannot express into pixels.
pub trait Rasterizer {
    /// Renders the part of `content` inside `bounds` (content space) at a
    /// resolution matching `world` at `dpi`. `None` when nothing was painted.
    fn rasterize(
        &self,
        content: RasterContent<'_>,
        bounds: Rect,
        world: Matrix,
        dpi: f64,
    ) -> Result<Option<RasterOutput>>;
}

/// CPU rasterizer backed by tiny-skia.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkiaRasterizer;

impl Rasterizer for SkiaRasterizer {
    fn rasterize(
        &self,
        content: RasterContent<'_>,
        bounds: Rect,
        world: Matrix,
        dpi: f64,
    ) -> Result<Option<RasterOutput>> {
        if !bounds.is_renderable() || !(dpi > 0.0) {
            return Ok(None);
        }
        let (sx, sy) = world.scale_factors();
        let resolution = dpi / 96.0;
        let mut kx = (sx * resolution).max(1e-3);
        let mut ky = (sy * resolution).max(1e-3);
        let longest = (bounds.width * kx).max(bounds.height * ky);
        if longest > MAX_RASTER_SIDE {
            let shrink = MAX_RASTER_SIDE / longest;
            kx *= shrink;
            ky *= shrink;
        }
        let width = (bounds.width * kx).ceil().max(1.0) as u32;
        let height = (bounds.height * ky).ceil().max(1.0) as u32;
        let base = Transform::from_row(
            kx as f32,
            0.0,
            0.0,
            ky as f32,
            (-bounds.x * kx) as f32,
            (-bounds.y * ky) as f32,
        );
        let mut canvas = PixmapCanvas::new(width, height, base)?;
        let mut guard = CycleGuard::new();
        let effect = match content {
            RasterContent::Visual { scene, id } => {
                let ctx = pixel_context(scene, Some(self), dpi);
                let mut f = Flattener::new(&mut canvas, ctx, &mut guard);
                Walker::detached().walk_contents(&mut f, id)?;
                scene.get(id)?.effect
            }
            RasterContent::Drawing { scene, drawing } => {
                let ctx = pixel_context(scene, Some(self), dpi);
                let mut f = Flattener::new(&mut canvas, ctx, &mut guard);
                f.draw_drawing(drawing)?;
                None
            }
        };
        let mut pixmap = canvas.finish()?;
        if let Some(effect) = effect {
            pixmap = apply_effect(pixmap, effect, kx, ky)?;
        }
        if pixmap.pixels().iter().all(|px| px.alpha() == 0) {
            return Ok(None);
        }
        let mut bitmap = bitmap_from_pixmap(&pixmap)?;
        bitmap.dpi_x = 96.0 * kx;
        bitmap.dpi_y = 96.0 * ky;
        log::trace!("rasterized {width}x{height} pixels for {bounds:?}");
        Ok(Some(RasterOutput {
            bitmap,
            transform: Matrix::new(1.0 / kx, 0.0, 0.0, 1.0 / ky, bounds.x, bounds.y),
        }))
    }
}

fn pixel_context<'a>(
    scene: &'a Scene,
    rasterizer: Option<&'a dyn Rasterizer>,
    dpi: f64,
) -> FlattenContext<'a> {
    FlattenContext {
        scene,
        rasterizer,
        raster_dpi: dpi,
        page_size: None,
        pixel_sink: true,
    }
}

struct Layer {
    /// Offscreen target when the level has opacity or a mask.
    pixmap: Option<Pixmap>,
    opacity: f32,
    mask: Option<(Brush, Matrix)>,
}

/// Sink painting flattened primitives into a pixmap.
struct PixmapCanvas {
    base: Pixmap,
    device: Transform,
    layers: Vec<Layer>,
    clips: Vec<Option<Mask>>,
    worlds: Vec<Matrix>,
}

impl PixmapCanvas {
    fn new(width: u32, height: u32, device: Transform) -> Result<Self> {
        let base = Pixmap::new(width, height)
            .ok_or_else(|| XpsError::Image(format!("cannot allocate {width}x{height} raster")))?;
        Ok(Self {
            base,
            device,
            layers: Vec::new(),
            clips: vec![None],
            worlds: vec![Matrix::IDENTITY],
        })
    }

    fn finish(self) -> Result<Pixmap> {
        if !self.layers.is_empty() {
            return Err(XpsError::InvalidInput("unbalanced raster layers".to_string()));
        }
        Ok(self.base)
    }

    fn world(&self) -> Matrix {
        self.worlds.last().copied().unwrap_or(Matrix::IDENTITY)
    }

    fn transform(&self) -> Transform {
        self.device.pre_concat(to_transform(self.world()))
    }

    fn size(&self) -> (u32, u32) {
        (self.base.width(), self.base.height())
    }

    /// Current target and clip, borrowed together.
    fn target(&mut self) -> (&mut Pixmap, Option<&Mask>) {
        let clip = self.clips.last().and_then(Option::as_ref);
        let target = self
            .layers
            .iter_mut()
            .rev()
            .find_map(|l| l.pixmap.as_mut())
            .unwrap_or(&mut self.base);
        (target, clip)
    }

    fn fill_path(&mut self, path: &Path, fill: &Brush, rule: FillRule) -> Result<()> {
        let transform = self.transform();
        let device_scale = transform_scale(transform);
        let source = PaintSource::new(fill, device_scale)?;
        let (width, height) = self.size();
        let (target, clip) = self.target();
        source.fill(target, clip, path, rule, transform, (width, height));
        Ok(())
    }

    fn stroke_path(&mut self, path: &Path, pen: &Pen) -> Result<()> {
        let Some(brush) = &pen.brush else {
            return Ok(());
        };
        let transform = self.transform();
        let source = PaintSource::new(brush, transform_scale(transform))?;
        let stroke = build_stroke(pen);
        let (target, clip) = self.target();
        if let Some(paint) = source.paint() {
            target.stroke_path(path, &paint, &stroke, transform, clip);
        }
        Ok(())
    }
}

impl PrimitiveSink for PixmapCanvas {
    fn push(&mut self, push: &Push, world: Matrix) -> Result<()> {
        let (width, height) = self.size();
        let mut clip = self.clips.last().cloned().flatten();
        if let Some(geometry) = &push.clip {
            let path_geometry = geometry.to_path();
            let transform = self.device.pre_concat(to_transform(world));
            let rule = fill_rule(path_geometry.fill_rule);
            let path = build_path(&path_geometry, true);
            let mask = match (clip.take(), path) {
                (Some(mut mask), Some(path)) => {
                    mask.intersect_path(&path, rule, true, transform);
                    Some(mask)
                }
                (None, Some(path)) => Mask::new(width, height).map(|mut mask| {
                    mask.fill_path(&path, rule, true, transform);
                    mask
                }),
                // An empty clip shows nothing.
                (_, None) => Mask::new(width, height),
            };
            clip = mask;
        }
        let offscreen = push.opacity < 1.0 || push.opacity_mask.is_some();
        let pixmap = if offscreen {
            Some(Pixmap::new(width, height).ok_or_else(|| {
                XpsError::Image(format!("cannot allocate {width}x{height} layer"))
            })?)
        } else {
            None
        };
        self.layers.push(Layer {
            pixmap,
            opacity: push.opacity as f32,
            mask: push.opacity_mask.clone().map(|brush| (brush, world)),
        });
        self.clips.push(clip);
        self.worlds.push(world);
        Ok(())
    }

    fn pop(&mut self) -> Result<()> {
        let layer = self
            .layers
            .pop()
            .ok_or_else(|| XpsError::InvalidInput("raster pop without push".to_string()))?;
        self.clips.pop();
        self.worlds.pop();
        let Some(mut pixmap) = layer.pixmap else {
            return Ok(());
        };
        if let Some((brush, world)) = &layer.mask {
            let mask = self.render_mask(brush, *world)?;
            pixmap.apply_mask(&mask);
        }
        let paint = PixmapPaint {
            opacity: layer.opacity.clamp(0.0, 1.0),
            quality: FilterQuality::Nearest,
            ..PixmapPaint::default()
        };
        let (target, _) = self.target();
        target.draw_pixmap(0, 0, pixmap.as_ref(), &paint, Transform::identity(), None);
        Ok(())
    }

    fn draw_geometry(
        &mut self,
        fill: Option<&Brush>,
        pen: Option<&Pen>,
        geometry: &Geometry,
    ) -> Result<()> {
        let path_geometry = geometry.to_path();
        if let Some(fill) = fill {
            if let Some(path) = build_path(&path_geometry, true) {
                self.fill_path(&path, fill, fill_rule(path_geometry.fill_rule))?;
            }
        }
        if let Some(pen) = pen {
            if let Some(path) = build_path(&path_geometry, false) {
                self.stroke_path(&path, pen)?;
            }
        }
        Ok(())
    }

    fn draw_glyph_run(&mut self, brush: &Brush, run: &GlyphRun) -> Result<()> {
        let Some(path) = glyph_run_path(run)? else {
            return Ok(());
        };
        self.fill_path(&path, brush, FillRule::Winding)
    }

    fn draw_image(&mut self, image: &Arc<Bitmap>, rect: Rect) -> Result<()> {
        let pixmap = pixmap_from_bitmap(image)?;
        let placement = Matrix::translate(rect.x, rect.y).mul(Matrix::scale(
            rect.width / image.width as f64,
            rect.height / image.height as f64,
        ));
        let transform = self.transform().pre_concat(to_transform(placement));
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let (target, clip) = self.target();
        target.draw_pixmap(0, 0, pixmap.as_ref(), &paint, transform, clip);
        Ok(())
    }
}

impl PixmapCanvas {
    /// Paints `brush` over the whole canvas and keeps its alpha.
    fn render_mask(&self, brush: &Brush, world: Matrix) -> Result<Mask> {
        let (width, height) = self.size();
        let transform = self.device.pre_concat(to_transform(world));
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| XpsError::Image(format!("cannot allocate {width}x{height} mask")))?;
        let device_rect = Rect::new(0.0, 0.0, width as f64, height as f64);
        let local = from_transform(transform)
            .invert()
            .map(|inv| inv.transform_rect(device_rect));
        if let Some(path) = local.and_then(rect_path) {
            let source = PaintSource::new(brush, transform_scale(transform))?;
            source.fill(
                &mut pixmap,
                None,
                &path,
                FillRule::Winding,
                transform,
                (width, height),
            );
        }
        Ok(Mask::from_pixmap(pixmap.as_ref(), MaskType::Alpha))
    }
}

/// Paint for one brush. Pattern brushes own their tile pixmap.
enum PaintSource {
    Shader(Shader<'static>),
    Pattern {
        pixmap: Pixmap,
        transform: Transform,
        spread: SpreadMode,
        opacity: f32,
        /// Local-space area outside of which a non-tiled brush paints nothing.
        bounds: Option<Rect>,
    },
}

impl PaintSource {
    fn new(brush: &Brush, device_scale: f64) -> Result<PaintSource> {
        Ok(match brush {
            Brush::Solid { color, opacity } => {
                PaintSource::Shader(Shader::SolidColor(to_sk_color(*color, *opacity as f32)))
            }
            Brush::LinearGradient(b) => {
                let shader = LinearGradient::new(
                    to_point(b.start),
                    to_point(b.end),
                    gradient_stops(&b.gradient),
                    spread_mode(b.gradient.spread),
                    gradient_transform(&b.gradient),
                );
                PaintSource::Shader(shader.unwrap_or_else(|| last_stop_color(&b.gradient)))
            }
            Brush::RadialGradient(b) => {
                let rx = b.radius_x.abs().max(1e-6);
                let ry = b.radius_y.abs().max(1e-6);
                // Circle of radius rx squeezed vertically around the center.
                let squeeze = Matrix::translate(b.center.x, b.center.y)
                    .mul(Matrix::scale(1.0, ry / rx))
                    .mul(Matrix::translate(-b.center.x, -b.center.y));
                let origin = squeeze
                    .invert()
                    .map(|inv| inv.apply(b.origin))
                    .unwrap_or(b.center);
                let transform = b
                    .gradient
                    .transform
                    .unwrap_or(Matrix::IDENTITY)
                    .mul(squeeze);
                let shader = RadialGradient::new(
                    to_point(origin),
                    to_point(b.center),
                    rx as f32,
                    gradient_stops(&b.gradient),
                    spread_mode(b.gradient.spread),
                    to_transform(transform),
                );
                PaintSource::Shader(shader.unwrap_or_else(|| last_stop_color(&b.gradient)))
            }
            Brush::Image(b) => image_pattern(b)?,
            Brush::Drawing(b) => drawing_pattern(b, device_scale)?,
            Brush::Visual(_) => {
                return Err(XpsError::InvalidInput(
                    "visual brush reached the rasterizer unreduced".to_string(),
                ));
            }
        })
    }

    fn paint(&self) -> Option<Paint<'_>> {
        let shader = match self {
            PaintSource::Shader(shader) => shader.clone(),
            PaintSource::Pattern {
                pixmap,
                transform,
                spread,
                opacity,
                ..
            } => Pattern::new(
                pixmap.as_ref(),
                *spread,
                FilterQuality::Bilinear,
                *opacity,
                *transform,
            ),
        };
        Some(Paint {
            shader,
            anti_alias: true,
            ..Paint::default()
        })
    }

    fn fill(
        &self,
        target: &mut Pixmap,
        clip: Option<&Mask>,
        path: &Path,
        rule: FillRule,
        transform: Transform,
        size: (u32, u32),
    ) {
        let Some(paint) = self.paint() else {
            return;
        };
        let bounded = match self {
            PaintSource::Pattern {
                bounds: Some(bounds),
                ..
            } => rect_path(*bounds).and_then(|area| {
                let mut mask = match clip {
                    Some(clip) => clip.clone(),
                    None => {
                        let mut full = Mask::new(size.0, size.1)?;
                        full.data_mut().fill(255);
                        full
                    }
                };
                mask.intersect_path(&area, FillRule::Winding, true, transform);
                Some(mask)
            }),
            _ => None,
        };
        target.fill_path(path, &paint, rule, transform, bounded.as_ref().or(clip));
    }
}

fn image_pattern(brush: &ImageBrush) -> Result<PaintSource> {
    let ImageSource::Bitmap(bitmap) = &brush.image else {
        return Err(XpsError::InvalidInput(
            "image brush reached the rasterizer unreduced".to_string(),
        ));
    };
    let pixmap = pixmap_from_bitmap(bitmap)?;
    let size = bitmap.size();
    let to_units = Matrix::scale(
        size.width / bitmap.width as f64,
        size.height / bitmap.height as f64,
    );
    Ok(tile_pattern(pixmap, &brush.tile, to_units))
}

fn drawing_pattern(brush: &DrawingBrush, device_scale: f64) -> Result<PaintSource> {
    let viewbox = brush.tile.viewbox.unwrap_or(brush.tile.viewport);
    let viewport = brush.tile.viewport;
    let longest = viewport.width.max(viewport.height) * device_scale;
    let scale = if longest > MAX_RASTER_SIDE {
        device_scale * MAX_RASTER_SIDE / longest
    } else {
        device_scale
    }
    .max(1e-3);
    let width = (viewport.width * scale).ceil().max(1.0) as u32;
    let height = (viewport.height * scale).ceil().max(1.0) as u32;
    // Tile pixels per viewbox unit.
    let kx = width as f64 / viewbox.width;
    let ky = height as f64 / viewbox.height;
    let device = Transform::from_row(
        kx as f32,
        0.0,
        0.0,
        ky as f32,
        (-viewbox.x * kx) as f32,
        (-viewbox.y * ky) as f32,
    );
    let mut canvas = PixmapCanvas::new(width, height, device)?;
    let scene = Scene::new();
    let mut guard = CycleGuard::new();
    {
        let mut f = Flattener::new(&mut canvas, pixel_context(&scene, None, 96.0), &mut guard);
        f.draw_drawing(&brush.drawing)?;
    }
    let pixmap = canvas.finish()?;
    // Tile pixels back to viewbox units.
    let to_units = Matrix::translate(viewbox.x, viewbox.y).mul(Matrix::scale(1.0 / kx, 1.0 / ky));
    Ok(tile_pattern(pixmap, &brush.tile, to_units))
}

/// Pattern painting `pixmap` through the tile's viewbox-to-viewport mapping.
/// `to_units` maps pixmap pixels into viewbox units.
fn tile_pattern(pixmap: Pixmap, tile: &TileParams, to_units: Matrix) -> PaintSource {
    let viewbox = tile.viewbox.unwrap_or(tile.viewport);
    let viewport = tile.viewport;
    let fit = Matrix::translate(viewport.x, viewport.y)
        .mul(Matrix::scale(
            viewport.width / viewbox.width,
            viewport.height / viewbox.height,
        ))
        .mul(Matrix::translate(-viewbox.x, -viewbox.y));
    let brush_transform = tile.transform.unwrap_or(Matrix::IDENTITY);
    let transform = brush_transform.mul(fit).mul(to_units);
    let (spread, bounds) = match tile.tile_mode {
        TileMode::None => (SpreadMode::Pad, Some(brush_transform.transform_rect(viewport))),
        TileMode::Tile => (SpreadMode::Repeat, None),
        TileMode::FlipX | TileMode::FlipY | TileMode::FlipXY => (SpreadMode::Reflect, None),
    };
    PaintSource::Pattern {
        pixmap,
        transform: to_transform(transform),
        spread,
        opacity: tile.opacity.clamp(0.0, 1.0) as f32,
        bounds,
    }
}

fn gradient_stops(gradient: &Gradient) -> Vec<GradientStop> {
    let opacity = gradient.opacity as f32;
    sort_gradient_stops(&gradient.stops)
        .into_iter()
        .filter(|stop| stop.offset.is_finite())
        .map(|stop| {
            GradientStop::new(
                stop.offset.clamp(0.0, 1.0) as f32,
                to_sk_color(stop.color, opacity),
            )
        })
        .collect()
}

fn last_stop_color(gradient: &Gradient) -> Shader<'static> {
    // Degenerate gradients paint their final color.
    let color = sort_gradient_stops(&gradient.stops)
        .into_iter()
        .filter(|stop| stop.offset.is_finite())
        .last()
        .map(|stop| to_sk_color(stop.color, gradient.opacity as f32))
        .unwrap_or(tiny_skia::Color::TRANSPARENT);
    Shader::SolidColor(color)
}

fn gradient_transform(gradient: &Gradient) -> Transform {
    to_transform(gradient.transform.unwrap_or(Matrix::IDENTITY))
}

fn spread_mode(spread: SpreadMethod) -> SpreadMode {
    match spread {
        SpreadMethod::Pad => SpreadMode::Pad,
        SpreadMethod::Reflect => SpreadMode::Reflect,
        SpreadMethod::Repeat => SpreadMode::Repeat,
    }
}

fn fill_rule(rule: PathFillRule) -> FillRule {
    match rule {
        PathFillRule::EvenOdd => FillRule::EvenOdd,
        PathFillRule::NonZero => FillRule::Winding,
    }
}

/// Builds a tiny-skia path. For fills, unfilled figures are skipped; for
/// strokes, unstroked segments become gaps.
fn build_path(geometry: &PathGeometry, for_fill: bool) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for figure in &geometry.without_arcs().figures {
        if for_fill && !figure.is_filled {
            continue;
        }
        if figure.segments.is_empty() {
            continue;
        }
        pb.move_to(figure.start.x as f32, figure.start.y as f32);
        let mut gaps = false;
        for segment in &figure.segments {
            if !for_fill && !segment.is_stroked {
                if let Some(end) = segment.end_point() {
                    pb.move_to(end.x as f32, end.y as f32);
                    gaps = true;
                }
                continue;
            }
            match &segment.kind {
                SegmentKind::Line(p) => pb.line_to(p.x as f32, p.y as f32),
                SegmentKind::PolyLine(points) => {
                    for p in points {
                        pb.line_to(p.x as f32, p.y as f32);
                    }
                }
                SegmentKind::Bezier(a, b, c) => cubic(&mut pb, [*a, *b, *c]),
                SegmentKind::PolyBezier(points) => {
                    for chunk in points.chunks_exact(3) {
                        cubic(&mut pb, [chunk[0], chunk[1], chunk[2]]);
                    }
                }
                SegmentKind::Quadratic(a, b) => {
                    pb.quad_to(a.x as f32, a.y as f32, b.x as f32, b.y as f32)
                }
                SegmentKind::PolyQuadratic(points) => {
                    for chunk in points.chunks_exact(2) {
                        pb.quad_to(
                            chunk[0].x as f32,
                            chunk[0].y as f32,
                            chunk[1].x as f32,
                            chunk[1].y as f32,
                        );
                    }
                }
                SegmentKind::Arc { end, .. } => pb.line_to(end.x as f32, end.y as f32),
            }
        }
        if figure.is_closed && (for_fill || !gaps) {
            pb.close();
        }
    }
    pb.finish()
}

fn cubic(pb: &mut PathBuilder, [a, b, c]: [crate::types::Point; 3]) {
    pb.cubic_to(
        a.x as f32, a.y as f32, b.x as f32, b.y as f32, c.x as f32, c.y as f32,
    );
}

fn rect_path(rect: Rect) -> Option<Path> {
    let rect = tiny_skia::Rect::from_xywh(
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    )?;
    Some(PathBuilder::from_rect(rect))
}

/// Outlines of every glyph in the run, positioned along the baseline.
fn glyph_run_path(run: &GlyphRun) -> Result<Option<Path>> {
    let face = run.font.face()?;
    let scale = (run.em_size / run.font.units_per_em() as f64) as f32;
    let rtl = run.is_right_to_left();
    let mut pen_x = run.origin.x;
    let mut pb = PathBuilder::new();
    for (i, glyph) in run.glyph_indices.iter().enumerate() {
        let advance = run.advance(i);
        if rtl {
            pen_x -= advance;
        }
        let offset = run.offsets.get(i).copied().unwrap_or_default();
        let mut builder = GlyphPathBuilder::new(
            (pen_x + offset.x) as f32,
            (run.origin.y - offset.y) as f32,
            scale,
        );
        if face.outline_glyph(GlyphId(*glyph), &mut builder).is_some() {
            if let Some(path) = builder.finish() {
                pb.push_path(&path);
            }
        }
        if !rtl {
            pen_x += advance;
        }
    }
    Ok(pb.finish())
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }

    // Font units are y-up; the page is y-down.
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn build_stroke(pen: &Pen) -> Stroke {
    let mut stroke = Stroke {
        width: pen.thickness.max(0.0) as f32,
        miter_limit: pen.miter_limit.max(1.0) as f32,
        ..Stroke::default()
    };
    stroke.line_cap = match pen.start_cap {
        LineCap::Round => tiny_skia::LineCap::Round,
        LineCap::Square => tiny_skia::LineCap::Square,
        LineCap::Flat | LineCap::Triangle => tiny_skia::LineCap::Butt,
    };
    stroke.line_join = match pen.line_join {
        LineJoin::Round => tiny_skia::LineJoin::Round,
        LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
        LineJoin::Miter => tiny_skia::LineJoin::Miter,
    };

    if let Some(dash) = &pen.dash {
        // Dash lengths are in multiples of the stroke thickness.
        let mut pattern: Vec<f32> = dash
            .dashes
            .iter()
            .map(|d| (d.abs() * pen.thickness) as f32)
            .collect();
        if pattern.len() % 2 == 1 {
            let copy = pattern.clone();
            pattern.extend(copy);
        }
        if pattern.len() >= 2 {
            stroke.dash = StrokeDash::new(pattern, (dash.offset * pen.thickness) as f32);
        }
    }

    stroke
}

fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    let a = (color.a * opacity).clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, a).unwrap_or(tiny_skia::Color::TRANSPARENT)
}

fn to_point(p: crate::types::Point) -> Point {
    Point::from_xy(p.x as f32, p.y as f32)
}

fn to_transform(m: Matrix) -> Transform {
    Transform::from_row(
        m.a as f32, m.b as f32, m.c as f32, m.d as f32, m.e as f32, m.f as f32,
    )
}

fn from_transform(t: Transform) -> Matrix {
    Matrix::new(
        t.sx as f64, t.ky as f64, t.kx as f64, t.sy as f64, t.tx as f64, t.ty as f64,
    )
}

fn transform_scale(t: Transform) -> f64 {
    let (sx, sy) = from_transform(t).scale_factors();
    sx.max(sy)
}

fn pixmap_from_bitmap(bitmap: &Bitmap) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(bitmap.width, bitmap.height).ok_or_else(|| {
        XpsError::Image(format!(
            "cannot allocate {}x{} image",
            bitmap.width, bitmap.height
        ))
    })?;
    for (src, dst) in bitmap
        .pixels
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Ok(pixmap)
}

fn bitmap_from_pixmap(pixmap: &Pixmap) -> Result<Bitmap> {
    let mut pixels = Vec::with_capacity(pixmap.pixels().len() * 4);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        pixels.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    Bitmap::from_rgba(pixmap.width(), pixmap.height(), pixels)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn apply_effect(pixmap: Pixmap, effect: Effect, kx: f64, ky: f64) -> Result<Pixmap> {
    let px_scale = (kx + ky) / 2.0;
    match effect {
        Effect::Blur { radius } => {
            let mut pixmap = pixmap;
            let (w, h) = (pixmap.width() as usize, pixmap.height() as usize);
            box_blur(pixmap.data_mut(), w, h, blur_box_radius(radius * px_scale));
            Ok(pixmap)
        }
        Effect::DropShadow {
            color,
            offset,
            blur_radius,
            opacity,
        } => {
            let mut shadow = pixmap.clone();
            let tint = to_sk_color(color, opacity as f32).premultiply().to_color_u8();
            for px in shadow.data_mut().chunks_exact_mut(4) {
                let a = px[3] as u16;
                px[0] = ((tint.red() as u16 * a + 127) / 255) as u8;
                px[1] = ((tint.green() as u16 * a + 127) / 255) as u8;
                px[2] = ((tint.blue() as u16 * a + 127) / 255) as u8;
                px[3] = ((tint.alpha() as u16 * a + 127) / 255) as u8;
            }
            let (w, h) = (shadow.width() as usize, shadow.height() as usize);
            box_blur(shadow.data_mut(), w, h, blur_box_radius(blur_radius * px_scale));
            let mut out = Pixmap::new(pixmap.width(), pixmap.height())
                .ok_or_else(|| XpsError::Image("cannot allocate shadow".to_string()))?;
            let paint = PixmapPaint::default();
            out.draw_pixmap(
                (offset.x * kx).round() as i32,
                (offset.y * ky).round() as i32,
                shadow.as_ref(),
                &paint,
                Transform::identity(),
                None,
            );
            out.draw_pixmap(0, 0, pixmap.as_ref(), &paint, Transform::identity(), None);
            Ok(out)
        }
    }
}

fn blur_box_radius(radius_px: f64) -> usize {
    if !(radius_px > 0.0) {
        return 0;
    }
    (radius_px / BLUR_PASSES as f64).round().max(1.0) as usize
}

/// Repeated box blur over premultiplied RGBA. Pixels outside are transparent.
fn box_blur(data: &mut [u8], width: usize, height: usize, radius: usize) {
    if radius == 0 || width == 0 || height == 0 {
        return;
    }
    // Passes run on floats so coverage is rounded once, not per pass.
    let mut pixels: Vec<[f32; 4]> = data
        .chunks_exact(4)
        .map(|px| [px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32])
        .collect();
    let mut scratch = Vec::new();
    for _ in 0..BLUR_PASSES {
        blur_lines(&mut pixels, width, height, radius, 1, width, &mut scratch);
        blur_lines(&mut pixels, height, width, radius, width, 1, &mut scratch);
    }
    for (out, px) in data.chunks_exact_mut(4).zip(&pixels) {
        let alpha = px[3].round().clamp(0.0, 255.0) as u8;
        for c in 0..3 {
            out[c] = (px[c].round().clamp(0.0, 255.0) as u8).min(alpha);
        }
        out[3] = alpha;
    }
}

/// One blur pass along `lines` runs of `len` pixels, `step` pixels apart,
/// with runs `stride` pixels apart.
fn blur_lines(
    pixels: &mut [[f32; 4]],
    len: usize,
    lines: usize,
    radius: usize,
    step: usize,
    stride: usize,
    scratch: &mut Vec<[f32; 4]>,
) {
    let window = (2 * radius + 1) as f32;
    for line in 0..lines {
        let base = line * stride;
        scratch.clear();
        scratch.extend((0..len).map(|i| pixels[base + i * step]));
        let mut sum = [0f32; 4];
        for px in scratch.iter().take(radius.min(len - 1) + 1) {
            for c in 0..4 {
                sum[c] += px[c];
            }
        }
        for i in 0..len {
            pixels[base + i * step] = sum.map(|s| (s / window).max(0.0));
            if let Some(entering) = scratch.get(i + radius + 1) {
                for c in 0..4 {
                    sum[c] += entering[c];
                }
            }
            if i >= radius {
                let leaving = scratch[i - radius];
                for c in 0..4 {
                    sum[c] -= leaving[c];
                }
            }
        }
    }
}
