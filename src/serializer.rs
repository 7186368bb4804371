//! Markup emission for one fixed page.
//!
//! [`PageSerializer`] receives flattened primitives and builds the
//! `FixedPage` element tree. Every pushed level opens a `Canvas`; on pop the
//! canvas is dropped when empty or hidden, and folded into its only child
//! when the level was marked as wrapping a single primitive.

use crate::brush::{
    Bitmap, Brush, DashStyle, ImageSource, LineCap, LineJoin, MappingMode, Pen, TileParams,
};
use crate::brush_markup::{
    BrushDictionary, image_brush_element, linear_gradient_element, radial_gradient_element,
    visual_brush_element,
};
use crate::cycle::CycleGuard;
use crate::error::{Result, XpsError};
use crate::flatten::{FlattenContext, Flattener, PrimitiveSink, Push};
use crate::font_cache::FontSubsetCache;
use crate::format::{self, NumberFormat, NumberWriter};
use crate::geometry::Geometry;
use crate::glyphs::glyphs_element;
use crate::limits::LimitTracker;
use crate::markup::{Element, Node};
use crate::metrics::PageMetrics;
use crate::path_markup::{PathUse, encode_path};
use crate::resources::{PackagingPolicy, ResourceTable};
use crate::scene::{Drawing, GlyphRun, Scene};
use crate::services::ServiceContext;
use crate::types::{EdgeMode, Matrix, Point, Rect, Size};
use crate::{PrecisionMode, SerializerOptions};
use std::sync::Arc;

pub const FIXED_PAGE_NAMESPACE: &str = "http://schemas.microsoft.com/xps/2005/06";
pub const RESOURCE_KEY_NAMESPACE: &str =
    "http://schemas.microsoft.com/xps/2005/06/resourcedictionary-key";

// Fill that keeps a hyperlink's hit area without painting.
const HIT_TEST_FILL: &str = "#00000000";

// Attributes a canvas moves onto its only child when it is folded away.
const CANVAS_STATE: [&str; 5] = ["RenderTransform", "Clip", "Opacity", "OpacityMask", "Name"];

/// A serialized page.
#[derive(Debug, Clone)]
pub struct PageOutput {
    pub uri: String,
    pub markup: String,
    pub metrics: PageMetrics,
}

/// Document-scoped collaborators a page borrows while it is written.
pub struct PageResources<'s> {
    pub package: &'s mut dyn PackagingPolicy,
    pub resources: &'s mut ResourceTable,
    pub fonts: &'s mut FontSubsetCache,
    pub services: &'s ServiceContext,
}

#[derive(Debug)]
struct Frame {
    element: Element,
    /// Local transform of the level.
    transform: Matrix,
    world: Matrix,
    format: NumberFormat,
    /// Format the level's own transform was written in.
    parent_format: NumberFormat,
    hyperlink: Option<String>,
    collapsible: bool,
    hidden: bool,
    /// Origin of a solid-filled glyph run written directly into this level.
    glyph_origin: Option<Point>,
}

impl Frame {
    fn root(element: Element, world: Matrix, format: NumberFormat) -> Self {
        Self {
            element,
            transform: Matrix::IDENTITY,
            world,
            format,
            parent_format: format,
            hyperlink: None,
            collapsible: false,
            hidden: false,
            glyph_origin: None,
        }
    }
}

pub struct PageSerializer<'s> {
    options: &'s SerializerOptions,
    package: &'s mut dyn PackagingPolicy,
    resources: &'s mut ResourceTable,
    fonts: &'s mut FontSubsetCache,
    services: &'s ServiceContext,
    page_size: Size,
    limits: LimitTracker,
    dictionary: BrushDictionary,
    frames: Vec<Frame>,
    /// Maps brush-content space to page space while a brush is rendered.
    base: Matrix,
    metrics: PageMetrics,
}

impl<'s> PageSerializer<'s> {
    pub fn new(options: &'s SerializerOptions, env: PageResources<'s>, page_size: Size) -> Self {
        let format = precision(options.precision, Matrix::IDENTITY);
        Self {
            options,
            package: env.package,
            resources: env.resources,
            fonts: env.fonts,
            services: env.services,
            page_size,
            limits: LimitTracker::new(),
            dictionary: BrushDictionary::new(options.target),
            frames: vec![Frame::root(Element::new("FixedPage"), Matrix::IDENTITY, format)],
            base: Matrix::IDENTITY,
            metrics: PageMetrics::default(),
        }
    }

    fn top(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| XpsError::InvalidInput("no open level".into()))
    }

    fn top_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| XpsError::InvalidInput("no open level".into()))
    }

    fn hidden(&self) -> bool {
        self.frames.last().is_some_and(|f| f.hidden)
    }

    fn format_for(&self, world: Matrix) -> NumberFormat {
        precision(self.options.precision, world)
    }

    /// Appends `el` to the innermost level, then any limit comments the
    /// write triggered.
    fn emit(&mut self, el: Element, glyph_origin: Option<Point>) -> Result<()> {
        self.limits.count_element();
        let pending = self.limits.take_pending();
        let frame = self.top_mut()?;
        frame.glyph_origin = glyph_origin;
        frame.element.push(el);
        for kind in pending {
            log::warn!("page exceeds the {} limit", kind.name());
            frame.element.push_comment(kind.marker());
        }
        Ok(())
    }

    fn flush_limit_comments(&mut self) -> Result<()> {
        let pending = self.limits.take_pending();
        if pending.is_empty() {
            return Ok(());
        }
        let frame = self.top_mut()?;
        for kind in pending {
            log::warn!("page exceeds the {} limit", kind.name());
            frame.element.push_comment(kind.marker());
        }
        Ok(())
    }

    /// Attribute value painting `brush`: a color for solid brushes, a
    /// dictionary reference otherwise. `None` when the brush paints nothing.
    fn brush_value(&mut self, brush: &Brush) -> Result<Option<String>> {
        let (format, world) = {
            let frame = self.top()?;
            (frame.format, frame.world)
        };
        let element = match brush {
            Brush::Solid { color, opacity } => {
                return Ok(Some(format::color(color.with_opacity(*opacity as f32))));
            }
            Brush::LinearGradient(gradient) => {
                let mut w = NumberWriter::new(format, &mut self.limits);
                linear_gradient_element(gradient, &mut w)
            }
            Brush::RadialGradient(gradient) => {
                let mut w = NumberWriter::new(format, &mut self.limits);
                radial_gradient_element(gradient, &mut w)
            }
            Brush::Image(image) => {
                let ImageSource::Bitmap(bitmap) = &image.image else {
                    return Err(XpsError::InvalidInput("image brush was not reduced to a bitmap".into()));
                };
                let source = self
                    .resources
                    .image_source(bitmap, &mut *self.package, self.services, &mut self.limits)?;
                let mut w = NumberWriter::new(format, &mut self.limits);
                image_brush_element(source, &image.tile, &mut w)
            }
            Brush::Drawing(drawing) => {
                let content_world = world.mul(tile_mapping(&drawing.tile));
                let Some(canvas) = self.render_drawing(&drawing.drawing, content_world)? else {
                    return Ok(None);
                };
                let mut w = NumberWriter::new(format, &mut self.limits);
                visual_brush_element(canvas, &drawing.tile, &mut w)
            }
            Brush::Visual(_) => {
                return Err(XpsError::InvalidInput("visual brush was not flattened".into()));
            }
        };
        let key = self.dictionary.intern(element, &mut self.limits)?;
        self.flush_limit_comments()?;
        Ok(Some(key))
    }

    /// Writes `drawing` into a detached canvas for a `VisualBrush`. `world`
    /// maps the drawing's space to the page and only steers precision.
    fn render_drawing(&mut self, drawing: &Drawing, world: Matrix) -> Result<Option<Element>> {
        let format = self.format_for(world);
        let saved_frames = std::mem::replace(
            &mut self.frames,
            vec![Frame::root(Element::new("Canvas"), world, format)],
        );
        let saved_base = std::mem::replace(&mut self.base, world);

        let services: &'s ServiceContext = self.services;
        let empty = Scene::new();
        let ctx = FlattenContext {
            scene: &empty,
            rasterizer: services.rasterizer(),
            raster_dpi: self.options.raster_dpi,
            page_size: None,
            pixel_sink: false,
        };
        let mut guard = CycleGuard::new();
        let result = Flattener::new(&mut *self, ctx, &mut guard).draw_drawing(drawing);

        self.base = saved_base;
        let frames = std::mem::replace(&mut self.frames, saved_frames);
        result?;
        if frames.len() != 1 {
            return Err(XpsError::InvalidInput("unbalanced levels in brush content".into()));
        }
        let canvas = frames.into_iter().next().map(|f| f.element);
        Ok(canvas.filter(Element::has_content))
    }

    fn stroke_attributes(&mut self, el: &mut Element, pen: &Pen) -> Result<bool> {
        let Some(brush) = &pen.brush else {
            return Ok(false);
        };
        let Some(stroke) = self.brush_value(brush)? else {
            return Ok(false);
        };
        let format = self.top()?.format;
        let mut w = NumberWriter::new(format, &mut self.limits);
        el.set_attr("Stroke", stroke);
        el.set_attr("StrokeThickness", w.num(pen.thickness));
        if let Some(DashStyle { dashes, offset }) = &pen.dash {
            let array: Vec<String> = dashes.iter().map(|d| w.num(*d)).collect();
            el.set_attr("StrokeDashArray", array.join(" "));
            if *offset != 0.0 {
                el.set_attr("StrokeDashOffset", w.num(*offset));
            }
            if pen.dash_cap != LineCap::Flat {
                el.set_attr("StrokeDashCap", line_cap(pen.dash_cap));
            }
        }
        if pen.start_cap != LineCap::Flat {
            el.set_attr("StrokeStartLineCap", line_cap(pen.start_cap));
        }
        if pen.end_cap != LineCap::Flat {
            el.set_attr("StrokeEndLineCap", line_cap(pen.end_cap));
        }
        match pen.line_join {
            LineJoin::Miter => {
                if pen.miter_limit != 10.0 {
                    el.set_attr("StrokeMiterLimit", w.num(pen.miter_limit.max(1.0)));
                }
            }
            LineJoin::Bevel => el.set_attr("StrokeLineJoin", "Bevel"),
            LineJoin::Round => el.set_attr("StrokeLineJoin", "Round"),
        }
        Ok(true)
    }

    /// Closes the page: adds the dictionary, writes the markup and commits
    /// it to the package.
    pub fn finish(mut self) -> Result<PageOutput> {
        if self.frames.len() != 1 {
            return Err(XpsError::InvalidInput("unbalanced levels at end of page".into()));
        }
        self.flush_limit_comments()?;
        let content = self.top()?.format;
        let mut w = NumberWriter::new(content, &mut self.limits);
        let mut page = Element::new("FixedPage")
            .with_attr("xmlns", FIXED_PAGE_NAMESPACE)
            .with_attr("xmlns:x", RESOURCE_KEY_NAMESPACE)
            .with_attr("Width", w.num(self.page_size.width))
            .with_attr("Height", w.num(self.page_size.height))
            .with_attr("xml:lang", "und");

        self.metrics.brush_resources = self.dictionary.len();
        let dictionary = std::mem::replace(&mut self.dictionary, BrushDictionary::new(self.options.target));
        if let Some(resources) = dictionary.into_element() {
            page.push(Element::new("FixedPage.Resources").with_child(resources));
        }
        let root = self.frames.pop().map(|f| f.element);
        page.children.extend(root.into_iter().flat_map(|r| r.children));

        let markup = page.to_xml()?;
        let uri = self.package.commit_page(&markup)?;
        self.metrics.elements = self.limits.element_count();
        self.metrics.limit_violations = self.limits.reported();
        self.metrics.markup_bytes = markup.len();
        log::debug!(
            "page {uri}: {} elements, {} brushes, {} bytes",
            self.metrics.elements,
            self.metrics.brush_resources,
            markup.len()
        );
        Ok(PageOutput {
            uri,
            markup,
            metrics: self.metrics,
        })
    }
}

impl PrimitiveSink for PageSerializer<'_> {
    fn push(&mut self, push: &Push, world: Matrix) -> Result<()> {
        let world = self.base.mul(world);
        let format = self.format_for(world);
        let (parent_format, parent_hidden, parent_link) = {
            let parent = self.top()?;
            (parent.format, parent.hidden, parent.hyperlink.clone())
        };
        let mut frame = Frame {
            element: Element::new("Canvas"),
            transform: push.transform,
            world,
            format,
            parent_format,
            hyperlink: push.hyperlink.clone().or(parent_link),
            collapsible: push.single_primitive && self.options.collapse_single_primitive,
            hidden: parent_hidden || !(push.opacity > 0.0),
            glyph_origin: None,
        };
        if frame.hidden {
            self.frames.push(frame);
            return Ok(());
        }

        if !push.transform.is_identity() {
            let mut w = NumberWriter::new(parent_format, &mut self.limits);
            frame.element.set_attr("RenderTransform", w.matrix(push.transform));
        }
        if let Some(clip) = &push.clip {
            let mut w = NumberWriter::new(format, &mut self.limits);
            match encode_path(&clip.to_path(), PathUse::CLIP, world, &mut w) {
                Some(data) => data.apply_to(&mut frame.element, "Clip"),
                None => frame.hidden = true,
            }
        }
        if push.opacity < 1.0 {
            let mut w = NumberWriter::new(format, &mut self.limits);
            frame.element.set_attr("Opacity", w.num(push.opacity));
        }
        if let Some(name) = &push.name {
            frame.element.set_attr("Name", name.clone());
        }
        if push.edge_mode == EdgeMode::Aliased {
            frame.element.set_attr("RenderOptions.EdgeMode", "Aliased");
        }
        self.frames.push(frame);

        // The mask is written in the level's own space.
        if let Some(mask) = &push.opacity_mask {
            match self.brush_value(mask)? {
                Some(value) => self.top_mut()?.element.set_attr("OpacityMask", value),
                None => self.top_mut()?.hidden = true,
            }
        }
        self.flush_limit_comments()
    }

    fn pop(&mut self) -> Result<()> {
        if self.frames.len() < 2 {
            return Err(XpsError::InvalidInput("pop without a matching push".into()));
        }
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        if frame.hidden || !frame.element.has_content() {
            return Ok(());
        }
        let element = match collapse(&frame) {
            Some(child) => {
                self.metrics.collapsed_frames += 1;
                child
            }
            None => {
                self.limits.count_element();
                self.metrics.canvases += 1;
                frame.element
            }
        };
        let pending = self.limits.take_pending();
        let parent = self.top_mut()?;
        parent.glyph_origin = None;
        parent.element.push(element);
        for kind in pending {
            parent.element.push_comment(kind.marker());
        }
        Ok(())
    }

    fn draw_geometry(
        &mut self,
        fill: Option<&Brush>,
        pen: Option<&Pen>,
        geometry: &Geometry,
    ) -> Result<()> {
        if self.hidden() {
            return Ok(());
        }
        let (format, world, hyperlink) = {
            let frame = self.top()?;
            (frame.format, frame.world, frame.hyperlink.clone())
        };
        if fill.is_none() && pen.is_none() && hyperlink.is_none() {
            return Ok(());
        }

        let mut el = Element::new("Path");
        let fill_value = match fill {
            Some(brush) => self.brush_value(brush)?,
            None => None,
        };
        let stroked = match pen {
            Some(pen) => self.stroke_attributes(&mut el, pen)?,
            None => false,
        };
        let filled = match fill_value {
            Some(value) => {
                el.set_attr("Fill", value);
                true
            }
            None if hyperlink.is_some() => {
                el.set_attr("Fill", HIT_TEST_FILL);
                true
            }
            None => false,
        };
        if !filled && !stroked {
            return Ok(());
        }
        if let Some(uri) = hyperlink {
            el.set_attr("FixedPage.NavigateUri", uri);
        }

        let mut w = NumberWriter::new(format, &mut self.limits);
        let Some(data) = encode_path(&geometry.to_path(), PathUse { filled, stroked }, world, &mut w)
        else {
            return self.flush_limit_comments();
        };
        data.apply_to(&mut el, "Data");
        self.metrics.paths += 1;
        self.emit(el, None)
    }

    fn draw_glyph_run(&mut self, brush: &Brush, run: &GlyphRun) -> Result<()> {
        if self.hidden() || run.glyph_indices.is_empty() {
            return Ok(());
        }
        let Some(fill) = self.brush_value(brush)? else {
            return Ok(());
        };
        let font_uri = self
            .fonts
            .reference(&run.font, &run.glyph_indices, &mut *self.package, &mut self.limits)?;
        let (format, hyperlink) = {
            let frame = self.top()?;
            (frame.format, frame.hyperlink.clone())
        };
        let mut w = NumberWriter::new(format, &mut self.limits);
        let mut el = glyphs_element(run, run.origin, &mut w);
        el.set_attr("Fill", fill);
        el.set_attr("FontUri", font_uri);
        if let Some(uri) = hyperlink {
            el.set_attr("FixedPage.NavigateUri", uri);
        }
        self.metrics.glyph_runs += 1;
        let solid = matches!(brush, Brush::Solid { .. });
        self.emit(el, solid.then_some(run.origin))
    }

    fn draw_image(&mut self, image: &Arc<Bitmap>, rect: Rect) -> Result<()> {
        if self.hidden() || !rect.is_renderable() {
            return Ok(());
        }
        let (format, world, hyperlink) = {
            let frame = self.top()?;
            (frame.format, frame.world, frame.hyperlink.clone())
        };
        let source = self
            .resources
            .image_source(image, &mut *self.package, self.services, &mut self.limits)?;
        let tile = TileParams {
            viewbox: Some(Rect::from_size(image.size())),
            viewport: rect,
            viewport_units: MappingMode::Absolute,
            ..TileParams::default()
        };
        let mut w = NumberWriter::new(format, &mut self.limits);
        let brush = image_brush_element(source, &tile, &mut w);
        let data = encode_path(
            &Geometry::rect(rect).to_path(),
            PathUse { filled: true, stroked: false },
            world,
            &mut w,
        );
        let fill = self.dictionary.intern(brush, &mut self.limits)?;

        let mut el = Element::new("Path").with_attr("Fill", fill);
        if let Some(uri) = hyperlink {
            el.set_attr("FixedPage.NavigateUri", uri);
        }
        let Some(data) = data else {
            return self.flush_limit_comments();
        };
        data.apply_to(&mut el, "Data");
        self.metrics.images += 1;
        self.emit(el, None)
    }
}

fn precision(mode: PrecisionMode, world: Matrix) -> NumberFormat {
    match mode {
        PrecisionMode::Adaptive => NumberFormat::for_scale(world.min_scale()),
        PrecisionMode::RoundTrip => NumberFormat::ROUND_TRIP,
    }
}

/// Maps a tile's viewbox onto its viewport, then applies its transform.
fn tile_mapping(tile: &TileParams) -> Matrix {
    let fit = match tile.viewbox {
        Some(vb) if vb.width > 0.0 && vb.height > 0.0 => {
            let sx = tile.viewport.width / vb.width;
            let sy = tile.viewport.height / vb.height;
            Matrix::new(sx, 0.0, 0.0, sy, tile.viewport.x - vb.x * sx, tile.viewport.y - vb.y * sy)
        }
        _ => Matrix::IDENTITY,
    };
    tile.transform.unwrap_or(Matrix::IDENTITY).mul(fit)
}

fn line_cap(cap: LineCap) -> &'static str {
    match cap {
        LineCap::Flat => "Flat",
        LineCap::Square => "Square",
        LineCap::Round => "Round",
        LineCap::Triangle => "Triangle",
    }
}

/// The only child of `frame` carrying the frame's state, when the frame can
/// be folded away.
fn collapse(frame: &Frame) -> Option<Element> {
    if !frame.collapsible || frame.element.has_attr("RenderOptions.EdgeMode") {
        return None;
    }
    let [Node::Element(child)] = frame.element.children.as_slice() else {
        return None;
    };
    if child.name.contains('.') || CANVAS_STATE.iter().any(|a| child.has_attr(a)) {
        return None;
    }
    let mut child = child.clone();

    if let Some(origin) = foldable_glyph_origin(frame, &child) {
        let dx = frame.transform.e;
        let dy = frame.transform.f;
        let mut limits = LimitTracker::new();
        let mut w = NumberWriter::new(frame.parent_format, &mut limits);
        child.set_attr("OriginX", w.num(origin.x + dx));
        child.set_attr("OriginY", w.num(origin.y + dy));
        return Some(child);
    }

    for key in CANVAS_STATE {
        if let Some(value) = frame.element.attr(key) {
            child.set_attr(key, value.to_string());
        }
    }
    Some(child)
}

/// A translated glyph run with a solid fill and no other level state can
/// carry the translation in its origin instead of a transform.
fn foldable_glyph_origin(frame: &Frame, child: &Element) -> Option<Point> {
    if child.name != "Glyphs" || !frame.transform.is_translation_only() {
        return None;
    }
    if ["Clip", "Opacity", "OpacityMask", "Name"]
        .iter()
        .any(|a| frame.element.has_attr(a))
    {
        return None;
    }
    frame.glyph_origin
}
