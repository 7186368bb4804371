use crate::error::{Result, XpsError};
use crate::scene::{Drawing, VisualId};
use crate::types::{Color, Matrix, Point, Rect, Size};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BRUSH_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a content-carrying brush, assigned at construction.
/// Clones share the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrushId(u64);

impl BrushId {
    pub fn next() -> Self {
        BrushId(NEXT_BRUSH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub color: Color,
    pub offset: f64,
}

impl GradientStop {
    pub fn new(offset: f64, color: Color) -> Self {
        Self { color, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpreadMethod {
    #[default]
    Pad,
    Reflect,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingMode {
    Absolute,
    #[default]
    RelativeToBoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorInterpolation {
    #[default]
    SRgb,
    ScRgb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub stops: Vec<GradientStop>,
    pub spread: SpreadMethod,
    pub mapping: MappingMode,
    pub interpolation: ColorInterpolation,
    pub opacity: f64,
    pub transform: Option<Matrix>,
}

impl Gradient {
    pub fn new(stops: Vec<GradientStop>) -> Self {
        Self {
            stops,
            spread: SpreadMethod::Pad,
            mapping: MappingMode::RelativeToBoundingBox,
            interpolation: ColorInterpolation::SRgb,
            opacity: 1.0,
            transform: None,
        }
    }

    /// The single color the gradient paints everywhere, if any.
    fn uniform_color(&self) -> Option<Color> {
        let first = self.stops.first()?.color;
        self.stops
            .iter()
            .all(|s| s.color.approx_eq(first, 1.0 / 512.0))
            .then_some(first)
    }

    fn is_invisible(&self) -> bool {
        self.stops.iter().all(|s| s.color.is_transparent())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradientBrush {
    pub gradient: Gradient,
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadialGradientBrush {
    pub gradient: Gradient,
    pub center: Point,
    pub origin: Point,
    pub radius_x: f64,
    pub radius_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileMode {
    #[default]
    None,
    Tile,
    FlipX,
    FlipY,
    FlipXY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stretch {
    None,
    #[default]
    Fill,
    Uniform,
    UniformToFill,
}

/// Placement shared by image, drawing, and visual brushes.
#[derive(Debug, Clone, PartialEq)]
pub struct TileParams {
    /// `None` uses the content bounds.
    pub viewbox: Option<Rect>,
    pub viewbox_units: MappingMode,
    pub viewport: Rect,
    pub viewport_units: MappingMode,
    pub tile_mode: TileMode,
    pub stretch: Stretch,
    pub opacity: f64,
    pub transform: Option<Matrix>,
}

impl Default for TileParams {
    fn default() -> Self {
        Self {
            viewbox: None,
            viewbox_units: MappingMode::Absolute,
            viewport: Rect::new(0.0, 0.0, 1.0, 1.0),
            viewport_units: MappingMode::RelativeToBoundingBox,
            tile_mode: TileMode::None,
            stretch: Stretch::Fill,
            opacity: 1.0,
            transform: None,
        }
    }
}

impl TileParams {
    fn needs_bounds(&self) -> bool {
        self.viewport_units == MappingMode::RelativeToBoundingBox
    }

    /// Absolute viewbox and viewport with the stretch folded in, given the
    /// content bounds and the bounds of the filled area. `None` when the
    /// tile cannot paint anything.
    pub fn resolve(&self, content: Rect, fill_bounds: Option<Rect>) -> Option<TileParams> {
        let viewbox = match self.viewbox {
            Some(vb) => resolve_relative(vb, self.viewbox_units, Some(content)),
            None => content,
        };
        let viewport = match self.viewport_units {
            MappingMode::Absolute => self.viewport,
            MappingMode::RelativeToBoundingBox => {
                resolve_relative(self.viewport, self.viewport_units, Some(fill_bounds?))
            }
        };
        if !viewbox.is_renderable() || !viewport.is_renderable() {
            return None;
        }
        let (viewbox, viewport) = apply_stretch(self.stretch, viewbox, viewport);
        Some(TileParams {
            viewbox: Some(viewbox),
            viewbox_units: MappingMode::Absolute,
            viewport,
            viewport_units: MappingMode::Absolute,
            stretch: Stretch::Fill,
            ..self.clone()
        })
    }
}

fn apply_stretch(stretch: Stretch, viewbox: Rect, viewport: Rect) -> (Rect, Rect) {
    let sx = viewport.width / viewbox.width;
    let sy = viewport.height / viewbox.height;
    match stretch {
        Stretch::Fill => (viewbox, viewport),
        Stretch::Uniform => {
            let s = sx.min(sy);
            (viewbox, centered(viewport, viewbox.width * s, viewbox.height * s))
        }
        Stretch::UniformToFill => {
            let s = sx.max(sy);
            (centered(viewbox, viewport.width / s, viewport.height / s), viewport)
        }
        Stretch::None => (viewbox, centered(viewport, viewbox.width, viewbox.height)),
    }
}

fn centered(outer: Rect, width: f64, height: f64) -> Rect {
    Rect::new(
        outer.x + (outer.width - width) / 2.0,
        outer.y + (outer.height - height) / 2.0,
        width,
        height,
    )
}

fn map_relative(bounds: Rect, p: Point) -> Point {
    Point::new(bounds.x + p.x * bounds.width, bounds.y + p.y * bounds.height)
}

pub(crate) fn resolve_relative(rect: Rect, units: MappingMode, bounds: Option<Rect>) -> Rect {
    match (units, bounds) {
        (MappingMode::RelativeToBoundingBox, Some(b)) => Rect::new(
            b.x + rect.x * b.width,
            b.y + rect.y * b.height,
            rect.width * b.width,
            rect.height * b.height,
        ),
        _ => rect,
    }
}

#[derive(Debug, Clone)]
pub struct ImageBrush {
    pub image: ImageSource,
    pub tile: TileParams,
}

#[derive(Debug, Clone)]
pub struct DrawingBrush {
    pub id: BrushId,
    pub drawing: Arc<Drawing>,
    pub tile: TileParams,
}

impl DrawingBrush {
    pub fn new(drawing: Arc<Drawing>, tile: TileParams) -> Self {
        Self {
            id: BrushId::next(),
            drawing,
            tile,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisualBrush {
    pub id: BrushId,
    pub visual: VisualId,
    pub tile: TileParams,
}

impl VisualBrush {
    pub fn new(visual: VisualId, tile: TileParams) -> Self {
        Self {
            id: BrushId::next(),
            visual,
            tile,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Brush {
    Solid { color: Color, opacity: f64 },
    LinearGradient(LinearGradientBrush),
    RadialGradient(RadialGradientBrush),
    Image(ImageBrush),
    Drawing(DrawingBrush),
    Visual(VisualBrush),
}

impl Brush {
    pub fn solid(color: Color) -> Self {
        Brush::Solid {
            color,
            opacity: 1.0,
        }
    }

    pub fn opacity(&self) -> f64 {
        match self {
            Brush::Solid { opacity, .. } => *opacity,
            Brush::LinearGradient(b) => b.gradient.opacity,
            Brush::RadialGradient(b) => b.gradient.opacity,
            Brush::Image(b) => b.tile.opacity,
            Brush::Drawing(b) => b.tile.opacity,
            Brush::Visual(b) => b.tile.opacity,
        }
    }

    /// Paints nothing regardless of content.
    pub fn is_invisible(&self) -> bool {
        let opacity = self.opacity();
        if !(opacity > 0.0) {
            return true;
        }
        match self {
            Brush::Solid { color, .. } => color.is_transparent(),
            Brush::LinearGradient(b) => b.gradient.is_invisible(),
            Brush::RadialGradient(b) => b.gradient.is_invisible(),
            Brush::Image(b) => !b.tile.viewport.is_renderable() && b.tile.viewport_units == MappingMode::Absolute,
            Brush::Drawing(b) => b.drawing.is_empty(),
            Brush::Visual(_) => false,
        }
    }

    /// Whether painting needs the bounds of the filled area.
    pub fn needs_bounds(&self) -> bool {
        match self {
            Brush::Solid { .. } => false,
            Brush::LinearGradient(b) => b.gradient.mapping == MappingMode::RelativeToBoundingBox,
            Brush::RadialGradient(b) => b.gradient.mapping == MappingMode::RelativeToBoundingBox,
            Brush::Image(b) => b.tile.needs_bounds(),
            Brush::Drawing(b) => b.tile.needs_bounds(),
            Brush::Visual(b) => b.tile.needs_bounds(),
        }
    }

    pub fn is_solid(&self) -> bool {
        matches!(self, Brush::Solid { .. })
    }

    /// Maps bounding-box relative gradient coordinates into absolute ones.
    /// Returns `None` when relative coordinates meet missing bounds.
    pub fn with_absolute_mapping(self, bounds: Option<Rect>) -> Option<Brush> {
        match self {
            Brush::LinearGradient(mut b)
                if b.gradient.mapping == MappingMode::RelativeToBoundingBox =>
            {
                let bounds = bounds?;
                b.start = map_relative(bounds, b.start);
                b.end = map_relative(bounds, b.end);
                b.gradient.mapping = MappingMode::Absolute;
                Some(Brush::LinearGradient(b))
            }
            Brush::RadialGradient(mut b)
                if b.gradient.mapping == MappingMode::RelativeToBoundingBox =>
            {
                let bounds = bounds?;
                b.center = map_relative(bounds, b.center);
                b.origin = map_relative(bounds, b.origin);
                b.radius_x *= bounds.width;
                b.radius_y *= bounds.height;
                b.gradient.mapping = MappingMode::Absolute;
                Some(Brush::RadialGradient(b))
            }
            other => Some(other),
        }
    }

    /// Collapses brushes that paint nothing to `None` and uniform gradients to
    /// a solid color. Content brushes are returned unchanged.
    pub fn simplified(&self) -> Option<Brush> {
        if self.is_invisible() {
            return None;
        }
        let gradient = match self {
            Brush::LinearGradient(b) => &b.gradient,
            Brush::RadialGradient(b) => &b.gradient,
            _ => return Some(self.clone()),
        };
        match gradient.uniform_color() {
            Some(color) => Some(Brush::Solid {
                color,
                opacity: gradient.opacity,
            }),
            None if gradient.stops.is_empty() => None,
            None => Some(self.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Flat,
    Square,
    Round,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Bevel,
    Round,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashStyle {
    pub dashes: Vec<f64>,
    pub offset: f64,
}

#[derive(Debug, Clone)]
pub struct Pen {
    pub brush: Option<Brush>,
    pub thickness: f64,
    pub dash: Option<DashStyle>,
    pub dash_cap: LineCap,
    pub start_cap: LineCap,
    pub end_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
}

impl Pen {
    pub fn new(brush: Brush, thickness: f64) -> Self {
        Self {
            brush: Some(brush),
            thickness,
            dash: None,
            dash_cap: LineCap::Square,
            start_cap: LineCap::Flat,
            end_cap: LineCap::Flat,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
        }
    }

    /// Strokes nothing: no brush, or a zero or non-finite thickness.
    pub fn is_invisible(&self) -> bool {
        !(self.thickness.is_finite() && self.thickness > 0.0)
            || self.brush.as_ref().is_none_or(Brush::is_invisible)
    }

    pub fn miter_limit_for_bounds(&self) -> Option<f64> {
        (self.line_join == LineJoin::Miter).then_some(self.miter_limit)
    }
}

/// ICC profile attached to a bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorContext {
    pub profile: Arc<Vec<u8>>,
}

impl ColorContext {
    pub fn new(profile: Vec<u8>) -> Self {
        Self {
            profile: Arc::new(profile),
        }
    }

    /// Content identity used to serialize each distinct profile once.
    pub fn identity(&self) -> String {
        hex_digest(&self.profile)
    }
}

/// Straight-alpha RGBA8 raster.
#[derive(Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub dpi_x: f64,
    pub dpi_y: f64,
    pub source_uri: Option<String>,
    pub color_context: Option<ColorContext>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dpi_x", &self.dpi_x)
            .field("dpi_y", &self.dpi_y)
            .field("source_uri", &self.source_uri)
            .finish()
    }
}

impl Bitmap {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected || width == 0 || height == 0 {
            return Err(XpsError::InvalidInput(format!(
                "bitmap {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            dpi_x: 96.0,
            dpi_y: 96.0,
            source_uri: None,
            color_context: None,
        })
    }

    pub fn from_encoded(data: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(data)?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(width, height, rgba.into_raw())
    }

    /// Decodes a `data:` URI carrying a PNG or JPEG payload.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let Some((header, payload)) = uri.strip_prefix("data:").and_then(|v| v.split_once(',')) else {
            return Err(XpsError::InvalidInput("not a data URI".to_string()));
        };
        let data = if header.contains(";base64") {
            base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map_err(|e| XpsError::Image(e.to_string()))?
        } else {
            payload.as_bytes().to_vec()
        };
        let mut bitmap = Self::from_encoded(&data)?;
        bitmap.source_uri = Some(uri.to_string());
        Ok(bitmap)
    }

    /// Size in 1/96 inch units.
    pub fn size(&self) -> Size {
        let dpi_x = if self.dpi_x > 0.0 { self.dpi_x } else { 96.0 };
        let dpi_y = if self.dpi_y > 0.0 { self.dpi_y } else { 96.0 };
        Size::new(
            self.width as f64 * 96.0 / dpi_x,
            self.height as f64 * 96.0 / dpi_y,
        )
    }

    pub fn has_alpha(&self) -> bool {
        self.pixels.chunks_exact(4).any(|px| px[3] != 255)
    }

    /// Key under which identical pixel content is embedded once.
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(&self.pixels);
        hex(&hasher.finalize())
    }
}

/// Image kinds the serializer cannot embed directly and must snapshot.
pub trait ImageSnapshot: fmt::Debug {
    fn size(&self) -> Size;
    fn snapshot(&self) -> Result<Bitmap>;
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Bitmap(Arc<Bitmap>),
    /// Vector content used as an image.
    Drawing(Arc<Drawing>),
    Snapshot(Arc<dyn ImageSnapshot>),
}

impl ImageSource {
    pub fn size(&self) -> Size {
        match self {
            ImageSource::Bitmap(b) => b.size(),
            ImageSource::Drawing(d) => d
                .bounds()
                .map(|r| Size::new(r.width, r.height))
                .unwrap_or(Size::new(0.0, 0.0)),
            ImageSource::Snapshot(s) => s.size(),
        }
    }
}

pub(crate) fn hex_digest(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
