mod arc;
mod brush;
mod brush_markup;
mod cycle;
mod error;
mod flatten;
mod font;
mod font_cache;
mod format;
mod geometry;
mod glyphs;
mod limits;
mod markup;
mod metrics;
mod path_markup;
mod raster;
mod resources;
mod scene;
mod serializer;
mod services;
mod subset;
mod types;
mod walk;

pub use arc::{ArcApproximation, ArcParams, arc_to_beziers};
pub use brush::{
    Bitmap, Brush, BrushId, ColorContext, ColorInterpolation, DashStyle, DrawingBrush, Gradient,
    GradientStop, ImageBrush, ImageSnapshot, ImageSource, LineCap, LineJoin, LinearGradientBrush,
    MappingMode, Pen, RadialGradientBrush, SpreadMethod, Stretch, TileMode, TileParams,
    VisualBrush,
};
pub use cycle::CycleGuard;
pub use error::{Result, XpsError};
pub use flatten::{FlattenContext, Flattener, PrimitiveSink, Push};
pub use font::{EmbeddingPermission, EmbeddingRights, FontFace};
pub use font_cache::{CommitPolicy, CommitSignal, FontSubsetCache};
pub use geometry::{FillRule, Geometry, PathFigure, PathGeometry, PathSegment, SegmentKind};
pub use limits::LimitKind;
pub use metrics::{DocumentMetrics, PageMetrics};
pub use raster::{RasterContent, RasterOutput, Rasterizer, SkiaRasterizer};
pub use resources::{
    MemoryPackage, PackagingPolicy, Part, Relationship, RelationshipKind, ResourceKind,
    ResourceStream,
};
pub use scene::{Drawing, DrawingGroup, Effect, GlyphRun, Scene, Visual, VisualId};
pub use serializer::PageOutput;
pub use services::{
    ColorContextSerializer, IccProfileSerializer, ImageEncoder, PngImageEncoder, ServiceContext,
};
pub use types::{Color, EdgeMode, Matrix, Point, Rect, Size, Vector};
pub use walk::Walker;

use resources::ResourceTable;
use serializer::{PageResources, PageSerializer};
use std::collections::HashSet;

/// Where the markup ends up; decides how brush resources are referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationTarget {
    /// Parts of one package: `{StaticResource b0}`.
    #[default]
    Package,
    /// Standalone files: `{DynamicResource b0}`.
    LooseFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecisionMode {
    /// Digits follow the on-page scale of each level.
    #[default]
    Adaptive,
    /// Shortest text that parses back to the same value.
    RoundTrip,
}

#[derive(Debug, Clone)]
pub struct SerializerOptions {
    pub target: SerializationTarget,
    pub font_commit: CommitPolicy,
    /// Resolution for content that has to be rasterized.
    pub raster_dpi: f64,
    pub collapse_single_primitive: bool,
    pub elide_root_background: bool,
    pub precision: PrecisionMode,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            target: SerializationTarget::Package,
            font_commit: CommitPolicy::document(),
            raster_dpi: 96.0,
            collapse_single_primitive: true,
            elide_root_background: true,
            precision: PrecisionMode::Adaptive,
        }
    }
}

/// Writes scenes as fixed pages into a package.
///
/// One serializer covers a document sequence. Pages go between
/// [`begin_document`](Self::begin_document) and
/// [`end_document`](Self::end_document); fonts are committed according to
/// [`SerializerOptions::font_commit`]. An error leaves the current document
/// unusable.
pub struct XpsSerializer<P: PackagingPolicy> {
    options: SerializerOptions,
    services: ServiceContext,
    package: P,
    resources: ResourceTable,
    fonts: FontSubsetCache,
    names: HashSet<String>,
    metrics: DocumentMetrics,
    in_document: bool,
}

#[derive(Debug)]
pub struct XpsSerializerBuilder {
    options: SerializerOptions,
    services: ServiceContext,
}

impl Default for XpsSerializerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl XpsSerializerBuilder {
    pub fn new() -> Self {
        Self {
            options: SerializerOptions::default(),
            services: ServiceContext::default(),
        }
    }

    pub fn options(mut self, options: SerializerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(mut self, target: SerializationTarget) -> Self {
        self.options.target = target;
        self
    }

    pub fn font_commit(mut self, policy: CommitPolicy) -> Self {
        self.options.font_commit = policy;
        self
    }

    pub fn raster_dpi(mut self, dpi: f64) -> Self {
        self.options.raster_dpi = dpi;
        self
    }

    pub fn collapse_single_primitive(mut self, enabled: bool) -> Self {
        self.options.collapse_single_primitive = enabled;
        self
    }

    // A white page-sized rectangle at the root adds nothing to a white page.
    pub fn elide_root_background(mut self, enabled: bool) -> Self {
        self.options.elide_root_background = enabled;
        self
    }

    pub fn precision(mut self, precision: PrecisionMode) -> Self {
        self.options.precision = precision;
        self
    }

    pub fn services(mut self, services: ServiceContext) -> Self {
        self.services = services;
        self
    }

    pub fn build<P: PackagingPolicy>(self, package: P) -> Result<XpsSerializer<P>> {
        if !self.options.raster_dpi.is_finite() || self.options.raster_dpi <= 0.0 {
            return Err(XpsError::InvalidInput(format!(
                "raster_dpi must be positive, got {}",
                self.options.raster_dpi
            )));
        }
        Ok(XpsSerializer {
            fonts: FontSubsetCache::new(self.options.font_commit),
            options: self.options,
            services: self.services,
            package,
            resources: ResourceTable::new(),
            names: HashSet::new(),
            metrics: DocumentMetrics::default(),
            in_document: false,
        })
    }
}

impl<P: PackagingPolicy> XpsSerializer<P> {
    /// Serializer with default options and services.
    pub fn new(package: P) -> Result<Self> {
        XpsSerializerBuilder::new().build(package)
    }

    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    pub fn begin_document(&mut self) -> Result<()> {
        if self.in_document {
            return Err(XpsError::InvalidInput("a document is already open".into()));
        }
        self.package.begin_document()?;
        self.resources.clear();
        self.names.clear();
        self.metrics = DocumentMetrics::default();
        self.in_document = true;
        Ok(())
    }

    /// Writes the tree under `root` as the next page of the open document,
    /// opening one first if needed.
    pub fn serialize_page(&mut self, scene: &Scene, root: VisualId, page_size: Size) -> Result<PageOutput> {
        if !page_size.is_valid_page() {
            return Err(XpsError::InvalidInput(format!(
                "page size must be positive and finite, got {}x{}",
                page_size.width, page_size.height
            )));
        }
        scene.get(root)?;
        if !self.in_document {
            self.begin_document()?;
        }

        let commits_before = self.fonts.commits();
        let env = PageResources {
            package: &mut self.package,
            resources: &mut self.resources,
            fonts: &mut self.fonts,
            services: &self.services,
        };
        let mut sink = PageSerializer::new(&self.options, env, page_size);
        let ctx = FlattenContext {
            scene,
            rasterizer: self.services.rasterizer(),
            raster_dpi: self.options.raster_dpi,
            page_size: Some(page_size),
            pixel_sink: false,
        };
        let mut guard = CycleGuard::new();
        let rasterized = {
            let mut flattener = Flattener::new(&mut sink, ctx, &mut guard);
            Walker::for_page(&mut self.names, self.options.elide_root_background)
                .walk(&mut flattener, root)?;
            flattener.rasterized_count()
        };
        let mut output = sink.finish()?;

        self.resources.end_page();
        self.fonts.signal(CommitSignal::Page, &mut self.package)?;
        // Includes whole fonts written while the page was drawn.
        self.metrics.font_commits += self.fonts.commits() - commits_before;

        output.metrics.page_number = self.metrics.pages.len() + 1;
        output.metrics.rasterized_visuals = rasterized;
        self.metrics.record_page(output.metrics.clone());
        log::debug!("page {} written to {}", output.metrics.page_number, output.uri);
        Ok(output)
    }

    /// Closes the open document and returns its metrics.
    pub fn end_document(&mut self) -> Result<DocumentMetrics> {
        if !self.in_document {
            return Err(XpsError::InvalidInput("no open document".into()));
        }
        self.in_document = false;
        let committed = self.fonts.signal(CommitSignal::Document, &mut self.package)?;
        self.metrics.font_commits += committed;
        self.package.end_document()?;
        self.resources.clear();
        self.names.clear();
        Ok(std::mem::take(&mut self.metrics))
    }

    /// Ends the document sequence, closing an open document first. Returns
    /// the number of font parts written by the final signal.
    pub fn end_sequence(&mut self) -> Result<usize> {
        if self.in_document {
            self.end_document()?;
        }
        self.fonts.signal(CommitSignal::Sequence, &mut self.package)
    }

    /// Reading fixed-page markup back into a scene is not supported.
    pub fn fixed_page_to_visual(&self, _markup: &str) -> Result<Scene> {
        Err(XpsError::NotImplemented("fixed page to visual conversion"))
    }

    /// Metrics of the open document so far.
    pub fn metrics(&self) -> &DocumentMetrics {
        &self.metrics
    }

    pub fn package(&self) -> &P {
        &self.package
    }

    pub fn into_package(self) -> P {
        self.package
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::testing::face;
    use crate::resources::OBFUSCATED_FONT_CONTENT_TYPE;
    use std::sync::Arc;

    fn red() -> Brush {
        Brush::solid(Color::rgb(1.0, 0.0, 0.0))
    }

    fn one_visual(visual: Visual) -> (Scene, VisualId) {
        let mut scene = Scene::new();
        let root = scene.add(visual);
        (scene, root)
    }

    fn serialize(scene: &Scene, root: VisualId) -> PageOutput {
        let mut serializer = XpsSerializer::new(MemoryPackage::new()).unwrap();
        serializer.serialize_page(scene, root, Size::letter()).unwrap()
    }

    fn elements<'a>(doc: &'a roxmltree::Document<'a>, name: &str) -> Vec<roxmltree::Node<'a, 'a>> {
        doc.descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == name)
            .collect()
    }

    fn gradient(stops: usize) -> Brush {
        let colors = [Color::rgb(1.0, 0.0, 0.0), Color::rgb(0.0, 0.0, 1.0)];
        let stops = (0..stops)
            .map(|i| GradientStop::new(i as f64 / stops.max(2) as f64, colors[i % 2]))
            .collect();
        let mut gradient = Gradient::new(stops);
        gradient.mapping = MappingMode::Absolute;
        Brush::LinearGradient(LinearGradientBrush {
            gradient,
            start: Point::new(0.0, 0.0),
            end: Point::new(100.0, 0.0),
        })
    }

    #[test]
    fn single_rectangle_becomes_one_path() {
        let (scene, root) = one_visual(Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(10.0, 10.0, 50.0, 50.0)),
            red(),
        )));
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let page = doc.root_element();
        assert_eq!(page.tag_name().name(), "FixedPage");
        assert_eq!(page.attribute("Width"), Some("816"));
        assert_eq!(page.attribute("Height"), Some("1056"));

        let paths = elements(&doc, "Path");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].attribute("Fill"), Some("#FFFF0000"));
        assert!(paths[0].attribute("RenderTransform").is_none());
        assert!(paths[0].attribute("Clip").is_none());
        assert!(elements(&doc, "Canvas").is_empty());
        assert_eq!(output.metrics.elements, 1);
        assert_eq!(output.metrics.collapsed_frames, 1);
        assert!(output.metrics.limit_violations.is_empty());
        assert!(!output.markup.contains("XPSLimit"));
    }

    #[test]
    fn transparent_mask_writes_nothing() {
        let mut visual = Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(0.0, 0.0, 50.0, 50.0)),
            red(),
        ));
        visual.opacity_mask = Some(Brush::solid(Color::TRANSPARENT));
        let (scene, root) = one_visual(visual);
        let output = serialize(&scene, root);
        assert_eq!(output.metrics.elements, 0);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        assert_eq!(doc.root_element().children().filter(|n| n.is_element()).count(), 0);
    }

    #[test]
    fn identical_brushes_are_interned_once() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        for x in [0.0, 200.0] {
            let content = Drawing::fill(Geometry::rect(Rect::new(x, 0.0, 100.0, 100.0)), gradient(2));
            scene.add_child(root, Visual::with_content(content)).unwrap();
        }
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let dictionary = elements(&doc, "ResourceDictionary");
        assert_eq!(dictionary.len(), 1);
        assert_eq!(dictionary[0].children().filter(|n| n.is_element()).count(), 1);
        let fills: Vec<_> = elements(&doc, "Path")
            .iter()
            .filter_map(|p| p.attribute("Fill"))
            .collect();
        assert_eq!(fills, vec!["{StaticResource b0}", "{StaticResource b0}"]);
        assert_eq!(output.metrics.brush_resources, 1);
    }

    #[test]
    fn loose_files_reference_dynamically() {
        let (scene, root) = one_visual(Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(0.0, 0.0, 100.0, 100.0)),
            gradient(2),
        )));
        let mut serializer = XpsSerializerBuilder::new()
            .target(SerializationTarget::LooseFiles)
            .build(MemoryPackage::new())
            .unwrap();
        let output = serializer.serialize_page(&scene, root, Size::letter()).unwrap();
        assert!(output.markup.contains("{DynamicResource b0}"));
    }

    #[test]
    fn self_painting_visual_brush_terminates() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        let brush = Brush::Visual(VisualBrush::new(root, TileParams::default()));
        let content = DrawingGroup::new(vec![
            Drawing::fill(Geometry::rect(Rect::new(0.0, 0.0, 20.0, 20.0)), red()),
            Drawing::fill(Geometry::rect(Rect::new(30.0, 0.0, 20.0, 20.0)), brush),
        ]);
        scene.get_mut(root).unwrap().content = Some(Drawing::Group(content));

        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        assert_eq!(elements(&doc, "VisualBrush").len(), 1);
        assert!(elements(&doc, "Path").len() >= 2);
    }

    #[test]
    fn document_font_policy_links_pages_and_commits_once() {
        let font = face(0);
        let mut scene = Scene::new();
        let root = scene.add(Visual::with_content(Drawing::GlyphRun {
            brush: Some(Brush::solid(Color::BLACK)),
            run: GlyphRun::new(font.clone(), 12.0, Point::new(72.0, 72.0), vec![1, 2]),
        }));
        let mut serializer = XpsSerializer::new(MemoryPackage::new()).unwrap();
        serializer.begin_document().unwrap();
        let pages: Vec<String> = (0..3)
            .map(|_| serializer.serialize_page(&scene, root, Size::letter()).unwrap().uri)
            .collect();
        let fonts = |p: &MemoryPackage| {
            p.part_names()
                .filter(|n| p.part(n).is_some_and(|part| part.content_type == OBFUSCATED_FONT_CONTENT_TYPE))
                .count()
        };
        assert_eq!(fonts(serializer.package()), 0);
        let metrics = serializer.end_document().unwrap();
        assert_eq!(metrics.font_commits, 1);
        assert_eq!(metrics.pages.len(), 3);

        let package = serializer.into_package();
        assert_eq!(fonts(&package), 1);
        for page in &pages {
            let links = package
                .relationships(page)
                .iter()
                .filter(|r| r.kind == RelationshipKind::RequiredResource)
                .count();
            assert_eq!(links, 1);
        }
    }

    #[test]
    fn whole_font_is_written_before_the_document_ends() {
        const NO_SUBSETTING: u16 = 0x0100;
        let mut scene = Scene::new();
        let root = scene.add(Visual::with_content(Drawing::GlyphRun {
            brush: Some(Brush::solid(Color::BLACK)),
            run: GlyphRun::new(face(NO_SUBSETTING), 12.0, Point::new(72.0, 72.0), vec![1, 2]),
        }));
        let fonts = |p: &MemoryPackage| p.part_names().filter(|n| n.ends_with(".odttf")).count();
        for policy in [CommitPolicy::document(), CommitPolicy::page()] {
            let mut serializer = XpsSerializerBuilder::new()
                .font_commit(policy)
                .build(MemoryPackage::new())
                .unwrap();
            serializer.serialize_page(&scene, root, Size::letter()).unwrap();
            assert_eq!(fonts(serializer.package()), 1);
            serializer.serialize_page(&scene, root, Size::letter()).unwrap();
            serializer.serialize_page(&scene, root, Size::letter()).unwrap();
            let metrics = serializer.end_document().unwrap();
            assert_eq!(metrics.font_commits, 1);
            assert_eq!(fonts(serializer.package()), 1);
        }
    }

    #[test]
    fn translated_glyph_run_folds_into_origin() {
        let mut visual = Visual::with_content(Drawing::GlyphRun {
            brush: Some(Brush::solid(Color::BLACK)),
            run: GlyphRun::new(face(0), 10.0, Point::new(5.0, 20.0), vec![1]),
        });
        visual.transform = Matrix::translate(100.0, 50.0);
        let (scene, root) = one_visual(visual);
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let glyphs = elements(&doc, "Glyphs");
        assert_eq!(glyphs.len(), 1);
        assert_eq!(glyphs[0].attribute("OriginX"), Some("105"));
        assert_eq!(glyphs[0].attribute("OriginY"), Some("70"));
        assert!(glyphs[0].attribute("RenderTransform").is_none());
        assert!(glyphs[0].attribute("FontUri").is_some_and(|u| u.ends_with(".odttf")));
    }

    #[test]
    fn multi_child_levels_keep_their_canvas() {
        let mut scene = Scene::new();
        let mut parent = Visual::default();
        parent.transform = Matrix::scale(2.0, 2.0);
        parent.opacity = 0.5;
        let root = scene.add(parent);
        for x in [0.0, 40.0] {
            let content = Drawing::fill(Geometry::rect(Rect::new(x, 0.0, 20.0, 20.0)), red());
            scene.add_child(root, Visual::with_content(content)).unwrap();
        }
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let canvases = elements(&doc, "Canvas");
        assert_eq!(canvases.len(), 1);
        assert_eq!(canvases[0].attribute("RenderTransform"), Some("2,0,0,2,0,0"));
        assert_eq!(canvases[0].attribute("Opacity"), Some("0.5"));
        assert_eq!(elements(&doc, "Path").len(), 2);
        assert_eq!(output.metrics.elements, 3);
    }

    #[test]
    fn hyperlink_keeps_hit_area() {
        let mut visual = Visual::with_content(Drawing::Geometry {
            brush: None,
            pen: None,
            geometry: Geometry::rect(Rect::new(0.0, 0.0, 30.0, 10.0)),
        });
        visual.hyperlink = Some("https://example.com/".into());
        let (scene, root) = one_visual(visual);
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let paths = elements(&doc, "Path");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].attribute("Fill"), Some("#00000000"));
        assert_eq!(paths[0].attribute("FixedPage.NavigateUri"), Some("https://example.com/"));
    }

    #[test]
    fn stroke_attributes_are_written() {
        let mut pen = Pen::new(red(), 2.0);
        pen.dash = Some(DashStyle { dashes: vec![3.0, 1.0], offset: 0.0 });
        pen.line_join = LineJoin::Round;
        pen.end_cap = LineCap::Round;
        let (scene, root) = one_visual(Visual::with_content(Drawing::Geometry {
            brush: None,
            pen: Some(pen),
            geometry: Geometry::rect(Rect::new(10.0, 10.0, 30.0, 30.0)),
        }));
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let path = elements(&doc, "Path")[0];
        assert_eq!(path.attribute("Stroke"), Some("#FFFF0000"));
        assert_eq!(path.attribute("StrokeThickness"), Some("2"));
        assert_eq!(path.attribute("StrokeDashArray"), Some("3 1"));
        assert_eq!(path.attribute("StrokeLineJoin"), Some("Round"));
        assert_eq!(path.attribute("StrokeEndLineCap"), Some("Round"));
        assert!(path.attribute("Fill").is_none());
    }

    #[test]
    fn images_are_written_once_per_document() {
        let bitmap = Arc::new(Bitmap::from_rgba(2, 2, vec![255; 16]).unwrap());
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        for x in [0.0, 100.0] {
            let content = Drawing::Image {
                image: ImageSource::Bitmap(bitmap.clone()),
                rect: Rect::new(x, 0.0, 50.0, 50.0),
            };
            scene.add_child(root, Visual::with_content(content)).unwrap();
        }
        let mut serializer = XpsSerializer::new(MemoryPackage::new()).unwrap();
        let first = serializer.serialize_page(&scene, root, Size::letter()).unwrap();
        let second = serializer.serialize_page(&scene, root, Size::letter()).unwrap();
        assert_eq!(first.metrics.images, 2);
        assert!(first.markup.contains("ImageBrush"));
        let package = serializer.package();
        let images = package.part_names().filter(|n| n.ends_with(".png")).count();
        assert_eq!(images, 1);
        assert_eq!(package.relationships(&first.uri).len(), 1);
        assert_eq!(package.relationships(&second.uri).len(), 1);
    }

    #[test]
    fn stop_limit_leaves_a_comment() {
        let (scene, root) = one_visual(Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(0.0, 0.0, 100.0, 100.0)),
            gradient(150),
        )));
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let comments: Vec<_> = doc
            .descendants()
            .filter(|n| n.is_comment())
            .filter_map(|n| n.text())
            .collect();
        assert_eq!(comments, vec!["XPSLimit:GradientStopCount"]);
        assert_eq!(output.metrics.limit_violations, vec![LimitKind::GradientStopCount]);
    }

    #[test]
    fn duplicate_names_are_dropped_within_a_document() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        for x in [0.0, 40.0] {
            let mut child = Visual::with_content(Drawing::fill(
                Geometry::rect(Rect::new(x, 0.0, 20.0, 20.0)),
                red(),
            ));
            child.name = Some("Box".into());
            scene.add_child(root, child).unwrap();
        }
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let named = elements(&doc, "Path")
            .iter()
            .filter(|p| p.attribute("Name") == Some("Box"))
            .count();
        assert_eq!(named, 1);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let (scene, root) = one_visual(Visual::default());
        let mut serializer = XpsSerializer::new(MemoryPackage::new()).unwrap();
        assert!(matches!(
            serializer.serialize_page(&scene, root, Size::new(0.0, 100.0)),
            Err(XpsError::InvalidInput(_))
        ));
        assert!(matches!(
            serializer.fixed_page_to_visual("<FixedPage/>"),
            Err(XpsError::NotImplemented(_))
        ));
        assert!(serializer.end_document().is_err());
        assert!(XpsSerializerBuilder::new().raster_dpi(0.0).build(MemoryPackage::new()).is_err());
    }

    #[test]
    fn precision_follows_on_page_scale() {
        let mut scene = Scene::new();
        let root = scene.add(Visual::default());
        let mut magnified = Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(0.123456, 0.0, 0.5, 0.5)),
            red(),
        ));
        magnified.transform = Matrix::scale(1000.0, 1000.0);
        scene.add_child(root, magnified).unwrap();
        let mut reduced = Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(1234.5678, 0.0, 1000.0, 1000.0)),
            red(),
        ));
        reduced.transform = Matrix::scale(0.05, 0.05);
        scene.add_child(root, reduced).unwrap();

        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        let data = |transform: &str| {
            elements(&doc, "Path")
                .into_iter()
                .find(|p| p.attribute("RenderTransform") == Some(transform))
                .and_then(|p| p.attribute("Data"))
                .map(str::to_string)
                .unwrap()
        };
        assert!(data("1000,0,0,1000,0,0").contains("0.123456"));
        let coarse = data("0.05,0,0,0.05,0,0");
        assert!(coarse.contains("1234.6"));
        assert!(!coarse.contains("1234.57"));
    }

    #[test]
    fn level_with_only_a_verbose_clip_is_dropped() {
        let mut clip = Geometry::rect(Rect::new(0.0, 0.0, 50.0, 50.0)).to_path();
        let mut open = PathFigure::new(Point::new(0.0, 0.0));
        open.segments.push(PathSegment::new(SegmentKind::Line(Point::new(40.0, 40.0))));
        open.is_filled = false;
        clip.figures.push(open);
        let mut visual = Visual::with_content(Drawing::Geometry {
            brush: None,
            pen: None,
            geometry: Geometry::rect(Rect::new(0.0, 0.0, 30.0, 30.0)),
        });
        visual.clip = Some(Geometry::Path(clip));
        let (scene, root) = one_visual(visual);
        let output = serialize(&scene, root);
        let doc = roxmltree::Document::parse(&output.markup).unwrap();
        assert!(elements(&doc, "Canvas").is_empty());
        assert!(elements(&doc, "Canvas.Clip").is_empty());
        assert_eq!(output.metrics.elements, 0);
    }

    #[test]
    fn round_trip_precision_keeps_every_digit() {
        let (scene, root) = one_visual(Visual::with_content(Drawing::fill(
            Geometry::rect(Rect::new(0.1234567891, 0.0, 10.0, 10.0)),
            red(),
        )));
        let mut serializer = XpsSerializerBuilder::new()
            .precision(PrecisionMode::RoundTrip)
            .build(MemoryPackage::new())
            .unwrap();
        let output = serializer.serialize_page(&scene, root, Size::letter()).unwrap();
        assert!(output.markup.contains("0.1234567891"));
    }
}
