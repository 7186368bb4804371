//! Pluggable collaborators used while serializing.

use crate::brush::{Bitmap, ColorContext};
use crate::error::{Result, XpsError};
use crate::raster::{Rasterizer, SkiaRasterizer};
use crate::resources::{ICC_CONTENT_TYPE, PackagingPolicy, ResourceKind, write_resource};
use std::io::Write;

/// Encodes bitmaps into an image part format.
pub trait ImageEncoder {
    fn extension(&self) -> &'static str;
    fn content_type(&self) -> &'static str;
    fn encode(&self, bitmap: &Bitmap, out: &mut dyn Write) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PngImageEncoder;

impl ImageEncoder for PngImageEncoder {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn content_type(&self) -> &'static str {
        "image/png"
    }

    fn encode(&self, bitmap: &Bitmap, out: &mut dyn Write) -> Result<()> {
        use image::ColorType;
        use image::ImageEncoder as _;
        use image::codecs::png::PngEncoder;

        let encoder = PngEncoder::new(out);
        encoder.write_image(
            &bitmap.pixels,
            bitmap.width,
            bitmap.height,
            ColorType::Rgba8.into(),
        )?;
        Ok(())
    }
}

/// Writes a color profile part and returns its name.
pub trait ColorContextSerializer {
    fn serialize(&self, context: &ColorContext, package: &mut dyn PackagingPolicy) -> Result<String>;
}

/// Stores the ICC profile bytes unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IccProfileSerializer;

impl ColorContextSerializer for IccProfileSerializer {
    fn serialize(&self, context: &ColorContext, package: &mut dyn PackagingPolicy) -> Result<String> {
        let uri = package.reserve_uri(ResourceKind::ColorContext, "icc")?;
        write_resource(package, ResourceKind::ColorContext, &uri, ICC_CONTENT_TYPE, |out| {
            Ok(out.write_all(&context.profile)?)
        })?;
        Ok(uri)
    }
}

/// The services one serialization session uses. `Default` carries the
/// built-in implementations; [`ServiceContext::empty`] carries none.
pub struct ServiceContext {
    image_encoder: Option<Box<dyn ImageEncoder>>,
    color_contexts: Option<Box<dyn ColorContextSerializer>>,
    rasterizer: Option<Box<dyn Rasterizer>>,
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self {
            image_encoder: Some(Box::new(PngImageEncoder)),
            color_contexts: Some(Box::new(IccProfileSerializer)),
            rasterizer: Some(Box::new(SkiaRasterizer)),
        }
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("image_encoder", &self.image_encoder.is_some())
            .field("color_contexts", &self.color_contexts.is_some())
            .field("rasterizer", &self.rasterizer.is_some())
            .finish()
    }
}

impl ServiceContext {
    pub fn empty() -> Self {
        Self {
            image_encoder: None,
            color_contexts: None,
            rasterizer: None,
        }
    }

    pub fn with_image_encoder(mut self, encoder: impl ImageEncoder + 'static) -> Self {
        self.image_encoder = Some(Box::new(encoder));
        self
    }

    pub fn with_color_context_serializer(
        mut self,
        serializer: impl ColorContextSerializer + 'static,
    ) -> Self {
        self.color_contexts = Some(Box::new(serializer));
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: impl Rasterizer + 'static) -> Self {
        self.rasterizer = Some(Box::new(rasterizer));
        self
    }

    pub fn without_rasterizer(mut self) -> Self {
        self.rasterizer = None;
        self
    }

    pub fn image_encoder(&self) -> Result<&dyn ImageEncoder> {
        self.image_encoder
            .as_deref()
            .ok_or(XpsError::MissingService("image encoder"))
    }

    pub fn color_context_serializer(&self) -> Result<&dyn ColorContextSerializer> {
        self.color_contexts
            .as_deref()
            .ok_or(XpsError::MissingService("color context serializer"))
    }

    /// Optional: pages without effects, 3-D content, or image-only fonts
    /// never need one.
    pub fn rasterizer(&self) -> Option<&dyn Rasterizer> {
        self.rasterizer.as_deref()
    }
}
