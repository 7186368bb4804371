//! Package parts shared across pages: images, color profiles, and the
//! relationships pages hold on them.

use crate::brush::Bitmap;
use crate::error::{Result, XpsError};
use crate::limits::LimitTracker;
use crate::services::ServiceContext;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::Write;

pub const FIXED_PAGE_CONTENT_TYPE: &str = "application/vnd.ms-package.xps-fixedpage+xml";
pub const OBFUSCATED_FONT_CONTENT_TYPE: &str = "application/vnd.ms-package.obfuscated-opentype";
pub const ICC_CONTENT_TYPE: &str = "application/vnd.ms-color.iccprofile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Font,
    Image,
    ColorContext,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Font => "font",
            ResourceKind::Image => "image",
            ResourceKind::ColorContext => "color context",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Page to a resource it needs for rendering.
    RequiredResource,
    /// Document to a font whose license restricts redistribution.
    RestrictedFont,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub target: String,
    pub kind: RelationshipKind,
}

/// An open resource stream. Write the whole resource, then release the
/// stream before acquiring another of the same kind.
pub struct ResourceStream<'a> {
    pub uri: String,
    pub writer: &'a mut dyn Write,
}

/// Where and how parts are stored.
pub trait PackagingPolicy {
    /// Reserves the part name for a new resource. Fonts get GUID-based
    /// names, which the obfuscation key is taken from.
    fn reserve_uri(&mut self, kind: ResourceKind, extension: &str) -> Result<String>;

    /// Opens the part at `uri`. Fails while another stream of the same kind
    /// is still open.
    fn acquire_resource_stream(
        &mut self,
        kind: ResourceKind,
        uri: &str,
        content_type: &str,
    ) -> Result<ResourceStream<'_>>;

    fn release_resource_stream(&mut self, kind: ResourceKind) -> Result<()>;

    /// Relationship from the page being built to `uri`.
    fn add_relationship(&mut self, uri: &str, kind: RelationshipKind) -> Result<()>;

    /// Relationship from the document to a restricted font.
    fn add_restricted_relationship(&mut self, uri: &str) -> Result<()>;

    /// Stores a finished page and its relationships; returns its part name.
    fn commit_page(&mut self, markup: &str) -> Result<String>;

    fn begin_document(&mut self) -> Result<()>;

    fn end_document(&mut self) -> Result<()>;
}

/// Writes one complete resource through `package`.
pub fn write_resource<F>(
    package: &mut dyn PackagingPolicy,
    kind: ResourceKind,
    uri: &str,
    content_type: &str,
    write: F,
) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let result = {
        let stream = package.acquire_resource_stream(kind, uri, content_type)?;
        write(stream.writer)
    };
    let released = package.release_resource_stream(kind);
    result.and(released)
}

/// Image and color profile parts written so far in the document, plus the
/// page relationships already added.
#[derive(Debug, Default)]
pub struct ResourceTable {
    images: HashMap<String, String>,
    color_contexts: HashMap<String, String>,
    page_relationships: HashSet<String>,
    images_written: usize,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ImageSource` value for `bitmap`, writing the image (and its color
    /// profile) on first use in the document.
    pub fn image_source(
        &mut self,
        bitmap: &Bitmap,
        package: &mut dyn PackagingPolicy,
        services: &ServiceContext,
        limits: &mut LimitTracker,
    ) -> Result<String> {
        let key = bitmap
            .source_uri
            .clone()
            .unwrap_or_else(|| bitmap.content_key());
        let image_uri = match self.images.get(&key) {
            Some(uri) => uri.clone(),
            None => {
                let encoder = services.image_encoder()?;
                let uri = package.reserve_uri(ResourceKind::Image, encoder.extension())?;
                write_resource(package, ResourceKind::Image, &uri, encoder.content_type(), |out| {
                    encoder.encode(bitmap, out)
                })?;
                log::debug!("image {}x{} written to {uri}", bitmap.width, bitmap.height);
                self.images_written += 1;
                self.images.insert(key, uri.clone());
                uri
            }
        };
        self.link(&image_uri, package, limits)?;

        let Some(context) = &bitmap.color_context else {
            return Ok(image_uri);
        };
        let identity = context.identity();
        let profile_uri = match self.color_contexts.get(&identity) {
            Some(uri) => uri.clone(),
            None => {
                let uri = services.color_context_serializer()?.serialize(context, package)?;
                self.color_contexts.insert(identity, uri.clone());
                uri
            }
        };
        self.link(&profile_uri, package, limits)?;
        Ok(format!("{{ColorConvertedBitmap {image_uri} {profile_uri}}}"))
    }

    /// Adds the page relationship to `uri` once per page. Each linked part
    /// counts as a page resource.
    pub fn link(
        &mut self,
        uri: &str,
        package: &mut dyn PackagingPolicy,
        limits: &mut LimitTracker,
    ) -> Result<()> {
        if self.page_relationships.insert(uri.to_string()) {
            package.add_relationship(uri, RelationshipKind::RequiredResource)?;
            limits.count_resource();
        }
        Ok(())
    }

    pub fn images_written(&self) -> usize {
        self.images_written
    }

    pub fn end_page(&mut self) {
        self.page_relationships.clear();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Package kept in memory. Part names follow the usual layout:
/// `/Documents/1/Pages/N.fpage`, `/Resources/<GUID>.odttf`,
/// `/Resources/Images/imageN.ext`, `/Resources/ColorContexts/profileN.icc`.
#[derive(Debug, Default)]
pub struct MemoryPackage {
    parts: BTreeMap<String, Part>,
    open: HashMap<ResourceKind, String>,
    relationships: BTreeMap<String, Vec<Relationship>>,
    page_relationships: Vec<Relationship>,
    restricted: Vec<String>,
    pages: Vec<String>,
    documents: usize,
    in_document: bool,
    names_issued: u64,
}

impl MemoryPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&self, uri: &str) -> Option<&Part> {
        self.parts.get(uri)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Page part names in commit order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn relationships(&self, page_uri: &str) -> &[Relationship] {
        self.relationships
            .get(page_uri)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn restricted_relationships(&self) -> &[String] {
        &self.restricted
    }

    fn next_guid(&mut self) -> String {
        self.names_issued += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.documents.to_le_bytes());
        hasher.update(self.names_issued.to_le_bytes());
        let hash = hasher.finalize();
        let hex: String = hash[..16].iter().map(|b| format!("{b:02X}")).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl PackagingPolicy for MemoryPackage {
    fn reserve_uri(&mut self, kind: ResourceKind, extension: &str) -> Result<String> {
        Ok(match kind {
            ResourceKind::Font => format!("/Resources/{}.odttf", self.next_guid()),
            ResourceKind::Image => {
                self.names_issued += 1;
                format!("/Resources/Images/image{}.{extension}", self.names_issued)
            }
            ResourceKind::ColorContext => {
                self.names_issued += 1;
                format!("/Resources/ColorContexts/profile{}.{extension}", self.names_issued)
            }
        })
    }

    fn acquire_resource_stream(
        &mut self,
        kind: ResourceKind,
        uri: &str,
        content_type: &str,
    ) -> Result<ResourceStream<'_>> {
        if let Some(open) = self.open.get(&kind) {
            return Err(XpsError::Package(format!(
                "{kind} stream {open} is still open"
            )));
        }
        if self.parts.contains_key(uri) {
            return Err(XpsError::Package(format!("part {uri} already written")));
        }
        self.open.insert(kind, uri.to_string());
        let part = self.parts.entry(uri.to_string()).or_insert(Part {
            content_type: content_type.to_string(),
            data: Vec::new(),
        });
        Ok(ResourceStream {
            uri: uri.to_string(),
            writer: &mut part.data,
        })
    }

    fn release_resource_stream(&mut self, kind: ResourceKind) -> Result<()> {
        self.open
            .remove(&kind)
            .map(|_| ())
            .ok_or_else(|| XpsError::Package(format!("no {kind} stream to release")))
    }

    fn add_relationship(&mut self, uri: &str, kind: RelationshipKind) -> Result<()> {
        self.page_relationships.push(Relationship {
            target: uri.to_string(),
            kind,
        });
        Ok(())
    }

    fn add_restricted_relationship(&mut self, uri: &str) -> Result<()> {
        self.restricted.push(uri.to_string());
        Ok(())
    }

    fn commit_page(&mut self, markup: &str) -> Result<String> {
        if !self.open.is_empty() {
            return Err(XpsError::Package(
                "page committed while a resource stream is open".to_string(),
            ));
        }
        let uri = format!("/Documents/{}/Pages/{}.fpage", self.documents.max(1), self.pages.len() + 1);
        self.parts.insert(
            uri.clone(),
            Part {
                content_type: FIXED_PAGE_CONTENT_TYPE.to_string(),
                data: markup.as_bytes().to_vec(),
            },
        );
        self.relationships
            .insert(uri.clone(), std::mem::take(&mut self.page_relationships));
        self.pages.push(uri.clone());
        Ok(uri)
    }

    fn begin_document(&mut self) -> Result<()> {
        if self.in_document {
            return Err(XpsError::Package("document already open".to_string()));
        }
        self.in_document = true;
        self.documents += 1;
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        if !self.in_document {
            return Err(XpsError::Package("no open document".to_string()));
        }
        self.in_document = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::ColorContext;

    fn bitmap(fill: u8) -> Bitmap {
        Bitmap::from_rgba(2, 2, vec![fill; 16]).unwrap()
    }

    #[test]
    fn streams_pair_per_kind() {
        let mut package = MemoryPackage::new();
        let font = package.reserve_uri(ResourceKind::Font, "odttf").unwrap();
        assert!(font.starts_with("/Resources/") && font.ends_with(".odttf"));
        assert_eq!(font.len(), "/Resources/".len() + 36 + ".odttf".len());

        let stream = package
            .acquire_resource_stream(ResourceKind::Font, &font, OBFUSCATED_FONT_CONTENT_TYPE)
            .unwrap();
        stream.writer.write_all(b"abc").unwrap();
        let again = package.acquire_resource_stream(ResourceKind::Font, "/other", "x");
        assert!(matches!(again, Err(XpsError::Package(_))));
        // Other kinds are independent.
        package
            .acquire_resource_stream(ResourceKind::Image, "/img.png", "image/png")
            .unwrap();
        package.release_resource_stream(ResourceKind::Image).unwrap();
        package.release_resource_stream(ResourceKind::Font).unwrap();
        assert!(package.release_resource_stream(ResourceKind::Font).is_err());
        assert_eq!(package.part(&font).unwrap().data, b"abc");
    }

    #[test]
    fn write_resource_releases_on_error() {
        let mut package = MemoryPackage::new();
        let failed = write_resource(&mut package, ResourceKind::Image, "/a.png", "image/png", |_| {
            Err(XpsError::Image("boom".to_string()))
        });
        assert!(failed.is_err());
        write_resource(&mut package, ResourceKind::Image, "/b.png", "image/png", |out| {
            Ok(out.write_all(b"png")?)
        })
        .unwrap();
        assert_eq!(package.part("/b.png").unwrap().data, b"png");
    }

    #[test]
    fn font_names_are_distinct_and_deterministic() {
        let mut a = MemoryPackage::new();
        let mut b = MemoryPackage::new();
        let a1 = a.reserve_uri(ResourceKind::Font, "odttf").unwrap();
        let a2 = a.reserve_uri(ResourceKind::Font, "odttf").unwrap();
        assert_ne!(a1, a2);
        assert_eq!(b.reserve_uri(ResourceKind::Font, "odttf").unwrap(), a1);
    }

    #[test]
    fn images_are_written_once_and_linked_once_per_page() {
        let mut package = MemoryPackage::new();
        let services = ServiceContext::default();
        let mut table = ResourceTable::new();
        let mut limits = LimitTracker::new();

        let first = table.image_source(&bitmap(10), &mut package, &services, &mut limits).unwrap();
        let same = table.image_source(&bitmap(10), &mut package, &services, &mut limits).unwrap();
        let other = table.image_source(&bitmap(20), &mut package, &services, &mut limits).unwrap();
        assert_eq!(limits.resource_count(), 2);
        assert_eq!(first, same);
        assert_ne!(first, other);
        assert_eq!(table.images_written(), 2);
        assert_eq!(package.part(&first).unwrap().content_type, "image/png");

        let page = package.commit_page("<FixedPage/>").unwrap();
        assert_eq!(package.relationships(&page).len(), 2);

        table.end_page();
        table.image_source(&bitmap(10), &mut package, &services, &mut LimitTracker::new()).unwrap();
        let page2 = package.commit_page("<FixedPage/>").unwrap();
        assert_eq!(package.relationships(&page2).len(), 1);
        assert_eq!(table.images_written(), 2);
    }

    #[test]
    fn color_managed_images_reference_their_profile() {
        let mut package = MemoryPackage::new();
        let services = ServiceContext::default();
        let mut table = ResourceTable::new();
        let mut image = bitmap(30);
        image.color_context = Some(ColorContext::new(vec![1, 2, 3, 4]));

        let mut limits = LimitTracker::new();
        let source = table.image_source(&image, &mut package, &services, &mut limits).unwrap();
        assert_eq!(limits.resource_count(), 2);
        assert!(source.starts_with("{ColorConvertedBitmap /Resources/Images/"));
        assert!(source.contains("/Resources/ColorContexts/"));
        let profiles = package
            .part_names()
            .filter(|n| n.starts_with("/Resources/ColorContexts/"))
            .count();
        assert_eq!(profiles, 1);
    }

    #[test]
    fn missing_encoder_is_reported() {
        let mut package = MemoryPackage::new();
        let services = ServiceContext::empty();
        let mut table = ResourceTable::new();
        let err = table.image_source(&bitmap(1), &mut package, &services, &mut LimitTracker::new()).unwrap_err();
        assert!(matches!(err, XpsError::MissingService(_)));
    }

    #[test]
    fn pages_take_their_relationships() {
        let mut package = MemoryPackage::new();
        package.begin_document().unwrap();
        package
            .add_relationship("/Resources/x.odttf", RelationshipKind::RequiredResource)
            .unwrap();
        let page = package.commit_page("<FixedPage/>").unwrap();
        assert_eq!(page, "/Documents/1/Pages/1.fpage");
        assert_eq!(package.relationships(&page)[0].target, "/Resources/x.odttf");
        assert!(package.begin_document().is_err());
        package.end_document().unwrap();
    }
}
