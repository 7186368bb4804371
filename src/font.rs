use crate::brush::hex_digest;
use crate::error::{Result, XpsError};
use crate::subset::find_table;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use ttf_parser::GlyphId;

const FS_TYPE_RESTRICTED: u16 = 0x0002;
const FS_TYPE_PREVIEW_AND_PRINT: u16 = 0x0004;
const FS_TYPE_EDITABLE: u16 = 0x0008;
const FS_TYPE_NO_SUBSETTING: u16 = 0x0100;
const FS_TYPE_BITMAP_ONLY: u16 = 0x0200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingPermission {
    Installable,
    RestrictedLicense,
    PreviewAndPrint,
    Editable,
}

/// Embedding rights from the OS/2 `fsType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmbeddingRights {
    pub permission: EmbeddingPermission,
    pub no_subsetting: bool,
    pub bitmap_only: bool,
}

impl EmbeddingRights {
    pub const INSTALLABLE: EmbeddingRights = EmbeddingRights {
        permission: EmbeddingPermission::Installable,
        no_subsetting: false,
        bitmap_only: false,
    };

    pub fn from_fs_type(fs_type: u16) -> Self {
        // Fonts that set several usage bits get the least restrictive one.
        let permission = if fs_type & 0x000F == 0 {
            EmbeddingPermission::Installable
        } else if fs_type & FS_TYPE_EDITABLE != 0 {
            EmbeddingPermission::Editable
        } else if fs_type & FS_TYPE_PREVIEW_AND_PRINT != 0 {
            EmbeddingPermission::PreviewAndPrint
        } else if fs_type & FS_TYPE_RESTRICTED != 0 {
            EmbeddingPermission::RestrictedLicense
        } else {
            EmbeddingPermission::Installable
        };
        Self {
            permission,
            no_subsetting: fs_type & FS_TYPE_NO_SUBSETTING != 0,
            bitmap_only: fs_type & FS_TYPE_BITMAP_ONLY != 0,
        }
    }
}

/// A loaded font program. Cheap to share behind `Arc`.
#[derive(Debug)]
pub struct FontFace {
    data: Arc<Vec<u8>>,
    index: u32,
    identity: String,
    name: String,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    glyph_count: u16,
    fs_type: u16,
    has_glyf: bool,
}

impl FontFace {
    pub fn from_bytes(data: Vec<u8>, index: u32) -> Result<Self> {
        Self::load(data, index, None)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::load(data, 0, Some(path))
    }

    fn load(data: Vec<u8>, index: u32, path: Option<&Path>) -> Result<Self> {
        let face = ttf_parser::Face::parse(&data, index)
            .map_err(|e| XpsError::Font(format!("invalid font data: {e}")))?;
        let identity = format!("{}-{index}", hex_digest(&data));
        let name = font_name(&face, path).unwrap_or_else(|| format!("Font-{}", &identity[..8]));
        let units_per_em = face.units_per_em();
        let ascender = face.ascender();
        let descender = face.descender();
        let glyph_count = face.number_of_glyphs();
        let fs_type = find_table(&data, index, b"OS/2")
            .and_then(|os2| os2.get(8..10))
            .map(|raw| u16::from_be_bytes([raw[0], raw[1]]))
            .unwrap_or(0);
        let has_glyf = find_table(&data, index, b"glyf").is_some()
            && find_table(&data, index, b"loca").is_some();
        Ok(Self {
            data: Arc::new(data),
            index,
            identity,
            name,
            units_per_em,
            ascender,
            descender,
            glyph_count,
            fs_type,
            has_glyf,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Content hash plus face index; equal fonts loaded twice share it.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em.max(1)
    }

    pub fn glyph_count(&self) -> u16 {
        self.glyph_count
    }

    pub fn fs_type(&self) -> u16 {
        self.fs_type
    }

    pub fn embedding_rights(&self) -> EmbeddingRights {
        EmbeddingRights::from_fs_type(self.fs_type)
    }

    /// Outlines live in `glyf`/`loca` and can be subset per glyph.
    pub fn has_truetype_outlines(&self) -> bool {
        self.has_glyf
    }

    pub fn face(&self) -> Result<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.index)
            .map_err(|e| XpsError::Font(format!("invalid font data: {e}")))
    }

    /// Horizontal advance as a fraction of the em.
    pub fn advance_em(&self, glyph: u16) -> Option<f64> {
        let face = self.face().ok()?;
        let advance = face.glyph_hor_advance(GlyphId(glyph))?;
        Some(advance as f64 / self.units_per_em() as f64)
    }

    pub fn ascent_em(&self) -> f64 {
        self.ascender as f64 / self.units_per_em() as f64
    }

    pub fn descent_em(&self) -> f64 {
        -(self.descender as f64) / self.units_per_em() as f64
    }
}

fn font_name(face: &ttf_parser::Face<'_>, path: Option<&Path>) -> Option<String> {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .and_then(|p| p.file_stem())
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    post.or(full).or(family).or(stem)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::FontFace;
    use crate::subset::write_sfnt;
    use std::sync::Arc;

    pub(crate) const GLYPH_COUNT: u16 = 5;

    fn simple_glyph(points: &[(i16, i16)]) -> Vec<u8> {
        let mut out = Vec::new();
        let xs = points.iter().map(|p| p.0);
        let ys = points.iter().map(|p| p.1);
        let (x_min, x_max) = (xs.clone().min().unwrap_or(0), xs.max().unwrap_or(0));
        let (y_min, y_max) = (ys.clone().min().unwrap_or(0), ys.max().unwrap_or(0));
        for v in [1i16, x_min, y_min, x_max, y_max] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&(points.len() as u16 - 1).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend(std::iter::repeat_n(0x01u8, points.len()));
        let mut prev = 0i16;
        for p in points {
            out.extend_from_slice(&(p.0 - prev).to_be_bytes());
            prev = p.0;
        }
        prev = 0;
        for p in points {
            out.extend_from_slice(&(p.1 - prev).to_be_bytes());
            prev = p.1;
        }
        out
    }

    fn composite_glyph(parts: &[(u16, i16, i16)]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [-1i16, 0, 0, 1000, 700] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        for (i, (glyph, dx, dy)) in parts.iter().enumerate() {
            let more = if i + 1 < parts.len() { 0x0020 } else { 0 };
            out.extend_from_slice(&(0x0003u16 | more).to_be_bytes());
            out.extend_from_slice(&glyph.to_be_bytes());
            out.extend_from_slice(&dx.to_be_bytes());
            out.extend_from_slice(&dy.to_be_bytes());
        }
        out
    }

    /// Five glyphs: empty notdef, a square, a triangle, a composite of the
    /// square and triangle, and an unused square.
    pub(crate) fn build_font(fs_type: u16) -> Vec<u8> {
        let square = simple_glyph(&[(100, 0), (500, 0), (500, 700), (100, 700)]);
        let glyphs = vec![
            Vec::new(),
            square.clone(),
            simple_glyph(&[(0, 0), (600, 0), (300, 700)]),
            composite_glyph(&[(1, 0, 0), (2, 500, 0)]),
            square,
        ];

        let mut glyf = Vec::new();
        let mut loca = Vec::new();
        for glyph in &glyphs {
            loca.extend_from_slice(&(glyf.len() as u32).to_be_bytes());
            glyf.extend_from_slice(glyph);
            while glyf.len() % 4 != 0 {
                glyf.push(0);
            }
        }
        loca.extend_from_slice(&(glyf.len() as u32).to_be_bytes());

        let mut head = vec![0u8; 54];
        head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
        head[18..20].copy_from_slice(&1000u16.to_be_bytes());
        head[40..42].copy_from_slice(&1000i16.to_be_bytes());
        head[42..44].copy_from_slice(&700i16.to_be_bytes());
        head[50..52].copy_from_slice(&1i16.to_be_bytes());

        let mut hhea = vec![0u8; 36];
        hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
        hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
        hhea[10..12].copy_from_slice(&600u16.to_be_bytes());
        hhea[34..36].copy_from_slice(&GLYPH_COUNT.to_be_bytes());

        let mut maxp = Vec::new();
        maxp.extend_from_slice(&0x0000_5000u32.to_be_bytes());
        maxp.extend_from_slice(&GLYPH_COUNT.to_be_bytes());

        let mut hmtx = Vec::new();
        for _ in 0..GLYPH_COUNT {
            hmtx.extend_from_slice(&600u16.to_be_bytes());
            hmtx.extend_from_slice(&0i16.to_be_bytes());
        }

        let mut os2 = vec![0u8; 78];
        os2[4..6].copy_from_slice(&400u16.to_be_bytes());
        os2[6..8].copy_from_slice(&5u16.to_be_bytes());
        os2[8..10].copy_from_slice(&fs_type.to_be_bytes());

        write_sfnt(vec![
            (*b"head", head),
            (*b"hhea", hhea),
            (*b"maxp", maxp),
            (*b"hmtx", hmtx),
            (*b"loca", loca),
            (*b"glyf", glyf),
            (*b"OS/2", os2),
        ])
    }

    pub(crate) fn face(fs_type: u16) -> Arc<FontFace> {
        Arc::new(FontFace::from_bytes(build_font(fs_type), 0).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_type_bits_map_to_rights() {
        assert_eq!(EmbeddingRights::from_fs_type(0), EmbeddingRights::INSTALLABLE);
        let r = EmbeddingRights::from_fs_type(0x0002);
        assert_eq!(r.permission, EmbeddingPermission::RestrictedLicense);
        let r = EmbeddingRights::from_fs_type(0x0004 | 0x0100);
        assert_eq!(r.permission, EmbeddingPermission::PreviewAndPrint);
        assert!(r.no_subsetting);
        assert!(!r.bitmap_only);
        let r = EmbeddingRights::from_fs_type(0x0008 | 0x0200);
        assert_eq!(r.permission, EmbeddingPermission::Editable);
        assert!(r.bitmap_only);
        // Least restrictive usage bit wins.
        let r = EmbeddingRights::from_fs_type(0x0002 | 0x0008);
        assert_eq!(r.permission, EmbeddingPermission::Editable);
    }

    #[test]
    fn synthetic_font_loads() {
        let face = testing::face(0x0004);
        assert_eq!(face.units_per_em(), 1000);
        assert_eq!(face.glyph_count(), testing::GLYPH_COUNT);
        assert_eq!(face.fs_type(), 0x0004);
        assert!(face.has_truetype_outlines());
        assert_eq!(face.advance_em(1), Some(0.6));
        assert!((face.ascent_em() - 0.8).abs() < 1e-9);
        assert!((face.descent_em() - 0.2).abs() < 1e-9);
        assert!(face.name().starts_with("Font-"));
    }

    #[test]
    fn identity_follows_content() {
        let a = testing::face(0);
        let b = testing::face(0);
        let c = testing::face(0x0002);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            FontFace::from_bytes(vec![1, 2, 3], 0),
            Err(XpsError::Font(_))
        ));
    }
}
