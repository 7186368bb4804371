//! TrueType glyph subsetting.
//!
//! Glyph ids are preserved: unused glyphs keep their `loca` slot with an
//! empty outline, so `Glyphs` markup can reference the original indices.

use crate::error::{Result, XpsError};
use std::collections::BTreeSet;

const HEAD_CHECKSUM_MAGIC: u32 = 0xB1B0_AFBA;

// Tables a rendering consumer needs. Layout tables are dropped.
const KEPT_TABLES: [&[u8; 4]; 16] = [
    b"OS/2", b"cmap", b"cvt ", b"fpgm", b"gasp", b"glyf", b"head", b"hhea", b"hmtx", b"loca",
    b"maxp", b"name", b"post", b"prep", b"vhea", b"vmtx",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableRecord {
    pub tag: [u8; 4],
    pub offset: usize,
    pub length: usize,
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    data.get(pos..pos + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn malformed(what: &str) -> XpsError {
    XpsError::Font(format!("malformed font: {what}"))
}

/// Table directory of face `index`; collections (`ttcf`) are resolved.
pub(crate) fn table_directory(data: &[u8], index: u32) -> Result<Vec<TableRecord>> {
    let base = if data.get(0..4) == Some(b"ttcf") {
        let count = read_u32(data, 8).ok_or_else(|| malformed("collection header"))?;
        if index >= count {
            return Err(XpsError::Font(format!(
                "face index {index} out of range for collection of {count}"
            )));
        }
        read_u32(data, 12 + 4 * index as usize).ok_or_else(|| malformed("collection offsets"))?
            as usize
    } else if index == 0 {
        0
    } else {
        return Err(XpsError::Font(format!("face index {index} in a single font")));
    };

    let count = read_u16(data, base + 4).ok_or_else(|| malformed("offset table"))? as usize;
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let pos = base + 12 + 16 * i;
        let tag = data
            .get(pos..pos + 4)
            .ok_or_else(|| malformed("table record"))?;
        let offset = read_u32(data, pos + 8).ok_or_else(|| malformed("table record"))? as usize;
        let length = read_u32(data, pos + 12).ok_or_else(|| malformed("table record"))? as usize;
        if offset.checked_add(length).is_none_or(|end| end > data.len()) {
            return Err(malformed("table outside file"));
        }
        records.push(TableRecord {
            tag: [tag[0], tag[1], tag[2], tag[3]],
            offset,
            length,
        });
    }
    Ok(records)
}

pub(crate) fn find_table<'a>(data: &'a [u8], index: u32, tag: &[u8; 4]) -> Option<&'a [u8]> {
    let records = table_directory(data, index).ok()?;
    let record = records.iter().find(|r| &r.tag == tag)?;
    data.get(record.offset..record.offset + record.length)
}

fn table_checksum(data: &[u8]) -> u32 {
    data.chunks(4).fold(0u32, |sum, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum.wrapping_add(u32::from_be_bytes(word))
    })
}

/// Assembles a single-face sfnt from raw tables, recomputing table
/// checksums and `head.checkSumAdjustment`.
pub fn write_sfnt(mut tables: Vec<([u8; 4], Vec<u8>)>) -> Vec<u8> {
    tables.sort_by(|a, b| a.0.cmp(&b.0));
    let count = tables.len() as u16;
    let entry_selector = if count == 0 { 0 } else { 15 - count.leading_zeros() as u16 };
    let search_range = (1u16 << entry_selector) * 16;
    let range_shift = count * 16 - search_range.min(count * 16);

    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());

    let mut offset = 12 + 16 * tables.len();
    let mut head_offset = None;
    for (tag, data) in tables.iter_mut() {
        if tag == b"head" && data.len() >= 12 {
            data[8..12].fill(0);
            head_offset = Some(offset);
        }
        out.extend_from_slice(tag);
        out.extend_from_slice(&table_checksum(data).to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        offset += data.len().next_multiple_of(4);
    }
    for (_, data) in &tables {
        out.extend_from_slice(data);
        out.resize(out.len().next_multiple_of(4), 0);
    }

    if let Some(pos) = head_offset {
        let adjustment = HEAD_CHECKSUM_MAGIC.wrapping_sub(table_checksum(&out));
        out[pos + 8..pos + 12].copy_from_slice(&adjustment.to_be_bytes());
    }
    out
}

/// A standalone copy of one face, unchanged when the input is not a collection.
pub fn extract_face(data: &[u8], index: u32) -> Result<Vec<u8>> {
    if data.get(0..4) != Some(b"ttcf") {
        return Ok(data.to_vec());
    }
    let tables = table_directory(data, index)?
        .into_iter()
        .map(|r| (r.tag, data[r.offset..r.offset + r.length].to_vec()))
        .collect();
    Ok(write_sfnt(tables))
}

struct GlyphTable<'a> {
    glyf: &'a [u8],
    offsets: Vec<usize>,
}

impl<'a> GlyphTable<'a> {
    fn glyph(&self, id: u16) -> &'a [u8] {
        let id = id as usize;
        match (self.offsets.get(id), self.offsets.get(id + 1)) {
            (Some(&start), Some(&end)) if start <= end => self.glyf.get(start..end).unwrap_or(&[]),
            _ => &[],
        }
    }

    fn components(&self, id: u16) -> Vec<u16> {
        let data = self.glyph(id);
        let is_composite = read_u16(data, 0).is_some_and(|n| (n as i16) < 0);
        if !is_composite {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut pos = 10;
        while let (Some(flags), Some(glyph)) = (read_u16(data, pos), read_u16(data, pos + 2)) {
            out.push(glyph);
            pos += 4;
            pos += if flags & 0x0001 != 0 { 4 } else { 2 };
            if flags & 0x0008 != 0 {
                pos += 2;
            } else if flags & 0x0040 != 0 {
                pos += 4;
            } else if flags & 0x0080 != 0 {
                pos += 8;
            }
            if flags & 0x0020 == 0 {
                break;
            }
        }
        out
    }
}

/// Requested glyphs plus `.notdef` and every composite component.
fn glyph_closure(table: &GlyphTable<'_>, requested: &BTreeSet<u16>, glyph_count: u16) -> BTreeSet<u16> {
    let mut keep = BTreeSet::new();
    let mut pending: Vec<u16> = requested.iter().copied().chain([0]).collect();
    while let Some(id) = pending.pop() {
        if id >= glyph_count || !keep.insert(id) {
            continue;
        }
        pending.extend(table.components(id));
    }
    keep
}

/// Subsets a TrueType face to `glyphs`. Fails for fonts without `glyf`
/// outlines; callers embed those whole.
pub fn subset_truetype(data: &[u8], index: u32, glyphs: &BTreeSet<u16>) -> Result<Vec<u8>> {
    let records = table_directory(data, index)?;
    let table = |tag: &[u8; 4]| {
        records
            .iter()
            .find(|r| &r.tag == tag)
            .map(|r| &data[r.offset..r.offset + r.length])
    };
    let head = table(b"head").filter(|h| h.len() >= 54).ok_or_else(|| malformed("head"))?;
    let maxp = table(b"maxp").ok_or_else(|| malformed("maxp"))?;
    let (Some(loca), Some(glyf)) = (table(b"loca"), table(b"glyf")) else {
        return Err(XpsError::Font("font has no glyf outlines".to_string()));
    };
    let glyph_count = read_u16(maxp, 4).ok_or_else(|| malformed("maxp"))?;
    let long_offsets = read_u16(head, 50) == Some(1);

    let mut offsets = Vec::with_capacity(glyph_count as usize + 1);
    for i in 0..=glyph_count as usize {
        let offset = if long_offsets {
            read_u32(loca, i * 4).map(|v| v as usize)
        } else {
            read_u16(loca, i * 2).map(|v| v as usize * 2)
        };
        offsets.push(offset.ok_or_else(|| malformed("loca"))?);
    }
    let source = GlyphTable { glyf, offsets };
    let keep = glyph_closure(&source, glyphs, glyph_count);

    let mut new_glyf = Vec::new();
    let mut new_loca = Vec::with_capacity((glyph_count as usize + 1) * 4);
    for id in 0..glyph_count {
        new_loca.extend_from_slice(&(new_glyf.len() as u32).to_be_bytes());
        if keep.contains(&id) {
            new_glyf.extend_from_slice(source.glyph(id));
            new_glyf.resize(new_glyf.len().next_multiple_of(4), 0);
        }
    }
    new_loca.extend_from_slice(&(new_glyf.len() as u32).to_be_bytes());

    let mut new_head = head.to_vec();
    new_head[50..52].copy_from_slice(&1u16.to_be_bytes());

    let mut tables = Vec::new();
    for record in &records {
        if !KEPT_TABLES.contains(&&record.tag) {
            continue;
        }
        let bytes = match &record.tag {
            b"glyf" => std::mem::take(&mut new_glyf),
            b"loca" => std::mem::take(&mut new_loca),
            b"head" => std::mem::take(&mut new_head),
            _ => data[record.offset..record.offset + record.length].to_vec(),
        };
        tables.push((record.tag, bytes));
    }
    log::trace!(
        "subset kept {} of {} glyphs ({} requested)",
        keep.len(),
        glyph_count,
        glyphs.len()
    );
    Ok(write_sfnt(tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::testing;
    use ttf_parser::GlyphId;

    struct Counter(usize);

    impl ttf_parser::OutlineBuilder for Counter {
        fn move_to(&mut self, _: f32, _: f32) {
            self.0 += 1;
        }
        fn line_to(&mut self, _: f32, _: f32) {}
        fn quad_to(&mut self, _: f32, _: f32, _: f32, _: f32) {}
        fn curve_to(&mut self, _: f32, _: f32, _: f32, _: f32, _: f32, _: f32) {}
        fn close(&mut self) {}
    }

    fn contours(face: &ttf_parser::Face<'_>, id: u16) -> usize {
        let mut counter = Counter(0);
        face.outline_glyph(GlyphId(id), &mut counter);
        counter.0
    }

    #[test]
    fn checksum_adjustment_balances_file() {
        let font = testing::build_font(0);
        assert_eq!(table_checksum(&font), HEAD_CHECKSUM_MAGIC);
        let records = table_directory(&font, 0).unwrap();
        let tags: Vec<[u8; 4]> = records.iter().map(|r| r.tag).collect();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
        assert!(records.iter().all(|r| r.offset % 4 == 0));
    }

    #[test]
    fn subset_keeps_composite_components() {
        let font = testing::build_font(0);
        let subset = subset_truetype(&font, 0, &BTreeSet::from([3])).unwrap();
        let face = ttf_parser::Face::parse(&subset, 0).unwrap();
        assert_eq!(face.number_of_glyphs(), testing::GLYPH_COUNT);
        assert_eq!(contours(&face, 1), 1);
        assert_eq!(contours(&face, 2), 1);
        assert_eq!(contours(&face, 3), 2);
        assert_eq!(contours(&face, 4), 0);
        assert!(subset.len() < font.len());
        assert_eq!(table_checksum(&subset), HEAD_CHECKSUM_MAGIC);
    }

    #[test]
    fn subset_ignores_out_of_range_glyphs() {
        let font = testing::build_font(0);
        let subset = subset_truetype(&font, 0, &BTreeSet::from([2, 900])).unwrap();
        let face = ttf_parser::Face::parse(&subset, 0).unwrap();
        assert_eq!(contours(&face, 2), 1);
        assert_eq!(contours(&face, 1), 0);
    }

    #[test]
    fn missing_outlines_is_an_error() {
        let font = write_sfnt(vec![(*b"head", vec![0; 54]), (*b"maxp", vec![0, 0, 0x50, 0, 0, 1])]);
        assert!(matches!(
            subset_truetype(&font, 0, &BTreeSet::new()),
            Err(XpsError::Font(_))
        ));
    }

    #[test]
    fn single_font_rejects_face_index() {
        let font = testing::build_font(0);
        assert!(table_directory(&font, 1).is_err());
        assert_eq!(extract_face(&font, 0).unwrap(), font);
    }
}
