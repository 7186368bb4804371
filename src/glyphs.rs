//! `Glyphs` element encoding.

use crate::format::NumberWriter;
use crate::markup::Element;
use crate::scene::GlyphRun;
use crate::types::Point;

const MAX_BIDI_LEVEL: i32 = 61;

/// Builds the `Glyphs` element for `run` placed at `origin`. The caller adds
/// `Fill` and `FontUri`.
pub fn glyphs_element(run: &GlyphRun, origin: Point, w: &mut NumberWriter<'_>) -> Element {
    let mut el = Element::new("Glyphs")
        .with_attr("FontRenderingEmSize", w.num(run.em_size))
        .with_attr("OriginX", w.num(origin.x))
        .with_attr("OriginY", w.num(origin.y));

    let bidi = run.bidi_level.clamp(0, MAX_BIDI_LEVEL);
    if bidi != 0 {
        el.set_attr("BidiLevel", bidi.to_string());
    }
    if run.is_sideways {
        el.set_attr("IsSideways", "true");
    }

    if !run.characters.is_empty() {
        w.limits().check_glyphs(run.characters.len());
        el.set_attr("UnicodeString", unicode_string(&run.characters));
    }

    let indices = indices(run, w);
    if !indices.is_empty() {
        w.limits().check_glyphs(run.glyph_indices.len());
        el.set_attr("Indices", indices);
    }

    if let Some(stops) = caret_stops(&run.caret_stops) {
        w.limits().check_glyphs(run.caret_stops.len());
        el.set_attr("CaretStops", stops);
    }
    el
}

/// Text with characters that cannot appear in markup replaced by spaces,
/// so character positions stay aligned with the cluster map. A leading `{`
/// is escaped as `{}`.
pub fn unicode_string(characters: &[char]) -> String {
    let text: String = characters
        .iter()
        .map(|&c| if is_markup_char(c) { c } else { ' ' })
        .collect();
    if text.starts_with('{') {
        format!("{{}}{text}")
    } else {
        text
    }
}

fn is_markup_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}' && !('\u{7F}'..='\u{9F}').contains(&c))
}

/// `Indices` attribute: `[(chars:glyphs)]index,advance[,u,v]` per glyph,
/// separated by `;`. Advances and offsets are in hundredths of the em size.
fn indices(run: &GlyphRun, w: &mut NumberWriter<'_>) -> String {
    if run.glyph_indices.is_empty() || !(run.em_size > 0.0) {
        return String::new();
    }
    let clusters = cluster_starts(run);
    let per_em = 100.0 / run.em_size;
    let mut entries = Vec::with_capacity(run.glyph_indices.len());
    for (i, glyph) in run.glyph_indices.iter().enumerate() {
        let mut entry = String::new();
        if let Some(&(units, glyphs)) = clusters.get(&i) {
            entry.push_str(&match glyphs {
                1 => format!("({units})"),
                _ => format!("({units}:{glyphs})"),
            });
        }
        entry.push_str(&glyph.to_string());
        entry.push(',');
        entry.push_str(&w.num(run.advance(i).abs() * per_em));
        if let Some(offset) = run.offsets.get(i).filter(|o| o.x != 0.0 || o.y != 0.0) {
            entry.push(',');
            entry.push_str(&w.num(offset.x * per_em));
            entry.push(',');
            entry.push_str(&w.num(-offset.y * per_em));
        }
        entries.push(entry);
    }
    entries.join(";")
}

/// Glyph positions that begin a cluster other than one character to one
/// glyph, with the cluster's UTF-16 length and glyph count.
fn cluster_starts(run: &GlyphRun) -> std::collections::HashMap<usize, (usize, usize)> {
    let mut out = std::collections::HashMap::new();
    if run.cluster_map.is_empty() || run.cluster_map.len() != run.characters.len() {
        return out;
    }
    let glyph_count = run.glyph_indices.len();
    let mut c = 0;
    while c < run.characters.len() {
        let first_glyph = run.cluster_map[c] as usize;
        let mut end = c + 1;
        while end < run.characters.len() && run.cluster_map[end] as usize == first_glyph {
            end += 1;
        }
        let next_glyph = run
            .cluster_map
            .get(end)
            .map(|&g| g as usize)
            .unwrap_or(glyph_count);
        let units: usize = run.characters[c..end].iter().map(|ch| ch.len_utf16()).sum();
        let glyphs = next_glyph.saturating_sub(first_glyph).max(1);
        if (units, glyphs) != (1, 1) && first_glyph < glyph_count {
            out.insert(first_glyph, (units, glyphs));
        }
        c = end;
    }
    out
}

/// Hex digits, four positions per digit, most significant bit first.
/// `None` when every position is a stop.
fn caret_stops(stops: &[bool]) -> Option<String> {
    if stops.iter().all(|&s| s) {
        return None;
    }
    let digits = stops
        .chunks(4)
        .map(|chunk| {
            let nibble = chunk
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, &stop)| acc | (u32::from(stop) << (3 - i)));
            char::from_digit(nibble, 16).map_or('0', |d| d.to_ascii_uppercase())
        })
        .collect();
    Some(digits)
}
