//! Fonts referenced by glyph runs, subset and written when the commit
//! policy says so.
//!
//! An entry is created on first reference, accumulates the glyphs used
//! until a qualifying commit signal, and is then written and evicted. A
//! later reference starts a new entry with a new part.
//!
//! Fonts that forbid subsetting skip accumulation: the whole face is
//! written on first reference and the entry stays, so later pages only
//! link the existing part.

use crate::error::{Result, XpsError};
use crate::font::{EmbeddingPermission, EmbeddingRights, FontFace};
use crate::limits::LimitTracker;
use crate::resources::{
    OBFUSCATED_FONT_CONTENT_TYPE, PackagingPolicy, RelationshipKind, ResourceKind, write_resource,
};
use crate::subset::{extract_face, subset_truetype};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Bytes at the start of the font stream that are obfuscated.
const OBFUSCATED_PREFIX: usize = 32;

/// Boundaries the serializer reports, ordered by granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommitSignal {
    Page,
    Document,
    Sequence,
}

/// When accumulated fonts are written: at every `level` signal, or at every
/// `every`-th one, and always at a coarser signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    pub level: CommitSignal,
    pub every: Option<NonZeroU32>,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self::document()
    }
}

impl CommitPolicy {
    pub fn page() -> Self {
        Self {
            level: CommitSignal::Page,
            every: None,
        }
    }

    pub fn document() -> Self {
        Self {
            level: CommitSignal::Document,
            every: None,
        }
    }

    pub fn sequence() -> Self {
        Self {
            level: CommitSignal::Sequence,
            every: None,
        }
    }

    pub fn every(self, count: NonZeroU32) -> Self {
        Self {
            every: Some(count),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    /// End of a page for relationship bookkeeping; entries stay.
    Keep,
    /// Write and evict every entry.
    Flush,
}

/// Signal counting for one policy. Pure; no I/O.
#[derive(Debug, Clone, Copy)]
pub struct CommitState {
    policy: CommitPolicy,
    seen_at_level: u32,
}

impl CommitState {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            seen_at_level: 0,
        }
    }

    pub fn on_signal(&mut self, signal: CommitSignal) -> CommitAction {
        if signal < self.policy.level {
            return CommitAction::Keep;
        }
        if signal > self.policy.level {
            self.seen_at_level = 0;
            return CommitAction::Flush;
        }
        self.seen_at_level += 1;
        let every = self.policy.every.map_or(1, NonZeroU32::get);
        if self.seen_at_level >= every {
            self.seen_at_level = 0;
            CommitAction::Flush
        } else {
            CommitAction::Keep
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingAction {
    SubsetAndObfuscate,
    CopyWholeAndObfuscate,
    /// The font may not be embedded; its glyphs are drawn as images.
    ImageOnly,
}

pub fn embedding_action(rights: EmbeddingRights) -> EmbeddingAction {
    if rights.bitmap_only || rights.permission == EmbeddingPermission::RestrictedLicense {
        EmbeddingAction::ImageOnly
    } else if rights.no_subsetting {
        EmbeddingAction::CopyWholeAndObfuscate
    } else {
        EmbeddingAction::SubsetAndObfuscate
    }
}

/// Fonts whose license limits use to viewing and printing (or editing) need
/// a restricted relationship from the document.
pub fn needs_restricted_relationship(rights: EmbeddingRights) -> bool {
    matches!(
        rights.permission,
        EmbeddingPermission::PreviewAndPrint | EmbeddingPermission::Editable
    )
}

/// The 16-byte key encoded in a GUID part name such as
/// `/Resources/0F1E2D3C-4B5A-6978-8796-A5B4C3D2E1F0.odttf`, bytes in
/// string order.
pub fn obfuscation_key(uri: &str) -> Result<[u8; 16]> {
    let file = uri.rsplit('/').next().unwrap_or(uri);
    let stem = file.split('.').next().unwrap_or(file);
    let hex: Vec<u8> = stem.bytes().filter(|&b| b != b'-').collect();
    if hex.len() != 32 || stem.len() != 36 {
        return Err(XpsError::Font(format!("font part name {uri} is not a GUID")));
    }
    let mut key = [0u8; 16];
    for (i, pair) in hex.chunks_exact(2).enumerate() {
        let text = std::str::from_utf8(pair).map_err(|e| XpsError::Font(e.to_string()))?;
        key[i] = u8::from_str_radix(text, 16)
            .map_err(|_| XpsError::Font(format!("font part name {uri} is not a GUID")))?;
    }
    Ok(key)
}

/// XORs the first 32 bytes with the key, last key byte first. Applying it
/// twice restores the input.
pub fn obfuscate(data: &mut [u8], key: &[u8; 16]) {
    for (i, byte) in data.iter_mut().take(OBFUSCATED_PREFIX).enumerate() {
        *byte ^= key[15 - i % 16];
    }
}

#[derive(Debug)]
struct FontEntry {
    font: Arc<FontFace>,
    uri: String,
    glyphs: BTreeSet<u16>,
    action: EmbeddingAction,
    linked_on_page: bool,
    committed: bool,
}

/// Document-lifetime cache of referenced fonts.
#[derive(Debug)]
pub struct FontSubsetCache {
    state: CommitState,
    entries: BTreeMap<String, FontEntry>,
    restricted_linked: HashSet<String>,
    commits: usize,
}

impl FontSubsetCache {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            state: CommitState::new(policy),
            entries: BTreeMap::new(),
            restricted_linked: HashSet::new(),
            commits: 0,
        }
    }

    /// Records the glyphs a run uses and returns the font's part name. The
    /// page relationship is added on the first reference in each page and
    /// counted against the page's resource limit.
    pub fn reference(
        &mut self,
        font: &Arc<FontFace>,
        glyphs: &[u16],
        package: &mut dyn PackagingPolicy,
        limits: &mut LimitTracker,
    ) -> Result<String> {
        let rights = font.embedding_rights();
        let action = embedding_action(rights);
        if action == EmbeddingAction::ImageOnly {
            return Err(XpsError::Font(format!(
                "font {} may not be embedded",
                font.name()
            )));
        }
        let entry = match self.entries.entry(font.identity().to_string()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let uri = package.reserve_uri(ResourceKind::Font, "odttf")?;
                log::debug!("font {} will be written to {uri}", font.name());
                slot.insert(FontEntry {
                    font: font.clone(),
                    uri,
                    glyphs: BTreeSet::new(),
                    action,
                    linked_on_page: false,
                    committed: false,
                })
            }
        };
        if entry.action == EmbeddingAction::CopyWholeAndObfuscate {
            if !entry.committed {
                commit(entry, package)?;
                entry.committed = true;
                self.commits += 1;
            }
        } else {
            entry.glyphs.extend(glyphs.iter().copied());
        }
        if !entry.linked_on_page {
            package.add_relationship(&entry.uri, RelationshipKind::RequiredResource)?;
            limits.count_resource();
            entry.linked_on_page = true;
        }
        if needs_restricted_relationship(rights) && self.restricted_linked.insert(entry.uri.clone()) {
            package.add_restricted_relationship(&entry.uri)?;
        }
        Ok(entry.uri.clone())
    }

    /// Applies a boundary signal. Returns the number of fonts written.
    pub fn signal(&mut self, signal: CommitSignal, package: &mut dyn PackagingPolicy) -> Result<usize> {
        for entry in self.entries.values_mut() {
            entry.linked_on_page = false;
        }
        let written = match self.state.on_signal(signal) {
            CommitAction::Keep => 0,
            CommitAction::Flush => self.flush(package)?,
        };
        if signal >= CommitSignal::Document {
            self.restricted_linked.clear();
        }
        Ok(written)
    }

    /// Writes and evicts the accumulated subsets. Whole fonts were written
    /// on first reference and stay.
    fn flush(&mut self, package: &mut dyn PackagingPolicy) -> Result<usize> {
        let (whole, pending): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|(_, entry)| entry.committed);
        self.entries = whole;
        let count = pending.len();
        for entry in pending.into_values() {
            commit(&entry, package)?;
            self.commits += 1;
        }
        Ok(count)
    }

    /// Fonts written since creation.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Fonts waiting for a commit signal.
    pub fn pending(&self) -> usize {
        self.entries.values().filter(|e| !e.committed).count()
    }
}

fn commit(entry: &FontEntry, package: &mut dyn PackagingPolicy) -> Result<()> {
    let font = &entry.font;
    let mut data = match entry.action {
        EmbeddingAction::SubsetAndObfuscate if font.has_truetype_outlines() => {
            subset_truetype(font.data(), font.index(), &entry.glyphs)?
        }
        EmbeddingAction::SubsetAndObfuscate | EmbeddingAction::CopyWholeAndObfuscate => {
            extract_face(font.data(), font.index())?
        }
        EmbeddingAction::ImageOnly => return Ok(()),
    };
    obfuscate(&mut data, &obfuscation_key(&entry.uri)?);
    write_resource(
        package,
        ResourceKind::Font,
        &entry.uri,
        OBFUSCATED_FONT_CONTENT_TYPE,
        |out| Ok(out.write_all(&data)?),
    )?;
    log::debug!(
        "font {} committed to {} ({} glyphs, {} bytes)",
        font.name(),
        entry.uri,
        entry.glyphs.len(),
        data.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::testing::{build_font, face};
    use crate::resources::MemoryPackage;

    const PREVIEW_AND_PRINT: u16 = 0x0004;
    const RESTRICTED: u16 = 0x0002;
    const NO_SUBSETTING: u16 = 0x0100;
    const BITMAP_ONLY: u16 = 0x0200;

    fn action(fs_type: u16) -> EmbeddingAction {
        embedding_action(EmbeddingRights::from_fs_type(fs_type))
    }

    fn font_parts(package: &MemoryPackage) -> Vec<String> {
        package
            .part_names()
            .filter(|n| n.ends_with(".odttf"))
            .map(str::to_string)
            .collect()
    }

    fn required(package: &MemoryPackage, page: &str) -> usize {
        package
            .relationships(page)
            .iter()
            .filter(|r| r.kind == RelationshipKind::RequiredResource)
            .count()
    }

    #[test]
    fn rights_map_to_actions() {
        assert_eq!(action(0), EmbeddingAction::SubsetAndObfuscate);
        assert_eq!(action(PREVIEW_AND_PRINT), EmbeddingAction::SubsetAndObfuscate);
        assert_eq!(action(NO_SUBSETTING), EmbeddingAction::CopyWholeAndObfuscate);
        assert_eq!(action(RESTRICTED), EmbeddingAction::ImageOnly);
        assert_eq!(action(BITMAP_ONLY), EmbeddingAction::ImageOnly);
        assert!(needs_restricted_relationship(EmbeddingRights::from_fs_type(PREVIEW_AND_PRINT)));
        assert!(!needs_restricted_relationship(EmbeddingRights::from_fs_type(0)));
    }

    #[test]
    fn commit_state_follows_granularity() {
        let mut doc = CommitState::new(CommitPolicy::document());
        assert_eq!(doc.on_signal(CommitSignal::Page), CommitAction::Keep);
        assert_eq!(doc.on_signal(CommitSignal::Document), CommitAction::Flush);
        assert_eq!(doc.on_signal(CommitSignal::Sequence), CommitAction::Flush);

        let mut counted = CommitState::new(CommitPolicy::page().every(NonZeroU32::new(3).unwrap()));
        let actions: Vec<_> = (0..6).map(|_| counted.on_signal(CommitSignal::Page)).collect();
        assert_eq!(
            actions,
            vec![
                CommitAction::Keep,
                CommitAction::Keep,
                CommitAction::Flush,
                CommitAction::Keep,
                CommitAction::Keep,
                CommitAction::Flush
            ]
        );
        assert_eq!(counted.on_signal(CommitSignal::Page), CommitAction::Keep);
        assert_eq!(counted.on_signal(CommitSignal::Document), CommitAction::Flush);
        // A coarser signal restarts the count.
        assert_eq!(counted.on_signal(CommitSignal::Page), CommitAction::Keep);
    }

    #[test]
    fn obfuscation_uses_reversed_guid_bytes() {
        let uri = "/Resources/00112233-4455-6677-8899-AABBCCDDEEFF.odttf";
        let key = obfuscation_key(uri).unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[15], 0xFF);

        let mut data = vec![0u8; 40];
        obfuscate(&mut data, &key);
        assert_eq!(data[0], 0xFF);
        assert_eq!(data[15], 0x00);
        assert_eq!(data[16], 0xFF);
        assert_eq!(data[32..], [0u8; 8]);
        obfuscate(&mut data, &key);
        assert_eq!(data, vec![0u8; 40]);

        assert!(obfuscation_key("/Resources/font.ttf").is_err());
    }

    #[test]
    fn document_policy_links_every_page_and_commits_once() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::document());
        let font = face(0);
        let mut pages = Vec::new();
        for glyph in [1u16, 2, 1] {
            cache.reference(&font, &[glyph], &mut package, &mut LimitTracker::new()).unwrap();
            cache.reference(&font, &[glyph], &mut package, &mut LimitTracker::new()).unwrap();
            pages.push(package.commit_page("<FixedPage/>").unwrap());
            assert_eq!(cache.signal(CommitSignal::Page, &mut package).unwrap(), 0);
        }
        for page in &pages {
            assert_eq!(required(&package, page), 1);
        }
        assert!(font_parts(&package).is_empty());
        assert_eq!(cache.signal(CommitSignal::Document, &mut package).unwrap(), 1);
        assert_eq!(cache.commits(), 1);
        assert_eq!(font_parts(&package).len(), 1);
    }

    #[test]
    fn page_policy_commits_every_page() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::page());
        let font = face(0);
        for _ in 0..3 {
            cache.reference(&font, &[1], &mut package, &mut LimitTracker::new()).unwrap();
            cache.signal(CommitSignal::Page, &mut package).unwrap();
        }
        assert_eq!(cache.commits(), 3);
        assert_eq!(font_parts(&package).len(), 3);
    }

    #[test]
    fn sequence_policy_commits_once_across_documents() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::sequence());
        let font = face(0);
        for _ in 0..2 {
            for _ in 0..3 {
                cache.reference(&font, &[2], &mut package, &mut LimitTracker::new()).unwrap();
                cache.signal(CommitSignal::Page, &mut package).unwrap();
            }
            cache.signal(CommitSignal::Document, &mut package).unwrap();
        }
        assert_eq!(cache.commits(), 0);
        cache.signal(CommitSignal::Sequence, &mut package).unwrap();
        assert_eq!(cache.commits(), 1);
    }

    #[test]
    fn committed_font_is_an_obfuscated_subset() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::page());
        let font = face(0);
        let uri = cache.reference(&font, &[2], &mut package, &mut LimitTracker::new()).unwrap();
        cache.signal(CommitSignal::Page, &mut package).unwrap();

        let mut data = package.part(&uri).unwrap().data.clone();
        assert_eq!(package.part(&uri).unwrap().content_type, OBFUSCATED_FONT_CONTENT_TYPE);
        obfuscate(&mut data, &obfuscation_key(&uri).unwrap());
        let subset = ttf_parser::Face::parse(&data, 0).unwrap();
        assert_eq!(subset.number_of_glyphs(), 5);
        assert!(data.len() < build_font(0).len());
    }

    #[test]
    fn whole_fonts_are_written_once_on_first_reference() {
        for policy in [CommitPolicy::document(), CommitPolicy::page()] {
            let mut package = MemoryPackage::new();
            let mut cache = FontSubsetCache::new(policy);
            let font = face(NO_SUBSETTING);
            let uri = cache.reference(&font, &[1], &mut package, &mut LimitTracker::new()).unwrap();
            assert_eq!(font_parts(&package), vec![uri.clone()]);
            assert_eq!(cache.pending(), 0);

            let mut pages = Vec::new();
            for glyph in [1u16, 2, 3] {
                let again = cache.reference(&font, &[glyph], &mut package, &mut LimitTracker::new());
                assert_eq!(again.unwrap(), uri);
                pages.push(package.commit_page("<FixedPage/>").unwrap());
                assert_eq!(cache.signal(CommitSignal::Page, &mut package).unwrap(), 0);
            }
            assert_eq!(cache.signal(CommitSignal::Document, &mut package).unwrap(), 0);
            assert_eq!(font_parts(&package), vec![uri.clone()]);
            assert_eq!(cache.commits(), 1);
            for page in &pages {
                assert_eq!(required(&package, page), 1);
            }

            let mut data = package.part(&uri).unwrap().data.clone();
            obfuscate(&mut data, &obfuscation_key(&uri).unwrap());
            let original = build_font(NO_SUBSETTING);
            let whole = ttf_parser::Face::parse(&data, 0).unwrap();
            let source = ttf_parser::Face::parse(&original, 0).unwrap();
            assert_eq!(whole.number_of_glyphs(), source.number_of_glyphs());
        }
    }

    #[test]
    fn page_links_count_as_resources() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::document());
        let mut limits = LimitTracker::new();
        for font in [face(0), face(NO_SUBSETTING)] {
            cache.reference(&font, &[1], &mut package, &mut limits).unwrap();
            cache.reference(&font, &[2], &mut package, &mut limits).unwrap();
        }
        assert_eq!(limits.resource_count(), 2);
    }

    #[test]
    fn restricted_fonts_link_the_document_once() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::document());
        let font = face(PREVIEW_AND_PRINT);
        for _ in 0..3 {
            cache.reference(&font, &[1], &mut package, &mut LimitTracker::new()).unwrap();
            cache.signal(CommitSignal::Page, &mut package).unwrap();
        }
        assert_eq!(package.restricted_relationships().len(), 1);
        cache.signal(CommitSignal::Document, &mut package).unwrap();
        cache.reference(&font, &[1], &mut package, &mut LimitTracker::new()).unwrap();
        assert_eq!(package.restricted_relationships().len(), 2);
    }

    #[test]
    fn image_only_fonts_are_refused() {
        let mut package = MemoryPackage::new();
        let mut cache = FontSubsetCache::new(CommitPolicy::document());
        let err = cache.reference(&face(RESTRICTED), &[1], &mut package, &mut LimitTracker::new()).unwrap_err();
        assert!(matches!(err, XpsError::Font(_)));
        assert_eq!(cache.pending(), 0);
    }
}
