//! Table of contents: build from navigation data, sidecar persistence,
//! offset back-fill.
//!
//! Entries live as a flat list in navigation-document order. Labels start
//! out as individually owned strings while parsing (total length is unknown
//! up front); [`Toc::compact`] merges them into one contiguous NUL-separated
//! buffer and repoints every entry at a byte offset into it. The offset is
//! what goes to disk; it is resolved back to bytes only at the access site
//! ([`Toc::label`] / [`Toc::label_bytes`]).
//!
//! Sidecar layout (via [`RecordStore`]): record 0 is the version header
//! (NUL-padded application tag + format version), record 1 the compacted
//! label buffer, records 2..N one fixed-size entry each. A reader rejects
//! the file unless tag and version match exactly, and a partial read is a
//! failure that leaves the instance cleared, never a partial success.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::error::PaginateError;
use crate::index::PageIndex;
use crate::navigation;
use crate::package::DocumentSource;
use crate::position::PositionKey;
use crate::store::RecordStore;

const SIDECAR_TAG: &[u8] = b"EPUB-PAGINATE";
const TAG_LEN: usize = 16;
const SIDECAR_VERSION: u16 = 1;
const VERSION_RECORD_LEN: usize = TAG_LEN + 2;
// label offset u32 + item i16 + offset i32 + level u8
const ENTRY_RECORD_LEN: usize = 11;

/// Offset of an entry whose fragment target has not been back-filled yet.
pub const UNRESOLVED_OFFSET: i32 = -1;

/// Where an entry's label currently lives.
///
/// `Owned` between parsing and compaction; `Packed` (a byte offset into the
/// shared label buffer) afterwards and when loaded from disk. The offset is
/// never handed out directly; it is resolved at the access site.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LabelRef {
    Owned(String),
    Packed(u32),
}

/// One table-of-contents entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocEntry {
    label: LabelRef,
    /// Target position: spine item index plus byte offset into the item
    /// ([`UNRESOLVED_OFFSET`] while a fragment target awaits back-fill).
    pub position: PositionKey,
    /// Nesting depth in the navigation map, 0 for top-level chapters.
    pub level: u8,
}

/// Table of contents for the currently open document.
#[derive(Default)]
pub struct Toc {
    entries: Vec<TocEntry>,
    label_buf: Vec<u8>,
    // (item, fragment id) -> entry ordinal, for back-filling offsets of
    // fragment targets. Transient: discarded at compaction, never persisted.
    fragments: BTreeMap<(i16, String), usize>,
    ready: bool,
    compacted: bool,
    saved: bool,
}

impl Toc {
    /// Empty, unloaded table of contents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sidecar path for a document: its extension replaced with `toc`.
    pub fn sidecar_path(document: &str) -> PathBuf {
        Path::new(document).with_extension("toc")
    }

    /// Whether a usable entry list is present (loaded or built).
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether labels have been merged into the shared buffer.
    pub fn is_compacted(&self) -> bool {
        self.compacted
    }

    /// Whether the current contents are persisted in a sidecar.
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `idx`, in navigation-document order.
    pub fn entry(&self, idx: usize) -> Option<&TocEntry> {
        self.entries.get(idx)
    }

    /// All entries in navigation-document order.
    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// Exact label bytes of entry `idx`.
    pub fn label_bytes(&self, idx: usize) -> Option<&[u8]> {
        match &self.entries.get(idx)?.label {
            LabelRef::Owned(s) => Some(s.as_bytes()),
            LabelRef::Packed(offset) => packed_label(&self.label_buf, *offset),
        }
    }

    /// Display label of entry `idx`; lossy if the stored bytes are not
    /// valid UTF-8.
    pub fn label(&self, idx: usize) -> Option<Cow<'_, str>> {
        match &self.entries.get(idx)?.label {
            LabelRef::Owned(s) => Some(Cow::Borrowed(s.as_str())),
            LabelRef::Packed(offset) => {
                packed_label(&self.label_buf, *offset).map(String::from_utf8_lossy)
            }
        }
    }

    /// Reset to the unloaded state, releasing entries, the label buffer,
    /// and all transient parse data.
    pub fn clear(&mut self) {
        self.entries = Vec::new();
        self.label_buf = Vec::new();
        self.fragments = BTreeMap::new();
        self.ready = false;
        self.compacted = false;
        self.saved = false;
    }

    /// Load the table of contents from a sidecar store.
    ///
    /// State is cleared first regardless of outcome; any structural
    /// mismatch (bad tag or version, wrong record sizes, truncated entry
    /// sequence, out-of-range label offset) fails the load and leaves the
    /// instance cleared so the caller can fall back to
    /// [`Self::build_from_source`].
    pub fn load(&mut self, path: &Path) -> Result<(), PaginateError> {
        self.clear();
        debug!("reading table of contents: {}", path.display());
        let result = self.read_sidecar(path);
        if let Err(ref e) = result {
            error!("table of contents load failed: {}", e);
            self.clear();
        }
        result
    }

    fn read_sidecar(&mut self, path: &Path) -> Result<(), PaginateError> {
        let mut db = RecordStore::open(path)?;
        if db.record_count() < 3 {
            return Err(PaginateError::Format("sidecar has no entries".into()));
        }

        if !db.advance_to_first() || db.current_record_size() != VERSION_RECORD_LEN {
            return Err(PaginateError::Format("bad version record".into()));
        }
        let mut version_record = [0u8; VERSION_RECORD_LEN];
        db.read_current_record(&mut version_record)?;
        let mut expected_tag = [0u8; TAG_LEN];
        expected_tag[..SIDECAR_TAG.len()].copy_from_slice(SIDECAR_TAG);
        if version_record[..TAG_LEN] != expected_tag {
            return Err(PaginateError::Format("sidecar tag mismatch".into()));
        }
        let version = u16::from_le_bytes([version_record[TAG_LEN], version_record[TAG_LEN + 1]]);
        if version != SIDECAR_VERSION {
            return Err(PaginateError::Format(format!(
                "unsupported sidecar version {}",
                version
            )));
        }

        if !db.advance_to_next() {
            return Err(PaginateError::Format("missing label buffer".into()));
        }
        let buf_len = db.current_record_size();
        if buf_len == 0 {
            return Err(PaginateError::Format("empty label buffer".into()));
        }
        let mut label_buf = vec![0u8; buf_len];
        db.read_current_record(&mut label_buf)?;

        let count = db.record_count() - 2;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if !db.advance_to_next() {
                return Err(PaginateError::Format("truncated entry sequence".into()));
            }
            if db.current_record_size() != ENTRY_RECORD_LEN {
                return Err(PaginateError::Format("bad entry record size".into()));
            }
            let mut record = [0u8; ENTRY_RECORD_LEN];
            db.read_current_record(&mut record)?;
            let entry = decode_entry(&record);
            let LabelRef::Packed(offset) = &entry.label else {
                return Err(PaginateError::Format("bad entry label".into()));
            };
            if packed_label(&label_buf, *offset).is_none() {
                return Err(PaginateError::Format(format!(
                    "label offset {} out of range",
                    offset
                )));
            }
            entries.push(entry);
        }

        self.entries = entries;
        self.label_buf = label_buf;
        self.ready = true;
        self.compacted = true;
        self.saved = true;
        debug!("table of contents loaded: {} entries", self.entries.len());
        Ok(())
    }

    /// Persist the table of contents into a freshly created sidecar store,
    /// compacting first if needed. Idempotent while already saved and
    /// unchanged; back-filling an offset marks the instance unsaved again.
    pub fn save(&mut self, path: &Path) -> Result<(), PaginateError> {
        if self.saved {
            return Ok(());
        }
        self.compact();
        debug!("writing table of contents: {}", path.display());
        let result = self.write_sidecar(path);
        match &result {
            Ok(()) => self.saved = true,
            Err(e) => error!("table of contents save failed: {}", e),
        }
        result
    }

    fn write_sidecar(&self, path: &Path) -> Result<(), PaginateError> {
        let mut db = RecordStore::create(path)?;

        let mut version_record = [0u8; VERSION_RECORD_LEN];
        version_record[..SIDECAR_TAG.len()].copy_from_slice(SIDECAR_TAG);
        version_record[TAG_LEN..].copy_from_slice(&SIDECAR_VERSION.to_le_bytes());
        db.add_record(&version_record)?;
        db.add_record(&self.label_buf)?;

        for entry in &self.entries {
            let offset = match &entry.label {
                LabelRef::Packed(offset) => *offset,
                LabelRef::Owned(_) => {
                    return Err(PaginateError::Format("entry not compacted".into()))
                }
            };
            db.add_record(&encode_entry(offset, entry.position, entry.level))?;
        }
        db.close()
    }

    /// Build the table of contents from the document's navigation data.
    ///
    /// Locates the `ncx` manifest item, retrieves and parses it, and
    /// resolves every navigation point's href to a spine position. Fragment
    /// targets get [`UNRESOLVED_OFFSET`] and a fragment-index record for
    /// later back-fill; fragment-less targets default to offset 0. Fails
    /// (and leaves the instance cleared) when the navigation document or a
    /// referenced file is missing from the manifest, or when the spine does
    /// not contain a referenced item.
    pub fn build_from_source(
        &mut self,
        source: &mut dyn DocumentSource,
    ) -> Result<(), PaginateError> {
        self.clear();
        let result = self.parse_navigation(source);
        if let Err(ref e) = result {
            error!("table of contents build failed: {}", e);
            self.clear();
        }
        result
    }

    fn parse_navigation(&mut self, source: &mut dyn DocumentSource) -> Result<(), PaginateError> {
        let ncx_href = source
            .package()
            .manifest_href("ncx")
            .ok_or_else(|| PaginateError::Structure("no ncx item in manifest".into()))?
            .to_owned();
        let ncx = source.retrieve(&ncx_href)?;
        let nav_entries = navigation::parse_ncx(&ncx)?;
        if nav_entries.is_empty() {
            return Err(PaginateError::Navigation(
                "navigation map has no entries".into(),
            ));
        }

        let package = source.package();
        for nav in nav_entries {
            let (raw_path, fragment) = navigation::split_fragment(&nav.href);
            let path = navigation::percent_decode(raw_path);
            let id = package
                .item_id_by_href(&path)
                .ok_or_else(|| PaginateError::Structure(format!("{} not in manifest", path)))?;
            let item = package.spine_index(id).ok_or_else(|| {
                PaginateError::Structure(format!("manifest item {} not in spine", id))
            })?;

            let offset = match fragment {
                Some(frag) if !frag.is_empty() => {
                    self.fragments
                        .insert((item, frag.to_owned()), self.entries.len());
                    UNRESOLVED_OFFSET
                }
                _ => 0,
            };
            self.entries.push(TocEntry {
                label: LabelRef::Owned(nav.label),
                position: PositionKey::new(item, offset),
                level: nav.level,
            });
        }

        self.ready = true;
        debug!("table of contents built: {} entries", self.entries.len());
        Ok(())
    }

    /// Merge all entry labels into one contiguous NUL-separated buffer and
    /// repoint entries at offsets into it. Discards the fragment index.
    /// No-op when already compacted.
    pub fn compact(&mut self) {
        if self.compacted {
            return;
        }
        let total: usize = self
            .entries
            .iter()
            .map(|entry| match &entry.label {
                LabelRef::Owned(s) => s.len() + 1,
                LabelRef::Packed(offset) => {
                    packed_label(&self.label_buf, *offset).map_or(1, |b| b.len() + 1)
                }
            })
            .sum();

        let mut buf = Vec::with_capacity(total);
        for entry in &mut self.entries {
            let offset = buf.len() as u32;
            match &entry.label {
                LabelRef::Owned(s) => buf.extend_from_slice(s.as_bytes()),
                LabelRef::Packed(old) => {
                    if let Some(bytes) = packed_label(&self.label_buf, *old) {
                        buf.extend_from_slice(bytes);
                    }
                }
            }
            buf.push(0);
            entry.label = LabelRef::Packed(offset);
        }

        self.label_buf = buf;
        self.fragments = BTreeMap::new();
        self.compacted = true;
    }

    /// Back-fill the offset of the entry targeting (current item,
    /// `fragment`), once a real page boundary is known for the current
    /// reading position. The current item comes from the pagination index.
    /// No-op after compaction (the fragment index is gone by then) or when
    /// no entry matches. Returns whether an entry was found.
    pub fn backfill_fragment(&mut self, index: &PageIndex, fragment: &str, offset: i32) -> bool {
        let item = index.current_item();
        let Some(&entry_idx) = self.fragments.get(&(item, fragment.to_owned())) else {
            return false;
        };
        let entry = &mut self.entries[entry_idx];
        if entry.position.offset != offset {
            entry.position.offset = offset;
            self.saved = false;
        }
        true
    }

    /// Fragment-less back-fill: updates the *first* entry (in document
    /// order) whose item index matches the current item.
    ///
    /// With no fragment id there is nothing to disambiguate by, so when
    /// several entries target the same item under different fragments the
    /// first one gets the offset. This is a deliberate, approximate
    /// fallback; in the reading flow it only ever lands on the entry the
    /// reader is positioned at. Returns whether an entry was found.
    pub fn backfill(&mut self, index: &PageIndex, offset: i32) -> bool {
        let item = index.current_item();
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.position.item == item)
        else {
            return false;
        };
        if entry.position.offset != offset {
            entry.position.offset = offset;
            self.saved = false;
        }
        true
    }

    /// Standard open-document path: load the sidecar if present and
    /// version-valid, otherwise rebuild from navigation data and persist
    /// for next time.
    pub fn load_or_build(&mut self, source: &mut dyn DocumentSource) -> Result<(), PaginateError> {
        let sidecar = Self::sidecar_path(source.current_name());
        if self.load(&sidecar).is_ok() {
            return Ok(());
        }
        self.build_from_source(source)?;
        self.compact();
        self.save(&sidecar)
    }
}

/// Label bytes at `offset` in the compacted buffer, up to the NUL.
/// None if the offset is out of range or unterminated.
fn packed_label(buf: &[u8], offset: u32) -> Option<&[u8]> {
    let start = offset as usize;
    if start >= buf.len() {
        return None;
    }
    let end = buf[start..].iter().position(|&b| b == 0)? + start;
    Some(&buf[start..end])
}

fn decode_entry(record: &[u8; ENTRY_RECORD_LEN]) -> TocEntry {
    let label = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    let item = i16::from_le_bytes([record[4], record[5]]);
    let offset = i32::from_le_bytes([record[6], record[7], record[8], record[9]]);
    TocEntry {
        label: LabelRef::Packed(label),
        position: PositionKey::new(item, offset),
        level: record[10],
    }
}

fn encode_entry(label_offset: u32, position: PositionKey, level: u8) -> [u8; ENTRY_RECORD_LEN] {
    let mut record = [0u8; ENTRY_RECORD_LEN];
    record[0..4].copy_from_slice(&label_offset.to_le_bytes());
    record[4..6].copy_from_slice(&position.item.to_le_bytes());
    record[6..10].copy_from_slice(&position.offset.to_le_bytes());
    record[10] = level;
    record
}
