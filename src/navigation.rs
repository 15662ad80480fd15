//! NCX navigation-document parsing.
//!
//! Parses the EPUB 2.0 NCX (`toc.ncx`) navigation map into a flat list of
//! entries in document order, each carrying its nesting level. A flat list
//! is what the table-of-contents store persists and what a menu UI renders,
//! so the tree is never materialized.
//!
//! Also provides the href helpers used when resolving entries against the
//! package manifest: splitting off a `#fragment` and percent-decoding the
//! path portion.
//!
//! # Usage
//!
//! ```rust
//! use epub_paginate::navigation::{parse_ncx, split_fragment, percent_decode};
//!
//! # fn example() -> Result<(), epub_paginate::error::PaginateError> {
//! let ncx_bytes = br#"<ncx><navMap>
//!   <navPoint><navLabel><text>Chapter 1</text></navLabel>
//!     <content src="chapter%201.html#s2"/></navPoint>
//! </navMap></ncx>"#;
//! let entries = parse_ncx(ncx_bytes)?;
//! let (path, fragment) = split_fragment(&entries[0].href);
//! assert_eq!(percent_decode(path), "chapter 1.html");
//! assert_eq!(fragment, Some("s2"));
//! # Ok(())
//! # }
//! ```

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::PaginateError;

/// Limits for navigation parsing and structure growth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NavLimits {
    /// Maximum number of navigation entries.
    pub max_entries: usize,
    /// Maximum allowed nav tree depth.
    pub max_depth: usize,
    /// Maximum UTF-8 byte length for labels.
    pub max_label_bytes: usize,
    /// Maximum UTF-8 byte length for href values.
    pub max_href_bytes: usize,
}

impl Default for NavLimits {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            max_depth: 64,
            max_label_bytes: 4096,
            max_href_bytes: 4096,
        }
    }
}

impl NavLimits {
    /// Embedded-focused preset with smaller bounds.
    pub fn embedded() -> Self {
        Self {
            max_entries: 1024,
            max_depth: 32,
            max_label_bytes: 1024,
            max_href_bytes: 2048,
        }
    }
}

/// One navigation point, flattened out of the NCX tree.
///
/// Entries appear in document order (depth-first); `level` is the nesting
/// depth, 0 for top-level chapters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NavEntry {
    /// Display label for this navigation point.
    pub label: String,
    /// Content href (relative path, possibly with fragment).
    pub href: String,
    /// Nesting depth within the navigation map.
    pub level: u8,
}

/// Parse an NCX navigation document into flat, document-order entries.
pub fn parse_ncx(content: &[u8]) -> Result<Vec<NavEntry>, PaginateError> {
    parse_ncx_with_limits(content, NavLimits::default())
}

/// Parse an NCX navigation document with explicit limits.
///
/// Entries without a `<content src="...">` target are dropped; an empty
/// label is kept as-is (some books publish unlabeled points).
pub fn parse_ncx_with_limits(
    content: &[u8],
    limits: NavLimits,
) -> Result<Vec<NavEntry>, PaginateError> {
    let mut reader = quick_xml::reader::Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut entries: Vec<NavEntry> = Vec::with_capacity(8);
    let mut buf = alloc::vec::Vec::with_capacity(8);

    // Indices into `entries` of the navPoints currently open; the top of the
    // stack is the point that label/content events belong to. Reserving the
    // entry at <navPoint> start keeps the output in document order.
    let mut open: Vec<usize> = Vec::with_capacity(8);
    let mut in_nav_map = false;
    let mut in_text = false;

    use quick_xml::events::Event;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"navMap" => {
                    in_nav_map = true;
                }
                b"navPoint" if in_nav_map => {
                    if open.len() >= limits.max_depth {
                        return Err(PaginateError::Navigation(alloc::format!(
                            "navigation depth exceeds max_depth ({} > {})",
                            open.len() + 1,
                            limits.max_depth
                        )));
                    }
                    if entries.len() >= limits.max_entries {
                        return Err(PaginateError::Navigation(alloc::format!(
                            "navigation entries exceed max_entries ({} > {})",
                            entries.len() + 1,
                            limits.max_entries
                        )));
                    }
                    open.push(entries.len());
                    entries.push(NavEntry {
                        label: String::with_capacity(32),
                        href: String::with_capacity(32),
                        level: open.len() as u8 - 1,
                    });
                }
                b"text" if in_nav_map => {
                    in_text = true;
                }
                b"content" if in_nav_map => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"src" {
                            let src = reader
                                .decoder()
                                .decode(attr.value.as_ref())
                                .unwrap_or_default();
                            if src.len() > limits.max_href_bytes {
                                return Err(PaginateError::Navigation(alloc::format!(
                                    "navigation href exceeds max_href_bytes ({} > {})",
                                    src.len(),
                                    limits.max_href_bytes
                                )));
                            }
                            if let Some(&idx) = open.last() {
                                entries[idx].href = src.into_owned();
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    if let Some(&idx) = open.last() {
                        let text = reader.decoder().decode(&e).unwrap_or_default();
                        let label = &mut entries[idx].label;
                        label.push_str(text.as_ref());
                        if label.len() > limits.max_label_bytes {
                            return Err(PaginateError::Navigation(alloc::format!(
                                "navigation label exceeds max_label_bytes ({} > {})",
                                label.len(),
                                limits.max_label_bytes
                            )));
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"text" => {
                    in_text = false;
                }
                b"navPoint" => {
                    open.pop();
                }
                b"navMap" => {
                    in_nav_map = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PaginateError::Navigation(alloc::format!(
                    "NCX parse error: {:?}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    entries.retain(|entry| !entry.href.is_empty());
    Ok(entries)
}

/// Split an href into its path portion and optional fragment id.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.find('#') {
        Some(pos) => (&href[..pos], Some(&href[pos + 1..])),
        None => (href, None),
    }
}

/// Percent-decode the path portion of an href (`%20` and friends).
///
/// A `%` not followed by two hex digits is kept literally. Decoded bytes
/// that are not valid UTF-8 are replaced, not rejected; manifest hrefs are
/// compared after decoding and a replacement simply fails the lookup.
pub fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    match String::from_utf8(out) {
        Ok(decoded) => decoded,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
