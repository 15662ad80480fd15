#![allow(dead_code)]

use std::collections::BTreeMap;

use epub_paginate::error::PaginateError;
use epub_paginate::index::{ItemPages, PageMeasurer, PageSlice};
use epub_paginate::package::{DocumentSource, Package};

pub const SAMPLE_OPF: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch1" href="chapter 1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="chapter2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch3" href="chapter3.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="cover"/>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
    <itemref idref="ch3"/>
  </spine>
</package>"#;

pub const SAMPLE_NCX: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/">
  <navMap>
    <navPoint id="n0"><navLabel><text>Cover</text></navLabel>
      <content src="cover.xhtml"/></navPoint>
    <navPoint id="n1"><navLabel><text>Chapter 1</text></navLabel>
      <content src="chapter%201.xhtml"/>
      <navPoint id="n1a"><navLabel><text>Origins</text></navLabel>
        <content src="chapter%201.xhtml#origins"/></navPoint>
    </navPoint>
    <navPoint id="n2"><navLabel><text>Chapter 2</text></navLabel>
      <content src="chapter2.xhtml"/></navPoint>
    <navPoint id="n3"><navLabel><text>Chapter 3</text></navLabel>
      <content src="chapter3.xhtml"/></navPoint>
  </navMap>
</ncx>"#;

/// In-memory document container, standing in for the ZIP/flash layer.
pub struct MemorySource {
    pub name: String,
    pub package: Package,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn sample(name: &str) -> Self {
        let mut files = BTreeMap::new();
        files.insert("toc.ncx".to_owned(), SAMPLE_NCX.to_vec());
        Self {
            name: name.to_owned(),
            package: Package::parse(SAMPLE_OPF).expect("sample OPF parses"),
            files,
        }
    }
}

impl DocumentSource for MemorySource {
    fn current_name(&self) -> &str {
        &self.name
    }

    fn package(&self) -> &Package {
        &self.package
    }

    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, PaginateError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| PaginateError::Structure(format!("{} not in container", name)))
    }
}

/// Deterministic fake renderer: item `i` has `i + 1` pages of
/// `100 * (i + 1)` bytes each, with an optional artificial delay so tests
/// can hold a scan mid-flight.
pub struct FakeRenderer {
    pub item_count: i16,
    pub delay: Option<std::time::Duration>,
}

impl FakeRenderer {
    pub fn new(item_count: i16) -> Self {
        Self {
            item_count,
            delay: None,
        }
    }

    pub fn pages_for(item: i16) -> Vec<PageSlice> {
        let size = 100 * (i32::from(item) + 1);
        (0..=item)
            .map(|page| PageSlice::new(i32::from(page) * size, size))
            .collect()
    }

    pub fn total_pages(item_count: i16) -> usize {
        (1..=item_count as usize).sum()
    }
}

impl PageMeasurer for FakeRenderer {
    fn paginate(&mut self, item: i16) -> Result<ItemPages, PaginateError> {
        if item < 0 || item >= self.item_count {
            return Err(PaginateError::Structure(format!(
                "item {} out of range",
                item
            )));
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(Self::pages_for(item).into_iter().collect())
    }
}
