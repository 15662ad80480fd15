//! OPF package-document parsing and the document source seam.
//!
//! The package document supplies the two structures pagination and the
//! table of contents resolve against: the manifest (id → href) and the
//! reading-order spine (ordered idrefs). Container handling stays outside
//! this crate; raw bytes come in through [`DocumentSource`].

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::PaginateError;

/// One manifest `<item>`: its id and the href it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestItem {
    /// Manifest id, referenced by spine itemrefs.
    pub id: String,
    /// Path of the resource within the document container.
    pub href: String,
}

/// Parsed package structure: manifest items and spine reading order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Package {
    /// Manifest items in document order.
    pub manifest: Vec<ManifestItem>,
    /// Spine idrefs in reading order.
    pub spine: Vec<String>,
}

impl Package {
    /// Parse an OPF package document.
    ///
    /// Fails if the document has no `<manifest>` or no `<spine>`, or if the
    /// spine is too long to index with an `i16`.
    pub fn parse(content: &[u8]) -> Result<Package, PaginateError> {
        let mut reader = quick_xml::reader::Reader::from_reader(content);
        reader.config_mut().trim_text(true);

        let mut package = Package::default();
        let mut buf = alloc::vec::Vec::with_capacity(8);
        let mut saw_manifest = false;
        let mut saw_spine = false;
        let mut in_manifest = false;
        let mut in_spine = false;

        use quick_xml::events::Event;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                    b"manifest" => {
                        saw_manifest = true;
                        in_manifest = true;
                    }
                    b"spine" => {
                        saw_spine = true;
                        in_spine = true;
                    }
                    b"item" if in_manifest => {
                        let mut id = None;
                        let mut href = None;
                        for attr in e.attributes().flatten() {
                            let value = reader
                                .decoder()
                                .decode(attr.value.as_ref())
                                .unwrap_or_default();
                            match attr.key.as_ref() {
                                b"id" => id = Some(value.into_owned()),
                                b"href" => href = Some(value.into_owned()),
                                _ => {}
                            }
                        }
                        if let (Some(id), Some(href)) = (id, href) {
                            package.manifest.push(ManifestItem { id, href });
                        }
                    }
                    b"itemref" if in_spine => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"idref" {
                                let idref = reader
                                    .decoder()
                                    .decode(attr.value.as_ref())
                                    .unwrap_or_default();
                                package.spine.push(idref.into_owned());
                            }
                        }
                    }
                    _ => {}
                },
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"manifest" => in_manifest = false,
                    b"spine" => in_spine = false,
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(PaginateError::Structure(alloc::format!(
                        "OPF parse error: {:?}",
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        if !saw_manifest {
            return Err(PaginateError::Structure("no manifest in OPF".into()));
        }
        if !saw_spine {
            return Err(PaginateError::Structure("no spine in OPF".into()));
        }
        if package.spine.len() > i16::MAX as usize {
            return Err(PaginateError::Structure(alloc::format!(
                "spine too long to index ({} itemrefs)",
                package.spine.len()
            )));
        }
        Ok(package)
    }

    /// Href of the manifest item with the given id.
    pub fn manifest_href(&self, id: &str) -> Option<&str> {
        self.manifest
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.href.as_str())
    }

    /// Id of the manifest item whose href matches exactly.
    pub fn item_id_by_href(&self, href: &str) -> Option<&str> {
        self.manifest
            .iter()
            .find(|item| item.href == href)
            .map(|item| item.id.as_str())
    }

    /// Position of an idref in the reading-order spine.
    pub fn spine_index(&self, idref: &str) -> Option<i16> {
        self.spine
            .iter()
            .position(|entry| entry == idref)
            .map(|pos| pos as i16)
    }

    /// Number of reading-order items.
    pub fn spine_len(&self) -> i16 {
        self.spine.len() as i16
    }
}

/// Access to an open document's contents and package structure.
///
/// Implemented by the container layer (ZIP reader, flash filesystem, test
/// fixture). `retrieve` takes `&mut self` so streaming readers can seek.
pub trait DocumentSource {
    /// Name of the currently open document (used to derive sidecar paths).
    fn current_name(&self) -> &str;

    /// The parsed package structure.
    fn package(&self) -> &Package;

    /// Raw bytes of a resource, addressed by its manifest href.
    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, PaginateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata><title>Sample</title></metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="chapter 2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    #[test]
    fn parse_manifest_and_spine() {
        let package = Package::parse(OPF).unwrap();
        assert_eq!(package.manifest.len(), 4);
        assert_eq!(package.spine, vec!["ch1", "ch2"]);
        assert_eq!(package.spine_len(), 2);
    }

    #[test]
    fn manifest_lookups() {
        let package = Package::parse(OPF).unwrap();
        assert_eq!(package.manifest_href("ncx"), Some("toc.ncx"));
        assert_eq!(package.manifest_href("missing"), None);
        assert_eq!(package.item_id_by_href("chapter 2.xhtml"), Some("ch2"));
        assert_eq!(package.item_id_by_href("chapter%202.xhtml"), None);
    }

    #[test]
    fn spine_index_is_reading_order() {
        let package = Package::parse(OPF).unwrap();
        assert_eq!(package.spine_index("ch1"), Some(0));
        assert_eq!(package.spine_index("ch2"), Some(1));
        assert_eq!(package.spine_index("css"), None);
    }

    #[test]
    fn missing_manifest_is_rejected() {
        let opf = br#"<package><spine><itemref idref="a"/></spine></package>"#;
        match Package::parse(opf) {
            Err(PaginateError::Structure(msg)) => assert!(msg.contains("manifest")),
            other => panic!("expected structure error, got {:?}", other),
        }
    }

    #[test]
    fn missing_spine_is_rejected() {
        let opf = br#"<package><manifest><item id="a" href="a.xhtml"/></manifest></package>"#;
        match Package::parse(opf) {
            Err(PaginateError::Structure(msg)) => assert!(msg.contains("spine")),
            other => panic!("expected structure error, got {:?}", other),
        }
    }

    #[test]
    fn items_without_id_or_href_are_skipped() {
        let opf = br#"<package>
  <manifest>
    <item href="orphan.xhtml"/>
    <item id="ok" href="ok.xhtml"/>
    <item id="no-href"/>
  </manifest>
  <spine><itemref idref="ok"/></spine>
</package>"#;
        let package = Package::parse(opf).unwrap();
        assert_eq!(package.manifest.len(), 1);
        assert_eq!(package.manifest[0].id, "ok");
    }

    #[test]
    fn empty_spine_parses() {
        let opf = br#"<package><manifest><item id="a" href="a.xhtml"/></manifest><spine/></package>"#;
        let package = Package::parse(opf).unwrap();
        assert!(package.spine.is_empty());
    }
}
