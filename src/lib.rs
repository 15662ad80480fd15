//! Pagination index and sidecar persistence for EPUB readers.
//!
//! This crate sits between a reader UI and a rendering engine on constrained
//! hardware. It keeps the mapping from stable content positions
//! (reading-order item index + byte offset) to page numbers, filling it in
//! the background while the user reads, and it builds and persists the table
//! of contents in a tiny append-only sidecar file next to the book.
//!
//! # Components
//!
//! - [`store::RecordStore`]: sequential append/read record file with a
//!   checksummed framing, used for all sidecar persistence.
//! - [`index::PageIndex`]: thread-safe ordered map from [`PositionKey`] to
//!   [`PageInfo`], populated by a background [`index::Scanner`] and queried
//!   synchronously by the foreground. Queries for items the scan has not
//!   reached yet escalate to a synchronous, out-of-order fill.
//! - [`toc::Toc`]: table of contents built from the NCX navigation document,
//!   compacted into one label buffer, and persisted through the record store.
//!
//! Parsing ([`navigation`], [`package`]) and the value types ([`position`])
//! are `no_std + alloc`; persistence and the background scan require the
//! `std` feature (on by default).
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use epub_paginate::index::{PageIndex, Scanner};
//! use epub_paginate::position::PositionKey;
//!
//! # fn measurer() -> Box<dyn epub_paginate::index::PageMeasurer> { unimplemented!() }
//! let index = Arc::new(PageIndex::new());
//! index.set_measurer(measurer());
//! index.reset_for_document(12);
//! let scanner = Scanner::spawn(Arc::clone(&index));
//!
//! // Foreground navigation is never blocked by the scan.
//! let next = index.next(PositionKey::item_start(0), 1);
//! # let _ = (next, scanner);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod navigation;
pub mod package;
pub mod position;

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod index;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod store;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod toc;

pub use error::PaginateError;
pub use position::{PageInfo, PositionKey};

#[cfg(feature = "std")]
pub use index::{PageIndex, PageMeasurer, PageSlice, ScanEvent, Scanner};
#[cfg(feature = "std")]
pub use store::RecordStore;
#[cfg(feature = "std")]
pub use toc::{Toc, TocEntry};
