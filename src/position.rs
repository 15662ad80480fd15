//! Stable content positions and per-page metadata.

/// A stable position inside an open document: the reading-order item
/// (spine) index plus a byte offset into that item's content.
///
/// The derived ordering is the total order every container in this crate
/// relies on: item index first, then offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    /// Index of the item in the reading-order spine.
    pub item: i16,
    /// Byte offset into the item's content.
    pub offset: i32,
}

impl PositionKey {
    /// Position at `offset` bytes into item `item`.
    pub const fn new(item: i16, offset: i32) -> Self {
        Self { item, offset }
    }

    /// Position of the first byte of item `item`.
    ///
    /// The first page of an item's content is always represented at
    /// offset 0, so this is also the key of the item's first page once
    /// the item has been paginated.
    pub const fn item_start(item: i16) -> Self {
        Self { item, offset: 0 }
    }
}

/// Metadata for one computed page, keyed by the [`PositionKey`] where the
/// page begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Length of the page's content in bytes.
    pub size: i32,
    /// Page number within the document, assigned once the full scan has
    /// completed. Monotonically non-decreasing in key order.
    pub page_number: i16,
}

impl PageInfo {
    /// Page metadata with the page number still unassigned.
    pub const fn sized(size: i32) -> Self {
        Self {
            size,
            page_number: 0,
        }
    }
}
