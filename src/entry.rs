//! Packed entry headers.
//!
//! Every slot of a bucket carries one `u64` header describing a trie node.
//! Both bucket predicates (find a node by identity, find a child by its
//! parent edge) are a single masked equality over that word, which is what
//! lets a reader evaluate them on a seqlock snapshot without any per-field
//! synchronization.

use std::fmt;

/// Largest supported bucket width.
pub const MAX_BUCKET_WIDTH: usize = 8;

/// Edge label that terminates every key.
pub const END_SYMBOL: u16 = 256;

/// Color of the virtual root node. Never assigned to a stored node.
pub const ROOT_COLOR: u8 = 0xFE;

/// Color written into unused slots, so an empty header never satisfies an
/// identity query.
pub const EMPTY_COLOR: u8 = 0xFF;

/// Maximum configurable width of the color field.
pub const MAX_COLOR_BITS: u32 = 7;

/// Maximum configurable width of the tag field.
pub const MAX_TAG_BITS: u32 = 16;

/// Edge symbol `depth` of `key`: the key byte, or [`END_SYMBOL`] once the key
/// is exhausted.
#[inline]
pub fn symbol_at(key: &[u8], depth: usize) -> u16 {
    match key.get(depth) {
        Some(&b) => u16::from(b),
        None => END_SYMBOL,
    }
}

/// Kind of node stored in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    Unused = 0,
    Leaf = 1,
    Internal = 2,
    /// A leaf whose split is in progress. Readers treat it as a leaf; writers
    /// that reach it back off until the split completes.
    FrozenLeaf = 3,
}

impl EntryType {
    #[inline]
    fn from_bits(bits: u64) -> Self {
        match bits & Header::TYPE_MASK {
            0 => EntryType::Unused,
            1 => EntryType::Leaf,
            2 => EntryType::Internal,
            _ => EntryType::FrozenLeaf,
        }
    }

    /// Leaves and frozen leaves both own a record.
    #[inline]
    pub fn is_leaf(self) -> bool {
        matches!(self, EntryType::Leaf | EntryType::FrozenLeaf)
    }

    #[inline]
    pub fn is_live(self) -> bool {
        self != EntryType::Unused
    }
}

/// Node header packed into one word.
///
/// Layout (bit 0 = LSB):
/// - `0..2`   entry type
/// - `2`      secondary flag (entry lives in its alternate bucket)
/// - `3..12`  last symbol (byte value, or 256 = end of key)
/// - `12..20` parent color
/// - `20..28` color
/// - `32..48` tag
///
/// The remaining bits are always zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header(u64);

impl Header {
    pub const TYPE_MASK: u64 = 0b11;
    const SECONDARY_BIT: u64 = 1 << 2;
    const SYMBOL_SHIFT: u32 = 3;
    const SYMBOL_MASK: u64 = 0x1FF;
    const PARENT_COLOR_SHIFT: u32 = 12;
    const COLOR_SHIFT: u32 = 20;
    const COLOR_MASK: u64 = 0xFF;
    const TAG_SHIFT: u32 = 32;
    const TAG_MASK: u64 = 0xFFFF;

    /// Header of a slot that has never been claimed or has been vacated.
    pub const EMPTY: Header = Header((EMPTY_COLOR as u64) << Self::COLOR_SHIFT);

    #[inline]
    pub fn new(
        entry_type: EntryType,
        tag: u16,
        color: u8,
        parent_color: u8,
        last_symbol: u16,
        secondary: bool,
    ) -> Self {
        debug_assert!(last_symbol <= END_SYMBOL);
        let mut raw = entry_type as u64;
        if secondary {
            raw |= Self::SECONDARY_BIT;
        }
        raw |= (u64::from(last_symbol) & Self::SYMBOL_MASK) << Self::SYMBOL_SHIFT;
        raw |= u64::from(parent_color) << Self::PARENT_COLOR_SHIFT;
        raw |= u64::from(color) << Self::COLOR_SHIFT;
        raw |= u64::from(tag) << Self::TAG_SHIFT;
        Self(raw)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn entry_type(self) -> EntryType {
        EntryType::from_bits(self.0)
    }

    #[inline]
    pub fn is_secondary(self) -> bool {
        self.0 & Self::SECONDARY_BIT != 0
    }

    #[inline]
    pub fn last_symbol(self) -> u16 {
        ((self.0 >> Self::SYMBOL_SHIFT) & Self::SYMBOL_MASK) as u16
    }

    #[inline]
    pub fn parent_color(self) -> u8 {
        ((self.0 >> Self::PARENT_COLOR_SHIFT) & Self::COLOR_MASK) as u8
    }

    #[inline]
    pub fn color(self) -> u8 {
        ((self.0 >> Self::COLOR_SHIFT) & Self::COLOR_MASK) as u8
    }

    #[inline]
    pub fn tag(self) -> u16 {
        ((self.0 >> Self::TAG_SHIFT) & Self::TAG_MASK) as u16
    }

    #[inline]
    pub fn with_type(self, entry_type: EntryType) -> Self {
        Self((self.0 & !Self::TYPE_MASK) | entry_type as u64)
    }

    #[inline]
    pub fn with_secondary(self, secondary: bool) -> Self {
        if secondary {
            Self(self.0 | Self::SECONDARY_BIT)
        } else {
            Self(self.0 & !Self::SECONDARY_BIT)
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Header::EMPTY {
            return f.write_str("Header::EMPTY");
        }
        f.debug_struct("Header")
            .field("type", &self.entry_type())
            .field("tag", &self.tag())
            .field("color", &self.color())
            .field("parent_color", &self.parent_color())
            .field("last_symbol", &self.last_symbol())
            .field("secondary", &self.is_secondary())
            .finish()
    }
}

/// A masked-equality predicate over headers: `header & mask == value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderQuery {
    pub mask: u64,
    pub value: u64,
}

impl HeaderQuery {
    /// Matches the node with this `(tag, color)` stored with this secondary flag.
    #[inline]
    pub fn identity(tag: u16, color: u8, secondary: bool) -> Self {
        let mask = (Header::TAG_MASK << Header::TAG_SHIFT)
            | (Header::COLOR_MASK << Header::COLOR_SHIFT)
            | Header::SECONDARY_BIT;
        let mut value =
            (u64::from(tag) << Header::TAG_SHIFT) | (u64::from(color) << Header::COLOR_SHIFT);
        if secondary {
            value |= Header::SECONDARY_BIT;
        }
        Self { mask, value }
    }

    /// Matches the child reached from a parent of color `parent_color` via
    /// `last_symbol`, whose placement hash produced `tag`.
    #[inline]
    pub fn parent_edge(tag: u16, parent_color: u8, last_symbol: u16, secondary: bool) -> Self {
        let mask = (Header::TAG_MASK << Header::TAG_SHIFT)
            | (Header::COLOR_MASK << Header::PARENT_COLOR_SHIFT)
            | (Header::SYMBOL_MASK << Header::SYMBOL_SHIFT)
            | Header::SECONDARY_BIT;
        let mut value = (u64::from(tag) << Header::TAG_SHIFT)
            | (u64::from(parent_color) << Header::PARENT_COLOR_SHIFT)
            | ((u64::from(last_symbol) & Header::SYMBOL_MASK) << Header::SYMBOL_SHIFT);
        if secondary {
            value |= Header::SECONDARY_BIT;
        }
        Self { mask, value }
    }

    #[inline]
    pub fn matches(self, header: u64) -> bool {
        header & self.mask == self.value
    }
}
