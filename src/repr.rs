//! Fixed on-disk layouts.
//!
//! Node page, all integers big-endian:
//!
//! ```text
//! +---------+------+------+------+-----------+---------------------+---------------------------------+
//! | is_leaf | id   | next | prev | key count | keys                | leaf: value slots               |
//! | u8      | u32  | u32  | u32  | u16       | MAX_KEYS x i32      | MAX_KEYS x (u16 + MAX_VALUE_LEN)|
//! |         |      |      |      |           |                     | branch: MAX_CHILDREN x u32      |
//! +---------+------+------+------+-----------+---------------------+---------------------------------+
//! ```
//!
//! Populated keys, value slots and children come first, the remaining slots are zeroed.
//! The rest of the page after the node is zeroed as well.
use std::mem::{offset_of, size_of};

use zerocopy::{
    byteorder::{BigEndian, U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use crate::{error::error_validation, Error, MAX_CHILDREN, MAX_KEYS, MAX_VALUE_LEN, PAGE_SIZE};

pub type PageId = u32;
pub type Key = i32;
pub(crate) type PageBuf = [u8; PAGE_SIZE];

/// Sibling pointer value for "no sibling"
pub const NO_PAGE: PageId = PageId::MAX;

pub const META_PAGE_ID: PageId = 0;
pub const META_PAGE_MAGIC: u64 = 0x5054_5245_4531_B7A3;

pub const IS_LEAF_FLAG: u8 = 1;
pub const IS_BRANCH_FLAG: u8 = 0;

#[derive(Debug, Copy, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct NodeHeader {
    pub is_leaf: u8,
    pub id: U32<BigEndian>,
    pub next: U32<BigEndian>,
    pub prev: U32<BigEndian>,
    pub num_keys: U16<BigEndian>,
}

pub const OFF_IS_LEAF: usize = 0;
pub const OFF_ID: usize = 1;
pub const OFF_NEXT: usize = 5;
pub const OFF_PREV: usize = 9;
pub const OFF_NUM_KEYS: usize = 13;
pub const NODE_HEADER_SIZE: usize = size_of::<NodeHeader>();

pub const KEY_SIZE: usize = size_of::<Key>();
pub const KEYS_OFFSET: usize = NODE_HEADER_SIZE;
pub const KEYS_SIZE: usize = MAX_KEYS * KEY_SIZE;

/// Value slots (leaves) and children (branches) share the same start offset.
pub const SLOTS_OFFSET: usize = KEYS_OFFSET + KEYS_SIZE;
pub const VALUE_LEN_SIZE: usize = size_of::<u16>();
pub const VALUE_SLOT_SIZE: usize = VALUE_LEN_SIZE + MAX_VALUE_LEN;
pub const VALUES_SIZE: usize = MAX_KEYS * VALUE_SLOT_SIZE;
pub const CHILD_SIZE: usize = size_of::<PageId>();
pub const CHILDREN_SIZE: usize = MAX_CHILDREN * CHILD_SIZE;

pub const LEAF_NODE_SIZE: usize = SLOTS_OFFSET + VALUES_SIZE;
pub const BRANCH_NODE_SIZE: usize = SLOTS_OFFSET + CHILDREN_SIZE;

const _: () = assert!(offset_of!(NodeHeader, is_leaf) == OFF_IS_LEAF);
const _: () = assert!(offset_of!(NodeHeader, id) == OFF_ID);
const _: () = assert!(offset_of!(NodeHeader, next) == OFF_NEXT);
const _: () = assert!(offset_of!(NodeHeader, prev) == OFF_PREV);
const _: () = assert!(offset_of!(NodeHeader, num_keys) == OFF_NUM_KEYS);
const _: () = assert!(NODE_HEADER_SIZE == OFF_NUM_KEYS + size_of::<u16>());
const _: () = assert!(LEAF_NODE_SIZE <= PAGE_SIZE);
const _: () = assert!(BRANCH_NODE_SIZE <= PAGE_SIZE);
const _: () = assert!(MAX_VALUE_LEN <= u16::MAX as usize);
const _: () = assert!(MAX_KEYS >= 2 && MAX_KEYS <= u16::MAX as usize);

/// Page 0 when the store persists its root pointer.
#[derive(Debug, Copy, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MetaHeader {
    pub magic: U64<BigEndian>,
    pub root: U32<BigEndian>,
}

impl MetaHeader {
    pub fn new(root: Option<PageId>) -> Self {
        Self {
            magic: U64::new(META_PAGE_MAGIC),
            root: U32::new(root.unwrap_or(NO_PAGE)),
        }
    }

    pub fn root(&self) -> Option<PageId> {
        page_ref(self.root.get())
    }

    pub fn to_page(self) -> PageBuf {
        let mut page = [0u8; PAGE_SIZE];
        page[..size_of::<Self>()].copy_from_slice(self.as_bytes());
        page
    }

    pub fn from_page(page: &PageBuf) -> Result<Self, Error> {
        let (meta, _) = Self::read_from_prefix(&page[..])
            .map_err(|_| error_validation!("Meta page shorter than its header"))?;
        if meta.magic.get() != META_PAGE_MAGIC {
            return Err(error_validation!(
                "Bad meta page magic {:X}, not a pagetree file or written without a meta page",
                meta.magic.get()
            ));
        }
        Ok(meta)
    }
}

/// Decodes an on-disk sibling/root pointer
#[inline]
pub fn page_ref(raw: u32) -> Option<PageId> {
    (raw != NO_PAGE).then_some(raw)
}
