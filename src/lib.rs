//! Embedded key-value store on a disk-paged B+ tree.
//!
//! Integer keys map to byte-string values. Tree nodes are encoded into fixed-size pages of a
//! single backing file, one node per page, and every operation reads and writes whole pages
//! through the page store. See [Database] for the public interface.
//!
//! ```no_run
//! use pagetree::Database;
//!
//! let mut db = Database::open("kv.db").unwrap();
//! db.put(1, b"one").unwrap();
//! assert_eq!(db.get(1).unwrap().as_deref(), Some(&b"one"[..]));
//! db.close().unwrap();
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_more;

mod database;
mod error;
mod node;
mod options;
mod page_store;
mod repr;
mod tree;
pub mod utils;

pub use database::Database;
pub use error::Error;
pub use options::{DbOptions, HaltCallbackFn};
pub use repr::{Key, PageId};
pub use tree::TreeStats;

/// Size of every page in the backing file, in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Maximum number of children of an internal node.
pub const BRANCHING_FACTOR: usize = 4;
/// Maximum number of keys held by any node.
pub const MAX_KEYS: usize = BRANCHING_FACTOR - 1;
/// Maximum number of children held by an internal node.
pub const MAX_CHILDREN: usize = BRANCHING_FACTOR;
/// Values longer than this are truncated to their first `MAX_VALUE_LEN` bytes.
pub const MAX_VALUE_LEN: usize = 256;
