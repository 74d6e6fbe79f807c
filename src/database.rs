use std::{
    path::Path,
    sync::atomic::{self, AtomicBool},
};

use crate::{
    error::error_validation,
    options::DbOptions,
    page_store::PageStore,
    repr::{Key, MetaHeader, PageId, META_PAGE_ID},
    tree::{Tree, TreeStats},
    Error,
};

/// A key-value store backed by a single file.
///
/// Keys are `i32`, values are byte strings of at most [crate::MAX_VALUE_LEN] bytes, longer
/// values are silently truncated.
///
/// Reads take `&self` and may run from multiple threads, writes take `&mut self`. Sharing a
/// store between readers and a writer requires an external lock such as `RwLock<Database>`.
///
/// A failed [Database::put] may leave the tree half updated. It returns [Error::FatalIo] and
/// halts the store: every following operation returns [Error::StoreHalted] and the halt
/// callback set with [DbOptions::set_halt_callback] is invoked.
#[derive(Debug)]
pub struct Database {
    opts: DbOptions,
    store: PageStore,
    tree: Tree,
    /// If set, the store is poisoned and public apis will error
    halted: AtomicBool,
}

impl Database {
    /// Opens or creates the store at `path` with the default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::with_options(DbOptions::new(path))
    }

    /// Opens or creates a store
    pub fn with_options(options: DbOptions) -> Result<Self, Error> {
        options.validate()?;
        let store = PageStore::open(&options)?;
        let root = if options.persist_root {
            Self::load_meta(&store)?
        } else {
            None
        };
        info!(
            "Opened store {} with {} pages, root {:?}",
            options.path.display(),
            store.num_pages(),
            root
        );
        Ok(Self {
            opts: options,
            store,
            tree: Tree::new(root),
            halted: Default::default(),
        })
    }

    /// Reads the root from the meta page, creating the meta page for a new file.
    fn load_meta(store: &PageStore) -> Result<Option<PageId>, Error> {
        if store.num_pages() == 0 {
            let meta_page_id = store.allocate()?;
            debug_assert_eq!(meta_page_id, META_PAGE_ID);
            store.write_page(META_PAGE_ID, &MetaHeader::new(None).to_page())?;
            return Ok(None);
        }
        let meta = MetaHeader::from_page(&store.read_page(META_PAGE_ID)?)?;
        let root = meta.root();
        if let Some(root) = root {
            if root == META_PAGE_ID || root >= store.num_pages() {
                return Err(error_validation!(
                    "Meta page points to root {root}, the file has {} pages",
                    store.num_pages()
                ));
            }
        }
        Ok(root)
    }

    /// Inserts `key` or overwrites its value.
    ///
    /// Values longer than [crate::MAX_VALUE_LEN] bytes are truncated.
    pub fn put(&mut self, key: Key, value: &[u8]) -> Result<(), Error> {
        self.check_halted()?;
        self.put_inner(key, value).map_err(|e| self.halt(e))
    }

    fn put_inner(&mut self, key: Key, value: &[u8]) -> Result<(), Error> {
        let prev_root = self.tree.root();
        self.tree.insert(&self.store, key, value)?;
        if self.opts.persist_root && self.tree.root() != prev_root {
            let meta = MetaHeader::new(self.tree.root());
            self.store.write_page(META_PAGE_ID, &meta.to_page())?;
        }
        Ok(())
    }

    /// Returns the value of `key`, `None` if absent.
    pub fn get(&self, key: Key) -> Result<Option<Vec<u8>>, Error> {
        self.check_halted()?;
        self.tree.get(&self.store, key)
    }

    /// Flushes written pages to the device, a noop with [DbOptions::disable_fsync].
    pub fn sync(&self) -> Result<(), Error> {
        self.check_halted()?;
        self.store.sync()
    }

    /// Syncs and closes the backing file.
    ///
    /// A halted store is closed without syncing and returns [Error::StoreHalted].
    pub fn close(self) -> Result<(), Error> {
        if let Err(e) = self.check_halted() {
            warn!("Closing halted store {}", self.opts.path.display());
            return Err(e);
        }
        info!("Closing store {}", self.opts.path.display());
        self.store.close()
    }

    /// Page holding the tree root, `None` while the store is empty
    pub fn root_page(&self) -> Option<PageId> {
        self.tree.root()
    }

    /// Number of pages in the backing file, including the meta page
    pub fn page_count(&self) -> u32 {
        self.store.num_pages()
    }

    /// Walks the whole tree checking its structural invariants.
    ///
    /// Returns [Error::Validation] describing the first violation found.
    pub fn check_integrity(&self) -> Result<TreeStats, Error> {
        self.check_halted()?;
        self.tree.check(&self.store)
    }

    #[cold]
    fn halt(&self, error: Error) -> Error {
        let error = match error {
            Error::Io(e) => Error::FatalIo(e),
            e => e,
        };
        if !self.halted.swap(true, atomic::Ordering::Release) {
            error!("Halting store {}: {error}", self.opts.path.display());
            if let Some(cb) = self.opts.halt_callback.as_deref() {
                info!("Invoking user provided halt callback");
                (*cb.lock())();
            }
        }
        error
    }

    fn check_halted(&self) -> Result<(), Error> {
        if !self.halted.load(atomic::Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::StoreHalted)
        }
    }
}
