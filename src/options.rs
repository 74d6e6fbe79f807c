use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::error::Error;

/// User callback to be called if the store encounters a fatal error
pub type HaltCallbackFn = Box<dyn FnMut() + Send + Sync + 'static>;

/// Options for a [crate::Database]
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DbOptions {
    pub(crate) path: PathBuf,
    /// Disables all calls to `fsync`, including the one performed by [crate::Database::close].
    ///
    /// Use cases include speeding up tests or throw away stores.
    ///
    /// Default: `false`
    pub disable_fsync: bool,
    /// Whether page 0 is reserved as a meta page recording the root page of the tree.
    ///
    /// Without it the root only lives in memory: a reopened store starts a new, empty tree
    /// after the pages already in the file. A file must always be opened with the same setting
    /// it was created with.
    ///
    /// Default: `true`
    pub persist_root: bool,
    /// Number of pages kept in the page cache. Pages are cached on read and on write,
    /// writes always go to the file as well.
    ///
    /// Default: `0` (disabled)
    pub page_cache_pages: usize,
    /// Callback to be called when the store encounters a fatal error and halts.
    #[debug("{:?}", halt_callback.as_ref().map(Arc::as_ptr))]
    pub(crate) halt_callback: Option<Arc<Mutex<HaltCallbackFn>>>,
}

impl DbOptions {
    /// Options for the store file at `path`, created if it doesn't exist
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            disable_fsync: false,
            persist_root: true,
            page_cache_pages: 0,
            halt_callback: None,
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets the user callback to be called if the store encounters a fatal error
    pub fn set_halt_callback(&mut self, halt_callback: Option<HaltCallbackFn>) {
        self.halt_callback = halt_callback.map(Mutex::new).map(Arc::new);
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::validation("path must not be empty"));
        }
        Ok(())
    }
}
