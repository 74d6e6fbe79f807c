use std::{
    fs::{File, OpenOptions},
    io,
    path::PathBuf,
};

use parking_lot::Mutex;

use crate::{
    error::{error_validation, io_invalid_input, io_other},
    options::DbOptions,
    repr::{PageBuf, PageId, NO_PAGE},
    Error, PAGE_SIZE,
};

type PageCache = quick_cache::unsync::Cache<PageId, Box<PageBuf>>;

/// The backing file seen as an array of `PAGE_SIZE` pages.
///
/// Page ids are handed out sequentially and never reused, the next id is always
/// `file length / PAGE_SIZE`. All file access and the allocation counter live behind one mutex.
#[derive(Debug)]
pub(crate) struct PageStore {
    path: PathBuf,
    disable_fsync: bool,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    next_page_id: PageId,
    #[debug(skip)]
    cache: Option<PageCache>,
}

impl PageStore {
    pub fn open(options: &DbOptions) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&options.path)?;
        let file_len = file.metadata()?.len();
        let num_pages = file_len / PAGE_SIZE as u64;
        if num_pages >= u64::from(NO_PAGE) {
            return Err(error_validation!(
                "File {} has {num_pages} pages, more than the addressable maximum",
                options.path.display()
            ));
        }
        if file_len % PAGE_SIZE as u64 != 0 {
            warn!(
                "File {} length {file_len} isn't a multiple of the page size, ignoring {} bytes",
                options.path.display(),
                file_len % PAGE_SIZE as u64
            );
        }
        let cache = (options.page_cache_pages != 0)
            .then(|| PageCache::new(options.page_cache_pages));
        Ok(Self {
            path: options.path.clone(),
            disable_fsync: options.disable_fsync,
            inner: Mutex::new(Inner {
                file,
                next_page_id: num_pages as PageId,
                cache,
            }),
        })
    }

    /// Reserves the next page id and grows the file to cover it.
    ///
    /// The new page reads as zeroes until written.
    pub fn allocate(&self) -> Result<PageId, Error> {
        let mut inner = self.inner.lock();
        let id = inner.next_page_id;
        if id == NO_PAGE {
            return Err(io_other!("Page ids exhausted in {}", self.path.display()));
        }
        // Any bytes past the last whole page are discarded here
        set_len(&inner.file, page_offset(id + 1))?;
        inner.next_page_id = id + 1;
        trace!("Allocated page {id}");
        Ok(id)
    }

    pub fn read_page(&self, id: PageId) -> Result<PageBuf, Error> {
        let mut inner = self.inner.lock();
        inner.check_allocated(id)?;
        if let Some(page) = inner.cache.as_mut().and_then(|c| c.get(&id)) {
            return Ok(**page);
        }
        let mut page = [0u8; PAGE_SIZE];
        read_exact_at(&inner.file, &mut page, page_offset(id))?;
        if let Some(cache) = &mut inner.cache {
            cache.insert(id, Box::new(page));
        }
        Ok(page)
    }

    pub fn write_page(&self, id: PageId, page: &PageBuf) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.check_allocated(id)?;
        inner.write(id, page)
    }

    /// Zeroes the page. The file never shrinks and the id is never handed out again.
    ///
    /// The tree never deletes keys so nothing frees pages yet.
    #[allow(dead_code)]
    pub fn free_page(&self, id: PageId) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.check_allocated(id)?;
        inner.write(id, &[0u8; PAGE_SIZE])?;
        trace!("Freed page {id}");
        Ok(())
    }

    /// Number of allocated pages, also the next page id to be handed out.
    pub fn num_pages(&self) -> PageId {
        self.inner.lock().next_page_id
    }

    pub fn sync(&self) -> Result<(), Error> {
        if self.disable_fsync {
            return Ok(());
        }
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Syncs and releases the file handle.
    pub fn close(self) -> Result<(), Error> {
        self.sync()?;
        let inner = self.inner.into_inner();
        debug!(
            "Closing {} with {} pages",
            self.path.display(),
            inner.next_page_id
        );
        drop(inner.file);
        Ok(())
    }
}

impl Inner {
    #[inline]
    fn check_allocated(&self, id: PageId) -> Result<(), Error> {
        if id >= self.next_page_id {
            return Err(io_invalid_input!(
                "Page {id} isn't allocated, the store has {} pages",
                self.next_page_id
            ));
        }
        Ok(())
    }

    fn write(&mut self, id: PageId, page: &PageBuf) -> Result<(), Error> {
        if let Some(cache) = &mut self.cache {
            // Drop the cached copy first so a failed write can't leave it ahead of the file
            cache.remove(&id);
        }
        write_all_at(&self.file, page, page_offset(id))?;
        if let Some(cache) = &mut self.cache {
            cache.insert(id, Box::new(*page));
        }
        Ok(())
    }
}

#[inline]
fn page_offset(id: PageId) -> u64 {
    u64::from(id) * PAGE_SIZE as u64
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    fail::fail_point!("pread", |s| Err(io::Error::new(
        io::ErrorKind::Other,
        format!("failpoint pread {:?}", s)
    )));
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    fail::fail_point!("pread", |s| Err(io::Error::new(
        io::ErrorKind::Other,
        format!("failpoint pread {:?}", s)
    )));
    while !buf.is_empty() {
        match std::os::windows::fs::FileExt::seek_read(file, buf, offset) {
            Ok(0) => break,
            Ok(n) => {
                let tmp = buf;
                buf = &mut tmp[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if !buf.is_empty() {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "failed to fill whole page",
        ))
    } else {
        Ok(())
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    fail::fail_point!("pwrite", |s| Err(io::Error::new(
        io::ErrorKind::Other,
        format!("failpoint pwrite {:?}", s)
    )));
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(not(unix))]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    fail::fail_point!("pwrite", |s| Err(io::Error::new(
        io::ErrorKind::Other,
        format!("failpoint pwrite {:?}", s)
    )));
    while !buf.is_empty() {
        match std::os::windows::fs::FileExt::seek_write(file, buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole page",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn set_len(file: &File, size: u64) -> io::Result<()> {
    fail::fail_point!("ftruncate", |s| Err(io::Error::new(
        io::ErrorKind::Other,
        format!("failpoint ftruncate {:?}", s)
    )));
    file.set_len(size)
}
