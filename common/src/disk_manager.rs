//! Page-addressed file I/O backing the buffer pool implementations.
use super::api::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt; // positioned I/O, safe to call concurrently
use std::os::unix::io::AsRawFd;
use std::sync::Mutex;

/// Manages reading and writing pages to a file on disk.
///
/// Uses positioned I/O (`read_at`/`write_at`) so callers may read and
/// write distinct pages concurrently without a lock on the file itself;
/// only page allocation and the free list need synchronization.
///
/// Page `0` is never handed out (it is [`INVALID_PAGE_ID`]), so real
/// pages start at 1.
#[derive(Debug)]
pub struct DiskManager {
    db_file: File,
    next_page_id: Mutex<PageId>,
    free_list: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Creates a new DiskManager for a given database file.
    ///
    /// `direct_io` requests `O_DIRECT` on the underlying file
    /// descriptor (Linux only) so reads and writes bypass the OS page
    /// cache; the buffer pool is then the only cache in the system.
    /// Best-effort: if the platform or filesystem rejects `O_DIRECT`,
    /// falls back to buffered I/O rather than failing to open.
    pub fn new(db_file_path: &str, direct_io: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_file_path)?;

        if direct_io {
            Self::try_enable_direct_io(&file);
        }

        let metadata = file.metadata()?;
        let page_count = (metadata.len() / PAGE_SIZE as u64) as PageId;
        let next_page_id = page_count.max(1); // reserve page 0

        Ok(Self {
            db_file: file,
            next_page_id: Mutex::new(next_page_id),
            free_list: Mutex::new(Vec::new()),
        })
    }

    #[cfg(target_os = "linux")]
    fn try_enable_direct_io(file: &File) {
        // SAFETY: `file`'s fd is valid for the duration of this call.
        unsafe {
            let fd = file.as_raw_fd();
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_DIRECT);
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn try_enable_direct_io(_file: &File) {}

    /// Reads a page from the database file into the provided buffer.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> io::Result<()> {
        debug_assert_ne!(page_id, INVALID_PAGE_ID);
        let offset = (page_id * PAGE_SIZE) as u64;
        self.db_file.read_exact_at(data, offset)
    }

    /// Writes a page from the buffer into the database file.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> io::Result<()> {
        debug_assert_ne!(page_id, INVALID_PAGE_ID);
        let offset = (page_id * PAGE_SIZE) as u64;
        self.db_file.write_all_at(data, offset)
    }

    /// Allocates a page ID, preferring a freed page over extending the file.
    pub fn allocate_page(&self) -> PageId {
        if let Some(id) = self.free_list.lock().unwrap().pop() {
            return id;
        }
        let mut next_page_id = self.next_page_id.lock().unwrap();
        let page_id = *next_page_id;
        *next_page_id += 1;
        page_id
    }

    /// Returns a page ID to the free list for reuse by a later `allocate_page`.
    pub fn deallocate_page(&self, page_id: PageId) {
        debug_assert_ne!(page_id, INVALID_PAGE_ID);
        self.free_list.lock().unwrap().push(page_id);
    }
}
