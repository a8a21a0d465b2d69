//! A [`Directory`] implementation backed by a single dedicated catalog
//! page: a small, fixed-format table of `name -> root page id` entries,
//! read and rewritten as a whole on every mutation. Good enough for the
//! handful of named trees a test or small deployment opens; not meant
//! to scale to a large catalog.

use common::api::{BpmError, BufferPoolManager, PageId, PAGE_SIZE};
use common::directory::Directory;
use std::sync::{Arc, RwLock};

const NAME_CAPACITY: usize = 48;
/// 1 byte name length + NAME_CAPACITY name bytes + 8 byte page id.
const ENTRY_SIZE: usize = 1 + NAME_CAPACITY + 8;
/// 4 byte entry count header.
const HEADER_SIZE: usize = 4;

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    page_id: PageId,
}

/// A page-backed name directory. Entries are cached in memory and the
/// catalog page is rewritten in full on every mutation; reads never
/// touch the buffer pool.
#[derive(Debug)]
pub struct PageDirectory {
    bpm: Arc<dyn BufferPoolManager>,
    catalog_page_id: PageId,
    entries: RwLock<Vec<Entry>>,
}

impl PageDirectory {
    /// Allocates a fresh catalog page and returns a directory over it.
    pub fn create(bpm: Arc<dyn BufferPoolManager>) -> Result<Self, BpmError> {
        let mut guard = bpm.new_page()?;
        let catalog_page_id = guard.page_id();
        Self::write_entries(&mut *guard, &[]);
        guard.mark_dirty();
        drop(guard);
        Ok(Self { bpm, catalog_page_id, entries: RwLock::new(Vec::new()) })
    }

    /// Opens a directory over a catalog page written by an earlier [`PageDirectory::create`].
    pub fn open(bpm: Arc<dyn BufferPoolManager>, catalog_page_id: PageId) -> Result<Self, BpmError> {
        let guard = bpm.fetch_page(catalog_page_id)?;
        let entries = Self::read_entries(&guard);
        Ok(Self { bpm, catalog_page_id, entries: RwLock::new(entries) })
    }

    /// The page this directory's catalog lives on, for persisting
    /// alongside a database's other well-known page ids.
    pub fn catalog_page_id(&self) -> PageId {
        self.catalog_page_id
    }

    fn read_entries(data: &[u8]) -> Vec<Entry> {
        let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = HEADER_SIZE + i * ENTRY_SIZE;
            let name_len = data[offset] as usize;
            let name_bytes = &data[offset + 1..offset + 1 + name_len];
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            let page_id_offset = offset + 1 + NAME_CAPACITY;
            let page_id =
                u64::from_le_bytes(data[page_id_offset..page_id_offset + 8].try_into().unwrap()) as PageId;
            entries.push(Entry { name, page_id });
        }
        entries
    }

    fn write_entries(data: &mut [u8], entries: &[Entry]) {
        data.fill(0);
        data[0..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
        for (i, entry) in entries.iter().enumerate() {
            let offset = HEADER_SIZE + i * ENTRY_SIZE;
            let name_bytes = entry.name.as_bytes();
            let name_len = name_bytes.len().min(NAME_CAPACITY);
            data[offset] = name_len as u8;
            data[offset + 1..offset + 1 + name_len].copy_from_slice(&name_bytes[..name_len]);
            let page_id_offset = offset + 1 + NAME_CAPACITY;
            data[page_id_offset..page_id_offset + 8]
                .copy_from_slice(&(entry.page_id as u64).to_le_bytes());
        }
    }

    fn persist(&self, entries: &[Entry]) -> Result<(), BpmError> {
        if HEADER_SIZE + entries.len() * ENTRY_SIZE > PAGE_SIZE {
            // The catalog page is full; callers add entries rarely
            // enough in practice that growing it onto multiple pages
            // isn't worth the complexity here.
            return Err(BpmError::NoFreeFrames);
        }
        let mut guard = self.bpm.fetch_page(self.catalog_page_id)?;
        Self::write_entries(&mut *guard, entries);
        guard.mark_dirty();
        Ok(())
    }
}

impl Directory for PageDirectory {
    fn get_file_entry(&self, name: &str) -> Result<Option<PageId>, BpmError> {
        let entries = self.entries.read().unwrap();
        Ok(entries.iter().find(|e| e.name == name).map(|e| e.page_id))
    }

    fn add_file_entry(&self, name: &str, page_id: PageId) -> Result<(), BpmError> {
        let mut entries = self.entries.write().unwrap();
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.page_id = page_id,
            None => entries.push(Entry { name: name.to_string(), page_id }),
        }
        self.persist(&entries)
    }

    fn delete_file_entry(&self, name: &str) -> Result<(), BpmError> {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| e.name != name);
        self.persist(&entries)
    }
}
