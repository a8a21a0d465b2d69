use btree_core::tree::{BTreeConfig, BTreeFile};
use buffer_pool_manager::concurrent::ConcurrentBufferPoolManager;
use buffer_pool_manager::directory::PageDirectory;
use common::disk_manager::DiskManager;
use common::rid::RowId;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Owns the scratch db file and pool for one test, so both stay alive
/// for as long as the tree under test does.
pub struct Harness {
    _file: NamedTempFile,
    pub tree: BTreeFile,
}

impl Harness {
    pub fn new() -> Self {
        let file = NamedTempFile::new().expect("create scratch db file");
        let disk_manager = Arc::new(DiskManager::new(file.path().to_str().unwrap(), false).expect("open disk manager"));
        let bpm: Arc<dyn common::api::BufferPoolManager> =
            Arc::new(ConcurrentBufferPoolManager::new(64, disk_manager));
        let directory: Arc<dyn common::directory::Directory> =
            Arc::new(PageDirectory::create(bpm.clone()).expect("create directory"));
        let tree = BTreeFile::open(bpm, directory, BTreeConfig::new("test_index")).expect("open tree");
        Harness { _file: file, tree }
    }
}

pub fn rid(page_id: usize, slot_index: u16) -> RowId {
    RowId { page_id, slot_index }
}
