//! A lock-based buffer pool manager using CLOCK replacement. Each frame
//! is its own `RwLock`, so pages in different frames can be fetched and
//! written concurrently; only the page table and free list share a
//! coarser lock.

use common::api::{BpmError, BufferPoolManager, PageGuard, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use common::disk_manager::DiskManager;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock};

type FrameId = usize;

#[derive(Debug)]
struct Frame {
    page_id: PageId,
    data: [u8; PAGE_SIZE],
    pin_count: usize,
    is_dirty: bool,
    is_referenced: bool,
}

/// A buffer pool manager backed by a fixed array of frames, each guarded
/// by its own `RwLock` so unrelated pages don't contend.
#[derive(Debug)]
pub struct ConcurrentBufferPoolManager {
    frames: Vec<RwLock<Frame>>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    free_list: Mutex<Vec<FrameId>>,
    disk_manager: Arc<DiskManager>,
    pool_size: usize,
    clock_hand: Mutex<usize>,
}

/// A page guard for [`ConcurrentBufferPoolManager`]. Holds no lock
/// between accesses; each `Deref`/`DerefMut` call takes the frame's
/// `RwLock` for the duration of the unsafe lifetime-extended borrow,
/// which is sound because the guard's existence keeps the page pinned
/// and therefore not subject to eviction or reuse.
pub struct ConcurrentPageGuard<'a> {
    bpm: &'a ConcurrentBufferPoolManager,
    page_id: PageId,
    frame_id: FrameId,
    is_dirty: bool,
}

impl<'a> PageGuard for ConcurrentPageGuard<'a> {
    fn page_id(&self) -> PageId {
        self.page_id
    }

    fn mark_dirty(&mut self) {
        self.is_dirty = true;
        self.bpm.frames[self.frame_id].write().unwrap().is_dirty = true;
    }
}

impl<'a> Deref for ConcurrentPageGuard<'a> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        let frame = self.bpm.frames[self.frame_id].read().unwrap();
        // SAFETY: the page is pinned for as long as this guard lives, so
        // its frame cannot be selected as an eviction victim or reused
        // for another page; the extended borrow cannot outlive `self`.
        unsafe { &*(&frame.data as *const _) }
    }
}

impl<'a> DerefMut for ConcurrentPageGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let mut frame = self.bpm.frames[self.frame_id].write().unwrap();
        // SAFETY: see `Deref` above; mutation doesn't imply dirtiness by
        // itself, callers must call `mark_dirty` to have it written back.
        unsafe { &mut *(&mut frame.data as *mut _) }
    }
}

impl<'a> Drop for ConcurrentPageGuard<'a> {
    fn drop(&mut self) {
        let _ = self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

impl BufferPoolManager for ConcurrentBufferPoolManager {
    fn fetch_page(&self, page_id: PageId) -> Result<Box<dyn PageGuard + '_>, BpmError> {
        let pt = self.page_table.read().unwrap();
        if let Some(&frame_id) = pt.get(&page_id) {
            let mut frame = self.frames[frame_id].write().unwrap();
            frame.pin_count += 1;
            frame.is_referenced = true;
            return Ok(Box::new(ConcurrentPageGuard { bpm: self, page_id, frame_id, is_dirty: false }));
        }
        drop(pt);

        let frame_id = self.find_victim_frame()?;
        let mut frame = self.frames[frame_id].write().unwrap();

        if frame.is_dirty {
            self.disk_manager.write_page(frame.page_id, &frame.data).map_err(BpmError::IoError)?;
        }

        let old_page_id = frame.page_id;
        self.disk_manager.read_page(page_id, &mut frame.data).map_err(BpmError::IoError)?;
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        frame.is_referenced = true;
        drop(frame);

        let mut pt = self.page_table.write().unwrap();
        pt.remove(&old_page_id);
        pt.insert(page_id, frame_id);

        Ok(Box::new(ConcurrentPageGuard { bpm: self, page_id, frame_id, is_dirty: false }))
    }

    fn new_page(&self) -> Result<Box<dyn PageGuard + '_>, BpmError> {
        let frame_id = self.find_victim_frame()?;
        let mut frame = self.frames[frame_id].write().unwrap();

        if frame.is_dirty {
            self.disk_manager.write_page(frame.page_id, &frame.data).map_err(BpmError::IoError)?;
        }

        let old_page_id = frame.page_id;
        let new_page_id = self.disk_manager.allocate_page();

        frame.page_id = new_page_id;
        frame.pin_count = 1;
        frame.is_dirty = true;
        frame.is_referenced = true;
        frame.data = [0; PAGE_SIZE];
        drop(frame);

        let mut pt = self.page_table.write().unwrap();
        pt.remove(&old_page_id);
        pt.insert(new_page_id, frame_id);

        Ok(Box::new(ConcurrentPageGuard { bpm: self, page_id: new_page_id, frame_id, is_dirty: true }))
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BpmError> {
        let pt = self.page_table.read().unwrap();
        if let Some(&frame_id) = pt.get(&page_id) {
            let mut frame = self.frames[frame_id].write().unwrap();
            if frame.pin_count > 0 {
                frame.pin_count -= 1;
            }
            if is_dirty {
                frame.is_dirty = true;
            }
        }
        Ok(())
    }

    fn free_page(&self, page_id: PageId) -> Result<(), BpmError> {
        let mut pt = self.page_table.write().unwrap();
        if let Some(&frame_id) = pt.get(&page_id) {
            let mut frame = self.frames[frame_id].write().unwrap();
            if frame.pin_count > 0 {
                return Err(BpmError::PageNotFound(page_id));
            }
            pt.remove(&page_id);
            *frame = Frame {
                page_id: INVALID_PAGE_ID,
                data: [0; PAGE_SIZE],
                pin_count: 0,
                is_dirty: false,
                is_referenced: false,
            };
            drop(frame);
            self.free_list.lock().unwrap().push(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BpmError> {
        let pt = self.page_table.read().unwrap();
        if let Some(&frame_id) = pt.get(&page_id) {
            let mut frame = self.frames[frame_id].write().unwrap();
            if frame.is_dirty {
                self.disk_manager.write_page(page_id, &frame.data).map_err(BpmError::IoError)?;
                frame.is_dirty = false;
            }
        }
        Ok(())
    }

    fn flush_all_pages(&self) -> Result<(), BpmError> {
        let pt = self.page_table.read().unwrap();
        for (&page_id, &frame_id) in pt.iter() {
            let mut frame = self.frames[frame_id].write().unwrap();
            if frame.is_dirty {
                self.disk_manager.write_page(page_id, &frame.data).map_err(BpmError::IoError)?;
                frame.is_dirty = false;
            }
        }
        Ok(())
    }
}

impl ConcurrentBufferPoolManager {
    /// Creates a pool of `pool_size` frames over `disk_manager`.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(RwLock::new(Frame {
                page_id: INVALID_PAGE_ID,
                data: [0; PAGE_SIZE],
                pin_count: 0,
                is_dirty: false,
                is_referenced: false,
            }));
            free_list.push(i);
        }

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            disk_manager,
            pool_size,
            clock_hand: Mutex::new(0),
        }
    }

    fn find_victim_frame(&self) -> Result<FrameId, BpmError> {
        let mut free_list = self.free_list.lock().unwrap();
        if let Some(frame_id) = free_list.pop() {
            return Ok(frame_id);
        }
        drop(free_list);

        let mut clock_hand = self.clock_hand.lock().unwrap();
        for _ in 0..(2 * self.pool_size) {
            let frame_id = *clock_hand;

            if let Ok(mut frame) = self.frames[frame_id].try_write() {
                if frame.pin_count == 0 {
                    if frame.is_referenced {
                        frame.is_referenced = false;
                    } else {
                        *clock_hand = (*clock_hand + 1) % self.pool_size;
                        return Ok(frame_id);
                    }
                }
            }
            *clock_hand = (*clock_hand + 1) % self.pool_size;
        }

        Err(BpmError::NoFreeFrames)
    }
}
