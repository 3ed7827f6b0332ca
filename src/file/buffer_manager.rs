use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{FileError, FileResult};
use super::page::Page;
use super::BLOCK_COUNT;

/// Fixed-capacity cache of resident pages. The pool is the only gate between
/// logical operators and disk: reads go through `get_page`, new blocks go out
/// through `write_page`, and dirty pages are written back when they are
/// evicted.
///
/// Replacement is FIFO on insertion order, not LRU: a cache hit does not
/// refresh a page's position. The block-access counters depend on this.
pub struct BufferManager {
    temp_dir: PathBuf,
    capacity: usize,
    /// Resident pages in insertion order; index 0 is the eviction candidate.
    pages: Vec<Page>,
    blocks_read: usize,
    blocks_written: usize,
}

impl BufferManager {
    pub fn new<P: Into<PathBuf>>(temp_dir: P) -> Self {
        Self::with_capacity(temp_dir, BLOCK_COUNT)
    }

    pub fn with_capacity<P: Into<PathBuf>>(temp_dir: P, capacity: usize) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            capacity,
            pages: Vec::with_capacity(capacity),
            blocks_read: 0,
            blocks_written: 0,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Blocks read from disk so far. Cache hits do not count.
    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    /// Blocks written to disk so far: dirty evictions plus direct
    /// `write_page` calls.
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    pub fn reset_stats(&mut self) {
        self.blocks_read = 0;
        self.blocks_written = 0;
    }

    pub fn resident_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_resident(&self, owner: &str, index: usize) -> bool {
        self.position(owner, index).is_some()
    }

    /// Fetch block `index` of `owner`, reading it from disk if it is not in
    /// the pool. The returned borrow is valid until the next pool call; a
    /// caller that needs a page across another `get_page` must re-acquire it.
    pub fn get_page(&mut self, owner: &str, index: usize) -> FileResult<&Page> {
        let pos = self.fetch(owner, index, None)?;
        Ok(&self.pages[pos])
    }

    /// Mutable variant of `get_page`. Mutation through the returned borrow is
    /// expected to mark the page dirty so write-back happens on eviction.
    pub fn get_page_mut(&mut self, owner: &str, index: usize) -> FileResult<&mut Page> {
        let pos = self.fetch(owner, index, None)?;
        Ok(&mut self.pages[pos])
    }

    /// Fetch two blocks of the same owner and hold them together. The first
    /// page is reserved while the second is brought in, so fetching the
    /// second can never evict the first.
    pub fn get_page_pair_mut(
        &mut self,
        owner: &str,
        first: usize,
        second: usize,
    ) -> FileResult<(&mut Page, &mut Page)> {
        debug_assert_ne!(first, second);
        self.fetch(owner, first, None)?;
        self.fetch(owner, second, Some((owner, first)))?;
        // The second fetch may have shifted positions; look both up again.
        let pos_a = self.position(owner, first).expect("pinned page evicted");
        let pos_b = self.position(owner, second).expect("fetched page missing");

        let (lo, hi) = (pos_a.min(pos_b), pos_a.max(pos_b));
        let (left, right) = self.pages.split_at_mut(hi);
        if pos_a < pos_b {
            Ok((&mut left[lo], &mut right[0]))
        } else {
            Ok((&mut right[0], &mut left[lo]))
        }
    }

    /// Write a freshly produced block straight to disk without adding it to
    /// the pool. Any stale resident copy of the same block is dropped first.
    pub fn write_page(
        &mut self,
        owner: &str,
        index: usize,
        rows: Vec<Vec<i32>>,
    ) -> FileResult<()> {
        if let Some(pos) = self.position(owner, index) {
            self.pages.remove(pos);
        }
        self.blocks_written += 1;
        let mut page = Page::from_rows(&self.temp_dir, owner, index, rows);
        page.write()
    }

    /// Drop every resident page of `owner` without writing it back. Used when
    /// the owner's block files are about to be deleted or replaced wholesale.
    pub fn discard_pages(&mut self, owner: &str) {
        self.pages.retain(|p| p.owner() != owner);
    }

    /// Rewrite the owner field of every resident page of `old`. Pages keep
    /// their dirty state and will write back under the new name.
    pub fn rename_pages_in_memory(&mut self, old: &str, new: &str) {
        for page in &mut self.pages {
            if page.owner() == old {
                page.rename(&self.temp_dir, new);
            }
        }
    }

    /// Delete the block file for `(owner, index)`. Errors are logged and
    /// swallowed; a missing file is not a failure.
    pub fn delete_page_file(&mut self, owner: &str, index: usize) {
        let path = Page::file_path(&self.temp_dir, owner, index);
        self.delete_file(&path);
    }

    /// Delete an arbitrary engine-owned file. Errors are logged and
    /// swallowed; a missing file is not a failure.
    pub fn delete_file(&self, path: &Path) {
        if let Err(err) = std::fs::remove_file(path) {
            debug!(path = %path.display(), %err, "delete skipped");
        }
    }

    /// Move the block file for `index` from `old` to `new`. Errors are logged
    /// and swallowed.
    pub fn rename_page_file(&mut self, old: &str, new: &str, index: usize) {
        let from = Page::file_path(&self.temp_dir, old, index);
        let to = Page::file_path(&self.temp_dir, new, index);
        if let Err(err) = std::fs::rename(&from, &to) {
            warn!(source = %from.display(), target = %to.display(), %err, "rename failed");
        }
    }

    fn position(&self, owner: &str, index: usize) -> Option<usize> {
        self.pages
            .iter()
            .position(|p| p.owner() == owner && p.index() == index)
    }

    /// Bring `(owner, index)` into the pool and return its position. `keep`
    /// names a block that must survive the eviction this fetch may trigger.
    fn fetch(
        &mut self,
        owner: &str,
        index: usize,
        keep: Option<(&str, usize)>,
    ) -> FileResult<usize> {
        if let Some(pos) = self.position(owner, index) {
            return Ok(pos);
        }

        self.blocks_read += 1;
        let page = Page::load(&self.temp_dir, owner, index)?;

        while self.pages.len() >= self.capacity {
            let victim = self
                .pages
                .iter()
                .position(|p| keep != Some((p.owner(), p.index())))
                .ok_or(FileError::PoolExhausted)?;
            self.evict(victim);
        }

        self.pages.push(page);
        Ok(self.pages.len() - 1)
    }

    fn evict(&mut self, pos: usize) {
        let mut page = self.pages.remove(pos);
        debug!(owner = page.owner(), index = page.index(), dirty = page.is_dirty(), "evict");
        if page.is_dirty() {
            self.blocks_written += 1;
            if let Err(err) = page.write() {
                warn!(owner = page.owner(), index = page.index(), %err, "write-back failed");
            }
        }
    }
}
