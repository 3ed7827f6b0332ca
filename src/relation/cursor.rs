use crate::file::{BufferManager, FileResult};

/// Forward row iterator over a contiguous range of an object's blocks. The
/// cursor never holds a page borrow between calls; each `next_row` acquires
/// the current page from the pool (a cache hit while the page stays
/// resident) and copies one row out.
#[derive(Debug, Clone)]
pub struct Cursor {
    owner: String,
    page_index: usize,
    row_index: usize,
    end_block: usize,
}

impl Cursor {
    /// Cursor over blocks `[0, block_count)` of `owner`.
    pub fn new(owner: &str, block_count: usize) -> Self {
        Self::with_range(owner, 0, block_count)
    }

    /// Cursor over blocks `[start, end)` of `owner`. Used by the merge phase
    /// of the external sort, where each run is a bounded block range.
    pub fn with_range(owner: &str, start: usize, end: usize) -> Self {
        Self {
            owner: owner.to_string(),
            page_index: start,
            row_index: 0,
            end_block: end,
        }
    }

    /// Random seek to block `k`; the next `next_row` starts at its first row.
    pub fn seek_page(&mut self, k: usize) {
        self.page_index = k;
        self.row_index = 0;
    }

    /// Return the current row and advance, moving to the next block when the
    /// current one is exhausted. `None` once the range is consumed.
    pub fn next_row(&mut self, pool: &mut BufferManager) -> FileResult<Option<Vec<i32>>> {
        while self.page_index < self.end_block {
            let page = pool.get_page(&self.owner, self.page_index)?;
            if self.row_index < page.row_count() {
                let row = page.row(self.row_index).to_vec();
                self.row_index += 1;
                return Ok(Some(row));
            }
            self.page_index += 1;
            self.row_index = 0;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Page;
    use tempfile::TempDir;

    #[test]
    fn test_walks_across_blocks() {
        let dir = TempDir::new().unwrap();
        let mut pool = BufferManager::with_capacity(dir.path(), 2);
        pool.write_page("T", 0, vec![vec![1, 2], vec![3, 4]]).unwrap();
        pool.write_page("T", 1, vec![vec![5, 6]]).unwrap();

        let mut cursor = Cursor::new("T", 2);
        assert_eq!(cursor.next_row(&mut pool).unwrap(), Some(vec![1, 2]));
        assert_eq!(cursor.next_row(&mut pool).unwrap(), Some(vec![3, 4]));
        assert_eq!(cursor.next_row(&mut pool).unwrap(), Some(vec![5, 6]));
        assert_eq!(cursor.next_row(&mut pool).unwrap(), None);
        // Exhausted cursors stay exhausted.
        assert_eq!(cursor.next_row(&mut pool).unwrap(), None);
    }

    #[test]
    fn test_bounded_range_stops_at_end() {
        let dir = TempDir::new().unwrap();
        let mut pool = BufferManager::with_capacity(dir.path(), 2);
        for index in 0..3 {
            let mut page = Page::from_rows(dir.path(), "T", index, vec![vec![index as i32]]);
            page.write().unwrap();
        }

        let mut cursor = Cursor::with_range("T", 1, 2);
        assert_eq!(cursor.next_row(&mut pool).unwrap(), Some(vec![1]));
        assert_eq!(cursor.next_row(&mut pool).unwrap(), None);
    }

    #[test]
    fn test_seek_page_rewinds_row_position() {
        let dir = TempDir::new().unwrap();
        let mut pool = BufferManager::with_capacity(dir.path(), 2);
        pool.write_page("T", 0, vec![vec![1], vec![2]]).unwrap();

        let mut cursor = Cursor::new("T", 1);
        cursor.next_row(&mut pool).unwrap();
        cursor.seek_page(0);
        assert_eq!(cursor.next_row(&mut pool).unwrap(), Some(vec![1]));
    }
}
