use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

use super::error::{FileError, FileResult};

/// A single block resident in memory: a rectangular grid of 32-bit cells
/// belonging to one logical object. One block maps to exactly one file on
/// disk, `<temp_dir>/<owner>_Page<index>`, holding one space-separated row
/// per line.
#[derive(Debug, Clone)]
pub struct Page {
    path: PathBuf,
    owner: String,
    index: usize,
    rows: Vec<Vec<i32>>,
    dirty: bool,
}

impl Page {
    /// On-disk location of the block `index` of `owner`.
    pub fn file_path(temp_dir: &Path, owner: &str, index: usize) -> PathBuf {
        temp_dir.join(format!("{}_Page{}", owner, index))
    }

    /// Construct a page in memory from an already-materialized grid. The page
    /// starts clean; it reaches disk through an explicit `write`.
    pub fn from_rows(temp_dir: &Path, owner: &str, index: usize, rows: Vec<Vec<i32>>) -> Self {
        Self {
            path: Self::file_path(temp_dir, owner, index),
            owner: owner.to_string(),
            index,
            rows,
            dirty: false,
        }
    }

    /// Read the block file into memory. Row and column counts are taken from
    /// the file itself: one line per row, whitespace-separated cells.
    pub fn load(temp_dir: &Path, owner: &str, index: usize) -> FileResult<Self> {
        let path = Self::file_path(temp_dir, owner, index);
        trace!(page = %path.display(), "page read");
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::Missing(path));
            }
            Err(err) => return Err(err.into()),
        };

        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: Result<Vec<i32>, _> = line.split_whitespace().map(str::parse).collect();
            match row {
                Ok(row) => rows.push(row),
                Err(err) => {
                    return Err(FileError::Parse {
                        path,
                        detail: err.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            path,
            owner: owner.to_string(),
            index,
            rows,
            dirty: false,
        })
    }

    /// Serialize the grid back to the block file and clear the dirty flag.
    pub fn write(&mut self) -> FileResult<()> {
        trace!(page = %self.path.display(), "page write");
        let mut out = BufWriter::new(File::create(&self.path)?);
        for row in &self.rows {
            let mut first = true;
            for cell in row {
                if !first {
                    out.write_all(b" ")?;
                }
                write!(out, "{}", cell)?;
                first = false;
            }
            out.write_all(b"\n")?;
        }
        out.flush()?;
        self.dirty = false;
        Ok(())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn row(&self, r: usize) -> &[i32] {
        &self.rows[r]
    }

    pub fn rows(&self) -> &[Vec<i32>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<i32>> {
        self.rows
    }

    pub fn get_cell(&self, r: usize, c: usize) -> i32 {
        self.rows[r][c]
    }

    pub fn set_cell(&mut self, r: usize, c: usize, value: i32) {
        self.rows[r][c] = value;
        self.dirty = true;
    }

    /// Re-home the page under a new owner name. Used when a logical object is
    /// renamed while some of its blocks are still resident.
    pub fn rename(&mut self, temp_dir: &Path, new_owner: &str) {
        self.owner = new_owner.to_string();
        self.path = Self::file_path(temp_dir, new_owner, self.index);
    }

    /// Sort the rows of this block in place.
    pub fn sort_rows_by<F>(&mut self, cmp: F)
    where
        F: FnMut(&Vec<i32>, &Vec<i32>) -> std::cmp::Ordering,
    {
        self.rows.sort_by(cmp);
        self.dirty = true;
    }

    /// Transpose a square diagonal tile in place.
    pub fn transpose(&mut self) {
        debug_assert_eq!(self.row_count(), self.col_count());
        let n = self.rows.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let tmp = self.rows[i][j];
                self.rows[i][j] = self.rows[j][i];
                self.rows[j][i] = tmp;
            }
        }
        self.dirty = true;
    }

    /// Swap-and-transpose an off-diagonal tile pair: `a` becomes the
    /// transpose of `b` and `b` the transpose of `a`, so that across the
    /// whole matrix the pair realizes one global transpose. Tile shapes are
    /// mirrored, so each side keeps its own dimensions.
    pub fn transpose_pair(a: &mut Page, b: &mut Page) {
        debug_assert_eq!(a.row_count(), b.col_count());
        debug_assert_eq!(a.col_count(), b.row_count());
        let old_a = std::mem::replace(&mut a.rows, transposed(&b.rows));
        b.rows = transposed(&old_a);
        a.dirty = true;
        b.dirty = true;
    }

    /// Diagonal-tile step of `A - Aᵀ`: every cell pair `(i,j)/(j,i)` is
    /// replaced by its difference; the diagonal itself becomes zero.
    pub fn subtract_transpose(&mut self) {
        debug_assert_eq!(self.row_count(), self.col_count());
        let n = self.rows.len();
        for i in 0..n {
            self.rows[i][i] = 0;
            for j in (i + 1)..n {
                let upper = self.rows[i][j];
                let lower = self.rows[j][i];
                self.rows[i][j] = upper - lower;
                self.rows[j][i] = lower - upper;
            }
        }
        self.dirty = true;
    }

    /// Off-diagonal step of `A - Aᵀ` on the mirrored pair `(a, b)`:
    /// `a <- a - bᵀ` and `b <- b - aᵀ`, both against the original grids.
    pub fn subtract_transpose_pair(a: &mut Page, b: &mut Page) {
        debug_assert_eq!(a.row_count(), b.col_count());
        debug_assert_eq!(a.col_count(), b.row_count());
        let old_a = a.rows.clone();
        for (i, row) in a.rows.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell -= b.rows[j][i];
            }
        }
        for (i, row) in b.rows.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell -= old_a[j][i];
            }
        }
        a.dirty = true;
        b.dirty = true;
    }
}

fn transposed(rows: &[Vec<i32>]) -> Vec<Vec<i32>> {
    let row_count = rows.len();
    let col_count = rows.first().map_or(0, Vec::len);
    let mut out = vec![vec![0; row_count]; col_count];
    for (i, row) in rows.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            out[j][i] = *cell;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn grid(cells: &[&[i32]]) -> Vec<Vec<i32>> {
        cells.iter().map(|r| r.to_vec()).collect()
    }

    #[test]
    fn test_write_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut page = Page::from_rows(dir.path(), "T", 0, grid(&[&[1, 2, 3], &[4, 5, 6]]));
        page.write().unwrap();

        let loaded = Page::load(dir.path(), "T", 0).unwrap();
        assert_eq!(loaded.rows(), page.rows());
        assert_eq!(loaded.row_count(), 2);
        assert_eq!(loaded.col_count(), 3);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Page::load(dir.path(), "T", 7),
            Err(FileError::Missing(_))
        ));
    }

    #[test]
    fn test_load_rejects_non_integer_cell() {
        let dir = TempDir::new().unwrap();
        std::fs::write(Page::file_path(dir.path(), "T", 0), "1 x 3\n").unwrap();
        assert!(matches!(
            Page::load(dir.path(), "T", 0),
            Err(FileError::Parse { .. })
        ));
    }

    #[test]
    fn test_set_cell_marks_dirty() {
        let dir = TempDir::new().unwrap();
        let mut page = Page::from_rows(dir.path(), "T", 0, grid(&[&[1, 2], &[3, 4]]));
        assert!(!page.is_dirty());
        page.set_cell(0, 1, 9);
        assert!(page.is_dirty());
        assert_eq!(page.get_cell(0, 1), 9);
    }

    #[test]
    fn test_transpose_in_place() {
        let dir = TempDir::new().unwrap();
        let mut page = Page::from_rows(dir.path(), "M", 0, grid(&[&[1, 2], &[3, 4]]));
        page.transpose();
        assert_eq!(page.rows(), grid(&[&[1, 3], &[2, 4]]));
        assert!(page.is_dirty());
    }

    #[test]
    fn test_transpose_pair_swaps_border_tiles() {
        let dir = TempDir::new().unwrap();
        // a covers rows 0..2 x cols 2..3, b the mirrored 1x2 tile
        let mut a = Page::from_rows(dir.path(), "M", 1, grid(&[&[3], &[6]]));
        let mut b = Page::from_rows(dir.path(), "M", 2, grid(&[&[7, 8]]));
        Page::transpose_pair(&mut a, &mut b);
        assert_eq!(a.rows(), grid(&[&[7], &[8]]));
        assert_eq!(b.rows(), grid(&[&[3, 6]]));
        assert!(a.is_dirty() && b.is_dirty());
    }

    #[test]
    fn test_subtract_transpose_diagonal() {
        let dir = TempDir::new().unwrap();
        let mut page = Page::from_rows(dir.path(), "M", 0, grid(&[&[1, 2], &[3, 4]]));
        page.subtract_transpose();
        assert_eq!(page.rows(), grid(&[&[0, -1], &[1, 0]]));
    }

    #[test]
    fn test_subtract_transpose_pair() {
        let dir = TempDir::new().unwrap();
        let mut a = Page::from_rows(dir.path(), "M", 1, grid(&[&[3], &[6]]));
        let mut b = Page::from_rows(dir.path(), "M", 2, grid(&[&[7, 8]]));
        Page::subtract_transpose_pair(&mut a, &mut b);
        // a - bT = [3-7, 6-8], b - aT = [7-3, 8-6]
        assert_eq!(a.rows(), grid(&[&[-4], &[-2]]));
        assert_eq!(b.rows(), grid(&[&[4, 2]]));
    }

    #[test]
    fn test_rename_re_homes_file_path() {
        let dir = TempDir::new().unwrap();
        let mut page = Page::from_rows(dir.path(), "OLD", 3, grid(&[&[1]]));
        page.rename(dir.path(), "NEW");
        assert_eq!(page.owner(), "NEW");
        page.write().unwrap();
        assert!(Page::file_path(dir.path(), "NEW", 3).exists());
    }
}
