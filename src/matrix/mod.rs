mod error;

pub use error::{MatrixError, MatrixResult};

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::file::{self, BufferManager, Page, PRINT_COUNT};

/// A square matrix stored as a grid of square tiles, one block per tile. The
/// tile with linear index `i * concurrent_blocks + j` covers rows
/// `[i*m, min(N, (i+1)*m))` and columns `[j*m, min(N, (j+1)*m))`; border
/// tiles may be narrower or shorter than `m`.
#[derive(Debug)]
pub struct Matrix {
    pub name: String,
    /// Name of the matrix this one was derived from; the matrix's own name
    /// when it came straight from LOAD.
    pub original_name: String,
    pub source_file: PathBuf,
    /// Side length N of the matrix.
    pub dimension: usize,
    /// Side length m of an interior tile.
    pub tile_side: usize,
    /// Tiles per row-stripe, ⌈N/m⌉.
    pub concurrent_blocks: usize,
    pub block_count: usize,
    /// `(row_count, col_count)` of each tile, in linear block order.
    pub dims_per_block: Vec<(usize, usize)>,
    /// Cached symmetry verdict; `None` until SYMMETRY has run.
    pub symmetric: Option<bool>,
}

impl Matrix {
    /// Matrix to be filled by LOAD MATRIX from `<data>/<name>.csv`.
    pub fn new(name: &str, data_dir: &Path) -> Self {
        Self::with_source(name, data_dir.join(format!("{}.csv", name)))
    }

    /// Assignment-result matrix sharing the geometry of `like`. Blocks are
    /// produced by the executor (COMPUTE); nothing exists on disk yet.
    pub fn result(name: &str, data_dir: &Path, like: &Matrix) -> Self {
        Self {
            name: name.to_string(),
            original_name: like.name.clone(),
            source_file: data_dir.join("temp").join(format!("{}.csv", name)),
            dimension: like.dimension,
            tile_side: like.tile_side,
            concurrent_blocks: like.concurrent_blocks,
            block_count: like.block_count,
            dims_per_block: like.dims_per_block.clone(),
            symmetric: None,
        }
    }

    fn with_source(name: &str, source_file: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            original_name: name.to_string(),
            source_file,
            dimension: 0,
            tile_side: 0,
            concurrent_blocks: 0,
            block_count: 0,
            dims_per_block: Vec::new(),
            symmetric: None,
        }
    }

    /// Read the source CSV and split it into tile files. On failure the tiles
    /// written so far are cleaned up by the caller via `unload`.
    pub fn load(&mut self, pool: &mut BufferManager) -> MatrixResult<()> {
        info!(matrix = %self.name, source = %self.source_file.display(), "load");
        self.extract_dimension()?;
        self.tile_geometry()?;
        self.blockify(pool)
    }

    /// The dimension is the comma count of the first source line plus one;
    /// every line of a matrix CSV is a data row.
    fn extract_dimension(&mut self) -> MatrixResult<()> {
        let file = match File::open(&self.source_file) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(MatrixError::Missing(self.source_file.clone()));
            }
            Err(err) => return Err(MatrixError::File(err.into())),
        };
        let mut first_line = String::new();
        BufReader::new(file)
            .read_line(&mut first_line)
            .map_err(file::FileError::from)?;
        if first_line.trim().is_empty() {
            return Err(MatrixError::EmptySource(self.source_file.clone()));
        }
        self.dimension = first_line.matches(',').count() + 1;
        Ok(())
    }

    fn tile_geometry(&mut self) -> MatrixResult<()> {
        self.tile_side = file::tile_side().ok_or(MatrixError::Capacity)?;
        self.concurrent_blocks = self.dimension.div_ceil(self.tile_side);
        Ok(())
    }

    /// Width of the tiles in column-stripe `j`.
    fn tile_width(&self, j: usize) -> usize {
        let m = self.tile_side;
        if j == self.concurrent_blocks - 1 && self.dimension % m != 0 {
            self.dimension % m
        } else {
            m
        }
    }

    /// Single pass over the source: one full row-stripe of tiles is kept
    /// live in memory and flushed every `m` input rows (or at EOF, with the
    /// actual number of rows accumulated so far).
    fn blockify(&mut self, pool: &mut BufferManager) -> MatrixResult<()> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(&self.source_file)?;

        let m = self.tile_side;
        let stripe_width = self.concurrent_blocks;
        let mut grids: Vec<Vec<Vec<i32>>> = vec![Vec::with_capacity(m); stripe_width];
        let mut stripe_rows = 0;
        let mut rows_read = 0;

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != self.dimension {
                return Err(MatrixError::Parse {
                    path: self.source_file.clone(),
                    row: line + 1,
                    detail: format!(
                        "expected {} cells, found {}",
                        self.dimension,
                        record.len()
                    ),
                });
            }
            let mut cells = Vec::with_capacity(self.dimension);
            for cell in record.iter() {
                let value = cell.parse::<i32>().map_err(|err| MatrixError::Parse {
                    path: self.source_file.clone(),
                    row: line + 1,
                    detail: err.to_string(),
                })?;
                cells.push(value);
            }
            for (j, chunk) in cells.chunks(m).enumerate() {
                grids[j].push(chunk.to_vec());
            }
            stripe_rows += 1;
            rows_read += 1;
            if stripe_rows == m {
                self.flush_stripe(pool, &mut grids, stripe_rows)?;
                stripe_rows = 0;
            }
        }
        if stripe_rows > 0 {
            self.flush_stripe(pool, &mut grids, stripe_rows)?;
        }
        if rows_read == 0 {
            return Err(MatrixError::EmptySource(self.source_file.clone()));
        }
        debug!(matrix = %self.name, tiles = self.block_count, "blockified");
        Ok(())
    }

    fn flush_stripe(
        &mut self,
        pool: &mut BufferManager,
        grids: &mut [Vec<Vec<i32>>],
        stripe_rows: usize,
    ) -> MatrixResult<()> {
        for (j, grid) in grids.iter_mut().enumerate() {
            let rows = std::mem::take(grid);
            pool.write_page(&self.name, self.block_count, rows)?;
            self.dims_per_block.push((stripe_rows, self.tile_width(j)));
            self.block_count += 1;
        }
        Ok(())
    }

    /// Transpose the matrix in place, one diagonal tile and one mirrored
    /// pair at a time. A matrix known to be symmetric is left untouched.
    pub fn transpose(&mut self, pool: &mut BufferManager) -> MatrixResult<()> {
        if self.symmetric == Some(true) {
            debug!(matrix = %self.name, "transpose skipped, symmetric");
            return Ok(());
        }
        info!(matrix = %self.name, "transpose");
        let n = self.concurrent_blocks;
        for i in 0..n {
            pool.get_page_mut(&self.name, i * n + i)?.transpose();
            for j in (i + 1)..n {
                let (a, b) = pool.get_page_pair_mut(&self.name, i * n + j, j * n + i)?;
                Page::transpose_pair(a, b);
            }
        }
        Ok(())
    }

    /// Check `M == Mᵀ`, short-circuiting on the first mismatch. The verdict
    /// is cached on the matrix.
    pub fn is_symmetric(&mut self, pool: &mut BufferManager) -> MatrixResult<bool> {
        if let Some(cached) = self.symmetric {
            return Ok(cached);
        }
        let verdict = self.check_symmetry(pool)?;
        self.symmetric = Some(verdict);
        Ok(verdict)
    }

    fn check_symmetry(&self, pool: &mut BufferManager) -> MatrixResult<bool> {
        let n = self.concurrent_blocks;
        for i in 0..n {
            // Diagonal tile: compare the upper triangle against the lower.
            let page = pool.get_page(&self.name, i * n + i)?;
            let side = page.row_count();
            for k in 0..side {
                for l in (k + 1)..side {
                    if page.get_cell(k, l) != page.get_cell(l, k) {
                        return Ok(false);
                    }
                }
            }
            // Mirrored pair: the full scan of (i, j) against (j, i) also
            // covers the cells a triangular scan would skip.
            for j in (i + 1)..n {
                let (a, b) = pool.get_page_pair_mut(&self.name, i * n + j, j * n + i)?;
                for k in 0..a.row_count() {
                    for l in 0..a.col_count() {
                        if a.get_cell(k, l) != b.get_cell(l, k) {
                            return Ok(false);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    /// COMPUTE: write `self - selfᵀ` as the freshly assigned matrix
    /// `target`. The source tiles are read but never modified.
    pub fn compute(
        &self,
        pool: &mut BufferManager,
        target: &Matrix,
    ) -> MatrixResult<()> {
        info!(source = %self.name, target = %target.name, "compute");
        let n = self.concurrent_blocks;
        for i in 0..n {
            let index = i * n + i;
            let mut tile = pool.get_page(&self.name, index)?.clone();
            tile.subtract_transpose();
            pool.write_page(&target.name, index, tile.into_rows())?;

            for j in (i + 1)..n {
                let upper = i * n + j;
                let lower = j * n + i;
                let mut a = pool.get_page(&self.name, upper)?.clone();
                let mut b = pool.get_page(&self.name, lower)?.clone();
                Page::subtract_transpose_pair(&mut a, &mut b);
                pool.write_page(&target.name, upper, a.into_rows())?;
                pool.write_page(&target.name, lower, b.into_rows())?;
            }
        }
        Ok(())
    }

    /// Top-left `min(PRINT_COUNT, N)` square of the matrix, for PRINT.
    pub fn corner(&self, pool: &mut BufferManager) -> MatrixResult<Vec<Vec<i32>>> {
        let count = PRINT_COUNT.min(self.dimension);
        let m = self.tile_side;
        let n = self.concurrent_blocks;
        let tiles = count.div_ceil(m);
        let mut out = vec![vec![0; count]; count];
        for i in 0..tiles {
            for j in 0..tiles {
                let page = pool.get_page(&self.name, i * n + j)?;
                for k in 0..m.min(count - i * m).min(page.row_count()) {
                    for l in 0..m.min(count - j * m).min(page.col_count()) {
                        out[i * m + k][j * m + l] = page.get_cell(k, l);
                    }
                }
            }
        }
        Ok(out)
    }

    /// True when the source lives directly under `<data>/`.
    pub fn is_permanent(&self, data_dir: &Path) -> bool {
        self.source_file == data_dir.join(format!("{}.csv", self.name))
    }

    /// EXPORT: reassemble the matrix row-stripe by row-stripe and write it
    /// space-separated under `<data>/`.
    pub fn make_permanent(
        &mut self,
        pool: &mut BufferManager,
        data_dir: &Path,
    ) -> MatrixResult<()> {
        if self.source_file.starts_with(data_dir.join("temp")) {
            pool.delete_file(&self.source_file);
        }
        let target = data_dir.join(format!("{}.csv", self.name));
        let mut out =
            BufWriter::new(File::create(&target).map_err(file::FileError::from)?);

        let n = self.concurrent_blocks;
        for i in 0..n {
            let stripe_rows = self.dims_per_block[i * n].0;
            let mut lines: Vec<Vec<i32>> =
                vec![Vec::with_capacity(self.dimension); stripe_rows];
            for j in 0..n {
                let page = pool.get_page(&self.name, i * n + j)?;
                for (r, line) in lines.iter_mut().enumerate() {
                    line.extend_from_slice(page.row(r));
                }
            }
            for line in lines {
                let text = line
                    .iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(out, "{}", text).map_err(file::FileError::from)?;
            }
        }
        out.flush().map_err(file::FileError::from)?;
        self.source_file = target;
        Ok(())
    }

    /// Rename every tile file and resident page, then take the new name.
    pub fn rename(&mut self, pool: &mut BufferManager, new_name: &str) {
        for block in 0..self.block_count {
            pool.rename_page_file(&self.name, new_name, block);
        }
        pool.rename_pages_in_memory(&self.name, new_name);
        self.name = new_name.to_string();
    }

    /// Remove every tile file (and any temp source) belonging to this
    /// matrix.
    pub fn unload(&self, pool: &mut BufferManager, data_dir: &Path) {
        pool.discard_pages(&self.name);
        for block in 0..self.block_count {
            pool.delete_page_file(&self.name, block);
        }
        if self.source_file.starts_with(data_dir.join("temp")) {
            pool.delete_file(&self.source_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("temp")).unwrap();
        dir
    }

    fn pool_for(dir: &TempDir) -> BufferManager {
        BufferManager::new(dir.path().join("temp"))
    }

    /// Load `csv` with a forced tile side, so multi-tile behaviour is
    /// exercised without a block-sized fixture.
    fn load_with_tile_side(
        dir: &TempDir,
        pool: &mut BufferManager,
        name: &str,
        csv: &str,
        m: usize,
    ) -> Matrix {
        std::fs::write(dir.path().join(format!("{}.csv", name)), csv).unwrap();
        let mut matrix = Matrix::new(name, dir.path());
        matrix.extract_dimension().unwrap();
        matrix.tile_side = m;
        matrix.concurrent_blocks = matrix.dimension.div_ceil(m);
        matrix.blockify(pool).unwrap();
        matrix
    }

    fn export_text(matrix: &mut Matrix, pool: &mut BufferManager, dir: &TempDir) -> String {
        matrix.make_permanent(pool, dir.path()).unwrap();
        std::fs::read_to_string(dir.path().join(format!("{}.csv", matrix.name))).unwrap()
    }

    #[test]
    fn test_blockify_tiles_a_3x3_into_four_border_tiles() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let matrix =
            load_with_tile_side(&dir, &mut pool, "M", "1,2,3\n4,5,6\n7,8,9\n", 2);

        assert_eq!(matrix.dimension, 3);
        assert_eq!(matrix.block_count, 4);
        assert_eq!(matrix.dims_per_block, [(2, 2), (2, 1), (1, 2), (1, 1)]);

        assert_eq!(
            pool.get_page("M", 0).unwrap().rows(),
            [vec![1, 2], vec![4, 5]]
        );
        assert_eq!(pool.get_page("M", 1).unwrap().rows(), [vec![3], vec![6]]);
        assert_eq!(pool.get_page("M", 2).unwrap().rows(), [vec![7, 8]]);
        assert_eq!(pool.get_page("M", 3).unwrap().rows(), [vec![9]]);
    }

    #[test]
    fn test_transpose_then_export() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let mut matrix =
            load_with_tile_side(&dir, &mut pool, "M", "1,2,3\n4,5,6\n7,8,9\n", 2);

        matrix.transpose(&mut pool).unwrap();
        let text = export_text(&mut matrix, &mut pool, &dir);
        assert_eq!(text, "1 4 7\n2 5 8\n3 6 9\n");
    }

    #[test]
    fn test_double_transpose_restores_matrix() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let mut matrix =
            load_with_tile_side(&dir, &mut pool, "M", "1,2,3\n4,5,6\n7,8,9\n", 2);

        matrix.transpose(&mut pool).unwrap();
        matrix.transpose(&mut pool).unwrap();
        let text = export_text(&mut matrix, &mut pool, &dir);
        assert_eq!(text, "1 2 3\n4 5 6\n7 8 9\n");
    }

    #[test]
    fn test_symmetry_verdicts() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);

        let mut sym = load_with_tile_side(&dir, &mut pool, "S", "1,2\n2,1\n", 2);
        assert!(sym.is_symmetric(&mut pool).unwrap());
        assert_eq!(sym.symmetric, Some(true));

        let mut asym = load_with_tile_side(&dir, &mut pool, "A", "1,2\n3,1\n", 2);
        assert!(!asym.is_symmetric(&mut pool).unwrap());
        assert_eq!(asym.symmetric, Some(false));
    }

    #[test]
    fn test_symmetry_across_tiles_catches_sub_diagonal_mismatch() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);

        // Symmetric apart from cell (2,0) != (0,2), which sits below the
        // diagonal of the tile pair.
        let mut asym = load_with_tile_side(
            &dir,
            &mut pool,
            "A",
            "1,2,3\n2,5,6\n4,6,9\n",
            2,
        );
        assert!(!asym.is_symmetric(&mut pool).unwrap());

        let mut sym = load_with_tile_side(
            &dir,
            &mut pool,
            "S",
            "1,2,3\n2,5,6\n3,6,9\n",
            2,
        );
        assert!(sym.is_symmetric(&mut pool).unwrap());
    }

    #[test]
    fn test_symmetric_matrix_transpose_is_a_no_op() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let mut matrix = load_with_tile_side(&dir, &mut pool, "S", "1,2\n2,1\n", 2);

        assert!(matrix.is_symmetric(&mut pool).unwrap());
        matrix.transpose(&mut pool).unwrap();
        // The cached verdict short-circuits the transpose: no tile was
        // touched, so nothing is dirty.
        assert!(!pool.get_page("S", 0).unwrap().is_dirty());
    }

    #[test]
    fn test_compute_subtracts_transpose_and_leaves_source_alone() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let mut matrix = load_with_tile_side(&dir, &mut pool, "M", "1,2\n3,4\n", 2);

        let target = Matrix::result("N", dir.path(), &matrix);
        matrix.compute(&mut pool, &target).unwrap();

        let mut result = target;
        let text = export_text(&mut result, &mut pool, &dir);
        assert_eq!(text, "0 -1\n1 0\n");

        let source = export_text(&mut matrix, &mut pool, &dir);
        assert_eq!(source, "1 2\n3 4\n");
    }

    #[test]
    fn test_compute_across_tiles() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let mut matrix =
            load_with_tile_side(&dir, &mut pool, "M", "1,2,3\n4,5,6\n7,8,9\n", 2);

        let target = Matrix::result("D", dir.path(), &matrix);
        matrix.compute(&mut pool, &target).unwrap();

        let mut result = target;
        let text = export_text(&mut result, &mut pool, &dir);
        assert_eq!(text, "0 -2 -4\n2 0 -2\n4 2 0\n");

        let source = export_text(&mut matrix, &mut pool, &dir);
        assert_eq!(source, "1 2 3\n4 5 6\n7 8 9\n");
    }

    #[test]
    fn test_corner_is_clipped_to_dimension() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let matrix =
            load_with_tile_side(&dir, &mut pool, "M", "1,2,3\n4,5,6\n7,8,9\n", 2);

        let corner = matrix.corner(&mut pool).unwrap();
        assert_eq!(corner, [vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);
    }

    #[test]
    fn test_unload_removes_tile_files() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let matrix =
            load_with_tile_side(&dir, &mut pool, "M", "1,2,3\n4,5,6\n7,8,9\n", 2);

        for block in 0..matrix.block_count {
            assert!(Page::file_path(pool.temp_dir(), "M", block).exists());
        }
        matrix.unload(&mut pool, dir.path());
        for block in 0..matrix.block_count {
            assert!(!Page::file_path(pool.temp_dir(), "M", block).exists());
        }
    }

    #[test]
    fn test_load_with_policy_geometry() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        std::fs::write(dir.path().join("P.csv"), "1,2\n3,4\n").unwrap();

        let mut matrix = Matrix::new("P", dir.path());
        matrix.load(&mut pool).unwrap();
        // A 2x2 matrix fits in a single policy-sized tile.
        assert_eq!(matrix.dimension, 2);
        assert_eq!(matrix.concurrent_blocks, 1);
        assert_eq!(matrix.block_count, 1);
        assert_eq!(matrix.dims_per_block, [(2, 2)]);
    }

    #[test]
    fn test_load_missing_source() {
        let dir = data_dir();
        let mut pool = pool_for(&dir);
        let mut matrix = Matrix::new("GHOST", dir.path());
        assert!(matches!(
            matrix.load(&mut pool),
            Err(MatrixError::Missing(_))
        ));
    }
}
