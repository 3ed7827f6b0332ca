use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::cursor::Cursor;
use super::error::{RelationError, RelationResult};
use crate::file::{self, BufferManager, FileResult};

/// How a table is indexed. Recorded as metadata by the INDEX command; the
/// strategy does not change the physical block layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingStrategy {
    BTree,
    Hash,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One component of a sort key vector: a column and its direction.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub column: usize,
    pub order: SortOrder,
}

/// A loaded row-oriented object: column metadata, per-block row counts, and
/// per-column distinct-value statistics. Rows live in block files owned by
/// the buffer manager; the table itself holds only metadata.
///
/// A table comes to life either through LOAD (blockify a CSV source) or as
/// the result of an assignment command, which appends blocks one at a time.
#[derive(Debug)]
pub struct Table {
    pub name: String,
    pub source_file: PathBuf,
    pub columns: Vec<String>,
    pub column_count: usize,
    pub row_count: usize,
    pub block_count: usize,
    pub max_rows_per_block: usize,
    pub rows_per_block: Vec<usize>,
    pub indexed: bool,
    pub indexed_column: Option<String>,
    pub indexing_strategy: IndexingStrategy,
    distinct_values: Vec<HashSet<i32>>,
    column_index: HashMap<String, usize>,
}

impl Table {
    /// Table to be filled by LOAD from `<data>/<name>.csv`.
    pub fn new(name: &str, data_dir: &Path) -> Self {
        Self::with_source(name, data_dir.join(format!("{}.csv", name)))
    }

    /// Assignment-result table: columns are known up front, blocks are
    /// appended by the executor. The source path points into the temp
    /// directory until the table is exported.
    pub fn from_columns(
        name: &str,
        data_dir: &Path,
        columns: Vec<String>,
    ) -> RelationResult<Self> {
        let mut table = Self::with_source(
            name,
            data_dir.join("temp").join(format!("{}.csv", name)),
        );
        table.set_columns(columns)?;
        Ok(table)
    }

    fn with_source(name: &str, source_file: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            source_file,
            columns: Vec::new(),
            column_count: 0,
            row_count: 0,
            block_count: 0,
            max_rows_per_block: 0,
            rows_per_block: Vec::new(),
            indexed: false,
            indexed_column: None,
            indexing_strategy: IndexingStrategy::Nothing,
            distinct_values: Vec::new(),
            column_index: HashMap::new(),
        }
    }

    fn set_columns(&mut self, columns: Vec<String>) -> RelationResult<()> {
        let mut index = HashMap::new();
        for (i, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(RelationError::DuplicateColumn(name.clone()));
            }
        }
        self.max_rows_per_block = file::max_rows_per_block(columns.len());
        if self.max_rows_per_block == 0 {
            return Err(RelationError::Capacity {
                columns: columns.len(),
            });
        }
        self.column_count = columns.len();
        self.distinct_values = vec![HashSet::new(); columns.len()];
        self.column_index = index;
        self.columns = columns;
        Ok(())
    }

    /// Read the source CSV and split it into block files. On failure the
    /// blocks written so far remain on disk; the caller cleans them up with
    /// `unload`.
    pub fn load(&mut self, pool: &mut BufferManager) -> RelationResult<()> {
        info!(table = %self.name, source = %self.source_file.display(), "load");
        self.read_header()?;
        self.blockify(pool)
    }

    fn read_header(&mut self) -> RelationResult<()> {
        if !self.source_file.exists() {
            return Err(RelationError::Missing(self.source_file.clone()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.source_file)?;
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if columns.is_empty() || columns.iter().all(String::is_empty) {
            return Err(RelationError::EmptySource(self.source_file.clone()));
        }
        self.set_columns(columns)
    }

    fn blockify(&mut self, pool: &mut BufferManager) -> RelationResult<()> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.source_file)?;

        let mut buffer: Vec<Vec<i32>> = Vec::with_capacity(self.max_rows_per_block);
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != self.column_count {
                return Err(RelationError::Parse {
                    path: self.source_file.clone(),
                    row: line + 1,
                    detail: format!(
                        "expected {} columns, found {}",
                        self.column_count,
                        record.len()
                    ),
                });
            }
            let mut row = Vec::with_capacity(self.column_count);
            for cell in record.iter() {
                let value = cell.parse::<i32>().map_err(|err| RelationError::Parse {
                    path: self.source_file.clone(),
                    row: line + 1,
                    detail: err.to_string(),
                })?;
                row.push(value);
            }
            buffer.push(row);
            if buffer.len() == self.max_rows_per_block {
                self.append_block(pool, std::mem::take(&mut buffer))?;
            }
        }
        if !buffer.is_empty() {
            self.append_block(pool, buffer)?;
        }
        if self.row_count == 0 {
            return Err(RelationError::EmptySource(self.source_file.clone()));
        }
        debug!(table = %self.name, blocks = self.block_count, rows = self.row_count, "blockified");
        Ok(())
    }

    /// Append one block of rows, updating row counts and per-column
    /// statistics. All blocks but the last must be filled to
    /// `max_rows_per_block`; executors buffer rows to that size.
    pub fn append_block(
        &mut self,
        pool: &mut BufferManager,
        rows: Vec<Vec<i32>>,
    ) -> RelationResult<()> {
        debug_assert!(rows.len() <= self.max_rows_per_block);
        for row in &rows {
            self.update_statistics(row);
        }
        self.rows_per_block.push(rows.len());
        pool.write_page(&self.name, self.block_count, rows)?;
        self.block_count += 1;
        Ok(())
    }

    fn update_statistics(&mut self, row: &[i32]) {
        self.row_count += 1;
        for (set, value) in self.distinct_values.iter_mut().zip(row) {
            set.insert(*value);
        }
    }

    /// Distinct values seen per column, in column order.
    pub fn distinct_counts(&self) -> Vec<usize> {
        self.distinct_values.iter().map(HashSet::len).collect()
    }

    pub fn is_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> RelationResult<usize> {
        self.column_index
            .get(name)
            .copied()
            .ok_or_else(|| RelationError::UnknownColumn(name.to_string()))
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> RelationResult<()> {
        if self.is_column(to) {
            return Err(RelationError::DuplicateColumn(to.to_string()));
        }
        let index = self.column_index(from)?;
        self.columns[index] = to.to_string();
        self.column_index.remove(from);
        self.column_index.insert(to.to_string(), index);
        if self.indexed_column.as_deref() == Some(from) {
            self.indexed_column = Some(to.to_string());
        }
        Ok(())
    }

    /// Cursor over all blocks of this table.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(&self.name, self.block_count)
    }

    /// First `limit` rows, for PRINT.
    pub fn first_rows(
        &self,
        pool: &mut BufferManager,
        limit: usize,
    ) -> FileResult<Vec<Vec<i32>>> {
        let mut cursor = self.cursor();
        let mut rows = Vec::new();
        while rows.len() < limit {
            match cursor.next_row(pool)? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Sort the table in place by `keys` using a two-phase external merge:
    /// every block is first sorted individually in the pool, then runs are
    /// doubled by 2-way merge passes until a single run covers the table.
    pub fn sort(&mut self, pool: &mut BufferManager, keys: &[SortKey]) -> RelationResult<()> {
        info!(table = %self.name, blocks = self.block_count, "sort");
        self.sorting_phase(pool, keys)?;
        let mut run_blocks = 1;
        while run_blocks < self.block_count {
            self.merge_pass(pool, keys, run_blocks)?;
            run_blocks *= 2;
        }
        Ok(())
    }

    fn sorting_phase(&mut self, pool: &mut BufferManager, keys: &[SortKey]) -> RelationResult<()> {
        for block in 0..self.block_count {
            let page = pool.get_page_mut(&self.name, block)?;
            page.sort_rows_by(|a, b| compare_rows(a, b, keys));
        }
        Ok(())
    }

    /// Merge adjacent run pairs of `run_blocks` blocks each into runs twice
    /// as long. Output is written block-at-a-time under a scratch name and
    /// swapped in for the original once the pass completes. Ties take the
    /// left run's row, which keeps the sort stable.
    fn merge_pass(
        &mut self,
        pool: &mut BufferManager,
        keys: &[SortKey],
        run_blocks: usize,
    ) -> RelationResult<()> {
        let scratch = format!("{}~sort", self.name);
        let mut out_index = 0;
        let mut out_rows: Vec<Vec<i32>> = Vec::with_capacity(self.max_rows_per_block);
        let mut new_rows_per_block = Vec::new();

        let mut lo = 0;
        while lo < self.block_count {
            let mid = (lo + run_blocks).min(self.block_count);
            let hi = (lo + 2 * run_blocks).min(self.block_count);
            let mut left = Cursor::with_range(&self.name, lo, mid);
            let mut right = Cursor::with_range(&self.name, mid, hi);
            let mut left_head = left.next_row(pool)?;
            let mut right_head = right.next_row(pool)?;

            loop {
                let row = match (left_head.take(), right_head.take()) {
                    (Some(l), Some(r)) => {
                        if compare_rows(&l, &r, keys) != Ordering::Greater {
                            right_head = Some(r);
                            left_head = left.next_row(pool)?;
                            l
                        } else {
                            left_head = Some(l);
                            right_head = right.next_row(pool)?;
                            r
                        }
                    }
                    (Some(l), None) => {
                        left_head = left.next_row(pool)?;
                        l
                    }
                    (None, Some(r)) => {
                        right_head = right.next_row(pool)?;
                        r
                    }
                    (None, None) => break,
                };
                out_rows.push(row);
                if out_rows.len() == self.max_rows_per_block {
                    new_rows_per_block.push(out_rows.len());
                    pool.write_page(&scratch, out_index, std::mem::take(&mut out_rows))?;
                    out_index += 1;
                }
            }
            lo = hi;
        }
        if !out_rows.is_empty() {
            new_rows_per_block.push(out_rows.len());
            pool.write_page(&scratch, out_index, out_rows)?;
            out_index += 1;
        }

        // Substitute the merged copy for the original.
        pool.discard_pages(&self.name);
        for block in 0..self.block_count {
            pool.delete_page_file(&self.name, block);
        }
        for block in 0..out_index {
            pool.rename_page_file(&scratch, &self.name, block);
        }
        pool.rename_pages_in_memory(&scratch, &self.name);
        self.block_count = out_index;
        self.rows_per_block = new_rows_per_block;
        Ok(())
    }

    /// Rename every on-disk block file and every resident page, then take
    /// the new name.
    pub fn rename(&mut self, pool: &mut BufferManager, new_name: &str) {
        for block in 0..self.block_count {
            pool.rename_page_file(&self.name, new_name, block);
        }
        pool.rename_pages_in_memory(&self.name, new_name);
        self.name = new_name.to_string();
    }

    /// True when the source lives directly under `<data>/`, i.e. the table
    /// survives the session.
    pub fn is_permanent(&self, data_dir: &Path) -> bool {
        self.source_file == data_dir.join(format!("{}.csv", self.name))
    }

    /// EXPORT: write the table as a CSV under `<data>/` and adopt it as the
    /// new source.
    pub fn make_permanent(
        &mut self,
        pool: &mut BufferManager,
        data_dir: &Path,
    ) -> RelationResult<()> {
        if self.source_file.starts_with(data_dir.join("temp")) {
            pool.delete_file(&self.source_file);
        }
        let target = data_dir.join(format!("{}.csv", self.name));
        let mut out = BufWriter::new(File::create(&target).map_err(crate::file::FileError::from)?);
        write_csv_row(&mut out, &self.columns)?;
        let mut cursor = self.cursor();
        while let Some(row) = cursor.next_row(pool)? {
            write_csv_row(&mut out, &row)?;
        }
        out.flush().map_err(crate::file::FileError::from)?;
        self.source_file = target;
        Ok(())
    }

    /// Remove every block file (and any temp source) belonging to this
    /// table.
    pub fn unload(&self, pool: &mut BufferManager, data_dir: &Path) {
        pool.discard_pages(&self.name);
        for block in 0..self.block_count {
            pool.delete_page_file(&self.name, block);
        }
        // Only sources under temp/ belong to the engine; permanent CSVs stay.
        if self.source_file.starts_with(data_dir.join("temp")) {
            pool.delete_file(&self.source_file);
        }
    }
}

/// Lexicographic comparison along the key vector, honouring per-key
/// direction.
fn compare_rows(a: &[i32], b: &[i32], keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = a[key.column].cmp(&b[key.column]);
        let ord = match key.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn write_csv_row<W: Write, T: std::fmt::Display>(
    out: &mut W,
    row: &[T],
) -> RelationResult<()> {
    let line = row
        .iter()
        .map(|cell| cell.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(out, "{}", line).map_err(crate::file::FileError::from)?;
    Ok(())
}
