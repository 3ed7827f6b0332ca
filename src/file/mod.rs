mod buffer_manager;
mod error;
mod page;

pub use buffer_manager::BufferManager;
pub use error::{FileError, FileResult};
pub use page::Page;

/// Block size in kilobytes. Every block file holds at most
/// `BLOCK_SIZE * 1000 / 4` 32-bit cells.
pub const BLOCK_SIZE: usize = 1;

/// Number of blocks the buffer pool may hold resident at once.
pub const BLOCK_COUNT: usize = 4;

/// Rows (and matrix columns) shown by PRINT.
pub const PRINT_COUNT: usize = 20;

/// Cell capacity of one block under the current block-size policy.
pub const fn block_capacity() -> usize {
    (BLOCK_SIZE * 1000) / std::mem::size_of::<i32>()
}

/// Rows of a `column_count`-wide table that fit in one block. Zero means the
/// block cannot hold even a single row.
pub fn max_rows_per_block(column_count: usize) -> usize {
    if column_count == 0 {
        return 0;
    }
    block_capacity() / column_count
}

/// Side length of a square matrix tile: the largest `m` with
/// `m * m <= block_capacity()`. Integer square root with a ±1 correction so
/// no floating-point rounding can sneak in.
pub fn tile_side() -> Option<usize> {
    let cells = block_capacity();
    let mut m = (cells as f64).sqrt() as usize;
    while (m + 1) * (m + 1) <= cells {
        m += 1;
    }
    while m > 0 && m * m > cells {
        m -= 1;
    }
    if m == 0 { None } else { Some(m) }
}
