mod cursor;
mod error;
mod table;

pub use cursor::Cursor;
pub use error::{RelationError, RelationResult};
pub use table::{IndexingStrategy, SortKey, SortOrder, Table};
