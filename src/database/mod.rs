use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogError, Entry};
use crate::file::{BufferManager, FileError, PRINT_COUNT};
use crate::lexer_parser::{self, Aggregate, AssignOp, BinOp, Command, Direction, IndexKind, Operand};
use crate::matrix::{Matrix, MatrixError};
use crate::relation::{Cursor, IndexingStrategy, RelationError, SortKey, SortOrder, Table};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Data directory not found: {0}")]
    DataDirMissing(PathBuf),

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("Table error: {0}")]
    Relation(#[from] RelationError),

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Script not found: {0}")]
    ScriptMissing(PathBuf),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// What a command hands back to the REPL for display.
pub enum QueryResult {
    Empty,
    Message(String),
    List(Vec<String>),
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<i32>>,
        total: usize,
    },
    Grid {
        rows: Vec<Vec<i32>>,
        dimension: usize,
    },
}

/// Render a result the way the REPL prints it.
pub fn print_result(result: &QueryResult) {
    match result {
        QueryResult::Empty => {}
        QueryResult::Message(message) => println!("{}", message),
        QueryResult::List(items) => {
            for item in items {
                println!("{}", item);
            }
        }
        QueryResult::Rows {
            columns,
            rows,
            total,
        } => {
            println!("{}", columns.join(", "));
            for row in rows {
                let line = row
                    .iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{}", line);
            }
            println!("Row count: {}", total);
        }
        QueryResult::Grid { rows, dimension } => {
            for row in rows {
                let line = row
                    .iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{}", line);
            }
            println!("Row count: {}", dimension);
        }
    }
}

/// The whole engine: the data directory, the buffer pool gating all block
/// I/O, and the catalog of loaded objects. Every command handler is a thin
/// orchestration over the storage core.
pub struct Engine {
    data_dir: PathBuf,
    pool: BufferManager,
    catalog: Catalog,
}

impl Engine {
    /// Fails when the data directory does not exist; the temp directory for
    /// block files is created beneath it.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> EngineResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.is_dir() {
            return Err(EngineError::DataDirMissing(data_dir));
        }
        let temp_dir = data_dir.join("temp");
        fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            data_dir,
            pool: BufferManager::new(temp_dir),
            catalog: Catalog::new(),
        })
    }

    pub fn pool(&self) -> &BufferManager {
        &self.pool
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn execute(&mut self, command: Command) -> EngineResult<QueryResult> {
        debug!(?command, "execute");
        match command {
            Command::Load(name) => self.load_table(&name),
            Command::LoadMatrix(name) => self.load_matrix(&name),
            Command::ListTables => Ok(QueryResult::List(self.catalog.table_names())),
            Command::ListMatrices => Ok(QueryResult::List(self.catalog.matrix_names())),
            Command::Print(name) => self.print_table(&name),
            Command::PrintMatrix(name) => self.print_matrix(&name),
            Command::Export(name) => self.export_table(&name),
            Command::ExportMatrix(name) => self.export_matrix(&name),
            Command::Clear(name) => self.clear(&name),
            Command::RenameTable(old, new) => self.rename_table(&old, &new),
            Command::RenameMatrix(old, new) => self.rename_matrix(&old, &new),
            Command::RenameColumn { table, from, to } => {
                self.rename_column(&table, &from, &to)
            }
            Command::Index {
                table,
                column,
                kind,
            } => self.index(&table, &column, kind),
            Command::Sort { table, keys } => self.sort(&table, &keys),
            Command::Source(name) => self.run_script(&name),
            Command::Symmetry(name) => self.symmetry(&name),
            Command::Transpose(name) => self.transpose(&name),
            Command::Assign { target, op } => self.assign(&target, op),
            Command::Quit => Ok(QueryResult::Empty),
        }
    }

    fn load_table(&mut self, name: &str) -> EngineResult<QueryResult> {
        self.catalog.reserve(name)?;
        let mut table = Table::new(name, &self.data_dir);
        if let Err(err) = table.load(&mut self.pool) {
            table.unload(&mut self.pool, &self.data_dir);
            return Err(err.into());
        }
        let message = format!(
            "Loaded table {}. Columns: {}, rows: {}",
            name, table.column_count, table.row_count
        );
        self.catalog.insert_table(table)?;
        Ok(QueryResult::Message(message))
    }

    fn load_matrix(&mut self, name: &str) -> EngineResult<QueryResult> {
        self.catalog.reserve(name)?;
        let mut matrix = Matrix::new(name, &self.data_dir);
        if let Err(err) = matrix.load(&mut self.pool) {
            matrix.unload(&mut self.pool, &self.data_dir);
            return Err(err.into());
        }
        let message = format!("Loaded matrix {}. Dimension: {}", name, matrix.dimension);
        self.catalog.insert_matrix(matrix)?;
        Ok(QueryResult::Message(message))
    }

    fn print_table(&mut self, name: &str) -> EngineResult<QueryResult> {
        let table = self.catalog.table(name)?;
        let columns = table.columns.clone();
        let total = table.row_count;
        let rows = table.first_rows(&mut self.pool, PRINT_COUNT)?;
        Ok(QueryResult::Rows {
            columns,
            rows,
            total,
        })
    }

    fn print_matrix(&mut self, name: &str) -> EngineResult<QueryResult> {
        let matrix = self.catalog.matrix(name)?;
        let rows = matrix.corner(&mut self.pool)?;
        Ok(QueryResult::Grid {
            rows,
            dimension: matrix.dimension,
        })
    }

    fn export_table(&mut self, name: &str) -> EngineResult<QueryResult> {
        let table = self.catalog.table_mut(name)?;
        table.make_permanent(&mut self.pool, &self.data_dir)?;
        Ok(QueryResult::Message(format!("Exported table {}", name)))
    }

    fn export_matrix(&mut self, name: &str) -> EngineResult<QueryResult> {
        let matrix = self.catalog.matrix_mut(name)?;
        matrix.make_permanent(&mut self.pool, &self.data_dir)?;
        Ok(QueryResult::Message(format!("Exported matrix {}", name)))
    }

    fn clear(&mut self, name: &str) -> EngineResult<QueryResult> {
        match self.catalog.remove(name)? {
            Entry::Table(table) => table.unload(&mut self.pool, &self.data_dir),
            Entry::Matrix(matrix) => matrix.unload(&mut self.pool, &self.data_dir),
        }
        Ok(QueryResult::Message(format!("Cleared {}", name)))
    }

    fn rename_table(&mut self, old: &str, new: &str) -> EngineResult<QueryResult> {
        self.catalog.table(old)?;
        self.catalog.reserve(new)?;
        if let Entry::Table(mut table) = self.catalog.remove(old)? {
            table.rename(&mut self.pool, new);
            self.catalog.reinsert(Entry::Table(table));
        }
        Ok(QueryResult::Message(format!("Renamed {} to {}", old, new)))
    }

    fn rename_matrix(&mut self, old: &str, new: &str) -> EngineResult<QueryResult> {
        self.catalog.matrix(old)?;
        self.catalog.reserve(new)?;
        if let Entry::Matrix(mut matrix) = self.catalog.remove(old)? {
            matrix.rename(&mut self.pool, new);
            self.catalog.reinsert(Entry::Matrix(matrix));
        }
        Ok(QueryResult::Message(format!("Renamed {} to {}", old, new)))
    }

    fn rename_column(&mut self, table: &str, from: &str, to: &str) -> EngineResult<QueryResult> {
        let table = self.catalog.table_mut(table)?;
        table.rename_column(from, to)?;
        Ok(QueryResult::Message(format!(
            "Renamed column {} to {}",
            from, to
        )))
    }

    fn index(&mut self, table: &str, column: &str, kind: IndexKind) -> EngineResult<QueryResult> {
        let table = self.catalog.table_mut(table)?;
        table.column_index(column)?;
        match kind {
            IndexKind::Nothing => {
                table.indexed = false;
                table.indexed_column = None;
                table.indexing_strategy = IndexingStrategy::Nothing;
            }
            IndexKind::BTree | IndexKind::Hash => {
                table.indexed = true;
                table.indexed_column = Some(column.to_string());
                table.indexing_strategy = match kind {
                    IndexKind::BTree => IndexingStrategy::BTree,
                    _ => IndexingStrategy::Hash,
                };
            }
        }
        Ok(QueryResult::Message(format!("Indexed {} on {}", table.name, column)))
    }

    fn sort(&mut self, name: &str, keys: &[(String, Direction)]) -> EngineResult<QueryResult> {
        let table = self.catalog.table_mut(name)?;
        let mut sort_keys = Vec::with_capacity(keys.len());
        for (column, direction) in keys {
            sort_keys.push(SortKey {
                column: table.column_index(column)?,
                order: match direction {
                    Direction::Asc => SortOrder::Ascending,
                    Direction::Desc => SortOrder::Descending,
                },
            });
        }
        table.sort(&mut self.pool, &sort_keys)?;
        Ok(QueryResult::Message(format!("Sorted {}", name)))
    }

    fn symmetry(&mut self, name: &str) -> EngineResult<QueryResult> {
        let matrix = self.catalog.matrix_mut(name)?;
        let verdict = matrix.is_symmetric(&mut self.pool)?;
        Ok(QueryResult::Message(
            if verdict { "TRUE" } else { "FALSE" }.to_string(),
        ))
    }

    fn transpose(&mut self, name: &str) -> EngineResult<QueryResult> {
        let matrix = self.catalog.matrix_mut(name)?;
        matrix.transpose(&mut self.pool)?;
        Ok(QueryResult::Message(format!("Transposed {}", name)))
    }

    /// Run `<data>/<name>.ra` one command per line, printing each result the
    /// way the REPL would. A failing line prints its error and the script
    /// continues; QUIT stops the script.
    fn run_script(&mut self, name: &str) -> EngineResult<QueryResult> {
        let path = self.data_dir.join(format!("{}.ra", name));
        if !path.is_file() {
            return Err(EngineError::ScriptMissing(path));
        }
        info!(script = %path.display(), "source");
        let script = fs::read_to_string(&path)?;
        for line in script.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let command = match lexer_parser::parse(line) {
                Ok(command) => command,
                Err(err) => {
                    eprintln!("{}", err);
                    continue;
                }
            };
            if command == Command::Quit {
                break;
            }
            match self.execute(command) {
                Ok(result) => print_result(&result),
                Err(err) => eprintln!("Error: {}", err),
            }
        }
        Ok(QueryResult::Empty)
    }

    fn assign(&mut self, target: &str, op: AssignOp) -> EngineResult<QueryResult> {
        self.catalog.reserve(target)?;
        let result = match op {
            AssignOp::Compute { matrix } => return self.compute(target, &matrix),
            AssignOp::Select {
                column,
                op,
                rhs,
                table,
            } => self.select(target, &column, op, rhs, &table),
            AssignOp::Project { columns, table } => self.project(target, &columns, &table),
            AssignOp::Join {
                left,
                right,
                left_column,
                op,
                right_column,
            } => self.join(target, &left, &right, &left_column, op, &right_column),
            AssignOp::Cross { left, right } => self.cross(target, &left, &right),
            AssignOp::Distinct { table } => self.distinct(target, &table),
            AssignOp::GroupBy {
                group,
                table,
                having,
                returns,
            } => self.group_by(target, &group, &table, having, returns),
            AssignOp::OrderBy {
                column,
                direction,
                table,
            } => self.order_by(target, &column, direction, &table),
        }?;

        let message = format!(
            "Created table {}. Columns: {}, rows: {}",
            target, result.column_count, result.row_count
        );
        self.catalog.insert_table(result)?;
        Ok(QueryResult::Message(message))
    }

    fn compute(&mut self, target: &str, source: &str) -> EngineResult<QueryResult> {
        let matrix = self.catalog.matrix(source)?;
        let result = Matrix::result(target, &self.data_dir, matrix);
        matrix.compute(&mut self.pool, &result)?;
        let message = format!(
            "Created matrix {} from {}. Dimension: {}",
            target, result.original_name, result.dimension
        );
        self.catalog.insert_matrix(result)?;
        Ok(QueryResult::Message(message))
    }

    fn select(
        &mut self,
        target: &str,
        column: &str,
        op: BinOp,
        rhs: Operand,
        source: &str,
    ) -> EngineResult<Table> {
        let table = self.catalog.table(source)?;
        let lhs_index = table.column_index(column)?;
        let rhs_value = match rhs {
            Operand::Literal(value) => RhsValue::Literal(value),
            Operand::Column(name) => RhsValue::Column(table.column_index(&name)?),
        };
        let cursor = table.cursor();
        let columns = table.columns.clone();

        let result = Table::from_columns(target, &self.data_dir, columns)?;
        self.guarded(result, |engine, result| {
            engine.fill_streamed(result, cursor, move |row| {
                let rhs = match rhs_value {
                    RhsValue::Literal(value) => value,
                    RhsValue::Column(index) => row[index],
                };
                if eval_bin_op(row[lhs_index], rhs, op) {
                    Some(row)
                } else {
                    None
                }
            })
        })
    }

    fn project(
        &mut self,
        target: &str,
        columns: &[String],
        source: &str,
    ) -> EngineResult<Table> {
        let table = self.catalog.table(source)?;
        let mut indices = Vec::with_capacity(columns.len());
        for column in columns {
            indices.push(table.column_index(column)?);
        }
        let cursor = table.cursor();

        let result = Table::from_columns(target, &self.data_dir, columns.to_vec())?;
        self.guarded(result, |engine, result| {
            engine.fill_streamed(result, cursor, move |row| {
                Some(indices.iter().map(|&i| row[i]).collect())
            })
        })
    }

    fn distinct(&mut self, target: &str, source: &str) -> EngineResult<Table> {
        let table = self.catalog.table(source)?;
        let cursor = table.cursor();
        let columns = table.columns.clone();

        let result = Table::from_columns(target, &self.data_dir, columns)?;
        let mut seen: HashSet<Vec<i32>> = HashSet::new();
        self.guarded(result, |engine, result| {
            engine.fill_streamed(result, cursor, move |row| {
                if seen.insert(row.clone()) {
                    Some(row)
                } else {
                    None
                }
            })
        })
    }

    fn cross(&mut self, target: &str, left: &str, right: &str) -> EngineResult<Table> {
        let left_table = self.catalog.table(left)?;
        let right_table = self.catalog.table(right)?;
        let columns = combined_columns(left_table, right_table);
        let outer = left_table.cursor();
        let inner = right_table.cursor();

        let result = Table::from_columns(target, &self.data_dir, columns)?;
        self.guarded(result, |engine, result| {
            engine.fill_joined(result, outer, inner, |_, _| true)
        })
    }

    fn join(
        &mut self,
        target: &str,
        left: &str,
        right: &str,
        left_column: &str,
        op: BinOp,
        right_column: &str,
    ) -> EngineResult<Table> {
        let left_table = self.catalog.table(left)?;
        let right_table = self.catalog.table(right)?;
        let left_index = left_table.column_index(left_column)?;
        let right_index = right_table.column_index(right_column)?;
        let columns = combined_columns(left_table, right_table);
        let outer = left_table.cursor();
        let inner = right_table.cursor();

        let result = Table::from_columns(target, &self.data_dir, columns)?;
        self.guarded(result, |engine, result| {
            engine.fill_joined(result, outer, inner, move |l, r| {
                eval_bin_op(l[left_index], r[right_index], op)
            })
        })
    }

    fn order_by(
        &mut self,
        target: &str,
        column: &str,
        direction: Direction,
        source: &str,
    ) -> EngineResult<Table> {
        let table = self.catalog.table(source)?;
        let key = SortKey {
            column: table.column_index(column)?,
            order: match direction {
                Direction::Asc => SortOrder::Ascending,
                Direction::Desc => SortOrder::Descending,
            },
        };
        let cursor = table.cursor();
        let columns = table.columns.clone();

        let result = Table::from_columns(target, &self.data_dir, columns)?;
        self.guarded(result, |engine, result| {
            engine.fill_streamed(result, cursor, Some)?;
            result.sort(&mut engine.pool, &[key])?;
            Ok(())
        })
    }

    fn group_by(
        &mut self,
        target: &str,
        group: &str,
        source: &str,
        having: (Aggregate, String, BinOp, i32),
        returns: (Aggregate, String),
    ) -> EngineResult<Table> {
        let table = self.catalog.table(source)?;
        let group_index = table.column_index(group)?;
        let (having_agg, having_column, having_op, having_value) = having;
        let having_index = table.column_index(&having_column)?;
        let (return_agg, return_column) = returns;
        let return_index = table.column_index(&return_column)?;
        let mut cursor = table.cursor();
        let columns = vec![
            group.to_string(),
            format!("{}{}", aggregate_label(return_agg), return_column),
        ];

        let mut groups: HashMap<i32, (Accumulator, Accumulator)> = HashMap::new();
        while let Some(row) = cursor.next_row(&mut self.pool)? {
            let entry = groups
                .entry(row[group_index])
                .or_insert_with(|| (Accumulator::new(), Accumulator::new()));
            entry.0.add(row[having_index]);
            entry.1.add(row[return_index]);
        }

        let mut keys: Vec<i32> = groups.keys().copied().collect();
        keys.sort();

        let result = Table::from_columns(target, &self.data_dir, columns)?;
        self.guarded(result, |engine, result| {
            let mut buffer = Vec::with_capacity(result.max_rows_per_block);
            for key in keys {
                let (having_acc, return_acc) = &groups[&key];
                if !eval_bin_op_wide(
                    having_acc.aggregate(having_agg),
                    having_value as i64,
                    having_op,
                ) {
                    continue;
                }
                buffer.push(vec![key, return_acc.aggregate(return_agg) as i32]);
                if buffer.len() == result.max_rows_per_block {
                    result.append_block(&mut engine.pool, std::mem::take(&mut buffer))?;
                }
            }
            if !buffer.is_empty() {
                result.append_block(&mut engine.pool, buffer)?;
            }
            Ok(())
        })
    }

    /// Run `fill` against a freshly created result table; on failure the
    /// partially written blocks are unloaded before the error propagates.
    fn guarded<F>(&mut self, mut result: Table, fill: F) -> EngineResult<Table>
    where
        F: FnOnce(&mut Self, &mut Table) -> EngineResult<()>,
    {
        match fill(self, &mut result) {
            Ok(()) => Ok(result),
            Err(err) => {
                result.unload(&mut self.pool, &self.data_dir);
                Err(err)
            }
        }
    }

    /// Stream the cursor's rows through `transform`, appending kept rows
    /// block-by-block.
    fn fill_streamed<F>(
        &mut self,
        result: &mut Table,
        mut cursor: Cursor,
        mut transform: F,
    ) -> EngineResult<()>
    where
        F: FnMut(Vec<i32>) -> Option<Vec<i32>>,
    {
        let mut buffer = Vec::with_capacity(result.max_rows_per_block);
        while let Some(row) = cursor.next_row(&mut self.pool)? {
            if let Some(row) = transform(row) {
                buffer.push(row);
                if buffer.len() == result.max_rows_per_block {
                    result.append_block(&mut self.pool, std::mem::take(&mut buffer))?;
                }
            }
        }
        if !buffer.is_empty() {
            result.append_block(&mut self.pool, buffer)?;
        }
        Ok(())
    }

    /// Nested-loop join: the inner cursor restarts for every outer row.
    fn fill_joined<F>(
        &mut self,
        result: &mut Table,
        mut outer: Cursor,
        inner: Cursor,
        accept: F,
    ) -> EngineResult<()>
    where
        F: Fn(&[i32], &[i32]) -> bool,
    {
        let mut buffer = Vec::with_capacity(result.max_rows_per_block);
        while let Some(left_row) = outer.next_row(&mut self.pool)? {
            let mut inner = inner.clone();
            while let Some(right_row) = inner.next_row(&mut self.pool)? {
                if accept(&left_row, &right_row) {
                    let mut row = left_row.clone();
                    row.extend_from_slice(&right_row);
                    buffer.push(row);
                    if buffer.len() == result.max_rows_per_block {
                        result.append_block(&mut self.pool, std::mem::take(&mut buffer))?;
                    }
                }
            }
        }
        if !buffer.is_empty() {
            result.append_block(&mut self.pool, buffer)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum RhsValue {
    Literal(i32),
    Column(usize),
}

/// Running aggregates over one column of one group.
struct Accumulator {
    count: i64,
    sum: i64,
    min: i32,
    max: i32,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0,
            min: i32::MAX,
            max: i32::MIN,
        }
    }

    fn add(&mut self, value: i32) {
        self.count += 1;
        self.sum += value as i64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn aggregate(&self, agg: Aggregate) -> i64 {
        match agg {
            Aggregate::Max => self.max as i64,
            Aggregate::Min => self.min as i64,
            Aggregate::Sum => self.sum,
            Aggregate::Avg => self.sum / self.count,
            Aggregate::Count => self.count,
        }
    }
}

fn aggregate_label(agg: Aggregate) -> &'static str {
    match agg {
        Aggregate::Max => "MAX",
        Aggregate::Min => "MIN",
        Aggregate::Sum => "SUM",
        Aggregate::Avg => "AVG",
        Aggregate::Count => "COUNT",
    }
}

fn eval_bin_op(left: i32, right: i32, op: BinOp) -> bool {
    eval_bin_op_wide(left as i64, right as i64, op)
}

fn eval_bin_op_wide(left: i64, right: i64, op: BinOp) -> bool {
    match op {
        BinOp::Eq => left == right,
        BinOp::Ne => left != right,
        BinOp::Lt => left < right,
        BinOp::Gt => left > right,
        BinOp::Le => left <= right,
        BinOp::Ge => left >= right,
    }
}

/// Output columns of a join or cross product: column names occurring in both
/// inputs are disambiguated with their table name.
fn combined_columns(left: &Table, right: &Table) -> Vec<String> {
    let mut columns = Vec::with_capacity(left.column_count + right.column_count);
    for column in &left.columns {
        if right.is_column(column) {
            columns.push(format!("{}_{}", left.name, column));
        } else {
            columns.push(column.clone());
        }
    }
    for column in &right.columns {
        if left.is_column(column) {
            columns.push(format!("{}_{}", right.name, column));
        } else {
            columns.push(column.clone());
        }
    }
    columns
}
