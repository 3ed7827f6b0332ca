use chumsky::{input::Emitter, prelude::*, regex::regex, text::ascii::ident};

/// Binary comparison operator of SELECT, JOIN and HAVING clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
    Sum,
    Avg,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    Hash,
    Nothing,
}

/// Right-hand side of a SELECT condition: a literal or another column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(i32),
    Column(String),
}

/// The expressions allowed on the right of `NEW = ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOp {
    Select {
        column: String,
        op: BinOp,
        rhs: Operand,
        table: String,
    },
    Project {
        columns: Vec<String>,
        table: String,
    },
    Join {
        left: String,
        right: String,
        left_column: String,
        op: BinOp,
        right_column: String,
    },
    Cross {
        left: String,
        right: String,
    },
    Distinct {
        table: String,
    },
    GroupBy {
        group: String,
        table: String,
        having: (Aggregate, String, BinOp, i32),
        returns: (Aggregate, String),
    },
    OrderBy {
        column: String,
        direction: Direction,
        table: String,
    },
    Compute {
        matrix: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load(String),
    LoadMatrix(String),
    ListTables,
    ListMatrices,
    Print(String),
    PrintMatrix(String),
    Export(String),
    ExportMatrix(String),
    Clear(String),
    RenameTable(String, String),
    RenameMatrix(String, String),
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    Index {
        table: String,
        column: String,
        kind: IndexKind,
    },
    Sort {
        table: String,
        keys: Vec<(String, Direction)>,
    },
    Source(String),
    Symmetry(String),
    Transpose(String),
    Assign {
        target: String,
        op: AssignOp,
    },
    Quit,
}

fn name<'a>() -> impl Parser<'a, &'a str, String, extra::Err<Rich<'a, char>>> {
    ident().map(|s: &str| s.to_string()).padded()
}

fn kw<'a>(word: &'static str) -> impl Parser<'a, &'a str, (), extra::Err<Rich<'a, char>>> {
    just(word).padded().ignored()
}

fn integer<'a>() -> impl Parser<'a, &'a str, i32, extra::Err<Rich<'a, char>>> {
    regex(r"-?\d+")
        .validate(
            |s: &str, extra, emitter: &mut Emitter<Rich<'a, char>>| match s.parse::<i32>() {
                Ok(value) => value,
                Err(_) => {
                    emitter.emit(Rich::custom(extra.span(), "integer literal out of range"));
                    0
                }
            },
        )
        .padded()
}

fn bin_op<'a>() -> impl Parser<'a, &'a str, BinOp, extra::Err<Rich<'a, char>>> {
    choice((
        just("==").to(BinOp::Eq),
        just("!=").to(BinOp::Ne),
        just("<=").to(BinOp::Le),
        just(">=").to(BinOp::Ge),
        just("<").to(BinOp::Lt),
        just(">").to(BinOp::Gt),
    ))
    .padded()
}

fn direction<'a>() -> impl Parser<'a, &'a str, Direction, extra::Err<Rich<'a, char>>> {
    choice((
        just("ASC").to(Direction::Asc),
        just("DESC").to(Direction::Desc),
    ))
    .padded()
}

fn aggregate<'a>() -> impl Parser<'a, &'a str, Aggregate, extra::Err<Rich<'a, char>>> {
    choice((
        just("MAX").to(Aggregate::Max),
        just("MIN").to(Aggregate::Min),
        just("SUM").to(Aggregate::Sum),
        just("AVG").to(Aggregate::Avg),
        just("COUNT").to(Aggregate::Count),
    ))
    .padded()
}

/// `AGG(column)`, as used by GROUP BY clauses.
fn agg_call<'a>() -> impl Parser<'a, &'a str, (Aggregate, String), extra::Err<Rich<'a, char>>> {
    aggregate().then(name().delimited_by(just('(').padded(), just(')').padded()))
}

fn name_list<'a>() -> impl Parser<'a, &'a str, Vec<String>, extra::Err<Rich<'a, char>>> {
    name()
        .separated_by(just(',').padded())
        .at_least(1)
        .collect::<Vec<_>>()
}

fn assign_op<'a>() -> impl Parser<'a, &'a str, AssignOp, extra::Err<Rich<'a, char>>> {
    let operand = choice((
        integer().map(Operand::Literal),
        name().map(Operand::Column),
    ));

    let select = kw("SELECT")
        .ignore_then(name())
        .then(bin_op())
        .then(operand)
        .then_ignore(kw("FROM"))
        .then(name())
        .map(|(((column, op), rhs), table)| AssignOp::Select {
            column,
            op,
            rhs,
            table,
        });

    let project = kw("PROJECT")
        .ignore_then(name_list())
        .then_ignore(kw("FROM"))
        .then(name())
        .map(|(columns, table)| AssignOp::Project { columns, table });

    let join = kw("JOIN")
        .ignore_then(name())
        .then_ignore(just(',').padded())
        .then(name())
        .then_ignore(kw("ON"))
        .then(name())
        .then(bin_op())
        .then(name())
        .map(
            |((((left, right), left_column), op), right_column)| AssignOp::Join {
                left,
                right,
                left_column,
                op,
                right_column,
            },
        );

    let cross = kw("CROSS")
        .ignore_then(name())
        .then(name())
        .map(|(left, right)| AssignOp::Cross { left, right });

    let distinct = kw("DISTINCT")
        .ignore_then(name())
        .map(|table| AssignOp::Distinct { table });

    let group_by = kw("GROUP")
        .ignore_then(kw("BY"))
        .ignore_then(name())
        .then_ignore(kw("FROM"))
        .then(name())
        .then_ignore(kw("HAVING"))
        .then(agg_call())
        .then(bin_op())
        .then(integer())
        .then_ignore(kw("RETURN"))
        .then(agg_call())
        .map(
            |(((((group, table), having_call), op), value), returns)| AssignOp::GroupBy {
                group,
                table,
                having: (having_call.0, having_call.1, op, value),
                returns,
            },
        );

    let order_by = kw("ORDER")
        .ignore_then(kw("BY"))
        .ignore_then(name())
        .then(direction())
        .then_ignore(kw("ON"))
        .then(name())
        .map(|((column, direction), table)| AssignOp::OrderBy {
            column,
            direction,
            table,
        });

    let compute = kw("COMPUTE")
        .ignore_then(name())
        .map(|matrix| AssignOp::Compute { matrix });

    choice((
        select, project, join, cross, distinct, group_by, order_by, compute,
    ))
}

pub fn parser<'a>() -> impl Parser<'a, &'a str, Command, extra::Err<Rich<'a, char>>> {
    let load_matrix = kw("LOAD")
        .then(kw("MATRIX"))
        .ignore_then(name())
        .map(Command::LoadMatrix);
    let load = kw("LOAD").ignore_then(name()).map(Command::Load);

    let list_tables = kw("LIST").then(kw("TABLES")).to(Command::ListTables);
    let list_matrices = kw("LIST").then(kw("MATRICES")).to(Command::ListMatrices);

    let print_matrix = kw("PRINT")
        .then(kw("MATRIX"))
        .ignore_then(name())
        .map(Command::PrintMatrix);
    let print = kw("PRINT").ignore_then(name()).map(Command::Print);

    let export_matrix = kw("EXPORT")
        .then(kw("MATRIX"))
        .ignore_then(name())
        .map(Command::ExportMatrix);
    let export = kw("EXPORT").ignore_then(name()).map(Command::Export);

    let clear = kw("CLEAR").ignore_then(name()).map(Command::Clear);

    let rename_matrix = kw("RENAME")
        .then(kw("MATRIX"))
        .ignore_then(name())
        .then(name())
        .map(|(old, new)| Command::RenameMatrix(old, new));
    let rename_table = kw("RENAME")
        .then(kw("TABLE"))
        .ignore_then(name())
        .then(name())
        .map(|(old, new)| Command::RenameTable(old, new));
    let rename_column = kw("RENAME")
        .ignore_then(name())
        .then_ignore(kw("TO"))
        .then(name())
        .then_ignore(kw("FROM"))
        .then(name())
        .map(|((from, to), table)| Command::RenameColumn { table, from, to });

    let index_kind = choice((
        just("BTREE").to(IndexKind::BTree),
        just("HASH").to(IndexKind::Hash),
        just("NOTHING").to(IndexKind::Nothing),
    ))
    .padded();
    let index = kw("INDEX")
        .then(kw("ON"))
        .ignore_then(name())
        .then_ignore(kw("FROM"))
        .then(name())
        .then_ignore(kw("USING"))
        .then(index_kind)
        .map(|((column, table), kind)| Command::Index {
            table,
            column,
            kind,
        });

    let sort = kw("SORT")
        .ignore_then(name())
        .then_ignore(kw("BY"))
        .then(name_list())
        .then_ignore(kw("IN"))
        .then(
            direction()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .validate(
            |((table, columns), directions): ((String, Vec<String>), Vec<Direction>),
             extra,
             emitter: &mut Emitter<Rich<'a, char>>| {
                if columns.len() != directions.len() {
                    emitter.emit(Rich::custom(
                        extra.span(),
                        format!(
                            "{} sort columns but {} directions",
                            columns.len(),
                            directions.len()
                        ),
                    ));
                }
                Command::Sort {
                    table,
                    keys: columns.into_iter().zip(directions).collect(),
                }
            },
        );

    let source = kw("SOURCE").ignore_then(name()).map(Command::Source);
    let symmetry = kw("SYMMETRY").ignore_then(name()).map(Command::Symmetry);
    let transpose = kw("TRANSPOSE").ignore_then(name()).map(Command::Transpose);
    let quit = kw("QUIT").to(Command::Quit);

    let assign = name()
        .then_ignore(just('=').padded())
        .then(assign_op())
        .map(|(target, op)| Command::Assign { target, op });

    choice((
        load_matrix,
        load,
        list_tables,
        list_matrices,
        print_matrix,
        print,
        export_matrix,
        export,
        clear,
        rename_matrix,
        rename_table,
        rename_column,
        index,
        sort,
        source,
        symmetry,
        transpose,
        quit,
        assign,
    ))
    .then_ignore(end())
}
