mod parser;

pub use parser::{
    parser, Aggregate, AssignOp, BinOp, Command, Direction, IndexKind, Operand,
};

use chumsky::Parser;

/// Parse a single command line into its AST.
pub fn parse(input: &str) -> Result<Command, String> {
    match parser().parse(input).into_result() {
        Ok(command) => Ok(command),
        Err(errs) => {
            let detail: Vec<String> = errs.iter().map(ToString::to_string).collect();
            Err(format!("Parse error: {}", detail.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_forms() {
        assert_eq!(parse("LOAD emp").unwrap(), Command::Load("emp".into()));
        assert_eq!(
            parse("LOAD MATRIX M1").unwrap(),
            Command::LoadMatrix("M1".into())
        );
    }

    #[test]
    fn test_list_print_export_clear() {
        assert_eq!(parse("LIST TABLES").unwrap(), Command::ListTables);
        assert_eq!(parse("LIST MATRICES").unwrap(), Command::ListMatrices);
        assert_eq!(parse("PRINT emp").unwrap(), Command::Print("emp".into()));
        assert_eq!(
            parse("PRINT MATRIX M").unwrap(),
            Command::PrintMatrix("M".into())
        );
        assert_eq!(parse("EXPORT emp").unwrap(), Command::Export("emp".into()));
        assert_eq!(
            parse("EXPORT MATRIX M").unwrap(),
            Command::ExportMatrix("M".into())
        );
        assert_eq!(parse("CLEAR emp").unwrap(), Command::Clear("emp".into()));
    }

    #[test]
    fn test_rename_forms() {
        assert_eq!(
            parse("RENAME MATRIX A B").unwrap(),
            Command::RenameMatrix("A".into(), "B".into())
        );
        assert_eq!(
            parse("RENAME TABLE A B").unwrap(),
            Command::RenameTable("A".into(), "B".into())
        );
        assert_eq!(
            parse("RENAME dept_id TO dept FROM emp").unwrap(),
            Command::RenameColumn {
                table: "emp".into(),
                from: "dept_id".into(),
                to: "dept".into(),
            }
        );
    }

    #[test]
    fn test_index() {
        assert_eq!(
            parse("INDEX ON salary FROM emp USING BTREE").unwrap(),
            Command::Index {
                table: "emp".into(),
                column: "salary".into(),
                kind: IndexKind::BTree,
            }
        );
        assert_eq!(
            parse("INDEX ON salary FROM emp USING NOTHING").unwrap(),
            Command::Index {
                table: "emp".into(),
                column: "salary".into(),
                kind: IndexKind::Nothing,
            }
        );
    }

    #[test]
    fn test_sort_zips_columns_and_directions() {
        assert_eq!(
            parse("SORT emp BY salary, age IN DESC, ASC").unwrap(),
            Command::Sort {
                table: "emp".into(),
                keys: vec![
                    ("salary".into(), Direction::Desc),
                    ("age".into(), Direction::Asc),
                ],
            }
        );
    }

    #[test]
    fn test_sort_arity_mismatch_is_an_error() {
        assert!(parse("SORT emp BY salary, age IN DESC").is_err());
    }

    #[test]
    fn test_select_with_literal_and_column() {
        assert_eq!(
            parse("R = SELECT salary >= 100 FROM emp").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::Select {
                    column: "salary".into(),
                    op: BinOp::Ge,
                    rhs: Operand::Literal(100),
                    table: "emp".into(),
                },
            }
        );
        assert_eq!(
            parse("R = SELECT a == b FROM t").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::Select {
                    column: "a".into(),
                    op: BinOp::Eq,
                    rhs: Operand::Column("b".into()),
                    table: "t".into(),
                },
            }
        );
    }

    #[test]
    fn test_project_join_cross_distinct() {
        assert_eq!(
            parse("R = PROJECT a, b FROM t").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::Project {
                    columns: vec!["a".into(), "b".into()],
                    table: "t".into(),
                },
            }
        );
        assert_eq!(
            parse("R = JOIN t1, t2 ON a <= b").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::Join {
                    left: "t1".into(),
                    right: "t2".into(),
                    left_column: "a".into(),
                    op: BinOp::Le,
                    right_column: "b".into(),
                },
            }
        );
        assert_eq!(
            parse("R = CROSS t1 t2").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::Cross {
                    left: "t1".into(),
                    right: "t2".into(),
                },
            }
        );
        assert_eq!(
            parse("R = DISTINCT t").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::Distinct { table: "t".into() },
            }
        );
    }

    #[test]
    fn test_group_by_and_order_by() {
        assert_eq!(
            parse("R = GROUP BY dept FROM emp HAVING AVG(salary) > 50 RETURN MAX(age)").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::GroupBy {
                    group: "dept".into(),
                    table: "emp".into(),
                    having: (Aggregate::Avg, "salary".into(), BinOp::Gt, 50),
                    returns: (Aggregate::Max, "age".into()),
                },
            }
        );
        assert_eq!(
            parse("R = ORDER BY salary DESC ON emp").unwrap(),
            Command::Assign {
                target: "R".into(),
                op: AssignOp::OrderBy {
                    column: "salary".into(),
                    direction: Direction::Desc,
                    table: "emp".into(),
                },
            }
        );
    }

    #[test]
    fn test_matrix_commands() {
        assert_eq!(
            parse("SYMMETRY M").unwrap(),
            Command::Symmetry("M".into())
        );
        assert_eq!(
            parse("TRANSPOSE M").unwrap(),
            Command::Transpose("M".into())
        );
        assert_eq!(
            parse("N = COMPUTE M").unwrap(),
            Command::Assign {
                target: "N".into(),
                op: AssignOp::Compute { matrix: "M".into() },
            }
        );
    }

    #[test]
    fn test_source_and_quit() {
        assert_eq!(
            parse("SOURCE queries").unwrap(),
            Command::Source("queries".into())
        );
        assert_eq!(parse("QUIT").unwrap(), Command::Quit);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse("").is_err());
        assert!(parse("FROBNICATE x").is_err());
        assert!(parse("LOAD").is_err());
        assert!(parse("R = SELECT a FROM t").is_err());
        assert!(parse("SORT emp BY IN ASC").is_err());
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        assert!(parse("LOAD emp extra").is_err());
        assert!(parse("LIST TABLES NOW").is_err());
    }
}
