use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, Expr as SqlExpr, ObjectName, Query, SelectItem, SetExpr,
    Statement, TableFactor, UnaryOperator, Value,
};
use tfq_common::{Result, TfqError};
use tfq_storage::scan::CompareOp;

use crate::plan::{
    DescribeStmt, InsertStmt, Literal, Projection, SelectStmt, SqlStatement, WhereExpr,
};

/// Convert a SQL string into one [`SqlStatement`].
///
/// Contract:
/// - exactly one statement must be present;
/// - supported statements are delegated to [`statement_to_plan`].
pub fn sql_to_plan(sql: &str) -> Result<SqlStatement> {
    let stmts = tfq_sql::parse_sql(sql)?;
    if stmts.len() != 1 {
        return Err(TfqError::Unsupported(
            "only single-statement SQL is supported".to_string(),
        ));
    }
    statement_to_plan(&stmts[0])
}

/// Convert one parsed SQL statement into the closed statement sum.
///
/// Supported statements are `SELECT`, `DESCRIBE`, and
/// `INSERT INTO ... VALUES ...`.
pub fn statement_to_plan(stmt: &Statement) -> Result<SqlStatement> {
    match stmt {
        Statement::Query(q) => Ok(SqlStatement::Select(query_to_select(q)?)),
        Statement::ExplainTable { table_name, .. } => Ok(SqlStatement::Describe(DescribeStmt {
            table: object_name_to_string(table_name),
        })),
        Statement::Insert(insert) => Ok(SqlStatement::Insert(insert_to_plan(insert)?)),
        _ => Err(TfqError::Unsupported(
            "only SELECT, DESCRIBE, and INSERT INTO ... VALUES are supported".to_string(),
        )),
    }
}

fn query_to_select(q: &Query) -> Result<SelectStmt> {
    let select = match &*q.body {
        SetExpr::Select(s) => s.as_ref(),
        _ => {
            return Err(TfqError::Unsupported(
                "only simple SELECT is supported (no UNION/EXCEPT/INTERSECT)".to_string(),
            ));
        }
    };
    if q.with.is_some() {
        return Err(TfqError::Unsupported(
            "WITH clauses are not supported".to_string(),
        ));
    }
    if q.order_by.is_some() || q.limit.is_some() {
        return Err(TfqError::Unsupported(
            "ORDER BY / LIMIT are not supported; rows are returned in key order".to_string(),
        ));
    }
    match &select.group_by {
        sqlparser::ast::GroupByExpr::Expressions(exprs, modifiers)
            if exprs.is_empty() && modifiers.is_empty() => {}
        _ => {
            return Err(TfqError::Unsupported(
                "GROUP BY is not supported".to_string(),
            ));
        }
    }

    if select.from.len() != 1 || !select.from[0].joins.is_empty() {
        return Err(TfqError::Unsupported(
            "exactly one table without joins is required".to_string(),
        ));
    }
    let table = match &select.from[0].relation {
        TableFactor::Table { name, .. } => object_name_to_string(name),
        _ => {
            return Err(TfqError::Unsupported(
                "FROM must name a plain table".to_string(),
            ));
        }
    };

    let mut columns = Vec::new();
    let mut wildcard = false;
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => wildcard = true,
            SelectItem::UnnamedExpr(SqlExpr::Identifier(ident)) => {
                columns.push(ident.value.clone());
            }
            _ => {
                return Err(TfqError::Unsupported(
                    "projection must be '*' or plain column names".to_string(),
                ));
            }
        }
    }
    let projection = if wildcard {
        if !columns.is_empty() {
            return Err(TfqError::Unsupported(
                "'*' cannot be mixed with named columns".to_string(),
            ));
        }
        Projection::All
    } else {
        Projection::Columns(columns)
    };

    let predicate = select
        .selection
        .as_ref()
        .map(sql_expr_to_where)
        .transpose()?;

    Ok(SelectStmt {
        table,
        projection,
        predicate,
        executable: false,
    })
}

fn insert_to_plan(insert: &sqlparser::ast::Insert) -> Result<InsertStmt> {
    let table = object_name_to_string(&insert.table_name);
    let columns = insert
        .columns
        .iter()
        .map(|c| c.value.clone())
        .collect::<Vec<_>>();

    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| TfqError::Unsupported("INSERT must carry VALUES rows".to_string()))?;
    let values = match &*source.body {
        SetExpr::Values(values) => values,
        _ => {
            return Err(TfqError::Unsupported(
                "INSERT source must be a VALUES list".to_string(),
            ));
        }
    };

    let mut rows = Vec::with_capacity(values.rows.len());
    for row in &values.rows {
        let mut cells = Vec::with_capacity(row.len());
        for expr in row {
            cells.push(sql_expr_to_literal(expr)?.ok_or_else(|| {
                TfqError::Unsupported("INSERT values must be literals".to_string())
            })?);
        }
        rows.push(cells);
    }

    Ok(InsertStmt {
        table,
        columns,
        rows,
    })
}

/// Lower a WHERE expression into the closed comparison tree.
///
/// Leaves must compare one column against one literal; either operand
/// order is accepted and normalised to column-on-the-left.
pub fn sql_expr_to_where(e: &SqlExpr) -> Result<WhereExpr> {
    match e {
        SqlExpr::Nested(inner) => sql_expr_to_where(inner),
        SqlExpr::BinaryOp { left, op, right } => match op {
            SqlBinaryOp::And => Ok(WhereExpr::And(
                Box::new(sql_expr_to_where(left)?),
                Box::new(sql_expr_to_where(right)?),
            )),
            SqlBinaryOp::Or => Ok(WhereExpr::Or(
                Box::new(sql_expr_to_where(left)?),
                Box::new(sql_expr_to_where(right)?),
            )),
            _ => comparison_to_leaf(left, op, right),
        },
        _ => Err(TfqError::Unsupported(format!(
            "unsupported WHERE expression: {e}"
        ))),
    }
}

fn comparison_to_leaf(left: &SqlExpr, op: &SqlBinaryOp, right: &SqlExpr) -> Result<WhereExpr> {
    let op = match op {
        SqlBinaryOp::Eq => CompareOp::Eq,
        SqlBinaryOp::NotEq => CompareOp::NotEq,
        SqlBinaryOp::Lt => CompareOp::Lt,
        SqlBinaryOp::LtEq => CompareOp::LtEq,
        SqlBinaryOp::Gt => CompareOp::Gt,
        SqlBinaryOp::GtEq => CompareOp::GtEq,
        other => {
            return Err(TfqError::Unsupported(format!(
                "unsupported comparison operator: {other}"
            )));
        }
    };

    if let (SqlExpr::Identifier(ident), Some(value)) = (strip(left), sql_expr_to_literal(right)?) {
        return Ok(WhereExpr::Cmp {
            op,
            field: ident.value.clone(),
            value,
        });
    }
    if let (Some(value), SqlExpr::Identifier(ident)) = (sql_expr_to_literal(left)?, strip(right)) {
        return Ok(WhereExpr::Cmp {
            op: flip(op),
            field: ident.value.clone(),
            value,
        });
    }
    Err(TfqError::Unsupported(
        "comparisons must be between one column and one literal".to_string(),
    ))
}

fn strip(e: &SqlExpr) -> &SqlExpr {
    match e {
        SqlExpr::Nested(inner) => strip(inner),
        other => other,
    }
}

// Mirror the comparison when the literal was written on the left.
fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::LtEq => CompareOp::GtEq,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::GtEq => CompareOp::LtEq,
        CompareOp::Eq | CompareOp::NotEq => op,
    }
}

fn sql_expr_to_literal(e: &SqlExpr) -> Result<Option<Literal>> {
    match strip(e) {
        SqlExpr::Value(Value::Number(n, _)) => number_literal(n).map(Some),
        SqlExpr::Value(Value::SingleQuotedString(s)) => Ok(Some(Literal::Utf8(s.clone()))),
        SqlExpr::Value(Value::Boolean(b)) => Ok(Some(Literal::Boolean(*b))),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match strip(expr) {
            SqlExpr::Value(Value::Number(n, _)) => match number_literal(n)? {
                Literal::Integer(i) => Ok(Some(Literal::Integer(-i))),
                Literal::Float(f) => Ok(Some(Literal::Float(-f))),
                _ => Ok(None),
            },
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn number_literal(n: &str) -> Result<Literal> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(Literal::Integer(i));
    }
    n.parse::<f64>()
        .map(Literal::Float)
        .map_err(|e| TfqError::Planning(format!("invalid numeric literal '{n}': {e}")))
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::sql_to_plan;
    use crate::plan::{Literal, Projection, SqlStatement, WhereExpr};
    use tfq_storage::scan::CompareOp;

    #[test]
    fn lowers_select_with_conjunctive_where() {
        let plan = sql_to_plan(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 3000 AND time < 5000 AND user = 'user_1'",
        )
        .expect("lower select");
        let select = match plan {
            SqlStatement::Select(s) => s,
            other => panic!("expected select, got {other:?}"),
        };
        assert_eq!(select.table, "GeoCheckin");
        assert_eq!(
            select.projection,
            Projection::Columns(vec!["weather".to_string()])
        );
        assert!(!select.executable);
        // Right-associative AND chain with the comparisons at the leaves.
        let mut leaves = Vec::new();
        fn walk(e: &WhereExpr, out: &mut Vec<(CompareOp, String)>) {
            match e {
                WhereExpr::And(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
                WhereExpr::Cmp { op, field, .. } => out.push((*op, field.clone())),
                WhereExpr::Or(..) => panic!("no OR expected"),
            }
        }
        walk(select.predicate.as_ref().expect("where"), &mut leaves);
        assert_eq!(
            leaves,
            vec![
                (CompareOp::Gt, "time".to_string()),
                (CompareOp::Lt, "time".to_string()),
                (CompareOp::Eq, "user".to_string()),
            ]
        );
    }

    #[test]
    fn normalises_literal_on_the_left() {
        let plan = sql_to_plan("SELECT a FROM t WHERE 3000 < time AND time < 5000 AND b = '1'")
            .expect("lower");
        let select = match plan {
            SqlStatement::Select(s) => s,
            other => panic!("expected select, got {other:?}"),
        };
        let mut found = false;
        fn find_gt(e: &WhereExpr, found: &mut bool) {
            match e {
                WhereExpr::And(a, b) => {
                    find_gt(a, found);
                    find_gt(b, found);
                }
                WhereExpr::Cmp {
                    op: CompareOp::Gt,
                    field,
                    value,
                } if field == "time" => {
                    assert_eq!(value, &Literal::Integer(3000));
                    *found = true;
                }
                _ => {}
            }
        }
        find_gt(select.predicate.as_ref().expect("where"), &mut found);
        assert!(found, "expected flipped '3000 < time' leaf");
    }

    #[test]
    fn lowers_wildcard_projection() {
        let plan = sql_to_plan("SELECT * FROM t WHERE time > 1 AND time < 2").expect("lower");
        match plan {
            SqlStatement::Select(s) => assert_eq!(s.projection, Projection::All),
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn lowers_describe() {
        let plan = sql_to_plan("DESCRIBE GeoCheckin").expect("lower describe");
        match plan {
            SqlStatement::Describe(d) => assert_eq!(d.table, "GeoCheckin"),
            other => panic!("expected describe, got {other:?}"),
        }
    }

    #[test]
    fn lowers_insert_values() {
        let plan = sql_to_plan(
            "INSERT INTO GeoCheckin (location, user, time) VALUES ('SF', 'user_1', 4000)",
        )
        .expect("lower insert");
        let insert = match plan {
            SqlStatement::Insert(i) => i,
            other => panic!("expected insert, got {other:?}"),
        };
        assert_eq!(insert.table, "GeoCheckin");
        assert_eq!(insert.columns, vec!["location", "user", "time"]);
        assert_eq!(
            insert.rows,
            vec![vec![
                Literal::Utf8("SF".to_string()),
                Literal::Utf8("user_1".to_string()),
                Literal::Integer(4000),
            ]]
        );
    }

    #[test]
    fn rejects_joins() {
        let err = sql_to_plan("SELECT a FROM t1 JOIN t2 ON t1.x = t2.x").expect_err("no joins");
        assert!(format!("{err}").contains("without joins"));
    }

    #[test]
    fn lowers_negative_numeric_literals() {
        let plan = sql_to_plan("SELECT a FROM t WHERE time > -5 AND time < 5").expect("lower");
        let select = match plan {
            SqlStatement::Select(s) => s,
            other => panic!("expected select, got {other:?}"),
        };
        fn find_lower(e: &WhereExpr) -> Option<&Literal> {
            match e {
                WhereExpr::And(a, b) => find_lower(a).or_else(|| find_lower(b)),
                WhereExpr::Cmp {
                    op: CompareOp::Gt,
                    value,
                    ..
                } => Some(value),
                _ => None,
            }
        }
        let lower = find_lower(select.predicate.as_ref().expect("where")).expect("lower bound");
        assert_eq!(lower, &Literal::Integer(-5));
    }
}
