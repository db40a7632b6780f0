use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tfq_storage::scan::{CompareOp, KeyRange, RowFilter};
use tfq_storage::TableDdl;

/// Untyped literal as written in the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Utf8(String),
    Boolean(bool),
}

/// WHERE clause tree as lowered from SQL, before typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhereExpr {
    And(Box<WhereExpr>, Box<WhereExpr>),
    Or(Box<WhereExpr>, Box<WhereExpr>),
    Cmp {
        op: CompareOp,
        field: String,
        value: Literal,
    },
}

/// Column projection of a SELECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// `SELECT *`: every stored pair, in stored order.
    All,
    /// Explicit column list.
    Columns(Vec<String>),
}

impl Projection {
    /// Whether a stored field survives this projection.
    pub fn keeps(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::Columns(cols) => cols.iter().any(|c| c == field),
        }
    }
}

/// One SELECT statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStmt {
    pub table: String,
    pub projection: Projection,
    pub predicate: Option<WhereExpr>,
    /// Set by the compiler once the statement has been rewritten into
    /// key/filter form; compiling an executable statement is an error.
    pub executable: bool,
}

/// One DESCRIBE statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeStmt {
    pub table: String,
}

/// One INSERT statement with literal VALUES rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertStmt {
    pub table: String,
    /// Explicit column list; empty means DDL declaration order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

/// Closed sum of statements the layer serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlStatement {
    Select(SelectStmt),
    Describe(DescribeStmt),
    Insert(InsertStmt),
}

/// One executable sub-query covering a single quantum window.
///
/// Sub-queries produced from one SELECT share the projection, DDL handle,
/// and residual filter; only the window's time cells and inclusivity
/// flags differ.
#[derive(Debug, Clone)]
pub struct SubQuery {
    /// The compiled SELECT, `executable` set.
    pub select: SelectStmt,
    /// Table DDL handle (partition key, local key, field typing).
    pub ddl: Arc<TableDdl>,
    /// Local-key range of the window.
    pub range: KeyRange,
    /// Residual filter over non-key fields.
    pub filter: Option<RowFilter>,
}
