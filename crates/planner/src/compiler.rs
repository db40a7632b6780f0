//! WHERE-clause compilation and quantum-window expansion.
//!
//! Responsibilities:
//! - flatten the AND chain of a validated SELECT's WHERE clause;
//! - extract the inclusive/exclusive time range on the quantum field;
//! - bind every other local-key field to an equality;
//! - type all surviving comparisons against the DDL;
//! - build the startkey/endkey over the full local key and expand the
//!   query into one sub-query per quantum window it crosses.
//!
//! Every rejection carries a structured [`QueryError`] reason; callers do
//! not string-match.

use std::sync::Arc;

use tfq_common::{global_metrics, QueryError};
use tfq_storage::scan::{CompareOp, KeyCell, KeyRange, RowFilter};
use tfq_storage::{CellValue, FieldType, Quantum, TableDdl};
use tracing::debug;

use crate::plan::{Literal, Projection, SelectStmt, SubQuery, WhereExpr};

/// Compile one validated SELECT into coverage-ready sub-queries.
///
/// The returned list is in ascending time order; the first sub-query
/// carries the original start inclusivity and the last the original end
/// inclusivity. `max_quanta_span` bounds the expansion.
pub fn compile(
    ddl: &Arc<TableDdl>,
    select: &SelectStmt,
    max_quanta_span: usize,
) -> Result<Vec<SubQuery>, QueryError> {
    match compile_inner(ddl, select, max_quanta_span) {
        Ok(sub_queries) => {
            debug!(
                table = %ddl.name,
                sub_queries = sub_queries.len(),
                "query compiled"
            );
            Ok(sub_queries)
        }
        Err(e) => {
            global_metrics().inc_compile_failures(reason_label(&e));
            Err(e)
        }
    }
}

fn compile_inner(
    ddl: &Arc<TableDdl>,
    select: &SelectStmt,
    max_quanta_span: usize,
) -> Result<Vec<SubQuery>, QueryError> {
    if select.executable {
        return Err(QueryError::AlreadyCompiled);
    }
    if matches!(&select.projection, Projection::Columns(cols) if cols.is_empty()) {
        return Err(QueryError::FullTableScanUnsupported);
    }
    if let Projection::Columns(cols) = &select.projection {
        for col in cols {
            if ddl.field(col).is_none() {
                return Err(QueryError::InvalidQuery(format!(
                    "unknown column '{col}' in projection"
                )));
            }
        }
    }

    let quantum = ddl
        .quantum()
        .map_err(|e| QueryError::InvalidQuery(e.to_string()))?;

    // Step A: flatten the AND chain; OR subtrees stay nested.
    let mut working_set = Vec::new();
    if let Some(predicate) = &select.predicate {
        flatten_conjunction(predicate, &mut working_set);
    }

    // Step B: extract the quantum bounds.
    let (lower, upper, working_set) = extract_time_bounds(&working_set, quantum.field)?;
    let (lower_op, lo) = lower;
    let (upper_op, hi) = upper;
    if lo > hi {
        return Err(QueryError::LowerBoundGtUpper);
    }
    if lo == hi && lower_op == CompareOp::Gt && upper_op == CompareOp::Lt {
        return Err(QueryError::DegenerateRange);
    }

    // Step C: bind every non-quantum local-key field to an equality.
    let (key_bindings, working_set) = bind_key_fields(ddl, quantum.field, working_set)?;

    // Step D: type the residual leaves and reassemble the conjunction.
    let filter = working_set
        .into_iter()
        .map(|leaf| type_filter(ddl, leaf))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .reduce(|a, b| RowFilter::And(Box::new(a), Box::new(b)));

    // Step E: startkey/endkey over the full local key, in local-key order.
    let mut start = Vec::with_capacity(ddl.local_key.len());
    let mut end = Vec::with_capacity(ddl.local_key.len());
    for field in &ddl.local_key {
        if field == quantum.field {
            start.push(time_cell(field, lo));
            end.push(time_cell(field, hi));
        } else {
            let cell = key_bindings
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, cell)| cell.clone())
                .ok_or_else(|| QueryError::MissingKeyField(field.clone()))?;
            let field_type = ddl
                .field_type(field)
                .map_err(|e| QueryError::InvalidQuery(e.to_string()))?;
            start.push(KeyCell {
                field: field.clone(),
                field_type,
                value: cell.clone(),
            });
            end.push(KeyCell {
                field: field.clone(),
                field_type,
                value: cell,
            });
        }
    }
    let range = KeyRange {
        start,
        end,
        start_inclusive: lower_op == CompareOp::GtEq,
        end_inclusive: upper_op == CompareOp::LtEq,
    };

    // Step F: expand on quantum boundaries.
    expand_windows(ddl, select, quantum, range, filter, lo, hi, max_quanta_span)
}

fn flatten_conjunction<'a>(expr: &'a WhereExpr, out: &mut Vec<&'a WhereExpr>) {
    match expr {
        WhereExpr::And(a, b) => {
            flatten_conjunction(a, out);
            flatten_conjunction(b, out);
        }
        other => out.push(other),
    }
}

type TimeBound = (CompareOp, i64);

// Scan the working set for quantum-field bounds; `=`/`!=` leaves on the
// quantum field stay behind as residual filters.
fn extract_time_bounds<'a>(
    working_set: &[&'a WhereExpr],
    quantum_field: &str,
) -> Result<(TimeBound, TimeBound, Vec<&'a WhereExpr>), QueryError> {
    let mut lower: Option<TimeBound> = None;
    let mut upper: Option<TimeBound> = None;
    let mut rest = Vec::with_capacity(working_set.len());

    for leaf in working_set.iter().copied() {
        match leaf {
            WhereExpr::Cmp { op, field, value } if field == quantum_field => match op {
                CompareOp::Gt | CompareOp::GtEq => {
                    if lower.is_some() {
                        return Err(QueryError::DuplicateLowerBound);
                    }
                    lower = Some((*op, time_value(value)?));
                }
                CompareOp::Lt | CompareOp::LtEq => {
                    if upper.is_some() {
                        return Err(QueryError::DuplicateUpperBound);
                    }
                    upper = Some((*op, time_value(value)?));
                }
                CompareOp::Eq | CompareOp::NotEq => rest.push(leaf),
            },
            WhereExpr::Or(..) if mentions_field(leaf, quantum_field) => {
                return Err(QueryError::TimeBoundsMustUseAnd);
            }
            other => rest.push(other),
        }
    }

    let lower = lower.ok_or(QueryError::NoLowerBound)?;
    let upper = upper.ok_or(QueryError::NoUpperBound)?;
    Ok((lower, upper, rest))
}

fn mentions_field(expr: &WhereExpr, field: &str) -> bool {
    match expr {
        WhereExpr::And(a, b) | WhereExpr::Or(a, b) => {
            mentions_field(a, field) || mentions_field(b, field)
        }
        WhereExpr::Cmp { field: f, .. } => f == field,
    }
}

fn time_value(value: &Literal) -> Result<i64, QueryError> {
    match value {
        Literal::Integer(i) => Ok(*i),
        other => Err(QueryError::InvalidQuery(format!(
            "time bounds must be integer timestamps, got {other:?}"
        ))),
    }
}

// Pull one `=` binding per non-quantum local-key field out of the working
// set; everything left over is residual filter material.
fn bind_key_fields<'a>(
    ddl: &TableDdl,
    quantum_field: &str,
    working_set: Vec<&'a WhereExpr>,
) -> Result<(Vec<(String, CellValue)>, Vec<&'a WhereExpr>), QueryError> {
    let mut bindings = Vec::new();
    let mut rest = working_set;

    for field in ddl.local_key.iter().filter(|f| *f != quantum_field) {
        let mut bound: Option<CellValue> = None;
        for leaf in &rest {
            if let WhereExpr::Cmp { op, field: f, value } = leaf {
                if f != field {
                    continue;
                }
                if *op != CompareOp::Eq {
                    return Err(QueryError::KeyFieldMustUseEquals {
                        field: field.clone(),
                        op: op.as_str().to_string(),
                    });
                }
                if bound.is_none() {
                    let field_type = ddl
                        .field_type(field)
                        .map_err(|e| QueryError::InvalidQuery(e.to_string()))?;
                    bound = Some(coerce_literal(field_type, value, field)?);
                }
            }
        }
        let cell = bound.ok_or_else(|| QueryError::MissingKeyField(field.clone()))?;
        bindings.push((field.clone(), cell));
        rest.retain(|leaf| !matches!(leaf, WhereExpr::Cmp { field: f, .. } if f == field));
    }

    Ok((bindings, rest))
}

fn type_filter(ddl: &TableDdl, expr: &WhereExpr) -> Result<RowFilter, QueryError> {
    match expr {
        WhereExpr::And(a, b) => Ok(RowFilter::And(
            Box::new(type_filter(ddl, a)?),
            Box::new(type_filter(ddl, b)?),
        )),
        WhereExpr::Or(a, b) => Ok(RowFilter::Or(
            Box::new(type_filter(ddl, a)?),
            Box::new(type_filter(ddl, b)?),
        )),
        WhereExpr::Cmp { op, field, value } => {
            let field_type = ddl
                .field_type(field)
                .map_err(|e| QueryError::InvalidQuery(e.to_string()))?;
            Ok(RowFilter::Cmp {
                op: *op,
                field: field.clone(),
                value: coerce_literal(field_type, value, field)?,
            })
        }
    }
}

/// Coerce a SQL literal to the column's declared type. Boolean columns
/// additionally accept the strings "true"/"false" case-insensitively.
pub fn coerce_literal(
    field_type: FieldType,
    value: &Literal,
    field: &str,
) -> Result<CellValue, QueryError> {
    match (field_type, value) {
        (FieldType::Varchar, Literal::Utf8(s)) => Ok(CellValue::Varchar(s.clone())),
        (FieldType::Sint64, Literal::Integer(i)) => Ok(CellValue::Sint64(*i)),
        (FieldType::Timestamp, Literal::Integer(i)) => Ok(CellValue::Timestamp(*i)),
        (FieldType::Double, Literal::Float(f)) => Ok(CellValue::Double(*f)),
        (FieldType::Double, Literal::Integer(i)) => Ok(CellValue::Double(*i as f64)),
        (FieldType::Boolean, Literal::Boolean(b)) => Ok(CellValue::Boolean(*b)),
        (FieldType::Boolean, Literal::Utf8(s)) if s.eq_ignore_ascii_case("true") => {
            Ok(CellValue::Boolean(true))
        }
        (FieldType::Boolean, Literal::Utf8(s)) if s.eq_ignore_ascii_case("false") => {
            Ok(CellValue::Boolean(false))
        }
        _ => Err(QueryError::InvalidQuery(format!(
            "literal {value:?} does not fit column '{field}' of type {}",
            field_type.as_str()
        ))),
    }
}

fn time_cell(field: &str, ts: i64) -> KeyCell {
    KeyCell {
        field: field.to_string(),
        field_type: FieldType::Timestamp,
        value: CellValue::Timestamp(ts),
    }
}

#[allow(clippy::too_many_arguments)]
fn expand_windows(
    ddl: &Arc<TableDdl>,
    select: &SelectStmt,
    quantum: Quantum<'_>,
    range: KeyRange,
    filter: Option<RowFilter>,
    lo: i64,
    hi: i64,
    max_quanta_span: usize,
) -> Result<Vec<SubQuery>, QueryError> {
    let boundaries = quantum.boundaries_between(lo, hi);
    let windows = 1 + boundaries.len();
    if windows > max_quanta_span {
        return Err(QueryError::TooManySubQueries(windows));
    }

    let select = SelectStmt {
        executable: true,
        ..select.clone()
    };

    if windows == 1 {
        return Ok(vec![SubQuery {
            select,
            ddl: Arc::clone(ddl),
            range,
            filter,
        }]);
    }

    let mut out = Vec::with_capacity(windows);
    for i in 0..windows {
        let window_lo = if i == 0 { lo } else { boundaries[i - 1] };
        let window_hi = if i == windows - 1 { hi } else { boundaries[i] };
        let mut window = range.clone();
        set_time_cell(&mut window.start, quantum.field, window_lo);
        set_time_cell(&mut window.end, quantum.field, window_hi);
        // Interior windows take the defaults; only the edges keep the
        // original flags.
        window.start_inclusive = if i == 0 { range.start_inclusive } else { true };
        window.end_inclusive = if i == windows - 1 {
            range.end_inclusive
        } else {
            false
        };
        out.push(SubQuery {
            select: select.clone(),
            ddl: Arc::clone(ddl),
            range: window,
            filter: filter.clone(),
        });
    }
    Ok(out)
}

fn set_time_cell(cells: &mut [KeyCell], field: &str, ts: i64) {
    if let Some(cell) = cells.iter_mut().find(|c| c.field == field) {
        cell.value = CellValue::Timestamp(ts);
    }
}

fn reason_label(e: &QueryError) -> &'static str {
    match e {
        QueryError::AlreadyCompiled => "already_compiled",
        QueryError::FullTableScanUnsupported => "full_table_scan_unsupported",
        QueryError::NoLowerBound => "no_lower_bound",
        QueryError::NoUpperBound => "no_upper_bound",
        QueryError::DuplicateLowerBound => "duplicate_lower_bound",
        QueryError::DuplicateUpperBound => "duplicate_upper_bound",
        QueryError::LowerBoundGtUpper => "lower_bound_gt_upper",
        QueryError::DegenerateRange => "degenerate_range",
        QueryError::TimeBoundsMustUseAnd => "time_bounds_must_use_and",
        QueryError::MissingKeyField(_) => "missing_key_field",
        QueryError::KeyFieldMustUseEquals { .. } => "key_field_must_use_equals",
        QueryError::TooManySubQueries(_) => "too_many_subqueries",
        _ => "invalid_query",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::compile;
    use crate::frontend::sql_to_plan;
    use crate::plan::{SelectStmt, SqlStatement, SubQuery};
    use tfq_common::QueryError;
    use tfq_storage::scan::{CompareOp, RowFilter};
    use tfq_storage::{CellValue, FieldDef, FieldType, KeyComponent, QuantumUnit, TableDdl};

    fn geo_checkin() -> Arc<TableDdl> {
        Arc::new(TableDdl {
            name: "GeoCheckin".to_string(),
            fields: vec![
                FieldDef {
                    name: "location".to_string(),
                    field_type: FieldType::Varchar,
                    nullable: false,
                },
                FieldDef {
                    name: "user".to_string(),
                    field_type: FieldType::Varchar,
                    nullable: false,
                },
                FieldDef {
                    name: "time".to_string(),
                    field_type: FieldType::Timestamp,
                    nullable: false,
                },
                FieldDef {
                    name: "weather".to_string(),
                    field_type: FieldType::Varchar,
                    nullable: true,
                },
                FieldDef {
                    name: "is_cloudy".to_string(),
                    field_type: FieldType::Boolean,
                    nullable: true,
                },
            ],
            partition_key: vec![
                KeyComponent::Param {
                    field: "location".to_string(),
                },
                KeyComponent::Param {
                    field: "user".to_string(),
                },
                KeyComponent::Quantum {
                    field: "time".to_string(),
                    every: 15,
                    unit: QuantumUnit::Second,
                },
            ],
            local_key: vec![
                "location".to_string(),
                "user".to_string(),
                "time".to_string(),
            ],
        })
    }

    fn select(sql: &str) -> SelectStmt {
        match sql_to_plan(sql).expect("lower sql") {
            SqlStatement::Select(s) => s,
            other => panic!("expected select, got {other:?}"),
        }
    }

    fn compile_sql(sql: &str) -> Result<Vec<SubQuery>, QueryError> {
        compile(&geo_checkin(), &select(sql), 5_000)
    }

    fn time_bounds(sub: &SubQuery) -> (i64, i64) {
        let lo = sub.range.start.last().expect("time cell");
        let hi = sub.range.end.last().expect("time cell");
        match (&lo.value, &hi.value) {
            (CellValue::Timestamp(a), CellValue::Timestamp(b)) => (*a, *b),
            other => panic!("expected timestamps, got {other:?}"),
        }
    }

    #[test]
    fn single_quantum_query_reproduces_bounds() {
        let subs = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 3000 AND time < 5000 \
             AND user = 'user_1' AND location = 'San Francisco'",
        )
        .expect("compile");
        assert_eq!(subs.len(), 1);
        let sub = &subs[0];
        assert!(sub.select.executable);

        let fields: Vec<&str> = sub.range.start.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["location", "user", "time"]);
        assert_eq!(
            sub.range.start[0].value,
            CellValue::Varchar("San Francisco".to_string())
        );
        assert_eq!(
            sub.range.start[1].value,
            CellValue::Varchar("user_1".to_string())
        );
        assert_eq!(time_bounds(sub), (3_000, 5_000));
        // `>` lower bound is exclusive; default end stays exclusive.
        assert!(!sub.range.start_inclusive);
        assert!(!sub.range.end_inclusive);
        assert!(sub.filter.is_none());
    }

    #[test]
    fn multi_quantum_query_partitions_the_range() {
        let subs = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time >= 3000 AND time < 31000 \
             AND user = 'user_1' AND location = 'SF'",
        )
        .expect("compile");
        assert_eq!(subs.len(), 3);
        assert_eq!(time_bounds(&subs[0]), (3_000, 15_000));
        assert_eq!(time_bounds(&subs[1]), (15_000, 30_000));
        assert_eq!(time_bounds(&subs[2]), (30_000, 31_000));
        // Only the first window keeps the original start flag; interior
        // windows run start-inclusive/end-exclusive.
        assert!(subs[0].range.start_inclusive);
        for sub in &subs {
            assert!(!sub.range.end_inclusive);
        }
        assert!(subs[1].range.start_inclusive);
        assert!(subs[2].range.start_inclusive);
    }

    #[test]
    fn inclusive_upper_bound_lands_on_last_window_only() {
        let subs = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 3000 AND time <= 31000 \
             AND user = 'u' AND location = 'l'",
        )
        .expect("compile");
        assert_eq!(subs.len(), 3);
        assert!(!subs[0].range.start_inclusive);
        assert!(!subs[0].range.end_inclusive);
        // The `>` override stays on the first window only; interior and
        // last windows fall back to the inclusive-start default.
        assert!(subs[1].range.start_inclusive);
        assert!(subs[2].range.start_inclusive);
        assert!(!subs[1].range.end_inclusive);
        assert!(subs[2].range.end_inclusive);
    }

    #[test]
    fn degenerate_range_is_rejected() {
        let err = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 5000 AND time < 5000 AND user = 'u' AND location = 'l'",
        )
        .expect_err("degenerate");
        assert_eq!(err, QueryError::DegenerateRange);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 6000 AND time < 5000 AND user = 'u' AND location = 'l'",
        )
        .expect_err("inverted");
        assert_eq!(err, QueryError::LowerBoundGtUpper);
    }

    #[test]
    fn missing_key_field_is_rejected() {
        let err = compile_sql(
            "SELECT weather FROM GeoCheckin WHERE time > 1 AND time < 6 AND user = '2'",
        )
        .expect_err("missing location");
        assert_eq!(err, QueryError::MissingKeyField("location".to_string()));
    }

    #[test]
    fn non_equality_key_binding_is_rejected() {
        let err = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 1 AND time < 6 AND user = '2' AND location != '4'",
        )
        .expect_err("location under !=");
        assert_eq!(
            err,
            QueryError::KeyFieldMustUseEquals {
                field: "location".to_string(),
                op: "!=".to_string(),
            }
        );
    }

    #[test]
    fn quantum_field_under_or_is_rejected() {
        let err = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 1 AND time < 6 AND user = 'u' AND location = 'l' \
             AND (time = 3 OR weather = 'hail')",
        )
        .expect_err("time under or");
        assert_eq!(err, QueryError::TimeBoundsMustUseAnd);
    }

    #[test]
    fn missing_bounds_are_rejected() {
        let err =
            compile_sql("SELECT weather FROM GeoCheckin WHERE time < 6 AND user = 'u' AND location = 'l'")
                .expect_err("no lower");
        assert_eq!(err, QueryError::NoLowerBound);

        let err =
            compile_sql("SELECT weather FROM GeoCheckin WHERE time > 1 AND user = 'u' AND location = 'l'")
                .expect_err("no upper");
        assert_eq!(err, QueryError::NoUpperBound);
    }

    #[test]
    fn duplicate_bounds_are_rejected() {
        let err = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 1 AND time >= 2 AND time < 6 AND user = 'u' AND location = 'l'",
        )
        .expect_err("two lowers");
        assert_eq!(err, QueryError::DuplicateLowerBound);

        let err = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 1 AND time < 6 AND time <= 7 AND user = 'u' AND location = 'l'",
        )
        .expect_err("two uppers");
        assert_eq!(err, QueryError::DuplicateUpperBound);
    }

    #[test]
    fn residual_filter_survives_typed() {
        let subs = compile_sql(
            "SELECT * FROM GeoCheckin \
             WHERE time > 1 AND time < 6 AND user = 'u' AND location = 'l' \
             AND weather != 'hail' AND is_cloudy = 'TRUE'",
        )
        .expect("compile");
        assert_eq!(subs.len(), 1);
        let filter = subs[0].filter.as_ref().expect("residual filter");
        // Boolean literals are accepted case-insensitively as strings.
        fn assert_cloudy(filter: &RowFilter) -> bool {
            match filter {
                RowFilter::And(a, b) => assert_cloudy(a) || assert_cloudy(b),
                RowFilter::Cmp { op, field, value } if field == "is_cloudy" => {
                    assert_eq!(*op, CompareOp::Eq);
                    assert_eq!(value, &CellValue::Boolean(true));
                    true
                }
                _ => false,
            }
        }
        assert!(assert_cloudy(filter), "typed is_cloudy binding expected");
    }

    #[test]
    fn equality_on_quantum_field_stays_residual() {
        let subs = compile_sql(
            "SELECT * FROM GeoCheckin \
             WHERE time > 1 AND time < 60000 AND time != 30 \
             AND user = 'u' AND location = 'l'",
        )
        .expect("compile");
        let filter = subs[0].filter.as_ref().expect("residual filter");
        match filter {
            RowFilter::Cmp { op, field, value } => {
                assert_eq!(*op, CompareOp::NotEq);
                assert_eq!(field, "time");
                assert_eq!(value, &CellValue::Timestamp(30));
            }
            other => panic!("expected bare comparison, got {other:?}"),
        }
    }

    #[test]
    fn span_above_the_quanta_cap_is_rejected() {
        let err = compile(
            &geo_checkin(),
            &select(
                "SELECT weather FROM GeoCheckin \
                 WHERE time >= 0 AND time < 60000 AND user = 'u' AND location = 'l'",
            ),
            3,
        )
        .expect_err("four windows over a cap of three");
        assert_eq!(err, QueryError::TooManySubQueries(4));
    }

    #[test]
    fn compiling_twice_is_rejected() {
        let subs = compile_sql(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 1 AND time < 6 AND user = 'u' AND location = 'l'",
        )
        .expect("compile");
        let err = compile(&geo_checkin(), &subs[0].select, 5_000).expect_err("already compiled");
        assert_eq!(err, QueryError::AlreadyCompiled);
    }

    #[test]
    fn empty_projection_is_a_full_table_scan() {
        let mut stmt = select(
            "SELECT weather FROM GeoCheckin \
             WHERE time > 1 AND time < 6 AND user = 'u' AND location = 'l'",
        );
        stmt.projection = crate::plan::Projection::Columns(vec![]);
        let err = compile(&geo_checkin(), &stmt, 5_000).expect_err("empty projection");
        assert_eq!(err, QueryError::FullTableScanUnsupported);
    }
}
