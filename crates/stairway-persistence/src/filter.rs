//! C4 — filter & enumeration. Compiles a predicate tree plus a pagination
//! mode into a deterministic SQL string with a positional bound-parameter
//! list, following the raw-`sql_query`-with-`bind()` idiom the teacher
//! already uses for the branch-metadata insert
//! (`chem-persistence/src/pg/mod.rs`'s `BranchCreated` handling) rather than
//! diesel's statically-typed query builder, since the shape of the WHERE
//! clause is only known at runtime here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stairway_core::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightColumn {
    SubmitTime,
    CompletedTime,
    ClassName,
    Status,
    FlightId,
}

impl FlightColumn {
    fn sql_name(self) -> &'static str {
        match self {
            FlightColumn::SubmitTime => "submit_time",
            FlightColumn::CompletedTime => "completed_time",
            FlightColumn::ClassName => "class_name",
            FlightColumn::Status => "status",
            FlightColumn::FlightId => "flight_id",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    IsNull,
}

impl Op {
    fn sql_operator(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::In => "IN",
            Op::IsNull => "IS NULL",
        }
    }
}

#[derive(Clone, Debug)]
pub enum FilterValue {
    Text(String),
    TextList(Vec<String>),
    Timestamp(DateTime<Utc>),
}

#[derive(Clone, Debug)]
pub enum Predicate {
    Column { column: FlightColumn, op: Op, value: Option<FilterValue> },
    Input { key: String, op: Op, value: Option<FilterValue> },
}

#[derive(Clone, Debug)]
pub enum Filter {
    Predicate(Predicate),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// A bound parameter, in the order it appears in the compiled SQL's `$n`
/// placeholders.
#[derive(Clone, Debug)]
pub enum BoundParam {
    Text(String),
    TextList(Vec<String>),
    Timestamp(DateTime<Utc>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Opaque page token (§6 "Page token"). Strict comparison against
/// `submit_time`; `<` for Desc, `>` for Asc.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageToken {
    pub v: u32,
    pub t: String, // ISO-8601 instant, serialized verbatim to keep encoding deterministic
}

impl PageToken {
    pub fn new(t: DateTime<Utc>) -> Self {
        Self { v: 1, t: t.to_rfc3339() }
    }

    pub fn encode(&self) -> EngineResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| EngineError::SerializationError(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> EngineResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| EngineError::BadRequest(format!("invalid page token: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::BadRequest(format!("invalid page token: {e}")))
    }
}

/// The two pagination modes are mutually exclusive (§4.4).
#[derive(Clone, Debug)]
pub enum Pagination {
    OffsetLimit { offset: i64, limit: i64 },
    PageToken { token: Option<PageToken>, limit: i64 },
}

pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<BoundParam>,
}

pub struct FlightEnumeration<T> {
    pub total: usize,
    pub next_page_token: Option<String>,
    pub items: Vec<T>,
}

/// Same WHERE-clause compilation as `compile`, without pagination, for the
/// `total` half of a `FlightEnumeration`.
pub fn compile_count(filter: Option<&Filter>) -> CompiledQuery {
    let mut params = Vec::new();
    let where_clause = match filter {
        Some(f) => {
            let mut clause = String::new();
            compile_filter(f, &mut clause, &mut params);
            format!("WHERE {clause}")
        }
        None => String::new(),
    };
    CompiledQuery { sql: format!("SELECT COUNT(*) AS count FROM flight {where_clause}"), params }
}

/// Compile `filter`/`pagination`/`sort` into a deterministic SQL string and
/// bound-parameter list (§4.4, §8 "Filter compilation idempotence").
pub fn compile(filter: Option<&Filter>, pagination: &Pagination, sort: SortDirection) -> EngineResult<CompiledQuery> {
    let mut params = Vec::new();
    let where_clause = match filter {
        Some(f) => {
            let mut clause = String::new();
            compile_filter(f, &mut clause, &mut params);
            format!("WHERE {clause}")
        }
        None => String::new(),
    };

    let mut sql = format!("SELECT * FROM flight {where_clause}");

    if let Pagination::PageToken { token: Some(tok), .. } = pagination {
        let cmp = match sort {
            SortDirection::Asc => ">",
            SortDirection::Desc => "<",
        };
        let joiner = if where_clause.is_empty() { "WHERE" } else { "AND" };
        let ts: DateTime<Utc> = tok
            .t
            .parse()
            .map_err(|e: chrono::ParseError| EngineError::BadRequest(format!("invalid page token timestamp: {e}")))?;
        params.push(BoundParam::Timestamp(ts));
        sql.push_str(&format!(" {joiner} submit_time {cmp} ${}", params.len()));
    }

    let order = match sort {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    sql.push_str(&format!(" ORDER BY submit_time {order}"));

    match pagination {
        Pagination::OffsetLimit { offset, limit } => {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        Pagination::PageToken { limit, .. } => {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
    }

    Ok(CompiledQuery { sql, params })
}

fn compile_filter(filter: &Filter, out: &mut String, params: &mut Vec<BoundParam>) {
    match filter {
        Filter::Predicate(p) => compile_predicate(p, out, params),
        Filter::And(children) => compile_conjunction(children, "AND", out, params),
        Filter::Or(children) => compile_conjunction(children, "OR", out, params),
    }
}

fn compile_conjunction(children: &[Filter], joiner: &str, out: &mut String, params: &mut Vec<BoundParam>) {
    out.push('(');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push_str(&format!(" {joiner} "));
        }
        compile_filter(child, out, params);
    }
    out.push(')');
}

fn compile_predicate(p: &Predicate, out: &mut String, params: &mut Vec<BoundParam>) {
    match p {
        Predicate::Column { column, op, value } => {
            push_predicate(column.sql_name(), *op, value, out, params);
        }
        Predicate::Input { key, op, value } => {
            // Correlated EXISTS clause per input-parameter predicate (§4.4).
            let alias = format!("fi_{}", params.len());
            out.push_str(&format!(
                "EXISTS (SELECT 1 FROM flightinput {alias} WHERE {alias}.flight_id = flight.flight_id AND {alias}.key = '{}' AND ",
                escape_literal(key)
            ));
            push_predicate(&format!("{alias}.value"), *op, value, out, params);
            out.push(')');
        }
    }
}

fn push_predicate(
    column_sql: &str,
    op: Op,
    value: &Option<FilterValue>,
    out: &mut String,
    params: &mut Vec<BoundParam>,
) {
    if op == Op::IsNull {
        out.push_str(&format!("{column_sql} IS NULL"));
        return;
    }
    match value {
        Some(FilterValue::Text(t)) => {
            params.push(BoundParam::Text(t.clone()));
            out.push_str(&format!("{column_sql} {} ${}", op.sql_operator(), params.len()));
        }
        Some(FilterValue::Timestamp(t)) => {
            params.push(BoundParam::Timestamp(*t));
            out.push_str(&format!("{column_sql} {} ${}", op.sql_operator(), params.len()));
        }
        Some(FilterValue::TextList(list)) => {
            params.push(BoundParam::TextList(list.clone()));
            out.push_str(&format!("{column_sql} {} (${})", op.sql_operator(), params.len()));
        }
        None => {
            out.push_str(&format!("{column_sql} {}", op.sql_operator()));
        }
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Substitutes each `$n` placeholder with its escaped SQL literal. Diesel's
/// `sql_query` builder only accepts a statically-known bind chain, which
/// doesn't fit a WHERE clause whose parameter count varies at runtime the
/// way this one does, so the DAO executes the materialized text instead of
/// binding `params` positionally. `compile` above remains the thing tested
/// for determinism; this is purely an execution-time concern.
pub fn materialize(query: &CompiledQuery) -> String {
    let mut sql = query.sql.clone();
    for (i, p) in query.params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let literal = match p {
            BoundParam::Text(t) => format!("'{}'", escape_literal(t)),
            BoundParam::Timestamp(t) => format!("'{}'", t.to_rfc3339()),
            BoundParam::TextList(list) => list
                .iter()
                .map(|t| format!("'{}'", escape_literal(t)))
                .collect::<Vec<_>>()
                .join(","),
        };
        sql = sql.replace(&placeholder, &literal);
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_filter() -> Filter {
        Filter::And(vec![
            Filter::Predicate(Predicate::Column {
                column: FlightColumn::Status,
                op: Op::Eq,
                value: Some(FilterValue::Text("SUCCESS".into())),
            }),
            Filter::Predicate(Predicate::Input {
                key: "filename".into(),
                op: Op::Eq,
                value: Some(FilterValue::Text("/tmp/x.txt".into())),
            }),
        ])
    }

    #[test]
    fn compilation_is_deterministic() {
        let f = sample_filter();
        let p = Pagination::OffsetLimit { offset: 0, limit: 100 };
        let c1 = compile(Some(&f), &p, SortDirection::Desc).unwrap();
        let c2 = compile(Some(&f), &p, SortDirection::Desc).unwrap();
        assert_eq!(c1.sql, c2.sql);
        assert_eq!(c1.params.len(), c2.params.len());
    }

    #[test]
    fn input_predicate_uses_correlated_exists() {
        let f = sample_filter();
        let p = Pagination::OffsetLimit { offset: 0, limit: 10 };
        let c = compile(Some(&f), &p, SortDirection::Asc).unwrap();
        assert!(c.sql.contains("EXISTS (SELECT 1 FROM flightinput"));
    }

    #[test]
    fn page_token_round_trips() {
        let now = Utc::now();
        let tok = PageToken::new(now);
        let encoded = tok.encode().unwrap();
        let decoded = PageToken::decode(&encoded).unwrap();
        assert_eq!(tok, decoded);
    }

    #[test]
    fn offset_and_page_token_pagination_are_distinct_sql() {
        let p1 = Pagination::OffsetLimit { offset: 5, limit: 10 };
        let p2 = Pagination::PageToken { token: None, limit: 10 };
        let c1 = compile(None, &p1, SortDirection::Asc).unwrap();
        let c2 = compile(None, &p2, SortDirection::Asc).unwrap();
        assert!(c1.sql.contains("OFFSET"));
        assert!(!c2.sql.contains("OFFSET"));
    }
}
