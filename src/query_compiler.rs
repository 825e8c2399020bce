//! Search query compiler: turns a [`FilterRequest`] into parameterized SQL using sea-query.
//!
//! User supplied values never reach the query text. Every value is emitted as a
//! named `@placeholder` whose value lives in [`QueryDescriptor::parameters`].

use crate::catalog::QueryCatalog;
use crate::filter::{FilterRequest, StationFilter, StationStatus};
use crate::range::normalize_range;
use chrono::{DateTime, TimeZone, Utc};
use sea_query::{
    Asterisk, BinOper, Condition, Expr, Iden, IntoCondition, Order, PostgresQueryBuilder, Query,
    QueryStatementWriter, SimpleExpr,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::debug;

pub const DEFAULT_LIMIT: i64 = 100;
pub const MIN_LIMIT: i64 = 1;
pub const MAX_LIMIT: i64 = 500;

/// Prefix of every named placeholder in the emitted query text
pub const PLACEHOLDER_PREFIX: char = '@';

const START_TIME_COLUMN: &str = "StartTime";
const SN_COLUMN: &str = "SN";
const ORDER_NAME_COLUMN: &str = "OrderName";

/// Identifier wrapper for schema, table and column names
#[derive(Debug, Clone)]
pub struct Ident(pub String);

impl Iden for Ident {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

/// A value bound to a named placeholder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i32),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Query text plus the parameters it references
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub query_text: String,
    pub parameters: BTreeMap<String, ParamValue>,
}

/// Predicates collected so far, each paired with the parameters it introduced
#[derive(Debug, Default)]
struct Fragments {
    conditions: Vec<Condition>,
    parameters: BTreeMap<String, ParamValue>,
}

impl Fragments {
    fn push<C, I>(&mut self, condition: C, params: I)
    where
        C: IntoCondition,
        I: IntoIterator<Item = (String, ParamValue)>,
    {
        self.conditions.push(condition.into_condition());
        for (name, value) in params {
            let previous = self.parameters.insert(name, value);
            debug_assert!(previous.is_none(), "placeholder emitted twice");
        }
    }
}

/// Compiles filter requests against a fixed [`QueryCatalog`]
#[derive(Debug, Clone, Default)]
pub struct SearchQueryCompiler {
    catalog: QueryCatalog,
}

impl SearchQueryCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Compile a search request into a descriptor ready for parameterized execution.
    ///
    /// Never fails: unknown range keys, stations and statuses are dropped, blank text
    /// filters are ignored and the limit is clamped to `[MIN_LIMIT, MAX_LIMIT]`.
    pub fn build_search_query<Tz: TimeZone>(
        &self,
        request: &FilterRequest,
        now: &DateTime<Tz>,
    ) -> QueryDescriptor {
        let mut fragments = Fragments::default();

        self.compile_time_bounds(request, now, &mut fragments);
        compile_text_filter(SN_COLUMN, "sn", request.sn.as_deref(), &mut fragments);
        compile_text_filter(
            ORDER_NAME_COLUMN,
            "orderName",
            request.order_name.as_deref(),
            &mut fragments,
        );
        for (index, filter) in request.station_filters.iter().enumerate() {
            self.compile_station_filter(index, filter, &mut fragments);
        }

        let limit = clamp_limit(request.limit);
        let mut select = Query::select();
        select.column(Asterisk);
        match self.resolve_relation(request) {
            (Some(schema), table) => select.from((Ident(schema), Ident(table))),
            (None, table) => select.from(Ident(table)),
        };
        if !fragments.conditions.is_empty() {
            let combined = combine_conditions_with_and(fragments.conditions);
            select.cond_where(combined);
        }
        select.order_by(Ident(START_TIME_COLUMN.to_string()), Order::Desc);

        // sea-query has no SQL Server backend; splice the row limit in as TOP (n)
        let rendered = select.to_string(PostgresQueryBuilder);
        let body = rendered.strip_prefix("SELECT ").unwrap_or(&rendered);
        let query_text = format!("SELECT TOP ({}) {}", limit, body);

        debug!(
            limit,
            parameters = fragments.parameters.len(),
            "compiled search query"
        );

        QueryDescriptor {
            query_text,
            parameters: fragments.parameters,
        }
    }

    /// Explicit bounds win; each missing bound falls back to the preset independently
    fn compile_time_bounds<Tz: TimeZone>(
        &self,
        request: &FilterRequest,
        now: &DateTime<Tz>,
        fragments: &mut Fragments,
    ) {
        let preset = normalize_range(&self.catalog, request.range_key.as_deref(), now);
        let start = request.start_time.or(preset.start_time);
        let stop = request.stop_time.or(preset.stop_time);

        if let Some(start) = start {
            fragments.push(
                column(START_TIME_COLUMN).gte(placeholder("startTime")),
                [("startTime".to_string(), ParamValue::Timestamp(start))],
            );
        }
        if let Some(stop) = stop {
            fragments.push(
                column(START_TIME_COLUMN).lte(placeholder("stopTime")),
                [("stopTime".to_string(), ParamValue::Timestamp(stop))],
            );
        }
    }

    /// `(<KEY>Result IN (@station_i_0, ...) OR <KEY>Result IS NULL)`
    ///
    /// Records whose station has not run yet (NULL) still match a status filter.
    fn compile_station_filter(&self, index: usize, filter: &StationFilter, fragments: &mut Fragments) {
        let Some(station) = filter.key.as_deref().and_then(|key| self.catalog.station(key)) else {
            return;
        };

        let mut statuses: Vec<StationStatus> = Vec::new();
        for status in filter.status_tokens().filter_map(StationStatus::parse) {
            if !statuses.contains(&status) {
                statuses.push(status);
            }
        }
        if statuses.is_empty() {
            return;
        }

        let params: Vec<(String, ParamValue)> = statuses
            .iter()
            .enumerate()
            .map(|(status_index, status)| {
                (
                    format!("station_{}_{}", index, status_index),
                    ParamValue::Int(status.code()),
                )
            })
            .collect();

        let result_column = station.result_column();
        let in_codes = column(&result_column).is_in(params.iter().map(|(name, _)| placeholder(name)));
        let condition = Condition::any()
            .add(in_codes)
            .add(column(&result_column).is_null());

        fragments.push(condition, params);
    }

    /// Request overrides win over the catalog defaults; a blank schema means table only
    fn resolve_relation(&self, request: &FilterRequest) -> (Option<String>, String) {
        let schema = request
            .table_schema
            .as_deref()
            .unwrap_or(&self.catalog.schema)
            .trim();
        let table = request
            .table_name
            .as_deref()
            .map(str::trim)
            .filter(|table| !table.is_empty())
            .unwrap_or_else(|| self.catalog.table.trim());

        let schema = (!schema.is_empty()).then(|| schema.to_string());
        (schema, table.to_string())
    }
}

/// `<column> LIKE @name` bound to `%value%`, skipped when the value is blank
fn compile_text_filter(column_name: &str, name: &str, value: Option<&str>, fragments: &mut Fragments) {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return;
    };

    let like = SimpleExpr::Binary(
        Box::new(column(column_name).into()),
        BinOper::Like,
        Box::new(placeholder(name)),
    );
    fragments.push(like, [(name.to_string(), ParamValue::Text(format!("%{}%", value)))]);
}

/// Clamp a requested row count to `[MIN_LIMIT, MAX_LIMIT]`, defaulting when absent
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Names of all `@placeholders` in `query_text`, in textual order
pub fn placeholders(query_text: &str) -> Vec<&str> {
    placeholder_spans(query_text)
        .into_iter()
        .map(|(_, name)| name)
        .collect()
}

/// Byte ranges (prefix included) and names of every `@placeholder` in `query_text`.
///
/// Quoted identifiers (`"..."`) and string literals (`'...'`) are skipped, so an
/// `@` inside a table or column name is never taken for a parameter. Doubled
/// quotes close and reopen the region, which leaves escaped quotes inside it.
pub fn placeholder_spans(query_text: &str) -> Vec<(Range<usize>, &str)> {
    let bytes = query_text.as_bytes();
    let mut spans = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'"' || b == b'\'' => {
                quote = Some(b);
                i += 1;
            }
            None if b == PLACEHOLDER_PREFIX as u8 => {
                let start = i + 1;
                let len = query_text[start..]
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(bytes.len() - start);
                if len > 0 {
                    spans.push((i..start + len, &query_text[start..start + len]));
                }
                i = start + len;
            }
            None => i += 1,
        }
    }
    spans
}

fn column(name: &str) -> Expr {
    Expr::col(Ident(name.to_string()))
}

fn placeholder(name: &str) -> SimpleExpr {
    SimpleExpr::Custom(format!("{}{}", PLACEHOLDER_PREFIX, name))
}

/// Combine multiple conditions with AND
fn combine_conditions_with_and(conditions: Vec<Condition>) -> Condition {
    conditions
        .into_iter()
        .fold(Condition::all(), |acc, condition| acc.add(condition))
}
