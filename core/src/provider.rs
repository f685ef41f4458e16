//! External collaborator interfaces: the SQL execution engine and the plain
//! (non-join) base provider used for pass-through and degraded requests.

use compact_str::CompactString;
use serde_json::{Map, Value as Json};

use crate::error::Result;
use crate::filter::Filter;
use crate::query::QueryRequest;
use crate::resolve::ExprOverrides;
use crate::value::Value;

/// Row-shaped write payload, keyed by field.
pub type Record = Map<String, Json>;

/// One flat result row: aliased column names paired with store values, in
/// select order.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<(CompactString, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<CompactString>, value: Value) {
        self.columns.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// First column, for scalar statements.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

impl<N: Into<CompactString>> FromIterator<(N, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (N, Value)>>(iter: T) -> Self {
        Row {
            columns: iter.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }
}

/// The SQL execution engine. One parameterized statement per call; data
/// values are always positional bindings, never interpolated into the text.
#[allow(async_fn_in_trait)]
pub trait Executor {
    /// Runs a statement returning rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Runs a statement returning an affected-row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;
}

/// The plain per-entity provider: serves requests that need no joins, and
/// every degraded delegate. Expression fields arrive pre-resolved through
/// the call-local override map — the provider never sees a join alias.
#[allow(async_fn_in_trait)]
pub trait BaseProvider {
    async fn find(
        &self,
        entity: &str,
        request: &QueryRequest,
        overrides: &ExprOverrides,
    ) -> Result<Vec<Json>>;

    async fn count(
        &self,
        entity: &str,
        filter: Option<&Filter>,
        overrides: &ExprOverrides,
    ) -> Result<u64>;

    async fn insert(&self, entity: &str, data: &Record, overrides: &ExprOverrides)
    -> Result<Json>;

    async fn update(
        &self,
        entity: &str,
        filter: Option<&Filter>,
        data: &Record,
        overrides: &ExprOverrides,
    ) -> Result<u64>;

    async fn delete(
        &self,
        entity: &str,
        filter: Option<&Filter>,
        overrides: &ExprOverrides,
    ) -> Result<u64>;
}
