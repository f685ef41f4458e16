//! The query assembler: one statement per request, with a single
//! degrade-and-delegate edge on execution failure.
//!
//! Happy path: PLAN → PROJECT → PREDICATE → ORDER/PAGE → EXECUTE →
//! ASSEMBLE. Any execution failure recomputes every expression field in
//! subquery mode into a call-local override map and delegates the original
//! request to the base provider — shared metadata is never touched.

use std::sync::Arc;

use compact_str::CompactString;
use serde_json::Value as Json;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::fallback;
use crate::filter::{self, Filter};
use crate::hydrate;
use crate::plan::{Include, JoinPlanner, JoinTree, RelPath, ROOT_ALIAS};
use crate::provider::{BaseProvider, Executor, Record};
use crate::resolve::{ExprOverrides, ResolveCtx, Resolved, resolve_field};
use crate::schema::{EntityDef, Schema, TableSource};
use crate::sql::Sql;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: CompactString,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<CompactString>) -> Self {
        SortKey {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<CompactString>) -> Self {
        SortKey {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// One read request. `page` is 1-based and only meaningful with `limit`.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub filter: Option<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    pub page: Option<u64>,
    pub includes: Vec<Include>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }
}

/// The join-compiling query layer over an execution engine and a plain base
/// provider. Cheap to share; every invocation is an independent pipeline
/// over the read-only schema.
pub struct QueryEngine<E, B> {
    schema: Arc<Schema>,
    dialect: Dialect,
    executor: E,
    base: B,
}

impl<E: Executor, B: BaseProvider> QueryEngine<E, B> {
    pub fn new(schema: Arc<Schema>, dialect: Dialect, executor: E, base: B) -> Self {
        QueryEngine {
            schema,
            dialect,
            executor,
            base,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Runs a read request. With no includes nothing needs joining: the
    /// request passes straight through to the base provider, expression
    /// fields pre-resolved as self-contained subqueries.
    pub async fn find(&self, entity_name: &str, request: &QueryRequest) -> Result<Vec<Json>> {
        let entity = self.schema.entity(entity_name)?.clone();

        if request.includes.is_empty() {
            let overrides = self.degraded_overrides(&entity);
            return self.base.find(entity_name, request, &overrides).await;
        }

        let planner = JoinPlanner::new(&self.schema, self.dialect);
        let tree = planner.plan(&entity, &request.includes);
        if tree.is_empty() {
            let overrides = self.degraded_overrides(&entity);
            return self.base.find(entity_name, request, &overrides).await;
        }

        let statement = self.build_select(&entity, &tree, request)?;
        let text = self.dialect.finalize_placeholders(&statement.text);
        tracing::debug!(sql = %text, params = statement.params.len(), "trellis.query");

        match self.executor.query(&text, &statement.params).await {
            Ok(rows) => hydrate::assemble(&entity, &tree, rows),
            Err(err) => {
                tracing::warn!(entity = %entity_name, error = %err, "trellis.query.degraded");
                let overrides = self.degraded_overrides(&entity);
                self.base.find(entity_name, request, &overrides).await
            }
        }
    }

    /// Fetches one record by primary key through the plain path.
    pub async fn find_by_id(&self, entity_name: &str, id: Json) -> Result<Option<Json>> {
        let entity = self.schema.entity(entity_name)?.clone();
        let request = QueryRequest::new()
            .filter(Filter::eq(entity.id_field.clone(), id))
            .limit(1);
        Ok(self.find(entity_name, &request).await?.into_iter().next())
    }

    /// Counts matching rows. Follows the same plan/predicate/execute/degrade
    /// shape as `find`, terminating in a scalar.
    pub async fn count(&self, entity_name: &str, filter: Option<&Filter>) -> Result<u64> {
        let entity = self.schema.entity(entity_name)?.clone();

        let planner = JoinPlanner::new(&self.schema, self.dialect);
        let tree = planner.plan(&entity, &[]);
        if tree.is_empty() {
            let overrides = self.degraded_overrides(&entity);
            return self.base.count(entity_name, filter, &overrides).await;
        }

        let empty = ExprOverrides::default();
        let ctx = self.root_ctx(&entity, Some(&tree), &empty);

        let mut statement = Sql::raw("SELECT COUNT(*) FROM ");
        statement.push(&self.from_clause(&entity, &tree));
        if let Some(filter) = filter
            && let Some(predicate) = filter::translate(filter, &ctx)?
        {
            statement.push(" WHERE ");
            statement = statement.append(predicate);
        }

        let text = self.dialect.finalize_placeholders(&statement.text);
        tracing::debug!(sql = %text, params = statement.params.len(), "trellis.count");

        match self.executor.query(&text, &statement.params).await {
            Ok(rows) => Ok(scalar_u64(&rows)),
            Err(err) => {
                tracing::warn!(entity = %entity_name, error = %err, "trellis.count.degraded");
                let overrides = self.degraded_overrides(&entity);
                self.base.count(entity_name, filter, &overrides).await
            }
        }
    }

    /// Inserts one record through the base provider. A keyed insert rejected
    /// by active triggers is re-issued through the documented fallback; any
    /// other failure propagates unchanged.
    pub async fn insert(&self, entity_name: &str, data: &Record) -> Result<Json> {
        let entity = self.schema.entity(entity_name)?.clone();
        let overrides = self.degraded_overrides(&entity);
        match self.base.insert(entity_name, data, &overrides).await {
            Ok(created) => Ok(created),
            Err(err) if self.dialect.is_trigger_conflict(&err.to_string()) => {
                tracing::warn!(entity = %entity_name, "trellis.insert.trigger_fallback");
                fallback::insert_without_keyed_output(&self.executor, self.dialect, &entity, data)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn update(
        &self,
        entity_name: &str,
        filter: Option<&Filter>,
        data: &Record,
    ) -> Result<u64> {
        let entity = self.schema.entity(entity_name)?.clone();
        let overrides = self.degraded_overrides(&entity);
        self.base.update(entity_name, filter, data, &overrides).await
    }

    pub async fn delete(&self, entity_name: &str, filter: Option<&Filter>) -> Result<u64> {
        let entity = self.schema.entity(entity_name)?.clone();
        let overrides = self.degraded_overrides(&entity);
        self.base.delete(entity_name, filter, &overrides).await
    }

    // -------------------------------------------------------------------------
    // Statement assembly
    // -------------------------------------------------------------------------

    fn root_ctx<'c>(
        &'c self,
        entity: &'c Arc<EntityDef>,
        tree: Option<&'c JoinTree>,
        overrides: &'c ExprOverrides,
    ) -> ResolveCtx<'c> {
        ResolveCtx {
            schema: &self.schema,
            dialect: self.dialect,
            entity,
            tree,
            alias: ROOT_ALIAS,
            base_path: RelPath::new(),
            overrides,
        }
    }

    fn build_select(
        &self,
        entity: &Arc<EntityDef>,
        tree: &JoinTree,
        request: &QueryRequest,
    ) -> Result<Sql> {
        let empty = ExprOverrides::default();
        let ctx = self.root_ctx(entity, Some(tree), &empty);

        let mut statement = Sql::raw("SELECT ");
        let mut first = true;
        let mut push_item = |statement: &mut Sql, item: String| {
            if !first {
                statement.push(", ");
            }
            first = false;
            statement.push(&item);
        };

        // Root columns first, expression and computed projections resolved
        // against the now-known join tree.
        for field in &entity.fields {
            let resolved = resolve_field(&ctx, field);
            let Some(sql) = resolved.sql() else {
                continue;
            };
            push_item(
                &mut statement,
                format!("{sql} AS {}", self.dialect.quote(&field.key)),
            );
        }

        // Joined-relation columns, prefixed by the node alias.
        for node in tree.nodes() {
            for key in &node.selected {
                let Some(field) = node.target.field_def(key) else {
                    continue;
                };
                push_item(
                    &mut statement,
                    format!(
                        "{} AS {}",
                        self.dialect.qualify(&node.alias, &field.column),
                        self.dialect.quote(&format!("{}#{}", node.alias, key)),
                    ),
                );
            }
            for key in &node.deferred {
                let Some(field) = node.target.field_def(key) else {
                    continue;
                };
                let node_ctx = ResolveCtx {
                    schema: &self.schema,
                    dialect: self.dialect,
                    entity: &node.target,
                    tree: Some(tree),
                    alias: &node.alias,
                    base_path: node.path.clone(),
                    overrides: &empty,
                };
                let Some(sql) = resolve_field(&node_ctx, field).sql().map(|s| s.into_owned())
                else {
                    continue;
                };
                push_item(
                    &mut statement,
                    format!(
                        "{sql} AS {}",
                        self.dialect.quote(&format!("{}#{}", node.alias, key)),
                    ),
                );
            }
        }

        statement.push(" FROM ");
        statement.push(&self.from_clause(entity, tree));

        if let Some(filter) = &request.filter
            && let Some(predicate) = filter::translate(filter, &ctx)?
        {
            statement.push(" WHERE ");
            statement = statement.append(predicate);
        }

        statement.push(" ORDER BY ");
        statement.push(&self.order_clause(entity, &ctx, &request.sort));

        let offset = match (request.page, request.limit) {
            (Some(page), Some(limit)) if page > 1 => (page - 1) * limit,
            _ => 0,
        };
        statement.push(&self.dialect.pagination(request.limit, offset));

        Ok(statement)
    }

    fn from_clause(&self, entity: &EntityDef, tree: &JoinTree) -> String {
        let root_expr = match &entity.source {
            TableSource::Table(name) => self.dialect.quote(name),
            TableSource::Subquery(text) => crate::plan::normalize_subquery(text, self.dialect),
        };
        let mut from = format!("{root_expr} AS {}", self.dialect.quote(ROOT_ALIAS));
        for node in tree.nodes() {
            from.push_str(&format!(
                " LEFT JOIN {} AS {} ON {} = {}",
                node.table_expr,
                self.dialect.quote(&node.alias),
                self.dialect.qualify(&node.alias, &node.id_column),
                self.dialect.qualify(&node.parent_alias, &node.fk_column),
            ));
        }
        from
    }

    /// Resolves sort keys like projections; an unresolvable key falls back
    /// to a direct column reference on the root alias. With no explicit sort
    /// a deterministic primary-key sort keeps pagination stable.
    fn order_clause(&self, entity: &EntityDef, ctx: &ResolveCtx<'_>, sort: &[SortKey]) -> String {
        if sort.is_empty() {
            let id_column = entity.id_column().unwrap_or(entity.id_field.as_str());
            return format!("{} ASC", self.dialect.qualify(ROOT_ALIAS, id_column));
        }

        let mut clause = String::new();
        for (i, key) in sort.iter().enumerate() {
            if i > 0 {
                clause.push_str(", ");
            }
            let resolved = entity.field_def(&key.field).and_then(|field| {
                match resolve_field(ctx, field) {
                    Resolved::Opaque => None,
                    other => other.sql().map(|s| s.into_owned()),
                }
            });
            let expr = resolved.unwrap_or_else(|| {
                let column = entity
                    .field_def(&key.field)
                    .map(|f| f.column.as_str())
                    .unwrap_or(key.field.as_str());
                self.dialect.qualify(ROOT_ALIAS, column)
            });
            clause.push_str(&expr);
            clause.push_str(key.direction.sql());
        }
        clause
    }

    /// Recomputes every expression and computed field in subquery mode,
    /// ignoring any join context. The result is call-local; shared metadata
    /// is never rewritten.
    fn degraded_overrides(&self, entity: &Arc<EntityDef>) -> ExprOverrides {
        let empty = ExprOverrides::default();
        // the base provider queries the bare table, so correlate against it
        let driving_alias = match &entity.source {
            TableSource::Table(name) => name.to_string(),
            TableSource::Subquery(_) => ROOT_ALIAS.to_string(),
        };
        let ctx = ResolveCtx {
            schema: &self.schema,
            dialect: self.dialect,
            entity,
            tree: None,
            alias: &driving_alias,
            base_path: RelPath::new(),
            overrides: &empty,
        };

        let mut overrides = ExprOverrides::default();
        for field in &entity.fields {
            if field.is_plain() {
                continue;
            }
            match resolve_field(&ctx, field) {
                Resolved::Column(sql) | Resolved::Expr(sql) => {
                    overrides.insert(field.key.clone(), sql);
                }
                Resolved::Null => {
                    overrides.insert(field.key.clone(), "NULL".to_string());
                }
                Resolved::Opaque => {}
            }
        }
        overrides
    }
}

fn scalar_u64(rows: &[crate::provider::Row]) -> u64 {
    match rows.first().and_then(|row| row.first()) {
        Some(Value::Integer(n)) => (*n).max(0) as u64,
        Some(Value::Real(f)) => *f as u64,
        Some(Value::Text(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
