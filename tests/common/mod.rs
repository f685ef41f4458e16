//! Shared test harness: a rusqlite-backed executor and a plain per-entity
//! provider implementing the base (non-join) path.

#![allow(dead_code)]

pub mod schema;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value as Json;
use trellis::prelude::*;
use trellis_core::filter::translate;
use trellis_core::hydrate;
use trellis_core::plan::JoinTree;
use trellis_core::resolve::ResolveCtx;

/// Executor over an in-memory SQLite database. `fail_joins` forces an
/// execution failure on any joined statement, to drive the degrade path.
#[derive(Clone)]
pub struct SqliteExecutor {
    conn: Rc<rusqlite::Connection>,
    fail_joins: Rc<Cell<bool>>,
}

impl SqliteExecutor {
    pub fn new(conn: rusqlite::Connection) -> Self {
        SqliteExecutor {
            conn: Rc::new(conn),
            fail_joins: Rc::new(Cell::new(false)),
        }
    }

    pub fn fail_joins(&self, enabled: bool) {
        self.fail_joins.set(enabled);
    }

    pub fn batch(&self, sql: &str) {
        self.conn.execute_batch(sql).expect("batch DDL");
    }

    fn check_forced_failure(&self, sql: &str) -> Result<()> {
        if self.fail_joins.get() && sql.contains(" LEFT JOIN ") {
            return Err(TrellisError::Execution("forced join failure".to_string()));
        }
        Ok(())
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| TrellisError::Execution(e.to_string()))?;
        let names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        let bound: Vec<rusqlite::types::Value> = params.iter().map(to_sqlite).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| TrellisError::Execution(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| TrellisError::Execution(e.to_string()))? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| TrellisError::Execution(e.to_string()))?;
                record.push(name.as_str(), from_sqlite(value));
            }
            out.push(record);
        }
        Ok(out)
    }
}

impl Executor for SqliteExecutor {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check_forced_failure(sql)?;
        self.run_query(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_forced_failure(sql)?;
        let bound: Vec<rusqlite::types::Value> = params.iter().map(to_sqlite).collect();
        self.conn
            .execute(sql, rusqlite::params_from_iter(bound))
            .map(|n| n as u64)
            .map_err(|e| TrellisError::Execution(e.to_string()))
    }
}

fn to_sqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(n) => rusqlite::types::Value::Integer(*n),
        Value::Real(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
    }
}

fn from_sqlite(value: rusqlite::types::ValueRef<'_>) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(n) => Value::Integer(n),
        rusqlite::types::ValueRef::Real(f) => Value::Real(f),
        rusqlite::types::ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
        rusqlite::types::ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// The plain per-entity provider: single-table statements, expression
/// fields only through the override map it is handed.
pub struct TableProvider {
    schema: Arc<Schema>,
    dialect: Dialect,
    exec: SqliteExecutor,
}

impl TableProvider {
    pub fn new(schema: Arc<Schema>, dialect: Dialect, exec: SqliteExecutor) -> Self {
        TableProvider {
            schema,
            dialect,
            exec,
        }
    }

    fn table_of(&self, entity: &EntityDef) -> Result<String> {
        match &entity.source {
            TableSource::Table(name) => Ok(name.to_string()),
            TableSource::Subquery(_) => Err(TrellisError::Query(format!(
                "virtual entity {} has no base table",
                entity.name
            ))),
        }
    }

    fn ctx<'a>(
        &'a self,
        entity: &'a Arc<EntityDef>,
        table: &'a str,
        overrides: &'a ExprOverrides,
    ) -> ResolveCtx<'a> {
        ResolveCtx {
            schema: &self.schema,
            dialect: self.dialect,
            entity,
            tree: None,
            alias: table,
            base_path: RelPath::new(),
            overrides,
        }
    }
}

impl BaseProvider for TableProvider {
    async fn find(
        &self,
        entity_name: &str,
        request: &QueryRequest,
        overrides: &ExprOverrides,
    ) -> Result<Vec<Json>> {
        let entity = self.schema.entity(entity_name)?.clone();
        let table = self.table_of(&entity)?;
        let ctx = self.ctx(&entity, &table, overrides);

        let mut statement = Sql::raw("SELECT ");
        let mut first = true;
        for field in &entity.fields {
            let item = if field.is_plain() {
                format!(
                    "{} AS {}",
                    self.dialect.qualify(&table, &field.column),
                    self.dialect.quote(&field.key)
                )
            } else if let Some(text) = overrides.get(&field.key) {
                format!("{text} AS {}", self.dialect.quote(&field.key))
            } else {
                continue;
            };
            if !first {
                statement.push(", ");
            }
            first = false;
            statement.push(&item);
        }
        statement.push(" FROM ");
        statement.push(&self.dialect.quote(&table));

        if let Some(filter) = &request.filter
            && let Some(predicate) = translate(filter, &ctx)?
        {
            statement.push(" WHERE ");
            statement = statement.append(predicate);
        }

        statement.push(" ORDER BY ");
        if request.sort.is_empty() {
            let id_column = entity.id_column().unwrap_or("id");
            statement.push(&format!("{} ASC", self.dialect.qualify(&table, id_column)));
        } else {
            for (i, key) in request.sort.iter().enumerate() {
                if i > 0 {
                    statement.push(", ");
                }
                let expr = entity
                    .field_def(&key.field)
                    .and_then(|f| trellis_core::resolve::resolve_field(&ctx, f).sql().map(|s| s.into_owned()))
                    .unwrap_or_else(|| self.dialect.qualify(&table, key.field.as_str()));
                statement.push(&expr);
                statement.push(match key.direction {
                    SortDirection::Asc => " ASC",
                    SortDirection::Desc => " DESC",
                });
            }
        }

        let offset = match (request.page, request.limit) {
            (Some(page), Some(limit)) if page > 1 => (page - 1) * limit,
            _ => 0,
        };
        statement.push(&self.dialect.pagination(request.limit, offset));

        let text = self.dialect.finalize_placeholders(&statement.text);
        let rows = self.exec.query(&text, &statement.params).await?;
        hydrate::assemble(&entity, &JoinTree::empty(), rows)
    }

    async fn count(
        &self,
        entity_name: &str,
        filter: Option<&Filter>,
        overrides: &ExprOverrides,
    ) -> Result<u64> {
        let entity = self.schema.entity(entity_name)?.clone();
        let table = self.table_of(&entity)?;
        let ctx = self.ctx(&entity, &table, overrides);

        let mut statement = Sql::raw("SELECT COUNT(*) FROM ");
        statement.push(&self.dialect.quote(&table));
        if let Some(filter) = filter
            && let Some(predicate) = translate(filter, &ctx)?
        {
            statement.push(" WHERE ");
            statement = statement.append(predicate);
        }

        let text = self.dialect.finalize_placeholders(&statement.text);
        let rows = self.exec.query(&text, &statement.params).await?;
        match rows.first().and_then(|r| r.first()) {
            Some(Value::Integer(n)) => Ok((*n).max(0) as u64),
            _ => Ok(0),
        }
    }

    async fn insert(
        &self,
        entity_name: &str,
        data: &Record,
        _overrides: &ExprOverrides,
    ) -> Result<Json> {
        let entity = self.schema.entity(entity_name)?.clone();
        let table = self.table_of(&entity)?;

        let writable: Vec<_> = entity
            .fields
            .iter()
            .filter(|f| f.is_plain() && data.contains_key(f.key.as_str()))
            .collect();
        if writable.is_empty() {
            return Err(TrellisError::Write(format!("empty insert for {entity_name}")));
        }

        let mut statement = Sql::raw(format!("INSERT INTO {} (", self.dialect.quote(&table)));
        for (i, field) in writable.iter().enumerate() {
            if i > 0 {
                statement.push(", ");
            }
            statement.push(&self.dialect.quote(&field.column));
        }
        statement.push(") VALUES (");
        for (i, field) in writable.iter().enumerate() {
            if i > 0 {
                statement.push(", ");
            }
            let stored = (field.codec.to_store)(&data[field.key.as_str()]).map_err(|message| {
                TrellisError::Conversion {
                    entity: entity.name.to_string(),
                    field: field.key.to_string(),
                    message,
                }
            })?;
            statement = statement.bind(stored);
        }
        statement.push(")");

        let text = self.dialect.finalize_placeholders(&statement.text);
        self.exec.execute(&text, &statement.params).await?;

        // re-read by the provided key, or the generated rowid
        let key = match data.get(entity.id_field.as_str()) {
            Some(id) => Value::from_json(id),
            None => {
                let rows = self
                    .exec
                    .query(self.dialect.last_identity_sql(), &[])
                    .await?;
                rows.first()
                    .and_then(|r| r.first())
                    .cloned()
                    .ok_or(TrellisError::IdentityUnavailable)?
            }
        };
        let id_column = entity.id_column().unwrap_or("id");
        let mut select = Sql::raw("SELECT ");
        let mut first = true;
        for field in entity.fields.iter().filter(|f| f.is_plain()) {
            if !first {
                select.push(", ");
            }
            first = false;
            select.push(&format!(
                "{} AS {}",
                self.dialect.quote(&field.column),
                self.dialect.quote(&field.key)
            ));
        }
        select.push(&format!(
            " FROM {} WHERE {} = ",
            self.dialect.quote(&table),
            self.dialect.quote(id_column)
        ));
        let select = select.bind(key);

        let text = self.dialect.finalize_placeholders(&select.text);
        let rows = self.exec.query(&text, &select.params).await?;
        hydrate::assemble(&entity, &JoinTree::empty(), rows)?
            .into_iter()
            .next()
            .ok_or(TrellisError::NotFound)
    }

    async fn update(
        &self,
        entity_name: &str,
        filter: Option<&Filter>,
        data: &Record,
        overrides: &ExprOverrides,
    ) -> Result<u64> {
        let entity = self.schema.entity(entity_name)?.clone();
        let table = self.table_of(&entity)?;
        let ctx = self.ctx(&entity, &table, overrides);

        let writable: Vec<_> = entity
            .fields
            .iter()
            .filter(|f| f.is_plain() && data.contains_key(f.key.as_str()))
            .collect();
        if writable.is_empty() {
            return Ok(0);
        }

        let mut statement = Sql::raw(format!("UPDATE {} SET ", self.dialect.quote(&table)));
        for (i, field) in writable.iter().enumerate() {
            if i > 0 {
                statement.push(", ");
            }
            statement.push(&format!("{} = ", self.dialect.quote(&field.column)));
            let stored = (field.codec.to_store)(&data[field.key.as_str()]).map_err(|message| {
                TrellisError::Conversion {
                    entity: entity.name.to_string(),
                    field: field.key.to_string(),
                    message,
                }
            })?;
            statement = statement.bind(stored);
        }
        if let Some(filter) = filter
            && let Some(predicate) = translate(filter, &ctx)?
        {
            statement.push(" WHERE ");
            statement = statement.append(predicate);
        }

        let text = self.dialect.finalize_placeholders(&statement.text);
        self.exec.execute(&text, &statement.params).await
    }

    async fn delete(
        &self,
        entity_name: &str,
        filter: Option<&Filter>,
        overrides: &ExprOverrides,
    ) -> Result<u64> {
        let entity = self.schema.entity(entity_name)?.clone();
        let table = self.table_of(&entity)?;
        let ctx = self.ctx(&entity, &table, overrides);

        let mut statement = Sql::raw(format!("DELETE FROM {}", self.dialect.quote(&table)));
        if let Some(filter) = filter
            && let Some(predicate) = translate(filter, &ctx)?
        {
            statement.push(" WHERE ");
            statement = statement.append(predicate);
        }

        let text = self.dialect.finalize_placeholders(&statement.text);
        self.exec.execute(&text, &statement.params).await
    }
}

/// Builds an engine over a fresh in-memory database with the given schema
/// and DDL. Returns the executor too, so tests can force failures or inspect
/// state directly.
pub fn engine_with(
    schema: Schema,
    ddl: &str,
) -> (QueryEngine<SqliteExecutor, TableProvider>, SqliteExecutor) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let schema = Arc::new(schema);
    let conn = rusqlite::Connection::open_in_memory().expect("open sqlite");
    let exec = SqliteExecutor::new(conn);
    exec.batch(ddl);

    let provider = TableProvider::new(schema.clone(), Dialect::Sqlite, exec.clone());
    let engine = QueryEngine::new(schema, Dialect::Sqlite, exec.clone(), provider);
    (engine, exec)
}

/// Engine over the shop fixtures.
pub fn shop_engine() -> (QueryEngine<SqliteExecutor, TableProvider>, SqliteExecutor) {
    engine_with(schema::shop_schema(), schema::SHOP_DDL)
}
