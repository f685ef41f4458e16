//! Keyed-insert fallback for trigger-bearing tables.
//!
//! SQL Server rejects an insert that requests the generated key back when
//! the target table has active triggers. Once the engine error is classified
//! (see [`Dialect::is_trigger_conflict`]), the insert is re-issued without a
//! key request: an explicit projection of writable columns only, the
//! generated key read back via the dialect's last-identity statement on the
//! same connection, and the full row re-fetched by primary key so the caller
//! sees the same shape as the ordinary path.

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::dialect::Dialect;
use crate::error::{Result, TrellisError};
use crate::provider::{Executor, Record};
use crate::schema::{EntityDef, TableSource};
use crate::sql::Sql;
use crate::value::Value;

pub async fn insert_without_keyed_output<E: Executor>(
    executor: &E,
    dialect: Dialect,
    entity: &Arc<EntityDef>,
    data: &Record,
) -> Result<Json> {
    let TableSource::Table(table) = &entity.source else {
        return Err(TrellisError::Write(format!(
            "cannot insert into virtual entity {}",
            entity.name
        )));
    };

    // Explicit projection: writable columns only. Expression, computed, and
    // read-only fields are not valid insert targets.
    let writable: Vec<_> = entity
        .fields
        .iter()
        .filter(|f| f.is_plain() && !f.readonly && data.contains_key(f.key.as_str()))
        .collect();
    if writable.is_empty() {
        return Err(TrellisError::Write(format!(
            "no writable columns for {}",
            entity.name
        )));
    }

    let mut statement = Sql::raw(format!("INSERT INTO {} (", dialect.quote(table)));
    for (i, field) in writable.iter().enumerate() {
        if i > 0 {
            statement.push(", ");
        }
        statement.push(&dialect.quote(&field.column));
    }
    statement.push(") VALUES (");
    for (i, field) in writable.iter().enumerate() {
        if i > 0 {
            statement.push(", ");
        }
        let value = &data[field.key.as_str()];
        let stored = (field.codec.to_store)(value).map_err(|message| TrellisError::Conversion {
            entity: entity.name.to_string(),
            field: field.key.to_string(),
            message,
        })?;
        statement = statement.bind(stored);
    }
    statement.push(")");

    let text = dialect.finalize_placeholders(&statement.text);
    tracing::debug!(sql = %text, "trellis.insert.fallback");
    executor.execute(&text, &statement.params).await?;

    // Generated key, bound to the same connection/transaction.
    let rows = executor.query(dialect.last_identity_sql(), &[]).await?;
    let key = rows
        .first()
        .and_then(|row| row.first())
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or(TrellisError::IdentityUnavailable)?;

    refetch_by_key(executor, dialect, entity, table, key).await
}

/// Re-reads the inserted row by primary key and converts it to wire shape.
async fn refetch_by_key<E: Executor>(
    executor: &E,
    dialect: Dialect,
    entity: &Arc<EntityDef>,
    table: &str,
    key: Value,
) -> Result<Json> {
    let id_column = entity.id_column().ok_or_else(|| {
        TrellisError::Write(format!("no primary key column on {}", entity.name))
    })?;

    let mut select = Sql::raw("SELECT ");
    let plain: Vec<_> = entity.fields.iter().filter(|f| f.is_plain()).collect();
    for (i, field) in plain.iter().enumerate() {
        if i > 0 {
            select.push(", ");
        }
        select.push(&dialect.quote(&field.column));
        select.push(" AS ");
        select.push(&dialect.quote(&field.key));
    }
    select.push(&format!(
        " FROM {} WHERE {} = ",
        dialect.quote(table),
        dialect.quote(id_column)
    ));
    let select = select.bind(key);

    let text = dialect.finalize_placeholders(&select.text);
    let rows = executor.query(&text, &select.params).await?;
    let row = rows.into_iter().next().ok_or(TrellisError::NotFound)?;

    let mut object = Map::new();
    for field in plain {
        if let Some(value) = row.get(&field.key) {
            let wire =
                (field.codec.to_wire)(value.clone()).map_err(|message| TrellisError::Conversion {
                    entity: entity.name.to_string(),
                    field: field.key.to_string(),
                    message,
                })?;
            object.insert(field.key.to_string(), wire);
        }
    }
    Ok(Json::Object(object))
}
