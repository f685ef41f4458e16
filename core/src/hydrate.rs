//! Reconstruction of nested objects from flat aliased rows.
//!
//! Root-entity columns are read by un-prefixed field key; each join node's
//! columns carry an `alias#key` prefix. A joined group whose values are all
//! null materializes as an explicit JSON null — never as an object of nulls.

use std::sync::Arc;

use compact_str::CompactString;
use serde_json::{Map, Value as Json};

use crate::error::{Result, TrellisError};
use crate::plan::{JoinNode, JoinTree};
use crate::provider::Row;
use crate::schema::{EntityDef, FieldDef};
use crate::value::Value;

/// Maps the flat row set back into nested objects.
pub fn assemble(entity: &Arc<EntityDef>, tree: &JoinTree, rows: Vec<Row>) -> Result<Vec<Json>> {
    rows.into_iter()
        .map(|row| assemble_row(entity, tree, &row))
        .collect()
}

fn assemble_row(entity: &Arc<EntityDef>, tree: &JoinTree, row: &Row) -> Result<Json> {
    let mut object = Map::new();

    for field in &entity.fields {
        if let Some(value) = row.get(&field.key) {
            object.insert(
                field.key.to_string(),
                to_wire(&entity.name, field, value.clone())?,
            );
        }
    }

    // Pre-order: parents materialize before their children, so a child of an
    // absent relation is skipped instead of resurrecting the parent.
    for node in tree.nodes() {
        let related = related_object(node, row)?;
        place(&mut object, node.path.segments(), related);
    }

    evaluate_computed(entity, &mut object);
    Ok(Json::Object(object))
}

/// Collects one join node's aliased column group. All-null groups mean the
/// foreign key matched no row: the relation is explicitly absent.
fn related_object(node: &JoinNode, row: &Row) -> Result<Json> {
    let mut related = Map::new();
    let mut all_null = true;

    for key in node.selected.iter().chain(node.deferred.iter()) {
        let column = format!("{}#{}", node.alias, key);
        let Some(value) = row.get(&column) else {
            continue;
        };
        if !value.is_null() {
            all_null = false;
        }
        let Some(field) = node.target.field_def(key) else {
            continue;
        };
        related.insert(
            key.to_string(),
            to_wire(&node.target.name, field, value.clone())?,
        );
    }

    if all_null {
        Ok(Json::Null)
    } else {
        Ok(Json::Object(related))
    }
}

/// Writes a related object at the nesting depth given by the node's path,
/// creating intermediate containers as needed. Writing under an absent
/// parent is a no-op.
fn place(root: &mut Map<String, Json>, path: &[CompactString], value: Json) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        match entry {
            Json::Object(map) => current = map,
            _ => return,
        }
    }
    current.insert(last.to_string(), value);
}

/// Fills computed relation-projections from the materialized object. A value
/// already produced in SQL is left alone; a projection whose relation data
/// is not loaded stays unset for the caller.
fn evaluate_computed(entity: &EntityDef, object: &mut Map<String, Json>) {
    for field in &entity.fields {
        let Some(projection) = field.computed.as_ref().and_then(|c| c.projection.as_ref()) else {
            continue;
        };
        if object.contains_key(field.key.as_str()) {
            continue;
        }
        match object.get(projection.relation.as_str()) {
            Some(Json::Null) => {
                object.insert(field.key.to_string(), Json::Null);
            }
            Some(Json::Object(related)) => {
                if let Some(value) = related.get(projection.field.as_str()) {
                    let value = value.clone();
                    object.insert(field.key.to_string(), value);
                }
            }
            _ => {}
        }
    }
}

fn to_wire(entity: &str, field: &FieldDef, value: Value) -> Result<Json> {
    (field.codec.to_wire)(value).map_err(|message| TrellisError::Conversion {
        entity: entity.to_string(),
        field: field.key.to_string(),
        message,
    })
}
