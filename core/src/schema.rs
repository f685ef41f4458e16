//! The read-only metadata view: entities, fields, relations.
//!
//! Descriptors are built once, registered into a [`Schema`], and shared
//! behind `Arc` for the lifetime of the process. Nothing in the query
//! pipeline ever writes through them; per-call state (join trees, expression
//! overrides) lives outside the schema.

use std::sync::Arc;

use compact_str::CompactString;
use hashbrown::HashMap;
use serde_json::Value as Json;

use crate::error::{Result, TrellisError};
use crate::value::Value;

/// Store→wire conversion for one field. Fallible; the failure message is
/// wrapped with entity/field context by the caller.
pub type ToWire = fn(Value) -> std::result::Result<Json, String>;

/// Wire→store conversion for one field.
pub type ToStore = fn(&Json) -> std::result::Result<Value, String>;

fn default_to_wire(value: Value) -> std::result::Result<Json, String> {
    Ok(value.into_json())
}

fn default_to_store(json: &Json) -> std::result::Result<Value, String> {
    Ok(Value::from_json(json))
}

/// A field's value conversion pair. The default codec round-trips scalars
/// losslessly through [`Value::into_json`] / [`Value::from_json`].
#[derive(Debug, Clone, Copy)]
pub struct FieldCodec {
    pub to_wire: ToWire,
    pub to_store: ToStore,
}

impl Default for FieldCodec {
    fn default() -> Self {
        FieldCodec {
            to_wire: default_to_wire,
            to_store: default_to_store,
        }
    }
}

/// What an entity reads from: a physical table, or a subquery for entities
/// that are themselves virtual.
#[derive(Debug, Clone)]
pub enum TableSource {
    Table(CompactString),
    Subquery(String),
}

/// A virtual cross-entity expression. Templates are SQL text with reference
/// tokens of the form `{relationPath.field}`; `relationPath` may be several
/// dot-separated hops.
#[derive(Debug, Clone)]
pub enum VirtualExpr {
    /// One template used in every resolution mode.
    Template(String),
    /// Separate templates for join-backed and join-free resolution.
    PerMode { joined: String, detached: String },
}

impl VirtualExpr {
    pub fn template(&self, joins_active: bool) -> &str {
        match self {
            VirtualExpr::Template(t) => t,
            VirtualExpr::PerMode { joined, detached } => {
                if joins_active { joined } else { detached }
            }
        }
    }
}

/// The statically declared shape of a computed field that projects a single
/// field off a to-one relation. Anything SQL can rewrite onto a join alias
/// carries one of these; computed fields without a projection are evaluated
/// in application code after loading.
#[derive(Debug, Clone)]
pub struct RelationProjection {
    pub relation: CompactString,
    pub field: CompactString,
}

/// Marker for a field computed from already-loaded relation data.
#[derive(Debug, Clone, Default)]
pub struct Computed {
    pub projection: Option<RelationProjection>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub key: CompactString,
    pub column: CompactString,
    pub codec: FieldCodec,
    pub expression: Option<VirtualExpr>,
    pub computed: Option<Computed>,
    /// Read-only fields are excluded from explicit write projections.
    pub readonly: bool,
}

impl FieldDef {
    pub fn new(key: impl Into<CompactString>, column: impl Into<CompactString>) -> Self {
        FieldDef {
            key: key.into(),
            column: column.into(),
            codec: FieldCodec::default(),
            expression: None,
            computed: None,
            readonly: false,
        }
    }

    pub fn with_codec(mut self, codec: FieldCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_expression(mut self, expr: VirtualExpr) -> Self {
        self.expression = Some(expr);
        self
    }

    /// Shorthand for a single-template expression field.
    pub fn with_template(self, template: impl Into<String>) -> Self {
        self.with_expression(VirtualExpr::Template(template.into()))
    }

    pub fn computed(mut self, computed: Computed) -> Self {
        self.computed = Some(computed);
        self
    }

    /// Shorthand for a computed field projecting `relation.field`.
    pub fn projects(
        self,
        relation: impl Into<CompactString>,
        field: impl Into<CompactString>,
    ) -> Self {
        self.computed(Computed {
            projection: Some(RelationProjection {
                relation: relation.into(),
                field: field.into(),
            }),
        })
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// A plain field maps directly to its column with no expression and no
    /// computed marker.
    pub fn is_plain(&self) -> bool {
        self.expression.is_none() && self.computed.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

#[derive(Debug, Clone)]
pub struct RelationDef {
    /// Relation name; also the key the related object lands under in results.
    pub key: CompactString,
    pub cardinality: Cardinality,
    /// Foreign-key field key on the owning side. Only to-one relations with
    /// a resolvable FK participate in automatic joins.
    pub fk_field: Option<CompactString>,
    /// Target entity name.
    pub target: CompactString,
}

impl RelationDef {
    pub fn to_one(
        key: impl Into<CompactString>,
        fk_field: impl Into<CompactString>,
        target: impl Into<CompactString>,
    ) -> Self {
        RelationDef {
            key: key.into(),
            cardinality: Cardinality::ToOne,
            fk_field: Some(fk_field.into()),
            target: target.into(),
        }
    }

    pub fn to_many(key: impl Into<CompactString>, target: impl Into<CompactString>) -> Self {
        RelationDef {
            key: key.into(),
            cardinality: Cardinality::ToMany,
            fk_field: None,
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: CompactString,
    pub source: TableSource,
    pub fields: Vec<FieldDef>,
    /// Primary-key field key.
    pub id_field: CompactString,
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<CompactString>, table: impl Into<CompactString>) -> Self {
        EntityDef {
            name: name.into(),
            source: TableSource::Table(table.into()),
            fields: Vec::new(),
            id_field: CompactString::const_new("id"),
            relations: Vec::new(),
        }
    }

    /// Declares the entity as a virtual table backed by a subquery.
    pub fn from_subquery(name: impl Into<CompactString>, subquery: impl Into<String>) -> Self {
        EntityDef {
            name: name.into(),
            source: TableSource::Subquery(subquery.into()),
            fields: Vec::new(),
            id_field: CompactString::const_new("id"),
            relations: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn id(mut self, field_key: impl Into<CompactString>) -> Self {
        self.id_field = field_key.into();
        self
    }

    pub fn field_def(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn relation_def(&self, key: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.key == key)
    }

    /// Column backing the primary-key field, when it resolves.
    pub fn id_column(&self) -> Option<&str> {
        self.field_def(&self.id_field).map(|f| f.column.as_str())
    }

    /// Conventional display-name field: a plain field keyed `name`.
    pub fn display_field(&self) -> Option<&FieldDef> {
        self.field_def("name").filter(|f| f.is_plain())
    }
}

/// Registry of entity descriptors, shared read-only across invocations.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    entities: HashMap<CompactString, Arc<EntityDef>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity. Duplicate names are rejected eagerly rather than
    /// surfacing mid-query.
    pub fn register(&mut self, entity: EntityDef) -> Result<()> {
        if self.entities.contains_key(&entity.name) {
            return Err(TrellisError::DuplicateEntity(entity.name.to_string()));
        }
        self.entities.insert(entity.name.clone(), Arc::new(entity));
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDef>> {
        self.entities
            .get(name)
            .ok_or_else(|| TrellisError::UnknownEntity(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDef>> {
        self.entities.get(name)
    }

    /// Checks that every relation targets a registered entity.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for relation in &entity.relations {
                if !self.entities.contains_key(&relation.target) {
                    return Err(TrellisError::UnknownRelationTarget {
                        entity: entity.name.to_string(),
                        relation: relation.key.to_string(),
                        target: relation.target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
