//! Core pipeline of the trellis query layer.
//!
//! Given declarative entity/relation metadata, a filter tree, a sort spec,
//! and virtual cross-entity expression fields, trellis compiles one
//! dialect-correct SQL statement with automatic LEFT JOINs, then rebuilds
//! nested objects from the flat row set. On execution failure it degrades:
//! joins off, every expression field rewritten as a correlated subquery, and
//! the original request delegated to the plain per-entity provider.

pub mod dialect;
pub mod error;
pub mod fallback;
pub mod filter;
pub mod hydrate;
pub mod plan;
pub mod provider;
pub mod query;
pub mod resolve;
pub mod schema;
pub mod sql;
pub mod value;

// Re-export key types and traits
pub use dialect::Dialect;
pub use error::{Result, TrellisError};
pub use filter::{CompareOp, Filter, MatchKind};
pub use plan::{Include, JoinNode, JoinPlanner, JoinTree, RelPath, ROOT_ALIAS};
pub use provider::{BaseProvider, Executor, Record, Row};
pub use query::{QueryEngine, QueryRequest, SortDirection, SortKey};
pub use resolve::{ExprOverrides, ResolveCtx, Resolved, resolve_field};
pub use schema::{
    Cardinality, Computed, EntityDef, FieldCodec, FieldDef, RelationDef, RelationProjection,
    Schema, TableSource, VirtualExpr,
};
pub use sql::Sql;
pub use value::Value;
