//! # Trellis
//!
//! A join-compiling query layer for relational stores: declarative entity
//! metadata in, one dialect-correct SQL statement out, nested objects back.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis::prelude::*;
//!
//! let mut schema = Schema::new();
//! schema.register(
//!     EntityDef::new("Product", "Product")
//!         .field(FieldDef::new("id", "id").readonly())
//!         .field(FieldDef::new("name", "name"))
//!         .field(FieldDef::new("categoryId", "category_id"))
//!         .relation(RelationDef::to_one("category", "categoryId", "Category")),
//! )?;
//! schema.register(
//!     EntityDef::new("Category", "Category")
//!         .field(FieldDef::new("id", "id").readonly())
//!         .field(FieldDef::new("name", "name")),
//! )?;
//! schema.validate()?;
//!
//! // querying products with the category included yields
//! // `product.category.name`, or an explicit null when the foreign key
//! // matches no category:
//! let request = QueryRequest::new().include(Include::path("category"));
//! # let _ = request;
//! # Ok::<(), trellis::TrellisError>(())
//! ```
//!
//! Execution and the plain (non-join) path stay behind the [`Executor`] and
//! [`BaseProvider`] traits; trellis owns planning, expression resolution,
//! filter translation, statement assembly, and row reconstruction.

pub use trellis_core::*;

pub mod prelude {
    pub use trellis_core::{
        BaseProvider, Cardinality, CompareOp, Computed, Dialect, EntityDef, Executor,
        ExprOverrides, FieldCodec, FieldDef, Filter, Include, MatchKind, QueryEngine,
        QueryRequest, Record, RelPath, RelationDef, RelationProjection, Result, Row, Schema,
        SortDirection, SortKey, Sql, TableSource, TrellisError, Value, VirtualExpr,
    };
}
