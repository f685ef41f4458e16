use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    /// Error executing a statement at the engine
    #[error("execution error: {0}")]
    Execution(String),

    /// A stored value could not be converted to its wire type
    #[error("conversion error for {entity}.{field}: {message}")]
    Conversion {
        entity: String,
        field: String,
        message: String,
    },

    /// Entity name not present in the schema
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Entity registered twice
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),

    /// A relation targets an entity the schema does not know
    #[error("relation {relation} on {entity} targets unknown entity {target}")]
    UnknownRelationTarget {
        entity: String,
        relation: String,
        target: String,
    },

    /// The identity query after a keyed-insert fallback returned no key
    #[error("no generated key returned by identity query")]
    IdentityUnavailable,

    /// No rows returned when at least one was expected
    #[error("no rows found")]
    NotFound,

    /// Error in a write operation
    #[error("write error: {0}")]
    Write(String),

    /// Error building a query
    #[error("query error: {0}")]
    Query(String),
}

/// Result type for query-layer operations
pub type Result<T> = std::result::Result<T, TrellisError>;
