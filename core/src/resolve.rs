//! Two-mode resolution of virtual cross-entity fields.
//!
//! A field resolves to a qualified column when a matching join node exists
//! (JOIN mode), or to a correlated scalar subquery when it does not
//! (subquery mode). Both modes degrade to a SQL `NULL` literal on partial
//! metadata rather than erroring: expression templates may be written
//! generically and only become valid once certain relations are included.

use std::borrow::Cow;
use std::sync::Arc;

use compact_str::CompactString;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::dialect::Dialect;
use crate::plan::{JoinTree, RelPath, normalize_subquery};
use crate::schema::{Cardinality, EntityDef, FieldDef, Schema, TableSource};

/// Call-local degraded expression definitions: field key → self-contained
/// SQL. Threaded through every resolution instead of ever writing a degraded
/// definition into the shared schema, so parallel invocations against the
/// same entity can never observe each other's state.
pub type ExprOverrides = HashMap<CompactString, String>;

/// Recursion cap across nested virtual-field resolutions.
const MAX_RESOLUTION_DEPTH: usize = 8;

/// Context for one resolution pass. Borrowed, read-only; a fresh one is
/// built per query invocation.
pub struct ResolveCtx<'a> {
    pub schema: &'a Schema,
    pub dialect: Dialect,
    /// Entity the resolved field belongs to.
    pub entity: &'a Arc<EntityDef>,
    /// Active join tree. `None` forces subquery mode throughout.
    pub tree: Option<&'a JoinTree>,
    /// Correlation alias qualifying direct columns of `entity`.
    pub alias: &'a str,
    /// Path of the correlation alias within the tree; empty at the root.
    pub base_path: RelPath,
    pub overrides: &'a ExprOverrides,
}

/// Outcome of resolving one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Directly addressable qualified column.
    Column(String),
    /// A computed SQL expression: template expansion or correlated subquery.
    Expr(String),
    /// Degraded to the SQL `NULL` literal.
    Null,
    /// Not representable in SQL; evaluated in application code after load.
    Opaque,
}

impl Resolved {
    /// SQL text for embedding, or `None` when the field cannot appear in SQL.
    pub fn sql(&self) -> Option<Cow<'_, str>> {
        match self {
            Resolved::Column(s) | Resolved::Expr(s) => Some(Cow::Borrowed(s)),
            Resolved::Null => Some(Cow::Borrowed("NULL")),
            Resolved::Opaque => None,
        }
    }
}

/// Resolves `field` against the context's join tree and correlation alias.
pub fn resolve_field(ctx: &ResolveCtx<'_>, field: &FieldDef) -> Resolved {
    let mut visited: SmallVec<[CompactString; 4]> = SmallVec::new();
    let base_path = ctx.base_path.clone();
    resolve_inner(ctx, ctx.entity, field, ctx.alias, &base_path, &mut visited)
}

fn resolve_inner(
    ctx: &ResolveCtx<'_>,
    entity: &Arc<EntityDef>,
    field: &FieldDef,
    alias: &str,
    base_path: &RelPath,
    visited: &mut SmallVec<[CompactString; 4]>,
) -> Resolved {
    // Degraded definitions are keyed by root-entity field; they win over
    // everything else so the whole statement agrees with the delegate.
    if Arc::ptr_eq(entity, ctx.entity)
        && let Some(text) = ctx.overrides.get(&field.key)
    {
        return Resolved::Expr(text.clone());
    }

    if field.is_plain() {
        return Resolved::Column(ctx.dialect.qualify(alias, &field.column));
    }

    if let Some(expr) = &field.expression {
        let joins_active = ctx.tree.is_some_and(|t| !t.is_empty());
        return expand_template(
            ctx,
            entity,
            expr.template(joins_active),
            alias,
            base_path,
            visited,
        );
    }

    // Computed field: only the declared relation-projection shape is
    // representable in SQL, and only when the relation is already joined.
    if let Some(projection) = field.computed.as_ref().and_then(|c| c.projection.as_ref()) {
        let path = base_path.child(projection.relation.clone());
        if let Some(tree) = ctx.tree
            && let Some(node) = tree.find(&path)
            && let Some(target_field) = node.target.field_def(&projection.field)
            && target_field.is_plain()
        {
            return Resolved::Column(ctx.dialect.qualify(&node.alias, &target_field.column));
        }
    }
    Resolved::Opaque
}

/// One piece of a parsed expression template.
enum Part<'t> {
    Literal(&'t str),
    Token(&'t str),
}

fn parse_template(template: &str) -> Vec<Part<'_>> {
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(&rest[..open]));
        }
        match rest[open..].find('}') {
            Some(close) => {
                parts.push(Part::Token(&rest[open + 1..open + close]));
                rest = &rest[open + close + 1..];
            }
            None => {
                // unbalanced brace: keep as literal text
                parts.push(Part::Literal(&rest[open..]));
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest));
    }
    parts
}

/// Reference tokens embedded in a template, in order.
pub(crate) fn reference_tokens(template: &str) -> Vec<&str> {
    parse_template(template)
        .into_iter()
        .filter_map(|p| match p {
            Part::Token(t) => Some(t),
            Part::Literal(_) => None,
        })
        .collect()
}

fn expand_template(
    ctx: &ResolveCtx<'_>,
    entity: &Arc<EntityDef>,
    template: &str,
    alias: &str,
    base_path: &RelPath,
    visited: &mut SmallVec<[CompactString; 4]>,
) -> Resolved {
    let parts = parse_template(template);

    // A template that is exactly one token keeps the token's own shape, so
    // single-reference fields stay addressable columns in JOIN mode.
    let bare_token = match parts.as_slice() {
        [Part::Token(t)] => Some(*t),
        _ => None,
    };
    if let Some(token) = bare_token {
        return resolve_token(ctx, entity, token, alias, base_path, visited);
    }

    let mut out = String::with_capacity(template.len());
    for part in parts {
        match part {
            Part::Literal(text) => out.push_str(&ctx.dialect.requote_fragment(text)),
            Part::Token(token) => {
                // each token starts its own chain; two tokens through the
                // same alias are not a cycle
                let mut chain = visited.clone();
                match resolve_token(ctx, entity, token, alias, base_path, &mut chain) {
                    Resolved::Column(s) | Resolved::Expr(s) => out.push_str(&s),
                    Resolved::Null | Resolved::Opaque => out.push_str("NULL"),
                }
            }
        }
    }
    Resolved::Expr(out)
}

/// Resolves one `relationPath.fieldName` token.
fn resolve_token(
    ctx: &ResolveCtx<'_>,
    entity: &Arc<EntityDef>,
    token: &str,
    alias: &str,
    base_path: &RelPath,
    visited: &mut SmallVec<[CompactString; 4]>,
) -> Resolved {
    let segments: Vec<&str> = token.split('.').map(str::trim).collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Resolved::Null;
    }
    let (hops, field_key) = (&segments[..segments.len() - 1], segments[segments.len() - 1]);

    // JOIN mode: the full relation path already has a node in the tree.
    if let Some(tree) = ctx.tree {
        let full = base_path.join(&RelPath::from_segments(hops.iter().copied()));
        if let Some(node) = tree.find(&full) {
            let Some(target_field) = node.target.field_def(field_key) else {
                return Resolved::Null;
            };
            if target_field.is_plain() {
                return Resolved::Column(ctx.dialect.qualify(&node.alias, &target_field.column));
            }
            // Nested virtual field: resolve it with the matched alias as the
            // new correlation point. Revisiting an alias means a cycle.
            if visited.iter().any(|a| a == &node.alias) || visited.len() >= MAX_RESOLUTION_DEPTH {
                return Resolved::Null;
            }
            visited.push(node.alias.clone());
            let resolved =
                resolve_inner(ctx, &node.target, target_field, &node.alias, &node.path, visited);
            return match resolved {
                Resolved::Opaque => Resolved::Null,
                other => other,
            };
        }
    }

    // Subquery mode: synthesize one correlated scalar subquery per hop.
    let full = base_path.join(&RelPath::from_segments(hops.iter().copied()));
    match build_subquery(ctx, entity, hops, field_key, alias, &full, visited, 0) {
        Some(text) => Resolved::Expr(text),
        None => Resolved::Null,
    }
}

/// Builds the nested correlated subquery chain for `hops`, correlating hop 0
/// to `corr_alias` and each later hop to the previous hop's alias.
#[allow(clippy::too_many_arguments)]
fn build_subquery(
    ctx: &ResolveCtx<'_>,
    entity: &Arc<EntityDef>,
    hops: &[&str],
    field_key: &str,
    corr_alias: &str,
    full_path: &RelPath,
    visited: &mut SmallVec<[CompactString; 4]>,
    depth: usize,
) -> Option<String> {
    let relation = entity.relation_def(hops[0])?;
    if relation.cardinality != Cardinality::ToOne {
        return None;
    }
    let fk_field = entity.field_def(relation.fk_field.as_deref()?)?;
    let target = ctx.schema.get(&relation.target)?;
    let id_column = target.id_column()?.to_string();

    // Hop aliases carry the nesting level of virtual-field recursion, so an
    // inner resolution can never shadow the alias its correlation points at.
    let hop_alias = format!("s{}_{}", visited.len(), depth);

    let inner = if hops.len() == 1 {
        let target_field = target.field_def(field_key)?;
        if target_field.is_plain() {
            ctx.dialect.qualify(&hop_alias, &target_field.column)
        } else {
            if visited.len() >= MAX_RESOLUTION_DEPTH {
                return None;
            }
            visited.push(CompactString::from(hop_alias.as_str()));
            let resolved =
                resolve_inner(ctx, target, target_field, &hop_alias, full_path, visited);
            match resolved {
                Resolved::Column(s) | Resolved::Expr(s) => s,
                Resolved::Null => "NULL".to_string(),
                Resolved::Opaque => return None,
            }
        }
    } else {
        build_subquery(
            ctx,
            target,
            &hops[1..],
            field_key,
            &hop_alias,
            full_path,
            visited,
            depth + 1,
        )?
    };

    let table = match &target.source {
        TableSource::Table(name) => ctx.dialect.quote(name),
        TableSource::Subquery(text) => normalize_subquery(text, ctx.dialect),
    };
    let alias_q = ctx.dialect.quote(&hop_alias);
    let id_q = ctx.dialect.quote(&id_column);
    let corr = ctx.dialect.qualify(corr_alias, &fk_field.column);
    Some(format!(
        "(SELECT {inner} FROM {table} AS {alias_q} WHERE {alias_q}.{id_q} = {corr})"
    ))
}
