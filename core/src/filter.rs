//! Filter trees and their translation into WHERE predicates.
//!
//! Translation returns `Option<Sql>`, where `None` means "no restriction" —
//! an empty branch denotes an unconstrained match, never an exclude-all.

use compact_str::CompactString;
use serde_json::Value as Json;

use crate::error::{Result, TrellisError};
use crate::resolve::{ResolveCtx, Resolved, resolve_field};
use crate::schema::FieldDef;
use crate::sql::Sql;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => " = ",
            CompareOp::Ne => " <> ",
            CompareOp::Gt => " > ",
            CompareOp::Gte => " >= ",
            CompareOp::Lt => " < ",
            CompareOp::Lte => " <= ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

/// An immutable filter tree, built by the caller and only read here.
#[derive(Debug, Clone)]
pub enum Filter {
    Compare {
        field: CompactString,
        op: CompareOp,
        value: Json,
    },
    In {
        field: CompactString,
        values: Vec<Json>,
        negated: bool,
    },
    Null {
        field: CompactString,
        negated: bool,
    },
    /// Case-insensitive text match.
    Match {
        field: CompactString,
        kind: MatchKind,
        term: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Opaque database-specific predicate, passed through untranslated.
    Raw(Sql),
}

impl Filter {
    pub fn eq(field: impl Into<CompactString>, value: Json) -> Self {
        Filter::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn compare(field: impl Into<CompactString>, op: CompareOp, value: Json) -> Self {
        Filter::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn is_in<I>(field: impl Into<CompactString>, values: I) -> Self
    where
        I: IntoIterator<Item = Json>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().collect(),
            negated: false,
        }
    }

    pub fn is_null(field: impl Into<CompactString>) -> Self {
        Filter::Null {
            field: field.into(),
            negated: false,
        }
    }

    pub fn is_not_null(field: impl Into<CompactString>) -> Self {
        Filter::Null {
            field: field.into(),
            negated: true,
        }
    }

    pub fn contains(field: impl Into<CompactString>, term: impl Into<String>) -> Self {
        Filter::Match {
            field: field.into(),
            kind: MatchKind::Contains,
            term: term.into(),
        }
    }

    pub fn starts_with(field: impl Into<CompactString>, term: impl Into<String>) -> Self {
        Filter::Match {
            field: field.into(),
            kind: MatchKind::StartsWith,
            term: term.into(),
        }
    }

    pub fn ends_with(field: impl Into<CompactString>, term: impl Into<String>) -> Self {
        Filter::Match {
            field: field.into(),
            kind: MatchKind::EndsWith,
            term: term.into(),
        }
    }

    pub fn and<I: IntoIterator<Item = Filter>>(filters: I) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or<I: IntoIterator<Item = Filter>>(filters: I) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }
}

/// Translates a filter tree into one predicate fragment, or `None` when the
/// tree imposes no restriction.
pub fn translate(filter: &Filter, ctx: &ResolveCtx<'_>) -> Result<Option<Sql>> {
    match filter {
        Filter::Compare { field, op, value } => {
            let Some((expr, def)) = resolve_leaf(ctx, field) else {
                return Ok(None);
            };
            let stored = convert(ctx, def, value)?;
            Ok(Some(Sql::raw(format!("{expr}{}", op.sql())).bind(stored)))
        }
        Filter::In {
            field,
            values,
            negated,
        } => {
            let Some((expr, def)) = resolve_leaf(ctx, field) else {
                return Ok(None);
            };
            let keyword = if *negated { " NOT IN (" } else { " IN (" };
            // empty set matches nothing: IN (NULL)
            if values.is_empty() {
                return Ok(Some(Sql::raw(format!("{expr}{keyword}NULL)"))));
            }
            let mut sql = Sql::raw(format!("{expr}{keyword}"));
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    sql.push(", ");
                }
                sql = sql.bind(convert(ctx, def, value)?);
            }
            sql.push(")");
            Ok(Some(sql))
        }
        Filter::Null { field, negated } => {
            let Some((expr, _)) = resolve_leaf(ctx, field) else {
                return Ok(None);
            };
            let suffix = if *negated { " IS NOT NULL" } else { " IS NULL" };
            Ok(Some(Sql::raw(format!("{expr}{suffix}"))))
        }
        Filter::Match { field, kind, term } => {
            let Some((expr, _)) = resolve_leaf(ctx, field) else {
                return Ok(None);
            };
            let pattern = like_pattern(*kind, term);
            Ok(Some(
                Sql::raw(format!("LOWER({expr}) LIKE ")).bind(pattern.into()),
            ))
        }
        Filter::And(branches) => {
            let mut parts = Vec::with_capacity(branches.len());
            for branch in branches {
                if let Some(sql) = translate(branch, ctx)? {
                    parts.push(sql);
                }
            }
            Ok(combine(parts, " AND "))
        }
        Filter::Or(branches) => {
            let mut parts = Vec::with_capacity(branches.len());
            for branch in branches {
                // an unconstrained branch makes the whole OR unconstrained
                match translate(branch, ctx)? {
                    Some(sql) => parts.push(sql),
                    None => return Ok(None),
                }
            }
            Ok(combine(parts, " OR "))
        }
        Filter::Not(inner) => match translate(inner, ctx)? {
            // NOT of "no restriction" is still no restriction
            None => Ok(None),
            Some(sql) => Ok(Some(Sql::raw("NOT ").append(sql.parenthesize()))),
        },
        Filter::Raw(sql) => Ok(Some(sql.clone())),
    }
}

/// Resolves a leaf's referenced field to SQL. An unresolvable leaf is
/// dropped — the filter narrows instead of erroring — and reported on the
/// diagnostic channel.
fn resolve_leaf<'c>(ctx: &'c ResolveCtx<'_>, field_key: &str) -> Option<(String, &'c FieldDef)> {
    let Some(def) = ctx.entity.field_def(field_key) else {
        tracing::warn!(
            entity = %ctx.entity.name,
            field = %field_key,
            "trellis.filter.dropped_leaf"
        );
        return None;
    };
    match resolve_field(ctx, def) {
        Resolved::Opaque => {
            tracing::warn!(
                entity = %ctx.entity.name,
                field = %field_key,
                "trellis.filter.dropped_leaf"
            );
            None
        }
        resolved => {
            let sql = resolved.sql()?.into_owned();
            Some((sql, def))
        }
    }
}

/// Runs a leaf value through the field's wire→store conversion so typed
/// values bind exactly as the base write path would serialize them.
fn convert(ctx: &ResolveCtx<'_>, def: &FieldDef, value: &Json) -> Result<crate::value::Value> {
    (def.codec.to_store)(value).map_err(|message| TrellisError::Conversion {
        entity: ctx.entity.name.to_string(),
        field: def.key.to_string(),
        message,
    })
}

/// Builds the LIKE pattern for a case-insensitive match. Contains folds runs
/// of whitespace in the search term to `%` so multi-word input matches
/// condensed database text — deliberate fuzzy matching, not escaping.
fn like_pattern(kind: MatchKind, term: &str) -> String {
    let lower = term.to_lowercase();
    match kind {
        MatchKind::Contains => {
            let mut pattern = String::with_capacity(lower.len() + 2);
            pattern.push('%');
            for (i, word) in lower.split_whitespace().enumerate() {
                if i > 0 {
                    pattern.push('%');
                }
                pattern.push_str(word);
            }
            pattern.push('%');
            pattern
        }
        MatchKind::StartsWith => format!("{lower}%"),
        MatchKind::EndsWith => format!("%{lower}"),
    }
}

fn combine(mut parts: Vec<Sql>, separator: &str) -> Option<Sql> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Sql::join(parts, separator).parenthesize()),
    }
}
