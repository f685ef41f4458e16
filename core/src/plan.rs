//! Join planning: turning requested includes and virtual-field references
//! into a tree of join nodes with stable aliases.

use std::fmt;
use std::sync::Arc;

use compact_str::{CompactString, format_compact};
use smallvec::SmallVec;

use crate::dialect::Dialect;
use crate::resolve;
use crate::schema::{Cardinality, EntityDef, FieldDef, Schema, TableSource};

/// Alias of the root entity in every joined statement.
pub const ROOT_ALIAS: &str = "t0";

/// A typed relation path: the sequence of relation keys from the root entity
/// to a joined entity. Paths index join nodes directly; alias strings are
/// derived from them, never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RelPath(SmallVec<[CompactString; 2]>);

impl RelPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a dot-separated path, e.g. `"customer.region"`.
    pub fn parse(path: &str) -> Self {
        RelPath(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(CompactString::from)
                .collect(),
        )
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        RelPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[CompactString] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, segment: impl Into<CompactString>) -> RelPath {
        let mut out = self.clone();
        out.0.push(segment.into());
        out
    }

    pub fn join(&self, other: &RelPath) -> RelPath {
        let mut out = self.clone();
        out.0.extend(other.0.iter().cloned());
        out
    }

    /// The join alias for this path. The segment count prefix keeps the
    /// mapping injective even when a relation key contains the joiner, so
    /// distinct paths can never stringify to the same alias.
    pub fn alias(&self) -> CompactString {
        let mut joined = String::new();
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                joined.push_str("__");
            }
            joined.push_str(seg);
        }
        format_compact!("j{}_{}", self.0.len(), joined)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

/// One requested relation include: the path to join, and optionally an
/// explicit allow-list of target field keys to select.
#[derive(Debug, Clone)]
pub struct Include {
    pub path: RelPath,
    pub fields: Option<Vec<CompactString>>,
}

impl Include {
    pub fn path(path: &str) -> Self {
        Include {
            path: RelPath::parse(path),
            fields: None,
        }
    }

    pub fn with_fields<I, S>(path: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        Include {
            path: RelPath::parse(path),
            fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }
}

/// A planned join: one to-one relation materialized as a LEFT JOIN with a
/// stable alias. Created fresh per query invocation, never shared.
#[derive(Debug, Clone)]
pub struct JoinNode {
    pub path: RelPath,
    pub alias: CompactString,
    pub parent_alias: CompactString,
    /// Foreign-key column on the parent side.
    pub fk_column: CompactString,
    pub target: Arc<EntityDef>,
    /// Quoted table name or normalized subquery expression to join against.
    pub table_expr: String,
    /// Primary-key column on the target side.
    pub id_column: CompactString,
    /// Plain target field keys selected directly off the alias.
    pub selected: Vec<CompactString>,
    /// Expression/computed target field keys, resolved at the join alias
    /// with the same machinery as root virtual fields.
    pub deferred: Vec<CompactString>,
    pub children: Vec<JoinNode>,
}

/// The per-query join tree.
#[derive(Debug, Clone)]
pub struct JoinTree {
    pub root_alias: CompactString,
    pub roots: Vec<JoinNode>,
}

impl JoinTree {
    pub fn empty() -> Self {
        JoinTree {
            root_alias: CompactString::const_new(ROOT_ALIAS),
            roots: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Looks up the node at an exact path.
    pub fn find(&self, path: &RelPath) -> Option<&JoinNode> {
        let mut nodes = &self.roots;
        let mut found: Option<&JoinNode> = None;
        for depth in 1..=path.len() {
            let node = nodes
                .iter()
                .find(|n| n.path.segments() == &path.segments()[..depth])?;
            nodes = &node.children;
            found = Some(node);
        }
        found
    }

    /// Depth-first pre-order over all nodes: parents always precede children,
    /// which is also a valid JOIN emission order.
    pub fn nodes(&self) -> Vec<&JoinNode> {
        fn walk<'a>(nodes: &'a [JoinNode], out: &mut Vec<&'a JoinNode>) {
            for node in nodes {
                out.push(node);
                walk(&node.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }
}

/// Builds the join tree for one query invocation.
pub struct JoinPlanner<'a> {
    pub schema: &'a Schema,
    pub dialect: Dialect,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(schema: &'a Schema, dialect: Dialect) -> Self {
        JoinPlanner { schema, dialect }
    }

    /// Plans joins for `entity`: every include path, plus every relation
    /// referenced (transitively) by a virtual-expression token or computed
    /// projection on the entity's fields — those fields are in use even when
    /// not selected, since filters and sorts may reference them.
    pub fn plan(&self, entity: &Arc<EntityDef>, includes: &[Include]) -> JoinTree {
        let mut tree = JoinTree::empty();
        for include in includes {
            self.ensure_path(&mut tree, entity, &include.path, include.fields.as_deref());
        }
        for path in expression_paths(entity) {
            self.ensure_path(&mut tree, entity, &path, None);
        }
        tree
    }

    /// Materializes every hop of `path`, reusing existing nodes. A hop that
    /// cannot be resolved drops the path's remainder from the plan; callers
    /// tolerate a reduced plan rather than failing the query.
    fn ensure_path(
        &self,
        tree: &mut JoinTree,
        root: &Arc<EntityDef>,
        path: &RelPath,
        fields: Option<&[CompactString]>,
    ) {
        let mut entity = root.clone();
        let mut parent_alias = tree.root_alias.clone();
        let mut prefix = RelPath::new();
        let mut nodes = &mut tree.roots;

        for (i, segment) in path.segments().iter().enumerate() {
            let Some((fk_column, target, id_column)) = self.resolve_hop(&entity, segment) else {
                tracing::warn!(
                    entity = %entity.name,
                    relation = %segment,
                    path = %path,
                    "trellis.plan.dropped_relation"
                );
                return;
            };

            prefix = prefix.child(segment.clone());
            let idx = match nodes.iter().position(|n| n.path == prefix) {
                Some(idx) => idx,
                None => {
                    let (selected, deferred) = select_fields(&target, None);
                    nodes.push(JoinNode {
                        alias: prefix.alias(),
                        parent_alias: parent_alias.clone(),
                        path: prefix.clone(),
                        fk_column,
                        table_expr: self.table_expr(&target),
                        id_column,
                        selected,
                        deferred,
                        children: Vec::new(),
                        target: target.clone(),
                    });
                    nodes.len() - 1
                }
            };

            let node = &mut nodes[idx];
            if i + 1 == path.len()
                && let Some(allow) = fields
            {
                let (selected, deferred) = select_fields(&target, Some(allow));
                node.selected = selected;
                node.deferred = deferred;
            }

            parent_alias = node.alias.clone();
            entity = target;
            nodes = &mut node.children;
        }
    }

    /// Resolves one hop: the relation must be to-one with a foreign-key
    /// field present on the owning entity, and the target entity and its id
    /// column must be determinable.
    fn resolve_hop(
        &self,
        entity: &EntityDef,
        segment: &str,
    ) -> Option<(CompactString, Arc<EntityDef>, CompactString)> {
        let relation = entity.relation_def(segment)?;
        if relation.cardinality != Cardinality::ToOne {
            return None;
        }
        let fk_field = entity.field_def(relation.fk_field.as_deref()?)?;
        let target = self.schema.get(&relation.target)?.clone();
        let id_column = CompactString::from(target.id_column()?);
        Some((fk_field.column.clone(), target, id_column))
    }

    fn table_expr(&self, entity: &EntityDef) -> String {
        match &entity.source {
            TableSource::Table(name) => self.dialect.quote(name),
            TableSource::Subquery(text) => normalize_subquery(text, self.dialect),
        }
    }
}

/// Relation paths referenced by the entity's virtual expressions and
/// computed projections.
fn expression_paths(entity: &EntityDef) -> Vec<RelPath> {
    let mut paths = Vec::new();
    for field in &entity.fields {
        if let Some(expr) = &field.expression {
            for token in resolve::reference_tokens(expr.template(true)) {
                let segments: Vec<&str> = token.split('.').collect();
                if segments.len() >= 2 {
                    paths.push(RelPath::from_segments(
                        segments[..segments.len() - 1].iter().copied(),
                    ));
                }
            }
        }
        if let Some(projection) = field.computed.as_ref().and_then(|c| c.projection.as_ref()) {
            paths.push(RelPath::from_segments([projection.relation.clone()]));
        }
    }
    paths
}

/// Splits a joined entity's fields: an explicit allow-list selects exactly
/// those plus the id field; otherwise the id field and, when present, the
/// conventional display-name field. Expression and computed fields are never
/// naively selected — they go to the deferred list.
fn select_fields(
    entity: &EntityDef,
    allow: Option<&[CompactString]>,
) -> (Vec<CompactString>, Vec<CompactString>) {
    let mut selected = Vec::new();
    let mut deferred = Vec::new();
    let mut route = |field: &FieldDef| {
        if field.is_plain() {
            if !selected.contains(&field.key) {
                selected.push(field.key.clone());
            }
        } else if !deferred.contains(&field.key) {
            deferred.push(field.key.clone());
        }
    };

    match allow {
        Some(keys) => {
            for key in keys {
                match entity.field_def(key) {
                    Some(field) => route(field),
                    None => tracing::warn!(
                        entity = %entity.name,
                        field = %key,
                        "trellis.plan.unknown_selected_field"
                    ),
                }
            }
            if let Some(id) = entity.field_def(&entity.id_field) {
                route(id);
            }
        }
        None => {
            if let Some(id) = entity.field_def(&entity.id_field) {
                route(id);
            }
            if let Some(display) = entity.display_field() {
                route(display);
            }
        }
    }
    (selected, deferred)
}

/// Prepares a virtual entity's subquery text for use as a join target:
/// re-quotes embedded identifiers for the active dialect, strips any
/// trailing alias (the planner re-aliases it), and parenthesizes a bare
/// SELECT.
pub(crate) fn normalize_subquery(text: &str, dialect: Dialect) -> String {
    let requoted = dialect.requote_fragment(text.trim());
    let stripped = strip_trailing_alias(&requoted);
    let trimmed = stripped.trim();
    if trimmed
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
    {
        format!("({trimmed})")
    } else {
        trimmed.to_string()
    }
}

/// Removes a trailing `AS alias` / bare alias after the final closing paren.
fn strip_trailing_alias(text: &str) -> String {
    let Some(pos) = text.rfind(')') else {
        return text.to_string();
    };
    let tail = text[pos + 1..].trim();
    if tail.is_empty() {
        return text.to_string();
    }
    let candidate = tail
        .strip_prefix("AS ")
        .or_else(|| tail.strip_prefix("as "))
        .unwrap_or(tail)
        .trim();
    let is_ident = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '"' || c == '[' || c == ']');
    if is_ident {
        text[..=pos].to_string()
    } else {
        text.to_string()
    }
}
