//! SQL fragments with positional parameters.
//!
//! Fragments always carry `?` placeholders; the assembler rewrites them into
//! the dialect's positional style in one pass once the statement is complete.

use smallvec::SmallVec;

use crate::value::Value;

/// A SQL fragment: statement text plus the values bound to its placeholders,
/// in order. Structural SQL and identifiers live in `text`; data values are
/// only ever appended through [`Sql::bind`].
#[derive(Debug, Clone, Default)]
pub struct Sql {
    pub text: String,
    pub params: SmallVec<[Value; 4]>,
}

impl Sql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fragment from literal SQL text. No parameters.
    pub fn raw(text: impl Into<String>) -> Self {
        Sql {
            text: text.into(),
            params: SmallVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Appends a `?` placeholder and the value bound to it.
    pub fn bind(mut self, value: Value) -> Self {
        self.text.push('?');
        self.params.push(value);
        self
    }

    /// Appends literal text.
    pub fn push(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Appends another fragment, merging text and parameters.
    pub fn append(mut self, other: Sql) -> Self {
        self.text.push_str(&other.text);
        self.params.extend(other.params);
        self
    }

    /// Wraps the fragment in parentheses.
    pub fn parenthesize(mut self) -> Self {
        self.text.insert(0, '(');
        self.text.push(')');
        self
    }

    /// Joins fragments with a separator, skipping empty ones.
    pub fn join<I>(parts: I, separator: &str) -> Sql
    where
        I: IntoIterator<Item = Sql>,
    {
        let mut out = Sql::new();
        for part in parts {
            if part.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.text.push_str(separator);
            }
            out = out.append(part);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_appends_placeholder_and_value() {
        let sql = Sql::raw("a = ").bind(Value::Integer(1));
        assert_eq!(sql.text, "a = ?");
        assert_eq!(sql.params.as_slice(), &[Value::Integer(1)]);
    }

    #[test]
    fn join_skips_empty_fragments() {
        let sql = Sql::join(
            [Sql::raw("a"), Sql::new(), Sql::raw("b").bind(Value::Bool(true))],
            " AND ",
        );
        assert_eq!(sql.text, "a AND b?");
        assert_eq!(sql.params.len(), 1);
    }

    #[test]
    fn append_preserves_param_order() {
        let sql = Sql::raw("x > ")
            .bind(Value::Integer(1))
            .append(Sql::raw(" AND y < ").bind(Value::Integer(2)));
        assert_eq!(sql.text, "x > ? AND y < ?");
        assert_eq!(
            sql.params.as_slice(),
            &[Value::Integer(1), Value::Integer(2)]
        );
    }
}
