//! Identifier quoting and statement shaping per target dialect.
//!
//! Everything dialect-specific funnels through this one enum: quoting,
//! placeholder finalization, pagination clauses, identity retrieval, and the
//! error-text signatures of keyed-insert trigger conflicts.

/// Supported target dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Bracket-quoted identifiers, `@pN` placeholders, trigger-sensitive
    /// keyed inserts.
    SqlServer,
    /// ANSI double-quoted identifiers, `$N` placeholders.
    Postgres,
    /// ANSI double-quoted identifiers, positional `?` placeholders.
    #[default]
    Sqlite,
}

/// Error-text fragments that identify a keyed insert rejected because the
/// target table has active triggers. Matching is case-insensitive.
const TRIGGER_CONFLICT_PHRASES: &[&str] = &[
    "cannot have any enabled triggers",
    "output clause without into",
];

impl Dialect {
    /// Quotes a single identifier, escaping embedded closing quotes.
    pub fn quote(&self, ident: &str) -> String {
        let mut out = String::with_capacity(ident.len() + 2);
        self.quote_into(&mut out, ident);
        out
    }

    pub fn quote_into(&self, buf: &mut String, ident: &str) {
        match self {
            Dialect::SqlServer => {
                buf.push('[');
                for c in ident.chars() {
                    buf.push(c);
                    if c == ']' {
                        buf.push(']');
                    }
                }
                buf.push(']');
            }
            Dialect::Postgres | Dialect::Sqlite => {
                buf.push('"');
                for c in ident.chars() {
                    buf.push(c);
                    if c == '"' {
                        buf.push('"');
                    }
                }
                buf.push('"');
            }
        }
    }

    /// Renders `alias.column` with both parts quoted.
    pub fn qualify(&self, alias: &str, column: &str) -> String {
        let mut out = String::with_capacity(alias.len() + column.len() + 5);
        self.quote_into(&mut out, alias);
        out.push('.');
        self.quote_into(&mut out, column);
        out
    }

    /// Normalizes a hand-written SQL fragment: any identifier already wrapped
    /// in brackets or ANSI double quotes is re-quoted for this dialect.
    ///
    /// Idempotent — an already-correct fragment passes through byte-identical,
    /// and nothing is ever double-wrapped. Single-quoted string literals are
    /// copied verbatim.
    pub fn requote_fragment(&self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len());
        let chars: Vec<char> = fragment.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '\'' => {
                    // string literal, '' escapes a quote
                    out.push('\'');
                    i += 1;
                    while i < chars.len() {
                        out.push(chars[i]);
                        if chars[i] == '\'' {
                            if i + 1 < chars.len() && chars[i + 1] == '\'' {
                                out.push('\'');
                                i += 2;
                                continue;
                            }
                            i += 1;
                            break;
                        }
                        i += 1;
                    }
                }
                '[' => {
                    let (ident, next) = read_quoted(&chars, i + 1, ']');
                    self.quote_into(&mut out, &ident);
                    i = next;
                }
                '"' => {
                    let (ident, next) = read_quoted(&chars, i + 1, '"');
                    self.quote_into(&mut out, &ident);
                    i = next;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        out
    }

    /// Rewrites `?` placeholders into this dialect's positional style,
    /// numbering from 1. Quoted identifiers and string literals are skipped.
    pub fn finalize_placeholders(&self, sql: &str) -> String {
        if matches!(self, Dialect::Sqlite) {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 16);
        let mut index = 1usize;
        let mut guard: Option<char> = None;

        for c in sql.chars() {
            match guard {
                Some(close) => {
                    out.push(c);
                    if c == close {
                        guard = None;
                    }
                }
                None => match c {
                    '\'' => {
                        out.push(c);
                        guard = Some('\'');
                    }
                    '"' => {
                        out.push(c);
                        guard = Some('"');
                    }
                    '[' => {
                        out.push(c);
                        guard = Some(']');
                    }
                    '?' => {
                        match self {
                            Dialect::SqlServer => out.push_str(&format!("@p{index}")),
                            Dialect::Postgres => out.push_str(&format!("${index}")),
                            Dialect::Sqlite => unreachable!(),
                        }
                        index += 1;
                    }
                    c => out.push(c),
                },
            }
        }
        out
    }

    /// Renders the pagination suffix. SQL Server requires an ORDER BY in the
    /// statement, which the assembler always provides.
    pub fn pagination(&self, limit: Option<u64>, offset: u64) -> String {
        if limit.is_none() && offset == 0 {
            return String::new();
        }
        match self {
            Dialect::SqlServer => {
                let mut out = format!(" OFFSET {offset} ROWS");
                if let Some(n) = limit {
                    out.push_str(&format!(" FETCH NEXT {n} ROWS ONLY"));
                }
                out
            }
            Dialect::Postgres => {
                let mut out = String::new();
                if let Some(n) = limit {
                    out.push_str(&format!(" LIMIT {n}"));
                }
                if offset > 0 {
                    out.push_str(&format!(" OFFSET {offset}"));
                }
                out
            }
            Dialect::Sqlite => match limit {
                Some(n) => {
                    if offset > 0 {
                        format!(" LIMIT {n} OFFSET {offset}")
                    } else {
                        format!(" LIMIT {n}")
                    }
                }
                // SQLite has no bare OFFSET
                None => format!(" LIMIT -1 OFFSET {offset}"),
            },
        }
    }

    /// Statement retrieving the key generated by the last insert on the same
    /// connection, aliased as `id`.
    pub fn last_identity_sql(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "SELECT @@IDENTITY AS [id]",
            Dialect::Postgres => "SELECT LASTVAL() AS \"id\"",
            Dialect::Sqlite => "SELECT LAST_INSERT_ROWID() AS \"id\"",
        }
    }

    /// Whether an execution error message identifies a keyed insert rejected
    /// by active triggers. Only SQL Server inserts carry this failure mode.
    pub fn is_trigger_conflict(&self, message: &str) -> bool {
        if !matches!(self, Dialect::SqlServer) {
            return false;
        }
        let lower = message.to_lowercase();
        TRIGGER_CONFLICT_PHRASES.iter().any(|p| lower.contains(p))
    }
}

/// Reads characters up to an unescaped `close`, treating a doubled `close` as
/// an escaped literal. Returns the unescaped content and the index after the
/// closing character.
fn read_quoted(chars: &[char], start: usize, close: char) -> (String, usize) {
    let mut ident = String::new();
    let mut i = start;
    while i < chars.len() {
        if chars[i] == close {
            if i + 1 < chars.len() && chars[i + 1] == close {
                ident.push(close);
                i += 2;
                continue;
            }
            return (ident, i + 1);
        }
        ident.push(chars[i]);
        i += 1;
    }
    (ident, i)
}
