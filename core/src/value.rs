//! Store-side values bound to SQL statements.

use serde_json::{Number, Value as Json};

/// A value bound as a positional SQL parameter.
///
/// This is the store-side representation: everything a field codec produces
/// for binding, and everything a row read back from the engine contains.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Default store→wire conversion, used when a field declares no codec.
    pub fn into_json(self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Integer(n) => Json::Number(n.into()),
            Value::Real(f) => Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s),
            Value::Blob(b) => Json::Array(b.into_iter().map(|x| Json::Number(x.into())).collect()),
            Value::Bool(b) => Json::Bool(b),
        }
    }

    /// Default wire→store conversion, used when a field declares no codec.
    ///
    /// JSON containers serialize to their text form; the engine sees them as
    /// opaque strings, same as a custom codec would produce.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Real(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
