//! Dynamic runtime values flowing through providers and projections.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{LiteralKind, TypeRef, TypeRegistry};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Uuid(Uuid),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Enum member, by name.
    Enum(String),
    Record(Record),
    List(Vec<Value>),
}

/// A structured value: field values in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub type_name: Arc<str>,
    pub fields: IndexMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: Arc::from(type_name),
            fields: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_owned(), value);
        self
    }

    /// Field by exact name, falling back to a case-insensitive match.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }
}

impl Value {
    /// Value a member of type `ty` holds when nothing was projected into it.
    #[must_use]
    pub fn default_for(ty: &TypeRef) -> Value {
        if ty.is_list() {
            Value::List(Vec::new())
        } else {
            Value::Null
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Field of a record value; `None` for non-records and missing fields.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|r| r.get(name))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Decimal::from(*i).to_f64(),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Ordering between two non-null scalars of compatible kinds. Numbers
    /// compare across representations; enum names compare with strings.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Value::Decimal(a), Value::Int(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Value::Float(_), Value::Int(_) | Value::Float(_) | Value::Decimal(_))
            | (Value::Int(_) | Value::Decimal(_), Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::String(a) | Value::Enum(a), Value::String(b) | Value::Enum(b)) => {
                Some(a.cmp(b))
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with null semantics: `null == null`, null never equals a value.
    #[must_use]
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Record(_) | Value::List(_), _) | (_, Value::Record(_) | Value::List(_)) => {
                self == other
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Total order used for sorting: nulls first, incomparable values equal.
    #[must_use]
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Build a value of type `ty` from JSON. Records get every declared member;
    /// members absent from the JSON take their default.
    ///
    /// # Errors
    /// `Error::TypeMismatch` when the JSON does not fit `ty`, `Error::UnknownType`
    /// for unregistered record types.
    pub fn from_json(registry: &TypeRegistry, ty: &TypeRef, json: &serde_json::Value) -> Result<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        match ty {
            TypeRef::Nullable(inner) => Self::from_json(registry, inner, json),
            TypeRef::Literal(kind) => literal_from_json(*kind, json),
            TypeRef::Collection(_, element) => {
                let items = json
                    .as_array()
                    .ok_or_else(|| mismatch(ty, json))?
                    .iter()
                    .map(|item| Self::from_json(registry, element, item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            TypeRef::Named(name) => {
                let object = json.as_object().ok_or_else(|| mismatch(ty, json))?;
                let mut record = Record::new(name);
                for member in registry.members(name)? {
                    let field = object.get(&*member.name).or_else(|| {
                        object
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(&member.name))
                            .map(|(_, v)| v)
                    });
                    let value = match field {
                        Some(v) => Self::from_json(registry, &member.ty, v)?,
                        None => Value::default_for(&member.ty),
                    };
                    record.fields.insert(member.name.to_string(), value);
                }
                Ok(Value::Record(record))
            }
            TypeRef::Object => Ok(Self::from_untyped_json(json)),
        }
    }

    /// Best-effort conversion without type information.
    #[must_use]
    pub fn from_untyped_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Self::from_untyped_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(Record {
                type_name: Arc::from("Object"),
                fields: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_untyped_json(v)))
                    .collect(),
            }),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Value::Decimal(d) => J::String(d.to_string()),
            Value::String(s) | Value::Enum(s) => J::String(s.clone()),
            Value::Uuid(u) => J::String(u.to_string()),
            Value::DateTime(dt) => J::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Date(d) => J::String(d.to_string()),
            Value::Time(t) => J::String(t.to_string()),
            Value::Record(r) => J::Object(
                r.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

fn mismatch(ty: &TypeRef, json: &serde_json::Value) -> Error {
    Error::TypeMismatch(format!("expected {ty}, found {json}"))
}

fn literal_from_json(kind: LiteralKind, json: &serde_json::Value) -> Result<Value> {
    let ty = TypeRef::Literal(kind);
    let value = match kind {
        LiteralKind::Bool => json.as_bool().map(Value::Bool),
        LiteralKind::I32 => json
            .as_i64()
            .filter(|i| i32::try_from(*i).is_ok())
            .map(Value::Int),
        LiteralKind::I64 => json.as_i64().map(Value::Int),
        LiteralKind::F64 => json.as_f64().map(Value::Float),
        LiteralKind::Decimal => match json {
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .ok()
                .map(Value::Decimal),
            serde_json::Value::String(s) => Decimal::from_str(s).ok().map(Value::Decimal),
            _ => None,
        },
        LiteralKind::String => json.as_str().map(|s| Value::String(s.to_owned())),
        LiteralKind::Enum => json.as_str().map(|s| Value::Enum(s.to_owned())),
        LiteralKind::Uuid => json
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Value::Uuid),
        LiteralKind::DateTime => json
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(Value::DateTime),
        LiteralKind::Date => json
            .as_str()
            .and_then(|s| s.parse::<NaiveDate>().ok())
            .map(Value::Date),
        LiteralKind::Time => json
            .as_str()
            .and_then(|s| s.parse::<NaiveTime>().ok())
            .map(Value::Time),
    };
    value.ok_or_else(|| mismatch(&ty, json))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::Enum(name) => f.write_str(name),
            Value::Record(r) => write!(f, "{{{}}}", r.type_name),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}
