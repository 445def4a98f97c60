#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! OData query-option AST consumed by the projection engine.
//!
//! Nothing here executes a query. The types describe what a client asked for
//! (`$filter`, `$orderby`, `$select`/`$expand`, `$top`, `$skip`, `$count`,
//! `$search`) keyed by *model* member names.
pub mod limits;
pub mod options;
pub mod select_expand;

pub use limits::ODataLimits;
pub use options::{NextPage, ODataFeature, ODataQueryOptions};
pub use select_expand::{ExpandItem, PathSelectItem, SelectExpandClause, SelectItem};

pub mod ast {
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Expr {
        And(Box<Expr>, Box<Expr>),
        Or(Box<Expr>, Box<Expr>),
        Not(Box<Expr>),
        Compare(Box<Expr>, CompareOperator, Box<Expr>),
        In(Box<Expr>, Vec<Expr>),
        Function(String, Vec<Expr>),
        /// Member path relative to the filtered element, segments separated by `/`.
        Identifier(String),
        Value(Value),
    }

    impl Expr {
        /// Reference a member (or `/`-separated member path) of the filtered element.
        #[must_use]
        pub fn field(path: &str) -> Expr {
            Expr::Identifier(path.to_owned())
        }

        /// Combine two expressions with AND: `expr1 and expr2`
        ///
        /// # Example
        ///
        /// ```rust,ignore
        /// let filter = Expr::field("Value").gt(10).and(Expr::field("Value").lt(1000));
        /// ```
        #[must_use]
        pub fn and(self, other: Expr) -> Expr {
            Expr::And(Box::new(self), Box::new(other))
        }

        /// Combine two expressions with OR: `expr1 or expr2`
        #[must_use]
        pub fn or(self, other: Expr) -> Expr {
            Expr::Or(Box::new(self), Box::new(other))
        }

        /// Negate an expression: `not expr`
        #[must_use]
        #[allow(clippy::should_implement_trait)]
        pub fn not(self) -> Expr {
            !self
        }

        #[must_use]
        pub fn eq<V: IntoODataValue>(self, value: V) -> Expr {
            self.compare(CompareOperator::Eq, value)
        }

        #[must_use]
        pub fn ne<V: IntoODataValue>(self, value: V) -> Expr {
            self.compare(CompareOperator::Ne, value)
        }

        #[must_use]
        pub fn gt<V: IntoODataValue>(self, value: V) -> Expr {
            self.compare(CompareOperator::Gt, value)
        }

        #[must_use]
        pub fn ge<V: IntoODataValue>(self, value: V) -> Expr {
            self.compare(CompareOperator::Ge, value)
        }

        #[must_use]
        pub fn lt<V: IntoODataValue>(self, value: V) -> Expr {
            self.compare(CompareOperator::Lt, value)
        }

        #[must_use]
        pub fn le<V: IntoODataValue>(self, value: V) -> Expr {
            self.compare(CompareOperator::Le, value)
        }

        /// `field in (v1, v2, ...)`
        #[must_use]
        pub fn in_list<V: IntoODataValue>(self, values: impl IntoIterator<Item = V>) -> Expr {
            Expr::In(
                Box::new(self),
                values
                    .into_iter()
                    .map(|v| Expr::Value(v.into_odata_value()))
                    .collect(),
            )
        }

        /// `contains(field, 'value')`
        #[must_use]
        pub fn contains(self, substring: &str) -> Expr {
            Expr::Function(
                "contains".to_owned(),
                vec![self, Expr::Value(Value::String(substring.to_owned()))],
            )
        }

        /// `startswith(field, 'prefix')`
        #[must_use]
        pub fn startswith(self, prefix: &str) -> Expr {
            Expr::Function(
                "startswith".to_owned(),
                vec![self, Expr::Value(Value::String(prefix.to_owned()))],
            )
        }

        /// `endswith(field, 'suffix')`
        #[must_use]
        pub fn endswith(self, suffix: &str) -> Expr {
            Expr::Function(
                "endswith".to_owned(),
                vec![self, Expr::Value(Value::String(suffix.to_owned()))],
            )
        }

        fn compare<V: IntoODataValue>(self, op: CompareOperator, value: V) -> Expr {
            Expr::Compare(
                Box::new(self),
                op,
                Box::new(Expr::Value(value.into_odata_value())),
            )
        }

        /// Number of AST nodes, used for complexity budgets.
        #[must_use]
        pub fn node_count(&self) -> usize {
            match self {
                Expr::Value(_) | Expr::Identifier(_) => 1,
                Expr::Not(x) => 1 + x.node_count(),
                Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
                    1 + a.node_count() + b.node_count()
                }
                Expr::In(a, list) => 1 + a.node_count() + list.iter().map(Expr::node_count).sum::<usize>(),
                Expr::Function(_, args) => 1 + args.iter().map(Expr::node_count).sum::<usize>(),
            }
        }
    }

    impl std::ops::Not for Expr {
        type Output = Expr;

        fn not(self) -> Self::Output {
            Expr::Not(Box::new(self))
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum CompareOperator {
        Eq,
        Ne,
        Gt,
        Ge,
        Lt,
        Le,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum Value {
        Null,
        Bool(bool),
        Number(BigDecimal),
        Uuid(Uuid),
        DateTime(DateTime<Utc>),
        Date(NaiveDate),
        Time(NaiveTime),
        String(String),
    }

    impl std::fmt::Display for Value {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Value::Null => write!(f, "null"),
                Value::Bool(_) => write!(f, "bool"),
                Value::Number(_) => write!(f, "number"),
                Value::Uuid(_) => write!(f, "uuid"),
                Value::DateTime(_) => write!(f, "datetime"),
                Value::Date(_) => write!(f, "date"),
                Value::Time(_) => write!(f, "time"),
                Value::String(_) => write!(f, "string"),
            }
        }
    }

    /// Trait for types that can be converted to `OData` AST values.
    pub trait IntoODataValue {
        /// Convert this value into an `OData` AST value.
        fn into_odata_value(self) -> Value;
    }

    impl IntoODataValue for Value {
        fn into_odata_value(self) -> Value {
            self
        }
    }

    impl IntoODataValue for bool {
        fn into_odata_value(self) -> Value {
            Value::Bool(self)
        }
    }

    impl IntoODataValue for Uuid {
        fn into_odata_value(self) -> Value {
            Value::Uuid(self)
        }
    }

    impl IntoODataValue for String {
        fn into_odata_value(self) -> Value {
            Value::String(self)
        }
    }

    impl IntoODataValue for &str {
        fn into_odata_value(self) -> Value {
            Value::String(self.to_owned())
        }
    }

    impl IntoODataValue for i32 {
        fn into_odata_value(self) -> Value {
            Value::Number(self.into())
        }
    }

    impl IntoODataValue for i64 {
        fn into_odata_value(self) -> Value {
            Value::Number(self.into())
        }
    }

    impl IntoODataValue for u64 {
        fn into_odata_value(self) -> Value {
            Value::Number(self.into())
        }
    }

    impl IntoODataValue for BigDecimal {
        fn into_odata_value(self) -> Value {
            Value::Number(self)
        }
    }

    impl IntoODataValue for DateTime<Utc> {
        fn into_odata_value(self) -> Value {
            Value::DateTime(self)
        }
    }

    impl IntoODataValue for NaiveDate {
        fn into_odata_value(self) -> Value {
            Value::Date(self)
        }
    }

    impl IntoODataValue for NaiveTime {
        fn into_odata_value(self) -> Value {
            Value::Time(self)
        }
    }
}

// Ordering primitives
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

/// One `$orderby` key. `field` may be a `/`-separated member path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct ODataOrderBy(pub Vec<OrderKey>);

impl ODataOrderBy {
    pub fn empty() -> Self {
        Self(vec![])
    }

    pub fn asc(field: &str) -> Self {
        Self::empty().then_by(field, SortDir::Asc)
    }

    pub fn desc(field: &str) -> Self {
        Self::empty().then_by(field, SortDir::Desc)
    }

    /// Append a secondary key.
    pub fn then_by(mut self, field: &str, dir: SortDir) -> Self {
        self.0.push(OrderKey {
            field: field.to_owned(),
            dir,
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &OrderKey> {
        self.0.iter()
    }
}

// Display trait for human-readable orderby representation
impl std::fmt::Display for ODataOrderBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }

        let formatted: Vec<String> = self
            .0
            .iter()
            .map(|key| {
                let dir_str = match key.dir {
                    SortDir::Asc => "asc",
                    SortDir::Desc => "desc",
                };
                format!("{} {}", key.field, dir_str)
            })
            .collect();

        write!(f, "{}", formatted.join(", "))
    }
}

/// Errors raised while validating or converting query options.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid $filter: {0}")]
    InvalidFilter(String),

    #[error("unsupported $orderby field: {0}")]
    InvalidOrderByField(String),

    #[error("invalid $expand: {0}")]
    InvalidExpand(String),

    #[error("INVALID_LIMIT")]
    InvalidLimit,

    #[error("OData parsing unavailable: {0}")]
    ParsingUnavailable(&'static str),
}


#[cfg(feature = "with-odata-params")]
mod convert_odata_params {
    use super::ast::{CompareOperator, Expr, Value};
    use odata_params::filters as od;

    impl From<od::CompareOperator> for CompareOperator {
        fn from(op: od::CompareOperator) -> Self {
            use od::CompareOperator::{
                Equal, GreaterOrEqual, GreaterThan, LessOrEqual, LessThan, NotEqual,
            };
            match op {
                Equal => CompareOperator::Eq,
                NotEqual => CompareOperator::Ne,
                GreaterThan => CompareOperator::Gt,
                GreaterOrEqual => CompareOperator::Ge,
                LessThan => CompareOperator::Lt,
                LessOrEqual => CompareOperator::Le,
            }
        }
    }

    impl From<od::Value> for Value {
        fn from(v: od::Value) -> Self {
            match v {
                od::Value::Null => Value::Null,
                od::Value::Bool(b) => Value::Bool(b),
                od::Value::Number(n) => Value::Number(n),
                od::Value::Uuid(u) => Value::Uuid(u),
                od::Value::DateTime(dt) => Value::DateTime(dt),
                od::Value::Date(d) => Value::Date(d),
                od::Value::Time(t) => Value::Time(t),
                od::Value::String(s) => Value::String(s),
            }
        }
    }

    impl From<od::Expr> for Expr {
        fn from(e: od::Expr) -> Self {
            use od::Expr::{And, Compare, Function, Identifier, In, Not, Or, Value};
            match e {
                And(a, b) => Expr::And(Box::new((*a).into()), Box::new((*b).into())),
                Or(a, b) => Expr::Or(Box::new((*a).into()), Box::new((*b).into())),
                Not(x) => Expr::Not(Box::new((*x).into())),
                Compare(l, op, r) => {
                    Expr::Compare(Box::new((*l).into()), op.into(), Box::new((*r).into()))
                }
                In(l, list) => Expr::In(
                    Box::new((*l).into()),
                    list.into_iter().map(Into::into).collect(),
                ),
                Function(n, args) => Expr::Function(n, args.into_iter().map(Into::into).collect()),
                Identifier(s) => Expr::Identifier(s),
                Value(v) => Expr::Value(v.into()),
            }
        }
    }
}

/// Parse a raw `$filter` string into the AST.
///
/// # Errors
/// - `Error::InvalidFilter` if the filter string is malformed
/// - `Error::ParsingUnavailable` if the `with-odata-params` feature is disabled
#[cfg(feature = "with-odata-params")]
pub fn parse_filter_string(raw: &str) -> Result<ast::Expr, Error> {
    let parsed = odata_params::filters::parse_str(raw)
        .map_err(|e| Error::InvalidFilter(format!("{e:?}")))?;
    Ok(parsed.into())
}

/// Parse a raw `$filter` string into the AST.
///
/// This stub is compiled when the `with-odata-params` feature is disabled.
///
/// # Errors
///
/// Always returns `Error::ParsingUnavailable`.
#[cfg(not(feature = "with-odata-params"))]
pub fn parse_filter_string(_raw: &str) -> Result<ast::Expr, Error> {
    Err(Error::ParsingUnavailable(
        "OData filter parsing requires 'with-odata-params' feature",
    ))
}
