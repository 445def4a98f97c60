//! Binds `$filter` and `$orderby`/`$skip`/`$top` to model-typed expressions.
//!
//! Every bound lambda uses the parameter name [`IT`]. Providers reject that
//! name, so the splicer renames it before execution.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use odata_query::ast::{self, CompareOperator};
use odata_query::{ODataOrderBy, SortDir};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::expr::{BinaryOp, Expr, Lambda, Parameter, QueryMethod, ScalarFunction};
use crate::types::{LiteralKind, TypeRef, TypeRegistry};
use crate::value::Value;

/// Lambda parameter name of bound filters and order keys.
pub const IT: &str = "$it";

/// Settings a filter is bound under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterContext {
    /// Guard member access and string functions against null operands.
    pub null_propagation: bool,
    /// Offset DateTime literals are normalised to; UTC when unset.
    pub time_zone: Option<FixedOffset>,
}

/// A `$filter` clause together with the element type it applies to.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOptions {
    pub clause: ast::Expr,
    pub element_type: Arc<str>,
    pub context: FilterContext,
}

impl FilterOptions {
    #[must_use]
    pub fn new(clause: ast::Expr, element_type: &str, context: FilterContext) -> Self {
        Self {
            clause,
            element_type: Arc::from(element_type),
            context,
        }
    }

    /// Bind to a predicate over the element type.
    ///
    /// # Errors
    /// See [`bind_filter`].
    pub fn bind(&self, registry: &TypeRegistry) -> Result<Lambda> {
        bind_filter(registry, &self.element_type, &self.clause, self.context)
    }
}

/// `$orderby`, `$skip` and `$top` of one level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub order_by: ODataOrderBy,
    pub skip: Option<u64>,
    pub top: Option<u64>,
}

impl QueryOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order_by.is_empty() && self.skip.is_none() && self.top.is_none()
    }

    /// Number of query-method calls [`QueryOptions::apply`] adds.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.order_by.len() + usize::from(self.skip.is_some()) + usize::from(self.top.is_some())
    }

    /// Compose `OrderBy`/`ThenBy...`, `Skip` and `Take` onto `source`, a
    /// sequence of `element_type`.
    ///
    /// # Errors
    /// `Error::UnresolvedMember` for unknown order keys; `InvalidLimit` for
    /// counts that do not fit the provider's integer range.
    pub fn apply(
        &self,
        registry: &TypeRegistry,
        element_type: &str,
        source: Expr,
        context: FilterContext,
    ) -> Result<Expr> {
        let binder = Binder::new(registry, element_type, context);
        let mut expr = source;
        for (idx, key) in self.order_by.keys().enumerate() {
            let lambda = Lambda::new(binder.it.clone(), binder.member_path(&key.field)?);
            let method = match (idx, key.dir) {
                (0, SortDir::Asc) => QueryMethod::OrderBy,
                (0, SortDir::Desc) => QueryMethod::OrderByDescending,
                (_, SortDir::Asc) => QueryMethod::ThenBy,
                (_, SortDir::Desc) => QueryMethod::ThenByDescending,
            };
            expr = Expr::call(method, vec![expr, Expr::Lambda(lambda)]);
        }
        if let Some(skip) = self.skip {
            expr = expr.skip(to_count(skip)?);
        }
        if let Some(top) = self.top {
            expr = expr.take(to_count(top)?);
        }
        Ok(expr)
    }
}

pub(crate) fn to_count(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::Query(odata_query::Error::InvalidLimit))
}

/// Bind a `$filter` AST to `$it => ...` over `element_type`.
///
/// # Errors
/// `Error::UnresolvedMember` for unknown members, `Error::TypeMismatch` when a
/// literal does not fit the member it is compared with, `Error::Unsupported`
/// for functions and collection navigation the binder does not translate.
pub fn bind_filter(
    registry: &TypeRegistry,
    element_type: &str,
    clause: &ast::Expr,
    context: FilterContext,
) -> Result<Lambda> {
    registry.get(element_type)?;
    let binder = Binder::new(registry, element_type, context);
    let body = binder.predicate(clause)?;
    Ok(Lambda::new(binder.it, body))
}

enum Operand {
    Typed(Expr),
    Literal(ast::Value),
}

struct Binder<'a> {
    registry: &'a TypeRegistry,
    it: Parameter,
    context: FilterContext,
}

impl<'a> Binder<'a> {
    fn new(registry: &'a TypeRegistry, element_type: &str, context: FilterContext) -> Self {
        Self {
            registry,
            it: Parameter::new(IT, TypeRef::named(element_type)),
            context,
        }
    }

    fn time_zone(&self) -> FixedOffset {
        self.context.time_zone.unwrap_or_else(|| Utc.fix())
    }

    fn predicate(&self, e: &ast::Expr) -> Result<Expr> {
        match e {
            ast::Expr::And(a, b) => Ok(self.predicate(a)?.and_also(self.predicate(b)?)),
            ast::Expr::Or(a, b) => Ok(self.predicate(a)?.or_else(self.predicate(b)?)),
            ast::Expr::Not(x) => Ok(Expr::Not(Box::new(self.predicate(x)?))),
            ast::Expr::Compare(l, op, r) => self.compare(l, *op, r),
            ast::Expr::In(l, list) => self.in_list(l, list),
            ast::Expr::Function(name, args) => {
                let call = self.function(name, args)?;
                require_bool(&call)?;
                Ok(call)
            }
            ast::Expr::Identifier(path) => {
                let member = self.member_path(path)?;
                require_bool(&member)?;
                Ok(Expr::binary(
                    BinaryOp::Eq,
                    member,
                    Expr::constant(Value::Bool(true), TypeRef::Literal(LiteralKind::Bool)),
                ))
            }
            ast::Expr::Value(ast::Value::Bool(b)) => Ok(Expr::constant(
                Value::Bool(*b),
                TypeRef::Literal(LiteralKind::Bool),
            )),
            ast::Expr::Value(other) => Err(Error::InvalidFilter(format!(
                "{other} literal used as a condition"
            ))),
        }
    }

    fn operand(&self, e: &ast::Expr) -> Result<Operand> {
        Ok(match e {
            ast::Expr::Identifier(path) => Operand::Typed(self.member_path(path)?),
            ast::Expr::Value(v) => Operand::Literal(v.clone()),
            ast::Expr::Function(name, args) => Operand::Typed(self.function(name, args)?),
            other => Operand::Typed(self.predicate(other)?),
        })
    }

    fn compare(&self, l: &ast::Expr, op: CompareOperator, r: &ast::Expr) -> Result<Expr> {
        let (left, right) = match (self.operand(l)?, self.operand(r)?) {
            (Operand::Typed(a), Operand::Typed(b)) => (a, b),
            (Operand::Typed(a), Operand::Literal(v)) => {
                let b = self.literal_for(&a.ty(), &v)?;
                (a, b)
            }
            (Operand::Literal(v), Operand::Typed(b)) => (self.literal_for(&b.ty(), &v)?, b),
            (Operand::Literal(a), Operand::Literal(b)) => (self.natural(&a)?, self.natural(&b)?),
        };
        Ok(Expr::binary(binary_op(op), left, right))
    }

    fn in_list(&self, l: &ast::Expr, list: &[ast::Expr]) -> Result<Expr> {
        let target = match self.operand(l)? {
            Operand::Typed(t) => t,
            Operand::Literal(v) => self.natural(&v)?,
        };
        let ty = target.ty();
        let mut out: Option<Expr> = None;
        for item in list {
            let candidate = match item {
                ast::Expr::Value(v) => self.literal_for(&ty, v)?,
                _ => {
                    return Err(Error::InvalidFilter(
                        "'in' accepts literal values only".to_owned(),
                    ));
                }
            };
            let eq = Expr::binary(BinaryOp::Eq, target.clone(), candidate);
            out = Some(match out {
                Some(acc) => acc.or_else(eq),
                None => eq,
            });
        }
        Ok(out.unwrap_or_else(|| {
            Expr::constant(Value::Bool(false), TypeRef::Literal(LiteralKind::Bool))
        }))
    }

    /// `A/B/C` relative to `$it`. With null propagation every intermediate
    /// reference is checked before the final member is read.
    fn member_path(&self, path: &str) -> Result<Expr> {
        let segments: Vec<&str> = path.split('/').map(str::trim).filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(Error::InvalidFilter(format!("empty member path '{path}'")));
        }

        let mut current = Expr::parameter(&self.it);
        let mut guards: Vec<Expr> = Vec::new();
        for (idx, segment) in segments.iter().enumerate() {
            let ty = current.ty();
            if ty.is_list() {
                return Err(Error::Unsupported(format!(
                    "navigating through collection '{}' in '{path}'",
                    segments[idx - 1]
                )));
            }
            let TypeRef::Named(type_name) = ty.strip_nullable() else {
                return Err(Error::InvalidFilter(format!(
                    "'{segment}' cannot be read from {ty} in '{path}'"
                )));
            };
            let member = self.registry.require_member(type_name, segment)?;
            if idx > 0 && self.context.null_propagation {
                guards.push(current.clone());
            }
            current = current.member(&member.name, member.ty.clone());
        }
        Ok(null_guarded(guards, current))
    }

    fn function(&self, name: &str, args: &[ast::Expr]) -> Result<Expr> {
        let function = match name.to_ascii_lowercase().as_str() {
            "contains" => ScalarFunction::Contains,
            "startswith" => ScalarFunction::StartsWith,
            "endswith" => ScalarFunction::EndsWith,
            "tolower" => ScalarFunction::ToLower,
            "toupper" => ScalarFunction::ToUpper,
            "length" => ScalarFunction::Length,
            _ => return Err(Error::Unsupported(format!("$filter function '{name}'"))),
        };

        match (function, args) {
            (
                ScalarFunction::Contains | ScalarFunction::StartsWith | ScalarFunction::EndsWith,
                [target, arg],
            ) => {
                let target = self.string_operand(target)?;
                let arg = self.string_operand(arg)?;
                let guard = self.needs_guard(&target).then(|| target.clone());
                let call = Expr::Function {
                    function,
                    args: vec![target, arg],
                };
                Ok(match guard {
                    Some(t) => {
                        let ty = t.ty();
                        Expr::binary(BinaryOp::Ne, t, Expr::null(ty)).and_also(call)
                    }
                    None => call,
                })
            }
            (ScalarFunction::ToLower | ScalarFunction::ToUpper | ScalarFunction::Length, [target]) => {
                let target = self.string_operand(target)?;
                let guard = self.needs_guard(&target).then(|| target.clone());
                let call = Expr::Function {
                    function,
                    args: vec![target],
                };
                Ok(match guard {
                    Some(t) => {
                        let ty = TypeRef::nullable(function.result_type());
                        Expr::condition(t.is_null_check(), Expr::null(ty.clone()), call, ty)
                    }
                    None => call,
                })
            }
            _ => Err(Error::InvalidFilter(format!(
                "wrong number of arguments for '{name}'"
            ))),
        }
    }

    fn needs_guard(&self, target: &Expr) -> bool {
        self.context.null_propagation && !matches!(target, Expr::Constant(..))
    }

    fn string_operand(&self, e: &ast::Expr) -> Result<Expr> {
        match self.operand(e)? {
            Operand::Typed(t) => match t.ty().literal_kind() {
                Some(LiteralKind::String | LiteralKind::Enum) => Ok(t),
                _ => Err(Error::TypeMismatch(format!("{t} is not a string"))),
            },
            Operand::Literal(v) => {
                self.literal_for(&TypeRef::Literal(LiteralKind::String), &v)
            }
        }
    }

    /// Literal typed after the expression it is compared with.
    fn literal_for(&self, target: &TypeRef, v: &ast::Value) -> Result<Expr> {
        if matches!(v, ast::Value::Null) {
            return Ok(Expr::null(target.clone()));
        }
        let Some(kind) = target.literal_kind() else {
            return Err(Error::TypeMismatch(format!(
                "cannot compare {target} with a {v} literal"
            )));
        };
        Ok(Expr::constant(
            coerce(kind, v, self.time_zone())?,
            TypeRef::Literal(kind),
        ))
    }

    /// Literal typed after itself.
    fn natural(&self, v: &ast::Value) -> Result<Expr> {
        let kind = match v {
            ast::Value::Null => return Ok(Expr::null(TypeRef::Object)),
            ast::Value::Bool(_) => LiteralKind::Bool,
            ast::Value::Number(n) if is_integral(n) => LiteralKind::I64,
            ast::Value::Number(_) => LiteralKind::Decimal,
            ast::Value::Uuid(_) => LiteralKind::Uuid,
            ast::Value::DateTime(_) => LiteralKind::DateTime,
            ast::Value::Date(_) => LiteralKind::Date,
            ast::Value::Time(_) => LiteralKind::Time,
            ast::Value::String(_) => LiteralKind::String,
        };
        self.literal_for(&TypeRef::Literal(kind), v)
    }
}

fn require_bool(expr: &Expr) -> Result<()> {
    match expr.ty().literal_kind() {
        Some(LiteralKind::Bool) => Ok(()),
        _ => Err(Error::TypeMismatch(format!("{expr} is not a boolean"))),
    }
}

/// `IIF(g1 == null OrElse g2 == null ..., null, expr)`; `expr` itself when
/// there is nothing to guard.
pub(crate) fn null_guarded(guards: Vec<Expr>, expr: Expr) -> Expr {
    let test = guards
        .into_iter()
        .map(Expr::is_null_check)
        .reduce(Expr::or_else);
    match test {
        Some(test) => {
            let ty = TypeRef::nullable(expr.ty());
            Expr::condition(test, Expr::null(ty.clone()), expr, ty)
        }
        None => expr,
    }
}

fn binary_op(op: CompareOperator) -> BinaryOp {
    match op {
        CompareOperator::Eq => BinaryOp::Eq,
        CompareOperator::Ne => BinaryOp::Ne,
        CompareOperator::Gt => BinaryOp::Gt,
        CompareOperator::Ge => BinaryOp::Ge,
        CompareOperator::Lt => BinaryOp::Lt,
        CompareOperator::Le => BinaryOp::Le,
    }
}

fn is_integral(n: &BigDecimal) -> bool {
    n.with_scale(0) == *n
}

fn bigdecimal_to_decimal(n: &BigDecimal) -> Result<Decimal> {
    let s = n.normalized().to_string();
    Decimal::from_str_exact(&s)
        .or_else(|_| Decimal::from_str(&s))
        .or_else(|_| Decimal::from_scientific(&s))
        .map_err(|_| Error::TypeMismatch(format!("{n} does not fit a decimal")))
}

fn mismatch(kind: LiteralKind, got: &ast::Value) -> Error {
    Error::TypeMismatch(format!("expected {}, got {got} literal", kind.name()))
}

/// Convert a `$filter` literal to the runtime value of a member of `kind`.
/// DateTime literals are shifted into `tz`; compared with a `Date` member they
/// become the local calendar date.
fn coerce(kind: LiteralKind, v: &ast::Value, tz: FixedOffset) -> Result<Value> {
    use ast::Value as V;
    Ok(match (kind, v) {
        (_, V::Null) => Value::Null,
        (LiteralKind::Bool, V::Bool(b)) => Value::Bool(*b),
        (LiteralKind::I32 | LiteralKind::I64, V::Number(n)) if is_integral(n) => {
            let i = n.to_i64().ok_or_else(|| mismatch(kind, v))?;
            if kind == LiteralKind::I32 && i32::try_from(i).is_err() {
                return Err(mismatch(kind, v));
            }
            Value::Int(i)
        }
        (LiteralKind::F64, V::Number(n)) => Value::Float(n.to_f64().ok_or_else(|| mismatch(kind, v))?),
        (LiteralKind::Decimal, V::Number(n)) => Value::Decimal(bigdecimal_to_decimal(n)?),
        (LiteralKind::String, V::String(s)) => Value::String(s.clone()),
        (LiteralKind::Enum, V::String(s)) => Value::Enum(s.clone()),
        (LiteralKind::Uuid, V::Uuid(u)) => Value::Uuid(*u),
        (LiteralKind::Uuid, V::String(s)) => {
            Value::Uuid(uuid::Uuid::parse_str(s).map_err(|_| mismatch(kind, v))?)
        }
        (LiteralKind::DateTime, V::DateTime(dt)) => Value::DateTime(dt.with_timezone(&tz)),
        (LiteralKind::DateTime, V::Date(d)) => {
            let local = d
                .and_time(NaiveTime::MIN)
                .and_local_timezone(tz)
                .single()
                .ok_or_else(|| mismatch(kind, v))?;
            Value::DateTime(local)
        }
        (LiteralKind::DateTime, V::String(s)) => Value::DateTime(
            DateTime::parse_from_rfc3339(s)
                .map_err(|_| mismatch(kind, v))?
                .with_timezone(&tz),
        ),
        (LiteralKind::Date, V::Date(d)) => Value::Date(*d),
        (LiteralKind::Date, V::DateTime(dt)) => Value::Date(dt.with_timezone(&tz).date_naive()),
        (LiteralKind::Time, V::Time(t)) => Value::Time(*t),
        _ => return Err(mismatch(kind, v)),
    })
}
