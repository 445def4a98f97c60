//! Tree-walking interpreter used by the in-memory provider.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{BinaryOp, Expr, Lambda, QueryMethod, ScalarFunction};
use crate::error::{Error, Result};
use crate::types::{LiteralKind, TypeRef};
use crate::value::{Record, Value};

/// Evaluates expressions against one in-memory source sequence.
pub struct Interpreter<'a> {
    source: &'a [Value],
    scope: Vec<(Arc<str>, Value)>,
}

impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(source: &'a [Value]) -> Self {
        Self {
            source,
            scope: Vec::new(),
        }
    }

    /// Evaluate an expression that produces a sequence.
    ///
    /// # Errors
    /// `Error::Evaluation` when the expression does not yield a sequence or
    /// any step fails.
    pub fn sequence(&mut self, expr: &Expr) -> Result<Vec<Value>> {
        match self.eval(expr)? {
            Value::List(items) => Ok(items),
            other => Err(Error::Evaluation(format!(
                "expected a sequence from {expr}, got {other}"
            ))),
        }
    }

    /// # Errors
    /// `Error::Evaluation` on null dereference, unbound parameters, or
    /// operands of the wrong kind.
    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Source(_) => Ok(Value::List(self.source.to_vec())),
            Expr::Parameter(p) => self
                .scope
                .iter()
                .rev()
                .find(|(name, _)| *name == p.name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::Evaluation(format!("unbound parameter {}", p.name))),
            Expr::Constant(value, _) => Ok(value.clone()),
            Expr::Member { target, member, .. } => {
                let target_value = self.eval(target)?;
                match target_value {
                    Value::Record(record) => record.get(member).cloned().ok_or_else(|| {
                        Error::Evaluation(format!(
                            "type {} has no member {member}",
                            record.type_name
                        ))
                    }),
                    Value::Null => Err(Error::Evaluation(format!(
                        "null reference reading {member} in {expr}"
                    ))),
                    other => Err(Error::Evaluation(format!(
                        "cannot read {member} from {other}"
                    ))),
                }
            }
            Expr::MemberInit { ty, bindings } => {
                let type_name = ty.type_name().map_or("Object", |n| &**n);
                let mut record = Record::new(type_name);
                for b in bindings {
                    let value = self.eval(&b.expr)?;
                    record.fields.insert(b.member.to_string(), value);
                }
                Ok(Value::Record(record))
            }
            Expr::Lambda(l) => Err(Error::Evaluation(format!(
                "lambda {l} cannot be evaluated without an argument"
            ))),
            Expr::Call { method, args, .. } => self.call(*method, args, expr),
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Not(x) => match self.eval(x)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::Evaluation(format!("Not applied to {other}"))),
            },
            Expr::Condition {
                test,
                if_true,
                if_false,
                ..
            } => {
                if self.truthy(test)? {
                    self.eval(if_true)
                } else {
                    self.eval(if_false)
                }
            }
            Expr::Convert { operand, ty } => convert(self.eval(operand)?, ty),
            Expr::Function { function, args } => self.function(*function, args),
        }
    }

    fn truthy(&mut self, expr: &Expr) -> Result<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(Error::Evaluation(format!("expected a boolean, got {other}"))),
        }
    }

    fn apply(&mut self, lambda: &Lambda, arg: Value) -> Result<Value> {
        let depth = self.scope.len();
        self.scope.push((lambda.parameter.name.clone(), arg));
        let result = self.eval(&lambda.body);
        self.scope.truncate(depth);
        result
    }

    fn call(&mut self, method: QueryMethod, args: &[Expr], whole: &Expr) -> Result<Value> {
        if method.is_ordering() {
            return self.ordered(whole);
        }
        let source = args
            .first()
            .ok_or_else(|| Error::Evaluation(format!("{} without a source", method.name())))?;
        let items = match self.eval(source)? {
            Value::List(items) => items,
            Value::Null => {
                return Err(Error::Evaluation(format!(
                    "null sequence passed to {}",
                    method.name()
                )));
            }
            other => {
                return Err(Error::Evaluation(format!(
                    "{} applied to non-sequence {other}",
                    method.name()
                )));
            }
        };

        match method {
            QueryMethod::Where => {
                let predicate = lambda_arg(args, method)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if self.apply(predicate, item.clone())?.as_bool() == Some(true) {
                        out.push(item);
                    }
                }
                Ok(Value::List(out))
            }
            QueryMethod::Select => {
                let selector = lambda_arg(args, method)?;
                let out = items
                    .into_iter()
                    .map(|item| self.apply(selector, item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(out))
            }
            QueryMethod::Skip => {
                let n = self.count_arg(args, method)?;
                Ok(Value::List(items.into_iter().skip(n).collect()))
            }
            QueryMethod::Take => {
                let n = self.count_arg(args, method)?;
                Ok(Value::List(items.into_iter().take(n).collect()))
            }
            QueryMethod::ToList | QueryMethod::ToArray | QueryMethod::AsQueryable => {
                Ok(Value::List(items))
            }
            QueryMethod::OrderBy
            | QueryMethod::OrderByDescending
            | QueryMethod::ThenBy
            | QueryMethod::ThenByDescending => Err(Error::Evaluation(format!(
                "unexpected ordering call {whole}"
            ))),
        }
    }

    /// `OrderBy(..).ThenBy(..)...` is evaluated as one stable sort on a
    /// composite key.
    fn ordered(&mut self, expr: &Expr) -> Result<Value> {
        let mut keys: Vec<(&Lambda, bool)> = Vec::new();
        let mut current = expr;
        let base = loop {
            let Expr::Call { method, args, .. } = current else {
                return Err(Error::Evaluation(format!("{expr} has no OrderBy")));
            };
            if !method.is_ordering() {
                return Err(Error::Evaluation(format!("ThenBy without OrderBy in {expr}")));
            }
            let descending = matches!(
                method,
                QueryMethod::OrderByDescending | QueryMethod::ThenByDescending
            );
            keys.push((lambda_arg(args, *method)?, descending));
            let source = args
                .first()
                .ok_or_else(|| Error::Evaluation(format!("{} without a source", method.name())))?;
            if matches!(method, QueryMethod::OrderBy | QueryMethod::OrderByDescending) {
                break source;
            }
            current = source;
        };
        keys.reverse();

        let items = self.sequence(base)?;
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let mut k = Vec::with_capacity(keys.len());
            for (lambda, _) in &keys {
                k.push(self.apply(lambda, item.clone())?);
            }
            keyed.push((k, item));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            keys.iter()
                .zip(a.iter().zip(b.iter()))
                .map(|((_, desc), (x, y))| {
                    let ord = x.sort_cmp(y);
                    if *desc { ord.reverse() } else { ord }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(Value::List(keyed.into_iter().map(|(_, item)| item).collect()))
    }

    fn count_arg(&mut self, args: &[Expr], method: QueryMethod) -> Result<usize> {
        let arg = args
            .get(1)
            .ok_or_else(|| Error::Evaluation(format!("{} without a count", method.name())))?;
        let n = self
            .eval(arg)?
            .as_i64()
            .ok_or_else(|| Error::Evaluation(format!("{} count is not an integer", method.name())))?;
        usize::try_from(n)
            .map_err(|_| Error::Evaluation(format!("{} count {n} is negative", method.name())))
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value> {
        match op {
            BinaryOp::AndAlso => Ok(Value::Bool(self.truthy(left)? && self.truthy(right)?)),
            BinaryOp::OrElse => Ok(Value::Bool(self.truthy(left)? || self.truthy(right)?)),
            BinaryOp::Eq => Ok(Value::Bool(self.eval(left)?.equals(&self.eval(right)?))),
            BinaryOp::Ne => Ok(Value::Bool(!self.eval(left)?.equals(&self.eval(right)?))),
            BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let Some(ord) = l.compare(&r) else {
                    // Lifted comparison: anything involving null is false.
                    return Ok(Value::Bool(false));
                };
                Ok(Value::Bool(match op {
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Ge => ord != Ordering::Less,
                    BinaryOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                }))
            }
        }
    }

    fn function(&mut self, function: ScalarFunction, args: &[Expr]) -> Result<Value> {
        let values = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>>>()?;
        let text = |idx: usize| text_arg(&values, idx, function);
        Ok(match function {
            ScalarFunction::Contains => Value::Bool(text(0)?.contains(text(1)?)),
            ScalarFunction::StartsWith => Value::Bool(text(0)?.starts_with(text(1)?)),
            ScalarFunction::EndsWith => Value::Bool(text(0)?.ends_with(text(1)?)),
            ScalarFunction::ToLower => Value::String(text(0)?.to_lowercase()),
            ScalarFunction::ToUpper => Value::String(text(0)?.to_uppercase()),
            ScalarFunction::Length => {
                let len = text(0)?.chars().count();
                Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
            }
        })
    }
}

fn text_arg(values: &[Value], idx: usize, function: ScalarFunction) -> Result<&str> {
    match values.get(idx) {
        Some(Value::String(s) | Value::Enum(s)) => Ok(s.as_str()),
        Some(Value::Null) => Err(Error::Evaluation(format!(
            "null reference in {}",
            function.name()
        ))),
        Some(other) => Err(Error::Evaluation(format!(
            "{} expects a string, got {other}",
            function.name()
        ))),
        None => Err(Error::Evaluation(format!(
            "{} is missing an argument",
            function.name()
        ))),
    }
}

fn lambda_arg(args: &[Expr], method: QueryMethod) -> Result<&Lambda> {
    match args.get(1) {
        Some(Expr::Lambda(l)) => Ok(l),
        _ => Err(Error::Evaluation(format!(
            "{} expects a lambda argument",
            method.name()
        ))),
    }
}

fn convert(value: Value, ty: &TypeRef) -> Result<Value> {
    let Some(kind) = ty.literal_kind() else {
        return Ok(value);
    };
    Ok(match (kind, value) {
        (_, Value::Null) => Value::Null,
        (LiteralKind::F64, Value::Int(i)) => Value::Float(
            rust_decimal::prelude::ToPrimitive::to_f64(&rust_decimal::Decimal::from(i))
                .ok_or_else(|| Error::Evaluation(format!("cannot convert {i} to F64")))?,
        ),
        (LiteralKind::Decimal, Value::Int(i)) => Value::Decimal(rust_decimal::Decimal::from(i)),
        (LiteralKind::String, Value::Enum(s)) => Value::String(s),
        (_, other) => other,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::expr::Parameter;

    fn item(id: i64, name: Option<&str>) -> Value {
        Value::Record(
            Record::new("Item")
                .with_field("Id", Value::Int(id))
                .with_field("Name", name.map_or(Value::Null, |n| Value::String(n.into()))),
        )
    }

    fn source_type() -> TypeRef {
        TypeRef::queryable(TypeRef::named("Item"))
    }

    fn key(member: &str, ty: TypeRef) -> Lambda {
        let p = Parameter::new("x", TypeRef::named("Item"));
        Lambda::new(p.clone(), Expr::parameter(&p).member(member, ty))
    }

    #[test]
    fn test_where_select_skip_take() {
        let data = vec![item(1, Some("a")), item(2, Some("b")), item(3, Some("c"))];
        let p = Parameter::new("x", TypeRef::named("Item"));
        let predicate = Lambda::new(
            p.clone(),
            Expr::binary(
                BinaryOp::Gt,
                Expr::parameter(&p).member("Id", TypeRef::Literal(LiteralKind::I32)),
                Expr::constant(Value::Int(1), TypeRef::Literal(LiteralKind::I32)),
            ),
        );
        let expr = Expr::Source(source_type())
            .where_(predicate)
            .select(key("Name", TypeRef::Literal(LiteralKind::String)))
            .skip(1)
            .take(5);

        let out = Interpreter::new(&data).sequence(&expr).unwrap();
        assert_eq!(out, vec![Value::String("c".into())]);
    }

    #[test]
    fn test_order_then_by_is_stable_with_nulls_first() {
        let data = vec![
            item(2, Some("b")),
            item(1, Some("b")),
            item(3, None),
            item(4, Some("a")),
        ];
        let expr = Expr::call(
            QueryMethod::ThenByDescending,
            vec![
                Expr::call(
                    QueryMethod::OrderBy,
                    vec![
                        Expr::Source(source_type()),
                        Expr::Lambda(key("Name", TypeRef::Literal(LiteralKind::String))),
                    ],
                ),
                Expr::Lambda(key("Id", TypeRef::Literal(LiteralKind::I32))),
            ],
        );
        let ids: Vec<_> = Interpreter::new(&data)
            .sequence(&expr)
            .unwrap()
            .iter()
            .map(|v| v.field("Id").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(ids, vec![3, 4, 2, 1]);
    }

    #[test]
    fn test_null_member_access_fails() {
        let data = vec![item(1, None)];
        let p = Parameter::new("x", TypeRef::named("Item"));
        let selector = Lambda::new(
            p.clone(),
            Expr::Function {
                function: ScalarFunction::ToLower,
                args: vec![Expr::parameter(&p).member("Name", TypeRef::Literal(LiteralKind::String))],
            },
        );
        let err = Interpreter::new(&data)
            .sequence(&Expr::Source(source_type()).select(selector))
            .unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
    }
}
