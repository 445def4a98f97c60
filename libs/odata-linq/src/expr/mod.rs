//! Expression trees: the query shape handed from binder to mapper to splicer
//! and finally to a provider.

pub mod eval;

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use crate::types::{CollectionKind, LiteralKind, TypeRef};
use crate::value::Value;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: Arc<str>,
    pub ty: TypeRef,
}

impl Parameter {
    #[must_use]
    pub fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: Arc::from(name),
            ty,
        }
    }
}

/// Single-parameter lambda, the only function shape query methods take.
#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub parameter: Parameter,
    pub body: Box<Expr>,
}

impl Lambda {
    #[must_use]
    pub fn new(parameter: Parameter, body: Expr) -> Self {
        Self {
            parameter,
            body: Box::new(body),
        }
    }

    #[must_use]
    pub fn return_type(&self) -> TypeRef {
        self.body.ty()
    }

    /// Inline the lambda: its body with every use of the parameter replaced by `arg`.
    #[must_use]
    pub fn apply_to(&self, arg: &Expr) -> Expr {
        substitute(&self.body, &self.parameter, arg)
    }
}

/// Member binding inside a [`Expr::MemberInit`].
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub member: Arc<str>,
    pub expr: Expr,
}

impl Binding {
    #[must_use]
    pub fn new(member: &str, expr: Expr) -> Self {
        Self {
            member: Arc::from(member),
            expr,
        }
    }
}

/// Sequence operators understood by providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryMethod {
    Where,
    Select,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Skip,
    Take,
    ToList,
    ToArray,
    AsQueryable,
}

impl QueryMethod {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Where => "Where",
            Self::Select => "Select",
            Self::OrderBy => "OrderBy",
            Self::OrderByDescending => "OrderByDescending",
            Self::ThenBy => "ThenBy",
            Self::ThenByDescending => "ThenByDescending",
            Self::Skip => "Skip",
            Self::Take => "Take",
            Self::ToList => "ToList",
            Self::ToArray => "ToArray",
            Self::AsQueryable => "AsQueryable",
        }
    }

    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::OrderBy | Self::OrderByDescending | Self::ThenBy | Self::ThenByDescending
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    AndAlso,
    OrElse,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::AndAlso => "AndAlso",
            Self::OrElse => "OrElse",
        }
    }
}

/// Scalar string functions reachable from `$filter`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarFunction {
    Contains,
    StartsWith,
    EndsWith,
    ToLower,
    ToUpper,
    Length,
}

impl ScalarFunction {
    #[must_use]
    pub fn result_type(self) -> TypeRef {
        match self {
            Self::Contains | Self::StartsWith | Self::EndsWith => TypeRef::Literal(LiteralKind::Bool),
            Self::ToLower | Self::ToUpper => TypeRef::Literal(LiteralKind::String),
            Self::Length => TypeRef::Literal(LiteralKind::I32),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Contains => "Contains",
            Self::StartsWith => "StartsWith",
            Self::EndsWith => "EndsWith",
            Self::ToLower => "ToLower",
            Self::ToUpper => "ToUpper",
            Self::Length => "Length",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Root sequence of the provider.
    Source(TypeRef),
    Parameter(Parameter),
    Constant(Value, TypeRef),
    Member {
        target: Box<Expr>,
        member: Arc<str>,
        ty: TypeRef,
    },
    MemberInit {
        ty: TypeRef,
        bindings: Vec<Binding>,
    },
    Lambda(Lambda),
    /// Sequence method call; `args[0]` is the sequence.
    Call {
        method: QueryMethod,
        args: Vec<Expr>,
        ty: TypeRef,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Condition {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        ty: TypeRef,
    },
    Convert {
        operand: Box<Expr>,
        ty: TypeRef,
    },
    Function {
        function: ScalarFunction,
        args: Vec<Expr>,
    },
}

fn bool_type() -> TypeRef {
    TypeRef::Literal(LiteralKind::Bool)
}

impl Expr {
    #[must_use]
    pub fn ty(&self) -> TypeRef {
        match self {
            Expr::Source(ty)
            | Expr::Constant(_, ty)
            | Expr::Member { ty, .. }
            | Expr::MemberInit { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Condition { ty, .. }
            | Expr::Convert { ty, .. } => ty.clone(),
            Expr::Parameter(p) => p.ty.clone(),
            Expr::Lambda(l) => l.return_type(),
            Expr::Binary { .. } | Expr::Not(_) => bool_type(),
            Expr::Function { function, .. } => function.result_type(),
        }
    }

    #[must_use]
    pub fn parameter(p: &Parameter) -> Expr {
        Expr::Parameter(p.clone())
    }

    #[must_use]
    pub fn constant(value: Value, ty: TypeRef) -> Expr {
        Expr::Constant(value, ty)
    }

    #[must_use]
    pub fn null(ty: TypeRef) -> Expr {
        Expr::Constant(Value::Null, ty)
    }

    #[must_use]
    pub fn member(self, member: &str, ty: TypeRef) -> Expr {
        Expr::Member {
            target: Box::new(self),
            member: Arc::from(member),
            ty,
        }
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn and_also(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::AndAlso, self, other)
    }

    #[must_use]
    pub fn or_else(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::OrElse, self, other)
    }

    #[must_use]
    pub fn is_null_check(self) -> Expr {
        let ty = self.ty();
        Expr::binary(BinaryOp::Eq, self, Expr::null(ty))
    }

    #[must_use]
    pub fn condition(test: Expr, if_true: Expr, if_false: Expr, ty: TypeRef) -> Expr {
        Expr::Condition {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
            ty,
        }
    }

    #[must_use]
    pub fn convert(self, ty: TypeRef) -> Expr {
        Expr::Convert {
            operand: Box::new(self),
            ty,
        }
    }

    /// Sequence method call with the result type derived from the arguments.
    #[must_use]
    pub fn call(method: QueryMethod, args: Vec<Expr>) -> Expr {
        let source_ty = args.first().map_or(TypeRef::Object, Expr::ty);
        let element = source_ty.element_type().clone();
        let kind = match source_ty.collection_kind() {
            Some(CollectionKind::Queryable) => CollectionKind::Queryable,
            _ => CollectionKind::Enumerable,
        };
        let ty = match method {
            QueryMethod::Select => {
                let projected = args.get(1).map_or(TypeRef::Object, Expr::ty);
                TypeRef::Collection(kind, Box::new(projected))
            }
            QueryMethod::ToList => TypeRef::list(element),
            QueryMethod::ToArray => TypeRef::array(element),
            QueryMethod::AsQueryable => TypeRef::queryable(element),
            QueryMethod::Where
            | QueryMethod::OrderBy
            | QueryMethod::OrderByDescending
            | QueryMethod::ThenBy
            | QueryMethod::ThenByDescending
            | QueryMethod::Skip
            | QueryMethod::Take => TypeRef::Collection(kind, Box::new(element)),
        };
        Expr::Call { method, args, ty }
    }

    #[must_use]
    pub fn where_(self, predicate: Lambda) -> Expr {
        Expr::call(QueryMethod::Where, vec![self, Expr::Lambda(predicate)])
    }

    #[must_use]
    pub fn select(self, selector: Lambda) -> Expr {
        Expr::call(QueryMethod::Select, vec![self, Expr::Lambda(selector)])
    }

    #[must_use]
    pub fn skip(self, count: i64) -> Expr {
        Expr::call(
            QueryMethod::Skip,
            vec![self, Expr::constant(Value::Int(count), TypeRef::Literal(LiteralKind::I32))],
        )
    }

    #[must_use]
    pub fn take(self, count: i64) -> Expr {
        Expr::call(
            QueryMethod::Take,
            vec![self, Expr::constant(Value::Int(count), TypeRef::Literal(LiteralKind::I32))],
        )
    }

    #[must_use]
    pub fn method(self, method: QueryMethod) -> Expr {
        Expr::call(method, vec![self])
    }

    /// Materialise a sequence back into the given collection shape.
    #[must_use]
    pub fn coerce_to(self, kind: Option<CollectionKind>) -> Expr {
        match kind {
            Some(CollectionKind::List) => self.method(QueryMethod::ToList),
            Some(CollectionKind::Array) => self.method(QueryMethod::ToArray),
            Some(CollectionKind::Queryable) => self.method(QueryMethod::AsQueryable),
            Some(CollectionKind::Enumerable) | None => self,
        }
    }

    /// Rebuild this node with every direct child passed through `f`. Lambda
    /// parameters are kept; only bodies are visited.
    ///
    /// # Errors
    /// The first error returned by `f`.
    pub fn try_map_children<E>(self, mut f: impl FnMut(Expr) -> Result<Expr, E>) -> Result<Expr, E> {
        Ok(match self {
            leaf @ (Expr::Source(_) | Expr::Parameter(_) | Expr::Constant(..)) => leaf,
            Expr::Member { target, member, ty } => Expr::Member {
                target: Box::new(f(*target)?),
                member,
                ty,
            },
            Expr::MemberInit { ty, bindings } => Expr::MemberInit {
                ty,
                bindings: bindings
                    .into_iter()
                    .map(|b| {
                        Ok(Binding {
                            member: b.member,
                            expr: f(b.expr)?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
            },
            Expr::Lambda(l) => Expr::Lambda(Lambda {
                parameter: l.parameter,
                body: Box::new(f(*l.body)?),
            }),
            Expr::Call { method, args, ty } => Expr::Call {
                method,
                args: args.into_iter().map(&mut f).collect::<Result<_, E>>()?,
                ty,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
            },
            Expr::Not(x) => Expr::Not(Box::new(f(*x)?)),
            Expr::Condition {
                test,
                if_true,
                if_false,
                ty,
            } => Expr::Condition {
                test: Box::new(f(*test)?),
                if_true: Box::new(f(*if_true)?),
                if_false: Box::new(f(*if_false)?),
                ty,
            },
            Expr::Convert { operand, ty } => Expr::Convert {
                operand: Box::new(f(*operand)?),
                ty,
            },
            Expr::Function { function, args } => Expr::Function {
                function,
                args: args.into_iter().map(&mut f).collect::<Result<_, E>>()?,
            },
        })
    }

    /// Infallible form of [`Expr::try_map_children`].
    #[must_use]
    pub fn map_children(self, mut f: impl FnMut(Expr) -> Expr) -> Expr {
        let Ok(out) = self.try_map_children(|c| Ok::<_, Infallible>(f(c)));
        out
    }

    /// Pre-order walk over this node and all descendants.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Source(_) | Expr::Parameter(_) | Expr::Constant(..) => {}
            Expr::Member { target, .. } => target.walk(f),
            Expr::MemberInit { bindings, .. } => {
                for b in bindings {
                    b.expr.walk(f);
                }
            }
            Expr::Lambda(l) => l.body.walk(f),
            Expr::Call { args, .. } | Expr::Function { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Not(x) | Expr::Convert { operand: x, .. } => x.walk(f),
            Expr::Condition {
                test,
                if_true,
                if_false,
                ..
            } => {
                test.walk(f);
                if_true.walk(f);
                if_false.walk(f);
            }
        }
    }

    /// Number of calls to `method` anywhere in the tree.
    #[must_use]
    pub fn count_calls(&self, method: QueryMethod) -> usize {
        let mut count = 0;
        self.walk(&mut |e| {
            if matches!(e, Expr::Call { method: m, .. } if *m == method) {
                count += 1;
            }
        });
        count
    }

    /// Every lambda parameter declared in the tree.
    #[must_use]
    pub fn declared_parameters(&self) -> Vec<Parameter> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Lambda(l) = e {
                out.push(l.parameter.clone());
            }
        });
        out
    }
}

/// Replace every occurrence of `param` in `expr` with `replacement`. Inner
/// lambdas declaring a parameter of the same name and type shadow it.
#[must_use]
pub fn substitute(expr: &Expr, param: &Parameter, replacement: &Expr) -> Expr {
    match expr {
        Expr::Parameter(p) if p == param => replacement.clone(),
        Expr::Lambda(l) if l.parameter == *param => expr.clone(),
        other => other
            .clone()
            .map_children(|child| substitute(&child, param, replacement)),
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.parameter.name, self.body)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Source(ty) => write!(f, "Source<{}>", ty.element_type()),
            Expr::Parameter(p) => f.write_str(&p.name),
            Expr::Constant(value, _) => write!(f, "{value}"),
            Expr::Member { target, member, .. } => write!(f, "{target}.{member}"),
            Expr::MemberInit { ty, bindings } => {
                write!(f, "new {ty}() {{")?;
                for (idx, b) in bindings.iter().enumerate() {
                    let sep = if idx == 0 { "" } else { ", " };
                    write!(f, "{sep}{} = {}", b.member, b.expr)?;
                }
                f.write_str("}")
            }
            Expr::Lambda(l) => write!(f, "{l}"),
            Expr::Call { method, args, .. } => {
                let Some((source, rest)) = args.split_first() else {
                    return write!(f, "{}()", method.name());
                };
                write!(f, "{source}.{}(", method.name())?;
                for (idx, a) in rest.iter().enumerate() {
                    let sep = if idx == 0 { "" } else { ", " };
                    write!(f, "{sep}{a}")?;
                }
                f.write_str(")")
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Not(x) => write!(f, "Not({x})"),
            Expr::Condition {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "IIF({test}, {if_true}, {if_false})"),
            Expr::Convert { operand, ty } => write!(f, "Convert({operand}, {ty})"),
            Expr::Function { function, args } => match args.as_slice() {
                [target] => write!(f, "{target}.{}()", function.name()),
                [target, arg] => write!(f, "{target}.{}({arg})", function.name()),
                _ => write!(f, "{}(..)", function.name()),
            },
        }
    }
}
