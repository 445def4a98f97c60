//! The mapping contract between model and source types, plus
//! [`MapperConfiguration`], a small reference mapper.
//!
//! A mapper does three things: translate model-typed lambdas onto the
//! source type, and build the `source => new Model { ... }` projection for a
//! set of includes.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::expr::{Binding, Expr, Lambda, Parameter};
use crate::filter::null_guarded;
use crate::selectors::member_chain;
use crate::types::{ElementKind, MemberDef, TypeRef, TypeRegistry};
use crate::value::Value;

/// Translates model-typed expressions to the source types they are mapped from.
pub trait Mapper: Send + Sync {
    /// Metadata for both model and source types.
    fn registry(&self) -> &TypeRegistry;

    /// Source type a model type is projected from.
    ///
    /// # Errors
    /// `Error::UnknownType` when the model type is neither mapped nor registered.
    fn source_type(&self, model_type: &str) -> Result<Arc<str>>;

    /// Rewrite a predicate over a model type into one over `source_type`.
    ///
    /// # Errors
    /// `Error::Mapping` when a member cannot be translated.
    fn map_predicate(&self, predicate: &Lambda, source_type: &str) -> Result<Lambda>;

    /// Rewrite `q => q.OrderBy(..).Skip(..)...` over a sequence of model
    /// elements into the same chain over source elements.
    ///
    /// # Errors
    /// `Error::Mapping` when a member cannot be translated.
    fn map_query_transform(&self, transform: &Lambda) -> Result<Lambda>;

    /// Build the projection from `source_type` to `model_type` that populates
    /// the members named by `includes` (model-typed member chains).
    ///
    /// # Errors
    /// `Error::Mapping` or `Error::UnresolvedMember` when the includes do not
    /// line up with the configured maps.
    fn project(
        &self,
        source_type: &str,
        model_type: &str,
        includes: &[Lambda],
        parameters: &IndexMap<String, serde_json::Value>,
    ) -> Result<Lambda>;
}

/// Where a model member takes its value from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberMap {
    /// Member chain on the source, e.g. `Owner.Name` for a flattened member.
    Path(Vec<Arc<str>>),
    /// Named projection parameter supplied at query time.
    Parameter(Arc<str>),
}

impl MemberMap {
    /// Parse a `.` or `/` separated source member path.
    #[must_use]
    pub fn path(path: &str) -> Self {
        Self::Path(
            path.split(['.', '/'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Arc::from)
                .collect(),
        )
    }
}

/// Map from one source type onto a model type. Members without an entry are
/// read from the same-named source member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeMap {
    pub source: Arc<str>,
    pub members: IndexMap<Arc<str>, MemberMap>,
}

impl TypeMap {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            source: Arc::from(source),
            members: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn map_path(mut self, member: &str, source_path: &str) -> Self {
        self.members.insert(Arc::from(member), MemberMap::path(source_path));
        self
    }

    #[must_use]
    pub fn map_parameter(mut self, member: &str, parameter: &str) -> Self {
        self.members
            .insert(Arc::from(member), MemberMap::Parameter(Arc::from(parameter)));
        self
    }

    fn get(&self, member: &str) -> Option<&MemberMap> {
        self.members
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(member))
            .map(|(_, map)| map)
    }
}

/// Reference [`Mapper`]: per-type maps keyed by model type name.
#[derive(Clone, Debug, Default)]
pub struct MapperConfiguration {
    registry: TypeRegistry,
    maps: IndexMap<Arc<str>, TypeMap>,
}

impl MapperConfiguration {
    #[must_use]
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            maps: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_map(mut self, model_type: &str, map: TypeMap) -> Self {
        self.maps.insert(Arc::from(model_type), map);
        self
    }

    fn member_map(&self, model_type: &str, member: &str) -> Option<&MemberMap> {
        self.maps.get(model_type).and_then(|m| m.get(member))
    }

    /// Replace every mapped model type in `ty` with its source type.
    #[must_use]
    pub fn map_type(&self, ty: &TypeRef) -> TypeRef {
        match ty {
            TypeRef::Named(name) => self
                .maps
                .get(name)
                .map_or_else(|| ty.clone(), |m| TypeRef::Named(m.source.clone())),
            TypeRef::Nullable(inner) => TypeRef::nullable(self.map_type(inner)),
            TypeRef::Collection(kind, element) => {
                TypeRef::Collection(*kind, Box::new(self.map_type(element)))
            }
            TypeRef::Literal(_) | TypeRef::Object => ty.clone(),
        }
    }

    fn map_lambda(&self, lambda: &Lambda) -> Result<Lambda> {
        Ok(Lambda {
            parameter: Parameter {
                name: lambda.parameter.name.clone(),
                ty: self.map_type(&lambda.parameter.ty),
            },
            body: Box::new(self.map_expr(&lambda.body)?),
        })
    }

    fn map_expr(&self, expr: &Expr) -> Result<Expr> {
        match expr {
            Expr::Source(ty) => Ok(Expr::Source(self.map_type(ty))),
            Expr::Parameter(p) => Ok(Expr::Parameter(Parameter {
                name: p.name.clone(),
                ty: self.map_type(&p.ty),
            })),
            Expr::Constant(value, ty) => Ok(Expr::constant(value.clone(), self.map_type(ty))),
            Expr::Member { target, member, .. } => self.map_member_access(target, member),
            Expr::Call { method, args, .. } => {
                let args = args
                    .iter()
                    .map(|a| self.map_expr(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::call(*method, args))
            }
            Expr::Lambda(l) => Ok(Expr::Lambda(self.map_lambda(l)?)),
            Expr::Condition {
                test,
                if_true,
                if_false,
                ty,
            } => Ok(Expr::condition(
                self.map_expr(test)?,
                self.map_expr(if_true)?,
                self.map_expr(if_false)?,
                self.map_type(ty),
            )),
            Expr::Convert { operand, ty } => Ok(self.map_expr(operand)?.convert(self.map_type(ty))),
            Expr::MemberInit { ty, .. } => Err(Error::Mapping(format!(
                "cannot translate construction of {ty}"
            ))),
            Expr::Binary { .. } | Expr::Not(_) | Expr::Function { .. } => {
                expr.clone().try_map_children(|child| self.map_expr(&child))
            }
        }
    }

    fn map_member_access(&self, target: &Expr, member: &str) -> Result<Expr> {
        let model_type = target
            .ty()
            .type_name()
            .cloned()
            .ok_or_else(|| Error::Mapping(format!("cannot read {member} from {target}")))?;
        let mapped = self.map_expr(target)?;
        match self.member_map(&model_type, member) {
            Some(MemberMap::Path(path)) => self.source_path(mapped, path),
            Some(MemberMap::Parameter(name)) => Err(Error::Mapping(format!(
                "{model_type}.{member} is bound to projection parameter '{name}'"
            ))),
            None => self.same_named(mapped, member),
        }
    }

    fn same_named(&self, source: Expr, member: &str) -> Result<Expr> {
        let source_type = source
            .ty()
            .type_name()
            .cloned()
            .ok_or_else(|| Error::Mapping(format!("cannot read {member} from {source}")))?;
        let def = self.registry.require_member(&source_type, member)?;
        Ok(source.member(&def.name, def.ty.clone()))
    }

    /// Source member chain, guarded against null intermediate references.
    fn source_path(&self, source: Expr, path: &[Arc<str>]) -> Result<Expr> {
        let mut current = source;
        let mut guards = Vec::new();
        for (idx, name) in path.iter().enumerate() {
            if idx > 0 {
                guards.push(current.clone());
            }
            current = self.same_named(current, name)?;
        }
        Ok(null_guarded(guards, current))
    }

    fn member_init(
        &self,
        model_type: &str,
        source: &Expr,
        node: &IncludeNode,
        parameters: &IndexMap<String, serde_json::Value>,
        depth: usize,
    ) -> Result<Expr> {
        let leaf = node.children.is_empty();
        let whole = IncludeNode::default();
        let mut bindings = Vec::new();
        for member in self.registry.members(model_type)? {
            let include = match node.child(&member.name) {
                Some(child) => Some(child),
                None if leaf && self.registry.item_kind(&member.ty)? != ElementKind::Entity => {
                    Some(&whole)
                }
                None => None,
            };
            let expr = match include {
                Some(child) => self.member_value(model_type, member, source, child, parameters, depth)?,
                None => Expr::constant(Value::default_for(&member.ty), member.ty.clone()),
            };
            bindings.push(Binding::new(&member.name, expr));
        }
        Ok(Expr::MemberInit {
            ty: TypeRef::named(model_type),
            bindings,
        })
    }

    fn member_value(
        &self,
        model_type: &str,
        member: &MemberDef,
        source: &Expr,
        node: &IncludeNode,
        parameters: &IndexMap<String, serde_json::Value>,
        depth: usize,
    ) -> Result<Expr> {
        let value = match self.member_map(model_type, &member.name) {
            Some(MemberMap::Parameter(name)) => {
                let value = match parameters.get(&**name) {
                    Some(json) => Value::from_json(&self.registry, &member.ty, json)?,
                    None => Value::Null,
                };
                return Ok(Expr::constant(value, member.ty.clone()));
            }
            Some(MemberMap::Path(path)) => self.source_path(source.clone(), path)?,
            None => self.same_named(source.clone(), &member.name)?,
        };
        self.shape(&member.ty, value, node, parameters, depth)
    }

    /// Fit a source value to the model member type.
    fn shape(
        &self,
        model_ty: &TypeRef,
        value: Expr,
        node: &IncludeNode,
        parameters: &IndexMap<String, serde_json::Value>,
        depth: usize,
    ) -> Result<Expr> {
        match self.registry.item_kind(model_ty)? {
            ElementKind::Primitive => {
                if model_ty.is_list() || value.ty().strip_nullable() == model_ty.strip_nullable() {
                    Ok(value)
                } else {
                    Ok(value.convert(model_ty.clone()))
                }
            }
            ElementKind::Complex | ElementKind::Entity => {
                let element = model_ty
                    .type_name()
                    .cloned()
                    .ok_or_else(|| Error::Mapping(format!("{model_ty} is not a structured type")))?;
                if model_ty.is_list() {
                    let child = Parameter::new(&source_parameter(depth + 1), value.ty().element_type().clone());
                    let body = self.member_init(&element, &Expr::parameter(&child), node, parameters, depth + 1)?;
                    let projected = value
                        .clone()
                        .select(Lambda::new(child, body))
                        .coerce_to(model_ty.collection_kind());
                    // A null source collection projects to an empty one.
                    let ty = projected.ty();
                    let empty = Expr::constant(Value::default_for(model_ty), ty.clone());
                    Ok(Expr::condition(value.is_null_check(), empty, projected, ty))
                } else {
                    let init = self.member_init(&element, &value, node, parameters, depth)?;
                    let ty = TypeRef::named(&element);
                    Ok(Expr::condition(value.is_null_check(), Expr::null(ty.clone()), init, ty))
                }
            }
            ElementKind::Collection => Err(Error::Unsupported(format!(
                "nested collection member of type {model_ty}"
            ))),
        }
    }
}

/// Source lambda parameter at `depth`: `x`, `x0`, `x00`, ...
fn source_parameter(depth: usize) -> String {
    let mut name = String::from("x");
    name.extend(std::iter::repeat_n('0', depth));
    name
}

/// Include chains folded into a tree of member names.
#[derive(Debug, Default)]
struct IncludeNode {
    children: IndexMap<Arc<str>, IncludeNode>,
}

impl IncludeNode {
    fn insert(&mut self, path: &[Arc<str>]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        self.children.entry(first.clone()).or_default().insert(rest);
    }

    fn child(&self, member: &str) -> Option<&IncludeNode> {
        self.children
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(member))
            .map(|(_, node)| node)
    }
}

impl Mapper for MapperConfiguration {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn source_type(&self, model_type: &str) -> Result<Arc<str>> {
        if let Some(map) = self.maps.get(model_type) {
            return Ok(map.source.clone());
        }
        Ok(self.registry.get(model_type)?.name.clone())
    }

    fn map_predicate(&self, predicate: &Lambda, source_type: &str) -> Result<Lambda> {
        let mapped = self.map_lambda(predicate)?;
        match mapped.parameter.ty.type_name() {
            Some(name) if &**name == source_type => Ok(mapped),
            _ => Err(Error::Mapping(format!(
                "predicate over {} does not map onto {source_type}",
                predicate.parameter.ty
            ))),
        }
    }

    fn map_query_transform(&self, transform: &Lambda) -> Result<Lambda> {
        self.map_lambda(transform)
    }

    fn project(
        &self,
        source_type: &str,
        model_type: &str,
        includes: &[Lambda],
        parameters: &IndexMap<String, serde_json::Value>,
    ) -> Result<Lambda> {
        self.registry.get(source_type)?;
        let mut tree = IncludeNode::default();
        for include in includes {
            tree.insert(&member_chain(include)?);
        }
        let parameter = Parameter::new(&source_parameter(0), TypeRef::named(source_type));
        let body = self.member_init(model_type, &Expr::parameter(&parameter), &tree, parameters, 0)?;
        Ok(Lambda::new(parameter, body))
    }
}
