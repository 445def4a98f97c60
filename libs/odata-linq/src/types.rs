//! Type metadata for model and source types, plus the reflection helpers the
//! rest of the engine uses to classify members.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Scalar kinds with no decomposable structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LiteralKind {
    Bool,
    I32,
    I64,
    F64,
    Decimal,
    String,
    Uuid,
    DateTime,
    Date,
    Time,
    Enum,
}

impl LiteralKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "Boolean",
            Self::I32 => "Int32",
            Self::I64 => "Int64",
            Self::F64 => "Double",
            Self::Decimal => "Decimal",
            Self::String => "String",
            Self::Uuid => "Guid",
            Self::DateTime => "DateTimeOffset",
            Self::Date => "Date",
            Self::Time => "TimeOfDay",
            Self::Enum => "Enum",
        }
    }
}

/// Concrete shape of a collection; preserved across rewrites so a `List`
/// member stays a `List`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    List,
    Array,
    Enumerable,
    Queryable,
}

impl CollectionKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::List => "List",
            Self::Array => "Array",
            Self::Enumerable => "IEnumerable",
            Self::Queryable => "IQueryable",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Literal(LiteralKind),
    Nullable(Box<TypeRef>),
    /// A registered complex or entity type.
    Named(Arc<str>),
    Collection(CollectionKind, Box<TypeRef>),
    /// Boxed value of any type.
    Object,
}

impl TypeRef {
    #[must_use]
    pub fn literal(kind: LiteralKind) -> Self {
        Self::Literal(kind)
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::Named(Arc::from(name))
    }

    #[must_use]
    pub fn nullable(inner: TypeRef) -> Self {
        match inner {
            Self::Nullable(_) => inner,
            other => Self::Nullable(Box::new(other)),
        }
    }

    #[must_use]
    pub fn list(element: TypeRef) -> Self {
        Self::Collection(CollectionKind::List, Box::new(element))
    }

    #[must_use]
    pub fn array(element: TypeRef) -> Self {
        Self::Collection(CollectionKind::Array, Box::new(element))
    }

    #[must_use]
    pub fn enumerable(element: TypeRef) -> Self {
        Self::Collection(CollectionKind::Enumerable, Box::new(element))
    }

    #[must_use]
    pub fn queryable(element: TypeRef) -> Self {
        Self::Collection(CollectionKind::Queryable, Box::new(element))
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self.strip_nullable(), Self::Collection(..))
    }

    /// Scalar-like, after unwrapping any nullable wrapper.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.strip_nullable(), Self::Literal(_))
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    #[must_use]
    pub fn strip_nullable(&self) -> &TypeRef {
        match self {
            Self::Nullable(inner) => inner.strip_nullable(),
            other => other,
        }
    }

    /// Element type of a collection; any other type is its own element type.
    #[must_use]
    pub fn element_type(&self) -> &TypeRef {
        match self.strip_nullable() {
            Self::Collection(_, element) => element,
            other => other,
        }
    }

    #[must_use]
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self.strip_nullable() {
            Self::Collection(kind, _) => Some(*kind),
            _ => None,
        }
    }

    #[must_use]
    pub fn literal_kind(&self) -> Option<LiteralKind> {
        match self.strip_nullable() {
            Self::Literal(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Registered type name, looking through nullable and collection wrappers.
    #[must_use]
    pub fn type_name(&self) -> Option<&Arc<str>> {
        match self.element_type() {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }

    /// The same collection shape with a different element type.
    #[must_use]
    pub fn with_element(&self, element: TypeRef) -> TypeRef {
        match self.strip_nullable() {
            Self::Collection(kind, _) => Self::Collection(*kind, Box::new(element)),
            _ => element,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(kind) => f.write_str(kind.name()),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::Named(name) => f.write_str(name),
            Self::Collection(kind, element) => write!(f, "{}<{element}>", kind.name()),
            Self::Object => f.write_str("Object"),
        }
    }
}

/// Two types are list-equivalent when both are collections of the same element
/// type (any collection kind) or when they are the same non-collection type.
/// Nullability is ignored.
#[must_use]
pub fn list_types_equivalent(a: &TypeRef, b: &TypeRef) -> bool {
    match (a.strip_nullable(), b.strip_nullable()) {
        (TypeRef::Collection(_, x), TypeRef::Collection(_, y)) => {
            x.strip_nullable() == y.strip_nullable()
        }
        (x, y) => x == y,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// Structured value without identity, always selected as a whole.
    Complex,
    /// Navigable entity; populated only when expanded.
    Entity,
}

/// Classification of a member type as seen by select/expand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Primitive,
    Complex,
    Entity,
    Collection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberDef {
    pub name: Arc<str>,
    pub ty: TypeRef,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: Arc<str>,
    pub kind: TypeKind,
    pub base: Option<Arc<str>>,
    pub members: Vec<MemberDef>,
}

impl TypeDef {
    #[must_use]
    pub fn entity(name: &str) -> Self {
        Self::new(name, TypeKind::Entity)
    }

    #[must_use]
    pub fn complex(name: &str) -> Self {
        Self::new(name, TypeKind::Complex)
    }

    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            base: None,
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base(mut self, base: &str) -> Self {
        self.base = Some(Arc::from(base));
        self
    }

    #[must_use]
    pub fn member(mut self, name: &str, ty: TypeRef) -> Self {
        self.members.push(MemberDef {
            name: Arc::from(name),
            ty,
        });
        self
    }
}

/// All known types, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: IndexMap<Arc<str>, TypeDef>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.register(def);
        self
    }

    pub fn register(&mut self, def: TypeDef) {
        self.types.insert(def.name.clone(), def);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// # Errors
    /// `Error::UnknownType` when `name` is not registered.
    pub fn get(&self, name: &str) -> Result<&TypeDef> {
        self.types
            .get(name)
            .ok_or_else(|| Error::UnknownType(name.to_owned()))
    }

    /// Case-insensitive member lookup, searching base types after the type itself.
    #[must_use]
    pub fn get_member(&self, type_name: &str, name: &str) -> Option<&MemberDef> {
        let mut seen: Vec<&str> = Vec::new();
        let mut current = self.types.get(type_name);
        while let Some(def) = current {
            if seen.contains(&&*def.name) {
                break;
            }
            seen.push(&def.name);
            if let Some(member) = def
                .members
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(name))
            {
                return Some(member);
            }
            current = def.base.as_deref().and_then(|b| self.types.get(b));
        }
        None
    }

    /// Like [`TypeRegistry::get_member`] but reports a missing member as an error.
    ///
    /// # Errors
    /// `Error::UnresolvedMember` naming the type and member.
    pub fn require_member(&self, type_name: &str, name: &str) -> Result<&MemberDef> {
        self.get_member(type_name, name)
            .ok_or_else(|| Error::unresolved(type_name, name))
    }

    /// All members, base type members first.
    ///
    /// # Errors
    /// `Error::UnknownType` when the type or one of its bases is not registered,
    /// `Error::CyclicBase` when the base chain loops.
    pub fn members(&self, type_name: &str) -> Result<Vec<&MemberDef>> {
        let mut out: Vec<&MemberDef> = Vec::new();
        for def in self.lineage(type_name)?.into_iter().rev() {
            for member in &def.members {
                if let Some(pos) = out
                    .iter()
                    .position(|m| m.name.eq_ignore_ascii_case(&member.name))
                {
                    out[pos] = member;
                } else {
                    out.push(member);
                }
            }
        }
        Ok(out)
    }

    /// The type followed by its bases, most derived first.
    fn lineage(&self, type_name: &str) -> Result<Vec<&TypeDef>> {
        let mut chain: Vec<&TypeDef> = Vec::new();
        let mut next = Some(type_name);
        while let Some(name) = next {
            if chain.iter().any(|d| &*d.name == name) {
                return Err(Error::CyclicBase(type_name.to_owned()));
            }
            let def = self.get(name)?;
            next = def.base.as_deref();
            chain.push(def);
        }
        Ok(chain)
    }

    /// # Errors
    /// `Error::UnknownType` when the type is not registered.
    pub fn literal_members(&self, type_name: &str) -> Result<Vec<&MemberDef>> {
        Ok(self
            .members(type_name)?
            .into_iter()
            .filter(|m| m.ty.is_literal())
            .collect())
    }

    /// # Errors
    /// `Error::UnknownType` for a named type that is not registered.
    pub fn element_kind(&self, ty: &TypeRef) -> Result<ElementKind> {
        match ty.strip_nullable() {
            TypeRef::Collection(..) => Ok(ElementKind::Collection),
            TypeRef::Literal(_) | TypeRef::Object => Ok(ElementKind::Primitive),
            TypeRef::Named(name) => Ok(match self.get(name)?.kind {
                TypeKind::Complex => ElementKind::Complex,
                TypeKind::Entity => ElementKind::Entity,
            }),
            TypeRef::Nullable(inner) => self.element_kind(inner),
        }
    }

    /// Kind of a collection's element, or of the type itself when not a collection.
    ///
    /// # Errors
    /// `Error::UnknownType` for a named type that is not registered.
    pub fn item_kind(&self, ty: &TypeRef) -> Result<ElementKind> {
        self.element_kind(ty.element_type())
    }
}
