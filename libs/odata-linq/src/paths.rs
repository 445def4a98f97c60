//! Resolves `$select`/`$expand` against the model type into a forest of
//! member paths.
//!
//! Both syntaxes for nested selection (`A/B/C` and `A($select=B($select=C))`)
//! land on the same [`PathList`], and a path is emitted at most once.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use odata_query::{ExpandItem, PathSelectItem, SelectExpandClause, SelectItem};

use crate::error::{Error, Result};
use crate::filter::{FilterContext, FilterOptions, QueryOptions};
use crate::types::{ElementKind, TypeRef, TypeRegistry};

/// One resolved member step of a select or expand path.
#[derive(Clone, Debug, PartialEq)]
pub struct PathSegment {
    pub member_name: Arc<str>,
    /// Type the member was resolved on.
    pub declaring_type: Arc<str>,
    pub member_type: TypeRef,
    pub element_kind: ElementKind,
    pub is_collection: bool,
    pub filter: Option<FilterOptions>,
    pub query: Option<QueryOptions>,
}

impl PathSegment {
    /// Registered type reached by this segment (element type for collections).
    #[must_use]
    pub fn element_type_name(&self) -> Option<&Arc<str>> {
        self.member_type.type_name()
    }
}

/// Immutable member path from the root type. Appending returns a new list;
/// equality and hashing look at member names only.
#[derive(Clone, Debug, Default)]
pub struct PathList(Arc<[PathSegment]>);

impl PathList {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn append(&self, segment: PathSegment) -> PathList {
        let mut segments = self.0.to_vec();
        segments.push(segment);
        PathList(segments.into())
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    #[must_use]
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| &*s.member_name)
    }

    /// True when `prefix` matches the first segments of this path.
    #[must_use]
    pub fn starts_with(&self, prefix: &PathList) -> bool {
        prefix.len() <= self.len() && prefix.identifiers().zip(self.identifiers()).all(|(a, b)| a == b)
    }
}

impl PartialEq for PathList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.identifiers().eq(other.identifiers())
    }
}

impl Eq for PathList {}

impl Hash for PathList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for id in self.identifiers() {
            id.hash(state);
        }
        self.len().hash(state);
    }
}

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, id) in self.identifiers().enumerate() {
            if idx > 0 {
                f.write_str("/")?;
            }
            f.write_str(id)?;
        }
        Ok(())
    }
}

/// Every distinct select and expand path of one query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathForest {
    /// Selected member paths, including members selected beneath expansions.
    pub selects: Vec<PathList>,
    /// One path per expanded leaf, depth first in `$expand` order.
    pub expansions: Vec<PathList>,
}

/// Build the path forest for `root_type`.
///
/// # Errors
/// `Error::UnresolvedMember` for unknown members, `Error::Unsupported` for
/// `$ref`/`$count` items, `odata_query::Error::InvalidExpand` for expanding a
/// non-navigation member or nesting deeper than `max_expand_depth`.
pub fn build_forest(
    registry: &TypeRegistry,
    root_type: &str,
    clause: Option<&SelectExpandClause>,
    context: FilterContext,
    max_expand_depth: usize,
) -> Result<PathForest> {
    registry.get(root_type)?;
    let mut builder = ForestBuilder {
        registry,
        context,
        max_expand_depth,
        forest: PathForest::default(),
        seen_selects: HashSet::new(),
        seen_expansions: HashSet::new(),
    };
    builder.level(root_type, &PathList::empty(), clause)?;
    Ok(builder.forest)
}

struct ForestBuilder<'a> {
    registry: &'a TypeRegistry,
    context: FilterContext,
    max_expand_depth: usize,
    forest: PathForest,
    seen_selects: HashSet<PathList>,
    seen_expansions: HashSet<PathList>,
}

impl ForestBuilder<'_> {
    fn push_select(&mut self, path: PathList) {
        if self.seen_selects.insert(path.clone()) {
            self.forest.selects.push(path);
        }
    }

    fn push_expansion(&mut self, path: PathList) {
        if self.seen_expansions.insert(path.clone()) {
            self.forest.expansions.push(path);
        }
    }

    /// One clause level; returns whether it contained expand items.
    fn level(
        &mut self,
        type_name: &str,
        prefix: &PathList,
        clause: Option<&SelectExpandClause>,
    ) -> Result<bool> {
        let Some(clause) = clause else {
            self.default_selects(type_name, prefix)?;
            return Ok(false);
        };

        for item in &clause.items {
            match item {
                SelectItem::ExpandRef(path) => {
                    return Err(Error::Unsupported(format!("$expand={}/$ref", path.join("/"))));
                }
                SelectItem::Count(path) => {
                    return Err(Error::Unsupported(format!("$select={}/$count", path.join("/"))));
                }
                SelectItem::Path(_) | SelectItem::Expand(_) => {}
            }
        }

        let mut has_expands = false;
        for expand in clause.expands() {
            has_expands = true;
            self.expand(type_name, prefix, expand)?;
        }
        if clause.selects_by_default() {
            self.default_selects(type_name, prefix)?;
        }
        for select in clause.path_selects() {
            self.select(type_name, prefix, select)?;
        }
        Ok(has_expands)
    }

    fn walk(&self, type_name: &str, prefix: &PathList, path: &[String]) -> Result<PathList> {
        if path.is_empty() {
            return Err(Error::Query(odata_query::Error::InvalidExpand(
                "empty member path".to_owned(),
            )));
        }
        let mut current_type: Arc<str> = Arc::from(type_name);
        let mut out = prefix.clone();
        for (idx, identifier) in path.iter().enumerate() {
            let member = self.registry.require_member(&current_type, identifier)?;
            let segment = PathSegment {
                member_name: member.name.clone(),
                declaring_type: current_type.clone(),
                member_type: member.ty.clone(),
                element_kind: self.registry.element_kind(&member.ty)?,
                is_collection: member.ty.is_list(),
                filter: None,
                query: None,
            };
            out = out.append(segment);
            if idx + 1 < path.len() {
                current_type = member
                    .ty
                    .type_name()
                    .cloned()
                    .ok_or_else(|| Error::unresolved(&member.ty.to_string(), &path[idx + 1]))?;
            }
        }
        Ok(out)
    }

    fn select(&mut self, type_name: &str, prefix: &PathList, item: &PathSelectItem) -> Result<()> {
        let path = self.walk(type_name, prefix, &item.path)?;
        let Some(last) = path.last() else {
            return Ok(());
        };
        let kind = self.registry.item_kind(&last.member_type)?;
        match (kind, last.element_type_name().cloned()) {
            (ElementKind::Complex, Some(element)) => {
                if let Some(nested) = &item.nested {
                    self.level(&element, &path, Some(nested))?;
                } else {
                    self.default_selects(&element, &path)?;
                }
            }
            // Navigation members named in $select without $expand are kept so
            // the projection assigns them their empty default.
            _ => self.push_select(path),
        }
        Ok(())
    }

    fn expand(&mut self, type_name: &str, prefix: &PathList, item: &ExpandItem) -> Result<()> {
        let path = self.walk(type_name, prefix, &item.path)?;
        if path.len() > self.max_expand_depth {
            return Err(Error::Query(odata_query::Error::InvalidExpand(format!(
                "'{path}' is nested deeper than {}",
                self.max_expand_depth
            ))));
        }
        let Some(last) = path.last() else {
            return Ok(());
        };
        let element = match (self.registry.item_kind(&last.member_type)?, last.element_type_name()) {
            (ElementKind::Entity, Some(element)) => element.clone(),
            _ => {
                return Err(Error::Query(odata_query::Error::InvalidExpand(format!(
                    "'{path}' is not a navigation member"
                ))));
            }
        };

        let filter = item
            .filter
            .clone()
            .map(|clause| FilterOptions::new(clause, &element, self.context));
        let query = item.has_query_options().then(|| QueryOptions {
            order_by: item.order.clone(),
            skip: item.skip,
            top: item.top,
        });
        let path = with_options(&path, filter, query);

        let has_nested_expands = self.level(&element, &path, item.nested.as_ref())?;
        if !has_nested_expands {
            self.push_expansion(path);
        }
        Ok(())
    }

    /// Literal members, literal collections and complex members (recursively).
    fn default_selects(&mut self, type_name: &str, prefix: &PathList) -> Result<()> {
        let members: Vec<_> = self.registry.members(type_name)?.into_iter().cloned().collect();
        for member in members {
            let kind = self.registry.item_kind(&member.ty)?;
            let segment = PathSegment {
                member_name: member.name.clone(),
                declaring_type: Arc::from(type_name),
                member_type: member.ty.clone(),
                element_kind: self.registry.element_kind(&member.ty)?,
                is_collection: member.ty.is_list(),
                filter: None,
                query: None,
            };
            match (kind, member.ty.type_name()) {
                (ElementKind::Primitive, _) => self.push_select(prefix.append(segment)),
                (ElementKind::Complex, Some(element)) => {
                    let recursive = prefix
                        .segments()
                        .iter()
                        .any(|s| s.element_type_name() == Some(element));
                    if !recursive {
                        self.default_selects(element, &prefix.append(segment))?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Replace the options of the last segment.
fn with_options(path: &PathList, filter: Option<FilterOptions>, query: Option<QueryOptions>) -> PathList {
    let mut segments = path.segments().to_vec();
    if let Some(last) = segments.last_mut() {
        last.filter = filter;
        last.query = query;
    }
    PathList(segments.into())
}
