//! Splices nested `$expand` filters and `$orderby`/`$skip`/`$top` into a
//! projection built by a [`Mapper`].
//!
//! The projection knows nothing about expansion options. Each option list
//! describes one expansion path; the visitor walks the projection, follows
//! member-init bindings along that path and rewrites the binding the last
//! option points at.

mod rename;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::expr::{Binding, Expr, Lambda, Parameter, QueryMethod};
use crate::filter::{FilterContext, FilterOptions, QueryOptions};
use crate::mapping::Mapper;
use crate::paths::PathForest;
use crate::types::{TypeRef, list_types_equivalent};

pub use rename::rename_reserved_parameters;

/// One step of an expansion path with the options attached to it.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpansionOption {
    pub member_name: Arc<str>,
    /// Model type declaring the member.
    pub parent_type: Arc<str>,
    pub member_type: TypeRef,
    pub filter: Option<FilterOptions>,
    pub query: Option<QueryOptions>,
}

/// One option list per expansion path, in forest order.
#[must_use]
pub fn expansion_options(forest: &PathForest) -> Vec<Vec<ExpansionOption>> {
    forest
        .expansions
        .iter()
        .map(|path| {
            path.segments()
                .iter()
                .map(|s| ExpansionOption {
                    member_name: s.member_name.clone(),
                    parent_type: s.declaring_type.clone(),
                    member_type: s.member_type.clone(),
                    filter: s.filter.clone(),
                    query: s.query.clone(),
                })
                .collect()
        })
        .collect()
}

/// Prefixes ending in a filtered step, each once. Only the last option of a
/// list keeps its filter.
#[must_use]
pub fn filter_lists(options: &[Vec<ExpansionOption>]) -> Vec<Vec<ExpansionOption>> {
    prefix_lists(options, |o| o.filter.is_some())
}

/// Prefixes ending in a step with `$orderby`/`$skip`/`$top`, each once. Only
/// the last option of a list keeps its query options.
#[must_use]
pub fn query_method_lists(options: &[Vec<ExpansionOption>]) -> Vec<Vec<ExpansionOption>> {
    prefix_lists(options, |o| o.query.as_ref().is_some_and(|q| !q.is_empty()))
}

fn prefix_lists(
    options: &[Vec<ExpansionOption>],
    selected: impl Fn(&ExpansionOption) -> bool,
) -> Vec<Vec<ExpansionOption>> {
    let mut seen: HashSet<Vec<Arc<str>>> = HashSet::new();
    let mut out = Vec::new();
    for list in options {
        for (idx, option) in list.iter().enumerate() {
            if !selected(option) {
                continue;
            }
            let key: Vec<Arc<str>> = list[..=idx].iter().map(|o| o.member_name.clone()).collect();
            if !seen.insert(key) {
                continue;
            }
            let mut prefix = list[..=idx].to_vec();
            for o in &mut prefix[..idx] {
                o.filter = None;
                o.query = None;
            }
            out.push(prefix);
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Rewrite {
    Filter,
    Query,
}

/// Rewrites a projection expression with nested expansion options.
pub struct Splicer<'a> {
    mapper: &'a dyn Mapper,
    context: FilterContext,
}

impl<'a> Splicer<'a> {
    #[must_use]
    pub fn new(mapper: &'a dyn Mapper, context: FilterContext) -> Self {
        Self { mapper, context }
    }

    /// Add one `Where` per filter list.
    ///
    /// # Errors
    /// `Error::MalformedExpansion` for an empty list or one whose last option
    /// has no filter; binding and mapping errors of the nested filter.
    pub fn splice_filters(&self, expr: Expr, lists: &[Vec<ExpansionOption>]) -> Result<Expr> {
        self.splice(expr, lists, Rewrite::Filter)
    }

    /// Add `OrderBy`/`ThenBy`, `Skip` and `Take` per query-method list.
    ///
    /// # Errors
    /// `Error::MalformedExpansion` for an empty list or one whose last option
    /// has no query options; mapping errors of the order keys.
    pub fn splice_query_methods(&self, expr: Expr, lists: &[Vec<ExpansionOption>]) -> Result<Expr> {
        self.splice(expr, lists, Rewrite::Query)
    }

    fn splice(&self, expr: Expr, lists: &[Vec<ExpansionOption>], kind: Rewrite) -> Result<Expr> {
        let mut expr = expr;
        for list in lists {
            let last = list
                .last()
                .ok_or_else(|| Error::MalformedExpansion("empty expansion option list".to_owned()))?;
            let missing = match kind {
                Rewrite::Filter => last.filter.is_none(),
                Rewrite::Query => last.query.as_ref().is_none_or(QueryOptions::is_empty),
            };
            if missing {
                return Err(Error::MalformedExpansion(format!(
                    "'{}' carries no options to splice",
                    path_of(list)
                )));
            }

            let mut applied = 0;
            expr = self.visit(expr, list, 0, kind, &mut applied)?;
            if applied == 0 {
                warn!(expansion = %path_of(list), "expansion options matched no projected member");
            } else {
                debug!(expansion = %path_of(list), applied, "spliced expansion options");
            }
        }
        Ok(expr)
    }

    fn visit(
        &self,
        expr: Expr,
        list: &[ExpansionOption],
        cursor: usize,
        kind: Rewrite,
        applied: &mut usize,
    ) -> Result<Expr> {
        let Some(option) = list.get(cursor) else {
            return Ok(expr);
        };
        match expr {
            Expr::MemberInit { ty, bindings }
                if ty.type_name().is_some_and(|n| **n == *option.parent_type) =>
            {
                let mut out = Vec::with_capacity(bindings.len());
                for b in bindings {
                    let matches = b.member.eq_ignore_ascii_case(&option.member_name)
                        && list_types_equivalent(&b.expr.ty(), &option.member_type);
                    let expr = if matches && cursor + 1 < list.len() {
                        self.visit(b.expr, list, cursor + 1, kind, applied)?
                    } else if matches {
                        *applied += 1;
                        self.rewrite(b.expr, option, kind)?
                    } else {
                        b.expr
                    };
                    out.push(Binding {
                        member: b.member,
                        expr,
                    });
                }
                Ok(Expr::MemberInit { ty, bindings: out })
            }
            other => other.try_map_children(|child| self.visit(child, list, cursor, kind, applied)),
        }
    }

    fn rewrite(&self, binding: Expr, option: &ExpansionOption, kind: Rewrite) -> Result<Expr> {
        let model_element = option.member_type.type_name().cloned().ok_or_else(|| {
            Error::MalformedExpansion(format!("'{}' is not a navigation member", option.member_name))
        })?;
        match kind {
            Rewrite::Filter => {
                let filter = option.filter.as_ref().ok_or_else(|| {
                    Error::MalformedExpansion(format!("'{}' has no filter", option.member_name))
                })?;
                let predicate = filter.bind(self.mapper.registry())?;
                rewrite_at(binding, &model_element, option, &|source, site| {
                    let predicate = match site {
                        Site::Bare { mapped: false } => predicate.clone(),
                        Site::SelectSource | Site::Bare { mapped: true } => {
                            self.map_predicate(&predicate, &source)?
                        }
                    };
                    Ok(source.where_(predicate))
                })
            }
            Rewrite::Query => {
                let query = option.query.as_ref().ok_or_else(|| {
                    Error::MalformedExpansion(format!("'{}' has no query options", option.member_name))
                })?;
                let q = Parameter::new("q", TypeRef::queryable(TypeRef::named(&model_element)));
                let body = query.apply(
                    self.mapper.registry(),
                    &model_element,
                    Expr::parameter(&q),
                    self.context,
                )?;
                let transform = Lambda::new(q, body);
                rewrite_at(binding, &model_element, option, &|source, site| match site {
                    Site::SelectSource => Ok(self.mapper.map_query_transform(&transform)?.apply_to(&source)),
                    Site::Bare { mapped: false } => {
                        Ok(transform.apply_to(&source.method(QueryMethod::AsQueryable)))
                    }
                    Site::Bare { mapped: true } => Ok(self
                        .mapper
                        .map_query_transform(&transform)?
                        .apply_to(&source.method(QueryMethod::AsQueryable))),
                })
            }
        }
    }

    fn map_predicate(&self, predicate: &Lambda, source: &Expr) -> Result<Lambda> {
        let source_type = source
            .ty()
            .type_name()
            .cloned()
            .ok_or_else(|| Error::Mapping(format!("{source} is not a sequence of a mapped type")))?;
        self.mapper.map_predicate(predicate, &source_type)
    }
}

/// Where a rewrite lands: the source of a projecting `Select`, or a bare
/// collection member (`mapped` when its elements are not the model type).
#[derive(Clone, Copy)]
enum Site {
    SelectSource,
    Bare { mapped: bool },
}

/// Apply `f` to the source of the leftmost `Select` of the binding, or to the
/// bare collection (coerced back to its collection kind) when there is none.
/// A null-guarded collection `IIF(src == null, empty, chain)` is rewritten in
/// its `chain` branch only.
fn rewrite_at(
    binding: Expr,
    model_element: &str,
    option: &ExpansionOption,
    f: &dyn Fn(Expr, Site) -> Result<Expr>,
) -> Result<Expr> {
    match binding {
        Expr::Condition {
            test,
            if_true,
            if_false,
            ty,
        } => Ok(Expr::Condition {
            test,
            if_true,
            if_false: Box::new(rewrite_chain(*if_false, model_element, option, f)?),
            ty,
        }),
        other => rewrite_chain(other, model_element, option, f),
    }
}

fn rewrite_chain(
    binding: Expr,
    model_element: &str,
    option: &ExpansionOption,
    f: &dyn Fn(Expr, Site) -> Result<Expr>,
) -> Result<Expr> {
    if has_select(&binding) {
        return wrap_select_source(binding, &|source| f(source, Site::SelectSource));
    }
    let ty = binding.ty();
    if !ty.is_list() {
        return Err(Error::MalformedExpansion(format!(
            "'{}' is not projected as a collection",
            option.member_name
        )));
    }
    let mapped = ty.type_name().is_none_or(|n| &**n != model_element);
    Ok(f(binding, Site::Bare { mapped })?.coerce_to(ty.collection_kind()))
}

fn path_of(list: &[ExpansionOption]) -> String {
    list.iter()
        .map(|o| &*o.member_name)
        .collect::<Vec<_>>()
        .join("/")
}

/// The receiver chain of `expr` contains a `Select`.
fn has_select(expr: &Expr) -> bool {
    match expr {
        Expr::Call { method, args, .. } => {
            *method == QueryMethod::Select || args.first().is_some_and(has_select)
        }
        _ => false,
    }
}

fn wrap_select_source(expr: Expr, f: &dyn Fn(Expr) -> Result<Expr>) -> Result<Expr> {
    let Expr::Call { method, args, .. } = expr else {
        return Ok(expr);
    };
    let mut args = args.into_iter();
    let Some(receiver) = args.next() else {
        return Err(Error::MalformedExpansion(format!("{} without a source", method.name())));
    };
    let receiver = if has_select(&receiver) {
        wrap_select_source(receiver, f)?
    } else if method == QueryMethod::Select {
        f(receiver)?
    } else {
        receiver
    };
    Ok(Expr::call(method, std::iter::once(receiver).chain(args).collect()))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests;
