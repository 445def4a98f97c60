//! Turns a [`PathForest`] into include lambdas over the model root type.
//!
//! Each include is `i => Convert(<member chain>, Object)`. Collection steps in
//! the chain become `.Select(i0 => ...)` with one parameter name per depth.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::{Expr, Lambda, Parameter, QueryMethod};
use crate::paths::{PathForest, PathList, PathSegment};
use crate::types::{ElementKind, TypeRef, TypeRegistry};

/// Parameter name used at `depth`: `i`, `i0`, `i00`, ...
fn parameter_name(depth: usize) -> String {
    let mut name = String::from("i");
    name.extend(std::iter::repeat_n('0', depth));
    name
}

/// Build includes for every expansion path, then selectors for every select
/// path reachable without an unexpanded navigation step.
///
/// # Errors
/// `Error::UnresolvedMember` when a segment no longer resolves against the
/// registry, `Error::UnknownType` for an unregistered root type.
pub fn build_includes(registry: &TypeRegistry, root_type: &str, forest: &PathForest) -> Result<Vec<Lambda>> {
    registry.get(root_type)?;
    let root = Parameter::new(&parameter_name(0), TypeRef::named(root_type));

    let mut out = Vec::with_capacity(forest.expansions.len() + forest.selects.len());
    for path in &forest.expansions {
        out.push(include(registry, &root, path)?);
    }
    for path in &forest.selects {
        if reachable(registry, path, &forest.expansions)? {
            out.push(include(registry, &root, path)?);
        }
    }
    Ok(out)
}

/// Every navigation step of `path` has to lie on an expanded prefix.
fn reachable(registry: &TypeRegistry, path: &PathList, expansions: &[PathList]) -> Result<bool> {
    for (idx, segment) in path.segments().iter().enumerate() {
        if registry.item_kind(&segment.member_type)? != ElementKind::Entity {
            continue;
        }
        let prefix = path.segments()[..=idx].iter().map(|s| &*s.member_name);
        let prefix: Vec<&str> = prefix.collect();
        let expanded = expansions.iter().any(|e| {
            e.len() >= prefix.len() && e.identifiers().zip(prefix.iter()).all(|(a, b)| a == *b)
        });
        if !expanded {
            return Ok(false);
        }
    }
    Ok(true)
}

fn include(registry: &TypeRegistry, root: &Parameter, path: &PathList) -> Result<Lambda> {
    let body = chain(registry, Expr::parameter(root), path.segments(), 0)?;
    Ok(Lambda::new(root.clone(), body.convert(TypeRef::Object)))
}

fn chain(registry: &TypeRegistry, target: Expr, segments: &[PathSegment], depth: usize) -> Result<Expr> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(target);
    };
    let member = registry.require_member(&segment.declaring_type, &segment.member_name)?;
    let access = target.member(&member.name, member.ty.clone());
    if rest.is_empty() {
        return Ok(access);
    }
    if member.ty.is_list() {
        let child = Parameter::new(&parameter_name(depth + 1), member.ty.element_type().clone());
        let inner = chain(registry, Expr::parameter(&child), rest, depth + 1)?;
        Ok(access.select(Lambda::new(child, inner)))
    } else {
        chain(registry, access, rest, depth)
    }
}

/// Member names an include walks through, in order.
///
/// # Errors
/// `Error::Mapping` when the lambda is not a member chain.
pub fn member_chain(include: &Lambda) -> Result<Vec<Arc<str>>> {
    let mut out = Vec::new();
    collect_chain(&include.body, &mut out)?;
    Ok(out)
}

fn collect_chain(expr: &Expr, out: &mut Vec<Arc<str>>) -> Result<()> {
    match expr {
        Expr::Parameter(_) => Ok(()),
        Expr::Convert { operand, .. } => collect_chain(operand, out),
        Expr::Member { target, member, .. } => {
            collect_chain(target, out)?;
            out.push(member.clone());
            Ok(())
        }
        Expr::Call {
            method: QueryMethod::Select,
            args,
            ..
        } => match args.as_slice() {
            [source, Expr::Lambda(selector)] => {
                collect_chain(source, out)?;
                collect_chain(&selector.body, out)
            }
            _ => Err(Error::Mapping(format!("unexpected include step {expr}"))),
        },
        other => Err(Error::Mapping(format!("unexpected include step {other}"))),
    }
}
