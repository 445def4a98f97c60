use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::expr::{Expr, Lambda, Parameter};

/// Rename every lambda parameter whose name starts with `$` to a plain
/// identifier not used elsewhere in the tree. Parameters sharing name and type
/// share the new name.
#[must_use]
pub fn rename_reserved_parameters(expr: Expr) -> Expr {
    let declared = expr.declared_parameters();
    let mut taken: HashSet<Arc<str>> = declared
        .iter()
        .filter(|p| !p.name.starts_with('$'))
        .map(|p| p.name.clone())
        .collect();

    let mut renames: HashMap<Parameter, Parameter> = HashMap::new();
    for p in declared {
        if !p.name.starts_with('$') || renames.contains_key(&p) {
            continue;
        }
        let base = p.name.trim_start_matches('$');
        let mut candidate = if base.is_empty() { "it".to_owned() } else { base.to_owned() };
        while taken.contains(candidate.as_str()) {
            candidate.push('0');
        }
        let name: Arc<str> = Arc::from(candidate);
        taken.insert(name.clone());
        let renamed = Parameter {
            name,
            ty: p.ty.clone(),
        };
        renames.insert(p, renamed);
    }

    if renames.is_empty() {
        return expr;
    }
    rename(expr, &renames)
}

fn rename(expr: Expr, renames: &HashMap<Parameter, Parameter>) -> Expr {
    match expr {
        Expr::Parameter(p) => Expr::Parameter(renames.get(&p).cloned().unwrap_or(p)),
        Expr::Lambda(l) => Expr::Lambda(Lambda {
            parameter: renames.get(&l.parameter).cloned().unwrap_or(l.parameter),
            body: Box::new(rename(*l.body, renames)),
        }),
        other => other.map_children(|child| rename(child, renames)),
    }
}
