//! `$select` / `$expand` clause tree.
//!
//! The shape follows what an OData URI parser hands over: a clause is a list of
//! items, each item either selects a member path or expands a navigation path
//! with its own nested clause and query options. Paths are model member names.

use crate::ODataOrderBy;
use crate::ast::Expr;

/// A `$select`/`$expand` clause at one nesting level.
#[derive(Clone, Debug, Default, PartialEq)]
#[must_use]
pub struct SelectExpandClause {
    pub items: Vec<SelectItem>,
    /// `$select=*` was given at this level.
    pub all_selected: bool,
}

impl SelectExpandClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `$select=<path>`; `path` uses `/` between segments.
    pub fn select(mut self, path: &str) -> Self {
        self.items.push(SelectItem::Path(PathSelectItem::new(path)));
        self
    }

    /// Add a select item that carries its own nested clause, e.g. `A($select=B)`.
    pub fn select_nested(mut self, path: &str, nested: SelectExpandClause) -> Self {
        self.items
            .push(SelectItem::Path(PathSelectItem::new(path).with_nested(nested)));
        self
    }

    pub fn select_all(mut self) -> Self {
        self.all_selected = true;
        self
    }

    pub fn expand(mut self, item: ExpandItem) -> Self {
        self.items.push(SelectItem::Expand(item));
        self
    }

    pub fn item(mut self, item: SelectItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn path_selects(&self) -> impl Iterator<Item = &PathSelectItem> {
        self.items.iter().filter_map(|item| match item {
            SelectItem::Path(p) => Some(p),
            _ => None,
        })
    }

    pub fn expands(&self) -> impl Iterator<Item = &ExpandItem> {
        self.items.iter().filter_map(|item| match item {
            SelectItem::Expand(e) => Some(e),
            _ => None,
        })
    }

    /// True when no member path is explicitly selected at this level, meaning
    /// the default projection applies.
    #[must_use]
    pub fn selects_by_default(&self) -> bool {
        self.all_selected || self.path_selects().next().is_none()
    }
}

/// One entry of a `$select`/`$expand` clause.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Path(PathSelectItem),
    Expand(ExpandItem),
    /// `$expand=Nav/$ref` (entity references only).
    ExpandRef(Vec<String>),
    /// `$select=Collection/$count`.
    Count(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PathSelectItem {
    pub path: Vec<String>,
    pub nested: Option<SelectExpandClause>,
}

impl PathSelectItem {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: split_path(path),
            nested: None,
        }
    }

    #[must_use]
    pub fn with_nested(mut self, nested: SelectExpandClause) -> Self {
        self.nested = Some(nested);
        self
    }
}

/// `$expand=<path>(...)` with nested options.
#[derive(Clone, Debug, PartialEq)]
#[must_use]
pub struct ExpandItem {
    pub path: Vec<String>,
    pub nested: Option<SelectExpandClause>,
    pub filter: Option<Expr>,
    pub order: ODataOrderBy,
    pub skip: Option<u64>,
    pub top: Option<u64>,
}

impl ExpandItem {
    pub fn new(path: &str) -> Self {
        Self {
            path: split_path(path),
            nested: None,
            filter: None,
            order: ODataOrderBy::empty(),
            skip: None,
            top: None,
        }
    }

    pub fn with_nested(mut self, nested: SelectExpandClause) -> Self {
        self.nested = Some(nested);
        self
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_order(mut self, order: ODataOrderBy) -> Self {
        self.order = order;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Any of `$orderby`, `$skip`, `$top` present.
    #[must_use]
    pub fn has_query_options(&self) -> bool {
        !self.order.is_empty() || self.skip.is_some() || self.top.is_some()
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
