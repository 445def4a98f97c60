//! Input validation and safety limits for OData query options
//!
//! Caps checked before any provider call:
//! - Maximum `$top` value
//! - Maximum `$skip` value
//! - Maximum number of `$orderby` keys
//! - Maximum filter expression size (AST nodes)
//! - Maximum `$expand` nesting depth

use serde::Deserialize;

use crate::{Error, ODataQueryOptions, SelectExpandClause};

/// Configurable OData input limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ODataLimits {
    /// Maximum value for $top (default: 1000)
    pub max_top: u64,
    /// Maximum value for $skip (default: 1000000)
    pub max_skip: u64,
    /// Maximum number of keys in a single $orderby (default: 5)
    pub max_orderby_fields: usize,
    /// Maximum number of AST nodes in one $filter (default: 200)
    pub max_filter_nodes: usize,
    /// Maximum $expand nesting depth (default: 4)
    pub max_expand_depth: usize,
}

impl Default for ODataLimits {
    fn default() -> Self {
        Self {
            max_top: 1000,
            max_skip: 1_000_000,
            max_orderby_fields: 5,
            max_filter_nodes: 200,
            max_expand_depth: 4,
        }
    }
}

impl ODataLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_top(mut self, max_top: u64) -> Self {
        self.max_top = max_top;
        self
    }

    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u64) -> Self {
        self.max_skip = max_skip;
        self
    }

    #[must_use]
    pub fn with_max_orderby_fields(mut self, max: usize) -> Self {
        self.max_orderby_fields = max;
        self
    }

    #[must_use]
    pub fn with_max_filter_nodes(mut self, max: usize) -> Self {
        self.max_filter_nodes = max;
        self
    }

    #[must_use]
    pub fn with_max_expand_depth(mut self, max: usize) -> Self {
        self.max_expand_depth = max;
        self
    }

    /// Validate a $top value against limits
    ///
    /// # Errors
    /// `Error::InvalidLimit` when `top` exceeds `max_top`.
    pub fn validate_top(&self, top: u64) -> Result<(), Error> {
        if top > self.max_top {
            return Err(Error::InvalidLimit);
        }
        Ok(())
    }

    /// Validate a $skip value against limits
    ///
    /// # Errors
    /// `Error::InvalidLimit` when `skip` exceeds `max_skip`.
    pub fn validate_skip(&self, skip: u64) -> Result<(), Error> {
        if skip > self.max_skip {
            return Err(Error::InvalidLimit);
        }
        Ok(())
    }

    /// Validate the size of a $filter expression
    ///
    /// # Errors
    /// `Error::InvalidFilter` when the expression has too many nodes.
    pub fn validate_filter(&self, filter: &crate::ast::Expr) -> Result<(), Error> {
        if filter.node_count() > self.max_filter_nodes {
            return Err(Error::InvalidFilter(format!(
                "Filter expression exceeds maximum of {} nodes",
                self.max_filter_nodes
            )));
        }
        Ok(())
    }

    /// Validate number of $orderby keys
    ///
    /// # Errors
    /// `Error::InvalidOrderByField` when there are too many keys.
    pub fn validate_orderby_count(&self, count: usize) -> Result<(), Error> {
        if count > self.max_orderby_fields {
            return Err(Error::InvalidOrderByField(format!(
                "Too many orderby fields (max: {})",
                self.max_orderby_fields
            )));
        }
        Ok(())
    }

    /// Validate `$expand` nesting depth, counting path segments of each expand.
    ///
    /// # Errors
    /// `Error::InvalidExpand` when any expansion chain is deeper than allowed.
    pub fn validate_expand_depth(&self, clause: &SelectExpandClause) -> Result<(), Error> {
        let depth = expand_depth(clause);
        if depth > self.max_expand_depth {
            return Err(Error::InvalidExpand(format!(
                "Expansion depth {depth} exceeds maximum of {}",
                self.max_expand_depth
            )));
        }
        Ok(())
    }

    /// Validate every option of a request, including nested expand options.
    ///
    /// # Errors
    /// The first limit violation found.
    pub fn validate(&self, options: &ODataQueryOptions) -> Result<(), Error> {
        if let Some(top) = options.top {
            self.validate_top(top)?;
        }
        if let Some(skip) = options.skip {
            self.validate_skip(skip)?;
        }
        if let Some(filter) = &options.filter {
            self.validate_filter(filter)?;
        }
        self.validate_orderby_count(options.order.len())?;
        if let Some(clause) = &options.select_expand {
            self.validate_expand_depth(clause)?;
            self.validate_nested(clause)?;
        }
        Ok(())
    }

    fn validate_nested(&self, clause: &SelectExpandClause) -> Result<(), Error> {
        for expand in clause.expands() {
            if let Some(top) = expand.top {
                self.validate_top(top)?;
            }
            if let Some(skip) = expand.skip {
                self.validate_skip(skip)?;
            }
            if let Some(filter) = &expand.filter {
                self.validate_filter(filter)?;
            }
            self.validate_orderby_count(expand.order.len())?;
            if let Some(nested) = &expand.nested {
                self.validate_nested(nested)?;
            }
        }
        Ok(())
    }
}

fn expand_depth(clause: &SelectExpandClause) -> usize {
    clause
        .expands()
        .map(|e| e.path.len() + e.nested.as_ref().map_or(0, expand_depth))
        .max()
        .unwrap_or(0)
}
