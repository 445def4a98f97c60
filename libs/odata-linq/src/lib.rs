#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! OData query projection over mapped expression trees.
//!
//! Takes OData query options expressed against a *model* type, builds an
//! expression tree against the *source* type the model is mapped from, and
//! executes it through a query provider. `$select`/`$expand` become a
//! projection populated only where asked; nested `$filter`, `$orderby`,
//! `$skip` and `$top` inside `$expand` are spliced into that projection.
//!
//! ```ignore
//! let mut options = ODataQueryOptions::new("ParentModel")
//!     .with_filter(Expr::field("Name").eq("a"))
//!     .with_select_expand(SelectExpandClause::new().expand(ExpandItem::new("Children").with_top(2)));
//! let rows = queryable.get(&mapper, &mut options, None)?;
//! ```
pub mod error;
pub mod expr;
pub mod filter;
pub mod mapping;
pub mod paths;
pub mod provider;
pub mod query;
pub mod selectors;
pub mod settings;
pub mod splice;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use expr::{Expr, Lambda, Parameter, QueryMethod};
pub use filter::{FilterContext, FilterOptions, QueryOptions};
pub use mapping::{Mapper, MapperConfiguration, MemberMap, TypeMap};
pub use paths::{PathForest, PathList, PathSegment, build_forest};
pub use provider::{AsyncQueryProvider, FeedPage, InMemoryProvider, QueryProvider, Queryable};
pub use query::ODataQueryableExt;
pub use selectors::build_includes;
pub use settings::QuerySettings;
pub use splice::{ExpansionOption, Splicer};
pub use types::{CollectionKind, ElementKind, LiteralKind, TypeDef, TypeKind, TypeRef, TypeRegistry};
pub use value::{Record, Value};
