//! Query options for one request against a model type, plus the response
//! bookkeeping (`$count` result, next-page link) recorded while executing it.

use url::Url;

use crate::ast::Expr;
use crate::{ODataOrderBy, SelectExpandClause};

/// All query options of one request, keyed by model member names.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ODataQueryOptions {
    /// Model type the options are expressed against.
    pub model_type: String,
    pub filter: Option<Expr>,
    pub order: ODataOrderBy,
    pub select_expand: Option<SelectExpandClause>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: bool,
    pub search: Option<String>,
    /// Original request URI, used as the base of the next-page link.
    pub request_uri: Option<Url>,
    pub feature: ODataFeature,
}

impl ODataQueryOptions {
    pub fn new(model_type: &str) -> Self {
        Self {
            model_type: model_type.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, expr: Expr) -> Self {
        self.filter = Some(expr);
        self
    }

    pub fn with_order(mut self, order: ODataOrderBy) -> Self {
        self.order = order;
        self
    }

    pub fn with_select_expand(mut self, clause: SelectExpandClause) -> Self {
        self.select_expand = Some(clause);
        self
    }

    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn with_search(mut self, search: &str) -> Self {
        self.search = Some(search.to_owned());
        self
    }

    pub fn with_request_uri(mut self, uri: Url) -> Self {
        self.request_uri = Some(uri);
        self
    }

    #[must_use]
    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn select_expand(&self) -> Option<&SelectExpandClause> {
        self.select_expand.as_ref()
    }

    #[must_use]
    pub fn feature(&self) -> &ODataFeature {
        &self.feature
    }
}

/// Results recorded on the options while the query runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ODataFeature {
    pub total_count: Option<u64>,
    pub next_page: Option<NextPage>,
    pub next_link: Option<Url>,
}

/// `$skip`/`$top` of the page following the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NextPage {
    pub skip: u64,
    pub top: Option<u64>,
}

impl NextPage {
    /// Options of the page after a page of `page_size` rows.
    ///
    /// `$skip` advances by `page_size`; `$top` shrinks by `page_size` when it was
    /// set. Returns `None` when a requested `$top` is already exhausted.
    #[must_use]
    pub fn after(skip: Option<u64>, top: Option<u64>, page_size: u64) -> Option<Self> {
        let next_top = match top {
            Some(t) if t <= page_size => return None,
            Some(t) => Some(t - page_size),
            None => None,
        };
        Some(Self {
            skip: skip.unwrap_or(0) + page_size,
            top: next_top,
        })
    }

    /// Rewrite `request` so `$top`/`$skip` describe this page; every other query
    /// pair is kept in order.
    #[must_use]
    pub fn to_url(&self, request: &Url) -> Url {
        let kept: Vec<(String, String)> = request
            .query_pairs()
            .filter(|(k, _)| {
                !k.eq_ignore_ascii_case("$top")
                    && !k.eq_ignore_ascii_case("$skip")
                    && !k.eq_ignore_ascii_case("$skiptoken")
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut next = request.clone();
        next.set_query(None);
        {
            let mut pairs = next.query_pairs_mut();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            if let Some(top) = self.top {
                pairs.append_pair("$top", &top.to_string());
            }
            pairs.append_pair("$skip", &self.skip.to_string());
        }
        next
    }
}
