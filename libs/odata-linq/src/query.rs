//! Applies OData query options to a source [`Queryable`] and projects the
//! result into the model type.
//!
//! Order of work: validate limits, bind and map `$filter`, count, apply the
//! filter, build includes, map the root `$orderby`/`$skip`/`$top`, project,
//! splice nested expansion options, rename reserved parameters and execute.

use std::sync::Arc;

use async_trait::async_trait;
use odata_query::{NextPage, ODataQueryOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::expr::{Expr, Lambda, Parameter};
use crate::filter::{FilterContext, QueryOptions, bind_filter};
use crate::mapping::Mapper;
use crate::paths::build_forest;
use crate::provider::Queryable;
use crate::selectors::build_includes;
use crate::settings::QuerySettings;
use crate::splice::{Splicer, expansion_options, filter_lists, query_method_lists, rename_reserved_parameters};
use crate::types::TypeRef;
use crate::value::Value;

/// OData query entry points over a source queryable.
///
/// `options` are keyed by model member names. `$count` and next-page results
/// are recorded on `options.feature`.
#[async_trait]
pub trait ODataQueryableExt {
    /// Build the projected query without executing it.
    ///
    /// # Errors
    /// Validation, binding and mapping errors; provider errors of the count.
    fn get_query(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Queryable>;

    /// Build and execute the projected query.
    ///
    /// # Errors
    /// As [`ODataQueryableExt::get_query`], plus provider errors.
    fn get(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Vec<Value>>;

    /// Async [`ODataQueryableExt::get_query`]; the count runs through the
    /// provider's async side when it has one.
    ///
    /// # Errors
    /// `Error::Cancelled` when the settings' token fires, before anything
    /// is recorded on `options`.
    async fn get_query_async(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Queryable>;

    /// Async [`ODataQueryableExt::get`], reading the provider's paged feed.
    ///
    /// # Errors
    /// `Error::Cancelled` when the settings' token fires.
    async fn get_async(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Vec<Value>>;
}

/// Filtered source query plus what the later steps need.
struct Prepared {
    settings: QuerySettings,
    context: FilterContext,
    model_type: Arc<str>,
    source_type: Arc<str>,
    filtered: Expr,
    /// Rows are counted for `$count` and for next-page links.
    needs_count: bool,
}

impl Queryable {
    fn prepare(&self, mapper: &dyn Mapper, options: &ODataQueryOptions, settings: Option<&QuerySettings>) -> Result<Prepared> {
        let settings = settings.cloned().unwrap_or_default();
        settings.odata.limits.validate(options)?;
        if let Some(search) = &options.search {
            return Err(Error::Unsupported(format!("$search={search}")));
        }

        let registry = mapper.registry();
        let model_type: Arc<str> = Arc::from(options.model_type.as_str());
        registry.get(&model_type)?;
        let source_type = mapper.source_type(&model_type)?;
        if source_type != self.element_type {
            return Err(Error::Mapping(format!(
                "{model_type} is mapped from {source_type}, not from {}",
                self.element_type
            )));
        }
        let context = settings.filter_context(self.provider().as_ref());

        let mut filtered = self.expression.clone();
        if let Some(clause) = options.filter() {
            let predicate = bind_filter(registry, &model_type, clause, context)?;
            let mapped = mapper.map_predicate(&predicate, &source_type)?;
            debug!(predicate = %mapped, "bound $filter");
            filtered = filtered.where_(mapped);
        }

        let needs_count = options.count || settings.page_size().is_some();
        Ok(Prepared {
            settings,
            context,
            model_type,
            source_type,
            filtered,
            needs_count,
        })
    }

    /// Everything after the count: paging, projection, splicing, next page.
    fn finish(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        prepared: Prepared,
        count: Option<u64>,
    ) -> Result<Queryable> {
        let Prepared {
            settings,
            context,
            model_type,
            source_type,
            filtered,
            ..
        } = prepared;
        let registry = mapper.registry();
        let page_size = settings.page_size();

        if options.count {
            options.feature.total_count = count;
        }

        let forest = build_forest(
            registry,
            &model_type,
            options.select_expand(),
            context,
            settings.odata.limits.max_expand_depth,
        )?;
        let includes = build_includes(registry, &model_type, &forest)?;

        let take = match (options.top, page_size) {
            (Some(top), Some(page)) => Some(top.min(page)),
            (top, None) => top,
            (None, page) => page,
        };
        let root = QueryOptions {
            order_by: options.order.clone(),
            skip: options.skip,
            top: take,
        };
        let mut expr = filtered;
        if !root.is_empty() {
            let q = Parameter::new("q", TypeRef::queryable(TypeRef::named(&model_type)));
            let body = root.apply(registry, &model_type, Expr::parameter(&q), context)?;
            let transform = mapper.map_query_transform(&Lambda::new(q, body))?;
            expr = transform.apply_to(&expr);
        }

        let projection = mapper.project(&source_type, &model_type, &includes, &settings.projection.parameters)?;
        expr = expr.select(projection);

        let expansions = expansion_options(&forest);
        let splicer = Splicer::new(mapper, context);
        expr = splicer.splice_filters(expr, &filter_lists(&expansions))?;
        expr = splicer.splice_query_methods(expr, &query_method_lists(&expansions))?;
        expr = rename_reserved_parameters(expr);

        if let (Some(page), Some(count)) = (page_size, count) {
            record_next_page(options, page, count);
        }
        debug!(
            expansions = forest.expansions.len(),
            selects = forest.selects.len(),
            expression = %expr,
            "projected query built"
        );
        Ok(self.with_expression(expr))
    }
}

/// Rows left after `$skip`, capped by `$top`; a next page exists when they do
/// not fit in one page.
fn record_next_page(options: &mut ODataQueryOptions, page: u64, count: u64) {
    let remaining = count.saturating_sub(options.skip.unwrap_or(0));
    let remaining = options.top.map_or(remaining, |top| remaining.min(top));
    if remaining <= page {
        return;
    }
    let Some(next) = NextPage::after(options.skip, options.top, page) else {
        return;
    };
    options.feature.next_link = options.request_uri.as_ref().map(|uri| next.to_url(uri));
    options.feature.next_page = Some(next);
}

async fn cancellable<T>(token: &CancellationToken, work: impl Future<Output = Result<T>> + Send) -> Result<T> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled),
        out = work => out,
    }
}

#[async_trait]
impl ODataQueryableExt for Queryable {
    #[instrument(skip_all, fields(model = %options.model_type))]
    fn get_query(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Queryable> {
        let prepared = self.prepare(mapper, options, settings)?;
        let count = if prepared.needs_count {
            Some(self.provider().count(&prepared.filtered)?)
        } else {
            None
        };
        self.finish(mapper, options, prepared, count)
    }

    fn get(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Vec<Value>> {
        self.get_query(mapper, options, settings)?.to_list()
    }

    #[instrument(skip_all, fields(model = %options.model_type))]
    async fn get_query_async(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Queryable> {
        let token = settings
            .map(|s| s.async_settings.cancellation_token.clone())
            .unwrap_or_default();
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let prepared = self.prepare(mapper, options, settings)?;
        let count = if prepared.needs_count {
            let provider = self.provider();
            let count = match provider.as_async() {
                Some(feed) => cancellable(&token, feed.count(&prepared.filtered, &token)).await?,
                None => provider.count(&prepared.filtered)?,
            };
            Some(count)
        } else {
            None
        };
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.finish(mapper, options, prepared, count)
    }

    async fn get_async(
        &self,
        mapper: &dyn Mapper,
        options: &mut ODataQueryOptions,
        settings: Option<&QuerySettings>,
    ) -> Result<Vec<Value>> {
        let token = settings
            .map(|s| s.async_settings.cancellation_token.clone())
            .unwrap_or_default();
        let query = self.get_query_async(mapper, options, settings).await?;
        cancellable(&token, query.to_list_async(&token)).await
    }
}
