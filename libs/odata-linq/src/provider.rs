//! Query providers: the deferred [`Queryable`] handle, the sync and async
//! execution contracts, and an in-memory implementation of both.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::expr::eval::Interpreter;
use crate::types::{TypeRef, TypeRegistry};
use crate::value::Value;

/// Synchronous execution of expression trees.
pub trait QueryProvider: Send + Sync {
    /// Materialise the sequence `expression` describes.
    ///
    /// # Errors
    /// Provider failures, passed through unchanged.
    fn execute(&self, expression: &Expr) -> Result<Vec<Value>>;

    /// Number of rows `expression` yields.
    ///
    /// # Errors
    /// Provider failures, passed through unchanged.
    fn count(&self, expression: &Expr) -> Result<u64>;

    /// Paged async execution, for providers that support it.
    fn as_async(&self) -> Option<&dyn AsyncQueryProvider> {
        None
    }

    /// Whether filters should guard against null members when the settings
    /// leave it open.
    fn null_propagation_default(&self) -> bool {
        false
    }
}

/// One page of an async feed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<Value>,
    /// Token for the following page; `None` on the last page.
    pub continuation: Option<String>,
}

/// Document-store style execution: paged iteration plus count, both cancellable.
#[async_trait]
pub trait AsyncQueryProvider: Send + Sync {
    /// # Errors
    /// `Error::Cancelled` when `token` fires; provider failures unchanged.
    async fn next_page(
        &self,
        expression: &Expr,
        continuation: Option<String>,
        token: &CancellationToken,
    ) -> Result<FeedPage>;

    /// # Errors
    /// `Error::Cancelled` when `token` fires; provider failures unchanged.
    async fn count(&self, expression: &Expr, token: &CancellationToken) -> Result<u64>;
}

/// Read every page of a feed in order.
///
/// # Errors
/// The first error a page request returns.
pub async fn read_feed(
    provider: &dyn AsyncQueryProvider,
    expression: &Expr,
    token: &CancellationToken,
) -> Result<Vec<Value>> {
    let pages = futures::stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(continuation) = state else {
            return Ok::<_, Error>(None);
        };
        let page = provider.next_page(expression, continuation, token).await?;
        let next = page.continuation.map(Some);
        Ok(Some((page.items, next)))
    });
    let pages: Vec<Vec<Value>> = pages.try_collect().await?;
    Ok(pages.into_iter().flatten().collect())
}

/// A deferred query: an expression over a provider's source sequence.
#[derive(Clone)]
pub struct Queryable {
    pub expression: Expr,
    /// Element type of the provider's source sequence.
    pub element_type: Arc<str>,
    provider: Arc<dyn QueryProvider>,
}

impl Queryable {
    /// The provider's whole source sequence.
    #[must_use]
    pub fn new(provider: Arc<dyn QueryProvider>, element_type: &str) -> Self {
        Self {
            expression: Expr::Source(TypeRef::queryable(TypeRef::named(element_type))),
            element_type: Arc::from(element_type),
            provider,
        }
    }

    /// Same provider, different expression.
    #[must_use]
    pub fn with_expression(&self, expression: Expr) -> Self {
        Self {
            expression,
            element_type: self.element_type.clone(),
            provider: self.provider.clone(),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn QueryProvider> {
        &self.provider
    }

    /// # Errors
    /// Provider failures, passed through unchanged.
    pub fn to_list(&self) -> Result<Vec<Value>> {
        self.provider.execute(&self.expression)
    }

    /// Execute through the async feed when the provider has one.
    ///
    /// # Errors
    /// `Error::Cancelled` when `token` fires; provider failures unchanged.
    pub async fn to_list_async(&self, token: &CancellationToken) -> Result<Vec<Value>> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.provider.as_async() {
            Some(feed) => read_feed(feed, &self.expression, token).await,
            None => self.provider.execute(&self.expression),
        }
    }
}

impl fmt::Debug for Queryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queryable")
            .field("expression", &self.expression)
            .field("element_type", &self.element_type)
            .finish_non_exhaustive()
    }
}

/// Provider over a fixed set of records, evaluated by the tree interpreter.
/// Its async side serves pages of `page_size` rows, the continuation token
/// being the offset of the next page.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProvider {
    source: Vec<Value>,
    page_size: Option<usize>,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new(source: Vec<Value>) -> Self {
        Self {
            source,
            page_size: None,
        }
    }

    /// Records built from a JSON array of `element_type` objects.
    ///
    /// # Errors
    /// `Error::TypeMismatch` when the JSON does not fit the element type.
    pub fn from_json(registry: &TypeRegistry, element_type: &str, rows: &serde_json::Value) -> Result<Self> {
        let ty = TypeRef::list(TypeRef::named(element_type));
        match Value::from_json(registry, &ty, rows)? {
            Value::List(items) => Ok(Self::new(items)),
            other => Err(Error::TypeMismatch(format!("expected an array of {element_type}, got {other}"))),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// `Queryable` over this provider's records.
    #[must_use]
    pub fn into_queryable(self, element_type: &str) -> Queryable {
        Queryable::new(Arc::new(self), element_type)
    }
}

impl QueryProvider for InMemoryProvider {
    fn execute(&self, expression: &Expr) -> Result<Vec<Value>> {
        Interpreter::new(&self.source).sequence(expression)
    }

    fn count(&self, expression: &Expr) -> Result<u64> {
        let rows = self.execute(expression)?.len();
        Ok(u64::try_from(rows).unwrap_or(u64::MAX))
    }

    fn as_async(&self) -> Option<&dyn AsyncQueryProvider> {
        Some(self)
    }

    fn null_propagation_default(&self) -> bool {
        true
    }
}

#[async_trait]
impl AsyncQueryProvider for InMemoryProvider {
    async fn next_page(
        &self,
        expression: &Expr,
        continuation: Option<String>,
        token: &CancellationToken,
    ) -> Result<FeedPage> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let offset = match continuation {
            Some(raw) => raw.parse::<usize>().map_err(|e| Error::Provider(Box::new(e)))?,
            None => 0,
        };
        let rows = self.execute(expression)?;
        let end = self
            .page_size
            .map_or(rows.len(), |size| offset.saturating_add(size).min(rows.len()));
        let items = rows.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
        let continuation = (end < rows.len()).then(|| end.to_string());
        Ok(FeedPage { items, continuation })
    }

    async fn count(&self, expression: &Expr, token: &CancellationToken) -> Result<u64> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        QueryProvider::count(self, expression)
    }
}
