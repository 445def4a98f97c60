#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use odata_linq::provider::read_feed;
use odata_linq::{
    AsyncQueryProvider, Expr, FeedPage, InMemoryProvider, LiteralKind, MapperConfiguration,
    QueryProvider, Queryable, Result, TypeDef, TypeMap, TypeRef, TypeRegistry, Value,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Source entities (`Parent`, `Child`, `Person`), their models
/// (`ParentModel`, `ChildModel`) and the shared complex type `Address`.
#[must_use]
pub fn registry() -> TypeRegistry {
    TypeRegistry::new()
        .with_type(
            TypeDef::entity("Parent")
                .member("Id", TypeRef::literal(LiteralKind::I32))
                .member("Name", TypeRef::literal(LiteralKind::String))
                .member("Category", TypeRef::literal(LiteralKind::Enum))
                .member("Owner", TypeRef::named("Person"))
                .member("Address", TypeRef::named("Address"))
                .member("Tags", TypeRef::list(TypeRef::literal(LiteralKind::String)))
                .member("Children", TypeRef::list(TypeRef::named("Child"))),
        )
        .with_type(TypeDef::entity("Person").member("FullName", TypeRef::literal(LiteralKind::String)))
        .with_type(TypeDef::complex("Address").member("City", TypeRef::literal(LiteralKind::String)))
        .with_type(
            TypeDef::entity("Child")
                .member("Id", TypeRef::literal(LiteralKind::I32))
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .member("Label", TypeRef::literal(LiteralKind::String)),
        )
        .with_type(
            TypeDef::entity("ParentModel")
                .member("Id", TypeRef::literal(LiteralKind::I32))
                .member("Title", TypeRef::literal(LiteralKind::String))
                .member("Category", TypeRef::literal(LiteralKind::Enum))
                .member("OwnerName", TypeRef::literal(LiteralKind::String))
                .member("Tenant", TypeRef::literal(LiteralKind::String))
                .member("Address", TypeRef::named("Address"))
                .member("Tags", TypeRef::list(TypeRef::literal(LiteralKind::String)))
                .member("Children", TypeRef::list(TypeRef::named("ChildModel"))),
        )
        .with_type(
            TypeDef::entity("ChildModel")
                .member("Id", TypeRef::literal(LiteralKind::I32))
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .member("Label", TypeRef::literal(LiteralKind::String)),
        )
}

#[must_use]
pub fn mapper() -> MapperConfiguration {
    MapperConfiguration::new(registry())
        .with_map(
            "ParentModel",
            TypeMap::new("Parent")
                .map_path("Title", "Name")
                .map_path("OwnerName", "Owner.FullName")
                .map_parameter("Tenant", "tenant"),
        )
        .with_map("ChildModel", TypeMap::new("Child"))
}

#[must_use]
pub fn rows() -> serde_json::Value {
    json!([
        {
            "Id": 1, "Name": "alpha", "Category": "Retail",
            "Owner": { "FullName": "Ann" }, "Address": { "City": "Oslo" }, "Tags": ["a"],
            "Children": [
                { "Id": 1, "Value": 5, "Label": "x" },
                { "Id": 2, "Value": 15, "Label": "y" },
                { "Id": 3, "Value": 25, "Label": "z" }
            ]
        },
        {
            "Id": 2, "Name": "beta", "Category": "Wholesale",
            "Children": [{ "Id": 4, "Value": 1, "Label": "w" }]
        },
        {
            "Id": 3, "Name": "gamma", "Category": "Retail",
            "Owner": { "FullName": "Bob" }, "Address": { "City": "Rome" }
        },
        {
            "Id": 4, "Name": "delta", "Category": "Retail",
            "Children": [{ "Id": 5, "Value": 30, "Label": "v" }]
        },
        { "Id": 5, "Name": "epsilon", "Category": "Wholesale" }
    ])
}

#[must_use]
pub fn provider() -> InMemoryProvider {
    InMemoryProvider::from_json(&registry(), "Parent", &rows()).unwrap()
}

#[must_use]
pub fn parents() -> Queryable {
    provider().into_queryable("Parent")
}

#[must_use]
pub fn field<'a>(row: &'a Value, name: &str) -> &'a Value {
    row.field(name).unwrap()
}

#[must_use]
pub fn ids(rows: &[Value]) -> Vec<i64> {
    rows.iter().map(|r| field(r, "Id").as_i64().unwrap()).collect()
}

#[must_use]
pub fn child_values(row: &Value) -> Vec<i64> {
    field(row, "Children")
        .as_list()
        .unwrap()
        .iter()
        .map(|c| field(c, "Value").as_i64().unwrap())
        .collect()
}

/// Wraps the in-memory provider and counts every call that reaches it.
pub struct CountingProvider {
    inner: InMemoryProvider,
    pub calls: AtomicUsize,
}

impl CountingProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: provider().with_page_size(2),
            calls: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueryProvider for CountingProvider {
    fn execute(&self, expression: &Expr) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(expression)
    }

    fn count(&self, expression: &Expr) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        QueryProvider::count(&self.inner, expression)
    }

    fn as_async(&self) -> Option<&dyn AsyncQueryProvider> {
        Some(self)
    }
}

#[async_trait]
impl AsyncQueryProvider for CountingProvider {
    async fn next_page(
        &self,
        expression: &Expr,
        continuation: Option<String>,
        token: &CancellationToken,
    ) -> Result<FeedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.next_page(expression, continuation, token).await
    }

    async fn count(&self, expression: &Expr, token: &CancellationToken) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AsyncQueryProvider::count(&self.inner, expression, token).await
    }
}

/// Async provider whose requests never finish on their own.
pub struct StalledProvider;

impl QueryProvider for StalledProvider {
    fn execute(&self, _expression: &Expr) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    fn count(&self, _expression: &Expr) -> Result<u64> {
        Ok(0)
    }

    fn as_async(&self) -> Option<&dyn AsyncQueryProvider> {
        Some(self)
    }
}

#[async_trait]
impl AsyncQueryProvider for StalledProvider {
    async fn next_page(
        &self,
        _expression: &Expr,
        _continuation: Option<String>,
        _token: &CancellationToken,
    ) -> Result<FeedPage> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(FeedPage::default())
    }

    async fn count(&self, _expression: &Expr, _token: &CancellationToken) -> Result<u64> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(0)
    }
}

/// Read a whole feed, used to compare the async path with the sync one.
pub async fn read_all(provider: &dyn AsyncQueryProvider, expression: &Expr) -> Vec<Value> {
    read_feed(provider, expression, &CancellationToken::new()).await.unwrap()
}
