#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CountingProvider, StalledProvider, ids, mapper, read_all};
use odata_linq::{Error, ODataQueryableExt, QuerySettings, Queryable};
use odata_query::ast::Expr as F;
use odata_query::{ExpandItem, ODataQueryOptions, SelectExpandClause};
use tokio_util::sync::CancellationToken;

fn options() -> ODataQueryOptions {
    ODataQueryOptions::new("ParentModel")
        .with_filter(F::field("Id").ne(3))
        .with_select_expand(
            SelectExpandClause::new()
                .select("Id")
                .expand(ExpandItem::new("Children").with_filter(F::field("Value").lt(20))),
        )
}

#[tokio::test]
async fn async_query_matches_sync_query() {
    let provider = CountingProvider::new();
    let parents = Queryable::new(provider.clone(), "Parent");

    let mut async_options = options();
    let rows = parents.get_async(&mapper(), &mut async_options, None).await.unwrap();
    assert_eq!(ids(&rows), [1, 2, 4, 5]);
    // four rows through a two-row feed, no count requested
    assert_eq!(provider.calls(), 2);

    let mut sync_options = options();
    assert_eq!(parents.get(&mapper(), &mut sync_options, None).unwrap(), rows);

    let query = parents.get_query_async(&mapper(), &mut options(), None).await.unwrap();
    assert_eq!(read_all(provider.as_ref(), &query.expression).await, rows);
}

#[tokio::test]
async fn async_count_is_recorded() {
    let provider = CountingProvider::new();
    let parents = Queryable::new(provider.clone(), "Parent");
    let settings = QuerySettings::default().with_page_size(3);

    let mut options = options().with_count();
    let rows = parents.get_async(&mapper(), &mut options, Some(&settings)).await.unwrap();
    assert_eq!(ids(&rows), [1, 2, 4]);
    assert_eq!(options.feature.total_count, Some(4));
    assert!(options.feature.next_page.is_some());
    // count, then two feed pages
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn cancelled_token_stops_before_the_provider() {
    let provider = CountingProvider::new();
    let parents = Queryable::new(provider.clone(), "Parent");
    let token = CancellationToken::new();
    token.cancel();
    let settings = QuerySettings::default().with_cancellation_token(token);

    let mut options = options().with_count();
    let err = parents.get_async(&mapper(), &mut options, Some(&settings)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(provider.calls(), 0);
    assert!(options.feature.total_count.is_none());

    let err = parents
        .get_query_async(&mapper(), &mut options, Some(&settings))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_pending_count() {
    let parents = Queryable::new(Arc::new(StalledProvider), "Parent");
    let token = CancellationToken::new();
    let settings = QuerySettings::default().with_cancellation_token(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let mut options = options().with_count();
    let err = parents.get_async(&mapper(), &mut options, Some(&settings)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(options.feature.total_count.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_pending_feed() {
    let parents = Queryable::new(Arc::new(StalledProvider), "Parent");
    let token = CancellationToken::new();
    let settings = QuerySettings::default().with_cancellation_token(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let err = parents
        .get_async(&mapper(), &mut ODataQueryOptions::new("ParentModel"), Some(&settings))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
