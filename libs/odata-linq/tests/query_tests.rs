#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{child_values, field, ids, mapper, parents, registry};
use odata_linq::{Error, InMemoryProvider, ODataQueryableExt, QueryMethod, QuerySettings, Value};
use odata_query::ast::Expr as F;
use odata_query::{ExpandItem, NextPage, ODataLimits, ODataOrderBy, ODataQueryOptions, SelectExpandClause};
use serde_json::json;
use url::Url;

fn options() -> ODataQueryOptions {
    ODataQueryOptions::new("ParentModel")
}

fn run(mut options: ODataQueryOptions, settings: Option<&QuerySettings>) -> Vec<Value> {
    parents().get(&mapper(), &mut options, settings).unwrap()
}

#[test]
fn no_select_projects_every_literal_member() {
    let implicit = run(options(), None);
    let explicit = run(
        options().with_select_expand(
            SelectExpandClause::new()
                .select("Id")
                .select("Title")
                .select("Category")
                .select("OwnerName")
                .select("Tenant")
                .select("Address")
                .select("Tags"),
        ),
        None,
    );
    assert_eq!(implicit, explicit);
    assert_eq!(ids(&implicit), [1, 2, 3, 4, 5]);

    let first = &implicit[0];
    assert_eq!(field(first, "Title").as_str(), Some("alpha"));
    assert_eq!(field(field(first, "Address"), "City").as_str(), Some("Oslo"));
    assert!(field(&implicit[1], "Address").is_null());
    assert_eq!(field(first, "Tags"), &Value::List(vec![Value::String("a".into())]));
    // navigation collections stay empty unless expanded
    assert!(child_values(first).is_empty());
    assert!(field(first, "Tenant").is_null());
}

#[test]
fn select_path_and_nested_select_are_equivalent() {
    let by_path = run(
        options().with_select_expand(SelectExpandClause::new().select("Id").select("Address/City")),
        None,
    );
    let nested = run(
        options().with_select_expand(
            SelectExpandClause::new()
                .select("Id")
                .select_nested("Address", SelectExpandClause::new().select("City")),
        ),
        None,
    );
    assert_eq!(by_path, nested);
    assert_eq!(field(field(&by_path[2], "Address"), "City").as_str(), Some("Rome"));
    assert!(field(&by_path[0], "Title").is_null());
}

#[test]
fn expansion_options_apply_per_parent() {
    let options = options().with_select_expand(
        SelectExpandClause::new().select("Id").expand(
            ExpandItem::new("Children")
                .with_filter(F::field("Value").gt(10))
                .with_order(ODataOrderBy::desc("Value"))
                .with_top(1),
        ),
    );
    let rows = run(options, None);
    let values: Vec<Vec<i64>> = rows.iter().map(child_values).collect();
    assert_eq!(values, [vec![25], vec![], vec![], vec![30], vec![]]);
}

#[test]
fn expansion_options_add_one_call_each() {
    let mut options = options().with_select_expand(
        SelectExpandClause::new().expand(
            ExpandItem::new("Children")
                .with_filter(F::field("Value").gt(10))
                .with_order(ODataOrderBy::desc("Value"))
                .with_top(2),
        ),
    );
    let query = parents().get_query(&mapper(), &mut options, None).unwrap();
    let expr = &query.expression;
    assert_eq!(expr.count_calls(QueryMethod::Where), 1);
    assert_eq!(expr.count_calls(QueryMethod::OrderByDescending), 1);
    assert_eq!(expr.count_calls(QueryMethod::Take), 1);
    assert_eq!(expr.count_calls(QueryMethod::Skip), 0);
    // root Select plus the one projecting each child
    assert_eq!(expr.count_calls(QueryMethod::Select), 2);
    assert!(!expr.to_string().contains('$'));
}

#[test]
fn expanded_members_respect_nested_select() {
    let options = options().with_select_expand(
        SelectExpandClause::new().select("Id").expand(
            ExpandItem::new("Children").with_nested(SelectExpandClause::new().select("Label")),
        ),
    );
    let rows = run(options, None);
    let children = field(&rows[0], "Children").as_list().unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(field(&children[0], "Label").as_str(), Some("x"));
    assert!(field(&children[0], "Value").is_null());
}

#[test]
fn flattened_member_filters_and_projects_through_owner() {
    let rows = run(options().with_filter(F::field("OwnerName").eq("Ann")), None);
    assert_eq!(ids(&rows), [1]);

    let owners: Vec<Option<String>> = run(options(), None)
        .iter()
        .map(|r| field(r, "OwnerName").as_str().map(str::to_owned))
        .collect();
    assert_eq!(owners, [Some("Ann".into()), None, Some("Bob".into()), None, None]);
}

#[test]
fn renamed_member_orders_and_pages() {
    let options = options()
        .with_order(ODataOrderBy::desc("Title"))
        .with_skip(1)
        .with_top(2);
    assert_eq!(ids(&run(options, None)), [5, 4]);
}

#[test]
fn enum_and_in_filters() {
    let rows = run(options().with_filter(F::field("Category").eq("Wholesale")), None);
    assert_eq!(ids(&rows), [2, 5]);
    assert_eq!(field(&rows[0], "Category"), &Value::Enum("Wholesale".into()));

    let rows = run(options().with_filter(F::field("Id").in_list([2, 4])), None);
    assert_eq!(ids(&rows), [2, 4]);
}

#[test]
fn projection_parameters_fill_mapped_members() {
    let settings = QuerySettings::default().with_parameter("tenant", json!("acme"));
    let rows = run(options(), Some(&settings));
    assert!(rows.iter().all(|r| field(r, "Tenant").as_str() == Some("acme")));
}

#[test]
fn null_propagation_follows_settings() {
    let filter = F::field("Address/City").eq("Oslo");
    assert_eq!(ids(&run(options().with_filter(filter.clone()), None)), [1]);

    let settings = QuerySettings::default().with_null_propagation(false);
    let mut options = options().with_filter(filter);
    let err = parents().get(&mapper(), &mut options, Some(&settings)).unwrap_err();
    assert!(matches!(err, Error::Evaluation(_)));
}

#[test]
fn count_is_taken_before_paging() {
    let mut options = options()
        .with_filter(F::field("Category").eq("Retail"))
        .with_top(1)
        .with_count();
    let rows = parents().get(&mapper(), &mut options, None).unwrap();
    assert_eq!(ids(&rows), [1]);
    assert_eq!(options.feature.total_count, Some(3));
    assert!(options.feature.next_page.is_none());
}

#[test]
fn page_size_limits_rows_and_records_next_link() {
    let settings = QuerySettings::default().with_page_size(2);
    let mut options = options().with_request_uri(Url::parse("http://h/parents?$orderby=Id").unwrap());
    let rows = parents().get(&mapper(), &mut options, Some(&settings)).unwrap();
    assert_eq!(ids(&rows), [1, 2]);
    assert_eq!(options.feature.next_page, Some(NextPage { skip: 2, top: None }));
    let link = options.feature.next_link.unwrap();
    assert!(link.as_str().ends_with("%24skip=2"), "{link}");
    // page size alone does not report a total
    assert!(options.feature.total_count.is_none());

    let mut last = ODataQueryOptions::new("ParentModel").with_skip(4).with_count();
    let rows = parents().get(&mapper(), &mut last, Some(&settings)).unwrap();
    assert_eq!(ids(&rows), [5]);
    assert_eq!(last.feature.total_count, Some(5));
    assert!(last.feature.next_page.is_none());
}

#[test]
fn search_is_rejected() {
    let mut options = options().with_search("alpha");
    let err = parents().get(&mapper(), &mut options, None).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn limits_are_checked_first() {
    let settings = QuerySettings::default().with_limits(ODataLimits::new().with_max_top(3));
    let mut options = options().with_top(4);
    let err = parents().get(&mapper(), &mut options, Some(&settings)).unwrap_err();
    assert!(matches!(err, Error::Query(odata_query::Error::InvalidLimit)));

    let settings = QuerySettings::default().with_limits(ODataLimits::new().with_max_skip(3));
    let mut options = self::options().with_skip(4);
    let err = parents().get(&mapper(), &mut options, Some(&settings)).unwrap_err();
    assert!(matches!(err, Error::Query(odata_query::Error::InvalidLimit)));
}

#[test]
fn unknown_members_and_bad_expansions_fail() {
    let mut bad_select = options().with_select_expand(SelectExpandClause::new().select("Nope"));
    let err = parents().get(&mapper(), &mut bad_select, None).unwrap_err();
    assert!(matches!(err, Error::UnresolvedMember { .. }));

    let mut bad_filter = options().with_filter(F::field("Nope").eq(1));
    let err = parents().get(&mapper(), &mut bad_filter, None).unwrap_err();
    assert!(matches!(err, Error::UnresolvedMember { .. }));

    let mut complex_expand = options().with_select_expand(SelectExpandClause::new().expand(ExpandItem::new("Address")));
    let err = parents().get(&mapper(), &mut complex_expand, None).unwrap_err();
    assert!(matches!(err, Error::Query(odata_query::Error::InvalidExpand(_))));
}

#[test]
fn model_must_map_from_the_queried_source() {
    let mut options = ODataQueryOptions::new("ChildModel");
    let err = parents().get(&mapper(), &mut options, None).unwrap_err();
    assert!(matches!(err, Error::Mapping(_)));
}

#[test]
fn null_source_collection_expands_to_empty() {
    let rows = json!([
        { "Id": 1, "Name": "alpha", "Category": "Retail", "Children": null },
        { "Id": 2, "Name": "beta", "Category": "Retail", "Children": [{ "Id": 9, "Value": 12, "Label": "q" }] }
    ]);
    let parents = InMemoryProvider::from_json(&registry(), "Parent", &rows)
        .unwrap()
        .into_queryable("Parent");

    let mut plain = options().with_select_expand(SelectExpandClause::new().expand(ExpandItem::new("Children")));
    let out = parents.get(&mapper(), &mut plain, None).unwrap();
    assert_eq!(field(&out[0], "Children"), &Value::List(Vec::new()));
    assert_eq!(child_values(&out[1]), [12]);

    let mut filtered = options().with_select_expand(
        SelectExpandClause::new().expand(
            ExpandItem::new("Children")
                .with_filter(F::field("Value").gt(10))
                .with_top(1),
        ),
    );
    let out = parents.get(&mapper(), &mut filtered, None).unwrap();
    assert_eq!(field(&out[0], "Children"), &Value::List(Vec::new()));
    assert_eq!(child_values(&out[1]), [12]);
}

#[test]
fn top_larger_than_page_size_pages_the_remainder() {
    let settings = QuerySettings::default().with_page_size(2);
    let mut options = options()
        .with_top(3)
        .with_request_uri(Url::parse("http://h/parents?$top=3").unwrap());
    let rows = parents().get(&mapper(), &mut options, Some(&settings)).unwrap();
    assert_eq!(ids(&rows), [1, 2]);
    assert_eq!(options.feature.next_page, Some(NextPage { skip: 2, top: Some(1) }));
    assert_eq!(
        options.feature.next_link.as_ref().map(Url::as_str),
        Some("http://h/parents?%24top=1&%24skip=2")
    );
}

#[test]
fn skip_with_page_size_continues_after_the_page() {
    let settings = QuerySettings::default().with_page_size(2);
    let mut options = options().with_skip(1).with_count();
    let rows = parents().get(&mapper(), &mut options, Some(&settings)).unwrap();
    assert_eq!(ids(&rows), [2, 3]);
    assert_eq!(options.feature.total_count, Some(5));
    assert_eq!(options.feature.next_page, Some(NextPage { skip: 3, top: None }));
}
