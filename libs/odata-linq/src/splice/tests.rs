use indexmap::IndexMap;
use odata_query::ast::Expr as F;
use odata_query::{ExpandItem, ODataOrderBy, SelectExpandClause, SortDir};
use serde_json::json;
use tracing_test::traced_test;

use super::*;
use crate::expr::eval::Interpreter;
use crate::mapping::{MapperConfiguration, TypeMap};
use crate::paths::build_forest;
use crate::selectors::build_includes;
use crate::types::{LiteralKind, TypeDef, TypeRegistry};
use crate::value::Value;

fn mapper() -> MapperConfiguration {
    let registry = TypeRegistry::new()
        .with_type(
            TypeDef::entity("Parent")
                .member("Name", TypeRef::literal(LiteralKind::String))
                .member("Children", TypeRef::list(TypeRef::named("Child"))),
        )
        .with_type(
            TypeDef::entity("Child")
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .member("Toys", TypeRef::list(TypeRef::named("Toy"))),
        )
        .with_type(TypeDef::entity("Toy").member("Label", TypeRef::literal(LiteralKind::String)))
        .with_type(
            TypeDef::entity("ParentModel")
                .member("Name", TypeRef::literal(LiteralKind::String))
                .member("Children", TypeRef::list(TypeRef::named("ChildModel"))),
        )
        .with_type(
            TypeDef::entity("ChildModel")
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .member("Toys", TypeRef::list(TypeRef::named("ToyModel"))),
        )
        .with_type(TypeDef::entity("ToyModel").member("Label", TypeRef::literal(LiteralKind::String)));
    MapperConfiguration::new(registry)
        .with_map("ParentModel", TypeMap::new("Parent"))
        .with_map("ChildModel", TypeMap::new("Child"))
        .with_map("ToyModel", TypeMap::new("Toy"))
}

fn children_options() -> ExpandItem {
    ExpandItem::new("Children")
        .with_filter(F::field("Value").gt(1))
        .with_order(ODataOrderBy::desc("Value"))
        .with_top(2)
}

fn projected(m: &MapperConfiguration, clause: &SelectExpandClause) -> (Expr, Vec<Vec<ExpansionOption>>) {
    let forest = build_forest(m.registry(), "ParentModel", Some(clause), FilterContext::default(), 4).unwrap();
    let includes = build_includes(m.registry(), "ParentModel", &forest).unwrap();
    let projection = m.project("Parent", "ParentModel", &includes, &IndexMap::new()).unwrap();
    let expr = Expr::Source(TypeRef::queryable(TypeRef::named("Parent"))).select(projection);
    (expr, expansion_options(&forest))
}

#[test]
fn test_adds_exactly_one_node_per_option() {
    let m = mapper();
    let (expr, options) = projected(&m, &SelectExpandClause::new().expand(children_options()));
    let splicer = Splicer::new(&m, FilterContext::default());

    assert_eq!(expr.count_calls(QueryMethod::Where), 0);
    let filtered = splicer.splice_filters(expr, &filter_lists(&options)).unwrap();
    assert_eq!(filtered.count_calls(QueryMethod::Where), 1);

    let spliced = splicer
        .splice_query_methods(filtered, &query_method_lists(&options))
        .unwrap();
    assert_eq!(spliced.count_calls(QueryMethod::Where), 1);
    assert_eq!(spliced.count_calls(QueryMethod::OrderByDescending), 1);
    assert_eq!(spliced.count_calls(QueryMethod::ThenBy), 0);
    assert_eq!(spliced.count_calls(QueryMethod::Skip), 0);
    assert_eq!(spliced.count_calls(QueryMethod::Take), 1);
    assert_eq!(spliced.count_calls(QueryMethod::Select), 2);

    let text = rename_reserved_parameters(spliced).to_string();
    assert!(
        text.contains(
            "x.Children.Where(it => (it.Value > 1)).OrderByDescending(it => it.Value).Take(2).Select(x0 =>"
        ),
        "{text}"
    );
    assert!(!text.contains('$'));
}

#[test]
fn test_nested_filter_leaves_empty_collections() {
    let m = mapper();
    let (expr, options) = projected(&m, &SelectExpandClause::new().expand(children_options()));
    let splicer = Splicer::new(&m, FilterContext::default());
    let expr = splicer.splice_filters(expr, &filter_lists(&options)).unwrap();
    let expr = splicer
        .splice_query_methods(expr, &query_method_lists(&options))
        .unwrap();
    let expr = rename_reserved_parameters(expr);

    let parent = TypeRef::named("Parent");
    let source = vec![
        Value::from_json(
            m.registry(),
            &parent,
            &json!({"Name": "a", "Children": [{"Value": 1}, {"Value": 2}, {"Value": 5}, {"Value": 3}]}),
        )
        .unwrap(),
        Value::from_json(m.registry(), &parent, &json!({"Name": "b", "Children": [{"Value": 0}]})).unwrap(),
    ];
    let out = Interpreter::new(&source).sequence(&expr).unwrap();

    let values = |row: &Value| -> Vec<i64> {
        row.field("Children")
            .unwrap()
            .as_list()
            .unwrap()
            .iter()
            .map(|c| c.field("Value").unwrap().as_i64().unwrap())
            .collect()
    };
    assert_eq!(values(&out[0]), [5, 3]);
    assert!(values(&out[1]).is_empty());
    assert!(out[1].field("Children").unwrap().as_list().is_some());
}

#[test]
fn test_nested_expansion_descends_through_parent_binding() {
    let m = mapper();
    let clause = SelectExpandClause::new().expand(ExpandItem::new("Children").with_nested(
        SelectExpandClause::new().expand(
            ExpandItem::new("Toys")
                .with_filter(F::field("Label").ne("broken"))
                .with_order(ODataOrderBy::asc("Label").then_by("Label", SortDir::Desc))
                .with_skip(1),
        ),
    ));
    let (expr, options) = projected(&m, &clause);
    let filters = filter_lists(&options);
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].len(), 2);
    assert!(filters[0][0].filter.is_none());

    let splicer = Splicer::new(&m, FilterContext::default());
    let expr = splicer.splice_filters(expr, &filters).unwrap();
    let expr = splicer
        .splice_query_methods(expr, &query_method_lists(&options))
        .unwrap();
    assert_eq!(expr.count_calls(QueryMethod::Where), 1);
    assert_eq!(expr.count_calls(QueryMethod::OrderBy), 1);
    assert_eq!(expr.count_calls(QueryMethod::ThenByDescending), 1);
    assert_eq!(expr.count_calls(QueryMethod::Skip), 1);
    assert!(
        expr.to_string()
            .contains("x0.Toys.Where($it => ($it.Label != \"broken\")).OrderBy($it => $it.Label)")
    );
}

#[test]
fn test_bare_collection_member_is_coerced_back() {
    let m = mapper();
    let p = Parameter::new("p", TypeRef::named("ParentModel"));
    let expr = Expr::MemberInit {
        ty: TypeRef::named("ParentModel"),
        bindings: vec![Binding::new(
            "Children",
            Expr::parameter(&p).member("Children", TypeRef::list(TypeRef::named("ChildModel"))),
        )],
    };
    let forest = build_forest(
        m.registry(),
        "ParentModel",
        Some(&SelectExpandClause::new().expand(children_options())),
        FilterContext::default(),
        4,
    )
    .unwrap();
    let options = expansion_options(&forest);
    let splicer = Splicer::new(&m, FilterContext::default());

    let filtered = splicer.splice_filters(expr, &filter_lists(&options)).unwrap();
    assert_eq!(
        filtered.to_string(),
        "new ParentModel() {Children = p.Children.Where($it => ($it.Value > 1)).ToList()}"
    );
    let queried = splicer
        .splice_query_methods(filtered, &query_method_lists(&options))
        .unwrap();
    assert!(queried.to_string().contains(
        "p.Children.Where($it => ($it.Value > 1)).ToList().AsQueryable().OrderByDescending($it => $it.Value).Take(2).ToList()"
    ));
}

#[test]
fn test_malformed_option_lists_are_rejected() {
    let m = mapper();
    let splicer = Splicer::new(&m, FilterContext::default());
    let source = Expr::Source(TypeRef::queryable(TypeRef::named("Parent")));

    let err = splicer.splice_filters(source.clone(), &[Vec::new()]).unwrap_err();
    assert!(matches!(err, Error::MalformedExpansion(_)));

    let bare = ExpansionOption {
        member_name: Arc::from("Children"),
        parent_type: Arc::from("ParentModel"),
        member_type: TypeRef::list(TypeRef::named("ChildModel")),
        filter: None,
        query: None,
    };
    let err = splicer
        .splice_filters(source.clone(), &[vec![bare.clone()]])
        .unwrap_err();
    assert!(matches!(err, Error::MalformedExpansion(_)));
    let err = splicer.splice_query_methods(source, &[vec![bare]]).unwrap_err();
    assert!(matches!(err, Error::MalformedExpansion(_)));
}

#[test]
#[traced_test]
fn test_unmatched_options_warn_and_leave_tree_alone() {
    let m = mapper();
    let forest = build_forest(
        m.registry(),
        "ParentModel",
        Some(&SelectExpandClause::new().expand(children_options())),
        FilterContext::default(),
        4,
    )
    .unwrap();
    let options = expansion_options(&forest);
    let source = Expr::Source(TypeRef::queryable(TypeRef::named("Parent")));

    let out = Splicer::new(&m, FilterContext::default())
        .splice_filters(source.clone(), &filter_lists(&options))
        .unwrap();
    assert_eq!(out, source);
    assert!(logs_contain("expansion options matched no projected member"));
}

#[test]
fn test_option_lists_are_deduplicated_prefixes() {
    let m = mapper();
    let clause = SelectExpandClause::new()
        .expand(children_options().with_nested(SelectExpandClause::new().expand(ExpandItem::new("Toys"))))
        .expand(ExpandItem::new("Children"));
    let forest = build_forest(m.registry(), "ParentModel", Some(&clause), FilterContext::default(), 4).unwrap();
    let options = expansion_options(&forest);
    assert_eq!(options.len(), 2);

    let filters = filter_lists(&options);
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].len(), 1);
    assert_eq!(query_method_lists(&options).len(), 1);
}

#[test]
fn test_reserved_parameters_get_unique_clean_names() {
    let it_model = Parameter::new("$it", TypeRef::named("ParentModel"));
    let it_child = Parameter::new("$it", TypeRef::named("ChildModel"));
    let taken = Parameter::new("it", TypeRef::named("Toy"));
    let expr = Expr::Source(TypeRef::queryable(TypeRef::named("ParentModel")))
        .where_(Lambda::new(
            it_model.clone(),
            Expr::parameter(&it_model)
                .member("Name", TypeRef::literal(LiteralKind::String))
                .is_null_check(),
        ))
        .select(Lambda::new(
            taken.clone(),
            Expr::parameter(&taken),
        ))
        .where_(Lambda::new(
            it_child.clone(),
            Expr::parameter(&it_child)
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .is_null_check(),
        ));
    let renamed = rename_reserved_parameters(expr).to_string();
    assert_eq!(
        renamed,
        "Source<ParentModel>.Where(it0 => (it0.Name == null)).Select(it => it).Where(it00 => (it00.Value == null))"
    );
}

#[test]
fn test_null_source_collection_projects_empty() {
    let m = mapper();
    let (expr, options) = projected(&m, &SelectExpandClause::new().expand(children_options()));
    let splicer = Splicer::new(&m, FilterContext::default());
    let expr = splicer.splice_filters(expr, &filter_lists(&options)).unwrap();
    let expr = splicer
        .splice_query_methods(expr, &query_method_lists(&options))
        .unwrap();
    let text = expr.to_string();
    assert!(text.contains("IIF((x.Children == null), [], x.Children.Where("), "{text}");

    let parent = TypeRef::named("Parent");
    let source = vec![
        Value::from_json(m.registry(), &parent, &json!({"Name": "a", "Children": null})).unwrap(),
        Value::from_json(m.registry(), &parent, &json!({"Name": "b", "Children": [{"Value": 4}]})).unwrap(),
    ];
    let out = Interpreter::new(&source).sequence(&expr).unwrap();
    assert_eq!(out[0].field("Children"), Some(&Value::List(Vec::new())));
    assert_eq!(out[1].field("Children").unwrap().as_list().unwrap().len(), 1);
}

fn node_mapper() -> MapperConfiguration {
    let registry = TypeRegistry::new()
        .with_type(
            TypeDef::entity("Node")
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .member("Children", TypeRef::list(TypeRef::named("Node"))),
        )
        .with_type(
            TypeDef::entity("NodeModel")
                .member("Value", TypeRef::literal(LiteralKind::I32))
                .member("Children", TypeRef::list(TypeRef::named("NodeModel"))),
        );
    MapperConfiguration::new(registry).with_map("NodeModel", TypeMap::new("Node"))
}

/// Project and splice `clause` over a two-level tree of nodes, returning the
/// child values of the root and of each of its children.
fn node_levels(clause: &SelectExpandClause) -> (Vec<i64>, Vec<Vec<i64>>) {
    let m = node_mapper();
    let forest = build_forest(m.registry(), "NodeModel", Some(clause), FilterContext::default(), 4).unwrap();
    let includes = build_includes(m.registry(), "NodeModel", &forest).unwrap();
    let projection = m.project("Node", "NodeModel", &includes, &IndexMap::new()).unwrap();
    let expr = Expr::Source(TypeRef::queryable(TypeRef::named("Node"))).select(projection);
    let options = expansion_options(&forest);
    let splicer = Splicer::new(&m, FilterContext::default());
    let expr = splicer.splice_filters(expr, &filter_lists(&options)).unwrap();
    let expr = rename_reserved_parameters(expr);

    let root = json!({"Value": 1, "Children": [
        {"Value": 2, "Children": [{"Value": 40}, {"Value": 5}]},
        {"Value": 50, "Children": [{"Value": 60}, {"Value": 7}]}
    ]});
    let source = vec![Value::from_json(m.registry(), &TypeRef::named("Node"), &root).unwrap()];
    let out = Interpreter::new(&source).sequence(&expr).unwrap();

    let values = |row: &Value| -> Vec<i64> {
        row.field("Children")
            .unwrap()
            .as_list()
            .unwrap()
            .iter()
            .map(|c| c.field("Value").unwrap().as_i64().unwrap())
            .collect()
    };
    let children = out[0].field("Children").unwrap().as_list().unwrap();
    (values(&out[0]), children.iter().map(values).collect())
}

#[test]
fn test_repeated_member_name_is_filtered_only_at_its_depth() {
    let deep = SelectExpandClause::new().expand(ExpandItem::new("Children").with_nested(
        SelectExpandClause::new().expand(ExpandItem::new("Children").with_filter(F::field("Value").gt(30))),
    ));
    let (first, second) = node_levels(&deep);
    assert_eq!(first, [2, 50]);
    assert_eq!(second, [vec![40], vec![60]]);

    let shallow = SelectExpandClause::new().expand(
        ExpandItem::new("Children")
            .with_filter(F::field("Value").gt(10))
            .with_nested(SelectExpandClause::new().expand(ExpandItem::new("Children"))),
    );
    let (first, second) = node_levels(&shallow);
    assert_eq!(first, [50]);
    assert_eq!(second, [vec![60, 7]]);
}
