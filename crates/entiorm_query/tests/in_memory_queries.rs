//! End-to-end queries against the in-memory provider.

use entiorm_core::{
    CancellationToken, Config, EntityState, EntityType, QueryTrackingBehavior, ScalarType,
    StateManager, Value,
};
use entiorm_query::expression::TRANSPARENT_IDENTIFIER;
use entiorm_query::{
    BinaryOp, ExprRef, ExprType, Expression, InMemoryQueryProvider, InMemoryStore, MemberIdentity,
    Materialized, QueryCompiler, QueryContext, QueryError, Queryable,
};
use entiorm_testkit::{blog_rows, blog_type, init_tracing, post_rows, post_type};
use std::sync::Arc;

struct Fixture {
    blog: Arc<EntityType>,
    post: Arc<EntityType>,
    store: Arc<InMemoryStore>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let blog = blog_type();
        let post = post_type();
        let store = Arc::new(InMemoryStore::new());
        store.seed(&blog, blog_rows()).unwrap();
        store.seed(&post, post_rows()).unwrap();
        Self { blog, post, store }
    }

    fn context(&self) -> QueryContext {
        QueryContext::new(Arc::new(StateManager::new())).with_store(self.store.clone())
    }

    fn compiler(&self, config: Config) -> QueryCompiler {
        QueryCompiler::new(Arc::new(InMemoryQueryProvider), config)
    }

    fn blogs(&self) -> Queryable {
        Queryable::from_entity(&self.blog)
    }

    fn posts(&self) -> Queryable {
        Queryable::from_entity(&self.post)
    }

    /// `b => <body(b)>` over a blog parameter.
    fn blog_lambda(&self, body: impl FnOnce(&ExprRef) -> ExprRef) -> ExprRef {
        let b = Expression::entity_parameter("b", &self.blog);
        let body = body(&b);
        Expression::lambda(vec![b], body)
    }

    fn blog_property(&self, b: &ExprRef, name: &str) -> ExprRef {
        Expression::property(b, &self.blog, name).unwrap()
    }
}

fn entity_ids(results: &[Materialized]) -> Vec<i64> {
    results
        .iter()
        .map(|r| {
            r.as_entity()
                .expect("entity result")
                .value("Id")
                .unwrap()
                .as_integer()
                .unwrap()
        })
        .collect()
}

#[test]
fn where_filters_entities_in_store_order() {
    let f = Fixture::new();
    let query = f
        .blogs()
        .filter(f.blog_lambda(|b| {
            Expression::equal(f.blog_property(b, "Rating"), Expression::constant(5))
        }))
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    assert_eq!(entity_ids(&results), vec![1, 4]);
}

#[test]
fn null_equals_null_on_the_client() {
    let f = Fixture::new();
    let query = f
        .blogs()
        .filter(f.blog_lambda(|b| {
            Expression::equal(f.blog_property(b, "Rating"), Expression::constant(Value::Null))
        }))
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    assert_eq!(entity_ids(&results), vec![2]);
}

#[test]
fn anonymous_projection_reads_consecutive_slots() {
    let f = Fixture::new();
    let query = f
        .blogs()
        .filter(f.blog_lambda(|b| {
            Expression::equal(f.blog_property(b, "Id"), Expression::constant(2))
        }))
        .select(f.blog_lambda(|b| {
            Expression::new_object(
                "Anon",
                [
                    ("Name", f.blog_property(b, "Name")),
                    ("Rating", f.blog_property(b, "Rating")),
                ],
            )
        }))
        .into_expression();

    let compiler = f.compiler(Config::default());
    let compiled = compiler.compile(&query).unwrap();
    let shaper = compiled.shaper_expression().to_string();
    assert!(shaper.contains("valueBuffer[0]"), "{shaper}");
    assert!(shaper.contains("valueBuffer[1]"), "{shaper}");

    let results = compiled.execute(&f.context()).unwrap();
    assert_eq!(results.len(), 1);
    let row = &results[0];
    assert_eq!(row.field("Name").and_then(Materialized::as_scalar), Some(&Value::from("cooking")));
    assert_eq!(row.field("Rating").and_then(Materialized::as_scalar), Some(&Value::Null));
    assert_eq!(row.to_string(), "Anon { Name = \"cooking\", Rating = null }");
}

#[test]
fn ordering_then_paging() {
    let f = Fixture::new();
    let query = f
        .blogs()
        .order_by_descending(f.blog_lambda(|b| f.blog_property(b, "Rating")))
        .then_by(f.blog_lambda(|b| f.blog_property(b, "Name")))
        .skip(Expression::constant(1))
        .take(Expression::constant(2))
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    // music(5), rust(5), travel(3), cooking(null)
    assert_eq!(entity_ids(&results), vec![1, 3]);
}

#[test]
fn distinct_scalar_projection_keeps_first_occurrences() {
    let f = Fixture::new();
    let query = f
        .blogs()
        .select(f.blog_lambda(|b| f.blog_property(b, "Rating")))
        .distinct()
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    let ratings: Vec<_> = results.iter().map(|r| r.as_scalar().cloned().unwrap()).collect();
    assert_eq!(ratings, vec![Value::from(5), Value::Null, Value::from(3)]);
}

fn join_selector(f: &Fixture) -> ExprRef {
    let b = Expression::entity_parameter("b", &f.blog);
    let p = Expression::entity_parameter("p", &f.post);
    Expression::lambda(
        vec![b.clone(), p.clone()],
        Expression::new_object(
            "Row",
            [
                ("Blog", f.blog_property(&b, "Name")),
                ("Title", Expression::property(&p, &f.post, "Title").unwrap()),
            ],
        ),
    )
}

fn join_keys(f: &Fixture) -> (ExprRef, ExprRef) {
    let outer = f.blog_lambda(|b| f.blog_property(b, "Id"));
    let p = Expression::entity_parameter("p", &f.post);
    let inner = Expression::lambda(
        vec![p.clone()],
        Expression::property(&p, &f.post, "BlogId").unwrap(),
    );
    (outer, inner)
}

fn pairs(results: &[Materialized]) -> Vec<(Value, Value)> {
    results
        .iter()
        .map(|r| {
            (
                r.field("Blog").and_then(Materialized::as_scalar).cloned().unwrap(),
                r.field("Title").and_then(Materialized::as_scalar).cloned().unwrap(),
            )
        })
        .collect()
}

#[test]
fn inner_join_with_result_selector() {
    let f = Fixture::new();
    let (outer_key, inner_key) = join_keys(&f);
    let query = f
        .blogs()
        .join(f.posts(), outer_key, inner_key, Some(join_selector(&f)))
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    assert_eq!(
        pairs(&results),
        vec![
            ("rust".into(), "ownership".into()),
            ("rust".into(), "lifetimes".into()),
            ("travel".into(), "lisbon".into()),
            ("music".into(), "jazz".into()),
        ]
    );
}

#[test]
fn left_join_keeps_unmatched_outer_rows() {
    let f = Fixture::new();
    let (outer_key, inner_key) = join_keys(&f);
    let query = f
        .blogs()
        .left_join(f.posts(), outer_key, inner_key, Some(join_selector(&f)))
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    let rows = pairs(&results);
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[2], ("cooking".into(), Value::Null));
}

#[test]
fn join_without_selector_shares_entities_within_one_execution() {
    let f = Fixture::new();
    let (outer_key, inner_key) = join_keys(&f);
    let query = f
        .blogs()
        .join(f.posts(), outer_key, inner_key, None)
        .as_no_tracking()
        .into_expression();

    let results = f.compiler(Config::default()).execute(&query, &f.context()).unwrap();
    assert_eq!(results.len(), 4);

    let outer = |r: &Materialized| r.field("Outer").and_then(Materialized::as_entity).cloned().unwrap();
    // Both posts of blog 1 materialize the same blog entry.
    assert!(Arc::ptr_eq(&outer(&results[0]), &outer(&results[1])));
    assert!(!Arc::ptr_eq(&outer(&results[1]), &outer(&results[2])));

    // A transparent identifier member can be projected after the join.
    let t = Expression::parameter("t", ExprType::Object(TRANSPARENT_IDENTIFIER.to_string()));
    let blog_of_t = Expression::member(&t, MemberIdentity::outer(), ExprType::Entity("Blog".into()));
    let (outer_key, inner_key) = join_keys(&f);
    let projected = f
        .blogs()
        .join(f.posts(), outer_key, inner_key, None)
        .select(Expression::lambda(
            vec![t.clone()],
            Expression::property(&blog_of_t, &f.blog, "Name").unwrap(),
        ))
        .into_expression();
    let names: Vec<_> = f
        .compiler(Config::default())
        .execute(&projected, &f.context())
        .unwrap()
        .iter()
        .map(|r| r.as_scalar().cloned().unwrap())
        .collect();
    assert_eq!(names, vec!["rust".into(), "rust".into(), "travel".into(), "music".into()]);
}

#[test]
fn terminal_operators_check_cardinality() {
    let f = Fixture::new();
    let compiler = f.compiler(Config::default());
    let ctx = f.context();
    let rated = |rating: i64| {
        f.blogs().filter(f.blog_lambda(|b| {
            Expression::equal(f.blog_property(b, "Rating"), Expression::constant(rating))
        }))
    };

    let count = compiler.compile(&rated(5).count().into_expression()).unwrap();
    assert_eq!(count.execute_single(&ctx).unwrap().as_scalar(), Some(&Value::from(2)));

    let first = compiler
        .compile(
            &f.blogs()
                .order_by(f.blog_lambda(|b| f.blog_property(b, "Name")))
                .first()
                .into_expression(),
        )
        .unwrap();
    let cooking = first.execute_single(&ctx).unwrap();
    assert_eq!(cooking.as_entity().unwrap().value("Name").unwrap(), Value::from("cooking"));

    let single = compiler.compile(&rated(5).single().into_expression()).unwrap();
    assert!(matches!(
        single.execute_single(&ctx),
        Err(QueryError::MoreThanOneElement)
    ));

    let empty_first = compiler.compile(&rated(42).first().into_expression()).unwrap();
    assert!(matches!(empty_first.execute_single(&ctx), Err(QueryError::NoElements)));

    let default = compiler.compile(&rated(42).single_or_default().into_expression()).unwrap();
    assert!(default.execute_single(&ctx).unwrap().is_null());

    let one = compiler.compile(&rated(3).single().into_expression()).unwrap();
    assert_eq!(entity_ids(&[one.execute_single(&ctx).unwrap()]), vec![3]);
}

#[test]
fn tracking_queries_resolve_identity_through_the_state_manager() {
    let f = Fixture::new();
    let compiler = f.compiler(Config::default());
    let ctx = f.context();
    let query = f.blogs().into_expression();

    let first = compiler.execute(&query, &ctx).unwrap();
    let second = compiler.execute(&query, &ctx).unwrap();
    assert_eq!(ctx.state_manager().len(), 4);
    for (a, b) in first.iter().zip(&second) {
        assert!(Arc::ptr_eq(a.as_entity().unwrap(), b.as_entity().unwrap()));
    }

    let untracked = f.blogs().as_no_tracking().into_expression();
    let detached = compiler.execute(&untracked, &f.context()).unwrap();
    assert_eq!(detached.len(), 4);
    assert!(detached
        .iter()
        .all(|r| r.as_entity().unwrap().state() == EntityState::Detached));
}

#[test]
fn default_tracking_behavior_comes_from_config() {
    let f = Fixture::new();
    let compiler = f.compiler(Config::new().default_tracking(QueryTrackingBehavior::NoTracking));
    let ctx = f.context();

    compiler.execute(&f.blogs().into_expression(), &ctx).unwrap();
    assert!(ctx.state_manager().is_empty());

    compiler
        .execute(&f.blogs().as_tracking().into_expression(), &ctx)
        .unwrap();
    assert_eq!(ctx.state_manager().len(), 4);
}

#[test]
fn parameterized_queries_are_compiled_once() {
    let f = Fixture::new();
    let compiler = f.compiler(Config::default());
    let query = f
        .blogs()
        .filter(f.blog_lambda(|b| {
            Expression::binary(
                BinaryOp::GreaterThanOrEqual,
                f.blog_property(b, "Rating"),
                Expression::query_parameter("minRating", ScalarType::Integer),
            )
        }))
        .into_expression();

    let high = f.context().with_parameter("minRating", 5);
    let low = f.context().with_parameter("minRating", 1);
    assert_eq!(compiler.execute(&query, &high).unwrap().len(), 2);
    assert_eq!(compiler.execute(&query, &low).unwrap().len(), 3);

    let stats = compiler.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
    assert_eq!(compiler.cache().len(), 1);

    assert!(matches!(
        compiler.execute(&query, &f.context()),
        Err(QueryError::MissingParameter { name }) if name == "minRating"
    ));
}

#[test]
fn client_calls_fail_translation_and_are_not_cached() {
    let f = Fixture::new();
    let compiler = f.compiler(Config::default());
    let query = f
        .blogs()
        .filter(f.blog_lambda(|b| {
            Expression::client_call(
                "IsInteresting",
                vec![f.blog_property(b, "Name")],
                ExprType::Scalar(ScalarType::Bool),
            )
        }))
        .into_expression();

    let err = compiler.compile(&query).unwrap_err();
    assert!(err.is_translation());
    assert!(compiler.cache().is_empty());
}

#[test]
fn cancelled_queries_stop_before_reading() {
    let f = Fixture::new();
    let token = CancellationToken::new();
    token.cancel();
    let ctx = f.context().with_cancellation(token);

    let err = f
        .compiler(Config::default())
        .execute(&f.blogs().into_expression(), &ctx)
        .unwrap_err();
    assert!(matches!(err, QueryError::Cancelled));
}
