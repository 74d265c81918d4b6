//! Saves run against a scripted connection.

use entiorm_core::{
    CancellationToken, Config, EntityEntry, EntityState, HiLoValueGenerator, StateManager,
    UpdateEntry, Value,
};
use entiorm_testkit::{
    blog_type, entry, init_tracing, post_type, tag_type, tracked_entry, FakeConnection,
    ScriptedResult,
};
use entiorm_update::{
    BatchOptions, CommandBatchPreparer, ReaderPositioning, ReturningUpdateSqlGenerator,
    SequenceBlockSource, SqlServerUpdateSqlGenerator, UpdateError, UpdatePipeline,
};
use std::sync::Arc;

fn sql_server() -> UpdatePipeline {
    init_tracing();
    UpdatePipeline::sql_server(&Config::default()).unwrap()
}

fn returning(options: BatchOptions) -> UpdatePipeline {
    init_tracing();
    UpdatePipeline::new(Arc::new(ReturningUpdateSqlGenerator::new()), options)
}

fn dyn_entries(entries: &[&Arc<EntityEntry>]) -> Vec<Arc<dyn UpdateEntry>> {
    entries
        .iter()
        .map(|e| Arc::clone(e) as Arc<dyn UpdateEntry>)
        .collect()
}

fn key_of(entry: &Arc<dyn UpdateEntry>) -> Value {
    let id = entry.entity_type().property("Id").unwrap().clone();
    entry.current_value(&id)
}

fn modified_post() -> Arc<EntityEntry> {
    let post = entry(
        &post_type(),
        [
            ("Id", Value::from(10)),
            ("BlogId", Value::from(1)),
            ("Title", Value::from("old")),
            ("Version", Value::Bytes(vec![1])),
        ],
        EntityState::Unchanged,
    );
    post.set_value("Title", "new".into()).unwrap();
    post
}

#[test]
fn insert_propagates_the_generated_identity() {
    let blog = entry(&blog_type(), [("Name", Value::from("rust"))], EntityState::Added);
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![vec![7.into()]])]);

    let saved = sql_server()
        .save_changes(&dyn_entries(&[&blog]), &connection)
        .unwrap();

    assert_eq!(saved, 1);
    assert_eq!(blog.value("Id").unwrap(), Value::from(7));
    assert_eq!(blog.state(), EntityState::Unchanged);

    let command = connection.last_command().unwrap();
    assert!(command.text.starts_with("SET NOCOUNT ON;\nINSERT INTO [Blogs] ([Name], [Rating])\n"));
    assert!(command.text.contains("WHERE @@ROWCOUNT = 1 AND [Id] = scope_identity();"));
    assert_eq!(command.parameter("@p0").unwrap().value, Value::from("rust"));
}

#[test]
fn update_of_a_concurrently_changed_row_fails_without_committing() {
    let post = modified_post();
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![])]);

    let err = sql_server()
        .save_changes(&dyn_entries(&[&post]), &connection)
        .unwrap_err();

    match &err {
        UpdateError::Concurrency {
            expected,
            actual,
            entries,
        } => {
            assert_eq!((*expected, *actual), (1, 0));
            assert_eq!(entries.len(), 1);
        }
        other => panic!("expected a concurrency error, got {other}"),
    }
    assert_eq!(post.state(), EntityState::Modified);
    assert_eq!(post.value("Version").unwrap(), Value::Bytes(vec![1]));
    assert_eq!(post.pending_value("Version").unwrap(), None);
}

#[test]
fn zero_affected_rows_is_a_concurrency_violation() {
    let sm = StateManager::new();
    let blog = tracked_entry(
        &sm,
        &blog_type(),
        [("Id", Value::from(1)), ("Name", Value::from("rust"))],
        EntityState::Unchanged,
    );
    blog.set_value("Name", "rusty".into()).unwrap();
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![vec![0.into()]])]);

    let err = sql_server().save_state_manager(&sm, &connection).unwrap_err();
    assert!(err.is_concurrency(), "{err}");
    assert!(connection
        .last_command()
        .unwrap()
        .text
        .ends_with("WHERE [Id] = @p1;\nSELECT @@ROWCOUNT;\n"));
    assert_eq!(blog.state(), EntityState::Modified);
}

#[test]
fn successful_update_reads_the_new_row_version() {
    let post = modified_post();
    let connection =
        FakeConnection::with_results([ScriptedResult::rows(vec![vec![Value::Bytes(vec![2])]])]);

    sql_server()
        .save_changes(&dyn_entries(&[&post]), &connection)
        .unwrap();
    assert_eq!(post.value("Version").unwrap(), Value::Bytes(vec![2]));
    assert_eq!(post.value("Title").unwrap(), Value::from("new"));
    assert_eq!(post.state(), EntityState::Unchanged);
}

#[test]
fn missing_row_is_attributed_to_the_command_that_needed_it() {
    let blog = blog_type();
    let deleted: Vec<_> = (1..=3)
        .map(|id| {
            entry(
                &blog,
                [("Id", Value::from(id)), ("Name", Value::from("x"))],
                EntityState::Deleted,
            )
        })
        .collect();
    let connection = FakeConnection::with_results([ScriptedResult::result_sets(vec![
        vec![vec![1.into()]],
        vec![vec![1.into()]],
        vec![],
    ])]);

    let err = returning(BatchOptions::default())
        .save_changes(&dyn_entries(&deleted.iter().collect::<Vec<_>>()), &connection)
        .unwrap_err();

    assert!(err.is_concurrency(), "{err}");
    assert_eq!(err.entries().len(), 1);
    assert_eq!(key_of(&err.entries()[0]), Value::from(3));
    assert!(deleted.iter().all(|e| e.state() == EntityState::Deleted));
}

#[test]
fn statements_without_results_must_advance_the_reader() {
    let options = BatchOptions::default().with_positioning(ReaderPositioning::ResultPerStatement);
    let make_entries = || {
        let tags = tag_type();
        let blog = entry(
            &blog_type(),
            [("Id", Value::from(1)), ("Name", Value::from("x"))],
            EntityState::Deleted,
        );
        (
            vec![
                entry(&tags, [("Id", Value::from(1)), ("Label", Value::from("a"))], EntityState::Added),
                entry(&tags, [("Id", Value::from(2)), ("Label", Value::from("b"))], EntityState::Added),
            ],
            blog,
        )
    };

    // The two tag inserts share one statement, so one empty result precedes
    // the delete's row.
    let (tags, blog) = make_entries();
    let connection = FakeConnection::with_results([ScriptedResult::result_sets(vec![
        vec![],
        vec![vec![1.into()]],
    ])]);
    let all = dyn_entries(&[&tags[0], &tags[1], &blog]);
    assert_eq!(returning(options).save_changes(&all, &connection).unwrap(), 3);
    assert_eq!(blog.state(), EntityState::Detached);

    let (tags, blog) = make_entries();
    let connection = FakeConnection::with_results([ScriptedResult::result_sets(vec![vec![]])]);
    let all = dyn_entries(&[&tags[0], &tags[1], &blog]);
    let err = returning(options).save_changes(&all, &connection).unwrap_err();
    assert!(err.is_concurrency(), "{err}");
    assert_eq!(err.entries().len(), 1);
    assert_eq!(err.entries()[0].entity_type().name(), "Blog");
}

#[test]
fn store_failures_are_wrapped_with_the_batch_entries() {
    let blog = entry(&blog_type(), [("Name", Value::from("rust"))], EntityState::Added);
    let connection = FakeConnection::with_results([ScriptedResult::error("deadlock victim")]);

    let err = sql_server()
        .save_changes(&dyn_entries(&[&blog]), &connection)
        .unwrap_err();
    assert!(matches!(err, UpdateError::Update { .. }), "{err}");
    assert!(err.to_string().contains("deadlock victim"));
    assert_eq!(err.entries().len(), 1);
    assert_eq!(blog.state(), EntityState::Added);
}

#[test]
fn malformed_row_counts_are_not_concurrency_errors() {
    let blog = entry(
        &blog_type(),
        [("Id", Value::from(4)), ("Name", Value::from("x"))],
        EntityState::Deleted,
    );
    let connection =
        FakeConnection::with_results([ScriptedResult::rows(vec![vec!["one".into()]])]);

    let err = sql_server()
        .save_changes(&dyn_entries(&[&blog]), &connection)
        .unwrap_err();
    assert!(matches!(err, UpdateError::Update { .. }), "{err}");
}

fn added_blogs(names: &[&str]) -> Vec<Arc<EntityEntry>> {
    let blog = blog_type();
    names
        .iter()
        .map(|name| entry(&blog, [("Name", Value::from(*name))], EntityState::Added))
        .collect()
}

#[test]
fn grouped_inserts_match_generated_keys_by_position() {
    let blogs = added_blogs(&["a", "b", "c"]);
    // Rows come back out of order; the trailing column is the row position.
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![
        vec![30.into(), 2.into()],
        vec![10.into(), 0.into()],
        vec![20.into(), 1.into()],
    ])]);

    sql_server()
        .save_changes(&dyn_entries(&blogs.iter().collect::<Vec<_>>()), &connection)
        .unwrap();

    let ids: Vec<_> = blogs.iter().map(|b| b.value("Id").unwrap()).collect();
    assert_eq!(ids, vec![Value::from(10), Value::from(20), Value::from(30)]);
    let text = connection.last_command().unwrap().text;
    assert!(
        text.contains("DECLARE @inserted0 TABLE ([Id] bigint, [_Position] int);\nMERGE [Blogs] USING ("),
        "{text}"
    );
    assert!(text.ends_with("ORDER BY [_Position];\n"), "{text}");
    assert_eq!(connection.command_count(), 1);
}

#[test]
fn grouped_insert_rows_with_bad_positions_are_rejected() {
    for rows in [
        vec![vec![10.into(), 0.into()], vec![20.into(), 0.into()]],
        vec![vec![10.into(), 0.into()], vec![20.into(), 5.into()]],
        vec![vec![10.into()], vec![20.into()]],
    ] {
        let blogs = added_blogs(&["a", "b"]);
        let connection = FakeConnection::with_results([ScriptedResult::rows(rows)]);
        let err = sql_server()
            .save_changes(&dyn_entries(&blogs.iter().collect::<Vec<_>>()), &connection)
            .unwrap_err();
        assert!(matches!(err, UpdateError::Update { .. }), "{err}");
        assert!(blogs.iter().all(|b| b.state() == EntityState::Added));
        assert!(blogs.iter().all(|b| b.value("Id").unwrap() == Value::from(0)));
    }
}

#[test]
fn a_missing_grouped_row_names_the_unmatched_entry() {
    let blogs = added_blogs(&["a", "b", "c"]);
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![
        vec![30.into(), 2.into()],
        vec![10.into(), 0.into()],
    ])]);

    let err = sql_server()
        .save_changes(&dyn_entries(&blogs.iter().collect::<Vec<_>>()), &connection)
        .unwrap_err();
    assert!(err.is_concurrency(), "{err}");
    assert_eq!(err.entries().len(), 1);
    let missing = &err.entries()[0];
    let name = missing.entity_type().property("Name").unwrap().clone();
    assert_eq!(missing.current_value(&name), Value::from("b"));
}

#[test]
fn returning_stores_insert_generated_keys_one_statement_each() {
    let blogs = added_blogs(&["a", "b"]);
    let connection = FakeConnection::with_results([ScriptedResult::result_sets(vec![
        vec![vec![1.into()]],
        vec![vec![2.into()]],
    ])]);

    returning(BatchOptions::default())
        .save_changes(&dyn_entries(&blogs.iter().collect::<Vec<_>>()), &connection)
        .unwrap();

    let ids: Vec<_> = blogs.iter().map(|b| b.value("Id").unwrap()).collect();
    assert_eq!(ids, vec![Value::from(1), Value::from(2)]);
    let text = connection.last_command().unwrap().text;
    assert_eq!(text.matches("INSERT INTO").count(), 2, "{text}");
}

#[test]
fn a_failing_later_batch_leaves_every_entry_unsaved() {
    let blog = blog_type();
    let deleted: Vec<_> = (1..=2)
        .map(|id| {
            entry(
                &blog,
                [("Id", Value::from(id)), ("Name", Value::from("x"))],
                EntityState::Deleted,
            )
        })
        .collect();
    let connection = FakeConnection::with_results([
        ScriptedResult::rows(vec![vec![1.into()]]),
        ScriptedResult::error("connection reset"),
    ]);
    let pipeline = UpdatePipeline::new(
        Arc::new(SqlServerUpdateSqlGenerator::new()),
        BatchOptions::new(1, 2100).unwrap(),
    );

    let err = pipeline
        .save_changes(&dyn_entries(&deleted.iter().collect::<Vec<_>>()), &connection)
        .unwrap_err();
    assert!(matches!(err, UpdateError::Update { .. }));
    assert_eq!(connection.command_count(), 2);
    assert!(deleted.iter().all(|e| e.state() == EntityState::Deleted));
}

#[test]
fn batches_follow_the_configured_limits() {
    let blog = blog_type();
    let entries: Vec<_> = (1..=5)
        .map(|id| {
            entry(
                &blog,
                [("Id", Value::from(id)), ("Name", Value::from("x"))],
                EntityState::Deleted,
            ) as Arc<dyn UpdateEntry>
        })
        .collect();
    let preparer = CommandBatchPreparer::new(
        Arc::new(SqlServerUpdateSqlGenerator::new()),
        BatchOptions::from_config(&Config::new().max_batch_size(2)).unwrap(),
    );
    let batches = preparer.prepare(&entries).unwrap();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.len() <= 2));
}

#[test]
fn sequence_blocks_feed_the_hilo_generator() {
    let connection = Arc::new(FakeConnection::with_results([
        ScriptedResult::rows(vec![vec![100.into()]]),
        ScriptedResult::rows(vec![vec![200.into()]]),
    ]));
    let source = SequenceBlockSource::new(
        connection.clone(),
        &SqlServerUpdateSqlGenerator::new(),
        "BlogIds",
        Some("dbo"),
    )
    .unwrap();
    assert_eq!(source.sql(), "SELECT NEXT VALUE FOR [dbo].[BlogIds];");

    let generator = HiLoValueGenerator::new(source, 2).unwrap();
    let keys: Vec<i64> = (0..3).map(|_| generator.next().unwrap()).collect();
    assert_eq!(keys, vec![100, 101, 200]);
    assert_eq!(connection.command_count(), 2);
}

#[test]
fn empty_sequence_names_are_rejected() {
    let connection = Arc::new(FakeConnection::new());
    assert!(matches!(
        SequenceBlockSource::new(connection, &ReturningUpdateSqlGenerator::new(), "", None),
        Err(UpdateError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn async_insert_propagates_the_generated_identity() {
    let blog = entry(&blog_type(), [("Name", Value::from("rust"))], EntityState::Added);
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![vec![7.into()]])]);

    let saved = returning(BatchOptions::default())
        .save_changes_async(&dyn_entries(&[&blog]), &connection, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(saved, 1);
    assert_eq!(blog.value("Id").unwrap(), Value::from(7));
    assert!(connection
        .last_command()
        .unwrap()
        .text
        .ends_with("RETURNING \"Id\";\n"));
}

#[tokio::test]
async fn async_grouped_inserts_match_keys_by_position() {
    let blogs = added_blogs(&["a", "b"]);
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![
        vec![8.into(), 1.into()],
        vec![7.into(), 0.into()],
    ])]);

    sql_server()
        .save_changes_async(
            &dyn_entries(&blogs.iter().collect::<Vec<_>>()),
            &connection,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let ids: Vec<_> = blogs.iter().map(|b| b.value("Id").unwrap()).collect();
    assert_eq!(ids, vec![Value::from(7), Value::from(8)]);
}

#[tokio::test]
async fn async_concurrency_matches_sync_behavior() {
    let post = modified_post();
    let connection = FakeConnection::with_results([ScriptedResult::rows(vec![])]);

    let err = sql_server()
        .save_changes_async(&dyn_entries(&[&post]), &connection, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_concurrency(), "{err}");
    assert_eq!(post.pending_value("Version").unwrap(), None);
}

#[tokio::test]
async fn cancelled_saves_send_nothing() {
    let blog = entry(&blog_type(), [("Name", Value::from("rust"))], EntityState::Added);
    let connection = FakeConnection::new();
    let token = CancellationToken::new();
    token.cancel();

    let err = sql_server()
        .save_changes_async(&dyn_entries(&[&blog]), &connection, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Cancelled));
    assert_eq!(connection.command_count(), 0);
    assert_eq!(blog.state(), EntityState::Added);
}
