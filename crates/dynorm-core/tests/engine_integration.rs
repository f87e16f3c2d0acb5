//! Integration tests for the query and mutation engines.

use std::sync::Arc;

use dynorm_core::catalog::{Catalog, ColumnDef, ColumnType, DefaultValue, ModelDef};
use dynorm_core::config::{EngineConfig, StoreConfig};
use dynorm_core::migration::BackfillConfig;
use dynorm_core::query::PhysicalPlan;
use dynorm_core::store::{DocumentStore, MemoryStore, SledStore};
use dynorm_core::{Error, Session};
use dynorm_proto::{
    FieldValue, JoinSpec, Lookup, OrderSpec, Pagination, Predicate, SelectQuery, Value,
};
use tracing_subscriber::EnvFilter;

struct TestContext {
    store: Arc<MemoryStore>,
    session: Session,
}

impl TestContext {
    fn new(catalog: Catalog, config: EngineConfig, page_size: usize) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new().with_page_size(page_size));
        let handle: Arc<dyn DocumentStore> = store.clone();
        let session = Session::new(handle, Arc::new(catalog), config.with_retry_base_delay_ms(0));
        session.provision().unwrap();
        store.reset_calls();
        Self { store, session }
    }
}

/// Logs go to the test output; set `RUST_LOG=dynorm_core=debug` to see plans.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup_blog_catalog() -> Catalog {
    let author = ModelDef::new("Author", "id")
        .with_column(ColumnDef::new("id", ColumnType::Uuid))
        .with_column(ColumnDef::new("username", ColumnType::String).with_index());
    let post = ModelDef::new("Post", "id")
        .with_column(ColumnDef::new("id", ColumnType::Uuid))
        .with_column(ColumnDef::new("title", ColumnType::String))
        .with_column(ColumnDef::new("author_id", ColumnType::foreign_key("Author")).with_index());
    Catalog::new().with_models([author, post]).unwrap()
}

fn setup_book_catalog() -> Catalog {
    let book = ModelDef::new("Book", "id")
        .with_column(ColumnDef::new("id", ColumnType::String))
        .with_column(ColumnDef::new("title", ColumnType::String))
        .with_column(ColumnDef::optional("rating", ColumnType::Integer));
    Catalog::new().with_models([book]).unwrap()
}

fn setup_school_catalog() -> Catalog {
    let student = ModelDef::new("Student", "id")
        .with_column(ColumnDef::new("id", ColumnType::String))
        .with_column(ColumnDef::new("name", ColumnType::String));
    let course = ModelDef::new("Course", "id").with_column(ColumnDef::new("id", ColumnType::String));
    let enrollment = ModelDef::new("Enrollment", "id")
        .with_column(ColumnDef::new("id", ColumnType::String))
        .with_column(ColumnDef::new("course_id", ColumnType::foreign_key("Course")))
        .with_column(ColumnDef::new("student_id", ColumnType::foreign_key("Student")));
    Catalog::new()
        .with_models([student, course, enrollment])
        .unwrap()
}

fn insert_books(session: &Session, count: usize) -> Vec<Value> {
    let rows: Vec<Vec<FieldValue>> = (0..count)
        .map(|i| {
            vec![
                FieldValue::new("id", format!("b{:02}", i)),
                FieldValue::new("title", format!("Book {}", i)),
            ]
        })
        .collect();
    session.insert("Book", &rows).unwrap()
}

fn book_ids(count: usize) -> Vec<Value> {
    (0..count).map(|i| Value::from(format!("b{:02}", i))).collect()
}

// ============== Tests ==============

#[test]
fn test_author_with_thirty_posts() {
    let ctx = TestContext::new(setup_blog_catalog(), EngineConfig::default(), 7);
    let session = &ctx.session;

    let keys = session
        .insert("Author", &[vec![FieldValue::new("username", "alice")]])
        .unwrap();
    let alice = keys[0].clone();
    assert!(matches!(alice, Value::Uuid(_)));

    let posts: Vec<Vec<FieldValue>> = (0..30)
        .map(|i| {
            vec![
                FieldValue::new("title", format!("Post {}", i)),
                FieldValue::new("author_id", alice.clone()),
            ]
        })
        .collect();
    assert_eq!(session.insert("Post", &posts).unwrap().len(), 30);

    let by_author = SelectQuery::new("Post").with_filter(Lookup::exact("author_id", alice.clone()));
    assert!(matches!(
        session.explain(&by_author).unwrap(),
        PhysicalPlan::IndexedQuery { .. }
    ));

    ctx.store.reset_calls();
    let rows = session.select(&by_author).unwrap();
    assert_eq!(rows.len(), 30);
    let calls = ctx.store.calls();
    assert_eq!(calls.query, 5);
    assert_eq!(calls.scan, 0);

    let by_key = SelectQuery::new("Author").with_filter(Lookup::exact("pk", alice.clone()));
    let author = session.get(&by_key).unwrap();
    assert_eq!(author.value("username"), &Value::from("alice"));

    let deleted = session
        .delete("Author", Some(&Lookup::exact("pk", alice.clone()).into()))
        .unwrap();
    assert_eq!(deleted, 1);

    let err = session.get(&by_key).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(session.count(&by_author).unwrap(), 30);
}

#[test]
fn test_batch_get_chunking() {
    let ctx = TestContext::new(
        setup_book_catalog(),
        EngineConfig::default().with_batch_chunk_size(4),
        100,
    );
    insert_books(&ctx.session, 10);
    ctx.session.reset_cache();

    let mut ids = book_ids(10);
    ids.push(Value::from("b03"));
    ids.push(Value::from("missing"));
    let query = SelectQuery::new("Book").with_filter(Lookup::in_values("pk", ids));

    ctx.store.reset_calls();
    let rows = ctx.session.select(&query).unwrap();
    assert_eq!(rows.len(), 10);
    // 11 distinct keys in chunks of 4
    assert_eq!(ctx.store.calls().batch_get_item, 3);
}

#[test]
fn test_batch_get_retries_unprocessed_keys() {
    let ctx = TestContext::new(
        setup_book_catalog(),
        EngineConfig::default().with_batch_chunk_size(4),
        100,
    );
    insert_books(&ctx.session, 8);
    ctx.session.reset_cache();

    let query = SelectQuery::new("Book").with_filter(Lookup::in_values("pk", book_ids(8)));
    ctx.store.reset_calls();
    ctx.store.inject_partial_batches(1);

    let rows = ctx.session.select(&query).unwrap();
    assert_eq!(rows.len(), 8);
    assert_eq!(ctx.store.calls().batch_get_item, 3);
}

#[test]
fn test_batch_get_retries_throttling() {
    let ctx = TestContext::new(setup_book_catalog(), EngineConfig::default(), 100);
    insert_books(&ctx.session, 3);
    ctx.session.reset_cache();

    let query = SelectQuery::new("Book").with_filter(Lookup::in_values("pk", book_ids(3)));
    ctx.store.reset_calls();
    ctx.store.inject_throttles(2);

    assert_eq!(ctx.session.select(&query).unwrap().len(), 3);
    assert_eq!(ctx.store.calls().batch_get_item, 3);

    ctx.session.reset_cache();
    ctx.store.inject_throttles(10);
    let err = ctx.session.select(&query).unwrap_err();
    assert!(err.is_throttled());
}

#[test]
fn test_empty_membership_makes_no_calls() {
    let ctx = TestContext::new(setup_book_catalog(), EngineConfig::default(), 100);
    insert_books(&ctx.session, 3);
    ctx.store.reset_calls();

    let by_key = SelectQuery::new("Book").with_filter(Lookup::in_values("pk", vec![]));
    assert!(ctx.session.select(&by_key).unwrap().is_empty());

    let by_title = SelectQuery::new("Book").with_filter(Predicate::and(vec![
        Lookup::exact("rating", 3).into(),
        Lookup::in_values("title", vec![]).into(),
    ]));
    assert_eq!(ctx.session.explain(&by_title).unwrap(), PhysicalPlan::Empty);
    assert_eq!(ctx.session.count(&by_title).unwrap(), 0);
    assert!(!ctx.session.exists(&by_title).unwrap());

    let deleted = ctx.session.delete("Book", Some(&by_key.filter.clone().unwrap())).unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(ctx.store.calls().total(), 0);
}

#[test]
fn test_access_path_selection() {
    let scanning = TestContext::new(setup_blog_catalog(), EngineConfig::default(), 10);
    let strict = TestContext::new(
        setup_blog_catalog(),
        EngineConfig::default().with_scan_on_filter(false),
        10,
    );

    let by_username = SelectQuery::new("Author").with_filter(Lookup::exact("username", "alice"));
    let by_title = SelectQuery::new("Post").with_filter(Lookup::contains("title", "rust"));

    for ctx in [&scanning, &strict] {
        assert!(matches!(
            ctx.session.explain(&by_username).unwrap(),
            PhysicalPlan::IndexedQuery { .. }
        ));
    }
    assert!(matches!(
        scanning.session.explain(&by_title).unwrap(),
        PhysicalPlan::Scan { .. }
    ));

    let err = strict.session.select(&by_title).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(strict.store.calls().total(), 0);

    // An unfiltered read is always allowed to scan.
    assert!(strict.session.select(&SelectQuery::new("Post")).unwrap().is_empty());
    assert_eq!(strict.store.calls().scan, 1);
}

#[test]
fn test_nulls_sort_first_in_both_directions() {
    let ctx = TestContext::new(setup_book_catalog(), EngineConfig::default(), 2);
    let ratings = [Some(3), None, Some(1), None, Some(2)];
    let rows: Vec<Vec<FieldValue>> = ratings
        .iter()
        .enumerate()
        .map(|(i, rating)| {
            let mut row = vec![
                FieldValue::new("id", format!("b{}", i)),
                FieldValue::new("title", "t"),
            ];
            if let Some(r) = rating {
                row.push(FieldValue::new("rating", *r));
            }
            row
        })
        .collect();
    ctx.session.insert("Book", &rows).unwrap();

    let sorted = |order: OrderSpec| -> Vec<Value> {
        let query = SelectQuery::new("Book")
            .with_order(order)
            .with_fields(vec!["rating".to_string()]);
        ctx.session
            .select(&query)
            .unwrap()
            .iter()
            .map(|row| row.value("rating").clone())
            .collect()
    };

    assert_eq!(
        sorted(OrderSpec::asc("rating")),
        vec![Value::Null, Value::Null, Value::Int(1), Value::Int(2), Value::Int(3)]
    );
    assert_eq!(
        sorted(OrderSpec::desc("rating")),
        vec![Value::Null, Value::Null, Value::Int(3), Value::Int(2), Value::Int(1)]
    );
}

#[test]
fn test_pagination_window() {
    let ctx = TestContext::new(setup_book_catalog(), EngineConfig::default(), 3);
    insert_books(&ctx.session, 9);

    let page = SelectQuery::new("Book")
        .with_order(OrderSpec::asc("id"))
        .with_pagination(Pagination::new(3, 4));
    let ids: Vec<Value> = ctx
        .session
        .select(&page)
        .unwrap()
        .iter()
        .map(|row| row.value("id").clone())
        .collect();
    assert_eq!(ids, book_ids(7)[4..].to_vec());
    assert_eq!(ctx.session.count(&page).unwrap(), 3);

    ctx.store.reset_calls();
    let head = SelectQuery::new("Book").with_pagination(Pagination::limit(2));
    assert_eq!(ctx.session.select(&head).unwrap().len(), 2);
    assert_eq!(ctx.store.calls().scan, 1);
}

#[test]
fn test_relation_join_across_pages() {
    let ctx = TestContext::new(setup_school_catalog(), EngineConfig::default(), 2);
    let session = &ctx.session;

    let students: Vec<Vec<FieldValue>> = (1..=5)
        .map(|i| {
            vec![
                FieldValue::new("id", format!("s{}", i)),
                FieldValue::new("name", format!("Student {}", i)),
            ]
        })
        .collect();
    session.insert("Student", &students).unwrap();
    session
        .insert(
            "Course",
            &[vec![FieldValue::new("id", "c1")], vec![FieldValue::new("id", "c2")]],
        )
        .unwrap();

    let enrollments: Vec<Vec<FieldValue>> = [
        ("c1", "s1"),
        ("c2", "s2"),
        ("c1", "s3"),
        ("c1", "s1"),
        ("c2", "s4"),
        ("c1", "s5"),
        ("c2", "s1"),
    ]
    .iter()
    .map(|(course, student)| {
        vec![
            FieldValue::new("course_id", *course),
            FieldValue::new("student_id", *student),
        ]
    })
    .collect();
    session.insert("Enrollment", &enrollments).unwrap();
    session.reset_cache();

    let in_c1 = SelectQuery::new("Student")
        .with_join(JoinSpec::new("Enrollment", Lookup::exact("course_id", "c1")))
        .with_order(OrderSpec::asc("id"));
    assert!(matches!(
        session.explain(&in_c1).unwrap(),
        PhysicalPlan::RelationJoin { .. }
    ));

    ctx.store.reset_calls();
    let ids: Vec<Value> = session
        .select(&in_c1)
        .unwrap()
        .iter()
        .map(|row| row.value("id").clone())
        .collect();
    assert_eq!(
        ids,
        vec![Value::from("s1"), Value::from("s3"), Value::from("s5")]
    );
    let calls = ctx.store.calls();
    assert_eq!(calls.scan, 4);
    assert_eq!(calls.batch_get_item, 1);

    let named = in_c1.clone().with_filter(Lookup::exact("name", "Student 3"));
    let rows = session.select(&named).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value("id"), &Value::from("s3"));
}

#[test]
fn test_registry_shares_connections() {
    let catalog = Arc::new(setup_book_catalog());
    let config = EngineConfig::default();
    let first = Session::connect(
        "engine-integration-shared",
        &StoreConfig::memory(),
        Arc::clone(&catalog),
        config.clone(),
    )
    .unwrap();
    first.provision().unwrap();
    insert_books(&first, 2);

    let second = Session::connect(
        "engine-integration-shared",
        &StoreConfig::memory(),
        catalog,
        config,
    )
    .unwrap();
    assert_eq!(second.count(&SelectQuery::new("Book")).unwrap(), 2);
}

#[test]
fn test_sled_backend() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(SledStore::open(dir.path()).unwrap());
    let session = Session::new(store, Arc::new(setup_blog_catalog()), EngineConfig::default());
    session.provision().unwrap();

    let alice = session
        .insert("Author", &[vec![FieldValue::new("username", "alice")]])
        .unwrap()
        .remove(0);
    let posts: Vec<Vec<FieldValue>> = (0..5)
        .map(|i| {
            vec![
                FieldValue::new("title", format!("Post {}", i)),
                FieldValue::new("author_id", alice.clone()),
            ]
        })
        .collect();
    session.insert("Post", &posts).unwrap();

    let by_author = SelectQuery::new("Post").with_filter(Lookup::exact("author_id", alice.clone()));
    assert_eq!(session.select(&by_author).unwrap().len(), 5);

    let updated = session
        .update(
            "Post",
            Some(&Lookup::exact("author_id", alice).into()),
            &[FieldValue::new("title", "edited")],
        )
        .unwrap();
    assert_eq!(updated, 5);
    let edited = SelectQuery::new("Post").with_filter(Lookup::exact("title", "edited"));
    assert_eq!(session.count(&edited).unwrap(), 5);

    let progress = session
        .add_column(
            "Post",
            ColumnDef::new("views", ColumnType::Integer).with_default(DefaultValue::Int(0)),
            BackfillConfig::default().with_page_size(2),
        )
        .unwrap();
    assert_eq!(progress.updated, 5);
    let zero_views = SelectQuery::new("Post").with_filter(Lookup::exact("views", 0));
    assert_eq!(session.count(&zero_views).unwrap(), 5);
}
