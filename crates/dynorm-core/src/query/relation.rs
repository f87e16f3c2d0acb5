//! Two-step relation resolution through an association model.
//!
//! A many-to-many read is resolved without server-side joins: first read
//! the association rows that match the join filter, projecting only the
//! foreign key to the target model, then batch-get the distinct targets.

use std::collections::HashSet;

use dynorm_proto::Operand;
use tracing::debug;

use crate::catalog::ModelDef;
use crate::error::Error;
use crate::store::{index_name, FilterExpression, Item, QueryRequest, ScanRequest};

use super::executor::QueryExecutor;
use super::filter::compile;
use super::planner::PhysicalPlan;

/// Resolve a [`PhysicalPlan::RelationJoin`] into items of `model`.
pub(crate) fn resolve_join(
    executor: &QueryExecutor<'_>,
    model: &ModelDef,
    plan: &PhysicalPlan,
    ceiling: Option<usize>,
) -> Result<Vec<Item>, Error> {
    let PhysicalPlan::RelationJoin {
        through_model,
        filter,
        target_fk,
        residual,
    } = plan
    else {
        return Err(Error::Configuration(format!(
            "{} is not a relation join",
            plan.kind()
        )));
    };

    let through = executor.catalog().model(through_model)?;
    let table = executor.table(&through);
    let column = through.require_column(&filter.column)?;
    let value = match &filter.operand {
        Operand::Value(value) => value,
        _ => {
            return Err(Error::Configuration(format!(
                "join filter on {}.{} must compare against a single value",
                through.name, filter.column
            )))
        }
    };
    let key_value = executor.codec().encode(column, value)?.ok_or_else(|| {
        Error::Validation(format!(
            "join filter on {}.{} cannot be null",
            through.name, filter.column
        ))
    })?;

    let projection = vec![target_fk.clone()];
    let links = if column.indexed && !column.primary_key {
        let request = QueryRequest::new(index_name(&column.name), column.name.clone(), key_value)
            .with_projection(projection);
        executor.query_pages(&table, request, None)?
    } else {
        let request = ScanRequest::new()
            .with_filter(Some(FilterExpression::eq(column.name.clone(), key_value)))
            .with_projection(projection);
        executor.scan_pages(&table, request, None)?
    };

    let mut seen = HashSet::new();
    let keys: Vec<String> = links
        .iter()
        .filter_map(|item| item.get(target_fk).and_then(|v| v.as_s()))
        .filter(|key| seen.insert(*key))
        .map(str::to_string)
        .collect();
    debug!(
        through = %through.name,
        links = links.len(),
        targets = keys.len(),
        "resolved association rows"
    );
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    if residual.is_empty() {
        return executor.batch_get(model, &keys, false, ceiling);
    }
    let mut items = executor.batch_get(model, &keys, false, None)?;
    if let Some(expr) = compile(&executor.codec(), model, residual)? {
        items.retain(|item| expr.evaluate(item));
    }
    if let Some(c) = ceiling {
        items.truncate(c);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ColumnDef, ColumnType};
    use crate::config::EngineConfig;
    use crate::store::{AttributeValue, DocumentStore, MemoryStore, PutCondition};
    use dynorm_proto::{JoinSpec, Lookup, SelectQuery};

    struct TestDb {
        store: MemoryStore,
        catalog: Catalog,
        config: EngineConfig,
    }

    fn setup_test_db() -> TestDb {
        let student = ModelDef::new("Student", "id")
            .with_column(ColumnDef::new("id", ColumnType::String))
            .with_column(ColumnDef::new("name", ColumnType::String));
        let course = ModelDef::new("Course", "id")
            .with_column(ColumnDef::new("id", ColumnType::String));
        let enrollment = ModelDef::new("Enrollment", "id")
            .with_column(ColumnDef::new("id", ColumnType::String))
            .with_column(ColumnDef::new("course_id", ColumnType::foreign_key("Course")))
            .with_column(ColumnDef::new("student_id", ColumnType::foreign_key("Student")));
        let catalog = Catalog::new()
            .with_models([student, course, enrollment])
            .unwrap();
        let config = EngineConfig::default().with_retry_base_delay_ms(0);
        let store = MemoryStore::new().with_page_size(2);
        for name in catalog.model_names() {
            let model = catalog.model(&name).unwrap();
            store.create_table(model.table_spec(&config)).unwrap();
        }
        TestDb {
            store,
            catalog,
            config,
        }
    }

    fn put(db: &TestDb, table: &str, pairs: &[(&str, &str)]) {
        let item = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AttributeValue::s(*v)))
            .collect();
        db.store.put_item(table, item, PutCondition::Always).unwrap();
    }

    #[test]
    fn test_join_dedupes_across_pages() {
        let db = setup_test_db();
        put(&db, "student", &[("id", "s1"), ("name", "Ada")]);
        put(&db, "student", &[("id", "s2"), ("name", "Alan")]);
        put(&db, "student", &[("id", "s3"), ("name", "Grace")]);
        for (id, course, student) in [
            ("e1", "c1", "s1"),
            ("e2", "c2", "s3"),
            ("e3", "c1", "s2"),
            ("e4", "c1", "s1"),
            ("e5", "c1", "s2"),
        ] {
            put(
                &db,
                "enrollment",
                &[("id", id), ("course_id", course), ("student_id", student)],
            );
        }
        db.store.reset_calls();

        let exec = QueryExecutor::new(&db.store, &db.catalog, &db.config);
        let query = SelectQuery::new("Student")
            .with_join(JoinSpec::new("Enrollment", Lookup::exact("course_id", "c1")));
        let rows = exec.select(&query).unwrap();

        let mut ids: Vec<&str> = rows.iter().filter_map(|r| r.value("id").as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(db.store.calls().scan, 3);
        assert_eq!(db.store.calls().batch_get_item, 1);
    }

    #[test]
    fn test_join_reads_are_never_consistent() {
        let db = setup_test_db();
        put(&db, "student", &[("id", "s1"), ("name", "Ada")]);
        put(
            &db,
            "enrollment",
            &[("id", "e1"), ("course_id", "c1"), ("student_id", "s1")],
        );
        db.store.reset_calls();

        let config = EngineConfig::default()
            .with_consistent_read(true)
            .with_retry_base_delay_ms(0);
        let exec = QueryExecutor::new(&db.store, &db.catalog, &config);
        let query = SelectQuery::new("Student")
            .with_join(JoinSpec::new("Enrollment", Lookup::exact("course_id", "c1")));
        assert_eq!(exec.select(&query).unwrap().len(), 1);

        let calls = db.store.calls();
        assert_eq!(calls.scan, 1);
        assert_eq!(calls.batch_get_item, 1);
        assert_eq!(calls.consistent_reads, 0);
    }

    #[test]
    fn test_join_without_links_skips_target_read() {
        let db = setup_test_db();
        let exec = QueryExecutor::new(&db.store, &db.catalog, &db.config);
        let query = SelectQuery::new("Student")
            .with_join(JoinSpec::new("Enrollment", Lookup::exact("course_id", "none")));
        assert!(exec.select(&query).unwrap().is_empty());
        assert_eq!(db.store.calls().batch_get_item, 0);
    }
}
