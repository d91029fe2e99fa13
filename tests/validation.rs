//! Invalid input is rejected before anything reaches the database.

use rulequery::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts calls and returns nothing.
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

impl Executor for CountingExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn fetch_rows(&self, _sql: &str, _params: &[SqlValue]) -> QueryResult<Vec<JsonRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    }

    async fn fetch_count(&self, _sql: &str, _params: &[SqlValue]) -> QueryResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

fn catalog() -> FilterCatalog {
    FilterCatalog::new("people")
        .field("name", FieldDef::string("name"))
        .field("age", FieldDef::number("age"))
        .field("born", FieldDef::date("born_at"))
}

async fn run(json: &str) -> (QueryResult<Page<JsonRow>>, usize) {
    let db = CountingExecutor::default();
    let query = PaginatedQuery::from_json(json).unwrap();
    let result = fetch_rows(&db, &catalog(), &query, None).await;
    (result, db.calls.load(Ordering::SeqCst))
}

#[tokio::test]
async fn unknown_field_never_executes() {
    let (result, calls) = run(
        r#"{"rules": {"condition": "AND", "rules": [
            {"field": "name", "operator": "equal", "value": ["x"]},
            {"field": "salary", "operator": "greater", "value": [1000]}
        ]}}"#,
    )
    .await;

    let err = result.unwrap_err();
    assert_eq!(calls, 0);
    assert_eq!(err.status_code(), 400);
    match err {
        QueryError::Rule(e) => {
            assert_eq!(e.field(), "salary");
            assert_eq!(e.path(), "rules[1]");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn between_with_one_value_is_malformed() {
    let (result, calls) = run(
        r#"{"rules": {"condition": "AND", "rules": [
            {"field": "age", "operator": "between", "value": [18]}
        ]}}"#,
    )
    .await;

    assert_eq!(calls, 0);
    assert!(matches!(
        result,
        Err(QueryError::Rule(RuleError::MalformedValue { .. }))
    ));
}

#[tokio::test]
async fn bad_date_never_executes() {
    let (result, calls) = run(
        r#"{"rules": {"condition": "OR", "rules": [
            {"field": "age", "operator": "less", "value": [5]},
            {"condition": "AND", "rules": [
                {"field": "born", "operator": "equal", "value": ["$now(w:1)"]}
            ]}
        ]}}"#,
    )
    .await;

    assert_eq!(calls, 0);
    match result {
        Err(QueryError::Rule(e @ RuleError::UnparseableDate { .. })) => {
            assert_eq!(e.path(), "rules[1].rules[0]");
        }
        other => panic!("unexpected result: {:?}", other.map(|p| p.count)),
    }
}

#[tokio::test]
async fn valid_query_runs_page_and_count() {
    let (result, calls) = run(
        r#"{"rules": {"condition": "AND", "rules": [
            {"field": "name", "operator": "not_contains", "value": ["bot"]}
        ]}, "limit": 5}"#,
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(calls, 2);
}

#[test]
fn unknown_operator_is_bad_json() {
    let err = PaginatedQuery::from_json(
        r#"{"rules": {"condition": "AND", "rules": [
            {"field": "age", "operator": "roughly", "value": [5]}
        ]}}"#,
    )
    .unwrap_err();
    assert!(err.is_client_error());
}

#[test]
fn merge_with_admin_bypass_is_unwrapped() {
    let caller = RuleGroup::and(vec![
        Rule::new("name", RuleOperator::Equal, vec!["me".into()]).into(),
    ]);
    let merged = merge([Some(&caller), None]);
    assert_eq!(merged, caller);

    let clause = rulequery::compile(&merged, &catalog(), Dialect::Sqlite, "").unwrap();
    assert_eq!(clause.sql, "(\"name\" = :r0_0)");
}
