//! End-to-end behaviour against a live PostgreSQL database.
//!
//! Runs only when `RULEQUERY_DATABASE_URL` points at PostgreSQL:
//!
//! ```bash
//! RULEQUERY_DATABASE_URL=postgres://postgres@localhost/rulequery cargo test --test postgres
//! ```

use pretty_assertions::assert_eq;
use rulequery::prelude::*;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Member {
    id: i64,
    name: String,
    joined_at: String,
}

fn database_url() -> Option<String> {
    std::env::var("RULEQUERY_DATABASE_URL")
        .ok()
        .filter(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
}

/// A table of its own, so concurrent runs and pooled connections all see it.
struct Table {
    db: SqlxExecutor,
    name: String,
}

impl Table {
    async fn create(url: &str, tag: &str) -> Self {
        let db = SqlxExecutor::connect(url).await.unwrap();
        let name = format!("rulequery_{}_{}", tag, std::process::id());
        db.execute(&format!("DROP TABLE IF EXISTS {}", name), &[])
            .await
            .unwrap();
        db.execute(
            &format!(
                "CREATE TABLE {} (id INT8 PRIMARY KEY, name TEXT NOT NULL, joined_at TIMESTAMPTZ NOT NULL)",
                name
            ),
            &[],
        )
        .await
        .unwrap();
        db.execute(
            &format!(
                "INSERT INTO {} (id, name, joined_at) VALUES
                    (1, 'Alice Smith', '2024-03-02 00:00:00+00'),
                    (2, 'bob', '2024-03-01 23:59:59+00'),
                    (3, 'Carol ALICE', '2024-03-03 00:00:00+00'),
                    (4, 'dave_50%', '2024-03-02 23:59:59+00')",
                name
            ),
            &[],
        )
        .await
        .unwrap();
        Self { db, name }
    }

    fn catalog(&self) -> FilterCatalog {
        FilterCatalog::new(&self.name)
            .alias("m")
            .field("id", FieldDef::number("id"))
            .field("name", FieldDef::string("name"))
            .field("joined", FieldDef::date("joined_at"))
            .sortable(&["id"])
            .default_sort("id")
    }

    async fn members(&self, rules: RuleGroup) -> Vec<Member> {
        let query = PaginatedQuery {
            rules: Some(rules),
            ..Default::default()
        };
        let page: Page<Member> = fetch(&self.db, &self.catalog(), &query, None)
            .await
            .unwrap();
        assert_eq!(page.total as usize, page.count);
        page.items
    }

    async fn cleanup(self) {
        self.db
            .execute(&format!("DROP TABLE {}", self.name), &[])
            .await
            .unwrap();
    }
}

fn rule(field: &str, op: RuleOperator, value: Vec<RuleValue>) -> RuleItem {
    Rule::new(field, op, value).into()
}

#[tokio::test]
async fn between_days_and_case_insensitive_contains() {
    let Some(url) = database_url() else {
        eprintln!("RULEQUERY_DATABASE_URL is not a postgres URL, skipping");
        return;
    };
    let table = Table::create(&url, "between").await;

    let day = RuleGroup::and(vec![rule(
        "joined",
        RuleOperator::Between,
        vec!["2024-03-02".into(), "2024-03-02".into()],
    )]);
    let members = table.members(day).await;
    let ids: Vec<i64> = members.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 4]);
    assert_eq!(members[0].joined_at, "2024-03-02T00:00:00+00:00");
    assert_eq!(members[1].joined_at, "2024-03-02T23:59:59+00:00");

    let alice = RuleGroup::and(vec![rule("name", RuleOperator::Contains, vec!["alice".into()])]);
    let names: Vec<String> = table
        .members(alice)
        .await
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["Alice Smith", "Carol ALICE"]);

    // Wildcards in the value are literal
    let percent = RuleGroup::and(vec![rule("name", RuleOperator::EndsWith, vec!["50%".into()])]);
    let ids: Vec<i64> = table.members(percent).await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![4]);

    let either = RuleGroup::or(vec![
        rule("joined", RuleOperator::Less, vec!["2024-03-02".into()]),
        rule("name", RuleOperator::BeginsWith, vec!["CAROL".into()]),
    ]);
    let ids: Vec<i64> = table.members(either).await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![2, 3]);

    table.cleanup().await;
}
