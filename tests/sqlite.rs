//! End-to-end behaviour against an in-memory SQLite database.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use rulequery::prelude::*;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Contact {
    id: i64,
    name: String,
    status: String,
    age: i64,
    joined_at: String,
    phone: Option<String>,
}

const ROWS: &[(i64, &str, &str, i64, &str, Option<&str>)] = &[
    (1, "alice", "open", 25, "2024-03-02 00:00:00", None),
    (2, "bob", "closed", 40, "2024-03-01 23:59:59", Some("555")),
    (3, "carol", "open", 70, "2024-03-03 00:00:00", Some("")),
    (4, "dave", "open", 17, "2024-02-10 12:00:00", Some("777")),
];

async fn setup() -> SqlxExecutor {
    let db = SqlxExecutor::connect("sqlite::memory:").await.unwrap();
    db.execute(
        "CREATE TABLE contacts (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            age INTEGER NOT NULL,
            joined_at DATETIME NOT NULL,
            phone TEXT
        )",
        &[],
    )
    .await
    .unwrap();

    for (id, name, status, age, joined, phone) in ROWS {
        match phone {
            Some(phone) => db
                .execute(
                    "INSERT INTO contacts (id, name, status, age, joined_at, phone) VALUES (?, ?, ?, ?, ?, ?)",
                    &[(*id).into(), (*name).into(), (*status).into(), (*age).into(), (*joined).into(), (*phone).into()],
                )
                .await
                .unwrap(),
            None => db
                .execute(
                    "INSERT INTO contacts (id, name, status, age, joined_at) VALUES (?, ?, ?, ?, ?)",
                    &[(*id).into(), (*name).into(), (*status).into(), (*age).into(), (*joined).into()],
                )
                .await
                .unwrap(),
        };
    }
    db
}

fn catalog() -> FilterCatalog {
    FilterCatalog::new("contacts")
        .alias("c")
        .field("id", FieldDef::number("id"))
        .field("name", FieldDef::string("name"))
        .field("status", FieldDef::enumeration("status", &["open", "closed"]))
        .field("age", FieldDef::number("age"))
        .field("joined", FieldDef::date("joined_at"))
        .field("phone", FieldDef::string("phone").nullable())
        .sortable(&["id", "age", "joined"])
        .default_sort("id")
}

fn rule(field: &str, op: RuleOperator, value: Vec<RuleValue>) -> RuleItem {
    Rule::new(field, op, value).into()
}

async fn ids(db: &SqlxExecutor, catalog: &FilterCatalog, rules: RuleGroup) -> Vec<i64> {
    let query = PaginatedQuery {
        rules: Some(rules),
        ..Default::default()
    };
    let page: Page<Contact> = fetch(db, catalog, &query, None).await.unwrap();
    page.items.iter().map(|c| c.id).collect()
}

#[tokio::test]
async fn empty_groups_match_all_or_nothing() {
    let db = setup().await;
    let catalog = catalog();

    assert_eq!(ids(&db, &catalog, RuleGroup::and(vec![])).await, vec![1, 2, 3, 4]);
    assert_eq!(ids(&db, &catalog, RuleGroup::or(vec![])).await, Vec::<i64>::new());
}

#[tokio::test]
async fn and_is_intersection_or_is_union() {
    let db = setup().await;
    let catalog = catalog();

    let adults = RuleGroup::and(vec![rule("age", RuleOperator::Greater, vec![18.into()])]);
    let open = RuleGroup::and(vec![rule("status", RuleOperator::Equal, vec!["open".into()])]);

    assert_eq!(ids(&db, &catalog, adults.clone()).await, vec![1, 2, 3]);
    assert_eq!(ids(&db, &catalog, open.clone()).await, vec![1, 3, 4]);

    let both = RuleGroup::and(vec![adults.clone().into(), open.clone().into()]);
    assert_eq!(ids(&db, &catalog, both).await, vec![1, 3]);

    let either = RuleGroup::or(vec![adults.into(), open.into()]);
    assert_eq!(ids(&db, &catalog, either).await, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn between_days_includes_the_boundary_record() {
    let db = setup().await;
    let catalog = catalog();

    let group = RuleGroup::and(vec![rule(
        "joined",
        RuleOperator::Between,
        vec!["2024-03-02".into(), "2024-03-02".into()],
    )]);
    assert_eq!(ids(&db, &catalog, group).await, vec![1]);

    let month = RuleGroup::and(vec![rule("joined", RuleOperator::Equal, vec!["2024-03".into()])]);
    assert_eq!(ids(&db, &catalog, month).await, vec![1, 2, 3]);

    let before = RuleGroup::and(vec![rule(
        "joined",
        RuleOperator::LessOrEqual,
        vec!["2024-03-01".into()],
    )]);
    assert_eq!(ids(&db, &catalog, before).await, vec![2, 4]);
}

#[tokio::test]
async fn enum_equal_matches_only_that_value() {
    let db = setup().await;
    let catalog = FilterCatalog::new("contacts").field(
        "status",
        FieldDef::enumeration("status", &["open", "closed"]).operators(&[RuleOperator::Equal]),
    );

    let group = RuleGroup::and(vec![rule("status", RuleOperator::Equal, vec!["open".into()])]);
    let query = PaginatedQuery {
        rules: Some(group),
        ..Default::default()
    };
    let page: Page<Contact> = fetch(&db, &catalog, &query, None).await.unwrap();
    assert_eq!(page.total, 3);
    assert!(page.items.iter().all(|c| c.status == "open"));

    let group = RuleGroup::and(vec![rule("status", RuleOperator::NotEqual, vec!["open".into()])]);
    let query = PaginatedQuery {
        rules: Some(group),
        ..Default::default()
    };
    let err = fetch::<Contact, _>(&db, &catalog, &query, None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Rule(RuleError::InvalidOperator { .. })));
}

#[tokio::test]
async fn negative_operators_keep_nulls() {
    let db = setup().await;
    let catalog = catalog();

    let not_555 = RuleGroup::and(vec![rule("phone", RuleOperator::NotEqual, vec!["555".into()])]);
    assert_eq!(ids(&db, &catalog, not_555).await, vec![1, 3, 4]);

    let empty = RuleGroup::and(vec![rule("phone", RuleOperator::IsEmpty, vec![])]);
    assert_eq!(ids(&db, &catalog, empty).await, vec![1, 3]);

    let not_in = RuleGroup::and(vec![rule(
        "phone",
        RuleOperator::NotIn,
        vec!["555".into(), "777".into()],
    )]);
    assert_eq!(ids(&db, &catalog, not_in).await, vec![1, 3]);
}

#[tokio::test]
async fn text_matching() {
    let db = setup().await;
    let catalog = catalog();

    let contains = RuleGroup::and(vec![rule("name", RuleOperator::Contains, vec!["A".into()])]);
    assert_eq!(ids(&db, &catalog, contains).await, vec![1, 3, 4]);

    let begins = RuleGroup::and(vec![rule("name", RuleOperator::BeginsWith, vec!["car".into()])]);
    assert_eq!(ids(&db, &catalog, begins).await, vec![3]);

    // Wildcards in the value are literal
    let wildcard = RuleGroup::and(vec![rule("name", RuleOperator::Contains, vec!["%".into()])]);
    assert_eq!(ids(&db, &catalog, wildcard).await, Vec::<i64>::new());
}

#[tokio::test]
async fn sort_and_paginate() {
    let db = setup().await;
    let catalog = catalog();

    let query = PaginatedQuery::from_json(r#"{"sort": "age", "order": "DESC", "limit": 2, "offset": 1}"#)
        .unwrap();
    let page: Page<Contact> = fetch(&db, &catalog, &query, None).await.unwrap();

    assert_eq!(page.total, 4);
    assert_eq!(page.count, 2);
    assert_eq!(page.offset, 1);
    let ages: Vec<i64> = page.items.iter().map(|c| c.age).collect();
    assert_eq!(ages, vec![40, 25]);
    assert_eq!(page.items[1].name, "alice");
    assert_eq!(page.items[1].phone, None);
}

#[tokio::test]
async fn injected_constraint_is_anded() {
    let db = setup().await;
    let catalog = catalog();

    let query = PaginatedQuery {
        rules: Some(RuleGroup::and(vec![rule("age", RuleOperator::Greater, vec![18.into()])])),
        ..Default::default()
    };
    let owned = RuleGroup::and(vec![rule("status", RuleOperator::Equal, vec!["open".into()])]);

    let page: Page<Contact> = fetch(&db, &catalog, &query, Some(&owned)).await.unwrap();
    let ids: Vec<i64> = page.items.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn time_window_status() {
    let db = SqlxExecutor::connect("sqlite::memory:").await.unwrap();
    db.execute(
        "CREATE TABLE callouts (id INTEGER PRIMARY KEY, starts DATETIME, expires DATETIME)",
        &[],
    )
    .await
    .unwrap();
    db.execute(
        "INSERT INTO callouts (id, starts, expires) VALUES
            (1, NULL, NULL),
            (2, '2024-06-01 00:00:00', NULL),
            (3, '2024-01-01 00:00:00', NULL),
            (4, '2024-01-01 00:00:00', '2024-12-31 00:00:00'),
            (5, '2024-01-01 00:00:00', '2024-02-01 00:00:00'),
            (6, NULL, '2024-02-01 00:00:00')",
        &[],
    )
    .await
    .unwrap();

    let catalog = FilterCatalog::new("callouts").field(
        "status",
        FieldDef::custom(FieldType::Enum, TimeWindowStatus::new("starts", "expires").unwrap())
            .options(&TimeWindowStatus::STATUSES)
            .operators(&[RuleOperator::Equal, RuleOperator::NotEqual]),
    );
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let expected = [
        (RuleOperator::Equal, "draft", vec![1, 6]),
        (RuleOperator::Equal, "scheduled", vec![2]),
        (RuleOperator::Equal, "open", vec![3, 4]),
        (RuleOperator::Equal, "ended", vec![5]),
        (RuleOperator::NotEqual, "ended", vec![1, 2, 3, 4, 6]),
    ];
    for (op, status, want) in expected {
        let group = RuleGroup::and(vec![rule("status", op, vec![status.into()])]);
        let clause = Compiler::new(&catalog, Dialect::Sqlite)
            .now(now)
            .compile(&group)
            .unwrap();
        let (sql, params) = clause.render(Dialect::Sqlite).unwrap();
        let rows = db
            .fetch_rows(&format!("SELECT id FROM callouts WHERE {} ORDER BY id", sql), &params)
            .await
            .unwrap();
        let got: Vec<i64> = rows.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(got, want, "{} {}", op, status);
    }
}

#[tokio::test]
async fn datetime_columns_come_back_as_rfc3339() {
    let db = setup().await;
    let query = PaginatedQuery {
        rules: Some(RuleGroup::and(vec![rule(
            "joined",
            RuleOperator::Equal,
            vec!["2024-03".into()],
        )])),
        sort: Some("joined".into()),
        ..Default::default()
    };
    let page: Page<Contact> = fetch(&db, &catalog(), &query, None).await.unwrap();
    let joined: Vec<&str> = page.items.iter().map(|c| c.joined_at.as_str()).collect();
    assert_eq!(
        joined,
        vec![
            "2024-03-01T23:59:59+00:00",
            "2024-03-02T00:00:00+00:00",
            "2024-03-03T00:00:00+00:00",
        ]
    );
}
