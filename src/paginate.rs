//! Paginated query façade.
//!
//! One call takes a caller's [`PaginatedQuery`], ANDs in any injected
//! constraint, compiles the result against the entity's catalog and runs
//! a page query plus a count query through an [`Executor`].

use crate::ast::RuleGroup;
use crate::catalog::FilterCatalog;
use crate::compiler::Compiler;
use crate::engine::{Executor, JsonRow};
use crate::error::{QueryError, QueryResult};
use crate::merge::merge;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Largest page a caller may ask for, and the default.
pub const MAX_LIMIT: u64 = 100;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "ASC"),
            SortOrder::Desc => write!(f, "DESC"),
        }
    }
}

/// A caller's request for one page of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginatedQuery {
    pub rules: Option<RuleGroup>,
    /// Logical field name, checked against the catalog's sortable fields.
    pub sort: Option<String>,
    pub order: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<u64>,
}

impl PaginatedQuery {
    pub fn from_json(json: &str) -> QueryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Page size after applying the default and clamping to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> u64 {
        match self.limit {
            None => MAX_LIMIT,
            Some(n) => n.clamp(1, MAX_LIMIT as i64) as u64,
        }
    }

    /// Rows to skip, capped at the largest offset SQL engines accept.
    pub fn effective_offset(&self) -> u64 {
        self.offset.unwrap_or(0).min(i64::MAX as u64)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the filter, ignoring limit and offset.
    pub total: u64,
    pub offset: u64,
    pub count: usize,
}

/// SQL for a page and its count, still carrying named parameters.
#[derive(Debug, Clone)]
struct PageSql {
    select: String,
    count: String,
}

fn build_sql<E: Executor>(
    executor: &E,
    catalog: &FilterCatalog,
    query: &PaginatedQuery,
    where_sql: &str,
) -> QueryResult<PageSql> {
    let dialect = executor.dialect();
    let prefix = catalog.table_alias().unwrap_or_default();

    let mut from = dialect.quote_identifier(catalog.table());
    if !prefix.is_empty() {
        from.push(' ');
        from.push_str(&dialect.quote_identifier(prefix));
    }

    let sort_field = match query.sort.as_deref() {
        Some(field) => Some(field),
        None => catalog.default_sort_field(),
    };
    let order_by = match sort_field {
        Some(field) => {
            let column = catalog
                .sort_column(field)
                .ok_or_else(|| QueryError::InvalidSort(field.to_string()))?;
            format!(" ORDER BY {} {}", dialect.column(prefix, column), query.order)
        }
        None => String::new(),
    };

    Ok(PageSql {
        select: format!(
            "SELECT * FROM {} WHERE {}{} LIMIT {} OFFSET {}",
            from,
            where_sql,
            order_by,
            query.effective_limit(),
            query.effective_offset()
        ),
        count: format!("SELECT COUNT(*) FROM {} WHERE {}", from, where_sql),
    })
}

/// Fetch one page of raw JSON rows.
///
/// `injected` is ANDed with the caller's rules. Pass `None` when there is
/// nothing to restrict (for example an admin caller); an injected group
/// with no rules is refused, since it would match every row.
pub async fn fetch_rows<E: Executor>(
    executor: &E,
    catalog: &FilterCatalog,
    query: &PaginatedQuery,
    injected: Option<&RuleGroup>,
) -> QueryResult<Page<JsonRow>> {
    if injected.is_some_and(RuleGroup::is_empty) {
        return Err(QueryError::config(format!(
            "empty injected constraint for '{}'",
            catalog.table()
        )));
    }

    let merged = merge([query.rules.as_ref(), injected]);
    let clause = Compiler::new(catalog, executor.dialect()).compile(&merged)?;
    let sql = build_sql(executor, catalog, query, &clause.sql).inspect_err(|e| {
        warn!(error = %e, "rejected sort");
    })?;

    let dialect = executor.dialect();
    let (select, select_params) = dialect.render(&sql.select, &clause.params)?;
    let (count, count_params) = dialect.render(&sql.count, &clause.params)?;

    let items = executor.fetch_rows(&select, &select_params).await?;
    let total = executor.fetch_count(&count, &count_params).await?;

    debug!(
        table = catalog.table(),
        total,
        count = items.len(),
        "fetched page"
    );

    Ok(Page {
        count: items.len(),
        items,
        total,
        offset: query.effective_offset(),
    })
}

/// Fetch one page and deserialize each row into `T`.
pub async fn fetch<T, E>(
    executor: &E,
    catalog: &FilterCatalog,
    query: &PaginatedQuery,
    injected: Option<&RuleGroup>,
) -> QueryResult<Page<T>>
where
    T: DeserializeOwned,
    E: Executor,
{
    let page = fetch_rows(executor, catalog, query, injected).await?;

    let items = page
        .items
        .into_iter()
        .map(|row| {
            serde_json::from_value(serde_json::Value::Object(row))
                .map_err(|e| QueryError::Execution(format!("row conversion: {}", e)))
        })
        .collect::<QueryResult<Vec<T>>>()?;

    Ok(Page {
        count: items.len(),
        items,
        total: page.total,
        offset: page.offset,
    })
}
