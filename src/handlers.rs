//! Built-in filter handlers.

use crate::ast::RuleOperator;
use crate::catalog::FilterHandler;
use crate::compiler::HandlerContext;
use crate::dialect::is_valid_identifier;
use crate::error::{QueryError, QueryResult, RuleError};

/// Status derived from a start and an end timestamp.
///
/// | status      | meaning                                   |
/// |-------------|-------------------------------------------|
/// | `draft`     | no start set                              |
/// | `scheduled` | starts in the future                      |
/// | `open`      | started, and no end or end in the future  |
/// | `ended`     | started, and end in the past              |
///
/// Every branch is NULL-safe, so `not_equal` is a plain `NOT (...)`.
#[derive(Debug, Clone)]
pub struct TimeWindowStatus {
    start: String,
    end: String,
}

impl TimeWindowStatus {
    pub const STATUSES: [&'static str; 4] = ["draft", "scheduled", "open", "ended"];

    pub fn new(start: &str, end: &str) -> QueryResult<Self> {
        for column in [start, end] {
            if !is_valid_identifier(column) {
                return Err(QueryError::config(format!(
                    "time window: invalid column name '{}'",
                    column
                )));
            }
        }
        Ok(Self {
            start: start.to_string(),
            end: end.to_string(),
        })
    }

    fn status_sql(&self, ctx: &mut HandlerContext<'_>, status: &str) -> Result<String, RuleError> {
        let start = ctx.column(&self.start);
        let end = ctx.column(&self.end);

        let sql = match status {
            "draft" => format!("{} IS NULL", start),
            "scheduled" => {
                let now = ctx.bind(ctx.now);
                format!("({} IS NOT NULL AND {} > {})", start, start, now)
            }
            "open" => {
                let now = ctx.bind(ctx.now);
                format!(
                    "({} IS NOT NULL AND {} <= {} AND ({} IS NULL OR {} > {}))",
                    start, start, now, end, end, now
                )
            }
            "ended" => {
                let now = ctx.bind(ctx.now);
                format!(
                    "({} IS NOT NULL AND {} <= {} AND {} IS NOT NULL AND {} <= {})",
                    start, start, now, end, end, now
                )
            }
            other => {
                return Err(ctx.malformed(format!(
                    "'{}' is not one of {}",
                    other,
                    Self::STATUSES.join(", ")
                )));
            }
        };
        Ok(sql)
    }
}

impl FilterHandler for TimeWindowStatus {
    fn apply(&self, ctx: &mut HandlerContext<'_>) -> Result<Vec<String>, RuleError> {
        let status = ctx
            .values
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| ctx.malformed("expected a status string"))?
            .to_string();

        let sql = self.status_sql(ctx, &status)?;
        match ctx.operator {
            RuleOperator::Equal => Ok(vec![sql]),
            RuleOperator::NotEqual => Ok(vec![format!("NOT ({})", sql)]),
            _ => Err(ctx.invalid_operator()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldType, Rule, RuleGroup};
    use crate::catalog::{FieldDef, FilterCatalog};
    use crate::compiler::Compiler;
    use crate::dialect::Dialect;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn catalog() -> FilterCatalog {
        FilterCatalog::new("callouts").field(
            "status",
            FieldDef::custom(
                FieldType::Enum,
                TimeWindowStatus::new("starts", "expires").unwrap(),
            )
            .options(&TimeWindowStatus::STATUSES)
            .operators(&[RuleOperator::Equal, RuleOperator::NotEqual]),
        )
    }

    fn compile(op: RuleOperator, status: &str) -> (String, usize) {
        let catalog = catalog();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let group = RuleGroup::and(vec![Rule::new("status", op, vec![status.into()]).into()]);
        let clause = Compiler::new(&catalog, Dialect::Postgres)
            .now(now)
            .compile(&group)
            .unwrap();
        (clause.sql, clause.params.len())
    }

    #[test]
    fn test_open() {
        let (sql, params) = compile(RuleOperator::Equal, "open");
        assert_eq!(
            sql,
            "(((\"starts\" IS NOT NULL AND \"starts\" <= :r0_0 AND (\"expires\" IS NULL OR \"expires\" > :r0_0))))"
        );
        assert_eq!(params, 1);
    }

    #[test]
    fn test_draft_binds_nothing() {
        let (sql, params) = compile(RuleOperator::Equal, "draft");
        assert_eq!(sql, "((\"starts\" IS NULL))");
        assert_eq!(params, 0);
    }

    #[test]
    fn test_not_equal_negates() {
        let (sql, _) = compile(RuleOperator::NotEqual, "ended");
        assert_eq!(
            sql,
            "((NOT ((\"starts\" IS NOT NULL AND \"starts\" <= :r0_0 AND \"expires\" IS NOT NULL AND \"expires\" <= :r0_0))))"
        );
    }

    #[test]
    fn test_rejects_bad_columns() {
        assert!(TimeWindowStatus::new("starts", "1expires").is_err());
    }
}
