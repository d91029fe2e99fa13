//! Rule compiler.
//!
//! Walks a [`RuleGroup`] top-down, checks each leaf against a
//! [`FilterCatalog`] and emits a parenthesized WHERE fragment with named
//! parameters. Nothing is emitted unless the whole tree is valid.
//!
//! ```text
//! {AND, [email contains "@x.org", {OR, [age < 18, age > 65]}]}
//!
//! ("c"."email" ILIKE :c_r0_0 ESCAPE '\' AND ("c"."age" < :c_r1_0_0 OR "c"."age" > :c_r1_1_0))
//! ```

use crate::ast::{Condition, FieldType, Rule, RuleGroup, RuleItem, RuleOperator, RuleValue};
use crate::catalog::{FieldDef, FilterCatalog, FilterField};
use crate::date::parse_date_at;
use crate::dialect::{Dialect, is_valid_identifier};
use crate::engine::SqlValue;
use crate::error::{QueryError, QueryResult, RuleError};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Predicate matching every row.
pub const ALWAYS_TRUE: &str = "1 = 1";
/// Predicate matching no row.
pub const ALWAYS_FALSE: &str = "1 = 0";

/// A compiled WHERE fragment and its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: BTreeMap<String, SqlValue>,
}

impl WhereClause {
    /// Rewrite named parameters into the dialect's placeholders.
    pub fn render(&self, dialect: Dialect) -> QueryResult<(String, Vec<SqlValue>)> {
        dialect.render(&self.sql, &self.params)
    }
}

/// Named parameter registry for one compilation.
#[derive(Debug)]
struct Params {
    base: String,
    values: BTreeMap<String, SqlValue>,
}

impl Params {
    /// Register a value under a name derived from the rule's tree path.
    fn bind(&mut self, path: &[usize], value: SqlValue) -> String {
        let stem = format!("{}r{}", self.base, join_path(path, "_"));
        let mut k = 0;
        let mut name = format!("{}_{}", stem, k);
        while self.values.contains_key(&name) {
            k += 1;
            name = format!("{}_{}", stem, k);
        }
        self.values.insert(name.clone(), value);
        format!(":{}", name)
    }
}

fn join_path(path: &[usize], sep: &str) -> String {
    path.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// `rules[1].rules[0]` for error messages.
fn display_path(path: &[usize]) -> String {
    path.iter()
        .map(|i| format!("rules[{}]", i))
        .collect::<Vec<_>>()
        .join(".")
}

/// What a custom [`FilterHandler`](crate::catalog::FilterHandler) sees.
pub struct HandlerContext<'a> {
    /// Logical field name.
    pub field: &'a str,
    pub operator: RuleOperator,
    /// Values, already checked for arity and primitive type.
    pub values: &'a [RuleValue],
    /// Table alias columns are qualified with.
    pub field_prefix: &'a str,
    /// Reference time for anything relative.
    pub now: DateTime<Utc>,
    dialect: Dialect,
    path: &'a [usize],
    params: &'a mut Params,
}

impl HandlerContext<'_> {
    /// Quote a column and qualify it with the field prefix.
    pub fn column(&self, name: &str) -> String {
        self.dialect.column(self.field_prefix, name)
    }

    /// Register a parameter, returning its `:name` for the SQL text.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.params.bind(self.path, value.into())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Error for a value the handler cannot interpret.
    pub fn malformed(&self, reason: impl Into<String>) -> RuleError {
        RuleError::malformed(&display_path(self.path), self.field, reason)
    }

    /// Error for an operator the handler does not implement.
    pub fn invalid_operator(&self) -> RuleError {
        RuleError::InvalidOperator {
            path: display_path(self.path),
            field: self.field.to_string(),
            operator: self.operator.to_string(),
        }
    }
}

/// A value after type checking.
#[derive(Debug, Clone)]
enum Operand {
    Scalar(SqlValue),
    /// A date literal widened to `[start, end)`.
    Date {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Operand {
    fn scalar(&self) -> SqlValue {
        match self {
            Operand::Scalar(v) => v.clone(),
            Operand::Date { start, .. } => SqlValue::Timestamp(*start),
        }
    }

    fn text(&self) -> String {
        match self {
            Operand::Scalar(SqlValue::Text(s)) => s.clone(),
            other => other.scalar().to_string(),
        }
    }
}

/// Compiles rule groups against one catalog.
///
/// # Example
///
/// ```
/// use rulequery::prelude::*;
///
/// let catalog = FilterCatalog::new("contacts")
///     .field("status", FieldDef::enumeration("status", &["open", "closed"]));
/// let group = RuleGroup::and(vec![
///     Rule::new("status", RuleOperator::Equal, vec!["open".into()]).into(),
/// ]);
///
/// let clause = Compiler::new(&catalog, Dialect::Postgres).compile(&group).unwrap();
/// assert_eq!(clause.sql, "(\"status\" = :r0_0)");
/// ```
pub struct Compiler<'a> {
    catalog: &'a FilterCatalog,
    dialect: Dialect,
    prefix: String,
    now: DateTime<Utc>,
}

impl<'a> Compiler<'a> {
    /// Columns are qualified with the catalog's alias, if it has one.
    pub fn new(catalog: &'a FilterCatalog, dialect: Dialect) -> Self {
        Self {
            catalog,
            dialect,
            prefix: catalog.table_alias().unwrap_or_default().to_string(),
            now: Utc::now(),
        }
    }

    /// Override the field prefix (table alias).
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Reference time for `$now` literals.
    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Compile a whole tree.
    pub fn compile(&self, group: &RuleGroup) -> QueryResult<WhereClause> {
        if !self.prefix.is_empty() && !is_valid_identifier(&self.prefix) {
            return Err(QueryError::config(format!(
                "invalid field prefix '{}'",
                self.prefix
            )));
        }

        let mut params = Params {
            base: if self.prefix.is_empty() {
                String::new()
            } else {
                format!("{}_", self.prefix)
            },
            values: BTreeMap::new(),
        };

        let sql = self
            .compile_group(group, &[], &mut params)
            .inspect_err(|e| warn!(error = %e, "rejected rule group"))?;

        debug!(
            table = self.catalog.table(),
            rules = group.rule_count(),
            params = params.values.len(),
            %sql,
            "compiled rule group"
        );

        Ok(WhereClause {
            sql,
            params: params.values,
        })
    }

    fn compile_group(
        &self,
        group: &RuleGroup,
        path: &[usize],
        params: &mut Params,
    ) -> Result<String, RuleError> {
        // Identity element of the combinator
        if group.rules.is_empty() {
            return Ok(match group.condition {
                Condition::And => ALWAYS_TRUE.to_string(),
                Condition::Or => ALWAYS_FALSE.to_string(),
            });
        }

        let mut parts = Vec::with_capacity(group.rules.len());
        for (i, item) in group.rules.iter().enumerate() {
            let mut child_path = path.to_vec();
            child_path.push(i);
            let sql = match item {
                RuleItem::Group(child) => self.compile_group(child, &child_path, params)?,
                RuleItem::Rule(rule) => self.compile_rule(rule, &child_path, params)?,
            };
            parts.push(sql);
        }

        let joiner = format!(" {} ", group.condition.sql_keyword());
        Ok(format!("({})", parts.join(&joiner)))
    }

    fn compile_rule(
        &self,
        rule: &Rule,
        path: &[usize],
        params: &mut Params,
    ) -> Result<String, RuleError> {
        let at = display_path(path);

        let def = self
            .catalog
            .get(&rule.field)
            .ok_or_else(|| RuleError::UnknownField {
                path: at.clone(),
                field: rule.field.clone(),
            })?;

        if !def.allows(rule.operator) {
            return Err(RuleError::InvalidOperator {
                path: at,
                field: rule.field.clone(),
                operator: rule.operator.to_string(),
            });
        }

        let arity = rule.operator.arity();
        if !arity.accepts(rule.value.len()) {
            return Err(RuleError::malformed(
                &at,
                &rule.field,
                format!(
                    "operator '{}' expects {}, got {}",
                    rule.operator,
                    arity,
                    rule.value.len()
                ),
            ));
        }

        let operands = self.check_values(def, rule, &at)?;

        match &def.source {
            FilterField::Column(column) => {
                let col = self.dialect.column(&self.prefix, column);
                let sql = self.column_predicate(def, &col, rule, &operands, path, params);
                if rule.operator.is_negative() && def.nullable {
                    Ok(format!("({} OR {} IS NULL)", sql, col))
                } else {
                    Ok(sql)
                }
            }
            FilterField::Custom(handler) => {
                let mut ctx = HandlerContext {
                    field: &rule.field,
                    operator: rule.operator,
                    values: &rule.value,
                    field_prefix: &self.prefix,
                    now: self.now,
                    dialect: self.dialect,
                    path,
                    params,
                };
                let parts = handler.apply(&mut ctx)?;
                if parts.is_empty() {
                    Ok(ALWAYS_TRUE.to_string())
                } else {
                    Ok(format!("({})", parts.join(" AND ")))
                }
            }
        }
    }

    /// Check primitive types and convert values into bindable operands.
    fn check_values(
        &self,
        def: &FieldDef,
        rule: &Rule,
        at: &str,
    ) -> Result<Vec<Operand>, RuleError> {
        let wrong_type = |value: &RuleValue| {
            RuleError::malformed(
                at,
                &rule.field,
                format!(
                    "expected a {} value, got {} {}",
                    def.field_type,
                    value.kind(),
                    value
                ),
            )
        };

        rule.value
            .iter()
            .map(|value| match (def.field_type, value) {
                (FieldType::String, RuleValue::String(s)) => {
                    Ok(Operand::Scalar(SqlValue::Text(s.clone())))
                }
                (FieldType::Enum, RuleValue::String(s)) => {
                    if def.options.iter().any(|o| o == s) {
                        Ok(Operand::Scalar(SqlValue::Text(s.clone())))
                    } else {
                        Err(RuleError::malformed(
                            at,
                            &rule.field,
                            format!("'{}' is not one of {}", s, def.options.join(", ")),
                        ))
                    }
                }
                (FieldType::Number, RuleValue::Int(n)) => Ok(Operand::Scalar(SqlValue::Int(*n))),
                (FieldType::Number, RuleValue::Float(n)) => {
                    Ok(Operand::Scalar(SqlValue::Float(*n)))
                }
                (FieldType::Boolean, RuleValue::Bool(b)) => Ok(Operand::Scalar(SqlValue::Bool(*b))),
                (FieldType::Date, RuleValue::String(s)) => {
                    let unparseable = || RuleError::UnparseableDate {
                        path: at.to_string(),
                        field: rule.field.clone(),
                        value: s.clone(),
                    };
                    let parsed = parse_date_at(s, self.now).map_err(|_| unparseable())?;
                    let end = parsed.end().ok_or_else(unparseable)?;
                    Ok(Operand::Date {
                        start: parsed.start(),
                        end,
                    })
                }
                (_, value) => Err(wrong_type(value)),
            })
            .collect()
    }

    fn column_predicate(
        &self,
        def: &FieldDef,
        col: &str,
        rule: &Rule,
        operands: &[Operand],
        path: &[usize],
        params: &mut Params,
    ) -> String {
        use RuleOperator::*;

        if def.field_type == FieldType::Date {
            if let Some(sql) = self.date_predicate(col, rule.operator, operands, path, params) {
                return sql;
            }
        }

        let mut bind = |operand: &Operand| params.bind(path, operand.scalar());
        let ilike = self.dialect.ilike();

        match rule.operator {
            Equal => format!("{} = {}", col, bind(&operands[0])),
            NotEqual => format!("{} <> {}", col, bind(&operands[0])),
            Greater => format!("{} > {}", col, bind(&operands[0])),
            GreaterOrEqual => format!("{} >= {}", col, bind(&operands[0])),
            Less => format!("{} < {}", col, bind(&operands[0])),
            LessOrEqual => format!("{} <= {}", col, bind(&operands[0])),
            Between => format!(
                "{} BETWEEN {} AND {}",
                col,
                bind(&operands[0]),
                bind(&operands[1])
            ),
            NotBetween => format!(
                "{} NOT BETWEEN {} AND {}",
                col,
                bind(&operands[0]),
                bind(&operands[1])
            ),
            Contains | NotContains | BeginsWith | NotBeginsWith | EndsWith | NotEndsWith => {
                let escaped = escape_like(&operands[0].text());
                let pattern = match rule.operator {
                    Contains | NotContains => format!("%{}%", escaped),
                    BeginsWith | NotBeginsWith => format!("{}%", escaped),
                    _ => format!("%{}", escaped),
                };
                let name = bind(&Operand::Scalar(SqlValue::Text(pattern)));
                let not = if rule.operator.is_negative() { "NOT " } else { "" };
                format!("{} {}{} {} ESCAPE '\\'", col, not, ilike, name)
            }
            In | NotIn => {
                let names: Vec<String> = operands.iter().map(&mut bind).collect();
                let not = if rule.operator == NotIn { "NOT " } else { "" };
                format!("{} {}IN ({})", col, not, names.join(", "))
            }
            IsEmpty => match (def.field_type, def.nullable) {
                (FieldType::String, true) => format!("({} IS NULL OR {} = '')", col, col),
                (FieldType::String, false) => format!("{} = ''", col),
                _ => format!("{} IS NULL", col),
            },
            IsNotEmpty => match (def.field_type, def.nullable) {
                (FieldType::String, true) => format!("({} IS NOT NULL AND {} <> '')", col, col),
                (FieldType::String, false) => format!("{} <> ''", col),
                _ => format!("{} IS NOT NULL", col),
            },
        }
    }

    /// Range semantics for date literals: each literal covers `[start, end)`.
    fn date_predicate(
        &self,
        col: &str,
        operator: RuleOperator,
        operands: &[Operand],
        path: &[usize],
        params: &mut Params,
    ) -> Option<String> {
        use RuleOperator::*;

        let bounds = |operand: &Operand| match operand {
            Operand::Date { start, end } => Some((*start, *end)),
            Operand::Scalar(_) => None,
        };
        let (start, end) = match operator {
            Between | NotBetween => {
                let (lo, _) = bounds(operands.first()?)?;
                let (_, hi) = bounds(operands.get(1)?)?;
                (lo, hi)
            }
            IsEmpty | IsNotEmpty => return None,
            _ => bounds(operands.first()?)?,
        };

        let sql = match operator {
            Equal | Between => {
                let s = params.bind(path, start.into());
                let e = params.bind(path, end.into());
                format!("({} >= {} AND {} < {})", col, s, col, e)
            }
            NotEqual | NotBetween => {
                let s = params.bind(path, start.into());
                let e = params.bind(path, end.into());
                format!("({} < {} OR {} >= {})", col, s, col, e)
            }
            Less => format!("{} < {}", col, params.bind(path, start.into())),
            LessOrEqual => format!("{} < {}", col, params.bind(path, end.into())),
            Greater => format!("{} >= {}", col, params.bind(path, end.into())),
            GreaterOrEqual => format!("{} >= {}", col, params.bind(path, start.into())),
            _ => return None,
        };
        Some(sql)
    }
}

/// Escape LIKE wildcards so user text matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Compile `group` against `catalog` with the given field prefix.
pub fn compile(
    group: &RuleGroup,
    catalog: &FilterCatalog,
    dialect: Dialect,
    field_prefix: &str,
) -> QueryResult<WhereClause> {
    Compiler::new(catalog, dialect)
        .prefix(field_prefix)
        .compile(group)
}
