//! Rule tree types.
//!
//! These mirror the JSON that API clients send:
//!
//! ```text
//! {"condition": "AND", "rules": [
//!     {"field": "email", "operator": "contains", "value": ["@example.com"]},
//!     {"condition": "OR", "rules": [ ... ]}
//! ]}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Boolean combinator of a rule group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    #[default]
    And,
    Or,
}

impl Condition {
    /// SQL keyword for joining child predicates.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Condition::And => "AND",
            Condition::Or => "OR",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_keyword())
    }
}

/// Logical type of a filterable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Enum,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Enum => "enum",
        };
        f.write_str(s)
    }
}

/// How many values an operator expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    Two,
    AtLeastOne,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::None => n == 0,
            Arity::One => n == 1,
            Arity::Two => n == 2,
            Arity::AtLeastOne => n >= 1,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::None => f.write_str("no values"),
            Arity::One => f.write_str("exactly 1 value"),
            Arity::Two => f.write_str("exactly 2 values"),
            Arity::AtLeastOne => f.write_str("at least 1 value"),
        }
    }
}

/// Rule operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equal,
    NotEqual,
    Contains,
    NotContains,
    BeginsWith,
    NotBeginsWith,
    EndsWith,
    NotEndsWith,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Between,
    NotBetween,
    IsEmpty,
    IsNotEmpty,
    In,
    NotIn,
}

const STRING_OPERATORS: &[RuleOperator] = &[
    RuleOperator::Equal,
    RuleOperator::NotEqual,
    RuleOperator::Contains,
    RuleOperator::NotContains,
    RuleOperator::BeginsWith,
    RuleOperator::NotBeginsWith,
    RuleOperator::EndsWith,
    RuleOperator::NotEndsWith,
    RuleOperator::In,
    RuleOperator::NotIn,
    RuleOperator::IsEmpty,
    RuleOperator::IsNotEmpty,
];

const NUMBER_OPERATORS: &[RuleOperator] = &[
    RuleOperator::Equal,
    RuleOperator::NotEqual,
    RuleOperator::Less,
    RuleOperator::LessOrEqual,
    RuleOperator::Greater,
    RuleOperator::GreaterOrEqual,
    RuleOperator::Between,
    RuleOperator::NotBetween,
    RuleOperator::In,
    RuleOperator::NotIn,
];

const DATE_OPERATORS: &[RuleOperator] = &[
    RuleOperator::Equal,
    RuleOperator::NotEqual,
    RuleOperator::Less,
    RuleOperator::LessOrEqual,
    RuleOperator::Greater,
    RuleOperator::GreaterOrEqual,
    RuleOperator::Between,
    RuleOperator::NotBetween,
];

const BOOLEAN_OPERATORS: &[RuleOperator] = &[RuleOperator::Equal];

const ENUM_OPERATORS: &[RuleOperator] = &[
    RuleOperator::Equal,
    RuleOperator::NotEqual,
    RuleOperator::In,
    RuleOperator::NotIn,
];

impl RuleOperator {
    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::Equal => "equal",
            RuleOperator::NotEqual => "not_equal",
            RuleOperator::Contains => "contains",
            RuleOperator::NotContains => "not_contains",
            RuleOperator::BeginsWith => "begins_with",
            RuleOperator::NotBeginsWith => "not_begins_with",
            RuleOperator::EndsWith => "ends_with",
            RuleOperator::NotEndsWith => "not_ends_with",
            RuleOperator::Greater => "greater",
            RuleOperator::GreaterOrEqual => "greater_or_equal",
            RuleOperator::Less => "less",
            RuleOperator::LessOrEqual => "less_or_equal",
            RuleOperator::Between => "between",
            RuleOperator::NotBetween => "not_between",
            RuleOperator::IsEmpty => "is_empty",
            RuleOperator::IsNotEmpty => "is_not_empty",
            RuleOperator::In => "in",
            RuleOperator::NotIn => "not_in",
        }
    }

    /// Number of values the operator expects.
    pub fn arity(&self) -> Arity {
        match self {
            RuleOperator::IsEmpty | RuleOperator::IsNotEmpty => Arity::None,
            RuleOperator::Between | RuleOperator::NotBetween => Arity::Two,
            RuleOperator::In | RuleOperator::NotIn => Arity::AtLeastOne,
            _ => Arity::One,
        }
    }

    /// Negative operators also match NULL on nullable columns.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            RuleOperator::NotEqual
                | RuleOperator::NotContains
                | RuleOperator::NotBeginsWith
                | RuleOperator::NotEndsWith
                | RuleOperator::NotBetween
                | RuleOperator::NotIn
        )
    }

    /// Operators a field of the given type supports, before nullability.
    pub fn for_type(field_type: FieldType) -> &'static [RuleOperator] {
        match field_type {
            FieldType::String => STRING_OPERATORS,
            FieldType::Number => NUMBER_OPERATORS,
            FieldType::Date => DATE_OPERATORS,
            FieldType::Boolean => BOOLEAN_OPERATORS,
            FieldType::Enum => ENUM_OPERATORS,
        }
    }

    /// Whether the operator can be used on a field of this type at all.
    pub fn supports(&self, field_type: FieldType, nullable: bool) -> bool {
        let null_check = matches!(self, RuleOperator::IsEmpty | RuleOperator::IsNotEmpty);
        (null_check && nullable) || Self::for_type(field_type).contains(self)
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown operator '{}'", s))
    }
}

/// A single primitive value in a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl RuleValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RuleValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, RuleValue::Int(_) | RuleValue::Float(_))
    }

    /// Name of the primitive type, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RuleValue::Bool(_) => "boolean",
            RuleValue::Int(_) | RuleValue::Float(_) => "number",
            RuleValue::String(_) => "string",
        }
    }
}

impl fmt::Display for RuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleValue::Bool(b) => write!(f, "{}", b),
            RuleValue::Int(n) => write!(f, "{}", n),
            RuleValue::Float(n) => write!(f, "{}", n),
            RuleValue::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for RuleValue {
    fn from(b: bool) -> Self {
        RuleValue::Bool(b)
    }
}

impl From<i32> for RuleValue {
    fn from(n: i32) -> Self {
        RuleValue::Int(n as i64)
    }
}

impl From<i64> for RuleValue {
    fn from(n: i64) -> Self {
        RuleValue::Int(n)
    }
}

impl From<f64> for RuleValue {
    fn from(n: f64) -> Self {
        RuleValue::Float(n)
    }
}

impl From<&str> for RuleValue {
    fn from(s: &str) -> Self {
        RuleValue::String(s.to_string())
    }
}

impl From<String> for RuleValue {
    fn from(s: String) -> Self {
        RuleValue::String(s)
    }
}

/// A leaf filter: `field operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operator: RuleOperator,
    #[serde(default)]
    pub value: Vec<RuleValue>,
}

impl Rule {
    pub fn new(field: &str, operator: RuleOperator, value: Vec<RuleValue>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.operator)?;
        for (i, v) in self.value.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}", v)?;
        }
        Ok(())
    }
}

/// A child of a rule group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleItem {
    Group(RuleGroup),
    Rule(Rule),
}

impl From<Rule> for RuleItem {
    fn from(rule: Rule) -> Self {
        RuleItem::Rule(rule)
    }
}

impl From<RuleGroup> for RuleItem {
    fn from(group: RuleGroup) -> Self {
        RuleItem::Group(group)
    }
}

/// An AND/OR combination of rules and nested groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuleGroup {
    pub condition: Condition,
    pub rules: Vec<RuleItem>,
}

impl RuleGroup {
    pub fn new(condition: Condition, rules: Vec<RuleItem>) -> Self {
        Self { condition, rules }
    }

    /// AND group over the given children.
    pub fn and(rules: Vec<RuleItem>) -> Self {
        Self::new(Condition::And, rules)
    }

    /// OR group over the given children.
    pub fn or(rules: Vec<RuleItem>) -> Self {
        Self::new(Condition::Or, rules)
    }

    /// Decode a group from untrusted JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Total number of leaf rules in the tree.
    pub fn rule_count(&self) -> usize {
        self.rules
            .iter()
            .map(|item| match item {
                RuleItem::Rule(_) => 1,
                RuleItem::Group(g) => g.rule_count(),
            })
            .sum()
    }
}
