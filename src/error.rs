//! Error types for rulequery.
//!
//! Errors split into two families: [`RuleError`] is always the caller's fault
//! (a bad filter tree), everything else in [`QueryError`] except the request
//! shape variants points at a catalog or database problem on our side.

use thiserror::Error;

/// A rule tree failed validation against the filter catalog.
///
/// Every variant carries the rule's position in the tree (`rules[1].rules[0]`)
/// and the logical field name so the caller can find the offending leaf.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    /// The field is not in the catalog for this entity.
    #[error("Invalid rule at {path}: unknown field '{field}'")]
    UnknownField { path: String, field: String },

    /// The operator is not permitted for the field.
    #[error("Invalid rule at {path}: operator '{operator}' is not allowed for field '{field}'")]
    InvalidOperator {
        path: String,
        field: String,
        operator: String,
    },

    /// Wrong number of values, or a value of the wrong primitive type.
    #[error("Invalid rule at {path}: bad value for field '{field}': {reason}")]
    MalformedValue {
        path: String,
        field: String,
        reason: String,
    },

    /// A date-typed value could not be parsed as a relative or absolute date.
    #[error("Invalid rule at {path}: cannot parse date '{value}' for field '{field}'")]
    UnparseableDate {
        path: String,
        field: String,
        value: String,
    },
}

impl RuleError {
    /// Create a malformed value error.
    pub fn malformed(path: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::MalformedValue {
            path: path.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Position of the offending rule in the tree.
    pub fn path(&self) -> &str {
        match self {
            Self::UnknownField { path, .. }
            | Self::InvalidOperator { path, .. }
            | Self::MalformedValue { path, .. }
            | Self::UnparseableDate { path, .. } => path,
        }
    }

    /// Logical field name of the offending rule.
    pub fn field(&self) -> &str {
        match self {
            Self::UnknownField { field, .. }
            | Self::InvalidOperator { field, .. }
            | Self::MalformedValue { field, .. }
            | Self::UnparseableDate { field, .. } => field,
        }
    }
}

/// The main error type for rulequery operations.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The rule tree is invalid.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// The requested sort key is not sortable for this entity.
    #[error("Invalid sort: '{0}' is not a sortable field")]
    InvalidSort(String),

    /// The request body could not be decoded.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The catalog or an injected constraint is misconfigured.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Execution error: {0}")]
    Execution(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryError {
    /// True when the error was caused by caller input rather than by us.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Rule(_) | Self::InvalidSort(_) | Self::InvalidJson(_)
        )
    }

    /// HTTP status equivalent: 400 for caller input, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for rulequery operations.
pub type QueryResult<T> = Result<T, QueryError>;
