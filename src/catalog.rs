//! Filter catalogs.
//!
//! A catalog describes one entity: which logical fields may be filtered and
//! sorted on, their types, the operators each allows, and how each maps onto
//! the table. Catalogs are built once at startup, either in code or from a
//! TOML file, and are read-only afterwards.
//!
//! ```toml
//! [entities.contacts]
//! table = "contacts"
//! alias = "c"
//! sortable = ["email", "joined"]
//! default_sort = "joined"
//!
//! [entities.contacts.fields.email]
//! type = "string"
//!
//! [entities.contacts.fields.joined]
//! type = "date"
//! column = "joined_at"
//!
//! [entities.callouts.fields.status]
//! type = "enum"
//! options = ["draft", "scheduled", "open", "ended"]
//! handler = { time_window = { start = "starts", end = "expires" } }
//! ```

use crate::ast::{FieldType, RuleOperator};
use crate::compiler::HandlerContext;
use crate::dialect::is_valid_identifier;
use crate::error::{QueryError, QueryResult, RuleError};
use crate::handlers::TimeWindowStatus;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Emits the predicate for a field that does not map 1:1 onto a column.
///
/// The compiler has already checked the operator, the number of values and
/// their types. The returned fragments are ANDed together; an empty list
/// matches every row.
pub trait FilterHandler: Send + Sync {
    fn apply(&self, ctx: &mut HandlerContext<'_>) -> Result<Vec<String>, RuleError>;
}

impl<F> FilterHandler for F
where
    F: Fn(&mut HandlerContext<'_>) -> Result<Vec<String>, RuleError> + Send + Sync,
{
    fn apply(&self, ctx: &mut HandlerContext<'_>) -> Result<Vec<String>, RuleError> {
        self(ctx)
    }
}

/// Pin a closure to the [`FilterHandler`] signature.
///
/// Closure argument lifetimes are only inferred as higher-ranked when the
/// expected signature is visible at the definition site.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&mut HandlerContext<'_>) -> Result<Vec<String>, RuleError> + Send + Sync,
{
    f
}

/// Where a logical field's predicate comes from.
#[derive(Clone)]
pub enum FilterField {
    /// Compared directly against a column.
    Column(String),
    /// Delegated to a handler.
    Custom(Arc<dyn FilterHandler>),
}

impl fmt::Debug for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterField::Column(column) => f.debug_tuple("Column").field(column).finish(),
            FilterField::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Metadata for one filterable field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub field_type: FieldType,
    pub nullable: bool,
    /// Explicit allow-list; `None` means every operator the type supports.
    pub operators: Option<Vec<RuleOperator>>,
    /// Permitted values of an enum field.
    pub options: Vec<String>,
    pub source: FilterField,
}

impl FieldDef {
    /// A field backed by a column.
    pub fn column(field_type: FieldType, column: &str) -> Self {
        Self {
            field_type,
            nullable: false,
            operators: None,
            options: Vec::new(),
            source: FilterField::Column(column.to_string()),
        }
    }

    /// A field whose predicate is produced by a handler.
    pub fn custom(field_type: FieldType, handler: impl FilterHandler + 'static) -> Self {
        Self {
            field_type,
            nullable: false,
            operators: None,
            options: Vec::new(),
            source: FilterField::Custom(Arc::new(handler)),
        }
    }

    pub fn string(column: &str) -> Self {
        Self::column(FieldType::String, column)
    }

    pub fn number(column: &str) -> Self {
        Self::column(FieldType::Number, column)
    }

    pub fn boolean(column: &str) -> Self {
        Self::column(FieldType::Boolean, column)
    }

    pub fn date(column: &str) -> Self {
        Self::column(FieldType::Date, column)
    }

    pub fn enumeration(column: &str, options: &[&str]) -> Self {
        Self::column(FieldType::Enum, column).options(options)
    }

    /// Mark the field nullable, enabling `is_empty`/`is_not_empty`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Narrow the operators this field accepts.
    pub fn operators(mut self, operators: &[RuleOperator]) -> Self {
        self.operators = Some(operators.to_vec());
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether a rule on this field may use `operator`.
    pub fn allows(&self, operator: RuleOperator) -> bool {
        operator.supports(self.field_type, self.nullable)
            && self
                .operators
                .as_ref()
                .is_none_or(|list| list.contains(&operator))
    }

    /// Every operator this field accepts.
    pub fn allowed_operators(&self) -> Vec<RuleOperator> {
        let mut ops: Vec<RuleOperator> = RuleOperator::for_type(self.field_type).to_vec();
        if self.nullable {
            for op in [RuleOperator::IsEmpty, RuleOperator::IsNotEmpty] {
                if !ops.contains(&op) {
                    ops.push(op);
                }
            }
        }
        ops.retain(|op| self.allows(*op));
        ops
    }

    fn validate(&self, entity: &str, name: &str) -> QueryResult<()> {
        if let FilterField::Column(column) = &self.source {
            if !is_valid_identifier(column) {
                return Err(QueryError::config(format!(
                    "{}.{}: invalid column name '{}'",
                    entity, name, column
                )));
            }
        }
        if let Some(list) = &self.operators {
            if let Some(op) = list.iter().find(|op| !op.supports(self.field_type, self.nullable)) {
                return Err(QueryError::config(format!(
                    "{}.{}: operator '{}' is not supported for {} fields",
                    entity, name, op, self.field_type
                )));
            }
        }
        if self.field_type == FieldType::Enum && self.options.is_empty() {
            return Err(QueryError::config(format!(
                "{}.{}: enum field has no options",
                entity, name
            )));
        }
        Ok(())
    }
}

/// The filterable surface of one entity.
#[derive(Debug, Clone)]
pub struct FilterCatalog {
    table: String,
    alias: Option<String>,
    fields: BTreeMap<String, FieldDef>,
    sortable: Vec<String>,
    default_sort: Option<String>,
}

impl FilterCatalog {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: None,
            fields: BTreeMap::new(),
            sortable: Vec::new(),
            default_sort: None,
        }
    }

    /// Table alias used to qualify columns.
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn field(mut self, name: &str, def: FieldDef) -> Self {
        self.fields.insert(name.to_string(), def);
        self
    }

    /// Logical fields callers may sort by.
    pub fn sortable(mut self, fields: &[&str]) -> Self {
        self.sortable = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn default_sort(mut self, field: &str) -> Self {
        self.default_sort = Some(field.to_string());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn table_alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn get(&self, field: &str) -> Option<&FieldDef> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn default_sort_field(&self) -> Option<&str> {
        self.default_sort.as_deref()
    }

    /// Column behind a sortable field, `None` if sorting on it is not allowed.
    pub fn sort_column(&self, field: &str) -> Option<&str> {
        if !self.sortable.iter().any(|s| s == field) {
            return None;
        }
        match &self.fields.get(field)?.source {
            FilterField::Column(column) => Some(column),
            FilterField::Custom(_) => None,
        }
    }

    /// Check identifiers, operator lists and sort settings.
    pub fn validate(&self) -> QueryResult<()> {
        if !is_valid_identifier(&self.table) {
            return Err(QueryError::config(format!("invalid table name '{}'", self.table)));
        }
        if let Some(alias) = &self.alias {
            if !is_valid_identifier(alias) {
                return Err(QueryError::config(format!(
                    "{}: invalid alias '{}'",
                    self.table, alias
                )));
            }
        }
        for (name, def) in &self.fields {
            def.validate(&self.table, name)?;
        }
        for field in &self.sortable {
            if self.sort_column(field).is_none() {
                return Err(QueryError::config(format!(
                    "{}: sortable field '{}' is not a column field",
                    self.table, field
                )));
            }
        }
        if let Some(field) = &self.default_sort {
            if self.sort_column(field).is_none() {
                return Err(QueryError::config(format!(
                    "{}: default sort '{}' is not sortable",
                    self.table, field
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TOML configuration
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    entities: BTreeMap<String, EntityConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityConfig {
    table: String,
    alias: Option<String>,
    #[serde(default)]
    sortable: Vec<String>,
    default_sort: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldConfig {
    #[serde(rename = "type")]
    field_type: FieldType,
    /// Defaults to the field name.
    column: Option<String>,
    #[serde(default)]
    nullable: bool,
    operators: Option<Vec<RuleOperator>>,
    #[serde(default)]
    options: Vec<String>,
    handler: Option<HandlerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum HandlerConfig {
    TimeWindow { start: String, end: String },
}

impl FieldConfig {
    fn into_def(self, name: &str) -> QueryResult<FieldDef> {
        let source = match self.handler {
            Some(HandlerConfig::TimeWindow { start, end }) => {
                FilterField::Custom(Arc::new(TimeWindowStatus::new(&start, &end)?))
            }
            None => FilterField::Column(self.column.unwrap_or_else(|| name.to_string())),
        };
        Ok(FieldDef {
            field_type: self.field_type,
            nullable: self.nullable,
            operators: self.operators,
            options: self.options,
            source,
        })
    }
}

/// All catalogs of an application, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    entities: BTreeMap<String, FilterCatalog>,
}

impl Catalogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a catalog built in code.
    pub fn insert(&mut self, entity: &str, catalog: FilterCatalog) -> QueryResult<()> {
        catalog.validate()?;
        self.entities.insert(entity.to_string(), catalog);
        Ok(())
    }

    /// Parse and validate catalogs from TOML text.
    pub fn from_toml_str(text: &str) -> QueryResult<Self> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| QueryError::config(e.to_string()))?;

        let mut catalogs = Self::new();
        for (entity, config) in file.entities {
            let mut catalog = FilterCatalog::new(&config.table);
            catalog.alias = config.alias;
            catalog.sortable = config.sortable;
            catalog.default_sort = config.default_sort;
            for (name, field) in config.fields {
                let def = field.into_def(&name)?;
                catalog.fields.insert(name, def);
            }
            catalogs.insert(&entity, catalog)?;
        }
        Ok(catalogs)
    }

    /// Load catalogs from a TOML file.
    pub fn load(path: &Path) -> QueryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// `<config dir>/rulequery/catalog.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rulequery").join("catalog.toml"))
    }

    pub fn get(&self, entity: &str) -> QueryResult<&FilterCatalog> {
        self.entities
            .get(entity)
            .ok_or_else(|| QueryError::config(format!("no catalog for entity '{}'", entity)))
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}
