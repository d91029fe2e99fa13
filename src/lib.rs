//! # rulequery
//!
//! Compile nested AND/OR rule trees from untrusted JSON into parameterized
//! SQL, against an explicit per-entity catalog of filterable fields.
//!
//! ## Quick Example
//!
//! ```
//! use rulequery::prelude::*;
//!
//! let catalog = FilterCatalog::new("contacts")
//!     .field("email", FieldDef::string("email"))
//!     .field("joined", FieldDef::date("joined_at"));
//!
//! let group = RuleGroup::from_json(r#"{"condition": "AND", "rules": [
//!     {"field": "email", "operator": "ends_with", "value": ["@example.com"]},
//!     {"field": "joined", "operator": "greater_or_equal", "value": ["$now(d:-28)"]}
//! ]}"#).unwrap();
//!
//! let clause = rulequery::compile(&group, &catalog, Dialect::Postgres, "").unwrap();
//! assert_eq!(
//!     clause.sql,
//!     "(\"email\" ILIKE :r0_0 ESCAPE '\\' AND \"joined_at\" >= :r1_0)"
//! );
//! ```
//!
//! ## Pieces
//!
//! | Module       | Role                                              |
//! |--------------|---------------------------------------------------|
//! | [`ast`]      | rule tree JSON shapes                             |
//! | [`date`]     | absolute and `$now(...)` date literals            |
//! | [`catalog`]  | filterable fields per entity, TOML loading        |
//! | [`compiler`] | rule tree to WHERE fragment                       |
//! | [`merge`]    | AND in system constraints                         |
//! | [`paginate`] | page + count queries through an [`engine::Executor`] |

pub mod ast;
pub mod catalog;
pub mod compiler;
pub mod date;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod merge;
pub mod paginate;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::catalog::{Catalogs, FieldDef, FilterCatalog, FilterField, FilterHandler};
    pub use crate::compiler::{Compiler, HandlerContext, WhereClause};
    pub use crate::date::{DateUnit, ParsedDate, parse_date, parse_date_at};
    pub use crate::dialect::Dialect;
    pub use crate::engine::{Executor, JsonRow, SqlValue, SqlxExecutor};
    pub use crate::error::*;
    pub use crate::handlers::TimeWindowStatus;
    pub use crate::merge::merge;
    pub use crate::paginate::{Page, PaginatedQuery, SortOrder, fetch, fetch_rows};
}

pub use compiler::compile;
