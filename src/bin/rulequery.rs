//! rulequery: compile and run rule-tree filters from the shell.
//!
//! # Usage
//!
//! ```bash
//! # Show the WHERE clause for a rule tree
//! rulequery compile --entity contacts --rules '{"condition":"AND","rules":[...]}'
//!
//! # Run a paginated query
//! rulequery fetch --entity contacts --query '{"sort":"joined","limit":10}'
//!
//! # Check what a date literal resolves to
//! rulequery parse-date '$now(M:-3,d:1)'
//! ```

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use rulequery::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rulequery")]
#[command(version)]
#[command(about = "Compile JSON rule trees into parameterized SQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    rulequery compile -e contacts -r '{\"condition\":\"OR\",\"rules\":[]}'
    rulequery fetch -e contacts -q '{\"sort\":\"email\",\"order\":\"DESC\"}'
    rulequery parse-date '$now(d:-28)' --now 2024-05-15T12:00:00Z")]
struct Cli {
    /// Catalog file (defaults to <config dir>/rulequery/catalog.toml)
    #[arg(short, long, global = true)]
    catalog: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, global = true, env = "RULEQUERY_DATABASE_URL")]
    database_url: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule tree into a WHERE clause and its bindings
    Compile {
        #[arg(short, long)]
        entity: String,
        /// Rule group JSON
        #[arg(short, long)]
        rules: String,
        /// Table alias to qualify columns with
        #[arg(short, long)]
        prefix: Option<String>,
        /// Reference time for $now literals
        #[arg(long)]
        now: Option<String>,
        #[arg(long, value_enum, default_value = "postgres")]
        dialect: DialectArg,
    },
    /// Run a paginated query against the database
    Fetch {
        #[arg(short, long)]
        entity: String,
        /// Paginated query JSON
        #[arg(short, long, default_value = "{}")]
        query: String,
        /// Constraint ANDed with the caller's rules
        #[arg(long)]
        inject: Option<String>,
    },
    /// Resolve a date literal
    ParseDate {
        literal: String,
        #[arg(long)]
        now: Option<String>,
    },
    /// Print a rule tree
    Explain {
        #[arg(short, long)]
        rules: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Compile {
            entity,
            rules,
            prefix,
            now,
            dialect,
        } => {
            let catalogs = load_catalogs(cli)?;
            let catalog = catalogs.get(entity)?;
            let group = RuleGroup::from_json(rules).context("invalid rule group JSON")?;

            let mut compiler = Compiler::new(catalog, (*dialect).into());
            if let Some(prefix) = prefix {
                compiler = compiler.prefix(prefix);
            }
            if let Some(now) = now {
                compiler = compiler.now(reference_time(now)?);
            }
            let clause = compiler.compile(&group)?;
            print_clause(&clause, (*dialect).into(), cli.format)
        }
        Commands::Fetch {
            entity,
            query,
            inject,
        } => {
            let catalogs = load_catalogs(cli)?;
            let catalog = catalogs.get(entity)?;
            let query = PaginatedQuery::from_json(query)?;
            let injected = inject
                .as_deref()
                .map(RuleGroup::from_json)
                .transpose()
                .context("invalid injected rule group JSON")?;

            let Some(url) = &cli.database_url else {
                bail!("No database URL. Use --database-url or set RULEQUERY_DATABASE_URL");
            };
            let db = SqlxExecutor::connect(url).await?;
            let page = fetch_rows(&db, catalog, &query, injected.as_ref()).await?;
            print_page(&page, cli.format);
            Ok(())
        }
        Commands::ParseDate { literal, now } => {
            let now = match now {
                Some(now) => reference_time(now)?,
                None => Utc::now(),
            };
            let parsed = parse_date_at(literal, now)?;
            match cli.format {
                OutputFormat::Json => {
                    let out = serde_json::json!({
                        "start": parsed.start().to_rfc3339(),
                        "end": parsed.end().map(|e| e.to_rfc3339()),
                        "unit": parsed.unit.to_string(),
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                OutputFormat::Table => {
                    println!("{} {}", "Start:".dimmed(), parsed.start().to_rfc3339().cyan());
                    match parsed.end() {
                        Some(end) => println!("{} {}", "End:  ".dimmed(), end.to_rfc3339().cyan()),
                        None => println!("{} {}", "End:  ".dimmed(), "out of range".yellow()),
                    }
                    println!("{} {}", "Unit: ".dimmed(), parsed.unit.to_string().yellow());
                }
            }
            Ok(())
        }
        Commands::Explain { rules } => {
            let group = RuleGroup::from_json(rules).context("invalid rule group JSON")?;
            println!("{}", "Rule Tree".cyan().bold());
            println!();
            print_group(&group, 1);
            println!();
            println!("{} leaf rule(s)", group.rule_count().to_string().cyan());
            Ok(())
        }
    }
}

fn load_catalogs(cli: &Cli) -> Result<Catalogs> {
    let path = match &cli.catalog {
        Some(path) => path.clone(),
        None => Catalogs::default_path().context("no config directory; pass --catalog")?,
    };
    Catalogs::load(&path).with_context(|| format!("loading catalog {}", path.display()))
}

/// `--now` takes any absolute date literal; its start is the reference time.
fn reference_time(literal: &str) -> Result<DateTime<Utc>> {
    if literal.trim_start().starts_with('$') {
        bail!("--now must be an absolute date, got '{}'", literal);
    }
    Ok(parse_date(literal)?.start())
}

fn print_clause(clause: &WhereClause, dialect: Dialect, format: OutputFormat) -> Result<()> {
    let (rendered, values) = clause.render(dialect)?;
    match format {
        OutputFormat::Json => {
            let params: BTreeMap<&str, String> = clause
                .params
                .iter()
                .map(|(k, v)| (k.as_str(), v.to_string()))
                .collect();
            let out = serde_json::json!({
                "sql": clause.sql,
                "rendered": rendered,
                "params": params,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("{}", "WHERE".green().bold());
            println!("  {}", clause.sql.white());
            println!();
            println!("{} ({})", "Rendered:".green().bold(), dialect);
            println!("  {}", rendered.white());
            if !values.is_empty() {
                println!();
                println!("{}", "Bindings:".cyan());
                for (i, v) in values.iter().enumerate() {
                    println!("  {} = {}", dialect.placeholder(i + 1), v.to_string().yellow());
                }
            }
        }
    }
    Ok(())
}

fn print_group(group: &RuleGroup, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = if group.is_empty() {
        format!("{} (empty)", group.condition)
    } else {
        group.condition.to_string()
    };
    println!("{}{}", indent, label.cyan().bold());
    for item in &group.rules {
        match item {
            RuleItem::Group(child) => print_group(child, depth + 1),
            RuleItem::Rule(rule) => println!("{}  • {}", indent, rule.to_string().white()),
        }
    }
}

fn print_page(page: &Page<JsonRow>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(page).unwrap_or_default());
        }
        OutputFormat::Table => {
            if page.items.is_empty() {
                println!("{}", "(no results)".dimmed());
                return;
            }

            let columns: Vec<&String> = page.items[0].keys().collect();

            let mut widths: BTreeMap<&String, usize> =
                columns.iter().map(|c| (*c, c.len())).collect();
            for row in &page.items {
                for (col, val) in row {
                    let len = val_to_string(val).len();
                    if let Some(w) = widths.get_mut(col) {
                        *w = (*w).max(len);
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .map(|c| format!("{:width$}", c, width = widths[*c]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in &page.items {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let val = row.get(c.as_str()).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = widths[*c])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!(
                "{} of {} row(s), offset {}",
                page.count.to_string().cyan(),
                page.total.to_string().cyan(),
                page.offset
            );
        }
    }
}

fn val_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}
