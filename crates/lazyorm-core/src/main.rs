//! LazyORM CLI - staff records over the persistence core
//!
//! Commands:
//! - `init` - Create the database schema (and optionally a local config)
//! - `department` - Add or list departments
//! - `employee` - Hire, rename, fire or show employees
//! - `time` - Log hours against an employee
//! - `leave` - Grant or list holidays and vacations
//! - `stats` - Row counts per entity kind
//!
//! Every command runs inside a single session that commits on success.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lazyorm_config::{ConfigLoader, ConfigOverrides, LogFormat, OrmConfig};
use lazyorm_core::staff::{self, Department, Employee, Leave, LeaveKind, Period, TimeRecord};
use lazyorm_core::{Entity, EntityId, LazyList, SessionFactory, SqliteStore, Store};

/// LazyORM - Unit of Work and Lazy Load over SQLite
#[derive(Parser)]
#[command(name = "lazyorm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace directory holding `.lazyorm/config.toml`
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Database file (overrides config)
    #[arg(short, long, global = true, env = "LAZYORM_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init {
        /// Also write a local config file with the effective settings
        #[arg(long)]
        write_config: bool,
    },

    /// Manage departments
    Department {
        #[command(subcommand)]
        command: DepartmentCommand,
    },

    /// Manage employees
    Employee {
        #[command(subcommand)]
        command: EmployeeCommand,
    },

    /// Record working time
    Time {
        #[command(subcommand)]
        command: TimeCommand,
    },

    /// Grant or list time off
    Leave {
        #[command(subcommand)]
        command: LeaveCommand,
    },

    /// Show row counts for every entity kind
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DepartmentCommand {
    /// Add a department
    Add {
        /// Department name
        name: String,
    },

    /// List all departments
    List,
}

#[derive(Subcommand)]
enum EmployeeCommand {
    /// Hire a new employee
    Hire {
        /// Employee name
        name: String,

        /// Department id
        #[arg(long)]
        department: Option<i64>,
    },

    /// Change an employee's name
    Rename {
        /// Employee id
        id: i64,

        /// New name
        name: String,
    },

    /// Remove an employee with their time records and leave
    Fire {
        /// Employee id
        id: i64,
    },

    /// Show an employee with department and time records
    Show {
        /// Employee id
        id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TimeCommand {
    /// Log hours for an employee
    Log {
        /// Employee id
        employee: i64,

        /// Hours worked
        hours: f64,

        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
enum LeaveCommand {
    /// Grant a single holiday or a vacation period
    Grant {
        /// Employee id
        employee: i64,

        /// Day off (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["from", "to"])]
        holiday: Option<NaiveDate>,

        /// First vacation day (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last vacation day (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },

    /// List an employee's leave
    List {
        /// Employee id
        employee: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        database: cli.database.clone(),
        ..Default::default()
    };
    let config = ConfigLoader::new()
        .load(&cli.workspace, Some(&overrides))
        .context("Failed to load configuration")?;

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Init { write_config } => cmd_init(&cli.workspace, &config, write_config),
        Commands::Department { command } => {
            let factory = open_factory(&cli.workspace, &config)?;
            match command {
                DepartmentCommand::Add { name } => cmd_department_add(&factory, name),
                DepartmentCommand::List => cmd_department_list(&factory),
            }
        }
        Commands::Employee { command } => {
            let factory = open_factory(&cli.workspace, &config)?;
            match command {
                EmployeeCommand::Hire { name, department } => {
                    cmd_employee_hire(&factory, name, department)
                }
                EmployeeCommand::Rename { id, name } => cmd_employee_rename(&factory, id, name),
                EmployeeCommand::Fire { id } => cmd_employee_fire(&factory, id),
                EmployeeCommand::Show { id, json } => cmd_employee_show(&factory, id, json),
            }
        }
        Commands::Time { command } => {
            let factory = open_factory(&cli.workspace, &config)?;
            match command {
                TimeCommand::Log {
                    employee,
                    hours,
                    note,
                } => cmd_time_log(&factory, employee, hours, note),
            }
        }
        Commands::Leave { command } => {
            let factory = open_factory(&cli.workspace, &config)?;
            match command {
                LeaveCommand::Grant {
                    employee,
                    holiday,
                    from,
                    to,
                } => cmd_leave_grant(&factory, employee, leave_kind(holiday, from, to)?),
                LeaveCommand::List { employee, json } => cmd_leave_list(&factory, employee, json),
            }
        }
        Commands::Stats { json } => {
            let factory = open_factory(&cli.workspace, &config)?;
            cmd_stats(&factory, json)
        }
    }
}

/// Install the global subscriber. `RUST_LOG` directives, when set, take the
/// place of the level chosen by `--verbose` or the config.
fn init_logging(config: &OrmConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        Level::from(config.logging.level)
    };
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let filter = log_filter(level, &directives);

    match config.logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn log_filter(level: Level, directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy(directives)
}

/// Open the store, apply the schema and build a session factory
fn open_factory(workspace: &std::path::Path, config: &OrmConfig) -> Result<SessionFactory> {
    let path = config.database_path(workspace);
    let store = SqliteStore::open(&path, &config.store)
        .with_context(|| format!("Failed to open database {:?}", path))?
        .with_id_block_size(config.session.id_block_size);
    store
        .execute_batch(staff::SCHEMA)
        .context("Failed to apply schema")?;

    let registry = staff::registry().context("Failed to build mapper registry")?;
    let store: Arc<dyn Store> = Arc::new(store);
    Ok(SessionFactory::new(
        store,
        Arc::new(registry),
        config.session.clone(),
    ))
}

fn cmd_init(workspace: &std::path::Path, config: &OrmConfig, write_config: bool) -> Result<()> {
    let path = config.database_path(workspace);
    let store = SqliteStore::open(&path, &config.store)
        .with_context(|| format!("Failed to create database {:?}", path))?;
    store
        .execute_batch(staff::SCHEMA)
        .context("Failed to apply schema")?;
    info!("Initialized database at {:?}", path);

    if write_config {
        let loader = ConfigLoader::new();
        loader
            .save_local(workspace, config)
            .context("Failed to write local config")?;
        println!(
            "Wrote {}",
            loader.local_config_path(workspace).display()
        );
    }

    println!("Database ready: {}", path.display());
    Ok(())
}

fn cmd_department_add(factory: &SessionFactory, name: String) -> Result<()> {
    let id = factory.run(|session| -> Result<EntityId> {
        let department = session.create(Department::new(name))?;
        department
            .id()
            .context("created department has no id")
    })?;
    println!("Added department #{}", id);
    Ok(())
}

fn cmd_department_list(factory: &SessionFactory) -> Result<()> {
    let rows = factory.run(|session| -> Result<Vec<(EntityId, String)>> {
        let mut rows = Vec::new();
        for department in session.find_all::<Department>()? {
            let name = session.get(&department)?.name.clone();
            rows.push((department.id().context("department without id")?, name));
        }
        Ok(rows)
    })?;

    if rows.is_empty() {
        println!("No departments");
    }
    for (id, name) in rows {
        println!("  #{:<6} {}", id, name);
    }
    Ok(())
}

fn cmd_employee_hire(factory: &SessionFactory, name: String, department: Option<i64>) -> Result<()> {
    let id = factory.run(|session| -> Result<EntityId> {
        let mut employee = Employee::new(name);
        if let Some(department_id) = department {
            let department = session.find::<Department>(department_id)?;
            session
                .ensure_loaded(&department)
                .with_context(|| format!("Department #{} does not exist", department_id))?;
            employee = employee.with_department(department);
        }
        let employee = session.create(employee)?;
        employee.id().context("created employee has no id")
    })?;
    println!("Hired employee #{}", id);
    Ok(())
}

fn cmd_employee_rename(factory: &SessionFactory, id: i64, name: String) -> Result<()> {
    let previous = factory.run(|session| -> Result<String> {
        let employee = session.find::<Employee>(id)?;
        let previous = session.modify(&employee, |e| std::mem::replace(&mut e.name, name))?;
        Ok(previous)
    })?;
    println!("Renamed employee #{} (was {})", id, previous);
    Ok(())
}

fn cmd_employee_fire(factory: &SessionFactory, id: i64) -> Result<()> {
    let (removed_records, removed_leaves) = factory.run(|session| -> Result<(usize, usize)> {
        let employee = session.find::<Employee>(id)?;
        let records = {
            let data = session.get(&employee)?;
            let records = session.collection(&data.time_records)?;
            records.to_vec()
        };
        let leaves = LazyList::<Leave>::owned_by(Employee::KIND, EntityId(id));
        let leaves = session.collection(&leaves)?.to_vec();

        // Owned rows go first so the delete phase never orphans them
        for record in &records {
            session.remove(record)?;
        }
        for leave in &leaves {
            session.remove(leave)?;
        }
        session.remove(&employee)?;
        Ok((records.len(), leaves.len()))
    })?;
    println!(
        "Fired employee #{} ({} time records, {} leaves removed)",
        id, removed_records, removed_leaves
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct EmployeeView {
    id: EntityId,
    name: String,
    department: Option<DepartmentView>,
    time_records: Vec<TimeRecordView>,
    total_hours: f64,
}

#[derive(Debug, Serialize)]
struct DepartmentView {
    id: EntityId,
    name: String,
}

#[derive(Debug, Serialize)]
struct TimeRecordView {
    id: EntityId,
    hours: f64,
    note: Option<String>,
}

fn cmd_employee_show(factory: &SessionFactory, id: i64, json_output: bool) -> Result<()> {
    let view = factory.run(|session| -> Result<EmployeeView> {
        let employee = session.find::<Employee>(id)?;
        let data = session
            .get(&employee)
            .with_context(|| format!("Employee #{} could not be loaded", id))?;

        let department = match &data.department {
            Some(department) => Some(DepartmentView {
                id: department.id().context("department without id")?,
                name: session.get(department)?.name.clone(),
            }),
            None => None,
        };

        let mut time_records = Vec::new();
        for record in session.collection(&data.time_records)? {
            let record_data = session.get(record)?;
            time_records.push(TimeRecordView {
                id: record.id().context("time record without id")?,
                hours: record_data.hours,
                note: record_data.note.clone(),
            });
        }

        let stats = session.stats();
        debug!(
            "show used {} queries, {} loads",
            stats.store.queries, stats.loading.loads
        );

        Ok(EmployeeView {
            id: EntityId(id),
            name: data.name.clone(),
            department,
            total_hours: time_records.iter().map(|r| r.hours).sum(),
            time_records,
        })
    })?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("\nEmployee #{}", view.id);
    println!("==============");
    println!("  Name: {}", view.name);
    match &view.department {
        Some(department) => println!("  Department: {} (#{})", department.name, department.id),
        None => println!("  Department: -"),
    }
    println!("  Time records: {}", view.time_records.len());
    for record in &view.time_records {
        println!(
            "    #{:<6} {:>6.2}h  {}",
            record.id,
            record.hours,
            record.note.as_deref().unwrap_or("")
        );
    }
    println!("  Total hours: {:.2}", view.total_hours);
    Ok(())
}

fn cmd_time_log(
    factory: &SessionFactory,
    employee_id: i64,
    hours: f64,
    note: Option<String>,
) -> Result<()> {
    if !hours.is_finite() || hours <= 0.0 {
        anyhow::bail!("Hours must be a positive number, got {}", hours);
    }

    let id = factory.run(|session| -> Result<EntityId> {
        let employee = session.find::<Employee>(employee_id)?;
        session
            .ensure_loaded(&employee)
            .with_context(|| format!("Employee #{} does not exist", employee_id))?;

        let mut record = TimeRecord::new(employee, hours);
        if let Some(note) = note {
            record = record.with_note(note);
        }
        let record = session.create(record)?;
        record.id().context("created time record has no id")
    })?;
    println!("Logged {:.2}h as time record #{}", hours, id);
    Ok(())
}

/// Leave shape from the `leave grant` flags
fn leave_kind(
    holiday: Option<NaiveDate>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<LeaveKind> {
    match (holiday, from, to) {
        (Some(day), None, None) => Ok(LeaveKind::Holiday { day }),
        (None, Some(start), Some(end)) => Ok(LeaveKind::Vacation {
            period: Period::new(start, end)?,
        }),
        _ => anyhow::bail!("Give either --holiday DATE or --from DATE --to DATE"),
    }
}

fn cmd_leave_grant(factory: &SessionFactory, employee_id: i64, kind: LeaveKind) -> Result<()> {
    let (id, days) = factory.run(|session| -> Result<(EntityId, i64)> {
        let employee = session.find::<Employee>(employee_id)?;
        session
            .ensure_loaded(&employee)
            .with_context(|| format!("Employee #{} does not exist", employee_id))?;

        let leave = Leave { employee, kind };
        let days = leave.days();
        let leave = session.create(leave)?;
        Ok((leave.id().context("created leave has no id")?, days))
    })?;
    println!("Granted {} day(s) of leave as #{}", days, id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct LeaveView {
    id: EntityId,
    #[serde(flatten)]
    kind: LeaveKind,
    days: i64,
}

fn cmd_leave_list(factory: &SessionFactory, employee_id: i64, json_output: bool) -> Result<()> {
    let views = factory.run(|session| -> Result<Vec<LeaveView>> {
        let leaves = LazyList::<Leave>::owned_by(Employee::KIND, EntityId(employee_id));
        let mut views = Vec::new();
        for leave in session.collection(&leaves)? {
            let data = session.get(leave)?;
            views.push(LeaveView {
                id: leave.id().context("leave without id")?,
                kind: data.kind,
                days: data.days(),
            });
        }
        Ok(views)
    })?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if views.is_empty() {
        println!("No leave for employee #{}", employee_id);
    }
    for view in &views {
        match view.kind {
            LeaveKind::Holiday { day } => println!("  #{:<6} holiday   {}", view.id, day),
            LeaveKind::Vacation { period } => println!(
                "  #{:<6} vacation  {} .. {} ({} days)",
                view.id,
                period.start(),
                period.end(),
                view.days
            ),
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct KindCount {
    kind: String,
    table: String,
    rows: i64,
}

fn cmd_stats(factory: &SessionFactory, json_output: bool) -> Result<()> {
    let registry = factory.registry();
    let store = factory.store();

    let mut counts = Vec::new();
    for kind in registry.kinds() {
        let mapper = registry.by_kind(kind)?;
        let sql = format!("SELECT COUNT(*) AS row_count FROM {}", mapper.table());
        let rows = store.run_query(&sql, &[])?;
        let count = match rows.first() {
            Some(row) => row.get_i64("row_count")?,
            None => 0,
        };
        counts.push(KindCount {
            kind: kind.to_string(),
            table: mapper.table().to_string(),
            rows: count,
        });
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }

    println!("\nEntity Statistics");
    println!("=================");
    for count in &counts {
        println!("  {:<12} {:<14} {}", count.kind, count.table, count.rows);
    }
    Ok(())
}
