//! schema-migrate CLI - cross-database schema migration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use schema_migrate::{
    Config, ExecuteOptions, MigrateError, MigrationTask, Orchestrator, PlanRequest, ProgressEvent,
    ReportFormat,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when a run or comparison finished but left work undone.
const EXIT_INCOMPLETE: u8 = 8;

#[derive(Parser)]
#[command(name = "schema-migrate")]
#[command(about = "Cross-database schema migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "migrate.yaml")]
    config: PathBuf,

    /// Path to the task ledger (overrides state.path)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct PolicyArgs {
    /// Retry a rejected statement immediately
    #[arg(long)]
    auto_retry: bool,

    /// Upper bound on retries per item (default: migration.max_retries)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Halt at the first failed item
    #[arg(long)]
    stop_on_failure: bool,

    /// Mark items still failing after retries as skipped
    #[arg(long)]
    skip_failed: bool,
}

impl PolicyArgs {
    /// Flags only ever switch behavior on over the configured defaults.
    fn apply(self, mut options: ExecuteOptions) -> ExecuteOptions {
        options.auto_retry |= self.auto_retry;
        options.stop_on_failure |= self.stop_on_failure;
        options.skip_failed |= self.skip_failed;
        if let Some(n) = self.max_retries {
            options.max_retries = n;
        }
        options
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Count, order and cycle-check the objects of a database
    Analyze {
        /// Connection id from the configuration
        connection: String,

        /// Schema to analyze (default: the connection's schema)
        #[arg(long)]
        schema: Option<String>,
    },

    /// Create a migration plan from a source to a target connection
    Plan {
        /// Source connection id
        #[arg(long)]
        source: String,

        /// Target connection id
        #[arg(long)]
        target: String,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// List the planned items
        #[arg(long)]
        show: bool,
    },

    /// Apply the outstanding items of a plan to its target
    Execute {
        /// Task id or unique prefix
        task: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Re-run only the failed items of a task
    Retry {
        /// Task id or unique prefix
        task: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Show one task, or list all tasks
    Status {
        /// Task id or unique prefix
        task: Option<String>,

        /// Include the task's items
        #[arg(long)]
        items: bool,
    },

    /// Compare a task's objects between source and target
    Compare {
        /// Task id or unique prefix
        task: String,
    },

    /// Render a migration report
    Report {
        /// Task id or unique prefix
        task: String,

        /// Report format: markdown or json
        #[arg(long, default_value = "markdown")]
        format: String,

        /// Include a fresh source/target comparison
        #[arg(long)]
        compare: bool,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Mark a failed item as skipped
    Skip {
        /// Task id or unique prefix
        task: String,

        /// Execution order of the item
        order: u32,

        /// Reason recorded on the item
        #[arg(long)]
        reason: Option<String>,
    },

    /// Replace the target definition of a pending or failed item
    Edit {
        /// Task id or unique prefix
        task: String,

        /// Execution order of the item
        order: u32,

        /// File containing the new definition
        #[arg(long)]
        ddl_file: PathBuf,
    },

    /// Delete a task and its items
    Delete {
        /// Task id or unique prefix
        task: String,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let mut orchestrator = Orchestrator::new(config)?;
    if let Some(ref path) = cli.state_file {
        orchestrator = orchestrator.with_state_file(path)?;
    }

    let mut printer = None;
    if cli.progress {
        let (tx, handle) = spawn_progress_printer();
        orchestrator = orchestrator.with_progress(tx);
        printer = Some(handle);
    }

    let result = dispatch(&cli, &orchestrator).await;
    orchestrator.close().await;

    // Dropping the orchestrator closes the progress channel so the printer drains
    drop(orchestrator);
    if let Some(handle) = printer {
        let _ = handle.await;
    }

    result
}

async fn dispatch(cli: &Cli, orchestrator: &Orchestrator) -> Result<ExitCode, MigrateError> {
    match &cli.command {
        Commands::Analyze { connection, schema } => {
            let summary = orchestrator
                .analyze_source_database(connection, schema.as_deref())
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Analysis of '{}' ({}, schema {}):",
                    summary.connection,
                    summary.dialect,
                    summary.schema.as_deref().unwrap_or("<all>")
                );
                println!("  Objects: {}", summary.total);
                for (kind, count) in &summary.counts {
                    println!("    {}: {}", kind, count);
                }
                for cycle in &summary.cycles {
                    let state = if cycle.broken {
                        format!("broken by deferring {}", cycle.deferred_constraints.join(", "))
                    } else {
                        "cannot be broken".to_string()
                    };
                    println!("  Cycle: {} ({})", cycle.objects.join(" -> "), state);
                }
                for ext in &summary.external_references {
                    println!("  External reference: {} -> {}", ext.from, ext.to);
                }
                if !summary.order.is_empty() {
                    println!("  Migration order:");
                    for (i, object) in summary.order.iter().enumerate() {
                        println!("    {:>3}. {}", i + 1, object);
                    }
                }
            }

            if summary.has_unbroken_cycle() {
                return Ok(ExitCode::from(EXIT_INCOMPLETE));
            }
        }

        Commands::Plan {
            source,
            target,
            source_schema,
            target_schema,
            show,
        } => {
            let request = PlanRequest::new(source, target)
                .with_schemas(source_schema.clone(), target_schema.clone());
            let task = orchestrator.create_migration_plan(&request).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("\nMigration plan created!");
                print_task(&task);
                if *show {
                    print_items(orchestrator, &task).await?;
                }
            }
        }

        Commands::Execute { task, policy } | Commands::Retry { task, policy } => {
            let task_id = orchestrator.resolve_task_id(task).await?;
            let options = policy.apply(orchestrator.default_options());
            let cancel = setup_signal_handler();

            let summary = if matches!(cli.command, Commands::Retry { .. }) {
                orchestrator.retry_failed_items(task_id, &options, cancel).await?
            } else {
                orchestrator
                    .execute_migration_batch(task_id, &options, cancel)
                    .await?
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let headline = if summary.cancelled {
                    "Execution cancelled."
                } else if summary.is_success() {
                    "Migration completed!"
                } else {
                    "Migration finished with failures."
                };
                println!("\n{}", headline);
                println!("  Task ID: {}", summary.task_id);
                println!("  Status: {}", summary.outcome);
                println!("  Duration: {:.2}s", summary.duration_ms as f64 / 1000.0);
                println!(
                    "  Items: {} completed, {} failed, {} skipped, {} pending (of {})",
                    summary.completed, summary.failed, summary.skipped, summary.pending, summary.total
                );
                println!("  Attempted this run: {}", summary.attempted);
                if summary.halted {
                    println!("  Halted at the first failure (stop_on_failure)");
                }
            }

            if !summary.is_success() {
                return Ok(ExitCode::from(EXIT_INCOMPLETE));
            }
        }

        Commands::Status { task, items } => match task {
            Some(task) => {
                let task_id = orchestrator.resolve_task_id(task).await?;
                if cli.output_json {
                    if *items {
                        let plan = orchestrator.get_migration_plan(task_id).await?;
                        println!("{}", serde_json::to_string_pretty(&plan)?);
                    } else {
                        let task = orchestrator.get_migration_status(task_id).await?;
                        println!("{}", serde_json::to_string_pretty(&task)?);
                    }
                } else {
                    let task = orchestrator.get_migration_status(task_id).await?;
                    print_task(&task);
                    if *items {
                        print_items(orchestrator, &task).await?;
                    }
                }
            }
            None => {
                let tasks = orchestrator.list_tasks().await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&tasks)?);
                } else if tasks.is_empty() {
                    println!("No migration tasks.");
                } else {
                    for task in &tasks {
                        println!(
                            "{}  {} -> {}  {}  ({}/{} completed)",
                            task.id,
                            task.source_connection,
                            task.target_connection,
                            task.outcome_label(),
                            task.completed_items,
                            task.total_items
                        );
                    }
                }
            }
        },

        Commands::Compare { task } => {
            let task_id = orchestrator.resolve_task_id(task).await?;
            let report = orchestrator.compare_databases(task_id).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Comparison for task {}:", task_id);
                println!("  Matched: {}", report.matched.len());
                for entry in &report.missing_in_target {
                    println!(
                        "  Missing: #{} {} ({})",
                        entry.execution_order,
                        entry.target,
                        entry.detail.as_deref().unwrap_or("not found")
                    );
                }
                for entry in &report.altered_in_target {
                    println!(
                        "  Altered: #{} {} ({})",
                        entry.execution_order,
                        entry.target,
                        entry.detail.as_deref().unwrap_or("differs")
                    );
                }
                for extra in &report.extra_in_target {
                    println!("  Extra in target: {}", extra);
                }
                for note in &report.notes {
                    println!("  Note: {}", note);
                }
                println!(
                    "\n  Overall: {}",
                    if report.is_consistent() { "CONSISTENT" } else { "DIFFERS" }
                );
            }

            if !report.is_consistent() {
                return Ok(ExitCode::from(EXIT_INCOMPLETE));
            }
        }

        Commands::Report {
            task,
            format,
            compare,
            output,
        } => {
            let format: ReportFormat = if cli.output_json {
                ReportFormat::Json
            } else {
                format.parse()?
            };
            let task_id = orchestrator.resolve_task_id(task).await?;
            let report = orchestrator
                .generate_migration_report(task_id, *compare)
                .await?;
            let rendered = report.render(format)?;

            match output {
                Some(path) => {
                    std::fs::write(path, rendered)?;
                    println!("Report written to {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }

        Commands::Skip {
            task,
            order,
            reason,
        } => {
            let task_id = orchestrator.resolve_task_id(task).await?;
            let item = orchestrator
                .skip_item(task_id, *order, reason.as_deref())
                .await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&item)?);
            } else {
                let task = orchestrator.get_migration_status(task_id).await?;
                println!("Skipped item #{} ({})", item.execution_order, item.qualified_name());
                println!("  Task status: {}", task.outcome_label());
            }
        }

        Commands::Edit {
            task,
            order,
            ddl_file,
        } => {
            let ddl = std::fs::read_to_string(ddl_file)?;
            let task_id = orchestrator.resolve_task_id(task).await?;
            let item = orchestrator.update_item_ddl(task_id, *order, &ddl).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&item)?);
            } else {
                println!(
                    "Updated target definition of item #{} ({})",
                    item.execution_order,
                    item.qualified_name()
                );
            }
        }

        Commands::Delete { task } => {
            let task_id = orchestrator.resolve_task_id(task).await?;
            orchestrator.delete_task(task_id).await?;
            println!("Deleted task {}", task_id);
        }

        Commands::HealthCheck => {
            let results = orchestrator.health_check().await;
            let healthy = results.iter().all(|h| h.healthy);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Health Check Results:");
                for h in &results {
                    println!(
                        "  {} ({}, {}): {} ({}ms)",
                        h.connection,
                        h.adapter,
                        h.dialect,
                        if h.healthy { "OK" } else { "FAILED" },
                        h.latency_ms
                    );
                    if let Some(ref err) = h.error {
                        println!("    Error: {}", err);
                    }
                }
                println!("\n  Overall: {}", if healthy { "HEALTHY" } else { "UNHEALTHY" });
            }

            if !healthy {
                return Err(MigrateError::connection("health-check", "one or more connections failed"));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_task(task: &MigrationTask) {
    println!("  Task ID: {}", task.id);
    println!(
        "  Source: {} ({}) -> Target: {} ({})",
        task.source_connection, task.source_dialect, task.target_connection, task.target_dialect
    );
    if let (Some(src), Some(tgt)) = (&task.source_schema, &task.target_schema) {
        println!("  Schemas: {} -> {}", src, tgt);
    }
    println!("  Status: {}", task.outcome_label());
    println!(
        "  Items: {} total, {} pending, {} completed, {} failed, {} skipped",
        task.total_items, task.pending_items, task.completed_items, task.failed_items, task.skipped_items
    );
    if let Some(ref err) = task.error_message {
        println!("  Error: {}", err);
    }
}

async fn print_items(orchestrator: &Orchestrator, task: &MigrationTask) -> Result<(), MigrateError> {
    let plan = orchestrator.get_migration_plan(task.id).await?;
    println!("  Items:");
    for item in &plan.items {
        println!(
            "    #{:<3} {:<10} {:<40} {:<9} confidence {}",
            item.execution_order,
            item.object_type.as_str(),
            item.qualified_name(),
            item.status.as_str(),
            item.confidence
        );
        if let Some(ref err) = item.error_message {
            println!("         error: {}", err);
        }
    }
    Ok(())
}

/// Print progress events as JSON lines to stderr until the channel closes.
fn spawn_progress_printer() -> (mpsc::Sender<ProgressEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(100);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{}", line);
            }
        }
    });
    (tx, handle)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    // RUST_LOG wins over --verbosity when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM. The running item finishes and
/// the rest of the queue stays pending.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let Ok(mut stream) = signal(kind) else {
                return;
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Finishing the current item...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current item...");
            token.cancel();
        }
    });

    cancel_token
}
