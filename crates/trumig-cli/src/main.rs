use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use trumig_core::newest_checkpoint;
use trumig_storage::{validate_store, Compatibility, LegacyStore, Migrator};

#[derive(Parser)]
#[command(name = "trumig")]
#[command(about = "Upgrade legacy trulens stores to the current release", long_about = None)]
struct Cli {
    /// Path to the SQLite store
    #[arg(long, global = true, env = "TRUMIG_DB")]
    db: Option<PathBuf>,
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether the store matches the current release
    Check {
        /// Only warn when the store is out of date
        #[arg(long)]
        warn: bool,
    },
    /// List the steps a migration would apply
    Plan,
    /// Back up the store and bring it to the newest version
    Migrate {
        #[arg(long)]
        json: bool,
    },
    /// Re-parse every payload column against the current shapes
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let path = cli
        .db
        .context("no store given; pass --db or set TRUMIG_DB")?;
    debug!(db = %path.display(), "opening store");
    let store = LegacyStore::open(&path)
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    let migrator = Migrator::builtin()?;

    match cli.command {
        Commands::Check { warn } => {
            let compatibility = migrator.ensure_compatible(&store, warn)?;
            match &compatibility {
                Compatibility::Current { version } => println!("store is current ({version})"),
                other => {
                    warn!(db = %path.display(), "store needs attention");
                    println!("{}", other.advice());
                }
            }
        }
        Commands::Plan => {
            let plan = migrator.plan(&store)?;
            println!(
                "store version {} (checkpoint {}) -> {}",
                plan.stored_version, plan.checkpoint, plan.target
            );
            if plan.steps.is_empty() {
                println!("nothing to migrate");
            }
            for step in &plan.steps {
                println!("- {} ({} -> {})", step.name, step.from, step.to);
            }
        }
        Commands::Migrate { json } => {
            info!(db = %path.display(), "starting migration");
            let report = migrator
                .run(&store)
                .with_context(|| format!("Failed to migrate {}", path.display()))?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to render report")?
                );
            } else {
                println!("migrated {} -> {}", report.stored_version, report.target);
                for step in &report.steps {
                    println!("- applied {} ({} -> {})", step.name, step.from, step.to);
                }
                print_checked(report.validation.checked(), report.validation.skipped());
                println!("original store saved at {}", report.backup.backup.display());
            }
        }
        Commands::Validate => {
            let summary = validate_store(&store).context("Store failed validation")?;
            for column in &summary.columns {
                println!(
                    "{}.{}: {} checked, {} skipped",
                    column.table, column.column, column.checked, column.skipped
                );
            }
            print_checked(summary.checked(), summary.skipped());
        }
    }

    Ok(())
}

fn print_checked(checked: usize, skipped: usize) {
    println!(
        "validated {checked} payloads ({skipped} unknown) against {}",
        newest_checkpoint()
    );
}

fn log_level(debug: bool, configured: Option<String>) -> String {
    if debug {
        "debug".to_string()
    } else if let Some(level) = configured.filter(|level| !level.trim().is_empty()) {
        level
    } else {
        "info".to_string()
    }
}

fn init_logging(debug: bool) {
    let level = log_level(debug, std::env::var("TRUMIG_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins_over_configured_level() {
        assert_eq!(log_level(true, Some("warn".to_string())), "debug");
        assert_eq!(log_level(false, Some("warn".to_string())), "warn");
        assert_eq!(log_level(false, Some("  ".to_string())), "info");
        assert_eq!(log_level(false, None), "info");
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["trumig", "migrate", "--db", "store.sqlite", "--json", "--debug"])
            .expect("valid arguments");
        assert_eq!(cli.db, Some(PathBuf::from("store.sqlite")));
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Migrate { json: true }));
    }

    #[test]
    fn check_accepts_warn_flag() {
        let cli = Cli::try_parse_from(["trumig", "--db", "store.sqlite", "check", "--warn"])
            .expect("valid arguments");
        assert!(matches!(cli.command, Commands::Check { warn: true }));
    }
}
