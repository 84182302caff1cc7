use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use minet_lib::backup::{local, RestoreMode};
use minet_lib::config::AppConfig;
use minet_lib::repo::{self, Table, BUSINESS_TABLES};
use minet_lib::security::{GateState, NoBiometrics, UnlockOutcome};
use minet_lib::{migrate, time, AppState};

/// Exit code for a destructive command run without `--confirm`.
const CONFIRM_REQUIRED_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "minet", about = "MiNet CRM data maintenance", version)]
struct Cli {
    /// PIN to unlock a PIN-protected store before running the command.
    #[arg(long, global = true)]
    pin: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database inspection commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Snapshot export, restore and scheduled backups.
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Delete every record, the profile and all settings.
    Wipe {
        /// Actually wipe. Without this flag only a summary is printed.
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Print the database path, applied migrations and row counts as JSON.
    Status,
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    /// Write a snapshot file into the backup directory (or `--out`).
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List snapshot files in the backup directory, newest first.
    List,
    /// Restore a snapshot file. Overwrites existing records unless `--merge`.
    Restore {
        file: PathBuf,
        /// Upsert on top of existing records instead of replacing them.
        #[arg(long)]
        merge: bool,
        #[arg(long)]
        confirm: bool,
    },
    /// Run the scheduled backup if one is due.
    Auto,
}

fn main() {
    let cli = Cli::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    };
    let _log_guard = match minet_lib::init_with_file_sink(&config.log_dir(), &config.log_filter) {
        Ok(guard) => Some(guard),
        Err(err) => {
            minet_lib::init_logging();
            tracing::warn!(target: "minet", event = "log_file_sink_unavailable", error = %err);
            None
        }
    };

    match run(cli.command, cli.pin, config) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(command: Commands, pin: Option<String>, config: AppConfig) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async {
        let state = AppState::init(config, Arc::new(NoBiometrics))
            .await
            .context("open data store")?;
        if let Some(pin) = pin.as_deref() {
            unlock(&state, pin)?;
        }
        let code = match command {
            Commands::Db(DbCommand::Status) => db_status(&state).await,
            Commands::Backup(cmd) => handle_backup(&state, cmd).await,
            Commands::Wipe { confirm } => handle_wipe(&state, confirm).await,
        };
        state.shutdown().await;
        code
    })
}

/// Data commands are refused by the library while locked; a correct `--pin`
/// lifts the lock for this run.
fn unlock(state: &AppState, pin: &str) -> Result<()> {
    if state.gate.state() != GateState::Locked {
        return Ok(());
    }
    match state.gate.unlock_with_pin(pin).context("check PIN")? {
        UnlockOutcome::Unlocked => Ok(()),
        outcome => bail!(
            "{}",
            outcome.message().unwrap_or_else(|| "PIN must be 6 digits".to_string())
        ),
    }
}

async fn table_counts(state: &AppState, tables: &[Table]) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut counts = serde_json::Map::new();
    for table in tables {
        let n = repo::count(state.store.pool(), *table)
            .await
            .with_context(|| format!("count {}", table.as_str()))?;
        counts.insert(table.as_str().to_string(), json!(n));
    }
    Ok(counts)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn db_status(state: &AppState) -> Result<i32> {
    let migrations = migrate::applied_versions(state.store.pool())
        .await
        .context("read applied migrations")?;
    let counts = table_counts(state, Table::ALL).await?;
    print_json(&json!({
        "path": state.config.db_path().display().to_string(),
        "migrations": migrations,
        "tables": counts,
        "session": state.gate.state(),
    }))?;
    Ok(0)
}

async fn handle_backup(state: &AppState, command: BackupCommand) -> Result<i32> {
    match command {
        BackupCommand::Export { out } => {
            let path = state
                .export_local(out.as_deref())
                .await
                .context("export snapshot")?;
            println!("{}", path.display());
            Ok(0)
        }
        BackupCommand::List => {
            for path in local::list_backups(&state.config.backup_dir)? {
                println!("{}", path.display());
            }
            Ok(0)
        }
        BackupCommand::Restore {
            file,
            merge,
            confirm,
        } => handle_restore(state, &file, merge, confirm).await,
        BackupCommand::Auto => {
            let outcome = state.run_auto_backup(time::now()).await;
            print_json(&serde_json::to_value(&outcome)?)?;
            Ok(0)
        }
    }
}

async fn handle_restore(state: &AppState, file: &Path, merge: bool, confirm: bool) -> Result<i32> {
    let mode = if merge {
        RestoreMode::Merge
    } else {
        RestoreMode::Overwrite
    };
    if !confirm {
        let payload = local::read_payload(file)
            .with_context(|| format!("read backup {}", file.display()))?;
        let replaced = match mode {
            RestoreMode::Overwrite => json!(table_counts(state, BUSINESS_TABLES).await?),
            RestoreMode::Merge => json!({}),
        };
        print_json(&json!({
            "confirmRequired": true,
            "mode": mode,
            "records": payload.data.record_count(),
            "replaces": replaced,
        }))?;
        eprintln!("Re-run with --confirm to restore.");
        return Ok(CONFIRM_REQUIRED_EXIT_CODE);
    }
    let summary = state
        .restore_file(file, mode)
        .await
        .with_context(|| format!("restore {}", file.display()))?;
    print_json(&serde_json::to_value(summary)?)?;
    Ok(0)
}

async fn handle_wipe(state: &AppState, confirm: bool) -> Result<i32> {
    if !confirm {
        print_json(&json!({
            "confirmRequired": true,
            "deletes": table_counts(state, Table::ALL).await?,
        }))?;
        eprintln!("Re-run with --confirm to delete everything.");
        return Ok(CONFIRM_REQUIRED_EXIT_CODE);
    }
    let removed = state.wipe().await.context("wipe data")?;
    print_json(&json!({ "removed": removed }))?;
    Ok(0)
}
