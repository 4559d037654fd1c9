//! godoo - Odoo source sync and bootstrap orchestration
//!
//! ## Commands
//!
//! - `sync-sources`: clone/update every repository of the manifest
//! - `bootstrap`: initialize the database if it is not bootstrapped yet
//! - `launch`: sync, bootstrap if needed, then hand over to odoo-bin
//! - `bootstrap-status`: report the bootstrap marker through the exit code
//! - `migrate`: apply one migration stage
//!
//! Every flag falls back to the environment variable named in its help, and
//! a `.env` file in the working directory is loaded first.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand};
use godoo_core::sync::{PinOptions, SyncAction};
use godoo_core::{
    split_args, DirtyPolicy, GodooConfig, LaunchCoordinator, LaunchError, LaunchRequest,
    MigrationStage, Services, Stage, SyncMode, SyncRequest,
};
use godoo_state::DbConnection;
use tracing::{error, Level};

#[derive(Parser)]
#[command(name = "godoo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Odoo source synchronization and bootstrap orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Database host
    #[arg(long, env = "ODOO_DB_HOST", default_value = "", global = true)]
    db_host: String,

    /// Database port (0: driver default)
    #[arg(long, env = "ODOO_DB_PORT", default_value_t = 0, global = true)]
    db_port: u16,

    /// Database user
    #[arg(long, env = "ODOO_DB_USER", default_value = "", global = true)]
    db_user: String,

    /// Database password
    #[arg(long, env = "ODOO_DB_PASSWORD", default_value = "", hide_env_values = true, global = true)]
    db_password: String,

    /// Main database name
    #[arg(long, env = "ODOO_MAIN_DB", default_value = "odoo", global = true)]
    db_name: String,

    /// Database filter passed to odoo-bin as `^<filter>$`
    #[arg(long, env = "ODOO_DB_FILTER", global = true)]
    db_filter: Option<String>,

    /// Source manifest
    #[arg(long, env = "ODOO_MANIFEST", default_value = "/odoo/odoo_manifest.yml", global = true)]
    manifest: PathBuf,

    /// Checkout of the main Odoo source
    #[arg(long, env = "ODOO_MAIN_FOLDER", default_value = "/odoo/odoo", global = true)]
    odoo_main: PathBuf,

    /// odoo.conf location
    #[arg(long, env = "ODOO_CONF_PATH", default_value = "/odoo/odoo.conf", global = true)]
    odoo_conf: PathBuf,

    /// Workspace addons folder
    #[arg(long, env = "ODOO_WORKSPACE_ADDON_LOCATION", default_value = "/odoo/workspace", global = true)]
    workspace_addons: PathBuf,

    /// Root folder for third-party repositories
    #[arg(long, env = "ODOO_THIRDPARTY_LOCATION", default_value = "/odoo/thirdparty", global = true)]
    thirdparty: PathBuf,

    /// Folder scanned for zip addon drops
    #[arg(long, env = "ODOO_THIRDPARTY_ZIP_LOCATION", global = true)]
    zip_drop: Option<PathBuf>,

    /// Download snapshots instead of cloning where the host supports it
    #[arg(long, env = "SOURCE_CLONE_ARCHIVE", value_parser = FalseyValueParser::new(), global = true)]
    archive_mode: bool,

    /// odoo-bin worker count (0: threaded mode)
    #[arg(long, env = "ODOO_WORKER_COUNT", default_value_t = 0, global = true)]
    workers: u32,

    /// Languages loaded at bootstrap
    #[arg(long, env = "ODOO_LAUNCH_LANGUAGES", default_value = "de_DE,en_US", global = true)]
    languages: String,

    /// Extra odoo-bin arguments for launch
    #[arg(long, env = "ODOO_BIN_ARGS", default_value = "", global = true)]
    odoo_bin_args: String,

    /// Extra odoo-bin arguments for bootstrap
    #[arg(long, env = "ODOO_BIN_BOOTSTRAP_ARGS", default_value = "", global = true)]
    odoo_bin_bootstrap_args: String,

    /// Environment stage: production, staging or development
    #[arg(long, env = "GODOO_STAGE", default_value = "production", global = true)]
    stage: Stage,

    /// Root of the one_time/staging/development migration folders
    #[arg(long, env = "GODOO_MIGRATIONS_DIR", default_value = "/odoo/migrations", global = true)]
    migrations_dir: PathBuf,

    /// Admin password set after a staging bootstrap
    #[arg(long, env = "GODOO_ADMIN_PASSWORD", hide_env_values = true, global = true)]
    admin_password: Option<String>,

    /// Supervisor command; the launch command is appended to it
    #[arg(long, env = "GODOO_SUPERVISOR_CMD", global = true)]
    supervisor_cmd: Option<String>,

    /// Repositories synced in parallel
    #[arg(long, env = "GODOO_SYNC_CONCURRENCY", default_value_t = 8, global = true)]
    sync_concurrency: usize,

    /// Per-repository sync deadline in seconds
    #[arg(long, env = "GODOO_SYNC_TIMEOUT_SECS", default_value_t = 900, global = true)]
    sync_timeout_secs: u64,

    /// odoo-bin log file, removed at the start of every bootstrap or launch
    #[arg(long, env = "ODOO_LOG_FILE", global = true)]
    logfile: Option<PathBuf>,

    /// Do not install Python requirements declared by module manifests
    #[arg(long, env = "GODOO_SKIP_PY_DEPS", value_parser = FalseyValueParser::new(), global = true)]
    skip_python_deps: bool,

    /// Interpreter used for `-m pip`
    #[arg(long, env = "GODOO_PYTHON", default_value = "python3", global = true)]
    python: PathBuf,

    /// Active virtualenv; enables `uv pip` when uv is installed
    #[arg(long, env = "VIRTUAL_ENV", hide = true, global = true)]
    virtual_env: Option<PathBuf>,
}

impl ConfigArgs {
    fn into_config(self) -> GodooConfig {
        let db = DbConnection::new(self.db_name)
            .with_host(self.db_host)
            .with_port(self.db_port)
            .with_credentials(self.db_user, self.db_password);
        GodooConfig {
            db,
            db_filter: self.db_filter.filter(|f| !f.is_empty()),
            manifest_path: self.manifest,
            odoo_main: self.odoo_main,
            conf_path: self.odoo_conf,
            workspace_addons: self.workspace_addons,
            thirdparty_root: self.thirdparty,
            zip_drop: self.zip_drop,
            archive_mode: self.archive_mode,
            worker_count: self.workers,
            languages: self.languages,
            launch_args: split_args(&self.odoo_bin_args),
            bootstrap_args: split_args(&self.odoo_bin_bootstrap_args),
            stage: self.stage,
            migrations_dir: self.migrations_dir,
            admin_password: self.admin_password.filter(|p| !p.is_empty()),
            supervisor_cmd: self
                .supervisor_cmd
                .map(|c| split_args(&c))
                .filter(|c| !c.is_empty()),
            sync_concurrency: self.sync_concurrency,
            sync_timeout: Duration::from_secs(self.sync_timeout_secs),
            log_file: self
                .logfile
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| std::path::absolute(&p).unwrap_or(p)),
            install_python_deps: !self.skip_python_deps,
            python: self.python,
            virtual_env: self.virtual_env.filter(|p| !p.as_os_str().is_empty()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or update all sources declared in the manifest
    SyncSources {
        /// Delete third-party folders the manifest no longer declares
        #[arg(long)]
        remove_unspecified: bool,

        /// Reset checkouts with local modifications instead of failing
        #[arg(long)]
        discard_local_changes: bool,

        /// Which sources to sync: all, odoo, thirdparty or zip
        #[arg(long, default_value = "all")]
        mode: SyncMode,

        /// Print the sync report as JSON on stdout
        #[arg(long)]
        json_report: bool,

        /// Fetch from the remote even when a checkout is already at its pin
        #[arg(long)]
        force_fetch: bool,

        /// Write the checked-out commit of every third-party repo back to the manifest
        #[arg(long)]
        pin_commits: bool,

        /// Comment manifest pins with a compare link against the Odoo branch
        #[arg(long)]
        add_compare_comments: bool,
    },

    /// Initialize the database unless it is already bootstrapped
    Bootstrap {
        /// Extra odoo-bin arguments, whitespace separated
        #[arg(long, allow_hyphen_values = true)]
        extra_args: Option<String>,

        /// Load demo data
        #[arg(long)]
        demo: bool,

        /// Install base,web instead of the workspace modules
        #[arg(long)]
        no_install_workspace_modules: bool,
    },

    /// Sync sources, bootstrap if needed and hand over to odoo-bin
    Launch {
        /// Enable odoo-bin developer mode (xml, qweb, reload)
        #[arg(long)]
        dev_mode: bool,

        /// Skip the source sync
        #[arg(long)]
        no_update_source: bool,

        /// Neither install nor update workspace modules
        #[arg(long)]
        no_install_workspace_modules: bool,

        /// Reset checkouts with local modifications instead of failing
        #[arg(long)]
        discard_local_changes: bool,

        /// Fetch from the remote even when a checkout is already at its pin
        #[arg(long)]
        force_fetch: bool,

        /// Extra odoo-bin arguments, whitespace separated
        #[arg(long, allow_hyphen_values = true)]
        extra_args: Option<String>,
    },

    /// Exit 0 when bootstrapped, 20 without database, 21 when unmarked, 22 when unreachable, 23 when the query fails
    BootstrapStatus,

    /// Apply one migration stage
    Migrate {
        /// one_time, staging or development
        #[arg(id = "migration_stage", value_name = "STAGE")]
        stage: MigrationStage,
    },
}

fn dirty_policy(discard: bool) -> DirtyPolicy {
    if discard {
        DirtyPolicy::Discard
    } else {
        DirtyPolicy::Abort
    }
}

/// First 12 characters of a commit or stamped ref.
fn short_ref(reference: Option<&str>) -> String {
    reference
        .map(|r| r.chars().take(12).collect())
        .unwrap_or_else(|| "-".to_string())
}

/// Exit code for a failed run; unknown errors map to 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<LaunchError>()
        .map(LaunchError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    godoo_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            error!(exit_code = code, "{err:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.into_config();
    let coordinator = LaunchCoordinator::new(&config, Services::production(&config));

    match cli.command {
        Commands::SyncSources {
            remove_unspecified,
            discard_local_changes,
            mode,
            json_report,
            force_fetch,
            pin_commits,
            add_compare_comments,
        } => {
            let request = SyncRequest {
                mode,
                remove_unspecified,
                dirty_policy: dirty_policy(discard_local_changes),
                force_fetch,
                pins: PinOptions {
                    pin_commits,
                    compare_comments: add_compare_comments,
                },
            };
            cmd_sync_sources(&coordinator, request, json_report).await
        }
        Commands::Bootstrap {
            extra_args,
            demo,
            no_install_workspace_modules,
        } => {
            let options = coordinator.bootstrap_options(
                !no_install_workspace_modules,
                demo,
                split_args(extra_args.as_deref().unwrap_or_default()),
            );
            let run = coordinator.bootstrap(&options).await?;
            if run.bootstrapped {
                println!(
                    "Bootstrapped {} ({} migrations applied)",
                    config.db.display_target(),
                    run.migrations_applied
                );
            } else {
                println!("{} is already bootstrapped", config.db.display_target());
            }
            Ok(())
        }
        Commands::Launch {
            dev_mode,
            no_update_source,
            no_install_workspace_modules,
            discard_local_changes,
            force_fetch,
            extra_args,
        } => {
            let request = LaunchRequest {
                dev_mode,
                update_source: !no_update_source,
                install_workspace_modules: !no_install_workspace_modules,
                dirty_policy: dirty_policy(discard_local_changes),
                force_fetch,
                extra_args: split_args(extra_args.as_deref().unwrap_or_default()),
            };
            coordinator.launch(&request).await?;
            Ok(())
        }
        Commands::BootstrapStatus => {
            let state = coordinator.bootstrap_status().await?;
            println!("{}: {state}", config.db.display_target());
            Ok(())
        }
        Commands::Migrate { stage } => {
            let applied = coordinator.migrate(stage).await?;
            println!("Applied {applied} {stage} migrations");
            Ok(())
        }
    }
}

async fn cmd_sync_sources(
    coordinator: &LaunchCoordinator<'_>,
    request: SyncRequest,
    json_report: bool,
) -> Result<()> {
    let report = coordinator.sync_sources(request).await?;

    if json_report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize sync report")?;
        println!("{json}");
    } else {
        for repo in &report.repos {
            let status = match (repo.action, repo.error.as_deref()) {
                (_, Some(err)) => format!("FAILED  {err}"),
                (Some(SyncAction::Skipped), _) => "up to date".to_string(),
                (Some(SyncAction::Cloned), _) => "cloned".to_string(),
                (Some(SyncAction::Updated), _) => "updated".to_string(),
                (Some(SyncAction::Downloaded), _) => "downloaded".to_string(),
                (None, None) => "unknown".to_string(),
            };
            println!(
                "  {:<32} {:<12} {}",
                repo.name,
                short_ref(repo.current_ref.as_deref()),
                status
            );
        }
        for path in &report.removed {
            println!("  removed {}", path.display());
        }
        if report.manifest_updated {
            println!("  manifest pins updated");
        }
    }

    report.check().map_err(LaunchError::from)?;
    Ok(())
}
