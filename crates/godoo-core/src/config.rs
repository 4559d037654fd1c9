//! Run configuration, collected once and passed by reference.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use godoo_state::DbConnection;
use serde::{Deserialize, Serialize};

use crate::sync::{DirtyPolicy, SyncOptions};

/// Folder under the third-party root that receives zip addon drops.
pub const ZIP_TARGET_DIR: &str = "custom";

/// Environment lifecycle flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Production,
    Staging,
    Development,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Production => "production",
            Stage::Staging => "staging",
            Stage::Development => "development",
        };
        f.write_str(s)
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Stage::Production),
            "staging" => Ok(Stage::Staging),
            "development" | "dev" => Ok(Stage::Development),
            other => Err(format!(
                "unknown stage '{other}' (expected production, staging or development)"
            )),
        }
    }
}

/// Everything a godoo run needs to know about its environment.
#[derive(Debug, Clone)]
pub struct GodooConfig {
    pub db: DbConnection,
    /// Passed to odoo-bin as `--db-filter` when non-empty.
    pub db_filter: Option<String>,
    pub manifest_path: PathBuf,
    pub odoo_main: PathBuf,
    pub conf_path: PathBuf,
    pub workspace_addons: PathBuf,
    pub thirdparty_root: PathBuf,
    /// Directory scanned for zip addon drops.
    pub zip_drop: Option<PathBuf>,
    pub archive_mode: bool,
    pub worker_count: u32,
    pub languages: String,
    pub launch_args: Vec<String>,
    pub bootstrap_args: Vec<String>,
    pub stage: Stage,
    pub migrations_dir: PathBuf,
    pub admin_password: Option<String>,
    /// Supervisor program and arguments; `None` execs odoo-bin directly.
    pub supervisor_cmd: Option<Vec<String>>,
    pub sync_concurrency: usize,
    pub sync_timeout: Duration,
    /// odoo-bin log file, recreated on every bootstrap run.
    pub log_file: Option<PathBuf>,
    /// Install `external_dependencies['python']` of the modules being run.
    pub install_python_deps: bool,
    /// Interpreter for `-m pip`.
    pub python: PathBuf,
    /// Active virtualenv; `uv pip` is preferred inside one.
    pub virtual_env: Option<PathBuf>,
}

impl Default for GodooConfig {
    fn default() -> Self {
        Self {
            db: DbConnection::new("odoo"),
            db_filter: None,
            manifest_path: PathBuf::from("/odoo/odoo_manifest.yml"),
            odoo_main: PathBuf::from("/odoo/odoo"),
            conf_path: PathBuf::from("/odoo/odoo.conf"),
            workspace_addons: PathBuf::from("/odoo/workspace"),
            thirdparty_root: PathBuf::from("/odoo/thirdparty"),
            zip_drop: None,
            archive_mode: false,
            worker_count: 0,
            languages: "de_DE,en_US".to_string(),
            launch_args: Vec::new(),
            bootstrap_args: Vec::new(),
            stage: Stage::Production,
            migrations_dir: PathBuf::from("/odoo/migrations"),
            admin_password: None,
            supervisor_cmd: None,
            sync_concurrency: 8,
            sync_timeout: Duration::from_secs(900),
            log_file: None,
            install_python_deps: true,
            python: PathBuf::from("python3"),
            virtual_env: None,
        }
    }
}

impl GodooConfig {
    pub fn odoo_bin(&self) -> PathBuf {
        self.odoo_main.join("odoo-bin")
    }

    /// Where zip addon drops are unpacked.
    pub fn zip_target(&self) -> PathBuf {
        self.thirdparty_root.join(ZIP_TARGET_DIR)
    }

    pub fn sync_options(&self, dirty_policy: DirtyPolicy) -> SyncOptions {
        SyncOptions {
            archive_mode: self.archive_mode,
            dirty_policy,
            concurrency: self.sync_concurrency.max(1),
            timeout: self.sync_timeout,
            force_fetch: false,
        }
    }
}

/// Split a whitespace-separated argument string such as `ODOO_BIN_ARGS`.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_parses_aliases() {
        assert_eq!("staging".parse::<Stage>().unwrap(), Stage::Staging);
        assert_eq!("DEV".parse::<Stage>().unwrap(), Stage::Development);
        assert_eq!("prod".parse::<Stage>().unwrap(), Stage::Production);
        assert!("qa".parse::<Stage>().is_err());
    }

    #[test]
    fn derived_paths() {
        let config = GodooConfig {
            odoo_main: PathBuf::from("/srv/odoo"),
            thirdparty_root: PathBuf::from("/srv/thirdparty"),
            ..GodooConfig::default()
        };
        assert_eq!(config.odoo_bin(), PathBuf::from("/srv/odoo/odoo-bin"));
        assert_eq!(config.zip_target(), PathBuf::from("/srv/thirdparty/custom"));
    }

    #[test]
    fn sync_options_never_zero_concurrency() {
        let config = GodooConfig {
            sync_concurrency: 0,
            ..GodooConfig::default()
        };
        assert_eq!(config.sync_options(DirtyPolicy::Abort).concurrency, 1);
    }

    #[test]
    fn split_args_ignores_extra_whitespace() {
        assert_eq!(
            split_args("  --log-level=debug   --limit-time-cpu 600 "),
            vec!["--log-level=debug", "--limit-time-cpu", "600"]
        );
    }
}
