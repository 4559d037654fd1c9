//! odoo-bin command lines for bootstrap and launch.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::addons::join_paths;
use crate::config::GodooConfig;

/// Data directory used unless the caller passes `--data-dir`/`-D`.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/odoo";

/// A program and its arguments, ready to spawn or exec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn has_flag(&self, names: &[&str]) -> bool {
        has_flag(&self.args, names)
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Whether `args` contains any of `names`, bare or as `name=value`.
pub fn has_flag(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|arg| {
        names.iter().any(|name| {
            arg == name
                || arg
                    .strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with('='))
        })
    })
}

/// Comma-separated values given to any of `names`, as `--name=a,b` or `-n a,b`.
pub fn flag_values(args: &[String], names: &[&str]) -> Vec<String> {
    let mut values = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let raw = if names.contains(&arg.as_str()) {
            iter.next().map(String::as_str)
        } else {
            names
                .iter()
                .find_map(|name| arg.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
        };
        if let Some(raw) = raw {
            values.extend(
                raw.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            );
        }
    }
    values
}

fn logfile_arg(config: &GodooConfig, extra: &[String]) -> Option<String> {
    let path = config.log_file.as_ref()?;
    (!has_flag(extra, &["--logfile"])).then(|| format!("--logfile={}", path.display()))
}

fn database_args(config: &GodooConfig) -> Vec<String> {
    let mut args = config.db.odoo_flags();
    if let Some(filter) = config.db_filter.as_deref().filter(|f| !f.is_empty()) {
        args.push(format!("--db-filter=^{filter}$"));
    }
    args
}

fn worker_args(workers: u32) -> Vec<String> {
    if workers > 0 {
        vec!["--proxy-mode".to_string(), format!("--workers={workers}")]
    } else {
        vec!["--workers=0".to_string()]
    }
}

/// Options of one bootstrap run.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub demo: bool,
    /// Modules for `--init`; ignored when the extra args carry `-i`/`--init`.
    pub init_modules: Vec<String>,
    pub extra_args: Vec<String>,
}

/// `odoo-bin` invocation that initializes the database and exits.
pub fn bootstrap_command(
    config: &GodooConfig,
    addon_paths: &[PathBuf],
    options: &BootstrapOptions,
) -> LaunchCommand {
    let mut extra = config.bootstrap_args.clone();
    extra.extend(options.extra_args.iter().cloned());

    let mut cmd = LaunchCommand::new(config.odoo_bin());
    if !options.init_modules.is_empty() && !has_flag(&extra, &["-i", "--init"]) {
        cmd = cmd.arg(format!("--init={}", options.init_modules.join(",")));
    }
    cmd = cmd
        .arg(format!("--config={}", config.conf_path.display()))
        .arg("--save")
        .arg(format!("--load-language={}", config.languages))
        .arg("--stop-after-init")
        .arg(format!("--addons-path={}", join_paths(addon_paths)));
    cmd.args.extend(database_args(config));
    if !options.demo && !has_flag(&extra, &["--without-demo"]) {
        cmd = cmd.arg("--without-demo=all");
    }
    cmd = cmd.arg("--x-sendfile");
    cmd.args.extend(logfile_arg(config, &extra));
    cmd.args.extend(extra);
    if !cmd.has_flag(&["--data-dir", "-D"]) {
        cmd = cmd.arg(format!("--data-dir={DEFAULT_DATA_DIR}"));
    }
    if config.worker_count > 0 {
        cmd.args.extend(worker_args(config.worker_count));
    }
    cmd
}

/// Options of the long-running launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub dev_mode: bool,
    /// Modules for `--update`; ignored when the extra args carry `-u`/`--update`.
    pub update_modules: Vec<String>,
    pub extra_args: Vec<String>,
}

/// Long-running `odoo-bin` server invocation.
pub fn launch_command(
    config: &GodooConfig,
    addon_paths: &[PathBuf],
    odoo_major: Option<u32>,
    options: &LaunchOptions,
) -> LaunchCommand {
    let mut extra = config.launch_args.clone();
    extra.extend(options.extra_args.iter().cloned());

    let mut cmd = LaunchCommand::new(config.odoo_bin());
    if !options.update_modules.is_empty() && !has_flag(&extra, &["-u", "--update"]) {
        cmd = cmd.arg(format!("--update={}", options.update_modules.join(",")));
    }
    cmd = cmd
        .arg("-c")
        .arg(config.conf_path.display().to_string())
        .arg(format!("--addons-path={}", join_paths(addon_paths)));
    cmd.args.extend(database_args(config));
    if options.dev_mode {
        let mut dev = "--dev=xml,qweb,reload".to_string();
        if odoo_major == Some(16) {
            dev.push_str(",werkzeug");
        }
        cmd = cmd.arg(dev);
    }
    if !has_flag(&extra, &["--workers"]) {
        cmd.args.extend(worker_args(config.worker_count));
    }
    cmd.args.extend(logfile_arg(config, &extra));
    cmd.args.extend(extra);
    cmd
}
