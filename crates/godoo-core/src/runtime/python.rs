//! Python requirements of the modules odoo-bin is about to load.

use std::path::PathBuf;

use tracing::{debug, error, info};

use super::command::LaunchCommand;
use super::supervisor::ProcessRunner;
use crate::addons;
use crate::config::GodooConfig;
use crate::error::{BootstrapError, BootstrapResult};

/// Manifest names whose PyPI distribution is called differently.
const PYPI_NAMES: &[(&str, &str)] = &[("ldap", "python-ldap")];

pub fn pypi_name(package: &str) -> &str {
    PYPI_NAMES
        .iter()
        .find(|(manifest, _)| *manifest == package)
        .map_or(package, |&(_, pypi)| pypi)
}

/// Tool that performs the install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipFrontend {
    Uv,
    Pip { python: PathBuf },
}

impl PipFrontend {
    pub fn install_command(&self, packages: &[String]) -> LaunchCommand {
        let mut cmd = match self {
            PipFrontend::Uv => LaunchCommand::new("uv").arg("pip"),
            PipFrontend::Pip { python } => LaunchCommand::new(python).arg("-m").arg("pip"),
        };
        cmd = cmd.arg("install");
        cmd.args
            .extend(packages.iter().map(|p| pypi_name(p).to_string()));
        cmd
    }
}

/// `uv pip` inside a virtualenv when uv is installed, `<python> -m pip` otherwise.
async fn frontend(config: &GodooConfig, runner: &dyn ProcessRunner) -> PipFrontend {
    if config.virtual_env.is_some() {
        let probe = LaunchCommand::new("uv").arg("--version");
        if runner.run(&probe).await == Ok(0) {
            return PipFrontend::Uv;
        }
        debug!("uv not available, falling back to pip");
    }
    PipFrontend::Pip {
        python: config.python.clone(),
    }
}

/// Install the Python packages `modules` and their dependencies declare.
///
/// Returns the number of packages requested; pip leaves installed ones alone.
pub async fn install_python_requirements(
    config: &GodooConfig,
    runner: &dyn ProcessRunner,
    modules: &[String],
) -> BootstrapResult<usize> {
    if !config.install_python_deps || modules.is_empty() {
        return Ok(0);
    }
    let packages = addons::python_requirements(&addons::addon_paths(config), modules);
    if packages.is_empty() {
        debug!(modules = ?modules, "no python requirements declared");
        return Ok(0);
    }

    let command = frontend(config, runner).await.install_command(&packages);
    info!(packages = ?packages, "installing python requirements");
    let exit_code = runner
        .run(&command)
        .await
        .map_err(BootstrapError::Requirements)?;
    if exit_code != 0 {
        error!(exit_code, "python requirements install failed");
        return Err(BootstrapError::Requirements(format!(
            "{command} exited with {exit_code}"
        )));
    }
    Ok(packages.len())
}
