//! Stage-scoped migration scripts applied through the application shell.
//!
//! Layout under the migrations directory:
//!
//! ```text
//! migrations/
//!   one_time/     run once, right after a fresh bootstrap
//!   staging/      run after bootstrap on staging environments
//!   development/  run after bootstrap on development environments
//! ```
//!
//! Units run in ascending file-name order; use numeric prefixes
//! (`010_users.py`, `020_mail.py`) to control it. Nothing records which
//! units ran, so every unit must tolerate a re-run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{MigrationError, MigrationResult};
use crate::runtime::AppShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    OneTime,
    Staging,
    Development,
}

impl MigrationStage {
    pub fn dir_name(self) -> &'static str {
        match self {
            MigrationStage::OneTime => "one_time",
            MigrationStage::Staging => "staging",
            MigrationStage::Development => "development",
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for MigrationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "one_time" | "onetime" => Ok(MigrationStage::OneTime),
            "staging" => Ok(MigrationStage::Staging),
            "development" | "dev" => Ok(MigrationStage::Development),
            other => Err(format!(
                "unknown migration stage '{other}' (expected one_time, staging or development)"
            )),
        }
    }
}

/// One script file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub stage: MigrationStage,
    pub ordinal: usize,
    pub name: String,
    pub path: PathBuf,
}

/// Units of `stage` under `scripts_dir`, in execution order.
///
/// A missing stage directory yields no units.
pub fn collect_units(stage: MigrationStage, scripts_dir: &Path) -> MigrationResult<Vec<MigrationUnit>> {
    let dir = scripts_dir.join(stage.dir_name());
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |source| MigrationError::Io {
        path: dir.clone(),
        source,
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !name.ends_with(".py") {
            continue;
        }
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        names.push(name);
    }
    names.sort();

    Ok(names
        .into_iter()
        .enumerate()
        .map(|(ordinal, name)| MigrationUnit {
            stage,
            ordinal,
            path: dir.join(&name),
            name,
        })
        .collect())
}

/// Applies one stage's units through an [`AppShell`].
pub struct MigrationApplier<'a> {
    shell: &'a dyn AppShell,
    scripts_dir: PathBuf,
}

impl<'a> MigrationApplier<'a> {
    pub fn new(shell: &'a dyn AppShell, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Run all units of `stage`, stopping at the first failure.
    ///
    /// Returns the number of units applied.
    pub async fn apply(&self, stage: MigrationStage) -> MigrationResult<usize> {
        let units = collect_units(stage, &self.scripts_dir)?;
        if units.is_empty() {
            info!(stage = %stage, "no migrations to apply");
            return Ok(0);
        }

        info!(stage = %stage, count = units.len(), "applying migrations");
        for unit in &units {
            let body = std::fs::read_to_string(&unit.path).map_err(|source| MigrationError::Io {
                path: unit.path.clone(),
                source,
            })?;
            let outcome = self
                .shell
                .run_script(&unit.name, &body)
                .await
                .map_err(MigrationError::Shell)?;
            if !outcome.success {
                error!(stage = %stage, unit = %unit.name, exit_code = ?outcome.exit_code, "migration failed");
                return Err(MigrationError::UnitFailed {
                    stage,
                    unit: unit.name.clone(),
                    detail: outcome.output.trim().to_string(),
                });
            }
            info!(stage = %stage, unit = %unit.name, "migration applied");
        }
        Ok(units.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(MigrationStage::OneTime.to_string(), "one_time");
        assert_eq!("one-time".parse::<MigrationStage>().unwrap(), MigrationStage::OneTime);
        assert_eq!("Staging".parse::<MigrationStage>().unwrap(), MigrationStage::Staging);
        assert!("prod".parse::<MigrationStage>().is_err());
    }

    #[test]
    fn collects_python_files_in_order() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("staging");
        std::fs::create_dir_all(dir.join("020_nested.py")).unwrap();
        for name in ["020_mail.py", "010_users.py", ".000_hidden.py", "README.md"] {
            std::fs::write(dir.join(name), "pass\n").unwrap();
        }

        let units = collect_units(MigrationStage::Staging, root.path()).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["010_users.py", "020_mail.py"]);
        assert_eq!(units[1].ordinal, 1);
    }

    #[test]
    fn missing_stage_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(collect_units(MigrationStage::Development, root.path())
            .unwrap()
            .is_empty());
    }
}
