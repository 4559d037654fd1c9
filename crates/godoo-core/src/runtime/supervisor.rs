//! Process boundaries: run odoo-bin to completion, or hand the process over.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::command::LaunchCommand;

/// Environment variable carrying the launch command line to a supervisor.
pub const LAUNCH_CMD_ENV: &str = "GODOO_LAUNCH_CMD";

/// Runs a command to completion with inherited stdio.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Exit code of the finished process; `Err` when it could not be spawned.
    async fn run(&self, command: &LaunchCommand) -> Result<i32, String>;
}

/// [`ProcessRunner`] over `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &LaunchCommand) -> Result<i32, String> {
        info!(command = %command, "running");
        let status = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| format!("cannot start {}: {e}", command.program.display()))?;
        // Killed by a signal: no exit code.
        Ok(status.code().unwrap_or(-1))
    }
}

/// Hands the current process over to the long-running application.
///
/// A successful handoff does not return.
pub trait Supervisor: Send + Sync {
    fn handoff(&self, command: LaunchCommand) -> Result<(), String>;
}

/// [`Supervisor`] that replaces the current process image.
///
/// With a supervisor command configured, that command is executed with the
/// launch command appended as trailing arguments and exported in
/// [`LAUNCH_CMD_ENV`]; otherwise odoo-bin is executed directly.
#[derive(Debug, Clone, Default)]
pub struct ExecSupervisor {
    supervisor_cmd: Option<Vec<String>>,
}

impl ExecSupervisor {
    pub fn new(supervisor_cmd: Option<Vec<String>>) -> Self {
        Self {
            supervisor_cmd: supervisor_cmd.filter(|c| !c.is_empty()),
        }
    }

    /// The command that will actually be executed for `command`.
    pub fn effective_command(&self, command: &LaunchCommand) -> LaunchCommand {
        match self.supervisor_cmd.as_deref() {
            Some([program, args @ ..]) => {
                let mut wrapped = LaunchCommand::new(program);
                wrapped.args.extend(args.iter().cloned());
                wrapped
                    .args
                    .push(command.program.display().to_string());
                wrapped.args.extend(command.args.iter().cloned());
                wrapped
            }
            _ => command.clone(),
        }
    }
}

impl Supervisor for ExecSupervisor {
    #[cfg(unix)]
    fn handoff(&self, command: LaunchCommand) -> Result<(), String> {
        use std::os::unix::process::CommandExt;

        let target = self.effective_command(&command);
        info!(command = %target, "handing over");
        let err = std::process::Command::new(&target.program)
            .args(&target.args)
            .env(LAUNCH_CMD_ENV, command.to_string())
            .exec();
        Err(format!("exec {} failed: {err}", target.program.display()))
    }

    #[cfg(not(unix))]
    fn handoff(&self, command: LaunchCommand) -> Result<(), String> {
        let target = self.effective_command(&command);
        info!(command = %target, "handing over");
        let status = std::process::Command::new(&target.program)
            .args(&target.args)
            .env(LAUNCH_CMD_ENV, command.to_string())
            .status()
            .map_err(|e| format!("cannot start {}: {e}", target.program.display()))?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_handoff_runs_launch_command() {
        let cmd = LaunchCommand::new("/odoo/odoo-bin").arg("-c").arg("/odoo.conf");
        assert_eq!(ExecSupervisor::new(None).effective_command(&cmd), cmd);
        assert_eq!(ExecSupervisor::new(Some(vec![])).effective_command(&cmd), cmd);
    }

    #[test]
    fn supervisor_wraps_launch_command() {
        let cmd = LaunchCommand::new("/odoo/odoo-bin").arg("-c").arg("/odoo.conf");
        let sup = ExecSupervisor::new(Some(vec!["tini".into(), "--".into()]));
        let eff = sup.effective_command(&cmd);
        assert_eq!(eff.program, std::path::PathBuf::from("tini"));
        assert_eq!(eff.args, vec!["--", "/odoo/odoo-bin", "-c", "/odoo.conf"]);
    }

    #[tokio::test]
    async fn runner_reports_exit_code() {
        let runner = TokioProcessRunner;
        assert_eq!(runner.run(&LaunchCommand::new("true")).await.unwrap(), 0);
        assert_eq!(runner.run(&LaunchCommand::new("false")).await.unwrap(), 1);
        assert!(runner
            .run(&LaunchCommand::new("/nonexistent/odoo-bin"))
            .await
            .is_err());
    }
}
