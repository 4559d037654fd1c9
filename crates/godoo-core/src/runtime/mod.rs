//! Boundaries to the application process: shell, one-shot runs, handoff.

pub mod command;
pub mod python;
pub mod shell;
pub mod supervisor;

pub use command::{
    bootstrap_command, flag_values, launch_command, BootstrapOptions, LaunchCommand,
    LaunchOptions,
};
pub use python::{install_python_requirements, PipFrontend};
pub use shell::{admin_password_script, AppShell, OdooShell, ScriptOutcome};
pub use supervisor::{ExecSupervisor, ProcessRunner, Supervisor, TokioProcessRunner};
