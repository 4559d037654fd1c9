//! Recording fakes for the process boundaries (testing only)
//!
//! Pair these with `godoo_state::fakes::MemoryMarkerStore` to drive the
//! bootstrap state machine and the launch coordinator without odoo-bin.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::runtime::{AppShell, LaunchCommand, ProcessRunner, ScriptOutcome, Supervisor};

/// [`ProcessRunner`] that records commands and returns a fixed exit code.
#[derive(Debug)]
pub struct RecordingRunner {
    exit_code: i32,
    commands: Mutex<Vec<LaunchCommand>>,
}

impl RecordingRunner {
    pub fn succeeding() -> Self {
        Self::exiting_with(0)
    }

    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<LaunchCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, command: &LaunchCommand) -> Result<i32, String> {
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.exit_code)
    }
}

/// [`AppShell`] that records script names, optionally failing one of them.
#[derive(Debug, Default)]
pub struct RecordingShell {
    fail_on: Option<String>,
    scripts: Mutex<Vec<(String, String)>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report failure for the script called `name`.
    pub fn failing_on(name: impl Into<String>) -> Self {
        Self {
            fail_on: Some(name.into()),
            ..Self::default()
        }
    }

    /// Names of the scripts run so far, in order.
    pub fn script_names(&self) -> Vec<String> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn body_of(&self, name: &str) -> Option<String> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl AppShell for RecordingShell {
    async fn run_script(&self, name: &str, body: &str) -> Result<ScriptOutcome, String> {
        self.scripts
            .lock()
            .unwrap()
            .push((name.to_string(), body.to_string()));
        if self.fail_on.as_deref() == Some(name) {
            return Ok(ScriptOutcome::failed(1, format!("{name}: boom")));
        }
        Ok(ScriptOutcome::ok())
    }
}

/// [`Supervisor`] that records the handoff instead of exec'ing.
#[derive(Debug, Default)]
pub struct RecordingSupervisor {
    fail_with: Option<String>,
    handoffs: Mutex<Vec<LaunchCommand>>,
}

impl RecordingSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn handoffs(&self) -> Vec<LaunchCommand> {
        self.handoffs.lock().unwrap().clone()
    }
}

impl Supervisor for RecordingSupervisor {
    fn handoff(&self, command: LaunchCommand) -> Result<(), String> {
        self.handoffs.lock().unwrap().push(command);
        match &self.fail_with {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }
}
