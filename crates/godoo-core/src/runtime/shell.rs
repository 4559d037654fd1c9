//! Application shell boundary: run a script inside the application.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use godoo_state::DbConnection;

/// Result of one script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Combined tail of stdout and stderr.
    pub output: String,
}

impl ScriptOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: String::new(),
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            output: output.into(),
        }
    }
}

/// Runs a script body inside the application environment.
///
/// An `Err` means the shell itself could not be started; a script that ran
/// and failed is reported through [`ScriptOutcome::success`].
#[async_trait]
pub trait AppShell: Send + Sync {
    async fn run_script(&self, name: &str, body: &str) -> Result<ScriptOutcome, String>;
}

/// Keep at most `max` trailing bytes of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

const OUTPUT_TAIL: usize = 4096;

/// [`AppShell`] piping the script into `odoo-bin shell --no-http -c <conf>`.
pub struct OdooShell {
    odoo_bin: PathBuf,
    conf: PathBuf,
    db: DbConnection,
}

impl OdooShell {
    pub fn new(odoo_bin: PathBuf, conf: PathBuf, db: DbConnection) -> Self {
        Self { odoo_bin, conf, db }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "shell".to_string(),
            "--no-http".to_string(),
            "-c".to_string(),
            self.conf.display().to_string(),
        ];
        args.extend(self.db.odoo_flags());
        args
    }
}

#[async_trait]
impl AppShell for OdooShell {
    async fn run_script(&self, name: &str, body: &str) -> Result<ScriptOutcome, String> {
        debug!(script = %name, bin = %self.odoo_bin.display(), "running script in odoo shell");
        let mut child = Command::new(&self.odoo_bin)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("cannot start {}: {e}", self.odoo_bin.display()))?;

        // Feed stdin while draining stdout/stderr; either side may fill its pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(body.as_bytes()).await?;
                // Closing stdin ends the interactive session.
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| format!("odoo shell did not finish: {e}"))?;
        match fed {
            // The shell exited before reading everything; its status tells why.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(script = %name, "odoo shell closed stdin early");
            }
            Err(e) => return Err(format!("cannot write script {name}: {e}")),
            Ok(()) => {}
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        // The shell swallows exceptions into its output and still exits 0.
        let traceback = combined.contains("Traceback (most recent call last)");

        Ok(ScriptOutcome {
            success: output.status.success() && !traceback,
            exit_code: output.status.code(),
            output: tail(&combined, OUTPUT_TAIL).to_string(),
        })
    }
}

/// Script body resetting the `admin` user's password, then committing.
pub fn admin_password_script(password: &str) -> String {
    let quoted = serde_json::to_string(password).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "user = env['res.users'].search([('login', '=', 'admin')], limit=1)\n\
         user.write({{'password': {quoted}}})\n\
         env.cr.commit()\n"
    )
}
