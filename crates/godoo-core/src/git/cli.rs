//! [`SourceBackend`] implementation that shells out to the `git` binary.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{inspect_plain_dir, CheckoutKind, LocalCheckout, SourceBackend};
use crate::error::{SyncError, SyncResult};
use crate::manifest::RepositorySpec;
use crate::sync::resolver::is_commit_id;

/// Coarse classification of a failed git invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFailureKind {
    NetworkOrAuth,
    InvalidRef,
    Other,
}

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read from remote repository",
    "connection refused",
    "connection timed out",
    "unable to access",
    "repository not found",
    "does not appear to be a git repository",
    "host key verification failed",
    "the remote end hung up",
];

const INVALID_REF_MARKERS: &[&str] = &[
    "remote branch",
    "couldn't find remote ref",
    "not our ref",
    "unknown revision",
    "did not match any",
    "reference is not a tree",
    "invalid reference",
    "bad object",
    "not a valid object name",
];

/// Map git's stderr onto a failure kind.
pub fn classify_git_failure(stderr: &str) -> GitFailureKind {
    let lower = stderr.to_lowercase();
    if INVALID_REF_MARKERS.iter().any(|m| lower.contains(m)) {
        GitFailureKind::InvalidRef
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        GitFailureKind::NetworkOrAuth
    } else {
        GitFailureKind::Other
    }
}

/// Git CLI backend.
///
/// Child processes are killed when the owning future is dropped, so an
/// aborted sync task never leaves a git process behind.
#[derive(Debug, Clone)]
pub struct CliGit {
    program: String,
}

impl Default for CliGit {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl CliGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn output(&self, cwd: Option<&Path>, args: &[&str]) -> std::io::Result<std::process::Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.output().await
    }

    /// Run git and return trimmed stdout, mapping failures onto [`SyncError`].
    async fn run(
        &self,
        repo: &str,
        reference: &str,
        cwd: Option<&Path>,
        args: &[&str],
    ) -> SyncResult<String> {
        let command = args.first().copied().unwrap_or_default().to_string();
        debug!(repo = %repo, args = ?args, "running git");
        let output = self.output(cwd, args).await.map_err(|e| SyncError::Git {
            repo: repo.to_string(),
            command: command.clone(),
            detail: format!("failed to run {}: {e}", self.program),
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(match classify_git_failure(&stderr) {
            GitFailureKind::NetworkOrAuth => SyncError::NetworkOrAuth {
                repo: repo.to_string(),
                detail: stderr,
            },
            GitFailureKind::InvalidRef => SyncError::InvalidRef {
                repo: repo.to_string(),
                reference: reference.to_string(),
            },
            GitFailureKind::Other => SyncError::Git {
                repo: repo.to_string(),
                command,
                detail: stderr,
            },
        })
    }

    /// Whether `dir` is the top of a git work tree.
    async fn is_work_tree(&self, dir: &Path) -> bool {
        if !dir.join(".git").exists() {
            return false;
        }
        self.output(Some(dir), &["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Revision to resolve without fetching, if `reference` may be trusted offline.
///
/// Commit ids and tags are immutable. Branch names are not: the local copy
/// of a branch lags behind the remote until the next fetch.
fn offline_rev(reference: &str) -> Option<String> {
    if reference.starts_with("refs/tags/") {
        return Some(reference.to_string());
    }
    if reference.starts_with("refs/") {
        return None;
    }
    if is_commit_id(reference) {
        return Some(reference.to_string());
    }
    Some(format!("refs/tags/{reference}"))
}

impl CliGit {
    /// Record `reference` as a local tag when the last fetch resolved it to one.
    ///
    /// Clones and fetches run with `--no-tags`; without this a tag pin could
    /// never be resolved offline and every run would fetch again.
    async fn keep_fetched_tag(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        reference: &str,
    ) -> SyncResult<()> {
        let git_path = self
            .run(
                &spec.name,
                reference,
                Some(path),
                &["rev-parse", "--git-path", "FETCH_HEAD"],
            )
            .await?;
        let fetch_head = path.join(git_path);
        let text = tokio::fs::read_to_string(&fetch_head)
            .await
            .map_err(|e| SyncError::io(&fetch_head, e))?;

        let tag = reference.strip_prefix("refs/tags/").unwrap_or(reference);
        let marker = format!("\ttag '{tag}' of ");
        if !text.lines().next().is_some_and(|l| l.contains(&marker)) {
            return Ok(());
        }
        let tag_ref = format!("refs/tags/{tag}");
        self.run(
            &spec.name,
            reference,
            Some(path),
            &["update-ref", &tag_ref, "FETCH_HEAD"],
        )
        .await?;
        debug!(repo = %spec.name, tag = %tag, "kept fetched tag");
        Ok(())
    }
}

#[async_trait]
impl SourceBackend for CliGit {
    async fn inspect(&self, path: &Path) -> SyncResult<Option<LocalCheckout>> {
        if !self.is_work_tree(path).await {
            return inspect_plain_dir(path).map_err(|e| SyncError::io(path, e));
        }
        let label = path_arg(path);

        // A freshly initialised repository has no HEAD commit yet.
        let head = self
            .output(Some(path), &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .map_err(|e| SyncError::io(path, e))?;
        let current_ref = head
            .status
            .success()
            .then(|| String::from_utf8_lossy(&head.stdout).trim().to_string())
            .filter(|s| !s.is_empty());

        let status = self
            .run(
                &label,
                "HEAD",
                Some(path),
                // odoo-bin is chmod'ed after sync; mode changes are not local edits.
                &["-c", "core.fileMode=false", "status", "--porcelain", "--untracked-files=no"],
            )
            .await?;

        Ok(Some(LocalCheckout {
            path: path.to_path_buf(),
            current_ref,
            is_dirty: !status.is_empty(),
            kind: CheckoutKind::Git,
        }))
    }

    async fn resolve_local(&self, path: &Path, reference: &str) -> SyncResult<Option<String>> {
        let Some(rev) = offline_rev(reference) else {
            return Ok(None);
        };
        let spec = format!("{rev}^{{commit}}");
        let out = self
            .output(Some(path), &["rev-parse", "--verify", "--quiet", &spec])
            .await
            .map_err(|e| SyncError::io(path, e))?;
        if !out.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(Some(sha).filter(|s| !s.is_empty()))
    }

    async fn clone_fresh(&self, spec: &RepositorySpec, dest: &Path) -> SyncResult<()> {
        let dest_arg = path_arg(dest);
        let mut args = vec!["clone", "--filter=blob:none", "--no-tags"];
        match spec.branch.as_deref() {
            Some(branch) => {
                args.extend(["--single-branch", "--branch", branch]);
            }
            None => args.push("--no-checkout"),
        }
        args.push(&spec.url);
        args.push(&dest_arg);
        self.run(&spec.name, spec.effective_ref(), None, &args)
            .await
            .map(|_| ())
    }

    async fn fetch(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        reference: &str,
    ) -> SyncResult<String> {
        self.run(
            &spec.name,
            reference,
            Some(path),
            &["fetch", "--no-tags", "origin", reference],
        )
        .await?;
        if !is_commit_id(reference) {
            self.keep_fetched_tag(spec, path, reference).await?;
        }
        self.run(
            &spec.name,
            reference,
            Some(path),
            &["rev-parse", "FETCH_HEAD^{commit}"],
        )
        .await
    }

    async fn checkout_detached(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        commit: &str,
    ) -> SyncResult<()> {
        self.run(
            &spec.name,
            commit,
            Some(path),
            &["checkout", "--quiet", "--detach", commit],
        )
        .await
        .map(|_| ())
    }

    async fn checkout_branch(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        branch: &str,
        commit: &str,
    ) -> SyncResult<()> {
        self.run(
            &spec.name,
            branch,
            Some(path),
            &["checkout", "--quiet", "-B", branch, commit],
        )
        .await
        .map(|_| ())
    }

    async fn discard_changes(&self, spec: &RepositorySpec, path: &Path) -> SyncResult<()> {
        self.run(&spec.name, "HEAD", Some(path), &["reset", "--hard", "--quiet", "HEAD"])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--initial-branch=main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "-m", "initial"]);
        dir
    }

    fn spec_for(url: &str, branch: Option<&str>) -> RepositorySpec {
        RepositorySpec {
            name: "OCA_web".to_string(),
            url: url.to_string(),
            branch: branch.map(str::to_string),
            commit: None,
        }
    }

    #[test]
    fn classifies_common_failures() {
        assert_eq!(
            classify_git_failure("fatal: unable to access 'https://x/': Could not resolve host: x"),
            GitFailureKind::NetworkOrAuth
        );
        assert_eq!(
            classify_git_failure("warning: Could not find remote branch 99.0 to clone.\nfatal: Remote branch 99.0 not found in upstream origin"),
            GitFailureKind::InvalidRef
        );
        assert_eq!(
            classify_git_failure("fatal: couldn't find remote ref deadbeef"),
            GitFailureKind::InvalidRef
        );
        assert_eq!(
            classify_git_failure("error: something odd happened"),
            GitFailureKind::Other
        );
    }

    #[tokio::test]
    async fn inspect_reports_head_and_cleanliness() {
        let repo = make_git_repo();
        let head = run_git(repo.path(), &["rev-parse", "HEAD"]);
        let git = CliGit::new();

        let co = git.inspect(repo.path()).await.unwrap().unwrap();
        assert_eq!(co.kind, CheckoutKind::Git);
        assert_eq!(co.current_ref.as_deref(), Some(head.as_str()));
        assert!(!co.is_dirty);

        std::fs::write(repo.path().join("README.md"), "changed\n").unwrap();
        let co = git.inspect(repo.path()).await.unwrap().unwrap();
        assert!(co.is_dirty);
    }

    #[tokio::test]
    async fn untracked_files_do_not_make_checkout_dirty() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("scratch.txt"), "x").unwrap();
        let co = CliGit::new().inspect(repo.path()).await.unwrap().unwrap();
        assert!(!co.is_dirty);
    }

    #[tokio::test]
    async fn resolve_local_handles_prefix_and_unknown_refs() {
        let repo = make_git_repo();
        let head = run_git(repo.path(), &["rev-parse", "HEAD"]);
        run_git(repo.path(), &["tag", "v1.0"]);
        let git = CliGit::new();

        assert_eq!(
            git.resolve_local(repo.path(), &head[..8]).await.unwrap().as_deref(),
            Some(head.as_str())
        );
        assert_eq!(
            git.resolve_local(repo.path(), "v1.0").await.unwrap().as_deref(),
            Some(head.as_str())
        );
        assert_eq!(git.resolve_local(repo.path(), "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn branch_names_never_resolve_offline() {
        let repo = make_git_repo();
        let git = CliGit::new();

        assert_eq!(git.resolve_local(repo.path(), "main").await.unwrap(), None);
        assert_eq!(
            git.resolve_local(repo.path(), "refs/heads/main").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn fetched_tag_is_kept_for_offline_resolution() {
        let upstream = make_git_repo();
        run_git(upstream.path(), &["tag", "-a", "v1.0", "-m", "release 1.0"]);
        let tagged = run_git(upstream.path(), &["rev-parse", "HEAD"]);
        std::fs::write(upstream.path().join("NEXT.md"), "next\n").unwrap();
        run_git(upstream.path(), &["add", "NEXT.md"]);
        run_git(upstream.path(), &["commit", "-m", "after tag"]);

        let url = format!("file://{}", upstream.path().display());
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("OCA_web");
        let spec = spec_for(&url, Some("main"));
        let git = CliGit::new();
        git.clone_fresh(&spec, &dest).await.unwrap();
        assert_eq!(git.resolve_local(&dest, "v1.0").await.unwrap(), None);

        let fetched = git.fetch(&spec, &dest, "v1.0").await.unwrap();
        assert_eq!(fetched, tagged, "annotated tag is peeled to its commit");
        assert_eq!(
            git.resolve_local(&dest, "v1.0").await.unwrap().as_deref(),
            Some(tagged.as_str())
        );
    }

    #[tokio::test]
    async fn clone_fetch_and_checkout_branch() {
        let upstream = make_git_repo();
        let url = format!("file://{}", upstream.path().display());
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("OCA_web");
        let spec = spec_for(&url, Some("main"));
        let git = CliGit::new();

        git.clone_fresh(&spec, &dest).await.unwrap();
        let first = git.inspect(&dest).await.unwrap().unwrap();

        std::fs::write(upstream.path().join("CHANGES.md"), "v2\n").unwrap();
        run_git(upstream.path(), &["add", "CHANGES.md"]);
        run_git(upstream.path(), &["commit", "-m", "second"]);
        let new_head = run_git(upstream.path(), &["rev-parse", "HEAD"]);

        let fetched = git.fetch(&spec, &dest, "main").await.unwrap();
        assert_eq!(fetched, new_head);
        git.checkout_branch(&spec, &dest, "main", &fetched).await.unwrap();

        let second = git.inspect(&dest).await.unwrap().unwrap();
        assert_ne!(first.current_ref, second.current_ref);
        assert_eq!(second.current_ref.as_deref(), Some(new_head.as_str()));
    }

    #[tokio::test]
    async fn clone_of_missing_branch_is_invalid_ref() {
        let upstream = make_git_repo();
        let url = format!("file://{}", upstream.path().display());
        let work = tempfile::tempdir().unwrap();
        let spec = spec_for(&url, Some("99.0"));

        let err = CliGit::new()
            .clone_fresh(&spec, &work.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRef { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn discard_changes_resets_worktree() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("README.md"), "changed\n").unwrap();
        let spec = spec_for("file:///unused", Some("main"));
        let git = CliGit::new();

        git.discard_changes(&spec, repo.path()).await.unwrap();
        let co = git.inspect(repo.path()).await.unwrap().unwrap();
        assert!(!co.is_dirty);
    }
}
