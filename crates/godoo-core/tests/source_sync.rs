//! End-to-end source sync against real local git repositories.
//!
//! Upstreams are created with the `git` binary and referenced through
//! `file://` URLs; a counting wrapper around [`CliGit`] records how many
//! transport and checkout operations each run performed.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use godoo_core::error::{SyncError, SyncResult};
use godoo_core::git::{CliGit, LocalCheckout, SourceBackend};
use godoo_core::manifest::{Manifest, RepositorySpec};
use godoo_core::sync::{
    ArchiveSource, DirtyPolicy, PinOptions, SourceSync, SyncAction, SyncMode, SyncRequest,
};
use godoo_core::GodooConfig;

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
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

/// Create `<root>/<name>` as a repository on branch `main` with one commit.
fn make_upstream(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    run_git(&dir, &["init", "--initial-branch=main"]);
    run_git(&dir, &["config", "user.name", "test-user"]);
    run_git(&dir, &["config", "user.email", "test@example.com"]);
    for (path, contents) in files {
        let file = dir.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, contents).unwrap();
    }
    run_git(&dir, &["add", "."]);
    run_git(&dir, &["commit", "-m", "initial"]);
    dir
}

fn commit_file(repo: &Path, path: &str, contents: &str) -> String {
    std::fs::write(repo.join(path), contents).unwrap();
    run_git(repo, &["add", path]);
    run_git(repo, &["commit", "-m", &format!("update {path}")]);
    run_git(repo, &["rev-parse", "HEAD"])
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[derive(Default)]
struct Counts {
    clones: AtomicUsize,
    fetches: AtomicUsize,
    checkouts: AtomicUsize,
    discards: AtomicUsize,
}

/// [`CliGit`] with call counters.
struct CountingGit {
    inner: CliGit,
    counts: Arc<Counts>,
}

#[async_trait]
impl SourceBackend for CountingGit {
    async fn inspect(&self, path: &Path) -> SyncResult<Option<LocalCheckout>> {
        self.inner.inspect(path).await
    }

    async fn resolve_local(&self, path: &Path, reference: &str) -> SyncResult<Option<String>> {
        self.inner.resolve_local(path, reference).await
    }

    async fn clone_fresh(&self, spec: &RepositorySpec, dest: &Path) -> SyncResult<()> {
        self.counts.clones.fetch_add(1, Ordering::SeqCst);
        self.inner.clone_fresh(spec, dest).await
    }

    async fn fetch(&self, spec: &RepositorySpec, path: &Path, reference: &str) -> SyncResult<String> {
        self.counts.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(spec, path, reference).await
    }

    async fn checkout_detached(&self, spec: &RepositorySpec, path: &Path, commit: &str) -> SyncResult<()> {
        self.counts.checkouts.fetch_add(1, Ordering::SeqCst);
        self.inner.checkout_detached(spec, path, commit).await
    }

    async fn checkout_branch(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        branch: &str,
        commit: &str,
    ) -> SyncResult<()> {
        self.counts.checkouts.fetch_add(1, Ordering::SeqCst);
        self.inner.checkout_branch(spec, path, branch, commit).await
    }

    async fn discard_changes(&self, spec: &RepositorySpec, path: &Path) -> SyncResult<()> {
        self.counts.discards.fetch_add(1, Ordering::SeqCst);
        self.inner.discard_changes(spec, path).await
    }
}

/// Archive source writing a fixed snapshot instead of downloading.
#[derive(Default)]
struct StaticArchive {
    calls: AtomicUsize,
}

#[async_trait]
impl ArchiveSource for StaticArchive {
    async fn fetch_snapshot(&self, _spec: &RepositorySpec, _url: &str, dest: &Path) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(dest.join("web_widget")).unwrap();
        std::fs::write(dest.join("web_widget/__manifest__.py"), "{}").unwrap();
        Ok(())
    }
}

struct Fixture {
    _upstreams: tempfile::TempDir,
    _workspace: tempfile::TempDir,
    odoo_upstream: PathBuf,
    web_upstream: PathBuf,
    pin: String,
    config: GodooConfig,
    counts: Arc<Counts>,
}

impl Fixture {
    fn new() -> Self {
        let upstreams = tempfile::tempdir().unwrap();
        let odoo_upstream = make_upstream(
            upstreams.path(),
            "odoo",
            &[
                ("odoo-bin", "#!/usr/bin/env python3\n"),
                ("odoo/release.py", "version_info = (16, 0, 0, 'final', 0, '')\n"),
                ("addons/base_x/__manifest__.py", "{}"),
            ],
        );
        let web_upstream = make_upstream(
            upstreams.path(),
            "web",
            &[("web_widget/__manifest__.py", "{'version': '16.0.1.0.0'}")],
        );
        let pin = run_git(&web_upstream, &["rev-parse", "HEAD"]);
        // Upstream moves on past the pin.
        commit_file(&web_upstream, "CHANGELOG.md", "later\n");

        let workspace = tempfile::tempdir().unwrap();
        let config = GodooConfig {
            odoo_main: workspace.path().join("odoo"),
            thirdparty_root: workspace.path().join("thirdparty"),
            workspace_addons: workspace.path().join("workspace"),
            conf_path: workspace.path().join("odoo.conf"),
            sync_concurrency: 2,
            ..GodooConfig::default()
        };

        Self {
            _upstreams: upstreams,
            _workspace: workspace,
            odoo_upstream,
            web_upstream,
            pin,
            config,
            counts: Arc::new(Counts::default()),
        }
    }

    fn manifest(&self) -> Manifest {
        Manifest::parse(&format!(
            "odoo:\n  url: {}\n  branch: main\nthirdparty:\n  OCA:\n    - url: {}\n      commit: {}\n",
            file_url(&self.odoo_upstream),
            file_url(&self.web_upstream),
            self.pin
        ))
        .unwrap()
    }

    fn sync(&self) -> SourceSync<'_> {
        SourceSync::new(
            &self.config,
            Arc::new(CountingGit {
                inner: CliGit::new(),
                counts: Arc::clone(&self.counts),
            }),
            Arc::new(StaticArchive::default()),
        )
    }

    fn clones(&self) -> usize {
        self.counts.clones.load(Ordering::SeqCst)
    }

    fn fetches(&self) -> usize {
        self.counts.fetches.load(Ordering::SeqCst)
    }

    fn web_path(&self) -> PathBuf {
        self.config.thirdparty_root.join("OCA_web")
    }
}

#[tokio::test]
async fn second_run_fetches_branch_and_skips_pinned_repo() {
    let fx = Fixture::new();
    let manifest = fx.manifest();

    let first = fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();
    first.check().unwrap();
    assert_eq!(fx.clones(), 2);
    assert_eq!(first.count(SyncAction::Cloned), 2);
    assert_eq!(run_git(&fx.web_path(), &["rev-parse", "HEAD"]), fx.pin);
    assert!(fx.config.odoo_main.join("odoo/release.py").is_file());

    let checkouts_after_first = fx.counts.checkouts.load(Ordering::SeqCst);
    let second = fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();
    second.check().unwrap();

    assert_eq!(fx.clones(), 2, "no new clones");
    assert_eq!(fx.fetches(), 1, "only the branch-tracking main source fetches");
    assert_eq!(
        fx.counts.checkouts.load(Ordering::SeqCst),
        checkouts_after_first + 1,
        "pinned repo is not checked out again"
    );
    assert_eq!(second.outcome("OCA_web").unwrap().action, Some(SyncAction::Skipped));
    assert_eq!(second.outcome("odoo").unwrap().action, Some(SyncAction::Updated));
}

#[tokio::test]
async fn branch_update_moves_main_to_new_upstream_head() {
    let fx = Fixture::new();
    let manifest = fx.manifest();
    fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();

    let new_head = commit_file(&fx.odoo_upstream, "NEWS.md", "16.0 news\n");
    let report = fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();
    report.check().unwrap();

    assert_eq!(run_git(&fx.config.odoo_main, &["rev-parse", "HEAD"]), new_head);
    assert_eq!(
        run_git(&fx.config.odoo_main, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "main"
    );
}

#[tokio::test]
async fn dirty_main_source_fails_run_unless_discarded() {
    let fx = Fixture::new();
    let manifest = fx.manifest();
    fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();

    let release = fx.config.odoo_main.join("odoo/release.py");
    std::fs::write(&release, "local edit\n").unwrap();

    let report = fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();
    let err = report.check().unwrap_err();
    assert!(matches!(err, SyncError::MandatoryFailed { ref repo, .. } if repo == "odoo"));
    assert_eq!(std::fs::read_to_string(&release).unwrap(), "local edit\n");

    let request = SyncRequest {
        dirty_policy: DirtyPolicy::Discard,
        ..SyncRequest::default()
    };
    let report = fx.sync().run(&manifest, request).await.unwrap();
    report.check().unwrap();
    assert_eq!(fx.counts.discards.load(Ordering::SeqCst), 1);
    assert!(std::fs::read_to_string(&release)
        .unwrap()
        .starts_with("version_info"));
}

#[tokio::test]
async fn optional_failure_is_partial_success() {
    let fx = Fixture::new();
    let manifest = Manifest::parse(&format!(
        "odoo:\n  url: {}\n  branch: main\nthirdparty:\n  OCA:\n    - url: {}\n      branch: no-such-branch\n",
        file_url(&fx.odoo_upstream),
        file_url(&fx.web_upstream),
    ))
    .unwrap();

    let report = fx.sync().run(&manifest, SyncRequest::default()).await.unwrap();
    report.check().unwrap();
    let web = report.outcome("OCA_web").unwrap();
    assert!(web.is_failed());
    assert!(!fx.web_path().exists(), "no partial checkout at the target");
    assert_eq!(report.count(SyncAction::Cloned), 1);
}

#[tokio::test]
async fn remove_unspecified_deletes_only_undeclared_folders() {
    let fx = Fixture::new();
    let manifest = fx.manifest();
    let stale = fx.config.thirdparty_root.join("OCA_stale");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::create_dir_all(fx.config.zip_target()).unwrap();

    let request = SyncRequest {
        remove_unspecified: true,
        ..SyncRequest::default()
    };
    let report = fx.sync().run(&manifest, request).await.unwrap();
    report.check().unwrap();

    assert_eq!(report.removed, vec![stale.clone()]);
    assert!(!stale.exists());
    assert!(fx.web_path().is_dir());
    assert!(fx.config.zip_target().is_dir());
}

#[tokio::test]
async fn held_lock_fails_the_run() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.config.thirdparty_root).unwrap();
    std::fs::write(fx.config.thirdparty_root.join(".godoo.lock"), "1234\n").unwrap();

    let err = fx
        .sync()
        .run(&fx.manifest(), SyncRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Locked(_)));
    assert_eq!(fx.clones(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn odoo_bin_is_made_executable() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let request = SyncRequest {
        mode: SyncMode::Odoo,
        ..SyncRequest::default()
    };
    fx.sync().run(&fx.manifest(), request).await.unwrap();

    let mode = std::fs::metadata(fx.config.odoo_bin())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o111, 0o111);
    assert!(!fx.web_path().exists());
}

#[tokio::test]
async fn conf_addons_path_is_updated_after_sync() {
    let fx = Fixture::new();
    std::fs::write(&fx.config.conf_path, "[options]\ndb_host = db\n").unwrap();

    fx.sync().run(&fx.manifest(), SyncRequest::default()).await.unwrap();

    let conf = std::fs::read_to_string(&fx.config.conf_path).unwrap();
    let line = conf
        .lines()
        .find(|l| l.starts_with("addons_path"))
        .unwrap();
    assert!(line.contains(&fx.config.odoo_main.join("addons").display().to_string()));
    assert!(line.contains(&fx.web_path().display().to_string()));
}

#[tokio::test]
async fn archive_mode_snapshot_is_skipped_when_stamp_matches() {
    let fx = Fixture::new();
    let archive = Arc::new(StaticArchive::default());
    let config = GodooConfig {
        archive_mode: true,
        ..fx.config.clone()
    };
    let manifest = Manifest::parse(
        "odoo:\n  url: https://github.com/odoo/odoo.git\n  branch: \"16.0\"\nthirdparty:\n  OCA:\n    - url: https://github.com/OCA/web.git\n      commit: 0123456789abcdef0123456789abcdef01234567\n",
    )
    .unwrap();
    let request = SyncRequest {
        mode: SyncMode::Thirdparty,
        ..SyncRequest::default()
    };
    let sync = || {
        SourceSync::new(
            &config,
            Arc::new(CliGit::new()),
            Arc::clone(&archive) as Arc<dyn ArchiveSource>,
        )
    };

    let first = sync().run(&manifest, request).await.unwrap();
    first.check().unwrap();
    assert_eq!(first.outcome("OCA_web").unwrap().action, Some(SyncAction::Downloaded));
    let web = config.thirdparty_root.join("OCA_web");
    assert!(web.join("web_widget/__manifest__.py").is_file());
    assert!(!web.join(".git").exists());

    let second = sync().run(&manifest, request).await.unwrap();
    assert_eq!(second.outcome("OCA_web").unwrap().action, Some(SyncAction::Skipped));
    assert_eq!(archive.calls.load(Ordering::SeqCst), 1);
}

fn thirdparty_only() -> SyncRequest {
    SyncRequest {
        mode: SyncMode::Thirdparty,
        ..SyncRequest::default()
    }
}

fn manifest_pinning_web(fx: &Fixture, pin: &str) -> Manifest {
    Manifest::parse(&format!(
        "odoo:\n  url: {}\n  branch: main\nthirdparty:\n  OCA:\n    - url: {}\n      commit: {}\n",
        file_url(&fx.odoo_upstream),
        file_url(&fx.web_upstream),
        pin
    ))
    .unwrap()
}

#[tokio::test]
async fn branch_name_pin_follows_upstream() {
    let fx = Fixture::new();
    let manifest = manifest_pinning_web(&fx, "main");

    fx.sync().run(&manifest, thirdparty_only()).await.unwrap().check().unwrap();
    let upstream_head = run_git(&fx.web_upstream, &["rev-parse", "HEAD"]);
    assert_eq!(run_git(&fx.web_path(), &["rev-parse", "HEAD"]), upstream_head);

    let moved = commit_file(&fx.web_upstream, "NEWS.md", "moved on\n");
    let report = fx.sync().run(&manifest, thirdparty_only()).await.unwrap();
    report.check().unwrap();

    assert_eq!(report.outcome("OCA_web").unwrap().action, Some(SyncAction::Updated));
    assert_eq!(run_git(&fx.web_path(), &["rev-parse", "HEAD"]), moved);
}

#[tokio::test]
async fn tag_pin_is_skipped_once_fetched() {
    let fx = Fixture::new();
    run_git(&fx.web_upstream, &["tag", "-a", "v1.0", "-m", "release 1.0", &fx.pin]);
    let manifest = manifest_pinning_web(&fx, "v1.0");

    let first = fx.sync().run(&manifest, thirdparty_only()).await.unwrap();
    first.check().unwrap();
    assert_eq!(first.outcome("OCA_web").unwrap().action, Some(SyncAction::Cloned));
    assert_eq!(run_git(&fx.web_path(), &["rev-parse", "HEAD"]), fx.pin);
    let fetches_after_first = fx.fetches();

    let second = fx.sync().run(&manifest, thirdparty_only()).await.unwrap();
    second.check().unwrap();

    assert_eq!(second.outcome("OCA_web").unwrap().action, Some(SyncAction::Skipped));
    assert_eq!(fx.fetches(), fetches_after_first, "no transport call for a known tag");
}

#[tokio::test]
async fn force_fetch_contacts_remote_for_repo_at_its_pin() {
    let fx = Fixture::new();
    run_git(&fx.web_upstream, &["tag", "-a", "v1.0", "-m", "release 1.0", &fx.pin]);
    let manifest = manifest_pinning_web(&fx, "v1.0");
    fx.sync().run(&manifest, thirdparty_only()).await.unwrap().check().unwrap();
    let fetches_before = fx.fetches();

    let request = SyncRequest {
        force_fetch: true,
        ..thirdparty_only()
    };
    let report = fx.sync().run(&manifest, request).await.unwrap();
    report.check().unwrap();

    assert_eq!(report.outcome("OCA_web").unwrap().action, Some(SyncAction::Updated));
    assert_eq!(fx.fetches(), fetches_before + 1);
    assert_eq!(run_git(&fx.web_path(), &["rev-parse", "HEAD"]), fx.pin);
}

#[tokio::test]
async fn pin_commits_writes_checked_out_heads_to_manifest() {
    let mut fx = Fixture::new();
    let manifest_path = fx.config.thirdparty_root.with_file_name("odoo_manifest.yml");
    std::fs::write(
        &manifest_path,
        format!(
            "odoo:\n  url: {}\n  branch: main\nthirdparty:\n  OCA:\n    # tracked until release\n    - url: {}\n",
            file_url(&fx.odoo_upstream),
            file_url(&fx.web_upstream),
        ),
    )
    .unwrap();
    fx.config.manifest_path = manifest_path.clone();
    let request = SyncRequest {
        pins: PinOptions {
            pin_commits: true,
            compare_comments: true,
        },
        ..thirdparty_only()
    };

    let manifest = Manifest::load(&manifest_path).unwrap();
    let report = fx.sync().run(&manifest, request).await.unwrap();
    report.check().unwrap();
    assert!(report.manifest_updated);

    let upstream_head = run_git(&fx.web_upstream, &["rev-parse", "HEAD"]);
    let text = std::fs::read_to_string(&manifest_path).unwrap();
    assert!(text.contains("    # tracked until release\n"));
    // file:// remotes have no compare page.
    assert!(text.ends_with(&format!("      commit: {upstream_head}\n")));

    let pinned = Manifest::load(&manifest_path).unwrap();
    let web = pinned.thirdparty().find(|r| r.name == "OCA_web").unwrap();
    assert_eq!(web.commit.as_deref(), Some(upstream_head.as_str()));

    let again = fx.sync().run(&pinned, request).await.unwrap();
    assert!(!again.manifest_updated);
    assert_eq!(again.outcome("OCA_web").unwrap().action, Some(SyncAction::Skipped));
}
