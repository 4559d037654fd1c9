//! Archive-mode snapshots: download a ref-pinned zip instead of cloning.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::manifest::RepositorySpec;

/// Downloads and unpacks a source snapshot.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch `url` and materialize the repository root at `dest`.
    ///
    /// `dest` does not exist on entry; on success it holds the snapshot
    /// contents without the archive's top-level wrapper directory.
    async fn fetch_snapshot(&self, spec: &RepositorySpec, url: &str, dest: &Path)
        -> SyncResult<()>;
}

/// [`ArchiveSource`] over HTTPS.
pub struct HttpArchive {
    http_client: reqwest::Client,
}

impl HttpArchive {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("godoo/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http_client }
    }
}

impl Default for HttpArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveSource for HttpArchive {
    async fn fetch_snapshot(
        &self,
        spec: &RepositorySpec,
        url: &str,
        dest: &Path,
    ) -> SyncResult<()> {
        info!(repo = %spec.name, url = %url, "downloading archive");
        let network = |e: reqwest::Error| SyncError::NetworkOrAuth {
            repo: spec.name.clone(),
            detail: e.to_string(),
        };

        let response = self.http_client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::InvalidRef {
                repo: spec.name.clone(),
                reference: spec.effective_ref().to_string(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::NetworkOrAuth {
                repo: spec.name.clone(),
                detail: format!("GET {url} returned {status}"),
            });
        }
        let bytes = response.bytes().await.map_err(network)?;
        debug!(repo = %spec.name, size = bytes.len(), "archive downloaded");

        let repo = spec.name.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_snapshot(&repo, &bytes, &dest))
            .await
            .map_err(|e| SyncError::Archive {
                repo: spec.name.clone(),
                detail: format!("extraction task failed: {e}"),
            })?
    }
}

/// Extract `bytes` and move the single top-level directory onto `dest`.
///
/// Work happens in a temporary sibling of `dest`, so nothing appears at
/// `dest` unless extraction completed.
pub fn unpack_snapshot(repo: &str, bytes: &[u8], dest: &Path) -> SyncResult<()> {
    let archive_err = |detail: String| SyncError::Archive {
        repo: repo.to_string(),
        detail,
    };
    let parent = dest
        .parent()
        .ok_or_else(|| archive_err(format!("{} has no parent", dest.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;

    let staging = tempfile::Builder::new()
        .prefix(".godoo-extract-")
        .tempdir_in(parent)
        .map_err(|e| SyncError::io(parent, e))?;

    let zip_path = staging.path().join("snapshot.zip");
    let mut file = std::fs::File::create(&zip_path).map_err(|e| SyncError::io(&zip_path, e))?;
    file.write_all(bytes)
        .map_err(|e| SyncError::io(&zip_path, e))?;
    drop(file);

    let extract_dir = staging.path().join("extract");
    let reader = std::fs::File::open(&zip_path).map_err(|e| SyncError::io(&zip_path, e))?;
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| archive_err(format!("invalid zip: {e}")))?;
    archive
        .extract(&extract_dir)
        .map_err(|e| archive_err(format!("extraction failed: {e}")))?;

    let root = snapshot_root(&extract_dir).map_err(|e| SyncError::io(&extract_dir, e))?;
    std::fs::rename(&root, dest).map_err(|e| SyncError::io(dest, e))?;
    Ok(())
}

/// The wrapper directory forges put around snapshots, or the extract dir itself.
fn snapshot_root(extract_dir: &Path) -> std::io::Result<PathBuf> {
    let entries: Vec<_> = std::fs::read_dir(extract_dir)?.collect::<Result<_, _>>()?;
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(extract_dir.to_path_buf())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use zip::write::SimpleFileOptions;

    /// Build an in-memory zip from `(path, contents)` pairs.
    pub(crate) fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in files {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn unpack_strips_wrapper_directory() {
        let bytes = zip_bytes(&[
            ("web-16.0/README.md", "readme"),
            ("web-16.0/web_widget/__manifest__.py", "{}"),
        ]);
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("OCA_web");

        unpack_snapshot("OCA_web", &bytes, &dest).unwrap();

        assert!(dest.join("README.md").is_file());
        assert!(dest.join("web_widget/__manifest__.py").is_file());
        let leftovers: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("OCA_web")]);
    }

    #[test]
    fn unpack_rejects_garbage() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("x");
        let err = unpack_snapshot("x", b"not a zip", &dest).unwrap_err();
        assert!(matches!(err, SyncError::Archive { .. }));
        assert!(!dest.exists());
    }
}
