//! Zip addon drops: unpack Odoo modules shipped as `*.zip` files.
//!
//! Modules (directories holding `__manifest__.py`) are detected at the
//! archive root or one level down. A single-module archive lands in
//! `<target>/single_mods/<module>`, a multi-module one in
//! `<target>/<zip stem>/<module>`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

const MANIFEST_FILE: &str = "__manifest__.py";
const SINGLE_MODULE_DIR: &str = "single_mods";

/// What happened to one drop file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ZipDropStatus {
    Installed { modules: Vec<String> },
    AlreadyPresent,
    NoModules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipDropOutcome {
    pub archive: PathBuf,
    #[serde(flatten)]
    pub status: ZipDropStatus,
}

/// Module directory prefixes inside the archive, e.g. `"pack/my_mod/"`.
fn module_prefixes<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Vec<String> {
    let mut prefixes = BTreeSet::new();
    for name in archive.file_names() {
        let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
        if parts.last() != Some(&MANIFEST_FILE) {
            continue;
        }
        // mod/__manifest__.py or wrapper/mod/__manifest__.py
        if parts.len() == 2 || parts.len() == 3 {
            let dir = parts[..parts.len() - 1].join("/");
            prefixes.insert(format!("{dir}/"));
        }
    }
    prefixes.into_iter().collect()
}

fn module_name(prefix: &str) -> &str {
    prefix
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(prefix)
}

/// Unpack every `*.zip` in `drop_dir` into `target_root`.
///
/// Idempotent: an archive whose module directories all exist is skipped.
pub fn install_zip_addons(drop_dir: &Path, target_root: &Path) -> SyncResult<Vec<ZipDropOutcome>> {
    if !drop_dir.is_dir() {
        debug!(dir = %drop_dir.display(), "no zip drop directory");
        return Ok(Vec::new());
    }

    let mut archives: Vec<PathBuf> = std::fs::read_dir(drop_dir)
        .map_err(|e| SyncError::io(drop_dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "zip"))
        .collect();
    archives.sort();

    let mut outcomes = Vec::with_capacity(archives.len());
    for archive_path in archives {
        let status = install_one(&archive_path, target_root)?;
        outcomes.push(ZipDropOutcome {
            archive: archive_path,
            status,
        });
    }
    Ok(outcomes)
}

fn install_one(archive_path: &Path, target_root: &Path) -> SyncResult<ZipDropStatus> {
    let label = archive_path.display().to_string();
    let archive_err = |detail: String| SyncError::Archive {
        repo: label.clone(),
        detail,
    };

    let file = std::fs::File::open(archive_path).map_err(|e| SyncError::io(archive_path, e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| archive_err(format!("invalid zip: {e}")))?;

    let prefixes = module_prefixes(&mut archive);
    if prefixes.is_empty() {
        warn!(archive = %label, "no Odoo modules found in zip drop");
        return Ok(ZipDropStatus::NoModules);
    }

    let group_dir = if prefixes.len() == 1 {
        target_root.join(SINGLE_MODULE_DIR)
    } else {
        let stem = archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        target_root.join(stem)
    };

    let targets: Vec<(String, PathBuf)> = prefixes
        .iter()
        .map(|p| (p.clone(), group_dir.join(module_name(p))))
        .collect();
    if targets.iter().all(|(_, dest)| dest.is_dir()) {
        debug!(archive = %label, "zip drop already unpacked");
        return Ok(ZipDropStatus::AlreadyPresent);
    }

    std::fs::create_dir_all(&group_dir).map_err(|e| SyncError::io(&group_dir, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".godoo-zip-")
        .tempdir_in(target_root)
        .map_err(|e| SyncError::io(target_root, e))?;
    archive
        .extract(staging.path())
        .map_err(|e| archive_err(format!("extraction failed: {e}")))?;

    let mut installed = Vec::new();
    for (prefix, dest) in targets {
        if dest.is_dir() {
            continue;
        }
        let src = staging.path().join(prefix.trim_end_matches('/'));
        std::fs::rename(&src, &dest).map_err(|e| SyncError::io(&dest, e))?;
        installed.push(module_name(&prefix).to_string());
    }

    info!(archive = %label, modules = ?installed, "zip addons installed");
    Ok(ZipDropStatus::Installed { modules: installed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::archive::tests::zip_bytes;

    fn drop_zip(dir: &Path, name: &str, files: &[(&str, &str)]) {
        std::fs::write(dir.join(name), zip_bytes(files)).unwrap();
    }

    #[test]
    fn single_module_goes_to_single_mods() {
        let drop = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        drop_zip(
            drop.path(),
            "sale_extra.zip",
            &[("sale_extra/__manifest__.py", "{}"), ("sale_extra/__init__.py", "")],
        );

        let outcomes = install_zip_addons(drop.path(), target.path()).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].status, ZipDropStatus::Installed { .. }));
        assert!(target
            .path()
            .join("single_mods/sale_extra/__manifest__.py")
            .is_file());
    }

    #[test]
    fn multi_module_archive_uses_zip_stem() {
        let drop = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        drop_zip(
            drop.path(),
            "vendor_pack.zip",
            &[
                ("vendor-pack-1.2/mod_a/__manifest__.py", "{}"),
                ("vendor-pack-1.2/mod_b/__manifest__.py", "{}"),
                ("vendor-pack-1.2/README.md", "docs"),
            ],
        );

        install_zip_addons(drop.path(), target.path()).unwrap();
        assert!(target.path().join("vendor_pack/mod_a/__manifest__.py").is_file());
        assert!(target.path().join("vendor_pack/mod_b/__manifest__.py").is_file());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let drop = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        drop_zip(drop.path(), "m.zip", &[("m/__manifest__.py", "{}")]);

        install_zip_addons(drop.path(), target.path()).unwrap();
        let again = install_zip_addons(drop.path(), target.path()).unwrap();
        assert_eq!(again[0].status, ZipDropStatus::AlreadyPresent);
    }

    #[test]
    fn archive_without_modules_is_reported() {
        let drop = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        drop_zip(drop.path(), "docs.zip", &[("docs/index.html", "<html/>")]);

        let outcomes = install_zip_addons(drop.path(), target.path()).unwrap();
        assert_eq!(outcomes[0].status, ZipDropStatus::NoModules);
    }

    #[test]
    fn missing_drop_dir_is_empty() {
        let target = tempfile::tempdir().unwrap();
        let outcomes =
            install_zip_addons(&target.path().join("nope"), target.path()).unwrap();
        assert!(outcomes.is_empty());
    }
}
