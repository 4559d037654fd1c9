//! Odoo module discovery, addons path assembly and `odoo.conf` updates.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::config::GodooConfig;

const MANIFEST_FILE: &str = "__manifest__.py";

/// Modules installed when the workspace has none of its own.
pub const DEFAULT_INIT_MODULES: &[&str] = &["base", "web"];

fn manifest_version_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]version['"]\s*:\s*['"]([^'"]+)['"]"#).ok())
        .as_ref()
}

fn release_version_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"version_info\s*=\s*\(\s*['"]?(?:saas~)?(\d+)"#).ok())
        .as_ref()
}

fn depends_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]depends['"]\s*:\s*\[([^\]]*)\]"#).ok())
        .as_ref()
}

fn python_deps_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]python['"]\s*:\s*\[([^\]]*)\]"#).ok())
        .as_ref()
}

fn quoted_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]([^'"]+)['"]"#).ok())
        .as_ref()
}

pub fn is_module(dir: &Path) -> bool {
    dir.is_dir() && dir.join(MANIFEST_FILE).is_file()
}

/// Module directories directly under `folder`, sorted by name.
pub fn find_modules(folder: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return Vec::new();
    };
    let mut modules: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .filter(|p| is_module(p))
        .collect();
    modules.sort();
    modules
}

fn has_modules(folder: &Path) -> bool {
    !find_modules(folder).is_empty()
}

/// Major series of the Odoo checkout, read from `odoo/release.py`.
pub fn odoo_major_version(odoo_main: &Path) -> Option<u32> {
    let release = odoo_main.join("odoo").join("release.py");
    let text = std::fs::read_to_string(&release).ok()?;
    let caps = release_version_re()?.captures(&text)?;
    caps.get(1)?.as_str().parse().ok()
}

fn manifest_version(module: &Path) -> Option<String> {
    let text = std::fs::read_to_string(module.join(MANIFEST_FILE)).ok()?;
    let caps = manifest_version_re()?.captures(&text)?;
    Some(caps.get(1)?.as_str().to_string())
}

/// Whether a module's manifest version targets Odoo `major`.
///
/// Only full `<series>.<x>.<y>.<z>` versions carry the series; shorter ones
/// such as `1.0` match every release.
fn targets_series(version: Option<&str>, major: u32) -> bool {
    let Some(version) = version else {
        return true;
    };
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() < 5 {
        return true;
    }
    parts[0].parse::<u32>().map_or(true, |series| series == major)
}

/// Names of workspace modules built for `major`, or all when unknown.
pub fn workspace_modules(workspace: &Path, major: Option<u32>) -> Vec<String> {
    find_modules(workspace)
        .into_iter()
        .filter(|m| match major {
            Some(major) => {
                let keep = targets_series(manifest_version(m).as_deref(), major);
                if !keep {
                    debug!(module = %m.display(), major, "skipping module for other series");
                }
                keep
            }
            None => true,
        })
        .filter_map(|m| m.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}

/// Quoted strings of the first `key: [...]` list in a manifest.
fn manifest_list(text: &str, list_re: Option<&Regex>) -> Vec<String> {
    let (Some(list_re), Some(quoted)) = (list_re, quoted_re()) else {
        return Vec::new();
    };
    let Some(body) = list_re.captures(text).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    quoted
        .captures_iter(body.as_str())
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Python packages declared in `external_dependencies` by `modules` and
/// everything they depend on, in discovery order.
///
/// The first addons path providing a module wins; unknown modules are skipped.
pub fn python_requirements(addon_paths: &[PathBuf], modules: &[String]) -> Vec<String> {
    let mut index: HashMap<String, PathBuf> = HashMap::new();
    for module in addon_paths.iter().flat_map(|p| find_modules(p)) {
        if let Some(name) = module.file_name().map(|n| n.to_string_lossy().into_owned()) {
            index.entry(name).or_insert(module);
        }
    }

    let mut queue: VecDeque<String> = modules.iter().cloned().collect();
    let mut seen = HashSet::new();
    let mut packages: Vec<String> = Vec::new();
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let Some(dir) = index.get(&name) else {
            debug!(module = %name, "not on the addons path, no python requirements");
            continue;
        };
        let Ok(text) = std::fs::read_to_string(dir.join(MANIFEST_FILE)) else {
            continue;
        };
        queue.extend(manifest_list(&text, depends_re()));
        for package in manifest_list(&text, python_deps_re()) {
            if !packages.contains(&package) {
                packages.push(package);
            }
        }
    }
    packages
}

/// Modules for `--init`: matching workspace modules or [`DEFAULT_INIT_MODULES`].
pub fn init_modules(config: &GodooConfig) -> Vec<String> {
    let modules = workspace_modules(
        &config.workspace_addons,
        odoo_major_version(&config.odoo_main),
    );
    if modules.is_empty() {
        DEFAULT_INIT_MODULES.iter().map(|m| m.to_string()).collect()
    } else {
        modules
    }
}

fn sorted_subdirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Addons path for odoo-bin, core addons first.
pub fn addon_paths(config: &GodooConfig) -> Vec<PathBuf> {
    let mut paths = vec![
        config.odoo_main.join("addons"),
        config.odoo_main.join("odoo").join("addons"),
    ];
    if has_modules(&config.workspace_addons) {
        paths.push(config.workspace_addons.clone());
    }

    let zip_target = config.zip_target();
    paths.extend(
        sorted_subdirs(&zip_target)
            .into_iter()
            .filter(|d| has_modules(d)),
    );
    paths.extend(
        sorted_subdirs(&config.thirdparty_root)
            .into_iter()
            .filter(|d| *d != zip_target && has_modules(d)),
    );

    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths
}

/// Comma-joined form used by `--addons-path` and `odoo.conf`.
pub fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Rewrite `addons_path` in the `[options]` section of `conf`.
///
/// Other lines are kept verbatim. Returns `false` when `conf` does not exist.
pub fn update_conf_addons_path(conf: &Path, paths: &[PathBuf]) -> std::io::Result<bool> {
    if !conf.is_file() {
        debug!(conf = %conf.display(), "odoo.conf not found, addons path not written");
        return Ok(false);
    }
    let text = std::fs::read_to_string(conf)?;
    let updated = set_option(&text, "addons_path", &join_paths(paths));
    if updated != text {
        std::fs::write(conf, updated)?;
        info!(conf = %conf.display(), count = paths.len(), "addons path written to odoo.conf");
    }
    Ok(true)
}

fn set_option(text: &str, key: &str, value: &str) -> String {
    let line = format!("{key} = {value}");
    let mut out: Vec<String> = Vec::new();
    let mut in_options = false;
    let mut options_seen = false;
    let mut written = false;

    for raw in text.lines() {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            if in_options && !written {
                out.push(line.clone());
                written = true;
            }
            in_options = trimmed == "[options]";
            options_seen |= in_options;
            out.push(raw.to_string());
            continue;
        }
        if in_options {
            let name = trimmed.split(['=', ':']).next().unwrap_or("").trim();
            if name == key {
                if !written {
                    out.push(line.clone());
                    written = true;
                }
                continue;
            }
        }
        out.push(raw.to_string());
    }

    if !written {
        if !options_seen {
            out.push("[options]".to_string());
        }
        out.push(line);
    }
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}
