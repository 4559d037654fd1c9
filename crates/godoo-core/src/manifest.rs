//! `odoo_manifest.yml` loading.
//!
//! ```yaml
//! odoo:
//!   url: https://github.com/odoo/odoo.git
//!   branch: "16.0"
//! thirdparty:
//!   OCA:
//!     - url: https://github.com/OCA/web.git
//!       commit: abc123
//! ```
//!
//! Group order is preserved from the document so that sync logging and
//! reports are deterministic.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{ManifestError, ManifestResult};
use crate::git::url::GitUrl;

/// Name given to the main application source.
pub const MAIN_SOURCE_NAME: &str = "odoo";

/// Branch assumed when the main source declares none.
pub const FALLBACK_BRANCH: &str = "master";

/// One source repository declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    /// Folder name: `odoo` for the main source, `<group>_<slug>` otherwise.
    pub name: String,
    pub url: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl RepositorySpec {
    pub fn git_url(&self) -> Option<GitUrl> {
        GitUrl::parse(&self.url)
    }

    /// The ref to materialize: the pinned commit if any, else the branch.
    pub fn effective_ref(&self) -> &str {
        self.commit
            .as_deref()
            .or(self.branch.as_deref())
            .unwrap_or_default()
    }
}

/// A named group of third-party repositories (e.g. `OCA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoGroup {
    pub name: String,
    pub repos: Vec<RepositorySpec>,
}

/// Parsed manifest; immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub main: RepositorySpec,
    pub groups: Vec<RepoGroup>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> ManifestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&text)?;
        debug!(
            path = %path.display(),
            groups = manifest.groups.len(),
            repos = manifest.thirdparty().count(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> ManifestResult<Self> {
        if text.trim().is_empty() {
            return Err(ManifestError::MissingMain);
        }
        let doc: Value = serde_yaml::from_str(text)
            .map_err(|e| ManifestError::Malformed(format!("invalid YAML: {e}")))?;
        let root = match doc {
            Value::Mapping(m) => m,
            Value::Null => return Err(ManifestError::MissingMain),
            _ => {
                return Err(ManifestError::Malformed(
                    "top level must be a mapping".to_string(),
                ))
            }
        };

        let main_node = root.get("odoo").ok_or(ManifestError::MissingMain)?;
        if main_node.is_null() {
            return Err(ManifestError::MissingMain);
        }
        let main = parse_entry(main_node, MAIN_SOURCE_NAME.to_string(), None)?;
        let default_branch = main
            .branch
            .clone()
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string());

        let groups = match root.get("thirdparty") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Mapping(groups)) => parse_groups(groups, &default_branch)?,
            Some(_) => {
                return Err(ManifestError::Malformed(
                    "'thirdparty' must map group names to lists".to_string(),
                ))
            }
        };

        let mut seen = HashSet::new();
        seen.insert(main.name.clone());
        for spec in groups.iter().flat_map(|g| g.repos.iter()) {
            if !seen.insert(spec.name.clone()) {
                return Err(ManifestError::Malformed(format!(
                    "duplicate repository folder '{}'",
                    spec.name
                )));
            }
        }

        Ok(Self { main, groups })
    }

    /// All third-party repositories in document order.
    pub fn thirdparty(&self) -> impl Iterator<Item = &RepositorySpec> {
        self.groups.iter().flat_map(|g| g.repos.iter())
    }

    /// Folder names declared under the third-party root.
    pub fn declared_folders(&self) -> HashSet<String> {
        self.thirdparty().map(|r| r.name.clone()).collect()
    }
}

fn parse_groups(groups: &Mapping, default_branch: &str) -> ManifestResult<Vec<RepoGroup>> {
    let mut out = Vec::with_capacity(groups.len());
    for (key, value) in groups {
        let group = scalar_string(key)
            .ok_or_else(|| ManifestError::Malformed("group names must be strings".to_string()))?;
        let entries = match value {
            Value::Sequence(seq) => seq.as_slice(),
            Value::Null => &[][..],
            _ => {
                return Err(ManifestError::Malformed(format!(
                    "group '{group}' must be a list of repositories"
                )))
            }
        };

        let mut repos = Vec::with_capacity(entries.len());
        for entry in entries {
            let url = entry
                .get("url")
                .and_then(scalar_string)
                .ok_or_else(|| ManifestError::Malformed(format!("entry in '{group}' has no url")))?;
            let slug = GitUrl::parse(&url)
                .map(|u| u.name().to_string())
                .ok_or_else(|| ManifestError::Malformed(format!("unparseable url '{url}'")))?;
            repos.push(parse_entry(
                entry,
                format!("{group}_{slug}"),
                Some(default_branch),
            )?);
        }
        out.push(RepoGroup { name: group, repos });
    }
    Ok(out)
}

fn parse_entry(
    node: &Value,
    name: String,
    default_branch: Option<&str>,
) -> ManifestResult<RepositorySpec> {
    if !node.is_mapping() {
        return Err(ManifestError::Malformed(format!(
            "'{name}' must be a mapping with url/branch/commit"
        )));
    }
    let url = node
        .get("url")
        .and_then(scalar_string)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ManifestError::Malformed(format!("'{name}' has no url")))?;
    let commit = node.get("commit").and_then(scalar_string).filter(|c| !c.is_empty());
    let branch = node
        .get("branch")
        .and_then(scalar_string)
        .filter(|b| !b.is_empty())
        .or_else(|| default_branch.map(str::to_string));

    if branch.is_none() && commit.is_none() {
        return Err(ManifestError::Malformed(format!(
            "'{name}' declares neither branch nor commit"
        )));
    }

    Ok(RepositorySpec {
        name,
        url,
        branch,
        commit,
    })
}

/// Unquoted `16.0` or an all-digit commit prefix parse as numbers in YAML.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
