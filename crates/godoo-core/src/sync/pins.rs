//! Write-back of commit pins and compare links into `odoo_manifest.yml`.
//!
//! The file is edited line by line so that comments, quoting and key order
//! survive. Only `commit:` lines of third-party entries are touched.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::report::SyncReport;
use super::resolver::is_commit_id;
use crate::error::{SyncError, SyncResult};
use crate::git::url::GitUrl;
use crate::manifest::{Manifest, FALLBACK_BRANCH};

const COMPARE_MARKER: &str = "/compare/";

/// Manifest write-back requested for a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinOptions {
    /// Pin every synced third-party entry to its checked-out commit.
    pub pin_commits: bool,
    /// Annotate each pin with a compare link against the main branch.
    pub compare_comments: bool,
}

impl PinOptions {
    pub fn is_enabled(&self) -> bool {
        self.pin_commits || self.compare_comments
    }
}

/// Rewrite the manifest at `path` from the outcome of a sync.
///
/// Returns whether the file changed.
pub fn write_back(
    path: &Path,
    manifest: &Manifest,
    report: &SyncReport,
    options: PinOptions,
) -> SyncResult<bool> {
    let heads: HashMap<&str, &str> = manifest
        .thirdparty()
        .filter_map(|spec| {
            let outcome = report.outcome(&spec.name).filter(|o| !o.is_failed())?;
            let head = outcome.current_ref.as_deref().filter(|r| is_commit_id(r))?;
            Some((spec.url.as_str(), head))
        })
        .collect();
    let compare_to = manifest.main.branch.as_deref().unwrap_or(FALLBACK_BRANCH);

    let text = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    let updated = rewrite(&text, &heads, compare_to, options);
    if updated == text {
        debug!(path = %path.display(), "manifest pins unchanged");
        return Ok(false);
    }
    std::fs::write(path, updated).map_err(|e| SyncError::io(path, e))?;
    info!(
        path = %path.display(),
        pinned = heads.len(),
        compare = options.compare_comments,
        "manifest updated"
    );
    Ok(true)
}

/// Apply `options` to manifest `text`.
///
/// `heads` maps repository URLs to their checked-out commit; `compare_to`
/// is the branch compare links point at.
pub fn rewrite(
    text: &str,
    heads: &HashMap<&str, &str>,
    compare_to: &str,
    options: PinOptions,
) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 8);
    let mut in_thirdparty = false;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if is_top_level_key(line) {
            in_thirdparty = line.split(':').next().map(str::trim) == Some("thirdparty");
        }
        if in_thirdparty {
            if let Some(key_indent) = item_key_indent(line) {
                let end = item_end(&lines, i + 1, key_indent);
                out.extend(rewrite_item(&lines[i..end], key_indent, heads, compare_to, options));
                i = end;
                continue;
            }
        }
        out.push(line.to_string());
        i += 1;
    }

    let mut rewritten = out.join("\n");
    if text.ends_with('\n') {
        rewritten.push('\n');
    }
    rewritten
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_top_level_key(line: &str) -> bool {
    indent_of(line) == 0
        && !line.is_empty()
        && !line.starts_with('#')
        && !line.starts_with('-')
        && line.contains(':')
}

/// Column of the first key of a `- key: value` sequence item.
fn item_key_indent(line: &str) -> Option<usize> {
    let indent = indent_of(line);
    let rest = line[indent..].strip_prefix('-')?;
    let gap = rest.len() - rest.trim_start_matches(' ').len();
    if gap == 0 || rest.trim().is_empty() {
        return None;
    }
    Some(indent + 1 + gap)
}

/// Index one past the last line belonging to the item started before `from`.
fn item_end(lines: &[&str], from: usize, key_indent: usize) -> usize {
    let mut end = from;
    for (idx, line) in lines.iter().enumerate().skip(from) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) < key_indent {
            break;
        }
        end = idx + 1;
    }
    end
}

struct Field<'a> {
    prefix: &'a str,
    key: &'a str,
    value: &'a str,
    comment: Option<&'a str>,
}

fn field(line: &str, key_start: usize) -> Option<Field<'_>> {
    let prefix = line.get(..key_start)?;
    let rest = line.get(key_start..)?;
    let (key, tail) = rest.split_once(':')?;
    if key.is_empty() || key.starts_with('#') || key.contains(char::is_whitespace) {
        return None;
    }
    let (value, comment) = match tail.find(" #") {
        Some(pos) => (&tail[..pos], Some(tail[pos + 1..].trim())),
        None => (tail, None),
    };
    Some(Field {
        prefix,
        key,
        value: value.trim(),
        comment,
    })
}

fn unquote(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

fn rewrite_item(
    item: &[&str],
    key_indent: usize,
    heads: &HashMap<&str, &str>,
    compare_to: &str,
    options: PinOptions,
) -> Vec<String> {
    let mut out: Vec<String> = item.iter().map(|l| l.to_string()).collect();
    let fields: Vec<Option<Field<'_>>> = item
        .iter()
        .enumerate()
        .map(|(n, line)| {
            if n == 0 || indent_of(line) == key_indent {
                field(line, key_indent)
            } else {
                None
            }
        })
        .collect();
    let position = |key: &str| {
        fields
            .iter()
            .position(|f| f.as_ref().is_some_and(|f| f.key == key))
    };

    let Some(url_at) = position("url") else {
        return out;
    };
    let Some(url) = fields[url_at].as_ref().map(|f| unquote(f.value)) else {
        return out;
    };
    let commit_field = position("commit").and_then(|n| fields[n].as_ref().map(|f| (n, f)));

    let pinned = if options.pin_commits {
        heads.get(url).map(|head| head.to_string())
    } else {
        None
    };
    let current = commit_field
        .map(|(_, f)| f.value.to_string())
        .filter(|v| !v.is_empty());
    let Some(value) = pinned.or(current) else {
        return out;
    };

    let compare = if options.compare_comments {
        GitUrl::parse(url).and_then(|u| u.compare_url(unquote(&value), compare_to))
    } else {
        None
    };
    let comment = match compare {
        Some(link) => Some(format!("# {link}")),
        None => commit_field
            .and_then(|(_, f)| f.comment)
            .filter(|c| !c.contains(COMPARE_MARKER))
            .map(str::to_string),
    };
    let render = |prefix: &str| match &comment {
        Some(comment) => format!("{prefix}commit: {value}  {comment}"),
        None => format!("{prefix}commit: {value}"),
    };

    match commit_field {
        Some((n, f)) => out[n] = render(f.prefix),
        None => out.insert(url_at + 1, render(&" ".repeat(key_indent))),
    }
    out
}
