//! Parsing of git remote URLs (https and scp-like ssh).
//!
//! Used to derive folder names, archive download URLs and compare links.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Transport of a remote URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlScheme {
    Http,
    Https,
    Ssh,
    /// Local `file://` remote (mirrors, tests)
    File,
}

/// Hosting service, detected from the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteHost {
    GitHub,
    GitLab,
    Other,
}

/// A parsed git remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub url: String,
    pub scheme: UrlScheme,
    pub domain: String,
    /// Repository path without leading slash and `.git` suffix (`OCA/web`)
    pub path: String,
    pub user: Option<String>,
    pub port: Option<u16>,
}

fn http_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<scheme>https?)://(?:[^@/]+@)?(?P<domain>[^/]+)(?P<path>.*)$").ok()
    })
    .as_ref()
}

fn file_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^file://(?P<path>/.*)$").ok())
        .as_ref()
}

fn ssh_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:ssh://)?(?P<user>[\w.-]+)@(?P<domain>[^:/]+)[:/](?:(?P<port>\d+)/?)?(?P<path>.*)$",
        )
        .ok()
    })
    .as_ref()
}

impl GitUrl {
    /// Parse an `http(s)://` or `user@host:path` remote URL.
    ///
    /// Returns `None` when the string matches neither form or has an empty path.
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        let http = http_regex().and_then(|re| re.captures(url));
        let (scheme, domain, raw_path, user, port) = if let Some(caps) = http {
            let scheme = if &caps["scheme"] == "https" {
                UrlScheme::Https
            } else {
                UrlScheme::Http
            };
            (
                scheme,
                caps["domain"].to_string(),
                caps["path"].to_string(),
                None,
                None,
            )
        } else if let Some(caps) = file_regex().and_then(|re| re.captures(url)) {
            (
                UrlScheme::File,
                String::new(),
                caps["path"].to_string(),
                None,
                None,
            )
        } else if let Some(caps) = ssh_regex().and_then(|re| re.captures(url)) {
            let port = caps.name("port").and_then(|p| p.as_str().parse().ok());
            (
                UrlScheme::Ssh,
                caps["domain"].to_string(),
                caps["path"].to_string(),
                Some(caps["user"].to_string()),
                port,
            )
        } else {
            return None;
        };

        let path = raw_path
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .trim_start_matches('/')
            .to_string();
        if path.is_empty() {
            return None;
        }

        Some(Self {
            url: url.to_string(),
            scheme,
            domain,
            path,
            user,
            port,
        })
    }

    /// Last path segment (`web` for `OCA/web`)
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_ssh(&self) -> bool {
        self.scheme == UrlScheme::Ssh
    }

    pub fn host(&self) -> RemoteHost {
        if self.scheme == UrlScheme::File {
            RemoteHost::Other
        } else if self.domain.contains("github") {
            RemoteHost::GitHub
        } else if self.domain.contains("gitlab") {
            RemoteHost::GitLab
        } else {
            RemoteHost::Other
        }
    }

    fn web_base(&self) -> String {
        format!("https://{}/{}", self.domain, self.path)
    }

    /// Download URL of a ref-pinned zip snapshot, if the host offers one.
    pub fn archive_url(&self, reference: &str) -> Option<String> {
        if reference.is_empty() || self.is_ssh() {
            return None;
        }
        match self.host() {
            RemoteHost::GitHub => Some(format!("{}/archive/{}.zip", self.web_base(), reference)),
            RemoteHost::GitLab => Some(format!(
                "{}/-/archive/{}/{}.zip",
                self.web_base(),
                reference,
                self.name()
            )),
            RemoteHost::Other => None,
        }
    }

    /// Web link comparing two refs; `None` when both are equal or the host is unknown.
    pub fn compare_url(&self, from: &str, to: &str) -> Option<String> {
        if from == to {
            return None;
        }
        match self.host() {
            RemoteHost::GitHub | RemoteHost::GitLab => {
                Some(format!("{}/compare/{}...{}", self.web_base(), from, to))
            }
            RemoteHost::Other => None,
        }
    }
}
