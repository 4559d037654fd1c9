//! Ref resolution: decide what a source needs before touching the network.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncResult;
use crate::git::{CheckoutKind, LocalCheckout, SourceBackend};
use crate::manifest::RepositorySpec;

/// Shortest hex prefix accepted as a commit abbreviation.
pub const MIN_PIN_PREFIX: usize = 7;

/// Ref to materialize in an existing checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ref")]
pub enum TargetRef {
    Commit(String),
    BranchHead(String),
}

impl TargetRef {
    pub fn as_str(&self) -> &str {
        match self {
            TargetRef::Commit(r) | TargetRef::BranchHead(r) => r,
        }
    }
}

/// Outcome of ref resolution for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    /// Checkout is clean and at the pinned commit; no transport call.
    Skip,
    CloneFresh,
    FetchAndCheckout(TargetRef),
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether `pin` reads as a full or abbreviated commit id.
pub fn is_commit_id(pin: &str) -> bool {
    pin.len() >= MIN_PIN_PREFIX && is_hex(pin)
}

/// Whether `pin` designates `head`.
///
/// `resolved_pin` is the pin resolved against local objects, if known.
pub fn pin_matches(pin: &str, head: &str, resolved_pin: Option<&str>) -> bool {
    let pin = pin.trim();
    if pin.eq_ignore_ascii_case(head) {
        return true;
    }
    if is_commit_id(pin)
        && head
            .get(..pin.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(pin))
    {
        return true;
    }
    resolved_pin.is_some_and(|r| r.eq_ignore_ascii_case(head))
}

/// Pure decision table.
///
/// - no checkout: `CloneFresh`
/// - commit pinned, clean checkout at that commit: `Skip`
/// - commit pinned otherwise: `FetchAndCheckout(Commit)`
/// - branch only: always `FetchAndCheckout(BranchHead)`
pub fn decide(
    spec: &RepositorySpec,
    checkout: Option<&LocalCheckout>,
    resolved_pin: Option<&str>,
) -> SyncDecision {
    let Some(checkout) = checkout else {
        return SyncDecision::CloneFresh;
    };

    if let Some(pin) = spec.commit.as_deref() {
        let at_pin = checkout
            .current_ref
            .as_deref()
            .is_some_and(|head| pin_matches(pin, head, resolved_pin));
        if at_pin && !checkout.is_dirty {
            return SyncDecision::Skip;
        }
        return SyncDecision::FetchAndCheckout(TargetRef::Commit(pin.to_string()));
    }

    match spec.branch.as_deref() {
        Some(branch) => SyncDecision::FetchAndCheckout(TargetRef::BranchHead(branch.to_string())),
        // Manifest loading guarantees branch or commit; treat as fresh otherwise.
        None => SyncDecision::CloneFresh,
    }
}

/// Inspect `path` and decide, resolving the pin offline when needed.
///
/// Only commit ids and tags resolve offline; a branch-name pin fetches on
/// every run.
pub async fn resolve(
    backend: &dyn SourceBackend,
    spec: &RepositorySpec,
    path: &Path,
) -> SyncResult<(Option<LocalCheckout>, SyncDecision)> {
    let checkout = backend.inspect(path).await?;

    let resolved_pin = match (&checkout, spec.commit.as_deref()) {
        (Some(co), Some(pin)) if co.kind == CheckoutKind::Git => {
            let quick = co
                .current_ref
                .as_deref()
                .is_some_and(|head| pin_matches(pin, head, None));
            if quick {
                None
            } else {
                backend.resolve_local(path, pin).await?
            }
        }
        _ => None,
    };

    let decision = decide(spec, checkout.as_ref(), resolved_pin.as_deref());
    debug!(repo = %spec.name, ?decision, "resolved");
    Ok((checkout, decision))
}
