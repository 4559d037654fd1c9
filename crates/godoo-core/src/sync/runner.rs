//! Bounded concurrent fan-out of sync jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

use super::report::{RepoOutcome, SyncReport};
use super::synchronizer::RepoSynchronizer;
use super::SyncJob;
use crate::error::SyncError;

/// Runs jobs with at most `concurrency` in flight, each under its own deadline.
///
/// Every job produces exactly one [`RepoOutcome`], in submission order.
pub struct SyncRunner {
    synchronizer: Arc<RepoSynchronizer>,
}

impl SyncRunner {
    pub fn new(synchronizer: Arc<RepoSynchronizer>) -> Self {
        Self { synchronizer }
    }

    pub async fn run(&self, jobs: Vec<SyncJob>) -> SyncReport {
        self.run_until(jobs, async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Like [`run`](Self::run) but cancelled when `cancel` resolves.
    ///
    /// In-flight tasks are aborted; their staging directories are dropped
    /// with them, so no target directory is left half-written.
    pub async fn run_until<C>(&self, jobs: Vec<SyncJob>, cancel: C) -> SyncReport
    where
        C: Future<Output = ()>,
    {
        let mut report = SyncReport::new(Utc::now());
        let options = self.synchronizer.options().clone();
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let timeout = options.timeout;

        let mut join_set = JoinSet::new();
        for (idx, job) in jobs.iter().cloned().enumerate() {
            let synchronizer = Arc::clone(&self.synchronizer);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, synchronizer.ensure(&job)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout {
                        repo: job.spec.name.clone(),
                        secs: timeout.as_secs(),
                    }),
                };
                (idx, result, started.elapsed())
            });
        }

        let mut slots: Vec<Option<RepoOutcome>> = vec![None; jobs.len()];
        tokio::pin!(cancel);
        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    let (idx, result, elapsed) = match joined {
                        Ok(v) => v,
                        Err(e) if e.is_cancelled() => continue,
                        Err(e) => {
                            error!(error = %e, "sync task failed to join");
                            continue;
                        }
                    };
                    let job = &jobs[idx];
                    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                    let outcome = match result {
                        Ok((action, checkout)) => RepoOutcome {
                            name: job.spec.name.clone(),
                            path: job.path.clone(),
                            mandatory: job.mandatory,
                            action: Some(action),
                            current_ref: checkout.current_ref,
                            error: None,
                            elapsed_ms,
                        },
                        Err(e) => {
                            if job.mandatory {
                                error!(repo = %job.spec.name, error = %e, "mandatory source failed");
                            } else {
                                warn!(repo = %job.spec.name, error = %e, "source failed");
                            }
                            RepoOutcome {
                                name: job.spec.name.clone(),
                                path: job.path.clone(),
                                mandatory: job.mandatory,
                                action: None,
                                current_ref: None,
                                error: Some(e.to_string()),
                                elapsed_ms,
                            }
                        }
                    };
                    slots[idx] = Some(outcome);
                }
                _ = &mut cancel, if !report.cancelled => {
                    warn!("interrupt received, aborting in-flight sources");
                    report.cancelled = true;
                    join_set.abort_all();
                }
            }
        }

        let unfinished = if report.cancelled {
            SyncError::Cancelled.to_string()
        } else {
            "sync task aborted".to_string()
        };
        report.repos = jobs
            .iter()
            .zip(slots)
            .map(|(job, slot)| {
                slot.unwrap_or_else(|| RepoOutcome {
                    name: job.spec.name.clone(),
                    path: job.path.clone(),
                    mandatory: job.mandatory,
                    action: None,
                    current_ref: None,
                    error: Some(unfinished.clone()),
                    elapsed_ms: 0,
                })
            })
            .collect();
        report.finished_at = Utc::now();
        report
    }
}
