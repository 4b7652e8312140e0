use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::job::Job;
use crate::phase::Phase;

/// Observability record for one stalled-job kill attempt, produced whether
/// or not the kill succeeded.
#[derive(Debug, Clone)]
pub struct ReapReport {
    pub pid: u32,
    pub plot_id: String,
    pub phase: Phase,
    pub dstdir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
    pub stalled_for: Option<Duration>,
    pub killed: bool,
}

/// Kill every job whose log has been silent past the stalled threshold.
///
/// Best effort: a job that cannot be killed is reported and skipped, never
/// blocking evaluation of the rest.
pub fn reap_stalled(jobs: &mut [Job]) -> Vec<ReapReport> {
    let stalled: Vec<&mut Job> = jobs.iter_mut().filter(|j| j.is_stalled()).collect();
    if !stalled.is_empty() {
        tracing::info!(count = stalled.len(), "Stalled jobs detected");
    }

    let mut reports = Vec::new();
    for job in stalled {
        let outcome = job.kill();
        let killed = outcome.is_ok();
        match outcome {
            Ok(removed) => {
                tracing::info!(
                    pid = job.pid,
                    plot_id = %job.short_id(),
                    phase = %job.phase,
                    dst = %job.dstdir.display(),
                    created_at = %job.started_at,
                    last_update = ?job.last_update,
                    stalled_min = job.staleness.map(|s| s.as_secs() / 60),
                    removed_files = removed,
                    "Killed stalled plot job"
                );
            }
            Err(e) => {
                tracing::warn!(
                    pid = job.pid,
                    plot_id = %job.short_id(),
                    error = %e,
                    "Failed to kill stalled job"
                );
            }
        }
        reports.push(ReapReport {
            pid: job.pid,
            plot_id: job.plot_id.clone(),
            phase: job.phase,
            dstdir: job.dstdir.clone(),
            created_at: job.started_at,
            last_update: job.last_update,
            stalled_for: job.staleness,
            killed,
        });
    }
    reports
}
