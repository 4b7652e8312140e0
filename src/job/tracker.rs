use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::job::cmdline::{self, CmdlineError, Grammar};
use crate::job::logfile::RetryPolicy;
use crate::job::Job;
use crate::proc;

/// Scan the OS process table for plotter jobs.
///
/// Processes already tracked in `previous` are carried forward unchanged by
/// pid; their dynamic fields are refreshed separately via [`Job::refresh`].
/// New matches get a full command-line parse and log binding. Previously
/// tracked pids missing from this scan are implicitly dropped.
pub fn discover(logroot: &Path, previous: &[Job]) -> Vec<Job> {
    discover_with(
        logroot,
        previous,
        &RetryPolicy::default(),
        std::thread::sleep,
    )
}

/// [`discover`] with an injectable retry policy and sleep, for tests.
pub fn discover_with(
    logroot: &Path,
    previous: &[Job],
    retry: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> Vec<Job> {
    let cached: HashMap<u32, &Job> = previous.iter().map(|j| (j.pid, j)).collect();
    let grammar = Grammar::latest();
    let mut jobs = Vec::new();

    for snap in proc::scan_processes() {
        if !cmdline::is_plotting_cmdline(&snap.cmdline) {
            continue;
        }

        if let Some(prev) = cached.get(&snap.pid) {
            jobs.push((*prev).clone());
            continue;
        }

        let command = match grammar.parse(&snap.cmdline) {
            Ok(command) => command,
            Err(CmdlineError::HelpRequested) => {
                tracing::debug!(pid = snap.pid, "Skipping help-only plotter invocation");
                continue;
            }
            Err(e) => {
                tracing::debug!(pid = snap.pid, error = %e, "Skipping unparseable plotter command line");
                continue;
            }
        };

        match Job::from_snapshot(&snap, command, logroot, retry, &mut sleep) {
            Ok(job) => {
                tracing::info!(
                    pid = job.pid,
                    plot_id = %job.short_id(),
                    tmp = %job.tmpdir.display(),
                    dst = %job.dstdir.display(),
                    "Tracking new plot job"
                );
                jobs.push(job);
            }
            // Terminated between enumeration and inspection: not a match.
            Err(crate::error::WardenError::ProcessGone(pid)) => {
                tracing::debug!(pid, "Plotter process gone before inspection");
            }
            Err(e) => {
                tracing::warn!(pid = snap.pid, error = %e, "Could not construct job for plotter process");
            }
        }
    }

    jobs
}

/// Refresh dynamic state (phase, staleness) for every tracked job.
pub fn refresh_all(jobs: &mut [Job]) {
    for job in jobs {
        job.refresh();
    }
}
