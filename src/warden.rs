use crate::config::{DirectoryConfig, PlottingConfig, SchedulerConfig};
use crate::error::{Result, WardenError};
use crate::job::{tracker, Job};
use crate::reaper;
use crate::scheduler::{self, launch, Action};

/// Result of one poll cycle.
#[derive(Debug, Clone)]
pub struct PollSummary {
    pub jobs: usize,
    pub reaped: usize,
    pub started: bool,
    pub detail: String,
}

/// Drives the cooperative poll cycle: discover jobs, refresh their dynamic
/// state, reap stalled ones, then decide whether to admit a new plot.
///
/// Single-threaded by design; an external timer calls [`Warden::poll`]
/// periodically and nothing here runs concurrently with itself.
pub struct Warden {
    pub dirs: DirectoryConfig,
    pub sched: SchedulerConfig,
    pub plotting: PlottingConfig,
    jobs: Vec<Job>,
}

impl Warden {
    pub fn new(dirs: DirectoryConfig, sched: SchedulerConfig, plotting: PlottingConfig) -> Self {
        Self {
            dirs,
            sched,
            plotting,
            jobs: Vec::new(),
        }
    }

    /// Jobs observed in the most recent poll.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn poll(&mut self) -> Result<PollSummary> {
        self.jobs = tracker::discover(&self.dirs.log, &self.jobs);
        tracker::refresh_all(&mut self.jobs);

        let reports = reaper::reap_stalled(&mut self.jobs);
        let reaped = reports.iter().filter(|r| r.killed).count();
        let killed_pids: Vec<u32> = reports
            .iter()
            .filter(|r| r.killed)
            .map(|r| r.pid)
            .collect();
        self.jobs.retain(|j| !killed_pids.contains(&j.pid));

        let decision = scheduler::decide(&self.jobs, &self.dirs, &self.sched, &self.plotting);
        self.dirs.prune_dst(&decision.prune_dst);

        let (started, detail) = match decision.action {
            Action::Start(plan) => match launch::start_plot(&plan, &self.dirs, &self.plotting) {
                Ok(message) => (true, message),
                // Another warden instance on this host won the launch race;
                // skip the cycle and pick it up as a running job next poll.
                Err(WardenError::LogfileExists(path)) => (
                    false,
                    format!(
                        "plot log file already exists, skipping launch: {}",
                        path.display()
                    ),
                ),
                Err(e) => return Err(e),
            },
            Action::Wait(reason) => (false, reason.to_string()),
        };

        Ok(PollSummary {
            jobs: self.jobs.len(),
            reaped,
            started,
            detail,
        })
    }
}
