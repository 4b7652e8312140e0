pub mod cmdline;
pub mod logfile;
pub mod tracker;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, WardenError};
use crate::phase::Phase;
use crate::proc;
use crate::proc::{CpuTimes, ProcSnapshot, RunStatus};
use cmdline::PlotCommand;
use logfile::RetryPolicy;

/// Shown until the plot name appears in the log.
pub const PLACEHOLDER_ID: &str = "--------";

/// A job whose log has been silent this long is considered stalled.
pub const STALLED_AFTER: Duration = Duration::from_secs(60 * 60);

/// One supervised plotter process.
///
/// Static fields are fixed at construction; `phase`, `last_update` and
/// `staleness` are refreshed from the log file each poll cycle. The bound
/// log file path never changes for the life of the job, and `None` marks a
/// job whose log could not be located (phase stays unknown, the reaper
/// leaves it alone).
#[derive(Debug, Clone)]
pub struct Job {
    pub pid: u32,
    pub plot_id: String,
    pub logfile: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub tmpdir: PathBuf,
    pub tmp2dir: Option<PathBuf>,
    pub dstdir: PathBuf,
    pub count: u32,
    pub threads: u32,
    pub buckets: u32,
    pub buffer: u32,
    pub k: u32,
    pub phase: Phase,
    pub last_update: Option<DateTime<Utc>>,
    pub staleness: Option<Duration>,
    pub suspend_reason: Option<String>,
}

impl Job {
    /// Build a job for a newly observed plotter process.
    ///
    /// Fails when the process holds more than one distinct path under the
    /// log root open, or when it vanishes mid-inspection. A process with no
    /// open log file is kept in a degraded state with a diagnostic.
    pub fn from_snapshot(
        snap: &ProcSnapshot,
        command: PlotCommand,
        logroot: &Path,
        retry: &RetryPolicy,
        sleep: impl FnMut(Duration),
    ) -> Result<Job> {
        let cwd = snap.cwd.clone().unwrap_or_default();
        let tmpdir = cwd.join(&command.tmpdir);
        let tmp2dir = command.tmpdir2.as_ref().map(|d| cwd.join(d));
        let dstdir = cwd.join(&command.finaldir);

        let logfile = locate_logfile(snap.pid, logroot)?;

        let mut job = Job {
            pid: snap.pid,
            plot_id: PLACEHOLDER_ID.to_string(),
            logfile,
            started_at: snap.started_at,
            tmpdir,
            tmp2dir,
            dstdir,
            count: command.count,
            threads: command.threads,
            buckets: command.buckets,
            buffer: PlotCommand::FIXED_BUFFER,
            k: PlotCommand::FIXED_K,
            phase: Phase::unknown(),
            last_update: None,
            staleness: None,
            suspend_reason: None,
        };

        match &job.logfile {
            Some(log) => {
                match logfile::read_plot_id(log, retry, sleep) {
                    Ok(Some(id)) => job.plot_id = id,
                    Ok(None) => {
                        tracing::warn!(pid = job.pid, log = %log.display(),
                            "Plot id not found in log yet, using placeholder");
                    }
                    Err(e) => {
                        tracing::warn!(pid = job.pid, error = %e, "Failed reading log for plot id");
                    }
                }
                if let Ok(created) = logfile::created(log) {
                    job.started_at = created;
                }
                job.refresh();
            }
            None => {
                tracing::warn!(pid = job.pid, "Found plotting process but no log file under the log root; tracking degraded");
                if let Ok(files) = proc::open_files(job.pid) {
                    for f in files {
                        tracing::debug!(pid = job.pid, open_file = %f.display(), "open file");
                    }
                }
            }
        }

        Ok(job)
    }

    /// Refresh phase and freshness from the log file. The whole file is
    /// re-parsed; marker lines can land out of order across phase
    /// boundaries, so tailing only new lines could regress the phase.
    pub fn refresh(&mut self) {
        let Some(log) = self.logfile.clone() else {
            return;
        };
        match logfile::read_phase(&log) {
            Ok(phase) => self.phase = phase,
            Err(e) => {
                tracing::warn!(pid = self.pid, log = %log.display(), error = %e,
                    "Failed to re-parse log, keeping previous phase");
            }
        }
        match logfile::staleness(&log) {
            Ok(staleness) => {
                self.staleness = Some(staleness);
                self.last_update = logfile::last_modified(&log).ok();
            }
            Err(e) => {
                tracing::warn!(pid = self.pid, log = %log.display(), error = %e,
                    "Failed to stat log file");
            }
        }
    }

    /// First 8 characters of the plot id.
    pub fn short_id(&self) -> &str {
        &self.plot_id[..self.plot_id.len().min(8)]
    }

    pub fn is_stalled(&self) -> bool {
        self.staleness.map(|s| s > STALLED_AFTER).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Resource accessors: each one is a direct OS or filesystem query.
    // ------------------------------------------------------------------

    /// Virtual memory size, swapped pages included.
    pub fn mem_usage(&self) -> Option<u64> {
        proc::virtual_memory(self.pid)
    }

    pub fn run_status(&self) -> Option<RunStatus> {
        proc::run_status(self.pid)
    }

    pub fn cpu_times(&self) -> io::Result<CpuTimes> {
        proc::cpu_times(self.pid)
    }

    /// Wall-clock age of the process.
    pub fn wall_age(&self) -> Duration {
        let created = proc::created_at(self.pid).unwrap_or(self.started_at);
        (Utc::now() - created).to_std().unwrap_or(Duration::ZERO)
    }

    /// Bytes of scratch files belonging to this job: entries under the
    /// tmpdir whose name contains the plot id. Files vanishing mid-scan are
    /// an acceptable loss for an estimate.
    pub fn tmp_usage(&self) -> io::Result<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.tmpdir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_name().to_string_lossy().contains(&self.plot_id) {
                if let Ok(meta) = entry.metadata() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    pub fn suspend(&mut self, reason: &str) -> io::Result<()> {
        proc::suspend(self.pid)?;
        self.suspend_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn resume(&mut self) -> io::Result<()> {
        proc::resume(self.pid)?;
        self.suspend_reason = None;
        Ok(())
    }

    /// Terminate the process. A stopped process ignores SIGTERM until it is
    /// resumed, so resume always comes first.
    pub fn cancel(&mut self) -> io::Result<()> {
        self.resume()?;
        proc::terminate(self.pid)
    }

    /// Scratch files attributable to this job: paths the process holds open
    /// under its working directories, plus tmpdir entries carrying the plot
    /// id.
    pub fn temp_files(&self) -> HashSet<PathBuf> {
        let mut files = HashSet::new();

        let dirs: Vec<&Path> = [
            Some(self.tmpdir.as_path()),
            self.tmp2dir.as_deref(),
            Some(self.dstdir.as_path()),
        ]
        .into_iter()
        .flatten()
        .collect();

        if let Ok(open) = proc::open_files(self.pid) {
            for path in open {
                if dirs.iter().any(|d| path.starts_with(d)) {
                    files.insert(path);
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir(&self.tmpdir) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().contains(&self.plot_id) {
                    files.insert(entry.path());
                }
            }
        }

        files
    }

    /// Suspend, capture the temp-file set, terminate, then delete the
    /// captured files. The capture must happen before termination: a dying
    /// process drops its fd table and the open-files half of the set would
    /// be lost.
    pub fn kill(&mut self) -> Result<usize> {
        self.suspend("killing")?;
        let temp_files = self.temp_files();
        self.cancel()?;
        Ok(remove_files(&temp_files))
    }
}

/// Delete the given files, tolerating ones already gone. Returns how many
/// were actually removed.
pub(crate) fn remove_files(files: &HashSet<PathBuf>) -> usize {
    let mut removed = 0;
    for path in files {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
    removed
}

/// The process's single open log file under the log root. More than one
/// distinct candidate is a consistency error; none is a degraded (but
/// tracked) state.
pub(crate) fn locate_logfile(pid: u32, logroot: &Path) -> Result<Option<PathBuf>> {
    let open = proc::open_files(pid).map_err(|_| WardenError::ProcessGone(pid))?;
    let mut found: Option<PathBuf> = None;
    for path in open {
        if !path.starts_with(logroot) {
            continue;
        }
        match &found {
            // The same file may be open twice, e.g. as stdout and stderr.
            Some(existing) if *existing == path => {}
            Some(existing) => {
                return Err(WardenError::AmbiguousLogfile {
                    pid,
                    first: existing.clone(),
                    second: path,
                });
            }
            None => found = Some(path),
        }
    }
    Ok(found)
}
