pub mod launch;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::config::{DirectoryConfig, PlottingConfig, SchedulerConfig};
use crate::job::Job;
use crate::phase::Phase;
use crate::proc;

/// Age stand-in when no jobs are running, old enough to pass any stagger.
const MAX_AGE: Duration = Duration::from_secs(1_000_000_000);

const GB: u64 = 1_000_000_000;

/// Worst-case final plot size per k-size.
pub fn plot_size_bytes(k: u32) -> Option<u64> {
    match k {
        32 => Some(108_900_000_000),
        33 => Some(224_200_000_000),
        34 => Some(461_500_000_000),
        35 => Some(949_300_000_000),
        _ => None,
    }
}

/// Phases of jobs plotting on the given tmpdir, ascending.
pub fn phases_for_tmpdir(dir: &Path, jobs: &[Job]) -> Vec<Phase> {
    let mut phases: Vec<Phase> = jobs
        .iter()
        .filter(|j| j.tmpdir == dir)
        .map(|j| j.phase)
        .collect();
    phases.sort();
    phases
}

/// Phases of jobs emitting to the given dstdir, ascending.
pub fn phases_for_dstdir(dir: &Path, jobs: &[Job]) -> Vec<Phase> {
    let mut phases: Vec<Phase> = jobs
        .iter()
        .filter(|j| j.dstdir == dir)
        .map(|j| j.phase)
        .collect();
    phases.sort();
    phases
}

/// Map from dstdir to the phase of the most progressed job emitting to it.
pub fn dstdirs_to_furthest_phase(jobs: &[Job]) -> HashMap<PathBuf, Phase> {
    let mut result: HashMap<PathBuf, Phase> = HashMap::new();
    for job in jobs {
        let entry = result.entry(job.dstdir.clone()).or_insert(job.phase);
        if job.phase > *entry {
            *entry = job.phase;
        }
    }
    result
}

/// Map from dstdir to the phase of the least progressed job emitting to it.
pub fn dstdirs_to_youngest_phase(jobs: &[Job]) -> HashMap<PathBuf, Phase> {
    let mut result: HashMap<PathBuf, Phase> = HashMap::new();
    for job in jobs {
        let entry = result.entry(job.dstdir.clone()).or_insert(job.phase);
        if job.phase < *entry {
            *entry = job.phase;
        }
    }
    result
}

/// Admission test for one tmpdir given the phases of the jobs already on it.
///
/// Unknown-phase jobs are not counted: they have not produced a marker yet
/// and will be classified on a later poll. The stagger limit bounds how many
/// early-phase jobs (the most resource hungry) may share the tmpdir.
pub fn phases_permit_new_job(
    phases: &[Phase],
    dir: &Path,
    sched: &SchedulerConfig,
    dirs: &DirectoryConfig,
) -> bool {
    let known: Vec<Phase> = phases.iter().copied().filter(Phase::is_known).collect();
    if known.is_empty() {
        return true;
    }

    let below_milestone = known
        .iter()
        .filter(|p| **p < sched.tmpdir_stagger_phase)
        .count();
    if below_milestone >= sched.tmpdir_stagger_limit {
        return false;
    }

    if known.len() >= dirs.max_jobs_for(dir, sched) {
        return false;
    }

    true
}

/// Outcome of a destination capacity test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityCheck {
    pub ok: bool,
    pub reason: Option<String>,
}

/// Whether `dir` can hold one more plot on top of the jobs already emitting
/// to it. Pure: the caller supplies the filesystem's free bytes.
pub fn dir_can_hold_new_plot(
    dir: &Path,
    jobs: &[Job],
    plotting: &PlottingConfig,
    free_bytes: u64,
) -> CapacityCheck {
    let Some(plot_size) = plot_size_bytes(plotting.k) else {
        return CapacityCheck {
            ok: false,
            reason: Some(format!("no known plot size for k={}", plotting.k)),
        };
    };

    let active = phases_for_dstdir(dir, jobs).len();
    let required = (active as u64 + 1) * plot_size;
    if required < free_bytes {
        return CapacityCheck {
            ok: true,
            reason: None,
        };
    }

    CapacityCheck {
        ok: false,
        reason: Some(format!(
            "destination {} with {} active jobs needs {:.1} GB but has {:.1} GB free",
            dir.display(),
            active,
            required as f64 / GB as f64,
            free_bytes as f64 / GB as f64,
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub tmpdir: PathBuf,
    pub dstdir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    Stagger { youngest: Duration, stagger: Duration },
    MaxJobs { max: usize },
    NoEligibleTmpdirs,
    NoDstAvailable,
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::Stagger { youngest, stagger } => {
                write!(f, "stagger ({}s/{}s)", youngest.as_secs(), stagger.as_secs())
            }
            WaitReason::MaxJobs { max } => write!(f, "max jobs ({})", max),
            WaitReason::NoEligibleTmpdirs => write!(f, "no eligible tempdirs"),
            WaitReason::NoDstAvailable => write!(f, "no destination drive available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start(LaunchPlan),
    Wait(WaitReason),
}

/// A scheduling decision plus the destination directories the capacity
/// check rejected. The decision itself never mutates configuration; the
/// caller applies the prune so the logic stays independently testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub prune_dst: Vec<PathBuf>,
}

impl Decision {
    fn wait(reason: WaitReason, prune_dst: Vec<PathBuf>) -> Self {
        Decision {
            action: Action::Wait(reason),
            prune_dst,
        }
    }
}

/// Decide whether a new plot job may start now, and where.
pub fn decide(
    jobs: &[Job],
    dirs: &DirectoryConfig,
    sched: &SchedulerConfig,
    plotting: &PlottingConfig,
) -> Decision {
    decide_with(jobs, dirs, sched, plotting, |d| {
        proc::free_space(d).unwrap_or(0)
    })
}

/// [`decide`] with an injectable free-space query, for tests.
pub fn decide_with(
    jobs: &[Job],
    dirs: &DirectoryConfig,
    sched: &SchedulerConfig,
    plotting: &PlottingConfig,
    free_space: impl Fn(&Path) -> u64,
) -> Decision {
    let mut prune_dst = Vec::new();

    let youngest = jobs.iter().map(Job::wall_age).min().unwrap_or(MAX_AGE);
    let stagger = sched.global_stagger();
    if youngest < stagger {
        return Decision::wait(WaitReason::Stagger { youngest, stagger }, prune_dst);
    }

    if jobs.len() >= sched.global_max_jobs {
        return Decision::wait(
            WaitReason::MaxJobs {
                max: sched.global_max_jobs,
            },
            prune_dst,
        );
    }

    // Rank eligible tmpdirs by their leading (most advanced) job; an empty
    // tmpdir ranks unknown, i.e. lowest. Prefer filling directories nearing
    // completion so their scratch space frees soonest. Ties break to the
    // lexicographically smallest path.
    let eligible: Vec<(&PathBuf, Phase)> = dirs
        .tmp
        .iter()
        .filter_map(|dir| {
            let phases = phases_for_tmpdir(dir, jobs);
            if !phases_permit_new_job(&phases, dir, sched, dirs) {
                return None;
            }
            let leading = phases.last().copied().unwrap_or(Phase::unknown());
            Some((dir, leading))
        })
        .collect();

    let Some(tmpdir) = eligible
        .iter()
        .max_by(|(da, pa), (db, pb)| pa.cmp(pb).then_with(|| db.cmp(da)))
        .map(|(dir, _)| (*dir).clone())
    else {
        return Decision::wait(WaitReason::NoEligibleTmpdirs, prune_dst);
    };

    // Destination: capacity-check every candidate up front, collecting the
    // rejects for the caller to prune.
    let mut check = |dir: &PathBuf| -> bool {
        let outcome = dir_can_hold_new_plot(dir, jobs, plotting, free_space(dir));
        if !outcome.ok {
            if let Some(reason) = &outcome.reason {
                tracing::info!(dst = %dir.display(), reason = %reason, "Destination rejected");
            }
            prune_dst.push(dir.clone());
        }
        outcome.ok
    };

    let youngest_by_dst = dstdirs_to_youngest_phase(jobs);
    let unused: Vec<&PathBuf> = dirs
        .dst
        .iter()
        .filter(|d| !youngest_by_dst.contains_key(d.as_path()))
        .filter(|d| check(*d))
        .collect();
    let in_use: Vec<(&PathBuf, Phase)> = dirs
        .dst
        .iter()
        .filter_map(|d| youngest_by_dst.get(d.as_path()).map(|p| (d, *p)))
        .filter(|(d, _)| check(*d))
        .collect();

    // Spread load: a fresh destination is picked uniformly at random. With
    // none free, land where the existing work will finish last (the least
    // advanced leading job), balancing wear.
    let dstdir = if let Some(dir) = unused.choose(&mut rand::thread_rng()) {
        (*dir).clone()
    } else if let Some((dir, _)) = in_use
        .into_iter()
        .min_by(|(da, pa), (db, pb)| pa.cmp(pb).then_with(|| da.cmp(db)))
    {
        dir.clone()
    } else {
        return Decision::wait(WaitReason::NoDstAvailable, prune_dst);
    };

    Decision {
        action: Action::Start(LaunchPlan { tmpdir, dstdir }),
        prune_dst,
    }
}
