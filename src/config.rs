use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Per-tmpdir overrides of the global scheduling limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmpOverride {
    /// Maximum concurrent jobs on this tmpdir, overriding
    /// [`SchedulerConfig::tmpdir_max_jobs`].
    pub tmpdir_max_jobs: Option<usize>,
}

/// Directories the warden schedules over.
///
/// `dst` is a live collection: the poll cycle prunes entries the capacity
/// check has rejected, so later decisions in the same run stop considering
/// them. The on-disk configuration is not touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory where per-job log files are created and discovered.
    pub log: PathBuf,
    /// Scratch directories consumed during plotting.
    pub tmp: Vec<PathBuf>,
    /// Optional shared secondary scratch directory.
    pub tmp2: Option<PathBuf>,
    /// Destination directories for finished plots.
    pub dst: Vec<PathBuf>,
    /// Per-tmpdir limit overrides.
    pub tmp_overrides: HashMap<PathBuf, TmpOverride>,
}

impl DirectoryConfig {
    pub fn new(log: PathBuf) -> Self {
        Self {
            log,
            tmp: Vec::new(),
            tmp2: None,
            dst: Vec::new(),
            tmp_overrides: HashMap::new(),
        }
    }

    pub fn with_tmp(mut self, dir: PathBuf) -> Self {
        self.tmp.push(dir);
        self
    }

    pub fn with_dst(mut self, dir: PathBuf) -> Self {
        self.dst.push(dir);
        self
    }

    pub fn with_tmp2(mut self, dir: PathBuf) -> Self {
        self.tmp2 = Some(dir);
        self
    }

    pub fn with_tmp_override(mut self, dir: PathBuf, limit: TmpOverride) -> Self {
        self.tmp_overrides.insert(dir, limit);
        self
    }

    /// Effective max jobs for a tmpdir: the override if one is configured,
    /// otherwise the scheduler-wide default.
    pub fn max_jobs_for(&self, dir: &std::path::Path, sched: &SchedulerConfig) -> usize {
        self.tmp_overrides
            .get(dir)
            .and_then(|o| o.tmpdir_max_jobs)
            .unwrap_or(sched.tmpdir_max_jobs)
    }

    /// Drop destination directories the capacity check rejected.
    pub fn prune_dst(&mut self, rejected: &[PathBuf]) {
        self.dst.retain(|d| !rejected.contains(d));
    }
}

/// Global admission-control knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum spacing between job launches, in minutes.
    pub global_stagger_m: u64,
    /// Hard cap on concurrently running jobs across all directories.
    pub global_max_jobs: usize,
    /// Jobs still below this phase count against `tmpdir_stagger_limit`.
    /// Early-phase jobs are the most resource hungry.
    pub tmpdir_stagger_phase: Phase,
    /// Maximum jobs below the stagger phase per tmpdir.
    pub tmpdir_stagger_limit: usize,
    /// Default maximum jobs per tmpdir, unless overridden.
    pub tmpdir_max_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_stagger_m: 30,
            global_max_jobs: 8,
            tmpdir_stagger_phase: Phase::new(2, 1),
            tmpdir_stagger_limit: 1,
            tmpdir_max_jobs: 8,
        }
    }
}

impl SchedulerConfig {
    pub fn global_stagger(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.global_stagger_m * 60)
    }
}

/// Parameters for newly launched plot processes. These come from
/// configuration only, never from an observed process's own arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlottingConfig {
    /// Plot k-size; determines final plot size on the destination.
    pub k: u32,
    pub n_threads: u32,
    pub n_buckets: u32,
    /// Working buffer, in MiB.
    pub job_buffer: u32,
    /// Disable the bitfield back-propagation optimization.
    pub disable_bitfield: bool,
    pub farmer_pk: Option<String>,
    pub pool_pk: Option<String>,
}

impl Default for PlottingConfig {
    fn default() -> Self {
        Self {
            k: 32,
            n_threads: 4,
            n_buckets: 128,
            job_buffer: 4000,
            disable_bitfield: false,
            farmer_pk: None,
            pool_pk: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn scheduler_config_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.global_stagger_m, 30);
        assert_eq!(cfg.global_max_jobs, 8);
        assert_eq!(cfg.tmpdir_stagger_phase, Phase::new(2, 1));
        assert_eq!(cfg.tmpdir_stagger_limit, 1);
        assert_eq!(cfg.global_stagger().as_secs(), 1800);
    }

    #[test]
    fn plotting_config_default() {
        let cfg = PlottingConfig::default();
        assert_eq!(cfg.k, 32);
        assert_eq!(cfg.n_threads, 4);
        assert_eq!(cfg.n_buckets, 128);
        assert_eq!(cfg.job_buffer, 4000);
        assert!(!cfg.disable_bitfield);
        assert!(cfg.farmer_pk.is_none());
        assert!(cfg.pool_pk.is_none());
    }

    #[test]
    fn directory_config_builders() {
        let cfg = DirectoryConfig::new(PathBuf::from("/plots/log"))
            .with_tmp(PathBuf::from("/fast/tmp0"))
            .with_tmp(PathBuf::from("/fast/tmp1"))
            .with_tmp2(PathBuf::from("/ram/tmp2"))
            .with_dst(PathBuf::from("/farm/dst0"));
        assert_eq!(cfg.tmp.len(), 2);
        assert_eq!(cfg.tmp2.as_deref(), Some(Path::new("/ram/tmp2")));
        assert_eq!(cfg.dst, vec![PathBuf::from("/farm/dst0")]);
    }

    #[test]
    fn max_jobs_prefers_override() {
        let sched = SchedulerConfig::default();
        let cfg = DirectoryConfig::new(PathBuf::from("/log")).with_tmp_override(
            PathBuf::from("/fast/tmp0"),
            TmpOverride {
                tmpdir_max_jobs: Some(2),
            },
        );
        assert_eq!(cfg.max_jobs_for(Path::new("/fast/tmp0"), &sched), 2);
        assert_eq!(
            cfg.max_jobs_for(Path::new("/fast/tmp1"), &sched),
            sched.tmpdir_max_jobs
        );
    }

    #[test]
    fn prune_dst_removes_rejected_dirs() {
        let mut cfg = DirectoryConfig::new(PathBuf::from("/log"))
            .with_dst(PathBuf::from("/farm/dst0"))
            .with_dst(PathBuf::from("/farm/dst1"));
        cfg.prune_dst(&[PathBuf::from("/farm/dst1")]);
        assert_eq!(cfg.dst, vec![PathBuf::from("/farm/dst0")]);
    }
}
