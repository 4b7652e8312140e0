use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use plotwarden::config::{DirectoryConfig, PlottingConfig, SchedulerConfig, TmpOverride};
use plotwarden::error::WardenError;
use plotwarden::job::cmdline::PlotCommand;
use plotwarden::job::Job;
use plotwarden::phase::Phase;
use plotwarden::scheduler::{
    self, dir_can_hold_new_plot, dstdirs_to_furthest_phase, dstdirs_to_youngest_phase, launch,
    phases_permit_new_job, Action, WaitReason,
};

const GB: u64 = 1_000_000_000;

const OLD: Duration = Duration::from_secs(2 * 60 * 60);

/// A job whose pid is far above any real process, so wall age falls back to
/// `started_at` and no OS query can interfere with the decision under test.
fn job(pid: u32, tmp: &str, dst: &str, phase: Phase, age: Duration) -> Job {
    Job {
        pid,
        plot_id: format!("plotid{pid:08}"),
        logfile: None,
        started_at: Utc::now() - chrono::Duration::from_std(age).unwrap(),
        tmpdir: PathBuf::from(tmp),
        tmp2dir: None,
        dstdir: PathBuf::from(dst),
        count: 1,
        threads: 4,
        buckets: 256,
        buffer: PlotCommand::FIXED_BUFFER,
        k: PlotCommand::FIXED_K,
        phase,
        last_update: None,
        staleness: None,
        suspend_reason: None,
    }
}

fn dirs() -> DirectoryConfig {
    DirectoryConfig::new(PathBuf::from("/plots/log"))
        .with_tmp(PathBuf::from("/fast/tmp0"))
        .with_dst(PathBuf::from("/farm/dst0"))
}

#[test]
fn dstdir_phase_maps_track_extremes() {
    let jobs = vec![
        job(4_000_000_001, "/fast/tmp0", "/farm/dst0", Phase::new(1, 2), OLD),
        job(4_000_000_002, "/fast/tmp0", "/farm/dst0", Phase::new(3, 1), OLD),
        job(4_000_000_003, "/fast/tmp0", "/farm/dst1", Phase::new(2, 0), OLD),
    ];

    let furthest = dstdirs_to_furthest_phase(&jobs);
    assert_eq!(furthest[&PathBuf::from("/farm/dst0")], Phase::new(3, 1));
    assert_eq!(furthest[&PathBuf::from("/farm/dst1")], Phase::new(2, 0));

    let youngest = dstdirs_to_youngest_phase(&jobs);
    assert_eq!(youngest[&PathBuf::from("/farm/dst0")], Phase::new(1, 2));
    assert_eq!(youngest[&PathBuf::from("/farm/dst1")], Phase::new(2, 0));
}

#[test]
fn stagger_milestone_bounds_early_phase_jobs() {
    let sched = SchedulerConfig {
        tmpdir_stagger_phase: Phase::new(1, 4),
        tmpdir_stagger_limit: 1,
        ..SchedulerConfig::default()
    };
    let cfg = dirs();
    let dir = PathBuf::from("/fast/tmp0");

    // No jobs below the milestone: admit.
    assert!(phases_permit_new_job(&[], &dir, &sched, &cfg));
    assert!(phases_permit_new_job(
        &[Phase::new(1, 5)],
        &dir,
        &sched,
        &cfg
    ));

    // One job below the milestone hits the limit.
    assert!(!phases_permit_new_job(
        &[Phase::new(1, 3)],
        &dir,
        &sched,
        &cfg
    ));

    // The below-milestone count is evaluated independently of jobs at or
    // beyond the milestone.
    assert!(!phases_permit_new_job(
        &[Phase::new(1, 5), Phase::new(1, 3)],
        &dir,
        &sched,
        &cfg
    ));
}

#[test]
fn unknown_phases_do_not_count_toward_limits() {
    let sched = SchedulerConfig {
        tmpdir_stagger_phase: Phase::new(1, 4),
        tmpdir_stagger_limit: 1,
        ..SchedulerConfig::default()
    };
    let cfg = dirs();
    let dir = PathBuf::from("/fast/tmp0");

    assert!(phases_permit_new_job(
        &[Phase::unknown(), Phase::unknown()],
        &dir,
        &sched,
        &cfg
    ));
}

#[test]
fn tmpdir_override_caps_job_count() {
    let sched = SchedulerConfig::default();
    let cfg = dirs().with_tmp_override(
        PathBuf::from("/fast/tmp0"),
        TmpOverride {
            tmpdir_max_jobs: Some(2),
        },
    );
    let dir = PathBuf::from("/fast/tmp0");

    let two_late = [Phase::new(3, 1), Phase::new(4, 0)];
    assert!(!phases_permit_new_job(&two_late, &dir, &sched, &cfg));

    let one_late = [Phase::new(3, 1)];
    assert!(phases_permit_new_job(&one_late, &dir, &sched, &cfg));
}

#[test]
fn capacity_check_accounts_for_active_jobs() {
    let plotting = PlottingConfig::default(); // k = 32, 108.9 GB per plot
    let dst = PathBuf::from("/farm/dst0");

    // Empty destination, 200 GB free: one more plot fits.
    let check = dir_can_hold_new_plot(&dst, &[], &plotting, 200 * GB);
    assert!(check.ok);
    assert!(check.reason.is_none());

    // One active job already emitting here: a second plot needs ~217.8 GB.
    let jobs = vec![job(
        4_000_000_001,
        "/fast/tmp0",
        "/farm/dst0",
        Phase::new(2, 1),
        OLD,
    )];
    let check = dir_can_hold_new_plot(&dst, &jobs, &plotting, 200 * GB);
    assert!(!check.ok);
    let reason = check.reason.unwrap();
    assert!(reason.contains("/farm/dst0"));
    assert!(reason.contains("1 active jobs"));
}

#[test]
fn decide_waits_for_global_stagger() {
    let jobs = vec![job(
        4_000_000_001,
        "/fast/tmp0",
        "/farm/dst0",
        Phase::new(1, 1),
        Duration::from_secs(60),
    )];
    let decision = scheduler::decide_with(
        &jobs,
        &dirs(),
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 10_000 * GB,
    );

    assert!(matches!(
        decision.action,
        Action::Wait(WaitReason::Stagger { .. })
    ));
    assert!(decision.prune_dst.is_empty());
}

#[test]
fn decide_waits_at_global_max_jobs() {
    let sched = SchedulerConfig {
        global_max_jobs: 1,
        ..SchedulerConfig::default()
    };
    let jobs = vec![job(
        4_000_000_001,
        "/fast/tmp0",
        "/farm/dst0",
        Phase::new(3, 1),
        OLD,
    )];
    let decision = scheduler::decide_with(
        &jobs,
        &dirs(),
        &sched,
        &PlottingConfig::default(),
        |_| 10_000 * GB,
    );

    assert_eq!(decision.action, Action::Wait(WaitReason::MaxJobs { max: 1 }));
}

#[test]
fn decide_waits_when_no_tmpdir_admits() {
    // The lone tmpdir hosts an early-phase job, which the default stagger
    // limit of one blocks.
    let jobs = vec![job(
        4_000_000_001,
        "/fast/tmp0",
        "/farm/dst0",
        Phase::new(1, 1),
        OLD,
    )];
    let decision = scheduler::decide_with(
        &jobs,
        &dirs(),
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 10_000 * GB,
    );

    assert_eq!(decision.action, Action::Wait(WaitReason::NoEligibleTmpdirs));
}

#[test]
fn decide_admits_on_idle_system() {
    let decision = scheduler::decide_with(
        &[],
        &dirs(),
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 200 * GB,
    );

    match decision.action {
        Action::Start(plan) => {
            assert_eq!(plan.tmpdir, PathBuf::from("/fast/tmp0"));
            assert_eq!(plan.dstdir, PathBuf::from("/farm/dst0"));
        }
        other => panic!("expected a launch plan, got {other:?}"),
    }
    assert!(decision.prune_dst.is_empty());
}

#[test]
fn decide_prefers_tmpdir_with_furthest_leading_job() {
    let cfg = DirectoryConfig::new(PathBuf::from("/plots/log"))
        .with_tmp(PathBuf::from("/fast/tmp0"))
        .with_tmp(PathBuf::from("/fast/tmp1"))
        .with_dst(PathBuf::from("/farm/dst0"))
        .with_dst(PathBuf::from("/farm/dst1"));
    // tmp0 hosts a late-phase job; tmp1 is empty and ranks unknown.
    let jobs = vec![job(
        4_000_000_001,
        "/fast/tmp0",
        "/farm/dst0",
        Phase::new(3, 4),
        OLD,
    )];

    let decision = scheduler::decide_with(
        &jobs,
        &cfg,
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 10_000 * GB,
    );

    match decision.action {
        Action::Start(plan) => assert_eq!(plan.tmpdir, PathBuf::from("/fast/tmp0")),
        other => panic!("expected a launch plan, got {other:?}"),
    }
}

#[test]
fn tmpdir_ties_break_to_smallest_path() {
    // Listed largest first to prove the choice is not enumeration order.
    let cfg = DirectoryConfig::new(PathBuf::from("/plots/log"))
        .with_tmp(PathBuf::from("/fast/tmp1"))
        .with_tmp(PathBuf::from("/fast/tmp0"))
        .with_dst(PathBuf::from("/farm/dst0"));

    let decision = scheduler::decide_with(
        &[],
        &cfg,
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 10_000 * GB,
    );

    match decision.action {
        Action::Start(plan) => assert_eq!(plan.tmpdir, PathBuf::from("/fast/tmp0")),
        other => panic!("expected a launch plan, got {other:?}"),
    }
}

#[test]
fn in_use_dst_fallback_picks_least_advanced() {
    let cfg = DirectoryConfig::new(PathBuf::from("/plots/log"))
        .with_tmp(PathBuf::from("/fast/tmp0"))
        .with_tmp(PathBuf::from("/fast/tmp1"))
        .with_dst(PathBuf::from("/farm/dst0"))
        .with_dst(PathBuf::from("/farm/dst1"));
    // Both destinations are in use, so the fallback lands the new plot where
    // the existing work will finish last.
    let jobs = vec![
        job(4_000_000_001, "/fast/tmp0", "/farm/dst0", Phase::new(2, 2), OLD),
        job(4_000_000_002, "/fast/tmp1", "/farm/dst1", Phase::new(3, 0), OLD),
    ];

    let decision = scheduler::decide_with(
        &jobs,
        &cfg,
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 10_000 * GB,
    );

    match decision.action {
        Action::Start(plan) => assert_eq!(plan.dstdir, PathBuf::from("/farm/dst0")),
        other => panic!("expected a launch plan, got {other:?}"),
    }
}

#[test]
fn capacity_shortfall_is_returned_as_prune_set() {
    // The only destination is in use and over capacity: the decision waits
    // and reports the directory for pruning, without mutating the config.
    let cfg = dirs();
    let jobs = vec![job(
        4_000_000_001,
        "/fast/tmp0",
        "/farm/dst0",
        Phase::new(3, 1),
        OLD,
    )];

    let decision = scheduler::decide_with(
        &jobs,
        &cfg,
        &SchedulerConfig::default(),
        &PlottingConfig::default(),
        |_| 200 * GB,
    );

    assert_eq!(decision.action, Action::Wait(WaitReason::NoDstAvailable));
    assert_eq!(decision.prune_dst, vec![PathBuf::from("/farm/dst0")]);
    assert_eq!(cfg.dst, vec![PathBuf::from("/farm/dst0")]);

    let mut cfg = cfg;
    cfg.prune_dst(&decision.prune_dst);
    assert!(cfg.dst.is_empty());
}

#[test]
fn logfile_is_created_exclusively() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("2021-05-01T12_34_56.000001-04_00.log");

    let first = launch::create_logfile(&path);
    assert!(first.is_ok());

    // A concurrent warden instance already claimed this launch slot.
    let second = launch::create_logfile(&path);
    assert!(matches!(second, Err(WardenError::LogfileExists(p)) if p == path));
}

#[test]
fn logfile_open_failure_is_fatal_not_a_race() {
    let path = PathBuf::from("/nonexistent-root-dir/plot.log");
    let err = launch::create_logfile(&path).unwrap_err();
    assert!(matches!(err, WardenError::LogfileOpen { .. }));
}
