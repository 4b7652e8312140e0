use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use plotwarden::config::{DirectoryConfig, PlottingConfig, SchedulerConfig};
use plotwarden::phase::Phase;
use plotwarden::warden::Warden;

#[derive(Parser, Debug)]
#[command(name = "plotwarden")]
#[command(version)]
#[command(about = "Supervises chia_plot jobs: admission control, progress tracking, stalled-job reaping")]
struct Args {
    /// Directory where per-job plot logs are created and discovered
    #[arg(long)]
    log_dir: PathBuf,

    /// Scratch directory (repeat for several)
    #[arg(long = "tmp", required = true)]
    tmp: Vec<PathBuf>,

    /// Optional shared secondary scratch directory
    #[arg(long = "tmp2")]
    tmp2: Option<PathBuf>,

    /// Destination directory (repeat for several)
    #[arg(long = "dst", required = true)]
    dst: Vec<PathBuf>,

    /// Seconds between poll cycles
    #[arg(long, default_value = "60")]
    poll_interval: u64,

    // === Scheduling ===
    /// Minutes between job launches
    #[arg(long, default_value = "30")]
    stagger: u64,

    /// Maximum concurrent jobs across all directories
    #[arg(long, default_value = "8")]
    max_jobs: usize,

    /// Jobs below this phase (major:minor) count against the stagger limit
    #[arg(long, default_value = "2:1", value_parser = parse_phase_arg)]
    stagger_phase: Phase,

    /// Maximum below-stagger-phase jobs per scratch directory
    #[arg(long, default_value = "1")]
    stagger_limit: usize,

    /// Default maximum jobs per scratch directory
    #[arg(long, default_value = "8")]
    tmpdir_max_jobs: usize,

    // === Plotting ===
    /// Plot k-size
    #[arg(long, default_value = "32")]
    k: u32,

    /// Plotter thread count
    #[arg(long, default_value = "4")]
    threads: u32,

    /// Plotter bucket count
    #[arg(long, default_value = "128")]
    buckets: u32,

    /// Plotter buffer in MiB
    #[arg(long, default_value = "4000")]
    buffer: u32,

    /// Disable the bitfield optimization
    #[arg(long)]
    no_bitfield: bool,

    /// Farmer public key
    #[arg(long)]
    farmer_key: Option<String>,

    /// Pool public key
    #[arg(long)]
    pool_key: Option<String>,
}

fn parse_phase_arg(s: &str) -> Result<Phase, String> {
    let (major, minor) = s
        .split_once(':')
        .ok_or_else(|| format!("expected major:minor, got {s:?}"))?;
    let major = major.parse().map_err(|_| format!("bad major in {s:?}"))?;
    let minor = minor.parse().map_err(|_| format!("bad minor in {s:?}"))?;
    Ok(Phase::new(major, minor))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut dirs = DirectoryConfig::new(args.log_dir);
    dirs.tmp = args.tmp;
    dirs.tmp2 = args.tmp2;
    dirs.dst = args.dst;

    let sched = SchedulerConfig {
        global_stagger_m: args.stagger,
        global_max_jobs: args.max_jobs,
        tmpdir_stagger_phase: args.stagger_phase,
        tmpdir_stagger_limit: args.stagger_limit,
        tmpdir_max_jobs: args.tmpdir_max_jobs,
    };
    let plotting = PlottingConfig {
        k: args.k,
        n_threads: args.threads,
        n_buckets: args.buckets,
        job_buffer: args.buffer,
        disable_bitfield: args.no_bitfield,
        farmer_pk: args.farmer_key,
        pool_pk: args.pool_key,
    };

    let mut warden = Warden::new(dirs, sched, plotting);
    let mut interval = tokio::time::interval(Duration::from_secs(args.poll_interval));

    tracing::info!(
        tmp_dirs = warden.dirs.tmp.len(),
        dst_dirs = warden.dirs.dst.len(),
        poll_interval_s = args.poll_interval,
        "plotwarden started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match warden.poll() {
                    Ok(summary) => {
                        tracing::info!(
                            jobs = summary.jobs,
                            reaped = summary.reaped,
                            started = summary.started,
                            detail = %summary.detail,
                            "Poll cycle complete"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Poll cycle failed");
                        return Err(e.into());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
