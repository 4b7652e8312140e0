use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::{DateTime, Local, SecondsFormat};

use crate::config::{DirectoryConfig, PlottingConfig};
use crate::error::{Result, WardenError};
use crate::proc;

use super::LaunchPlan;

/// The external plotting tool.
const PLOTTER_BIN: &str = "chia";

/// Per-job log file name: the launch timestamp at microsecond precision,
/// with characters some filesystems reject normalized away.
pub fn logfile_name(now: DateTime<Local>) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Micros, false)
        .replace(':', "_");
    format!("{stamp}.log")
}

/// Create the log file with exclusive-create semantics.
///
/// The exclusive create is the only cross-instance concurrency control in
/// the system: a concurrently running warden racing for the same timestamp
/// surfaces as [`WardenError::LogfileExists`], which callers treat as a
/// benign skip rather than a failure.
pub fn create_logfile(path: &Path) -> Result<std::fs::File> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(WardenError::LogfileExists(path.to_path_buf()))
        }
        Err(e) => Err(WardenError::LogfileOpen {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Assemble the plotter invocation from configuration. Nothing is copied
/// from observed processes: a running job's own arguments never leak into a
/// new launch.
pub fn build_command(plan: &LaunchPlan, dirs: &DirectoryConfig, plotting: &PlottingConfig) -> Vec<String> {
    let mut args = vec![
        PLOTTER_BIN.to_string(),
        "plots".to_string(),
        "create".to_string(),
        "-k".to_string(),
        plotting.k.to_string(),
        "-r".to_string(),
        plotting.n_threads.to_string(),
        "-u".to_string(),
        plotting.n_buckets.to_string(),
        "-b".to_string(),
        plotting.job_buffer.to_string(),
        "-t".to_string(),
        plan.tmpdir.display().to_string(),
        "-d".to_string(),
        plan.dstdir.display().to_string(),
    ];
    if plotting.disable_bitfield {
        args.push("-e".to_string());
    }
    if let Some(farmer) = &plotting.farmer_pk {
        args.push("-f".to_string());
        args.push(farmer.clone());
    }
    if let Some(pool) = &plotting.pool_pk {
        args.push("-p".to_string());
        args.push(pool.clone());
    }
    if let Some(tmp2) = &dirs.tmp2 {
        args.push("-2".to_string());
        args.push(tmp2.display().to_string());
    }
    args
}

/// Create the log file and launch the plot process, detached in its own
/// session with both output streams bound to the log, at the most yielding
/// scheduling priority.
pub fn start_plot(
    plan: &LaunchPlan,
    dirs: &DirectoryConfig,
    plotting: &PlottingConfig,
) -> Result<String> {
    let logfile = dirs.log.join(logfile_name(Local::now()));
    let log = create_logfile(&logfile)?;
    let log_err = log
        .try_clone()
        .map_err(|e| WardenError::Launch(format!("cannot duplicate log handle: {e}")))?;

    let argv = build_command(plan, dirs, plotting);
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    // Detach from the controlling terminal so the job outlives the warden.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command
        .spawn()
        .map_err(|e| WardenError::Launch(format!("{}: {e}", argv[0])))?;

    if let Err(e) = proc::set_lowest_priority(child.id()) {
        tracing::warn!(pid = child.id(), error = %e, "Could not lower plot process priority");
    }

    let message = format!(
        "Starting plot job: {} ; logging to {}",
        argv.join(" "),
        logfile.display()
    );
    tracing::info!(
        pid = child.id(),
        tmp = %plan.tmpdir.display(),
        dst = %plan.dstdir.display(),
        log = %logfile.display(),
        "Plot job launched"
    );
    Ok(message)
}
