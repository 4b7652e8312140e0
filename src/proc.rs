use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sysinfo::{Pid, ProcessStatus, System};

/// Run-status classification for a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Other(String),
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUN"),
            RunStatus::Sleeping => write!(f, "SLP"),
            RunStatus::DiskSleep => write!(f, "DSK"),
            RunStatus::Stopped => write!(f, "STP"),
            RunStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<ProcessStatus> for RunStatus {
    fn from(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Run => RunStatus::Running,
            ProcessStatus::Sleep => RunStatus::Sleeping,
            ProcessStatus::UninterruptibleDiskSleep => RunStatus::DiskSleep,
            ProcessStatus::Stop => RunStatus::Stopped,
            other => RunStatus::Other(other.to_string()),
        }
    }
}

/// CPU time consumed by a process. iowait is `None` on platforms that do not
/// account for it, which is different from a measured zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: Duration,
    pub system: Duration,
    pub iowait: Option<Duration>,
}

/// One process observed in a table scan.
#[derive(Debug, Clone)]
pub struct ProcSnapshot {
    pub pid: u32,
    pub cmdline: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

/// Enumerate the full OS process table.
pub fn scan_processes() -> Vec<ProcSnapshot> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .iter()
        .map(|(pid, proc_)| ProcSnapshot {
            pid: pid.as_u32(),
            cmdline: proc_.cmd().to_vec(),
            cwd: proc_.cwd().map(Path::to_path_buf),
            started_at: epoch_secs_to_utc(proc_.start_time()),
        })
        .collect()
}

fn epoch_secs_to_utc(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Point-in-time query of a single process; `None` once the process is gone.
fn with_process<T>(pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if !sys.refresh_process(pid) {
        return None;
    }
    sys.process(pid).map(f)
}

/// Virtual memory size, swapped pages included.
pub fn virtual_memory(pid: u32) -> Option<u64> {
    with_process(pid, |p| p.virtual_memory())
}

pub fn run_status(pid: u32) -> Option<RunStatus> {
    with_process(pid, |p| p.status().into())
}

pub fn created_at(pid: u32) -> Option<DateTime<Utc>> {
    with_process(pid, |p| epoch_secs_to_utc(p.start_time()))
}

/// Paths currently open by the process.
#[cfg(target_os = "linux")]
pub fn open_files(pid: u32) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(format!("/proc/{}/fd", pid))? {
        let entry = match entry {
            Ok(e) => e,
            // An fd can close between listing and inspection.
            Err(_) => continue,
        };
        if let Ok(target) = std::fs::read_link(entry.path()) {
            if target.is_absolute() {
                paths.push(target);
            }
        }
    }
    Ok(paths)
}

#[cfg(not(target_os = "linux"))]
pub fn open_files(_pid: u32) -> io::Result<Vec<PathBuf>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "open file enumeration requires /proc",
    ))
}

/// User/system/iowait CPU times from `/proc/<pid>/stat`. sysinfo exposes no
/// cumulative CPU times, so this reads the stat line directly; the comm field
/// may contain spaces, so fields are taken after the closing paren.
#[cfg(target_os = "linux")]
pub fn cpu_times(pid: u32) -> io::Result<CpuTimes> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stat line"))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    let tick = |n: usize| -> Option<u64> { fields.get(n).and_then(|f| f.parse().ok()) };
    // Post-comm index 11/12 = utime/stime, 39 = delayacct_blkio_ticks.
    let utime = tick(11)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing utime field"))?;
    let stime = tick(12)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing stime field"))?;
    let blkio = tick(39);

    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let hz = if hz > 0 { hz as u64 } else { 100 };
    let to_duration = |ticks: u64| Duration::from_millis(ticks * 1000 / hz);

    Ok(CpuTimes {
        user: to_duration(utime),
        system: to_duration(stime),
        iowait: blkio.map(to_duration),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn cpu_times(_pid: u32) -> io::Result<CpuTimes> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU time accounting requires /proc",
    ))
}

fn signal(pid: u32, sig: libc::c_int) -> io::Result<()> {
    // Safety: kill(2) with a valid signal number; the pid came from a table scan.
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Pause the process (SIGSTOP).
pub fn suspend(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGSTOP)
}

/// Unpause the process (SIGCONT).
pub fn resume(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGCONT)
}

/// Ask the process to terminate (SIGTERM). A stopped process will not act on
/// this until it is resumed.
pub fn terminate(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGTERM)
}

/// Move the process to the most yielding scheduling priority.
pub fn set_lowest_priority(pid: u32) -> io::Result<()> {
    // Safety: setpriority(2) on a pid we just spawned.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid, 19) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Free bytes on the filesystem holding `path`, via statvfs.
pub fn free_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // Safety: statvfs is well-defined for a valid NUL-terminated path.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}
