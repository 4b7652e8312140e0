use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::phase::Phase;

/// Bounded retry for plot-id discovery. The plotter scans pre-existing plot
/// directories before it prints the plot name, so a freshly bound log may
/// not contain the marker yet.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause: Duration::from_secs(1),
        }
    }
}

/// Derive the job's phase from the full log contents.
///
/// Every line is scanned and the maximum sub-phase per phase is retained;
/// the result is the highest phase present with its retained sub-phase.
/// Marker lines near phase boundaries are not strictly ordered in the file,
/// so the whole log is re-scanned on every refresh rather than tailed.
pub fn parse_phase(contents: &str) -> Phase {
    let mut subphases: HashMap<u32, u32> = HashMap::new();
    let mut note = |phase: u32, sub: u32| {
        let entry = subphases.entry(phase).or_insert(sub);
        if sub > *entry {
            *entry = sub;
        }
    };

    for line in contents.lines() {
        if let Some(table) = marker_number(line, "[P1] Table ", " took") {
            note(1, table);
        } else if let Some(table) = marker_number(line, "[P2] Table ", " scan took") {
            // The scan counts tables down from 7; invert so progress ascends.
            note(2, 7u32.saturating_sub(table));
        } else if let Some(table) = p3_table_number(line) {
            note(3, table);
        } else if line.starts_with("[P4] Starting to write C1 and C3 tables") {
            note(4, 0);
        } else if line.starts_with("[P4] Finished writing C1 and C3 tables") {
            note(4, 1);
        } else if line.starts_with("[P4] Finished writing C2 table") {
            note(4, 2);
        }
    }

    match subphases.iter().max_by_key(|(phase, _)| **phase) {
        Some((&major, &minor)) => Phase::new(major, minor),
        None => Phase::unknown(),
    }
}

/// Match `<prefix><number><suffix>...` and return the number.
fn marker_number(line: &str, prefix: &str, suffix: &str) -> Option<u32> {
    let rest = line.strip_prefix(prefix)?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, rest) = rest.split_at(digits_end);
    if digits.is_empty() || !rest.starts_with(suffix) {
        return None;
    }
    digits.parse().ok()
}

/// `[P3-<pair>] Table <n> took ...`
fn p3_table_number(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("[P3-")?;
    let bracket = rest.find(']')?;
    if !rest[..bracket].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    marker_number(&rest[bracket + 1..], " Table ", " took")
}

/// Extract the plot identifier from the `Plot Name:` marker: the trailing
/// hyphen-delimited segment of the generated plot name.
pub fn parse_plot_id(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let name = line.strip_prefix("Plot Name: ")?;
        name.rsplit('-').next().map(|id| id.to_string())
    })
}

/// Read the plot id, retrying per `policy` through the injected sleep.
/// Returns `Ok(None)` when the marker never appears; the caller falls back
/// to a placeholder id rather than failing the job.
pub fn read_plot_id(
    path: &Path,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> io::Result<Option<String>> {
    for attempt in 0..policy.attempts {
        let contents = std::fs::read_to_string(path)?;
        if let Some(id) = parse_plot_id(&contents) {
            return Ok(Some(id));
        }
        if attempt + 1 < policy.attempts {
            sleep(policy.pause);
        }
    }
    Ok(None)
}

pub fn read_phase(path: &Path) -> io::Result<Phase> {
    Ok(parse_phase(&std::fs::read_to_string(path)?))
}

/// Time since the log was last written.
pub fn staleness(path: &Path) -> io::Result<Duration> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(mtime)
        .unwrap_or(Duration::ZERO))
}

pub fn last_modified(path: &Path) -> io::Result<DateTime<Utc>> {
    Ok(std::fs::metadata(path)?.modified()?.into())
}

/// Creation time of the log file; filesystems without birth times fall back
/// to the modification time.
pub fn created(path: &Path) -> io::Result<DateTime<Utc>> {
    let meta = std::fs::metadata(path)?;
    Ok(meta.created().or_else(|_| meta.modified())?.into())
}
