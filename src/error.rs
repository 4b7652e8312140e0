use std::path::PathBuf;

use thiserror::Error;

use crate::job::cmdline::CmdlineError;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Not a plotter invocation: {0}")]
    Cmdline(#[from] CmdlineError),

    #[error("Process {pid} has more than one log file open under the log root: {first} and {second}")]
    AmbiguousLogfile {
        pid: u32,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Process {0} disappeared during inspection")]
    ProcessGone(u32),

    #[error("Log file already exists (concurrent instance race): {0}")]
    LogfileExists(PathBuf),

    #[error("Unable to open log file {path}, verify the directory exists and is writable: {source}")]
    LogfileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to launch plot process: {0}")]
    Launch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
