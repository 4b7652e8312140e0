use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CmdlineError {
    #[error("not a plotter process")]
    NotAPlotter,

    #[error("help-only invocation")]
    HelpRequested,

    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("option {0} is missing its value")]
    MissingValue(String),

    #[error("option {option} has invalid value {value:?}")]
    InvalidValue { option: String, value: String },
}

/// Validated launch parameters recovered from an observed plotter command
/// line. Every field is checked at the parse boundary; nothing downstream
/// re-interprets raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotCommand {
    pub count: u32,
    pub threads: u32,
    pub buckets: u32,
    pub tmpdir: PathBuf,
    pub tmpdir2: Option<PathBuf>,
    pub finaldir: PathBuf,
    pub poolkey: Option<String>,
    pub farmerkey: Option<String>,
}

impl PlotCommand {
    /// The madmax plotter only produces k=32 plots and sizes its own
    /// buffers; these stand in for the parameters its grammar cannot express.
    pub const FIXED_K: u32 = 32;
    pub const FIXED_BUFFER: u32 = 4000;
}

impl Default for PlotCommand {
    fn default() -> Self {
        Self {
            count: 1,
            threads: 4,
            buckets: 256,
            tmpdir: PathBuf::from("."),
            tmpdir2: None,
            finaldir: PathBuf::from("."),
            poolkey: None,
            farmerkey: None,
        }
    }
}

/// True when the command line invokes the known plotting tool.
pub fn is_plotting_cmdline(cmdline: &[String]) -> bool {
    cmdline
        .first()
        .map(|argv0| argv0.to_lowercase().contains("chia_plot"))
        .unwrap_or(false)
}

/// Registry of supported plotter command grammars. Selection is explicit:
/// `latest()` is the newest registered version, and each version parses only
/// its own option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grammar {
    MadmaxV0_1,
}

impl Grammar {
    pub const ALL: &'static [Grammar] = &[Grammar::MadmaxV0_1];

    pub fn latest() -> Grammar {
        // SAFETY: the registry is a non-empty const.
        *Self::ALL.last().expect("at least one grammar registered")
    }

    /// Parse an observed command line into launch parameters.
    ///
    /// Help-only invocations are reported as [`CmdlineError::HelpRequested`]
    /// so the tracker can skip them without treating them as real jobs.
    pub fn parse(&self, cmdline: &[String]) -> Result<PlotCommand, CmdlineError> {
        if !is_plotting_cmdline(cmdline) {
            return Err(CmdlineError::NotAPlotter);
        }
        match self {
            Grammar::MadmaxV0_1 => parse_madmax_v0_1(&cmdline[1..]),
        }
    }
}

fn parse_madmax_v0_1(args: &[String]) -> Result<PlotCommand, CmdlineError> {
    let mut cmd = PlotCommand::default();
    let mut help = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        // Long options may carry their value inline: --count=2
        let (option, inline) = match arg.split_once('=') {
            Some((opt, value)) if arg.starts_with("--") => (opt, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };

        let mut value = |option: &str| -> Result<String, CmdlineError> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| CmdlineError::MissingValue(option.to_string())),
            }
        };

        match option {
            "-h" | "--help" => help = true,
            "-n" | "--count" => cmd.count = parse_int(option, &value(option)?)?,
            "-r" | "--threads" => cmd.threads = parse_int(option, &value(option)?)?,
            "-u" | "--buckets" => cmd.buckets = parse_int(option, &value(option)?)?,
            "-t" | "--tmpdir" => cmd.tmpdir = PathBuf::from(value(option)?),
            "-2" | "--tmpdir2" => cmd.tmpdir2 = Some(PathBuf::from(value(option)?)),
            "-d" | "--finaldir" => cmd.finaldir = PathBuf::from(value(option)?),
            "-p" | "--poolkey" => cmd.poolkey = Some(value(option)?),
            "-f" | "--farmerkey" => cmd.farmerkey = Some(value(option)?),
            other => return Err(CmdlineError::UnknownOption(other.to_string())),
        }
    }

    if help {
        return Err(CmdlineError::HelpRequested);
    }
    Ok(cmd)
}

fn parse_int(option: &str, value: &str) -> Result<u32, CmdlineError> {
    value.parse().map_err(|_| CmdlineError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}
