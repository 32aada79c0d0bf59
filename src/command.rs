//! Structured command lines for the external tools and the process runner that executes them.

use log::{debug, info, warn};

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::{MsmError, Result};

/// The arguments understood by the registration, resampling and conversion executables.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArg {
    /// `--inmesh=<path>`
    InMesh(PathBuf),
    /// `--refmesh=<path>`
    RefMesh(PathBuf),
    /// `--indata=<path>`
    InData(PathBuf),
    /// `--refdata=<path>`
    RefData(PathBuf),
    /// `--conf=<path>`
    Conf(PathBuf),
    /// `-o <prefix>`, the output prefix of the registration.
    OutputPrefix(PathBuf),
    /// `-f <format>`
    Format(String),
    Verbose,
    Debug,
    /// `--levels=<n>`
    Levels(u32),
    /// `-i <path>`
    Input(PathBuf),
    /// `-o <path>`, the output file of a conversion.
    OutputFile(PathBuf),
    /// `--outputtype=<type>`
    OutputType(String),
    /// `-labels <path>`
    Labels(PathBuf),
    /// `-project <path>`
    Project(PathBuf),
    Positional(PathBuf),
}

fn joined(flag: &str, value: &OsStr) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(value);
    arg
}

impl ToolArg {
    /// The argv entries of this argument.
    pub fn to_args(&self) -> Vec<OsString> {
        match self {
            ToolArg::InMesh(p) => vec![joined("--inmesh=", p.as_os_str())],
            ToolArg::RefMesh(p) => vec![joined("--refmesh=", p.as_os_str())],
            ToolArg::InData(p) => vec![joined("--indata=", p.as_os_str())],
            ToolArg::RefData(p) => vec![joined("--refdata=", p.as_os_str())],
            ToolArg::Conf(p) => vec![joined("--conf=", p.as_os_str())],
            ToolArg::OutputPrefix(p) | ToolArg::OutputFile(p) => vec![OsString::from("-o"), p.clone().into()],
            ToolArg::Format(f) => vec![OsString::from("-f"), OsString::from(f)],
            ToolArg::Verbose => vec![OsString::from("--verbose")],
            ToolArg::Debug => vec![OsString::from("--debug")],
            ToolArg::Levels(n) => vec![OsString::from(format!("--levels={}", n))],
            ToolArg::Input(p) => vec![OsString::from("-i"), p.clone().into()],
            ToolArg::OutputType(t) => vec![OsString::from(format!("--outputtype={}", t))],
            ToolArg::Labels(p) => vec![OsString::from("-labels"), p.clone().into()],
            ToolArg::Project(p) => vec![OsString::from("-project"), p.clone().into()],
            ToolArg::Positional(p) => vec![p.clone().into()],
        }
    }
}

/// A program together with its arguments. Displays as the equivalent shell command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<ToolArg>,
}

impl ToolInvocation {
    pub fn new<P: AsRef<Path>>(program: P) -> ToolInvocation {
        ToolInvocation {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: ToolArg) -> ToolInvocation {
        self.args.push(arg);
        self
    }

    /// Add `arg` only if `cond` holds.
    pub fn arg_if(self, cond: bool, arg: ToolArg) -> ToolInvocation {
        if cond {
            self.arg(arg)
        } else {
            self
        }
    }

    pub fn argv(&self) -> Vec<OsString> {
        self.args.iter().flat_map(|a| a.to_args()).collect()
    }

    /// The program's file name, e.g. "msm".
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn quote(word: &str) -> String {
    if !word.is_empty() && !word.chars().any(|c| c.is_whitespace() || "'\"\\$`;&|<>()".contains(c)) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", quote(&self.program.to_string_lossy()))?;
        for arg in self.argv() {
            write!(f, " {}", quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}


/// Executes tool invocations. Implemented by [`SystemRunner`]; tests inject scripted runners.
pub trait ProcessRunner {
    /// Run the invocation to completion and return its exit code.
    fn run(&self, invocation: &ToolInvocation) -> Result<i32>;
}

/// Runs invocations as child processes of the current process, logging their output.
///
/// Lines on stdout are logged at info level, lines on stderr at warn level.
/// A process killed by a signal reports exit code -1.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<i32> {
        info!("Running: {}", invocation);
        let mut child = Command::new(&invocation.program)
            .args(invocation.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => MsmError::ToolNotFound(invocation.program.display().to_string()),
                _ => MsmError::Io(e),
            })?;

        let stderr_logger = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    warn!("{}", line);
                }
            })
        });
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                info!("{}", line);
            }
        }
        if let Some(handle) = stderr_logger {
            if handle.join().is_err() {
                warn!("Lost stderr of {}: the logging thread panicked", invocation.program_name());
            }
        }

        let status = child.wait()?;
        debug!("{} exited with {}", invocation.program_name(), status);
        Ok(status.code().unwrap_or(-1))
    }
}

/// Run the invocation and turn a non-zero exit code into [`MsmError::ToolFailed`] carrying the command line.
pub fn run_checked(runner: &dyn ProcessRunner, invocation: &ToolInvocation) -> Result<()> {
    let code = runner.run(invocation)?;
    if code != 0 {
        return Err(MsmError::ToolFailed(invocation.to_string(), code));
    }
    Ok(())
}
