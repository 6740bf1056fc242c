use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Resource caps applied to one sandboxed execution
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    pub cpu_time_limit: f64,
    pub cpu_extra_time: f64,
    pub wall_time_limit: f64,
    pub memory_limit: i64,
    pub max_processes_and_or_threads: i64,
    pub max_file_size: i64,
    pub number_of_runs: i64,
    pub enable_per_process_and_thread_time_limit: bool,
    pub enable_per_process_and_thread_memory_limit: bool,
    pub redirect_stderr_to_stdout: bool,
    pub enable_network: bool,
}

/// A named file materialized in the sandbox scratch directory
#[derive(Debug, Clone)]
pub struct SandboxFile {
    pub name: String,
    pub content: String,
}

/// Outcome of one sandboxed execution
///
/// `exit_code` is set iff the process exited normally; `signal` iff it was
/// killed by a signal. `message` classifies the run.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub stdout: String,
    pub stderr: String,
    pub time: f64,
    pub memory: i64,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub message: Option<String>,
}

impl SandboxResult {
    /// Whether the program ran to a clean exit
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }
}

pub const MSG_OK: &str = "OK";
pub const MSG_TIME_LIMIT: &str = "Time limit exceeded";
pub const MSG_MEMORY_LIMIT: &str = "Memory limit exceeded";
pub const MSG_RUNTIME_ERROR: &str = "Runtime error";

/// Trait for different sandbox execution implementations
///
/// Abstracts the functionality needed to run user code in different
/// environments - from full isolation with `isolate` to plain process
/// execution without sandboxing. An `Err` from `exec` marks an internal
/// sandbox failure; resource-limit violations are regular results.
pub trait SandboxRunner: Send + Sync {
    /// Creates a new sandbox runner instance with the given ID
    fn build(id: u8) -> Result<Self>
    where
        Self: Sized;

    /// Resets the scratch directory for a new submission
    fn reset(&self) -> Result<()>;

    /// Materializes the given files into the scratch directory
    fn write_files(&self, files: &[SandboxFile]) -> Result<()>;

    /// Executes one run of `command` under the given limits
    fn exec(&self, command: &str, stdin: Option<&str>, limits: &SandboxLimits)
        -> Result<SandboxResult>;

    /// Executes `command` `number_of_runs` times sequentially.
    ///
    /// Reports the slowest `time` and the maximum `memory` across runs;
    /// stdout/stderr come from the last run. A run that exits non-zero or is
    /// killed is reported as-is and ends the sequence.
    fn exec_repeated(
        &self,
        command: &str,
        stdin: Option<&str>,
        limits: &SandboxLimits,
    ) -> Result<SandboxResult> {
        let runs = limits.number_of_runs.max(1);
        let mut slowest = 0.0f64;
        let mut max_memory = 0i64;

        for run in 1..=runs {
            let mut result = self.exec(command, stdin, limits)?;
            slowest = slowest.max(result.time);
            max_memory = max_memory.max(result.memory);
            result.time = slowest;
            result.memory = max_memory;

            if !result.success() || run == runs {
                return Ok(result);
            }
        }

        unreachable!("number_of_runs loop always returns on the last run");
    }
}

/// Rejects file names that could escape the scratch directory
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && name != "."
}

/// Human-readable name for a kill signal number
pub fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        4 => "SIGILL".to_string(),
        6 => "SIGABRT".to_string(),
        8 => "SIGFPE".to_string(),
        9 => "SIGKILL".to_string(),
        11 => "SIGSEGV".to_string(),
        13 => "SIGPIPE".to_string(),
        15 => "SIGTERM".to_string(),
        24 => "SIGXCPU".to_string(),
        25 => "SIGXFSZ".to_string(),
        other => format!("signal {other}"),
    }
}
