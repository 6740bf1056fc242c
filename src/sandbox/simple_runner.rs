use std::fs;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::runner::{
    signal_name, SandboxFile, SandboxLimits, SandboxResult, SandboxRunner, MSG_OK,
    MSG_RUNTIME_ERROR, MSG_TIME_LIMIT,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A simple runner that executes code without sandboxing
///
/// SimpleRunner provides basic code compilation and execution without the
/// security restrictions of isolate. It only enforces the wall-clock limit
/// but no memory, file system, process-count, or network controls. This is
/// intended for development/testing environments where security isolation is
/// not critical.
pub struct SimpleRunner {
    /// Unique identifier for this instance
    id: u8,
    /// Path to the working directory for this runner
    work_dir: PathBuf,
}

impl SandboxRunner for SimpleRunner {
    fn build(id: u8) -> Result<Self> {
        let work_dir = std::env::temp_dir()
            .join("kodejudge-simple")
            .join(id.to_string());
        fs::create_dir_all(&work_dir)?;

        log::info!("SimpleRunner {id} initialized successfully");
        log::warn!(
            "SimpleRunner provides NO security isolation - use only in trusted environments"
        );

        Ok(Self { id, work_dir })
    }

    fn reset(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)?;
        log::debug!("SimpleRunner {} reset", self.id);
        Ok(())
    }

    fn write_files(&self, files: &[SandboxFile]) -> Result<()> {
        for file in files {
            fs::write(self.work_dir.join(&file.name), &file.content)?;
        }
        Ok(())
    }

    fn exec(
        &self,
        command: &str,
        stdin: Option<&str>,
        limits: &SandboxLimits,
    ) -> Result<SandboxResult> {
        let stdout_path = self.work_dir.join("stdout.txt");
        let stderr_path = self.work_dir.join("stderr.txt");

        let stdout_file = fs::File::create(&stdout_path)?;
        let stderr_file = if limits.redirect_stderr_to_stdout {
            stdout_file.try_clone()?
        } else {
            fs::File::create(&stderr_path)?
        };

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn command: {}", e))?;

        // Feed stdin from a separate thread so a non-reading child cannot
        // wedge the worker on a full pipe
        let stdin_pipe = child.stdin.take();
        let stdin_content = stdin.unwrap_or_default().to_string();
        let writer = std::thread::spawn(move || {
            if let Some(mut pipe) = stdin_pipe {
                let _ = pipe.write_all(stdin_content.as_bytes());
            }
        });

        let deadline =
            Duration::from_secs_f64((limits.wall_time_limit + limits.cpu_extra_time).max(0.0));
        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if start.elapsed() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        let elapsed = start.elapsed().as_secs_f64();
        let _ = writer.join();

        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = if limits.redirect_stderr_to_stdout {
            String::new()
        } else {
            fs::read_to_string(&stderr_path).unwrap_or_default()
        };

        // Wall clock stands in for CPU time; no memory tracking in simple mode
        let mut result = SandboxResult {
            stdout,
            stderr,
            time: elapsed,
            memory: 0,
            exit_code: None,
            signal: None,
            message: None,
        };

        match status {
            None => {
                result.signal = Some(signal_name(libc::SIGKILL));
                result.message = Some(MSG_TIME_LIMIT.to_string());
            }
            Some(status) if status.success() => {
                result.exit_code = Some(0);
                result.message = Some(MSG_OK.to_string());
            }
            Some(status) => {
                result.exit_code = status.code();
                result.signal = status.signal().map(signal_name);
                result.message = Some(MSG_RUNTIME_ERROR.to_string());
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(wall_time_limit: f64) -> SandboxLimits {
        SandboxLimits {
            cpu_time_limit: 2.0,
            cpu_extra_time: 0.0,
            wall_time_limit,
            memory_limit: 128_000,
            max_processes_and_or_threads: 128,
            max_file_size: 10_240,
            number_of_runs: 1,
            enable_per_process_and_thread_time_limit: false,
            enable_per_process_and_thread_memory_limit: false,
            redirect_stderr_to_stdout: false,
            enable_network: false,
        }
    }

    #[test]
    fn test_exec_captures_stdout() {
        let runner = SimpleRunner::build(101).unwrap();
        runner.reset().unwrap();
        let result = runner.exec("echo hello", None, &limits(5.0)).unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.message.as_deref(), Some(MSG_OK));
    }

    #[test]
    fn test_exec_feeds_stdin() {
        let runner = SimpleRunner::build(102).unwrap();
        runner.reset().unwrap();
        let result = runner.exec("cat", Some("piped"), &limits(5.0)).unwrap();
        assert_eq!(result.stdout, "piped");
    }

    #[test]
    fn test_exec_nonzero_exit_is_runtime_error() {
        let runner = SimpleRunner::build(103).unwrap();
        runner.reset().unwrap();
        let result = runner
            .exec("echo nope >&2; exit 3", None, &limits(5.0))
            .unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr, "nope\n");
        assert_eq!(result.message.as_deref(), Some(MSG_RUNTIME_ERROR));
    }

    #[test]
    fn test_exec_kills_on_wall_time() {
        let runner = SimpleRunner::build(104).unwrap();
        runner.reset().unwrap();
        let start = Instant::now();
        let result = runner.exec("sleep 10", None, &limits(0.3)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result.exit_code, None);
        assert_eq!(result.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(result.message.as_deref(), Some(MSG_TIME_LIMIT));
    }

    #[test]
    fn test_exec_redirects_stderr_into_stdout() {
        let runner = SimpleRunner::build(105).unwrap();
        runner.reset().unwrap();
        let mut l = limits(5.0);
        l.redirect_stderr_to_stdout = true;
        let result = runner.exec("echo out; echo err >&2", None, &l).unwrap();
        assert!(result.stdout.contains("out"));
        assert!(result.stdout.contains("err"));
        assert_eq!(result.stderr, "");
    }

    #[test]
    fn test_write_files_materializes_into_work_dir() {
        let runner = SimpleRunner::build(106).unwrap();
        runner.reset().unwrap();
        runner
            .write_files(&[SandboxFile {
                name: "data.txt".to_string(),
                content: "payload".to_string(),
            }])
            .unwrap();
        let result = runner.exec("cat data.txt", None, &limits(5.0)).unwrap();
        assert_eq!(result.stdout, "payload");
    }
}
