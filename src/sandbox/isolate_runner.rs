use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Result};

use super::runner::{
    signal_name, SandboxFile, SandboxLimits, SandboxResult, SandboxRunner, MSG_MEMORY_LIMIT,
    MSG_OK, MSG_RUNTIME_ERROR, MSG_TIME_LIMIT,
};

// Sandbox cache directory permissions
const CACHE_DIR_PERMISSIONS: u32 = 0o700;

/// A sandbox environment for executing untrusted code using isolate
///
/// The IsolateRunner provides an isolated environment where user-submitted
/// code can be compiled and executed with resource limits and security
/// restrictions using Linux isolate.
pub struct IsolateRunner {
    /// Unique identifier for this sandbox instance (the isolate box id)
    id: u8,
    /// Path to the sandbox's working directory (inside isolate)
    box_dir: PathBuf,
    /// Path to the cache directory for meta files
    cache_dir: PathBuf,
}

impl SandboxRunner for IsolateRunner {
    fn build(id: u8) -> Result<Self> {
        let cache_dir = Self::setup_cache_directory(id)?;
        let box_dir = Self::initialize_isolate_sandbox(id)?;

        log::info!("IsolateRunner {id} initialized successfully");
        Ok(Self {
            id,
            box_dir,
            cache_dir,
        })
    }

    fn reset(&self) -> Result<()> {
        // isolate --init on an existing box recreates it empty
        let output = Command::new("isolate")
            .arg(format!("--box-id={}", self.id))
            .arg("--init")
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!(
                "isolate --init exited with non-zero status: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        log::debug!("IsolateRunner {} reset", self.id);
        Ok(())
    }

    fn write_files(&self, files: &[SandboxFile]) -> Result<()> {
        for file in files {
            fs::write(self.box_dir.join(&file.name), &file.content)?;
        }
        Ok(())
    }

    fn exec(
        &self,
        command: &str,
        stdin: Option<&str>,
        limits: &SandboxLimits,
    ) -> Result<SandboxResult> {
        fs::write(self.box_dir.join("stdin.txt"), stdin.unwrap_or_default())?;

        let meta_path = self.cache_dir.join("run.meta");
        let _ = fs::remove_file(&meta_path);

        let mut cmd = Command::new("isolate");
        cmd.arg(format!("--box-id={}", self.id))
            .arg(format!("--meta={}", meta_path.display()))
            .arg("--full-env")
            .arg(format!("--time={}", limits.cpu_time_limit))
            .arg(format!("--extra-time={}", limits.cpu_extra_time))
            .arg(format!("--wall-time={}", limits.wall_time_limit))
            .arg(format!("--mem={}", limits.memory_limit))
            .arg(format!("--processes={}", limits.max_processes_and_or_threads))
            .arg(format!("--fsize={}", limits.max_file_size));

        if limits.enable_per_process_and_thread_time_limit {
            cmd.arg("--cg-timing");
        }
        if limits.enable_per_process_and_thread_memory_limit {
            cmd.arg("--cg-mem");
        }
        if limits.enable_network {
            cmd.arg("--share-net");
        }

        cmd.args(["--stdin=stdin.txt", "--stdout=stdout.txt"]);
        if limits.redirect_stderr_to_stdout {
            cmd.arg("--stderr-to-stdout");
        } else {
            cmd.arg("--stderr=stderr.txt");
        }

        // The box exit status reflects the judged program; failures are read
        // from the meta file instead.
        let _ = cmd
            .args(["--silent", "--run", "--", "/bin/sh", "-c", command])
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --run: {}", e))?;

        let stdout = read_box_file(&self.box_dir.join("stdout.txt"));
        let stderr = if limits.redirect_stderr_to_stdout {
            String::new()
        } else {
            read_box_file(&self.box_dir.join("stderr.txt"))
        };

        let meta_content = fs::read_to_string(&meta_path)
            .map_err(|e| anyhow!("Failed to read isolate meta file: {}", e))?;

        result_from_meta(&meta_content, limits, stdout, stderr)
    }
}

impl IsolateRunner {
    /// Sets up the cache directory for the sandbox
    fn setup_cache_directory(id: u8) -> Result<PathBuf> {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "kodejudge")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;

        let cache_base_dir = proj_dirs.cache_dir();
        fs::create_dir_all(cache_base_dir)?;
        fs::set_permissions(
            cache_base_dir,
            fs::Permissions::from_mode(CACHE_DIR_PERMISSIONS),
        )?;

        let cache_dir = cache_base_dir.join(id.to_string());
        fs::create_dir_all(&cache_dir)?;

        Ok(cache_dir)
    }

    /// Initializes the isolate sandbox and returns the box directory
    fn initialize_isolate_sandbox(id: u8) -> Result<PathBuf> {
        let output = Command::new("isolate")
            .arg(format!("--box-id={id}"))
            .arg("--init")
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!("isolate --init exited with non-zero status");
        }

        let root_dir_absolute = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root_dir_absolute.is_empty() {
            bail!(
                "isolate --init produced empty stdout; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(PathBuf::from(root_dir_absolute).join("box"))
    }
}

impl Drop for IsolateRunner {
    fn drop(&mut self) {
        let out = Command::new("isolate")
            .arg(format!("--box-id={}", self.id))
            .arg("--cleanup")
            .output();

        if out.is_ok_and(|c| c.status.success()) {
            log::info!("IsolateRunner {} cleaned up", self.id);
        } else {
            log::error!("IsolateRunner {} failed to clean up", self.id);
        }
    }
}

fn read_box_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

/// Builds a SandboxResult from the isolate meta file.
///
/// Meta keys (one `key:value` per line): `time` (CPU seconds), `time-wall`,
/// `max-rss`/`cg-mem` (KB), `exitcode`, `exitsig`, `status`
/// (RE/SG/TO/XX), `cg-oom-killed`, `message`. `status:XX` marks an internal
/// isolate failure and is surfaced as an error.
pub(super) fn result_from_meta(
    meta_content: &str,
    limits: &SandboxLimits,
    stdout: String,
    stderr: String,
) -> Result<SandboxResult> {
    let meta: HashMap<&str, &str> = meta_content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .collect();

    let parse_f64 = |key: &str| meta.get(key).and_then(|v| v.parse::<f64>().ok());
    let parse_i64 = |key: &str| meta.get(key).and_then(|v| v.parse::<i64>().ok());

    if meta.get("status") == Some(&"XX") {
        bail!(
            "isolate internal error: {}",
            meta.get("message").copied().unwrap_or("no message")
        );
    }

    let time = parse_f64("time").unwrap_or_default();
    let memory = parse_i64("cg-mem")
        .or_else(|| parse_i64("max-rss"))
        .unwrap_or_default();
    let oom_killed = parse_i64("cg-oom-killed").unwrap_or_default() != 0;

    let (exit_code, signal, message) = match meta.get("status").copied() {
        Some("TO") => (
            None,
            Some(signal_name(libc::SIGKILL)),
            MSG_TIME_LIMIT.to_string(),
        ),
        Some("SG") => {
            let sig = meta
                .get("exitsig")
                .and_then(|v| v.parse::<i32>().ok())
                .map(signal_name);
            let message = if oom_killed || memory >= limits.memory_limit {
                MSG_MEMORY_LIMIT
            } else {
                MSG_RUNTIME_ERROR
            };
            (None, sig, message.to_string())
        }
        Some("RE") => (
            Some(parse_i64("exitcode").unwrap_or(1) as i32),
            None,
            MSG_RUNTIME_ERROR.to_string(),
        ),
        _ => (
            Some(parse_i64("exitcode").unwrap_or(0) as i32),
            None,
            MSG_OK.to_string(),
        ),
    };

    Ok(SandboxResult {
        stdout,
        stderr,
        time,
        memory,
        exit_code,
        signal,
        message: Some(message),
    })
}
