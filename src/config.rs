use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::routes::SubmissionPayload;
use crate::sandbox::SandboxLimits;

#[derive(Parser)]
#[command(name = "kodejudge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to a language seed file (JSON array); built-in seed when omitted
    #[arg(long = "languages", short = 'l')]
    pub languages_path: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long = "bind-address", short = 'a')]
    pub bind_address: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long = "bind-port", short = 'p')]
    pub bind_port: Option<u16>,

    /// Number of worker slots; overrides WORKER_CONCURRENCY
    #[arg(long = "workers", short = 'w')]
    pub workers: Option<u8>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v', default_value_t = false)]
    pub verbose: bool,
}

impl CliArgs {
    /// Load the language seed from the given file, or the built-in seed
    pub fn load_languages(&self) -> std::io::Result<Vec<Language>> {
        match &self.languages_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader).map_err(|e| e.into())
            }
            None => Ok(default_languages()),
        }
    }
}

/// A single catalog entry; immutable after startup
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Language {
    pub id: i32,
    pub name: String,
    pub version: String,
    pub source_filename: String,
    #[serde(default)]
    pub compile_cmd: Option<String>,
    pub run_cmd: String,
}

/// O(1) lookup over the seeded languages
pub struct LanguageCatalog {
    by_id: HashMap<i32, Language>,
}

impl LanguageCatalog {
    pub fn new(languages: Vec<Language>) -> Self {
        let by_id = languages.into_iter().map(|l| (l.id, l)).collect();
        Self { by_id }
    }

    pub fn get(&self, id: i32) -> Option<&Language> {
        self.by_id.get(&id)
    }

    pub fn list(&self) -> Vec<&Language> {
        let mut languages: Vec<&Language> = self.by_id.values().collect();
        languages.sort_by_key(|l| l.id);
        languages
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Built-in language seed, used when no --languages file is given.
///
/// Commands assume the interpreter/compiler is on PATH inside the sandbox.
pub fn default_languages() -> Vec<Language> {
    let lang = |id: i32, name: &str, version: &str, file: &str, compile: Option<&str>, run: &str| {
        Language {
            id,
            name: name.to_string(),
            version: version.to_string(),
            source_filename: file.to_string(),
            compile_cmd: compile.map(str::to_string),
            run_cmd: run.to_string(),
        }
    };

    vec![
        lang(1, "Python", "3.13", "main.py", None, "python3 main.py"),
        lang(2, "Node.js", "20", "main.js", None, "node main.js"),
        lang(3, "C", "gcc 12.2.0", "main.c", Some("gcc *.c -o main"), "./main"),
        lang(4, "C++", "g++ 12.2.0", "main.cpp", Some("g++ *.cpp -o main"), "./main"),
        lang(
            5,
            "Java",
            "openjdk 17",
            "Main.java",
            Some("javac Main.java"),
            "java Main",
        ),
        lang(
            6,
            "Go",
            "1.21",
            "main.go",
            Some("go build -o main main.go"),
            "./main",
        ),
        lang(
            7,
            "Rust",
            "1.90.0",
            "main.rs",
            Some("rustc --crate-type bin -O -o main main.rs"),
            "./main",
        ),
        lang(8, "Lua", "5.4", "main.lua", None, "lua main.lua"),
    ]
}

/// Runtime options, read once from the environment at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub worker_concurrency: u8,
    pub queue_prefix: String,
    pub wait_timeout: f64,
    pub database_path: Option<String>,
    pub max_additional_files: usize,
    pub max_additional_files_size: i64,
    pub default_limits: SandboxLimits,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 4),
            queue_prefix: env::var("QUEUE_PREFIX").unwrap_or_else(|_| "kodejudge".to_string()),
            wait_timeout: parse_env("WAIT_TIMEOUT", 15.0_f64).max(0.0),
            database_path: env::var("DATABASE_PATH").ok(),
            max_additional_files: parse_env("SANDBOX_MAX_ADDITIONAL_FILES", 10),
            max_additional_files_size: parse_env("SANDBOX_MAX_ADDITIONAL_FILES_SIZE", 2048),
            default_limits: SandboxLimits {
                cpu_time_limit: parse_env("SANDBOX_CPU_TIME_LIMIT", 2.0),
                cpu_extra_time: parse_env("SANDBOX_CPU_EXTRA_TIME", 0.5),
                wall_time_limit: parse_env("SANDBOX_WALL_TIME_LIMIT", 5.0),
                memory_limit: parse_env("SANDBOX_MEMORY_LIMIT", 128_000),
                max_processes_and_or_threads: parse_env("SANDBOX_MAX_PROCESSES", 128),
                max_file_size: parse_env("SANDBOX_MAX_FILE_SIZE", 10_240),
                number_of_runs: parse_env("SANDBOX_NUMBER_OF_RUNS", 1),
                enable_per_process_and_thread_time_limit: flag_env(
                    "SANDBOX_ENABLE_PER_PROCESS_TIME_LIMIT",
                ),
                enable_per_process_and_thread_memory_limit: flag_env(
                    "SANDBOX_ENABLE_PER_PROCESS_MEMORY_LIMIT",
                ),
                redirect_stderr_to_stdout: flag_env("SANDBOX_REDIRECT_STDERR_TO_STDOUT"),
                enable_network: flag_env("SANDBOX_ENABLE_NETWORK"),
            },
        }
    }

    /// Queue name surfaced by the health endpoints
    pub fn queue_name(&self) -> String {
        format!("{}_submission_queue", self.queue_prefix)
    }

    /// Effective sandbox limits for one submission: configured defaults with
    /// the payload's per-submission overrides applied
    pub fn limits_for(&self, payload: &SubmissionPayload) -> SandboxLimits {
        let d = &self.default_limits;
        SandboxLimits {
            cpu_time_limit: payload.cpu_time_limit.unwrap_or(d.cpu_time_limit),
            cpu_extra_time: payload.cpu_extra_time.unwrap_or(d.cpu_extra_time),
            wall_time_limit: payload.wall_time_limit.unwrap_or(d.wall_time_limit),
            memory_limit: payload.memory_limit.unwrap_or(d.memory_limit),
            max_processes_and_or_threads: payload
                .max_processes_and_or_threads
                .unwrap_or(d.max_processes_and_or_threads),
            max_file_size: payload.max_file_size.unwrap_or(d.max_file_size),
            number_of_runs: payload.number_of_runs.unwrap_or(d.number_of_runs),
            enable_per_process_and_thread_time_limit: payload
                .enable_per_process_and_thread_time_limit
                .unwrap_or(d.enable_per_process_and_thread_time_limit),
            enable_per_process_and_thread_memory_limit: payload
                .enable_per_process_and_thread_memory_limit
                .unwrap_or(d.enable_per_process_and_thread_memory_limit),
            redirect_stderr_to_stdout: payload
                .redirect_stderr_to_stdout
                .unwrap_or(d.redirect_stderr_to_stdout),
            enable_network: payload.enable_network.unwrap_or(d.enable_network),
        }
    }
}

fn parse_env<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Invalid value for {key}: {raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}

fn flag_env(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
