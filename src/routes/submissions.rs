mod delete;
mod get;
mod post;

pub use delete::delete_submission_handler;
pub use get::{get_batch_handler, get_submission_by_id_handler, list_submissions_handler};
pub use post::{post_batch_handler, post_submission_handler};

use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::config::{LanguageCatalog, Settings};
use crate::create_timestamp;
use crate::encoding::EncodingError;
use crate::sandbox::{is_safe_file_name, SandboxLimits};

/// A named byte blob materialized alongside the source file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdditionalFile {
    pub name: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    Finished,
    Error,
    Cancelled,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "FINISHED" => Some(Self::Finished),
            "ERROR" => Some(Self::Error),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }
}

/// Resource telemetry of the executed program
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionMeta {
    pub time: f64,
    pub memory: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_matches: Option<bool>,
}

/// Inbound submission payload; limit fields override configured defaults
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionPayload {
    pub language_id: i32,
    pub source_code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub additional_files: Option<Vec<AdditionalFile>>,
    #[serde(default)]
    pub cpu_time_limit: Option<f64>,
    #[serde(default)]
    pub cpu_extra_time: Option<f64>,
    #[serde(default)]
    pub wall_time_limit: Option<f64>,
    #[serde(default)]
    pub memory_limit: Option<i64>,
    #[serde(default)]
    pub max_processes_and_or_threads: Option<i64>,
    #[serde(default)]
    pub max_file_size: Option<i64>,
    #[serde(default)]
    pub number_of_runs: Option<i64>,
    #[serde(default)]
    pub enable_per_process_and_thread_time_limit: Option<bool>,
    #[serde(default)]
    pub enable_per_process_and_thread_memory_limit: Option<bool>,
    #[serde(default)]
    pub redirect_stderr_to_stdout: Option<bool>,
    #[serde(default)]
    pub enable_network: Option<bool>,
}

/// The durable submission record, as stored and as served
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub language_id: i32,
    pub source_code: String,
    pub stdin: Option<String>,
    pub expected_output: Option<String>,
    pub additional_files: Vec<AdditionalFile>,
    #[serde(flatten)]
    pub limits: SandboxLimits,
    pub status: SubmissionStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub meta: Option<ExecutionMeta>,
    pub created_at: String,
    pub updated_at: String,
}

impl SubmissionRecord {
    /// Builds a fresh PENDING record from a validated payload
    pub fn from_payload(payload: SubmissionPayload, limits: SandboxLimits) -> Self {
        let now = create_timestamp();
        Self {
            id: Uuid::new_v4(),
            language_id: payload.language_id,
            source_code: payload.source_code,
            stdin: payload.stdin,
            expected_output: payload.expected_output,
            additional_files: payload.additional_files.unwrap_or_default(),
            limits,
            status: SubmissionStatus::Pending,
            stdout: None,
            stderr: None,
            compile_output: None,
            meta: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Serialize)]
pub struct SubmissionId {
    pub id: Uuid,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubmissionPage {
    pub items: Vec<SubmissionRecord>,
    pub total_items: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub page_size: i64,
}

#[derive(Deserialize)]
pub struct CreateQuery {
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub base64_encoded: bool,
}

#[derive(Deserialize)]
pub struct EncodingQuery {
    #[serde(default)]
    pub base64_encoded: bool,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub base64_encoded: bool,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Deserialize)]
pub struct BatchGetQuery {
    pub ids: String,
    #[serde(default)]
    pub base64_encoded: bool,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Language with ID {0} is not supported.")]
    UnknownLanguage(i32),
    #[error("Too many additional files: {count} (max {max}).")]
    TooManyFiles { count: usize, max: usize },
    #[error("Additional files exceed the {max_kb} KB total size limit.")]
    FilesTooLarge { max_kb: i64 },
    #[error("Invalid file name: '{0}'.")]
    UnsafeFileName(String),
    #[error(transparent)]
    InvalidBase64(#[from] EncodingError),
    #[error("Field '{0}' must not be negative.")]
    NegativeLimit(&'static str),
    #[error("number_of_runs must be at least 1.")]
    InvalidNumberOfRuns,
}

impl ValidationError {
    /// 400 for malformed input, 422 for out-of-range limit overrides
    pub fn to_response(&self) -> HttpResponse {
        self.respond(self.to_string())
    }

    /// Same as `to_response` but names the offending batch element
    pub fn to_batch_response(&self, index: usize) -> HttpResponse {
        self.respond(format!("Submission {index}: {self}"))
    }

    fn respond(&self, message: String) -> HttpResponse {
        match self {
            Self::NegativeLimit(_) | Self::InvalidNumberOfRuns => {
                HttpResponse::UnprocessableEntity().json(ErrorResponseWithMessage {
                    reason: "ERR_VALIDATION",
                    code: 4,
                    message,
                })
            }
            _ => HttpResponse::BadRequest().json(ErrorResponseWithMessage {
                reason: "ERR_INVALID_ARGUMENT",
                code: 1,
                message,
            }),
        }
    }
}

/// Validates a decoded payload against the catalog and configured caps.
///
/// Nothing is persisted when validation fails.
pub fn validate_payload(
    payload: &SubmissionPayload,
    catalog: &LanguageCatalog,
    settings: &Settings,
) -> Result<(), ValidationError> {
    if catalog.get(payload.language_id).is_none() {
        return Err(ValidationError::UnknownLanguage(payload.language_id));
    }

    if let Some(files) = &payload.additional_files {
        if files.len() > settings.max_additional_files {
            return Err(ValidationError::TooManyFiles {
                count: files.len(),
                max: settings.max_additional_files,
            });
        }
        let total_bytes: usize = files.iter().map(|f| f.content.len()).sum();
        if total_bytes as i64 > settings.max_additional_files_size * 1024 {
            return Err(ValidationError::FilesTooLarge {
                max_kb: settings.max_additional_files_size,
            });
        }
        for file in files {
            if !is_safe_file_name(&file.name) {
                return Err(ValidationError::UnsafeFileName(file.name.clone()));
            }
        }
    }

    for (field, value) in [
        ("cpu_time_limit", payload.cpu_time_limit),
        ("cpu_extra_time", payload.cpu_extra_time),
        ("wall_time_limit", payload.wall_time_limit),
    ] {
        if value.is_some_and(|v| v < 0.0 || !v.is_finite()) {
            return Err(ValidationError::NegativeLimit(field));
        }
    }
    for (field, value) in [
        ("memory_limit", payload.memory_limit),
        ("max_processes_and_or_threads", payload.max_processes_and_or_threads),
        ("max_file_size", payload.max_file_size),
    ] {
        if value.is_some_and(|v| v < 0) {
            return Err(ValidationError::NegativeLimit(field));
        }
    }
    if payload.number_of_runs.is_some_and(|n| n < 1) {
        return Err(ValidationError::InvalidNumberOfRuns);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_languages;

    fn test_settings() -> Settings {
        Settings {
            worker_concurrency: 1,
            queue_prefix: "test".to_string(),
            wait_timeout: 15.0,
            database_path: None,
            max_additional_files: 2,
            max_additional_files_size: 1,
            default_limits: SandboxLimits {
                cpu_time_limit: 2.0,
                cpu_extra_time: 0.5,
                wall_time_limit: 5.0,
                memory_limit: 128_000,
                max_processes_and_or_threads: 128,
                max_file_size: 10_240,
                number_of_runs: 1,
                enable_per_process_and_thread_time_limit: false,
                enable_per_process_and_thread_memory_limit: false,
                redirect_stderr_to_stdout: false,
                enable_network: false,
            },
        }
    }

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            language_id: 1,
            source_code: "print('hi')".to_string(),
            stdin: None,
            expected_output: None,
            additional_files: None,
            cpu_time_limit: None,
            cpu_extra_time: None,
            wall_time_limit: None,
            memory_limit: None,
            max_processes_and_or_threads: None,
            max_file_size: None,
            number_of_runs: None,
            enable_per_process_and_thread_time_limit: None,
            enable_per_process_and_thread_memory_limit: None,
            redirect_stderr_to_stdout: None,
            enable_network: None,
        }
    }

    #[test]
    fn test_unknown_language_rejected() {
        let catalog = LanguageCatalog::new(default_languages());
        let mut p = payload();
        p.language_id = 999;
        assert!(matches!(
            validate_payload(&p, &catalog, &test_settings()),
            Err(ValidationError::UnknownLanguage(999))
        ));
    }

    #[test]
    fn test_file_caps_enforced() {
        let catalog = LanguageCatalog::new(default_languages());
        let settings = test_settings();

        let mut p = payload();
        p.additional_files = Some(vec![
            AdditionalFile {
                name: "a.txt".to_string(),
                content: String::new(),
            };
            3
        ]);
        assert!(matches!(
            validate_payload(&p, &catalog, &settings),
            Err(ValidationError::TooManyFiles { count: 3, max: 2 })
        ));

        let mut p = payload();
        p.additional_files = Some(vec![AdditionalFile {
            name: "big.txt".to_string(),
            content: "x".repeat(2048),
        }]);
        assert!(matches!(
            validate_payload(&p, &catalog, &settings),
            Err(ValidationError::FilesTooLarge { .. })
        ));
    }

    #[test]
    fn test_unsafe_file_name_rejected() {
        let catalog = LanguageCatalog::new(default_languages());
        let mut p = payload();
        p.additional_files = Some(vec![AdditionalFile {
            name: "../escape.py".to_string(),
            content: String::new(),
        }]);
        assert!(matches!(
            validate_payload(&p, &catalog, &test_settings()),
            Err(ValidationError::UnsafeFileName(_))
        ));
    }

    #[test]
    fn test_limit_overrides_validated() {
        let catalog = LanguageCatalog::new(default_languages());

        let mut p = payload();
        p.cpu_time_limit = Some(-1.0);
        assert!(matches!(
            validate_payload(&p, &catalog, &test_settings()),
            Err(ValidationError::NegativeLimit("cpu_time_limit"))
        ));

        let mut p = payload();
        p.number_of_runs = Some(0);
        assert!(matches!(
            validate_payload(&p, &catalog, &test_settings()),
            Err(ValidationError::InvalidNumberOfRuns)
        ));
    }

    #[test]
    fn test_empty_source_code_is_allowed() {
        let catalog = LanguageCatalog::new(default_languages());
        let mut p = payload();
        p.source_code = String::new();
        assert!(validate_payload(&p, &catalog, &test_settings()).is_ok());
    }

    #[test]
    fn test_status_tags_round_trip() {
        for status in [
            SubmissionStatus::Pending,
            SubmissionStatus::Processing,
            SubmissionStatus::Finished,
            SubmissionStatus::Error,
            SubmissionStatus::Cancelled,
        ] {
            assert_eq!(SubmissionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubmissionStatus::parse("queued"), None);
        assert!(SubmissionStatus::Finished.is_terminal());
        assert!(!SubmissionStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&SubmissionStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }
}
