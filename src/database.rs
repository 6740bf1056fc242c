use std::fs;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::create_timestamp;
use crate::routes::{
    AdditionalFile, ExecutionMeta, SubmissionRecord, SubmissionStatus,
};
use crate::sandbox::SandboxLimits;

const DATABASE_NAME: &str = "kodejudge.sqlite3";

/// Outcome of a worker's terminal commit
#[derive(Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The row was deleted or cancelled mid-flight; the result was dropped
    Discarded,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// A worker owns the row; it was tombstoned and will be purged on commit
    Cancelled,
    NotFound,
}

/// Terminal fields written exactly once per submission
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: SubmissionStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub meta: Option<ExecutionMeta>,
}

impl TerminalUpdate {
    /// An ERROR outcome with diagnostic text in stderr
    pub fn error_with_stderr(diagnostic: impl Into<String>) -> Self {
        Self {
            status: SubmissionStatus::Error,
            stdout: None,
            stderr: Some(diagnostic.into()),
            compile_output: None,
            meta: None,
        }
    }
}

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "kodejudge").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id                TEXT     PRIMARY KEY,
            language_id       INTEGER  NOT NULL,
            source_code       TEXT     NOT NULL,
            stdin             TEXT,
            expected_output   TEXT,
            additional_files  TEXT     NOT NULL DEFAULT '[]',
            cpu_time_limit    REAL     NOT NULL,
            cpu_extra_time    REAL     NOT NULL,
            wall_time_limit   REAL     NOT NULL,
            memory_limit      INTEGER  NOT NULL,
            max_processes_and_or_threads  INTEGER NOT NULL,
            max_file_size     INTEGER  NOT NULL,
            number_of_runs    INTEGER  NOT NULL,
            enable_per_process_and_thread_time_limit    INTEGER NOT NULL,
            enable_per_process_and_thread_memory_limit  INTEGER NOT NULL,
            redirect_stderr_to_stdout  INTEGER NOT NULL,
            enable_network    INTEGER  NOT NULL,
            status            TEXT     NOT NULL,
            stdout            TEXT,
            stderr            TEXT,
            compile_output    TEXT,
            meta              TEXT,
            created_at        TEXT     NOT NULL,
            updated_at        TEXT     NOT NULL
        );",
    )
    .execute(&db_pool)
    .await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Inserts one PENDING record
pub async fn create_submission(pool: &SqlitePool, record: &SubmissionRecord) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    insert_record(tx.as_mut(), record).await?;
    tx.commit().await?;
    Ok(())
}

/// Inserts a batch of PENDING records in one transaction; all or nothing
pub async fn create_submissions(
    pool: &SqlitePool,
    records: &[SubmissionRecord],
) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        insert_record(tx.as_mut(), record).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_record(
    conn: &mut sqlx::SqliteConnection,
    record: &SubmissionRecord,
) -> sqlx::Result<()> {
    let additional_files =
        serde_json::to_string(&record.additional_files).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r"
        INSERT INTO submissions (
            id, language_id, source_code, stdin, expected_output, additional_files,
            cpu_time_limit, cpu_extra_time, wall_time_limit, memory_limit,
            max_processes_and_or_threads, max_file_size, number_of_runs,
            enable_per_process_and_thread_time_limit,
            enable_per_process_and_thread_memory_limit,
            redirect_stderr_to_stdout, enable_network,
            status, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(record.id.to_string())
    .bind(record.language_id)
    .bind(&record.source_code)
    .bind(&record.stdin)
    .bind(&record.expected_output)
    .bind(additional_files)
    .bind(record.limits.cpu_time_limit)
    .bind(record.limits.cpu_extra_time)
    .bind(record.limits.wall_time_limit)
    .bind(record.limits.memory_limit)
    .bind(record.limits.max_processes_and_or_threads)
    .bind(record.limits.max_file_size)
    .bind(record.limits.number_of_runs)
    .bind(record.limits.enable_per_process_and_thread_time_limit)
    .bind(record.limits.enable_per_process_and_thread_memory_limit)
    .bind(record.limits.redirect_stderr_to_stdout)
    .bind(record.limits.enable_network)
    .bind(record.status.as_str())
    .bind(&record.created_at)
    .bind(&record.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Fetches one submission; cancelled tombstones read as absent
pub async fn fetch_submission(
    pool: &SqlitePool,
    id: Uuid,
) -> sqlx::Result<Option<SubmissionRecord>> {
    let row = sqlx::query(
        "SELECT * FROM submissions WHERE id = ? AND status != 'CANCELLED'",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_record(&r)).transpose()
}

/// Fetches many submissions: input order kept, duplicates collapsed,
/// missing ids dropped
pub async fn fetch_submissions(
    pool: &SqlitePool,
    ids: &[Uuid],
) -> sqlx::Result<Vec<SubmissionRecord>> {
    let mut seen = std::collections::HashSet::new();
    let mut records = Vec::new();

    for id in ids {
        if !seen.insert(*id) {
            continue;
        }
        if let Some(record) = fetch_submission(pool, *id).await? {
            records.push(record);
        }
    }

    Ok(records)
}

/// Pages through submissions, newest first
pub async fn list_submissions(
    pool: &SqlitePool,
    page: i64,
    page_size: i64,
) -> sqlx::Result<(Vec<SubmissionRecord>, i64)> {
    let total_items: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE status != 'CANCELLED'")
            .fetch_one(pool)
            .await?;

    let rows = sqlx::query(
        r"
        SELECT * FROM submissions
        WHERE status != 'CANCELLED'
        ORDER BY created_at DESC, rowid DESC
        LIMIT ? OFFSET ?
        ",
    )
    .bind(page_size)
    .bind((page - 1) * page_size)
    .fetch_all(pool)
    .await?;

    let records = rows
        .iter()
        .map(row_to_record)
        .collect::<sqlx::Result<Vec<_>>>()?;

    Ok((records, total_items))
}

pub async fn count_submissions(pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE status != 'CANCELLED'")
        .fetch_one(pool)
        .await
}

/// Claims a PENDING submission for a worker; false when the row is gone or
/// no longer PENDING
pub async fn mark_processing(pool: &SqlitePool, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE submissions SET status = 'PROCESSING', updated_at = ? \
         WHERE id = ? AND status = 'PENDING'",
    )
    .bind(create_timestamp())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Writes the terminal fields of a PROCESSING submission.
///
/// The conditional update is the monotonic-status guard: a row that was
/// deleted or cancelled mid-flight matches nothing, the result is discarded,
/// and a cancellation tombstone is purged.
pub async fn update_result(
    pool: &SqlitePool,
    id: Uuid,
    update: &TerminalUpdate,
) -> sqlx::Result<CommitOutcome> {
    let meta = update
        .meta
        .as_ref()
        .and_then(|m| serde_json::to_string(m).ok());

    let result = sqlx::query(
        r"
        UPDATE submissions
        SET status = ?, stdout = ?, stderr = ?, compile_output = ?, meta = ?, updated_at = ?
        WHERE id = ? AND status = 'PROCESSING'
        ",
    )
    .bind(update.status.as_str())
    .bind(&update.stdout)
    .bind(&update.stderr)
    .bind(&update.compile_output)
    .bind(meta)
    .bind(create_timestamp())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(CommitOutcome::Committed);
    }

    // Purge a cancellation tombstone left by a mid-flight delete
    sqlx::query("DELETE FROM submissions WHERE id = ? AND status = 'CANCELLED'")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(CommitOutcome::Discarded)
}

/// Best-effort delete: rows owned by a worker are tombstoned instead
pub async fn delete_submission(pool: &SqlitePool, id: Uuid) -> sqlx::Result<DeleteOutcome> {
    let mut tx = pool.begin().await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM submissions WHERE id = ? AND status != 'CANCELLED'")
            .bind(id.to_string())
            .fetch_optional(tx.as_mut())
            .await?;

    let outcome = match status.as_deref() {
        None => DeleteOutcome::NotFound,
        Some("PROCESSING") => {
            sqlx::query(
                "UPDATE submissions SET status = 'CANCELLED', updated_at = ? WHERE id = ?",
            )
            .bind(create_timestamp())
            .bind(id.to_string())
            .execute(tx.as_mut())
            .await?;
            DeleteOutcome::Cancelled
        }
        Some(_) => {
            sqlx::query("DELETE FROM submissions WHERE id = ?")
                .bind(id.to_string())
                .execute(tx.as_mut())
                .await?;
            DeleteOutcome::Deleted
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Ids of submissions awaiting a worker, in insertion order.
///
/// Used at startup to refill the queue so created submissions survive a
/// restart.
pub async fn pending_submission_ids(pool: &SqlitePool) -> sqlx::Result<Vec<Uuid>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM submissions WHERE status = 'PENDING' ORDER BY rowid")
            .fetch_all(pool)
            .await?;

    Ok(ids
        .iter()
        .filter_map(|raw| Uuid::parse_str(raw).ok())
        .collect())
}

fn row_to_record(row: &SqliteRow) -> sqlx::Result<SubmissionRecord> {
    let decode_err = |column: &str, source: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: source.into(),
    };

    let raw_id: String = row.get("id");
    let id = Uuid::parse_str(&raw_id).map_err(|e| decode_err("id", e.to_string()))?;

    let raw_status: String = row.get("status");
    let status = SubmissionStatus::parse(&raw_status)
        .ok_or_else(|| decode_err("status", format!("unknown status tag {raw_status:?}")))?;

    let raw_files: String = row.get("additional_files");
    let additional_files: Vec<AdditionalFile> = serde_json::from_str(&raw_files)
        .map_err(|e| decode_err("additional_files", e.to_string()))?;

    let meta = row
        .get::<Option<String>, _>("meta")
        .map(|raw| serde_json::from_str::<ExecutionMeta>(&raw))
        .transpose()
        .map_err(|e| decode_err("meta", e.to_string()))?;

    Ok(SubmissionRecord {
        id,
        language_id: row.get("language_id"),
        source_code: row.get("source_code"),
        stdin: row.get("stdin"),
        expected_output: row.get("expected_output"),
        additional_files,
        limits: SandboxLimits {
            cpu_time_limit: row.get("cpu_time_limit"),
            cpu_extra_time: row.get("cpu_extra_time"),
            wall_time_limit: row.get("wall_time_limit"),
            memory_limit: row.get("memory_limit"),
            max_processes_and_or_threads: row.get("max_processes_and_or_threads"),
            max_file_size: row.get("max_file_size"),
            number_of_runs: row.get("number_of_runs"),
            enable_per_process_and_thread_time_limit: row
                .get("enable_per_process_and_thread_time_limit"),
            enable_per_process_and_thread_memory_limit: row
                .get("enable_per_process_and_thread_memory_limit"),
            redirect_stderr_to_stdout: row.get("redirect_stderr_to_stdout"),
            enable_network: row.get("enable_network"),
        },
        status,
        stdout: row.get("stdout"),
        stderr: row.get("stderr"),
        compile_output: row.get("compile_output"),
        meta,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
