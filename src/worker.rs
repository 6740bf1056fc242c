use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Language, LanguageCatalog};
use crate::database as db;
use crate::database::{CommitOutcome, TerminalUpdate};
use crate::queue::{JobQueue, WorkerState};
use crate::rendezvous::WaitMap;
use crate::routes::{ExecutionMeta, SubmissionRecord, SubmissionStatus};
use crate::sandbox::{self, is_safe_file_name, SandboxFile, SandboxLimits, SandboxRunner};

/// One worker slot: IDLE -> DEQUEUING -> PROCESSING -> IDLE until shutdown
pub async fn worker(
    id: u8,
    catalog: Arc<LanguageCatalog>,
    db_pool: Arc<SqlitePool>,
    queue: Arc<JobQueue>,
    waiters: Arc<WaitMap>,
    token: CancellationToken,
) {
    let name = format!("worker-{id}");

    let runner: Arc<Box<dyn SandboxRunner>> = match sandbox::create_sandbox_runner(id) {
        Ok(runner) => Arc::new(runner),
        Err(e) => {
            log::error!("{name} failed to create sandbox runner, exiting: {e:#}");
            return;
        }
    };

    queue.register_worker(&name);
    log::info!("{name} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("{name} received shutdown signal, stopping");
                break;
            }

            submission_id = queue.pop() => {
                queue.set_worker_state(&name, WorkerState::Busy);
                log::info!("{name} got submission {submission_id} from queue");

                process_submission(
                    &name,
                    submission_id,
                    runner.clone(),
                    &catalog,
                    &db_pool,
                    &queue,
                    &waiters,
                )
                .await;

                queue.set_worker_state(&name, WorkerState::Idle);
            }
        };
    }

    queue.unregister_worker(&name);
    log::info!("{name} has shut down gracefully");
}

/// Runs one submission end to end and commits exactly one terminal result.
///
/// Worker errors never propagate upward; they end up in the submission
/// record or, for uncommittable jobs, on the queue's failed list.
async fn process_submission(
    worker_name: &str,
    submission_id: Uuid,
    runner: Arc<Box<dyn SandboxRunner>>,
    catalog: &LanguageCatalog,
    db_pool: &SqlitePool,
    queue: &JobQueue,
    waiters: &WaitMap,
) {
    // 1. Load the record; a submission deleted while queued is skipped silently
    let submission = match db::fetch_submission(db_pool, submission_id).await {
        Ok(Some(submission)) => submission,
        Ok(None) => {
            log::debug!("submission {submission_id} vanished before processing, skipped");
            return;
        }
        Err(e) => {
            log::error!("failed to fetch submission {submission_id}: {e}");
            queue.mark_failed(submission_id);
            return;
        }
    };

    // 2. Claim it; losing the claim means someone else resolved the lifecycle
    match db::mark_processing(db_pool, submission_id).await {
        Ok(true) => {}
        Ok(false) => {
            log::debug!("submission {submission_id} no longer PENDING, skipped");
            return;
        }
        Err(e) => {
            log::error!("failed to mark submission {submission_id} as PROCESSING: {e}");
            queue.mark_failed(submission_id);
            return;
        }
    }

    // 3. Resolve the language and run the sandbox pipeline
    let update = match catalog.get(submission.language_id) {
        None => {
            log::error!(
                "submission {submission_id} references unknown language {}",
                submission.language_id
            );
            TerminalUpdate::error_with_stderr("Unknown language")
        }
        Some(language) => {
            let language = language.clone();
            let handle = tokio::task::spawn_blocking(move || {
                execute_submission(runner.as_ref().as_ref(), &submission, &language)
            });

            match handle.await {
                Ok(update) => update,
                Err(e) => {
                    // The row stays PROCESSING: hung, visible via /health/workers
                    log::error!("submission {submission_id} panicked on {worker_name}: {e}");
                    queue.mark_failed(submission_id);
                    return;
                }
            }
        }
    };

    // 4. Commit and wake any wait-mode caller
    match db::update_result(db_pool, submission_id, &update).await {
        Ok(CommitOutcome::Committed) => {
            log::info!(
                "submission {submission_id} finished on {worker_name} with status {}",
                update.status.as_str()
            );
            waiters.publish(submission_id);
        }
        Ok(CommitOutcome::Discarded) => {
            log::info!("submission {submission_id} was deleted mid-flight, result discarded");
        }
        Err(e) => {
            log::error!("failed to commit result for submission {submission_id}: {e}");
            queue.mark_failed(submission_id);
        }
    }
}

/// Compile (when the language requires it) and execute inside the sandbox.
///
/// Sandbox internal failures fold into an ERROR outcome here; limit
/// violations and non-zero exits are FINISHED with classifying telemetry.
fn execute_submission(
    runner: &dyn SandboxRunner,
    submission: &SubmissionRecord,
    language: &Language,
) -> TerminalUpdate {
    match run_in_sandbox(runner, submission, language) {
        Ok(update) => update,
        Err(e) => {
            log::error!("sandbox failure for submission {}: {e:#}", submission.id);
            TerminalUpdate::error_with_stderr(format!("Sandbox failure: {e:#}"))
        }
    }
}

fn run_in_sandbox(
    runner: &dyn SandboxRunner,
    submission: &SubmissionRecord,
    language: &Language,
) -> anyhow::Result<TerminalUpdate> {
    // Re-check file names at the trust boundary even though create validated them
    for file in &submission.additional_files {
        if !is_safe_file_name(&file.name) {
            return Ok(TerminalUpdate::error_with_stderr(format!(
                "Invalid file name: '{}'",
                file.name
            )));
        }
    }

    runner.reset()?;

    let mut files = vec![SandboxFile {
        name: language.source_filename.clone(),
        content: submission.source_code.clone(),
    }];
    files.extend(submission.additional_files.iter().map(|f| SandboxFile {
        name: f.name.clone(),
        content: f.content.clone(),
    }));
    runner.write_files(&files)?;

    if let Some(compile_cmd) = &language.compile_cmd {
        let compile_limits = SandboxLimits {
            number_of_runs: 1,
            redirect_stderr_to_stdout: false,
            ..submission.limits.clone()
        };
        let compiled = runner.exec(compile_cmd, None, &compile_limits)?;
        if !compiled.success() {
            return Ok(TerminalUpdate {
                status: SubmissionStatus::Error,
                stdout: None,
                stderr: None,
                compile_output: Some(compiled.stderr),
                meta: None,
            });
        }
    }

    let result = runner.exec_repeated(
        &language.run_cmd,
        submission.stdin.as_deref(),
        &submission.limits,
    )?;

    let output_matches = submission
        .expected_output
        .as_ref()
        .map(|expected| expected.as_bytes() == result.stdout.as_bytes());

    let meta = ExecutionMeta {
        time: result.time,
        memory: result.memory,
        exit_code: result.exit_code,
        signal: result.signal.clone(),
        message: result.message.clone(),
        output_matches,
    };

    Ok(TerminalUpdate {
        status: SubmissionStatus::Finished,
        stdout: Some(result.stdout),
        stderr: Some(result.stderr),
        compile_output: None,
        meta: Some(meta),
    })
}
