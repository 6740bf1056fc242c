use std::time::Duration;

use actix_web::{post, web, HttpResponse, Responder};
use sqlx::SqlitePool;

use super::{
    CreateQuery, EncodingQuery, ErrorResponse, ErrorResponseWithMessage, SubmissionId,
    SubmissionPayload, SubmissionRecord, ValidationError,
};
use crate::config::{LanguageCatalog, Settings};
use crate::database as db;
use crate::encoding;
use crate::queue::JobQueue;
use crate::rendezvous::WaitMap;

#[post("/submissions/")]
pub async fn post_submission_handler(
    pool: web::Data<SqlitePool>,
    catalog: web::Data<LanguageCatalog>,
    settings: web::Data<Settings>,
    queue: web::Data<JobQueue>,
    waiters: web::Data<WaitMap>,
    query: web::Query<CreateQuery>,
    body: web::Json<SubmissionPayload>,
) -> impl Responder {
    let mut payload = body.into_inner();

    if query.base64_encoded {
        if let Err(e) = encoding::decode_payload(&mut payload) {
            return ValidationError::from(e).to_response();
        }
    }
    if let Err(e) = super::validate_payload(&payload, &catalog, &settings) {
        return e.to_response();
    }

    let limits = settings.limits_for(&payload);
    let record = SubmissionRecord::from_payload(payload, limits);
    let submission_id = record.id;

    if let Err(e) = db::create_submission(&pool, &record).await {
        log::error!("Failed to insert submission into database: {e}");
        return HttpResponse::InternalServerError().json(ErrorResponse {
            reason: "ERR_EXTERNAL",
            code: 5,
        });
    }
    log::info!("Submission created, id = {submission_id}");

    if !query.wait {
        queue.push(submission_id);
        return HttpResponse::Created().json(SubmissionId { id: submission_id });
    }

    // Wait mode: the signal is registered before the enqueue so a fast
    // worker commit cannot slip past the waiter
    let rx = waiters.register(submission_id);
    queue.push(submission_id);

    let timeout = Duration::from_secs_f64(settings.wait_timeout);
    if !waiters.await_terminal(submission_id, rx, timeout).await {
        log::info!("wait-mode call for submission {submission_id} timed out");
        return HttpResponse::RequestTimeout().json(ErrorResponseWithMessage {
            reason: "ERR_WAIT_TIMEOUT",
            code: 7,
            message: format!(
                "Submission {submission_id} did not complete within {:.0} seconds.",
                settings.wait_timeout
            ),
        });
    }

    match db::fetch_submission(&pool, submission_id).await {
        Ok(Some(mut record)) => {
            if query.base64_encoded {
                encoding::encode_record(&mut record);
            }
            HttpResponse::Created().json(record)
        }
        Ok(None) => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Submission {submission_id} not found."),
        }),
        Err(e) => {
            log::error!("Failed to re-read submission {submission_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[post("/submissions/batch")]
pub async fn post_batch_handler(
    pool: web::Data<SqlitePool>,
    catalog: web::Data<LanguageCatalog>,
    settings: web::Data<Settings>,
    queue: web::Data<JobQueue>,
    query: web::Query<EncodingQuery>,
    body: web::Json<Vec<SubmissionPayload>>,
) -> impl Responder {
    let payloads = body.into_inner();

    // Validate every element before touching the store; the first bad entry
    // rejects the whole batch
    let mut records = Vec::with_capacity(payloads.len());
    for (index, mut payload) in payloads.into_iter().enumerate() {
        if query.base64_encoded {
            if let Err(e) = encoding::decode_payload(&mut payload) {
                return ValidationError::from(e).to_batch_response(index);
            }
        }
        if let Err(e) = super::validate_payload(&payload, &catalog, &settings) {
            return e.to_batch_response(index);
        }

        let limits = settings.limits_for(&payload);
        records.push(SubmissionRecord::from_payload(payload, limits));
    }

    if let Err(e) = db::create_submissions(&pool, &records).await {
        log::error!("Failed to insert submission batch into database: {e}");
        return HttpResponse::InternalServerError().json(ErrorResponse {
            reason: "ERR_EXTERNAL",
            code: 5,
        });
    }

    let ids: Vec<SubmissionId> = records
        .iter()
        .map(|record| SubmissionId { id: record.id })
        .collect();
    for submission_id in &ids {
        queue.push(submission_id.id);
    }
    log::info!("Batch of {} submissions created", ids.len());

    HttpResponse::Created().json(ids)
}
