use actix_web::{delete, web, HttpResponse, Responder};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::database as db;
use crate::database::DeleteOutcome;
use crate::queue::JobQueue;

#[delete("/submissions/{id}")]
pub async fn delete_submission_handler(
    pool: web::Data<SqlitePool>,
    queue: web::Data<JobQueue>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let raw_id = path.into_inner().0;
    let Ok(submission_id) = Uuid::parse_str(&raw_id) else {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: format!("Malformed submission id: '{raw_id}'."),
        });
    };

    // Drop the id from the queue first so no worker picks it up afterwards;
    // a worker that already owns it discards its result on commit
    if queue.cancel(submission_id) {
        log::debug!("submission {submission_id} removed from queue before deletion");
    }

    match db::delete_submission(&pool, submission_id).await {
        Ok(DeleteOutcome::Deleted) => {
            log::info!("Submission {submission_id} deleted");
            HttpResponse::NoContent().finish()
        }
        Ok(DeleteOutcome::Cancelled) => {
            log::info!("Submission {submission_id} cancelled mid-processing");
            HttpResponse::NoContent().finish()
        }
        Ok(DeleteOutcome::NotFound) => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Submission {submission_id} not found."),
        }),
        Err(e) => {
            log::error!("Failed to delete submission {submission_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
