use actix_web::{get, web, HttpResponse, Responder};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{
    BatchGetQuery, EncodingQuery, ErrorResponse, ErrorResponseWithMessage, ListQuery,
    SubmissionPage,
};
use crate::database as db;
use crate::encoding;

#[get("/submissions/batch")]
pub async fn get_batch_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<BatchGetQuery>,
) -> impl Responder {
    let mut ids = Vec::new();
    for raw in query.ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match Uuid::parse_str(raw) {
            Ok(id) => ids.push(id),
            Err(_) => {
                return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
                    reason: "ERR_INVALID_ARGUMENT",
                    code: 1,
                    message: format!("Malformed submission id: '{raw}'."),
                });
            }
        }
    }

    match db::fetch_submissions(&pool, &ids).await {
        Ok(mut records) => {
            if query.base64_encoded {
                for record in &mut records {
                    encoding::encode_record(record);
                }
            }
            log::info!("Got {} of {} requested submissions", records.len(), ids.len());
            HttpResponse::Ok().json(records)
        }
        Err(e) => {
            log::error!("Failed to retrieve submission batch: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/submissions/")]
pub async fn list_submissions_handler(
    pool: web::Data<SqlitePool>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    if query.page < 1 || !(1..=100).contains(&query.page_size) {
        return HttpResponse::UnprocessableEntity().json(ErrorResponseWithMessage {
            reason: "ERR_VALIDATION",
            code: 4,
            message: "page must be >= 1 and page_size within [1, 100].".to_string(),
        });
    }

    match db::list_submissions(&pool, query.page, query.page_size).await {
        Ok((mut items, total_items)) => {
            if query.base64_encoded {
                for record in &mut items {
                    encoding::encode_record(record);
                }
            }
            let total_pages = (total_items + query.page_size - 1) / query.page_size;
            HttpResponse::Ok().json(SubmissionPage {
                items,
                total_items,
                total_pages,
                current_page: query.page,
                page_size: query.page_size,
            })
        }
        Err(e) => {
            log::error!("Failed to list submissions: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}

#[get("/submissions/{id}")]
pub async fn get_submission_by_id_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<(String,)>,
    query: web::Query<EncodingQuery>,
) -> impl Responder {
    let raw_id = path.into_inner().0;
    let Ok(submission_id) = Uuid::parse_str(&raw_id) else {
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: format!("Malformed submission id: '{raw_id}'."),
        });
    };

    match db::fetch_submission(&pool, submission_id).await {
        Ok(Some(mut record)) => {
            if query.base64_encoded {
                encoding::encode_record(&mut record);
            }
            HttpResponse::Ok().json(record)
        }
        Ok(None) => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Submission {submission_id} not found."),
        }),
        Err(e) => {
            log::error!("Failed to retrieve submission {submission_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            })
        }
    }
}
