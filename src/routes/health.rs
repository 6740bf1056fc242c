use std::time::Instant;

use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::LanguageCatalog;
use crate::database as db;
use crate::queue::{JobQueue, WorkerState};

/// Server start time, injected so /health/info can report uptime
pub struct StartedAt(pub Instant);

#[derive(Serialize)]
pub struct DatabaseHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub status: String,
    pub response_time_ms: f64,
    pub ping: String,
}

#[derive(Serialize)]
pub struct WorkerHealth {
    pub queue_name: String,
    pub queue_size: usize,
    pub workers_total: usize,
    pub workers_busy: usize,
    pub workers_idle: usize,
    pub failed_jobs: usize,
    pub status: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: DatabaseHealth,
    pub queue: QueueHealth,
    pub workers: WorkerHealth,
}

#[derive(Serialize)]
pub struct SystemInfo {
    pub api_version: String,
    pub environment: String,
    pub uptime_seconds: f64,
    pub supported_languages_count: usize,
    pub total_submissions: i64,
}

#[derive(Serialize)]
struct Pong {
    status: &'static str,
    message: &'static str,
}

#[get("/health/ping")]
pub async fn health_ping_handler() -> impl Responder {
    HttpResponse::Ok().json(Pong {
        status: "ok",
        message: "pong",
    })
}

#[get("/health/")]
pub async fn health_overall_handler(
    pool: web::Data<SqlitePool>,
    queue: web::Data<JobQueue>,
) -> impl Responder {
    let database = check_database(&pool).await;
    let queue_health = check_queue(&queue);
    let workers = check_workers(&queue);

    let status = if database.status != "healthy"
        || queue_health.status != "healthy"
        || workers.status == "no_workers"
    {
        "unhealthy"
    } else if workers.status == "high_load" || workers.status == "degraded" {
        "degraded"
    } else {
        "healthy"
    };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        database,
        queue: queue_health,
        workers,
    })
}

#[get("/health/database")]
pub async fn health_database_handler(pool: web::Data<SqlitePool>) -> impl Responder {
    HttpResponse::Ok().json(check_database(&pool).await)
}

#[get("/health/queue")]
pub async fn health_queue_handler(queue: web::Data<JobQueue>) -> impl Responder {
    HttpResponse::Ok().json(check_queue(&queue))
}

#[get("/health/workers")]
pub async fn health_workers_handler(queue: web::Data<JobQueue>) -> impl Responder {
    HttpResponse::Ok().json(check_workers(&queue))
}

#[get("/health/info")]
pub async fn health_info_handler(
    pool: web::Data<SqlitePool>,
    catalog: web::Data<LanguageCatalog>,
    started_at: web::Data<StartedAt>,
) -> impl Responder {
    let total_submissions = match db::count_submissions(&pool).await {
        Ok(count) => count,
        Err(e) => {
            log::error!("Failed to count submissions for /health/info: {e}");
            0
        }
    };

    HttpResponse::Ok().json(SystemInfo {
        api_version: env!("CARGO_PKG_VERSION").to_string(),
        environment: "production".to_string(),
        uptime_seconds: round2(started_at.0.elapsed().as_secs_f64()),
        supported_languages_count: catalog.len(),
        total_submissions,
    })
}

async fn check_database(pool: &SqlitePool) -> DatabaseHealth {
    let start = Instant::now();
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => DatabaseHealth {
            status: "healthy".to_string(),
            response_time_ms: Some(round2(start.elapsed().as_secs_f64() * 1000.0)),
            error: None,
        },
        Err(e) => DatabaseHealth {
            status: "unhealthy".to_string(),
            response_time_ms: None,
            error: Some(e.to_string()),
        },
    }
}

fn check_queue(queue: &JobQueue) -> QueueHealth {
    let start = Instant::now();
    let _ = queue.len();
    QueueHealth {
        status: "healthy".to_string(),
        response_time_ms: round2(start.elapsed().as_secs_f64() * 1000.0),
        ping: "pong".to_string(),
    }
}

fn check_workers(queue: &JobQueue) -> WorkerHealth {
    let workers = queue.workers();
    let queue_size = queue.len();
    let failed_jobs = queue.failed_count();

    let workers_busy = workers
        .iter()
        .filter(|(_, state)| *state == WorkerState::Busy)
        .count();
    let workers_idle = workers.len() - workers_busy;

    let status = if workers.is_empty() {
        "no_workers"
    } else if queue_size > 100 {
        "high_load"
    } else if failed_jobs > 10 {
        "degraded"
    } else {
        "healthy"
    };

    WorkerHealth {
        queue_name: queue.name().to_string(),
        queue_size,
        workers_total: workers.len(),
        workers_busy,
        workers_idle,
        failed_jobs,
        status: status.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
