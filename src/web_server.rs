use std::sync::Arc;
use std::time::Instant;

use actix_web::{dev::Server, middleware, web, App, HttpServer};
use sqlx::sqlite::SqlitePool;

use crate::config::{LanguageCatalog, Settings};
use crate::queue::JobQueue;
use crate::rendezvous::WaitMap;
use crate::routes::{
    delete_submission_handler, get_batch_handler, get_language_handler,
    get_submission_by_id_handler, health_database_handler, health_info_handler,
    health_overall_handler, health_ping_handler, health_queue_handler, health_workers_handler,
    json_error_handler, list_languages_handler, list_submissions_handler, post_batch_handler,
    post_submission_handler, query_error_handler, StartedAt,
};

pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

pub fn build_server(
    server_config: ServerConfig,
    settings: Arc<Settings>,
    catalog: Arc<LanguageCatalog>,
    db_pool: Arc<SqlitePool>,
    job_queue: Arc<JobQueue>,
    waiters: Arc<WaitMap>,
) -> std::io::Result<Server> {
    let settings = web::Data::from(settings);
    let catalog = web::Data::from(catalog);
    let db_pool = web::Data::from(db_pool);
    let job_queue = web::Data::from(job_queue); // Construct directly from Arc
    let waiters = web::Data::from(waiters);
    let started_at = web::Data::new(StartedAt(Instant::now()));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(settings.clone())
            .app_data(catalog.clone())
            .app_data(db_pool.clone())
            .app_data(job_queue.clone())
            .app_data(waiters.clone())
            .app_data(started_at.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(health_ping_handler)
            .service(health_overall_handler)
            .service(health_database_handler)
            .service(health_queue_handler)
            .service(health_workers_handler)
            .service(health_info_handler)
            .service(list_languages_handler)
            .service(get_language_handler)
            // batch routes must be registered before the {id} routes
            .service(post_batch_handler)
            .service(get_batch_handler)
            .service(post_submission_handler)
            .service(list_submissions_handler)
            .service(get_submission_by_id_handler)
            .service(delete_submission_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(2358),
    ))?
    .run();

    Ok(server)
}
