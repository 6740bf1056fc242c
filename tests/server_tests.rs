use std::sync::Arc;

use actix_web::{test, web, App};
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use kodejudge::config::{default_languages, LanguageCatalog, Settings};
use kodejudge::database as db;
use kodejudge::database::{CommitOutcome, DeleteOutcome, TerminalUpdate};
use kodejudge::queue::JobQueue;
use kodejudge::rendezvous::WaitMap;
use kodejudge::routes::{SubmissionPayload, SubmissionRecord, SubmissionStatus};
use kodejudge::sandbox::SandboxLimits;

struct TestContext {
    settings: Arc<Settings>,
    catalog: Arc<LanguageCatalog>,
    pool: Arc<SqlitePool>,
    queue: Arc<JobQueue>,
    waiters: Arc<WaitMap>,
    // Held so the database directory outlives the test
    _tmp: TempDir,
}

fn test_settings(wait_timeout: f64) -> Settings {
    Settings {
        worker_concurrency: 1,
        queue_prefix: "test".to_string(),
        wait_timeout,
        database_path: None,
        max_additional_files: 10,
        max_additional_files_size: 64,
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

async fn create_test_context(wait_timeout: f64) -> TestContext {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.sqlite3");
    let pool = db::init_db(&db_path).await.unwrap();

    TestContext {
        settings: Arc::new(test_settings(wait_timeout)),
        catalog: Arc::new(LanguageCatalog::new(default_languages())),
        pool: Arc::new(pool),
        queue: Arc::new(JobQueue::new("test_submission_queue".to_string())),
        waiters: Arc::new(WaitMap::new()),
        _tmp: tmp,
    }
}

macro_rules! init_app {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($ctx.settings.clone()))
                .app_data(web::Data::from($ctx.catalog.clone()))
                .app_data(web::Data::from($ctx.pool.clone()))
                .app_data(web::Data::from($ctx.queue.clone()))
                .app_data(web::Data::from($ctx.waiters.clone()))
                .service(kodejudge::routes::health_ping_handler)
                .service(kodejudge::routes::health_overall_handler)
                .service(kodejudge::routes::health_database_handler)
                .service(kodejudge::routes::health_queue_handler)
                .service(kodejudge::routes::health_workers_handler)
                .service(kodejudge::routes::list_languages_handler)
                .service(kodejudge::routes::get_language_handler)
                .service(kodejudge::routes::post_batch_handler)
                .service(kodejudge::routes::get_batch_handler)
                .service(kodejudge::routes::post_submission_handler)
                .service(kodejudge::routes::list_submissions_handler)
                .service(kodejudge::routes::get_submission_by_id_handler)
                .service(kodejudge::routes::delete_submission_handler),
        )
        .await
    };
}

fn python_submission(source_code: &str) -> serde_json::Value {
    json!({
        "language_id": 1,
        "source_code": source_code,
    })
}

fn b64(text: &str) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(text)
}

#[actix_web::test]
async fn test_create_returns_id_and_record_is_pending() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(python_submission("print('hi')"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let id = body["id"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&id).is_ok());
    assert_eq!(ctx.queue.len(), 1);

    let req = test::TestRequest::get()
        .uri(&format!("/submissions/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let record: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(record["status"], "PENDING");
    assert_eq!(record["source_code"], "print('hi')");
    assert_eq!(record["stdout"], serde_json::Value::Null);
    assert_eq!(record["meta"], serde_json::Value::Null);
}

#[actix_web::test]
async fn test_create_with_unknown_language_is_rejected() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(json!({"language_id": 999, "source_code": "x"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // Nothing was persisted or enqueued
    assert_eq!(db::count_submissions(&ctx.pool).await.unwrap(), 0);
    assert_eq!(ctx.queue.len(), 0);
}

#[actix_web::test]
async fn test_wait_mode_times_out_without_workers() {
    let ctx = create_test_context(0.2).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/?wait=true")
        .set_json(python_submission("print('hi')"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 408);

    // The submission itself survives the timeout
    assert_eq!(db::count_submissions(&ctx.pool).await.unwrap(), 1);
    assert_eq!(ctx.queue.len(), 1);
}

#[actix_web::test]
async fn test_base64_round_trip_through_create_and_get() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);
    let source = "print('Hello, World!')\n";

    let req = test::TestRequest::post()
        .uri("/submissions/?base64_encoded=true")
        .set_json(json!({
            "language_id": 1,
            "source_code": b64(source),
            "stdin": b64("John"),
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let id = body["id"].as_str().unwrap().to_string();

    // Stored form is raw
    let req = test::TestRequest::get()
        .uri(&format!("/submissions/{id}"))
        .to_request();
    let record: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(record["source_code"], source);
    assert_eq!(record["stdin"], "John");

    // Encoded view round-trips
    let req = test::TestRequest::get()
        .uri(&format!("/submissions/{id}?base64_encoded=true"))
        .to_request();
    let record: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(record["source_code"], b64(source));
    assert_eq!(record["stdin"], b64("John"));
}

#[actix_web::test]
async fn test_malformed_base64_is_rejected() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/?base64_encoded=true")
        .set_json(json!({"language_id": 1, "source_code": "@@not-base64@@"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(db::count_submissions(&ctx.pool).await.unwrap(), 0);
}

#[actix_web::test]
async fn test_additional_file_limits_are_enforced() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let files: Vec<serde_json::Value> = (0..11)
        .map(|i| json!({"name": format!("f{i}.txt"), "content": ""}))
        .collect();
    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(json!({
            "language_id": 1,
            "source_code": "",
            "additional_files": files,
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(json!({
            "language_id": 1,
            "source_code": "",
            "additional_files": [{"name": "big.txt", "content": "x".repeat(100 * 1024)}],
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(json!({
            "language_id": 1,
            "source_code": "",
            "additional_files": [{"name": "../escape.py", "content": ""}],
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_limit_overrides_are_validated() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(json!({
            "language_id": 1,
            "source_code": "",
            "cpu_time_limit": -1.0,
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 422);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(json!({
            "language_id": 1,
            "source_code": "",
            "number_of_runs": 0,
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 422);
}

#[actix_web::test]
async fn test_list_pagination() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    for i in 0..3 {
        let req = test::TestRequest::post()
            .uri("/submissions/")
            .set_json(python_submission(&format!("print({i})")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let req = test::TestRequest::get()
        .uri("/submissions/?page=1&page_size=2")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["total_items"], 3);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["current_page"], 1);
    assert_eq!(page["page_size"], 2);

    let req = test::TestRequest::get()
        .uri("/submissions/?page=2&page_size=2")
        .to_request();
    let page: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    for bad in ["page=0", "page_size=0", "page_size=101"] {
        let req = test::TestRequest::get()
            .uri(&format!("/submissions/?{bad}"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 422);
    }
}

#[actix_web::test]
async fn test_batch_create_is_all_or_nothing() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/batch")
        .set_json(json!([
            {"language_id": 1, "source_code": "print(1)"},
            {"language_id": 999, "source_code": "print(2)"},
        ]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("Submission 1"));

    // No partial commits
    assert_eq!(db::count_submissions(&ctx.pool).await.unwrap(), 0);
    assert_eq!(ctx.queue.len(), 0);

    let req = test::TestRequest::post()
        .uri("/submissions/batch")
        .set_json(json!([
            {"language_id": 1, "source_code": "print(1)"},
            {"language_id": 1, "source_code": "print(2)"},
        ]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let ids: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(ids.as_array().unwrap().len(), 2);
    assert_eq!(ctx.queue.len(), 2);
}

#[actix_web::test]
async fn test_batch_get_keeps_input_order_and_drops_missing() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let mut ids = Vec::new();
    for i in 0..2 {
        let req = test::TestRequest::post()
            .uri("/submissions/")
            .set_json(python_submission(&format!("print({i})")))
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, req).await).await;
        ids.push(body["id"].as_str().unwrap().to_string());
    }

    let missing = Uuid::new_v4();
    let req = test::TestRequest::get()
        .uri(&format!(
            "/submissions/batch?ids={},{},{},{missing}",
            ids[1], ids[0], ids[1]
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let records: serde_json::Value = test::read_body_json(resp).await;
    let returned: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    // Duplicates collapsed, input order kept, missing dropped
    assert_eq!(returned, vec![ids[1].as_str(), ids[0].as_str()]);

    let req = test::TestRequest::get()
        .uri("/submissions/batch?ids=not-a-uuid")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_delete_then_get_is_not_found() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/")
        .set_json(python_submission("print('bye')"))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = body["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/submissions/{id}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    // Deleting a queued submission also removes it from the queue
    assert_eq!(ctx.queue.len(), 0);

    let req = test::TestRequest::get()
        .uri(&format!("/submissions/{id}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::delete()
        .uri(&format!("/submissions/{id}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_language_endpoints() {
    let ctx = create_test_context(15.0).await;
    let app = init_app!(ctx);

    let req = test::TestRequest::get().uri("/languages/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let languages: serde_json::Value = test::read_body_json(resp).await;
    let first = &languages.as_array().unwrap()[0];
    assert_eq!(first["id"], 1);
    assert_eq!(first["name"], "Python");
    // Commands are not exposed
    assert!(first.get("run_cmd").is_none());

    let req = test::TestRequest::get().uri("/languages/4").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let language: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(language["name"], "C++");

    let req = test::TestRequest::get().uri("/languages/999").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn test_health_endpoints() {
    let ctx = create_test_context(15.0).await;
    ctx.queue.register_worker("worker-1");
    let app = init_app!(ctx);

    let req = test::TestRequest::get().uri("/health/ping").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "pong");

    let req = test::TestRequest::get().uri("/health/").to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["status"], "healthy");
    assert_eq!(body["queue"]["ping"], "pong");
    assert_eq!(body["workers"]["queue_name"], "test_submission_queue");
    assert_eq!(body["workers"]["workers_total"], 1);
    assert_eq!(body["workers"]["workers_idle"], 1);

    let req = test::TestRequest::get().uri("/health/workers").to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["failed_jobs"], 0);
    assert_eq!(body["status"], "healthy");
}

// ---- store-level lifecycle tests ----

fn pending_record(ctx: &TestContext, source_code: &str) -> SubmissionRecord {
    let payload = SubmissionPayload {
        language_id: 1,
        source_code: source_code.to_string(),
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
    };
    let limits = ctx.settings.limits_for(&payload);
    SubmissionRecord::from_payload(payload, limits)
}

fn finished_update(stdout: &str) -> TerminalUpdate {
    TerminalUpdate {
        status: SubmissionStatus::Finished,
        stdout: Some(stdout.to_string()),
        stderr: Some(String::new()),
        compile_output: None,
        meta: None,
    }
}

#[actix_web::test]
async fn test_status_advances_monotonically() {
    let ctx = create_test_context(15.0).await;
    let record = pending_record(&ctx, "print(1)");
    db::create_submission(&ctx.pool, &record).await.unwrap();

    assert!(db::mark_processing(&ctx.pool, record.id).await.unwrap());
    // A second claim fails: at most one worker owns a submission
    assert!(!db::mark_processing(&ctx.pool, record.id).await.unwrap());

    let outcome = db::update_result(&ctx.pool, record.id, &finished_update("ok\n"))
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Committed);

    // Terminal states never change; a late write is discarded
    let outcome = db::update_result(&ctx.pool, record.id, &finished_update("late\n"))
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Discarded);

    let stored = db::fetch_submission(&ctx.pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Finished);
    assert_eq!(stored.stdout.as_deref(), Some("ok\n"));
}

#[actix_web::test]
async fn test_delete_mid_processing_discards_worker_result() {
    let ctx = create_test_context(15.0).await;
    let record = pending_record(&ctx, "print(1)");
    db::create_submission(&ctx.pool, &record).await.unwrap();
    assert!(db::mark_processing(&ctx.pool, record.id).await.unwrap());

    // Delete while a worker owns the row: tombstoned, invisible to reads
    let outcome = db::delete_submission(&ctx.pool, record.id).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert!(db::fetch_submission(&ctx.pool, record.id)
        .await
        .unwrap()
        .is_none());

    // The worker's commit is discarded and the tombstone purged
    let outcome = db::update_result(&ctx.pool, record.id, &finished_update("late\n"))
        .await
        .unwrap();
    assert_eq!(outcome, CommitOutcome::Discarded);
    assert_eq!(db::count_submissions(&ctx.pool).await.unwrap(), 0);
    let all: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
        .fetch_one(ctx.pool.as_ref())
        .await
        .unwrap();
    assert_eq!(all, 0);
}

#[actix_web::test]
async fn test_pending_ids_survive_for_requeue() {
    let ctx = create_test_context(15.0).await;
    let first = pending_record(&ctx, "print(1)");
    let second = pending_record(&ctx, "print(2)");
    db::create_submission(&ctx.pool, &first).await.unwrap();
    db::create_submission(&ctx.pool, &second).await.unwrap();

    // One got picked up already; only the other is still pending
    assert!(db::mark_processing(&ctx.pool, first.id).await.unwrap());

    let pending = db::pending_submission_ids(&ctx.pool).await.unwrap();
    assert_eq!(pending, vec![second.id]);
}

#[actix_web::test]
async fn test_record_round_trips_through_store() {
    let ctx = create_test_context(15.0).await;
    let mut record = pending_record(&ctx, "print('données')");
    record.stdin = Some("line1\nline2".to_string());
    record.expected_output = Some("out\n".to_string());
    record.additional_files = vec![kodejudge::routes::AdditionalFile {
        name: "helper.py".to_string(),
        content: "def add(a, b): return a + b".to_string(),
    }];
    record.limits.number_of_runs = 3;
    record.limits.redirect_stderr_to_stdout = true;
    db::create_submission(&ctx.pool, &record).await.unwrap();

    let stored = db::fetch_submission(&ctx.pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.source_code, record.source_code);
    assert_eq!(stored.stdin, record.stdin);
    assert_eq!(stored.expected_output, record.expected_output);
    assert_eq!(stored.additional_files, record.additional_files);
    assert_eq!(stored.limits, record.limits);
    assert_eq!(stored.created_at, record.created_at);
}
