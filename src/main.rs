use std::process::Command;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use kodejudge::config::{CliArgs, LanguageCatalog, Settings};
use kodejudge::database as db;
use kodejudge::queue::JobQueue;
use kodejudge::rendezvous::WaitMap;
use kodejudge::web_server::{build_server, ServerConfig};
use kodejudge::worker::worker;

/// Check if a command exists in the system PATH
fn check_command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check if the current user is root and warn if so
fn check_running_user() {
    if std::env::var("USER").unwrap_or_default() == "root"
        || std::env::var("LOGNAME").unwrap_or_default() == "root"
        || unsafe { libc::getuid() } == 0
    {
        log::warn!("WARNING: Running as root user is not recommended for security reasons!");
        log::warn!("Please consider running this application with a non-privileged user account.");
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = CliArgs::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(log_level));

    let settings = Settings::from_env();
    let n_workers = cli.workers.unwrap_or(settings.worker_concurrency);
    if n_workers == 0 {
        log::error!("The number of workers must not be 0");
        std::process::exit(1);
    }

    // Fall back to the unsandboxed runner when isolate is not installed
    if !check_command_exists("isolate") && std::env::var("NO_ISOLATE").is_err() {
        log::warn!("Command 'isolate' not found - running in NO_ISOLATE mode!");
        log::warn!("This mode should only be used in trusted development environments.");
        std::env::set_var("NO_ISOLATE", "1");
    }

    // Check running user and warn if running as root
    check_running_user();

    let languages = cli.load_languages().unwrap_or_else(|e| {
        log::error!("Failed to read language seed: {e}");
        std::process::exit(1);
    });
    let catalog = LanguageCatalog::new(languages);
    if catalog.is_empty() {
        log::error!("Language catalog is empty");
        std::process::exit(1);
    }
    log::info!("Loaded {} languages", catalog.len());

    let db_path = settings
        .database_path
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(db::get_db_path);
    if cli.flush_data {
        db::remove_db(&db_path);
    }
    let db_pool = db::init_db(&db_path).await.unwrap_or_else(|e| {
        log::error!("Failed to initialize database: {e}");
        std::process::exit(1);
    });

    let settings = Arc::new(settings);
    let catalog = Arc::new(catalog);
    let db_pool = Arc::new(db_pool);
    let job_queue = Arc::new(JobQueue::new(settings.queue_name()));
    let waiters = Arc::new(WaitMap::new());
    let shutdown_token = CancellationToken::new();

    // Refill the queue with submissions that were PENDING when the previous
    // process stopped
    match db::pending_submission_ids(&db_pool).await {
        Ok(pending) => {
            if !pending.is_empty() {
                log::info!("Re-enqueueing {} pending submissions", pending.len());
            }
            for id in pending {
                job_queue.push(id);
            }
        }
        Err(e) => {
            log::error!("Failed to re-enqueue pending submissions: {e}");
            std::process::exit(1);
        }
    }

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_workers {
        workers.spawn(worker(
            i,
            catalog.clone(),
            db_pool.clone(),
            job_queue.clone(),
            waiters.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(
        ServerConfig {
            bind_address: cli.bind_address,
            bind_port: cli.bind_port,
        },
        settings,
        catalog,
        db_pool,
        job_queue,
        waiters,
    )
    .unwrap_or_else(|e| {
        log::error!("Failed to start web server: {e}");
        std::process::exit(1);
    });

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {res_server:?}");
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {res_worker:?}");
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {e:?}");
            } else {
                log::error!("Worker handle finished with error: {e:?}");
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
