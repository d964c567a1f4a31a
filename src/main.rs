#![forbid(unsafe_code)]

use std::env::VarError;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs, io};

use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, Context, Result};
use log::{error, info};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracing_unwrap::ResultExt;

mod config;
mod error;
mod merge;
mod metrics;
mod model;
mod routes;
mod store;
mod sync;
mod upstream;

#[actix_rt::main]
async fn main() -> Result<()> {
    let _log_guards = init_logger()?;

    let db_url = env::var("DATABASE_URL").context("Unable to read mandatory DATABASE_URL environment variable")?;
    env::remove_var("DATABASE_URL"); // Remove the env variable now to prevent it from being passed to a untrusted child process later

    let db_pool = PgPoolOptions::new()
        .max_connections(num_cpus::get() as u32)
        .acquire_timeout(Duration::from_secs(10))
        .connect(db_url.as_str())
        .await?;

    store::init(&db_pool).await.context("Unable to initialize database schema")?;

    let config = config::Config::from_env().await?;

    let shutdown = CancellationToken::new();
    let service = Arc::new(sync::SyncService::new(db_pool, config, shutdown.clone()));

    // A failed login only delays the service desk view; the session is
    // re-established on the first auth error
    if let Err(err) = service.service_desk.authenticate().await {
        error!("Failed to authenticate against the service desk: {:#}", err);
    }

    sync::start(service.clone(), shutdown.clone());

    let bind_address = env::var("BIND_ADDRESS").context("Unable to read mandatory BIND_ADDRESS environment variable")?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(service.clone()))
            .configure(routes::init)
    }).bind(bind_address.as_str()).context("Unable to bind HTTP server.")?;

    server.run().await.context("Unable to start HTTP server.")?;

    // Stops the tickers and aborts in-flight upstream requests
    shutdown.cancel();

    info!("Thank you and goodbye.");

    Ok(())
}

fn init_logger() -> Result<Vec<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|err| {
        let not_found = err.source()
            .map(|o| o.downcast_ref::<VarError>().map_or_else(|| false, |err| matches!(err, VarError::NotPresent)))
            .unwrap_or(false);

        if !not_found {
            eprintln!("Warning: Unable to parse `{}` environment variable, using default values: {}", EnvFilter::DEFAULT_ENV, err);
        }

        let level = if cfg!(debug_assertions) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        EnvFilter::default()
            .add_directive(level.into())
            .add_directive("hyper=info".parse().unwrap_or_log())
            .add_directive("reqwest=info".parse().unwrap_or_log())
            .add_directive("sqlx=warn".parse().unwrap_or_log())
    });

    let mut results = Vec::<WorkerGuard>::with_capacity(2);

    // In debug mode we only write to stdout (pretty), in production to stdout and to a file (json)
    if cfg!(debug_assertions) {
        let (writer, guard) = tracing_appender::non_blocking(io::stdout());
        results.push(guard);

        FmtSubscriber::builder()
            .with_writer(writer)
            .with_env_filter(env_filter)
            .with_thread_ids(true)
            .try_init()
            .map_err(|err| anyhow!(err))?; // https://github.com/dtolnay/anyhow/issues/83
    } else {
        let logs_dir = Path::new("logs");

        if !logs_dir.exists() {
            fs::create_dir_all(logs_dir)?;
        }

        let appender = rolling::daily("logs", "mojira-mirror");
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

        let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(io::stdout());

        results.push(file_guard);
        results.push(stdout_guard);

        FmtSubscriber::builder()
            .with_writer(stdout_writer)
            .with_writer(file_writer)
            .with_env_filter(env_filter)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|err| anyhow!(err))?; // https://github.com/dtolnay/anyhow/issues/83
    }

    results.shrink_to_fit();
    Ok(results)
}
