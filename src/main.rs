use std::{process, time::Duration};

use clap::Parser;
use proxy_cache::{
    cache::{CacheController, Lookup, OriginRequest, RevalidationClient, RevalidationError, Transport},
    config::{self, CliArgs, Command, LoadError, Settings},
    http::{Method, Request, Response},
    store::{CacheStore, StoreError},
    telemetry::{self, TelemetryError},
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Origin(#[from] RevalidationError),

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let cli = CliArgs::parse();
    let settings = config::load(&cli)?;
    telemetry::init(&settings.logging)?;

    let controller = CacheController::new(
        CacheStore::connect(&settings)?,
        RevalidationClient::from_settings(&settings.revalidation)?,
    );

    let result = match cli.command {
        Command::Get { uri } => run_get(&controller, &uri).await,
        Command::Fetch { uri } => run_fetch(&controller, &uri).await,
        Command::Delete { uri } => run_delete(&controller, &uri).await,
        Command::Clear { idle_seconds } => run_clear(&controller, &settings, idle_seconds).await,
    };

    controller.cache().close();
    result
}

async fn run_get(controller: &CacheController, uri: &str) -> Result<(), AppError> {
    match controller.cache().try_get(uri).await? {
        Some(entry) => {
            let mut out = serde_json::to_vec_pretty(&entry)?;
            out.push(b'\n');
            write_stdout(&out).await
        }
        None => {
            info!(uri, "no cached entry");
            Ok(())
        }
    }
}

async fn run_fetch(controller: &CacheController, uri: &str) -> Result<(), AppError> {
    let request = Request::new(Method::Get, uri);
    let response = match controller.lookup(uri, &request).await {
        Lookup::Miss => {
            let response = fetch_origin(controller, uri).await?;
            let stored = controller.store(uri, &request, &response).await;
            info!(uri, stored, "fetched from origin");
            response
        }
        Lookup::Bypass => {
            info!(uri, "cache bypassed, fetching from origin");
            fetch_origin(controller, uri).await?
        }
        Lookup::Hit(response) => {
            info!(uri, "served from cache");
            response
        }
        Lookup::Revalidated(response) => {
            info!(uri, "served from cache after revalidation");
            response
        }
        Lookup::Replaced(response) => {
            info!(uri, "origin replaced cached entry");
            response
        }
    };
    write_stdout(&response.into_bytes()).await
}

async fn fetch_origin(controller: &CacheController, uri: &str) -> Result<Response, AppError> {
    let response = controller
        .revalidator()
        .transport()
        .send(OriginRequest::fetch(uri))
        .await?;
    Ok(response)
}

async fn run_delete(controller: &CacheController, uri: &str) -> Result<(), AppError> {
    controller.cache().delete(uri).await?;
    info!(uri, "deleted cached entry");
    Ok(())
}

async fn run_clear(
    controller: &CacheController,
    settings: &Settings,
    idle_seconds: u64,
) -> Result<(), AppError> {
    let removed = controller
        .cache()
        .clear(Duration::from_secs(idle_seconds))
        .await?;
    info!(
        removed,
        idle_seconds,
        prefix = %settings.store.key_prefix,
        "cleared idle cache entries"
    );
    Ok(())
}

async fn write_stdout(bytes: &[u8]) -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await?;
    Ok(())
}
