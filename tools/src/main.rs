//! simcrm-server: HTTP front end and worker pool for the simulation engine.
//!
//! Usage:
//!   simcrm-server --config engine.json
//!   simcrm-server --db sims.db --port 4000 --workers 8

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use simcrm_core::{
    api::Api,
    config::EngineConfig,
    crm::{DryRunCrm, EnvCredentials},
    engine::Engine,
    store::Database,
};
use std::{collections::HashMap, env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut config = match arg_value(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(db) = arg_value(&args, "--db") {
        config.db_path = db.to_string();
    }
    config.listen_port = parse_arg(&args, "--port", config.listen_port);
    config.worker_count = parse_arg(&args, "--workers", config.worker_count);
    config.validate()?;

    log::info!(
        "simcrm-server: db={} port={} workers={} progress={:?} flush_interval={}",
        config.db_path, config.listen_port, config.worker_count,
        config.progress_mode, config.flush_interval
    );

    let db = Database::open(&config.db_path)?;
    db.migrate()?;

    let engine = Engine::build(
        config,
        db,
        Arc::new(DryRunCrm),
        Arc::new(EnvCredentials::default()),
    )?;

    let resumed = engine.store.running()?;
    if !resumed.is_empty() {
        log::info!(
            "{} simulation(s) still RUNNING, {} job(s) outstanding",
            resumed.len(),
            engine.queue.outstanding()?
        );
    }

    let pool = engine.start_workers()?;

    let app = Router::new().fallback(dispatch).with_state(engine.api());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", engine.config.listen_port)).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutdown requested");
        })
        .await?;

    let flushed = tokio::task::spawn_blocking(move || pool.shutdown()).await??;
    log::info!("Flushed progress for {flushed} simulation(s); exiting");
    Ok(())
}

async fn dispatch(
    State(api): State<Api>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let result = tokio::task::spawn_blocking(move || {
        api.handle(method.as_str(), &path, &params, &body)
    })
    .await;

    match result {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(resp.body))
        }
        Err(e) => {
            log::error!("Request handler panicked: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "ok": false, "error": "internal error" })),
            )
        }
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    arg_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
