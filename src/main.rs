mod cache;
mod cli;
mod config;
mod consumer;
mod db;
mod error;
mod http;
mod logging;
mod metrics;
mod model;
mod storage;
mod supervisor;
#[cfg(test)]
mod tests;
mod timestamp;

use clap::Parser;
use cli::Cli;
use consumer::broker::FakeBroker;
use error::AppResult;
use http::handlers::HttpState;
use std::process::ExitCode;
use supervisor::Supervisor;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to build tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "AppSupervisor: fatal error, exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> AppResult<()> {
    let cfg = config::load_app_config()?;
    logging::init_tracing(cfg.env);

    // No durable streaming client crate is wired in, so startup uses the
    // in-memory double. A concrete `DurableBroker` implementation plugs in
    // here without touching the rest of the pipeline.
    let broker = FakeBroker::new();

    let supervisor = Supervisor::bootstrap(cfg, broker).await?;
    let http_state = HttpState {
        cache: supervisor.cache(),
    };

    let cancel = supervisor.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    supervisor.run(http_state).await
}
