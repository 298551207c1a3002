use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use formbridged::{
    AnthropicEngine, AnthropicSettings, Server, StructuredHealthReporter, SystemConfigLoader,
    bootstrap_with,
};

#[tokio::main]
async fn main() -> ExitCode {
    let Ok(daemon) = bootstrap_with(&SystemConfigLoader, Arc::new(StructuredHealthReporter::new()))
    else {
        // The health reporter has already logged the failure.
        return ExitCode::FAILURE;
    };

    let settings = match AnthropicSettings::from_config(daemon.config()) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::error!(%error, "engine configuration rejected");
            return ExitCode::FAILURE;
        }
    };
    let engine = Arc::new(AnthropicEngine::new(settings));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested");
        signal.cancel();
    });

    let server = match Server::bind(&daemon, engine, shutdown).await {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(%error, "listener failed to start");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "server stopped");
            ExitCode::FAILURE
        }
    }
}
