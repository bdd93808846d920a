mod background_service;
mod config;
mod server;
mod telemetry;

use colored::Colorize;

#[tokio::main]
async fn main() {
    let config = match config::build_config() {
        Ok(x) => x,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to build config".red());
            return;
        }
    };

    if let Err(e) = telemetry::initialize_telemetry(&config.telemetry) {
        eprintln!("{}: {e}", "Failed to initialize logger".red());
        return;
    };

    if let Err(e) = server::run(config).await {
        tracing::error!("{e:#}");
        eprintln!("{}: {e:#}", "Snapshot engine stopped".red());
    }
}
