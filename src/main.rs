use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

/// Thin binary entry point delegating to `cli::run_cli`. The diagnostic
/// stream is JSON-lines, one record per line, carrying fields like
/// `event`, `task_id`, `attempt`, `duration_ms`, `status`, `error_kind`,
/// and `error_msg`.
#[tokio::main]
async fn main() -> ExitCode {
    // Auto-detect a `.env` in the current directory; silently skip if
    // absent.
    match dotenvy::dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(_)) => {}
        Err(e) => eprintln!("Warning: failed to parse .env file: {e}"),
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dagrunner::cli::run_cli().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(3)
        }
    }
}
