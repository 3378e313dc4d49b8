use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cmd;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conveyor=info")),
        )
        .with_target(false)
        .init();

    let cli = cmd::Cli::parse();
    match cmd::execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(10)
        }
    }
}
