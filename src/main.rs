//! monaco-kit - plugin and language-worker composition CLI
//!
//! Resolves plugin sets, mounts sessions against the editor engine and
//! reports worker routing, all as JSON.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monaco_kit::app::App;
use monaco_kit::cli::{Cli, Commands};

fn main() {
    // Quiet by default; use RUST_LOG=monaco_kit=debug for lifecycle detail
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monaco_kit=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!(
                r#"{{"success":false,"error":"Failed to create runtime: {}"}}"#,
                e
            );
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(async_main());

    if let Err(e) = result {
        let response = serde_json::json!({
            "success": false,
            "error": e.to_string()
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&response)
                .unwrap_or_else(|_| { format!(r#"{{"success":false,"error":"{}"}}"#, e) })
        );
        std::process::exit(2);
    }
}

async fn async_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app = App::new()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;

    execute_command(cli.command, &app).await
}

async fn execute_command(command: Commands, app: &App) -> anyhow::Result<()> {
    use monaco_kit::cli::commands;

    match command {
        Commands::Plugins(args) => commands::plugins::execute(args, app),
        Commands::Resolve(args) => commands::resolve::execute(args, app),
        Commands::Load(args) => commands::load::execute(args, app).await,
        Commands::Config(args) => commands::config::execute(args, app).await,
    }
}
