//! Load command implementation
//!
//! Mount a session against the bundled engine, wait for the pipeline and
//! report what got installed.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::models::config::PluginSpec;
use crate::services::engine::LoadState;
use crate::services::plugins::PluginRequest;
use crate::services::session::{Session, SessionOptions};
use crate::services::workers::WorkerInfo;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Plugin to install, `id` or `id=<json config>` (repeatable)
    #[arg(short, long = "plugin")]
    pub plugins: Vec<String>,

    /// Basic language to install (repeatable; defaults to the configured list)
    #[arg(short, long = "language")]
    pub languages: Vec<String>,

    /// Theme to apply once loaded
    #[arg(short, long)]
    pub theme: Option<String>,

    /// Give up after this many seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

#[derive(Serialize)]
struct LanguageCapabilities {
    language: String,
    capabilities: Vec<&'static str>,
}

#[derive(Serialize)]
struct LoadResponse {
    state: LoadState,
    installed: Vec<String>,
    languages: Vec<String>,
    theme: String,
    workers: Vec<WorkerInfo>,
    capabilities: Vec<LanguageCapabilities>,
}

pub async fn execute(args: LoadArgs, app: &App) -> Result<()> {
    let ctx = app.session_context(None);

    let mut options = SessionOptions::from_config(app.config());
    options
        .plugins
        .extend(args.plugins.iter().map(|raw| PluginRequest::from(PluginSpec::parse(raw))));
    if !args.languages.is_empty() {
        options = options.languages(args.languages);
    }
    if let Some(theme) = args.theme.as_deref() {
        options = options.theme(theme);
    }

    let session = Session::mount(&ctx, options, None);
    let ready = tokio::time::timeout(Duration::from_secs(args.timeout), session.ready());
    let engine = match ready.await {
        Ok(Ok(engine)) => engine,
        Ok(Err(e)) => {
            app.output.print_error(&e.to_string());
            return Ok(());
        }
        Err(_) => {
            session.unmount();
            app.output
                .print_error(&format!("Engine did not load within {}s", args.timeout));
            return Ok(());
        }
    };

    let workers = engine.workers();
    let mut languages = engine.languages().ids();
    for language in workers.languages() {
        if !languages.contains(&language) {
            languages.push(language);
        }
    }
    let capabilities = languages
        .iter()
        .map(|language| LanguageCapabilities {
            language: language.clone(),
            capabilities: workers
                .capabilities(language)
                .iter()
                .map(|c| c.flag_name())
                .collect(),
        })
        .collect();

    let response = LoadResponse {
        state: session.snapshot().state,
        installed: engine.installed_plugins(),
        languages: engine.languages().ids(),
        theme: engine.themes().current(),
        workers: workers.workers(),
        capabilities,
    };
    app.output.print_success_flat(response);

    session.unmount();
    Ok(())
}
