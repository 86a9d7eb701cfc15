//! Resolve command implementation
//!
//! Turn plugin ids into the order they would install in.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::models::config::{DependencyMode, PluginSpec, UnknownPluginPolicy};
use crate::services::plugins::{PluginRequest, RegistryPolicy};
use crate::services::plugins::languages::language_request;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Plugin ids, optionally `id=<json config>`
    #[arg(required = true)]
    pub plugins: Vec<String>,

    /// Basic languages appended after the plugins
    #[arg(short, long = "language")]
    pub languages: Vec<String>,

    /// Treat missing dependencies and cycles as errors
    #[arg(long)]
    pub strict: bool,

    /// Fail on ids the registry does not know
    #[arg(long)]
    pub reject_unknown: bool,
}

#[derive(Serialize)]
struct PluginOutput {
    name: String,
    dependencies: Vec<String>,
}

#[derive(Serialize)]
struct ResolveResponse {
    count: usize,
    order: Vec<PluginOutput>,
}

pub fn execute(args: ResolveArgs, app: &App) -> Result<()> {
    let mut policy = RegistryPolicy::from(&app.config().loader);
    if args.strict {
        policy.dependencies = DependencyMode::Strict;
    }
    if args.reject_unknown {
        policy.unknown = UnknownPluginPolicy::Reject;
    }
    let registry = app.registry(Some(policy));

    let requests = args
        .plugins
        .iter()
        .map(|raw| PluginRequest::from(PluginSpec::parse(raw)))
        .chain(
            args.languages
                .into_iter()
                .map(|id| language_request(PluginRequest::from(id))),
        );

    match registry.resolve_ordered(requests) {
        Ok(plugins) => {
            let order: Vec<PluginOutput> = plugins
                .iter()
                .map(|p| PluginOutput {
                    name: p.name().to_string(),
                    dependencies: p.dependencies().to_vec(),
                })
                .collect();
            app.output.print_success_flat(ResolveResponse {
                count: order.len(),
                order,
            });
        }
        Err(e) => app.output.print_error(&e.to_string()),
    }
    Ok(())
}
