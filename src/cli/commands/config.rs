//! Config command implementation
//!
//! `show` reports where settings come from and what they resolve to;
//! `check` validates the plugin set and theme under the strict registry.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::App;
use crate::cli::OutputContext;
use crate::models::config::{KitConfig, LoaderSettings};
use crate::models::theme::BUILTIN_THEMES;
use crate::services::plugins::languages::language_request;
use crate::services::plugins::{PluginRegistry, PluginRequest, RegistryPolicy};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default monaco-kit.toml
    Init {
        /// Write the global config (~/.config/monaco-kit) instead
        #[arg(long)]
        global: bool,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show config sources, loader policies and the resolved install order
    Show {
        /// Ignore the project file and environment
        #[arg(long)]
        global: bool,
    },

    /// Validate plugins, languages and theme with strict dependency checks
    Check,
}

#[derive(Serialize)]
struct ConfigSource {
    path: String,
    exists: bool,
}

#[derive(Serialize)]
struct ConfigSources {
    global: ConfigSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<ConfigSource>,
}

#[derive(Serialize)]
struct ConfigShowResponse {
    sources: ConfigSources,
    loader: LoaderSettings,
    install_order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolve_error: Option<String>,
    config: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ConfigCheckResponse {
    valid: bool,
    install_order: Vec<String>,
    problems: Vec<String>,
}

/// Plugins followed by languages, the order the loader installs them in
fn configured_requests(config: &KitConfig) -> impl Iterator<Item = PluginRequest> + '_ {
    config
        .plugins
        .iter()
        .cloned()
        .map(PluginRequest::from)
        .chain(
            config
                .languages
                .iter()
                .cloned()
                .map(|id| language_request(PluginRequest::from(id))),
        )
}

fn install_order(
    registry: &PluginRegistry,
    config: &KitConfig,
) -> Result<Vec<String>, crate::error::PluginError> {
    let plugins = registry.resolve_ordered(configured_requests(config))?;
    Ok(plugins.iter().map(|p| p.name().to_string()).collect())
}

fn check(config: &KitConfig) -> ConfigCheckResponse {
    let registry = PluginRegistry::with_builtins().with_policy(RegistryPolicy::strict());
    let mut problems = Vec::new();

    let order = install_order(&registry, config).unwrap_or_else(|e| {
        problems.push(e.to_string());
        Vec::new()
    });

    if let Some(theme) = &config.theme
        && !BUILTIN_THEMES.contains(&theme.as_str())
        && !config.themes.contains_key(theme)
    {
        problems.push(format!("Theme '{}' is neither builtin nor defined in [themes]", theme));
    }

    ConfigCheckResponse {
        valid: problems.is_empty(),
        install_order: order,
        problems,
    }
}

fn source(ctx: &OutputContext, path: &Path, relative: bool) -> ConfigSource {
    ConfigSource {
        path: if relative {
            ctx.relative_path(path)
        } else {
            path.display().to_string()
        },
        exists: path.exists(),
    }
}

pub async fn execute(args: ConfigArgs, app: &App) -> Result<()> {
    let ctx = &app.output;

    match args.command {
        ConfigCommand::Init { global, force } => {
            match app.config_service.init(global, force).await {
                Ok(path) => ctx.print_success(source(ctx, &path, !global)),
                Err(e) => ctx.print_error(&e.to_string()),
            }
        }

        ConfigCommand::Show { global } => {
            let config = match app.config_service.load(global).await {
                Ok(config) => config,
                Err(e) => {
                    ctx.print_error(&e.to_string());
                    return Ok(());
                }
            };

            let registry = app.registry(Some(RegistryPolicy::from(&config.loader)));
            let (order, resolve_error) = match install_order(&registry, &config) {
                Ok(order) => (order, None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            };

            let sources = ConfigSources {
                global: source(ctx, &app.config_service.config_path(true), false),
                project: (!global)
                    .then(|| source(ctx, &app.config_service.config_path(false), true)),
            };
            ctx.print_success_flat(ConfigShowResponse {
                sources,
                loader: config.loader.clone(),
                install_order: order,
                resolve_error,
                config: serde_json::to_value(&config)?,
            });
        }

        ConfigCommand::Check => {
            let report = check(app.config());
            if !report.valid {
                tracing::warn!("Configuration has {} problem(s)", report.problems.len());
            }
            ctx.print_success_flat(report);
        }
    }

    Ok(())
}
