//! Plugins command implementation
//!
//! List registry ids, aliases and the basic language table.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::services::engine::LanguageDefinition;
use crate::services::plugins::languages;

#[derive(Args, Debug)]
pub struct PluginsArgs {
    /// Include the basic language table
    #[arg(long)]
    pub languages: bool,
}

#[derive(Serialize)]
struct AliasOutput {
    alias: String,
    plugin: String,
}

#[derive(Serialize)]
struct PluginsResponse {
    count: usize,
    plugins: Vec<String>,
    aliases: Vec<AliasOutput>,
    default_languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    languages: Option<Vec<LanguageDefinition>>,
}

pub fn execute(args: PluginsArgs, app: &App) -> Result<()> {
    let registry = app.registry(None);

    let plugins: Vec<String> = registry
        .ids()
        .into_iter()
        .filter(|id| !id.starts_with(languages::PLUGIN_PREFIX))
        .map(str::to_string)
        .collect();
    let aliases = registry
        .aliases()
        .map(|(alias, plugin)| AliasOutput {
            alias: alias.to_string(),
            plugin: plugin.to_string(),
        })
        .collect();

    let response = PluginsResponse {
        count: plugins.len(),
        plugins,
        aliases,
        default_languages: app.config().languages.clone(),
        languages: args.languages.then(languages::definitions),
    };
    app.output.print_success_flat(response);
    Ok(())
}
