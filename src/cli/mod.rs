//! CLI module for monaco-kit
//!
//! Provides command-line interface using clap derive macros.

pub mod commands;
pub mod output;

pub use output::OutputContext;

use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, load::LoadArgs, plugins::PluginsArgs, resolve::ResolveArgs};

const LONG_ABOUT: &str = r#"
monaco-kit - plugin and language-worker composition for the Monaco editor engine

Resolves plugin sets, installs them against an engine and routes language
requests to worker processes. Output is JSON.

QUICK START:
  1. Create a project config:   monaco-kit config init
  2. List plugins:              monaco-kit plugins
  3. Check install order:       monaco-kit resolve prettier typings graphql
  4. Mount a session:           monaco-kit load --plugin prettier --language typescript

PLUGIN CONFIG:
  monaco-kit load --plugin 'prettier=["typescript"]'
  monaco-kit load --plugin 'graphql={"uri":"/graphql"}' --language graphql
"#;

/// monaco-kit - plugin and language-worker composition for the Monaco editor engine
#[derive(Parser, Debug)]
#[command(name = "monaco-kit")]
#[command(author, version, about, long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
#[command(after_help = "Use 'monaco-kit <COMMAND> --help' for more information about a command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered plugins and basic languages
    Plugins(PluginsArgs),

    /// Print the install order for a set of plugin ids
    Resolve(ResolveArgs),

    /// Mount a session against the bundled engine and report its state
    Load(LoadArgs),

    /// Configuration management
    Config(ConfigArgs),
}
