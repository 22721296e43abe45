//! CLI argument definitions using clap derive

use crate::config::Environment;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stowage - persistent caches and content-addressed artifacts
///
/// Inspects disk-backed caches, moves content-addressed objects in and out
/// of the bucket store and reads the version registry.
#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STOWAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the deployment environment
    #[arg(short, long, global = true, env = "STOWAGE_ENVIRONMENT")]
    pub environment: Option<Environment>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Store and fetch content-addressed objects
    Blob(BlobArgs),

    /// Read the version registry
    Registry(RegistryArgs),

    /// Inspect disk-backed caches
    Store(StoreArgs),
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the blob command
#[derive(Parser, Debug)]
pub struct BlobArgs {
    /// Blob action
    #[command(subcommand)]
    pub action: BlobAction,
}

/// Blob actions
#[derive(Subcommand, Debug)]
pub enum BlobAction {
    /// Upload a JSON file and print its content hash
    Put {
        /// JSON file to upload
        file: PathBuf,
    },

    /// Print the object stored under a content hash
    Get {
        /// Content hash
        hash: String,
    },

    /// Check whether an object is stored under a content hash
    Exists {
        /// Content hash
        hash: String,
    },
}

/// Arguments for the registry command
#[derive(Parser, Debug)]
pub struct RegistryArgs {
    /// Registry action
    #[command(subcommand)]
    pub action: RegistryAction,
}

/// Registry actions
#[derive(Subcommand, Debug)]
pub enum RegistryAction {
    /// List registered identifiers
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one identifier's entry
    Show {
        /// Identifier (module.function)
        identifier: String,

        /// Also print the stored artifact
        #[arg(long)]
        load: bool,
    },
}

/// Arguments for the store command
#[derive(Parser, Debug)]
pub struct StoreArgs {
    /// Store action
    #[command(subcommand)]
    pub action: StoreAction,
}

/// Store actions
#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// Show a disk-backed cache's file and entries
    Inspect {
        /// Cache name
        name: String,

        /// List every key
        #[arg(long)]
        keys: bool,
    },

    /// Rewrite a disk-backed cache's file from its current contents
    Flush {
        /// Cache name
        name: String,
    },
}

/// Output format for list commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_verbosity_and_subcommand() {
        let cli = Cli::parse_from(["stowage", "-vv", "registry", "list", "--format", "json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Registry(RegistryArgs {
                action: RegistryAction::List {
                    format: OutputFormat::Json
                }
            })
        ));
    }

    #[test]
    fn parses_environment_aliases() {
        let cli = Cli::parse_from(["stowage", "--environment", "prod", "config", "show"]);
        assert_eq!(cli.environment, Some(Environment::Production));
        assert!(Cli::try_parse_from(["stowage", "-e", "moon", "config"]).is_err());
    }

    #[test]
    fn config_action_is_optional() {
        let cli = Cli::parse_from(["stowage", "config"]);
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs { action: None })
        ));
    }
}
