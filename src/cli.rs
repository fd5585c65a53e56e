//! `epic-sync` 命令行参数定义

use crate::config::ClientConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "epic-sync",
    version,
    about = "Synchronise files between local storage and EPIC data storage",
    arg_required_else_help = true
)]
pub struct Cli {
    /// EPIC API token (overrides the configured token)
    #[arg(long, global = true, env = "EPIC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// EPIC API base URL
    #[arg(long, global = true, env = "EPIC_API_URL")]
    pub api_url: Option<String>,

    /// Also print logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the files and folders at an epic:// path
    Ls {
        /// Folder in the form epic://[<folder>]/
        path: String,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Synchronise a local directory and an epic:// folder (either direction)
    Sync(SyncArgs),
    /// Download a single file
    Download {
        path: String,
        /// Local file or directory
        destination: String,
    },
    /// Upload a single file
    Upload {
        file: PathBuf,
        /// Destination file, or folder ending in `/`
        path: String,
    },
    /// Delete a file, or everything under a folder
    Rm {
        path: String,
        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the metadata attached to a file
    Meta { path: String },
    /// Inspect or change the stored configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    pub source: String,
    pub target: String,
    /// Report what would be transferred without moving any data
    #[arg(long)]
    pub dry_run: bool,
    /// Replace destination files when the source is strictly newer
    #[arg(long)]
    pub overwrite: bool,
    /// Number of concurrent transfers
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: Option<u16>,
    /// Skip files matching the pattern (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (token hidden)
    Show,
    /// Store an API token in the configuration file
    SetToken { token: String },
}

impl Cli {
    /// 命令行参数覆盖配置文件
    pub fn apply_to(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            config.token = Some(token.clone());
        }
        if let Some(url) = self.api_url.as_ref().filter(|u| !u.is_empty()) {
            config.api_url = url.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync() {
        let cli = Cli::try_parse_from([
            "epic-sync",
            "sync",
            "./data",
            "epic://proj/",
            "--dry-run",
            "--threads",
            "4",
            "--exclude",
            "*.tmp",
            "--exclude",
            "scratch/**",
        ])
        .unwrap();

        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.source, "./data");
        assert_eq!(args.target, "epic://proj/");
        assert!(args.dry_run);
        assert!(!args.overwrite);
        assert_eq!(args.threads, Some(4));
        assert_eq!(args.exclude, vec!["*.tmp", "scratch/**"]);
    }

    #[test]
    fn test_parse_ls_json() {
        let cli = Cli::try_parse_from(["epic-sync", "ls", "epic://proj/", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Ls { json: true, .. }));
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(Cli::try_parse_from(["epic-sync", "sync", "a", "epic://b/", "--threads", "0"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "epic-sync",
            "--token",
            "cli-token",
            "--api-url",
            "http://localhost/api/v2",
            "ls",
            "epic://",
        ])
        .unwrap();
        let config = cli.apply_to(ClientConfig::default());
        assert_eq!(config.token.as_deref(), Some("cli-token"));
        assert_eq!(config.api_url, "http://localhost/api/v2");
    }
}
