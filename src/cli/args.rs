//! CLI argument definitions using clap derive

use clap::{ArgAction, ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Convoy - deployment execution engine maintenance
///
/// Inspects and cleans the content-addressable source cache and the
/// per-run workspaces left behind by deployments.
#[derive(Parser, Debug)]
#[command(name = "convoy")]
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
    #[arg(short, long, global = true, env = "CONVOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for listings and reports
    #[arg(short, long, global = true, default_value = "table")]
    pub format: OutputFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and garbage-collect the source cache
    Cache(CacheArgs),

    /// Inspect and clean run workspaces
    Workspace(WorkspaceArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show object, reference and size totals
    Stats,

    /// List cached objects
    List,

    /// Remove unreferenced objects not used recently
    Gc {
        /// Only collect objects idle for at least this long, e.g. 7d (default: from config)
        #[arg(long)]
        older_than: Option<String>,

        /// Show what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove one object and every source reference bound to it
    Rm {
        /// Digest, unique digest prefix, or source reference (e.g. modules/vpc@1.0.0)
        key: String,
    },

    /// Remove every cached object
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the workspace command
#[derive(Parser, Debug)]
pub struct WorkspaceArgs {
    #[command(subcommand)]
    pub action: WorkspaceAction,
}

/// Workspace subcommands
#[derive(Subcommand, Debug)]
pub enum WorkspaceAction {
    /// List run directories
    List,

    /// Remove run directories
    #[command(group(ArgGroup::new("target").required(true).args(["run", "expired", "all"])))]
    Clean {
        /// Remove a single run by id
        #[arg(long)]
        run: Option<String>,

        /// Remove runs idle for longer than this, e.g. 7d; bare flag uses the configured expiry
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        expired: Option<String>,

        /// Remove every run
        #[arg(long)]
        all: bool,

        /// Show what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_cache_gc() {
        let cli = Cli::parse_from(["convoy", "cache", "gc", "--older-than", "3d", "--dry-run"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Gc { older_than, dry_run },
            }) => {
                assert_eq!(older_than.as_deref(), Some("3d"));
                assert!(dry_run);
            }
            other => panic!("expected cache gc, got {:?}", other),
        }
    }

    #[test]
    fn cli_parses_cache_rm_and_clear() {
        let cli = Cli::parse_from(["convoy", "cache", "rm", "modules/vpc@1.0.0"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Rm { key },
            }) => assert_eq!(key, "modules/vpc@1.0.0"),
            other => panic!("expected cache rm, got {:?}", other),
        }
        assert!(Cli::try_parse_from(["convoy", "cache", "rm"]).is_err());

        let cli = Cli::parse_from(["convoy", "cache", "clear", "-y"]);
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheArgs {
                action: CacheAction::Clear { yes: true }
            })
        ));
    }

    #[test]
    fn cli_parses_workspace_clean_expired_default() {
        let cli = Cli::parse_from(["convoy", "workspace", "clean", "--expired"]);
        match cli.command {
            Commands::Workspace(WorkspaceArgs {
                action: WorkspaceAction::Clean { expired, all, .. },
            }) => {
                assert_eq!(expired.as_deref(), Some(""));
                assert!(!all);
            }
            other => panic!("expected workspace clean, got {:?}", other),
        }
    }

    #[test]
    fn cli_workspace_clean_requires_target() {
        assert!(Cli::try_parse_from(["convoy", "workspace", "clean"]).is_err());
        assert!(Cli::try_parse_from(["convoy", "workspace", "clean", "--all", "--run", "x"]).is_err());
    }

    #[test]
    fn cli_format_is_global() {
        let cli = Cli::parse_from(["convoy", "cache", "list", "--format", "json"]);
        assert_eq!(cli.format, OutputFormat::Json);

        let cli = Cli::parse_from(["convoy", "cache", "stats"]);
        assert_eq!(cli.format, OutputFormat::Table);
    }

    #[test]
    fn cli_parses_config() {
        let cli = Cli::parse_from(["convoy", "config"]);
        assert!(matches!(cli.command, Commands::Config(ConfigArgs { action: None })));

        let cli = Cli::parse_from(["convoy", "config", "path"]);
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Path)
            })
        ));
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["convoy", "config", "show"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["convoy", "-v", "config", "show"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["convoy", "-vv", "config", "show"]);
        assert_eq!(cli.verbose, 2);
    }
}
