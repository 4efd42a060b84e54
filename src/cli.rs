use std::path::PathBuf;
use clap::{Parser, Subcommand};
use satchel::ToolType;

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: SatchelCommand,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins if set
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,
    /// Registry cache directory. Defaults to `~/.satchel/cache`
    #[clap(long, global = true)]
    pub(crate) cache_dir: Option<PathBuf>,
    /// Registry cache lifetime in seconds
    #[clap(long, global = true, allow_negative_numbers = true)]
    pub(crate) ttl: Option<i64>,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum SatchelCommand {
    /// Creates `.satchel/`, an empty `satchel-lock.json` and a default `satchel.toml`
    Init,
    /// Installs a tool from the registry
    Install {
        /// Name of the tool, optionally with a version: <name>[@<version>]
        tool: String,
        /// Only consider tools of this type (agent, command, skill)
        #[clap(long = "type")]
        tool_type: Option<ToolType>,
    },
    /// Removes a tool's files from `.satchel/` and its entry from the lock file
    Uninstall {
        name: String,
    },
    /// List installed tools
    List {
        #[clap(short, long)]
        long: bool,
    },
    /// Lists installed tools with a newer registry version
    Outdated,
    /// Updates one tool, or every outdated tool when no name is given
    Update {
        name: Option<String>,
    },
    /// Searches the registry by name, description and tags
    Search {
        query: String,
        /// Fetch the registry even if the cache is fresh
        #[clap(long)]
        refresh: bool,
    },
    /// Inspect or reset the registry cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Packs a directory into a ZIP archive. Dotfiles and symlinks are skipped
    Pack {
        dir: PathBuf,
        archive: PathBuf,
    },
    /// Prints the SHA-256 digest of a file
    Hash {
        file: PathBuf,
    },
    /// Checks a file against an expected SHA-256 digest
    Verify {
        file: PathBuf,
        digest: String,
    },
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum CacheAction {
    /// Show when the registry was cached and when it expires
    Status,
    /// Forces the next command to refetch the registry
    Invalidate,
    /// Deletes everything in the cache directory
    Clear,
}
