use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "strvct",
    about = "Inspect and maintain a STRVCT object-store journal",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the folder journals
    #[arg(short, long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Folder name (overrides the config file)
    #[arg(long, global = true)]
    pub folder: Option<String>,

    /// TOML file with key-value settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every key in the folder
    Keys,
    /// Print the record stored under a pid
    Get(PidArgs),
    /// Count stored records
    Count,
    /// List the pids a record references
    Refs(PidArgs),
    /// List the pids reachable from the root object
    Reachable(ReachableArgs),
    /// Delete a record
    Rm(PidArgs),
    /// Rewrite the journal with live entries only
    Compact,
}

#[derive(Args, Debug)]
pub struct PidArgs {
    pub pid: String,
}

#[derive(Args, Debug)]
pub struct ReachableArgs {
    /// Also list stored pids that are not reachable
    #[arg(long)]
    pub unreachable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["strvct", "get", "abc", "--dir", "/tmp/x", "--format", "json"])
            .unwrap();
        assert_eq!(cli.dir, PathBuf::from("/tmp/x"));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Get(PidArgs { ref pid }) if pid == "abc"));
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["strvct", "count"]).unwrap();
        assert_eq!(cli.dir, PathBuf::from("."));
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(cli.folder.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn reachable_flag() {
        let cli = Cli::try_parse_from(["strvct", "reachable", "--unreachable"]).unwrap();
        assert!(matches!(cli.command, Command::Reachable(ReachableArgs { unreachable: true })));
    }

    #[test]
    fn rm_requires_pid() {
        assert!(Cli::try_parse_from(["strvct", "rm"]).is_err());
    }
}
