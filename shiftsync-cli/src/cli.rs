use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "shiftsync",
    version,
    about = "Fetch work-shift schedules from the scheduling portal"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve the schedule for one account
    Fetch(FetchArgs),

    /// Show the effective configuration
    Config {
        /// Print the configuration as TOML
        #[arg(long)]
        show: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    pub fn output(&self) -> Option<OutputFormat> {
        match self {
            Commands::Fetch(args) => Some(args.output),
            _ => None,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Account identifier
    #[arg(long, env = "SHIFTSYNC_IDENTIFIER")]
    pub identifier: Option<String>,

    /// Account secret
    #[arg(long, env = "SHIFTSYNC_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Pay period to fetch instead of the default view
    #[arg(short, long)]
    pub period: Option<String>,

    /// Cookies from an earlier call: a JSON file, a cookie header file, or `-` for stdin
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Write the refreshed cookies to this file as JSON
    #[arg(long, value_name = "FILE")]
    pub save_cookies: Option<PathBuf>,

    /// Do not read or write the on-disk session store
    #[arg(long)]
    pub no_store: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable output
    Pretty,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_arguments() {
        let args = Args::try_parse_from([
            "shiftsync",
            "fetch",
            "--identifier",
            "jane.doe",
            "--secret",
            "pw",
            "--period",
            "202502",
            "--output",
            "json",
            "--no-store",
        ])
        .unwrap();

        let Commands::Fetch(fetch) = args.command else {
            panic!("expected fetch");
        };
        assert_eq!(fetch.identifier.as_deref(), Some("jane.doe"));
        assert_eq!(fetch.period.as_deref(), Some("202502"));
        assert_eq!(fetch.output, OutputFormat::Json);
        assert!(fetch.no_store);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["shiftsync", "-v", "-q", "config"]).is_err());
    }

    #[test]
    fn test_command_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
