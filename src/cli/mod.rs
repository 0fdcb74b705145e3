//! CLI module for ares-research
//!
//! Provides command-line parsing for the ares-research binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;

use crate::types::{ResearchRequest, StatusLookup};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// ares-research - multi-agent deep research
///
/// A lead agent plans sub-tasks, parallel workers search and evaluate sources,
/// and the findings are synthesized and cited into a single report.
#[derive(Parser, Debug)]
#[command(
    name = "ares-research",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "ares-research - multi-agent deep research with citations",
    long_about = "Answers a research question by planning sub-tasks, running parallel\n\
                  search workers, synthesizing their findings over one or more iterations\n\
                  and annotating the final report with citations.",
    after_help = "EXAMPLES:\n    \
                  ares-research init                                      # Scaffold research.toml\n    \
                  ares-research research \"solid-state battery costs\"     # Run a query\n    \
                  ares-research research \"...\" -i 2 -s 3 -o report.json  # Tighter limits, save JSON\n    \
                  ares-research status 6f1c...                            # Status by query id\n    \
                  ares-research status \"solid-state battery costs\"       # Status by query text\n    \
                  ares-research config --validate                         # Check research.toml"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "research.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a research workspace (research.toml, .env.example, data/)
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files without prompting
        #[arg(short, long)]
        force: bool,

        /// LLM provider to configure
        #[arg(long, default_value = "ollama", value_parser = ["ollama", "openai"])]
        provider: String,
    },

    /// Run a research query to completion
    Research {
        /// The research question
        query: String,

        /// Maximum research iterations (overrides the config file)
        #[arg(short = 'i', long)]
        max_iterations: Option<u32>,

        /// Maximum parallel workers per iteration (overrides the config file)
        #[arg(short = 's', long)]
        max_subagents: Option<usize>,

        /// Also write the cited report to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reuse a query id; a finished id returns its stored report
        #[arg(long)]
        id: Option<Uuid>,

        /// Print the cited report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show the state of a run
    Status {
        /// Query id, or the query text as originally submitted
        target: String,
    },

    /// Show configuration information
    Config {
        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    /// Build the orchestrator request for a `research` invocation.
    pub fn research_request(&self) -> Option<ResearchRequest> {
        match self {
            Commands::Research {
                query,
                max_iterations,
                max_subagents,
                output,
                id,
                ..
            } => Some(ResearchRequest {
                query: query.clone(),
                query_id: *id,
                max_iterations: *max_iterations,
                max_subagents: *max_subagents,
                output: output.clone(),
            }),
            _ => None,
        }
    }
}

/// A status target is an id when it parses as one, otherwise query text.
pub fn status_lookup(target: &str) -> StatusLookup {
    match Uuid::parse_str(target.trim()) {
        Ok(id) => StatusLookup::Id(id),
        Err(_) => StatusLookup::Text(target.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_research_with_overrides() {
        let cli = Cli::try_parse_from([
            "ares-research",
            "research",
            "battery costs",
            "-i",
            "2",
            "-s",
            "3",
            "-o",
            "out/report.json",
        ])
        .unwrap();

        let request = cli.command.research_request().unwrap();
        assert_eq!(request.query, "battery costs");
        assert_eq!(request.max_iterations, Some(2));
        assert_eq!(request.max_subagents, Some(3));
        assert_eq!(request.output, Some(PathBuf::from("out/report.json")));
        assert!(request.query_id.is_none());
        assert_eq!(cli.config, PathBuf::from("research.toml"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ares-research",
            "status",
            "abc",
            "--config",
            "custom.toml",
            "--verbose",
            "--log-json",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(cli.verbose);
        assert!(cli.log_json);
        assert!(cli.command.research_request().is_none());
    }

    #[test]
    fn test_parse_init() {
        let cli = Cli::try_parse_from(["ares-research", "init"]).unwrap();
        match cli.command {
            Commands::Init {
                path,
                force,
                provider,
            } => {
                assert_eq!(path, PathBuf::from("."));
                assert!(!force);
                assert_eq!(provider, "ollama");
            }
            other => panic!("expected init, got {:?}", other),
        }

        let cli =
            Cli::try_parse_from(["ares-research", "init", "ws", "--force", "--provider", "openai"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Init { force: true, .. }));
        assert!(cli.command.research_request().is_none());

        let parsed = Cli::try_parse_from(["ares-research", "init", "--provider", "claude"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_rejects_bad_id() {
        let parsed = Cli::try_parse_from(["ares-research", "research", "q", "--id", "not-a-uuid"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_status_lookup() {
        let id = Uuid::new_v4();
        assert_eq!(status_lookup(&id.to_string()), StatusLookup::Id(id));
        assert_eq!(
            status_lookup("Battery Costs"),
            StatusLookup::Text("Battery Costs".to_string())
        );
    }
}
