//! Init command implementation
//!
//! Scaffolds a research workspace: `research.toml`, `.env.example` and the
//! `data/` directory the file-backed memory store writes into.

use super::output::Output;
use std::fs;
use std::path::{Path, PathBuf};

/// Annotated configuration with every default spelled out
const RESEARCH_TOML: &str = include_str!("../../research.toml");

const ENV_EXAMPLE: &str = "\
# Only needed with provider = \"openai\"
OPENAI_API_KEY=

# Log filter; overrides log_level in research.toml
# RUST_LOG=ares_research=debug
";

/// Result of the init operation
#[derive(Debug, PartialEq, Eq)]
pub enum InitResult {
    /// Workspace initialized
    Success,
    /// research.toml already exists and --force was not given
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
    /// Completion provider written into `[llm]` (ollama or openai)
    pub provider: String,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing research workspace");

    let base_path = &config.path;
    let config_path = base_path.join("research.toml");
    if config_path.exists() && !config.force {
        output.warning("research.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    output.subheader("Creating directories");
    for dir in [".", "data"] {
        let dir_path = base_path.join(dir);
        let label = dir_path.display().to_string();
        if dir_path.is_dir() {
            output.skipped(&label, "already exists");
            continue;
        }
        if let Err(e) = fs::create_dir_all(&dir_path) {
            output.error(&format!("Failed to create {}: {}", label, e));
            return InitResult::Error(e.to_string());
        }
        output.created_dir(&label);
    }

    output.subheader("Creating configuration files");
    let toml_content = generate_research_toml(&config.provider);
    if let Err(e) = write_file(&config_path, &toml_content, config.force) {
        output.error(&format!("Failed to create research.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "research.toml");

    let env_path = base_path.join(".env.example");
    if env_path.exists() && !config.force {
        output.skipped(".env.example", "already exists");
    } else if let Err(e) = write_file(&env_path, ENV_EXAMPLE, config.force) {
        output.error(&format!("Failed to create .env.example: {}", e));
        return InitResult::Error(e.to_string());
    } else {
        output.created("env", ".env.example");
    }

    output.complete("Research workspace initialized!");

    output.header("Next Steps");
    if config.provider == "openai" {
        output.info("Set your API key:");
        output.command("cp .env.example .env  # then fill in OPENAI_API_KEY");
    } else {
        output.info("Start Ollama (if not running):");
        output.command("ollama pull llama3.2");
    }
    output.info("Run a query:");
    output.command("ares-research research \"your question\"");

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)
}

fn generate_research_toml(provider: &str) -> String {
    if provider == "openai" {
        RESEARCH_TOML.replacen("provider = \"ollama\"", "provider = \"openai\"", 1)
    } else {
        RESEARCH_TOML.to_string()
    }
}
