//! # ares-research - Multi-Agent Deep Research
//!
//! Answers an open-ended research question by coordinating several
//! language-model agents: a lead agent plans sub-tasks, parallel workers
//! search the web and evaluate what they find, the lead synthesizes the
//! findings over one or more iterations, and a citation agent attributes the
//! final report's claims to their sources.
//!
//! ## Overview
//!
//! ares-research can be used in two ways:
//!
//! 1. **As a CLI** - Run the `ares-research` binary
//! 2. **As a library** - Build an [`Orchestrator`] from your own capabilities
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use ares_research::{
//!     DuckDuckGoSearch, FileStore, Orchestrator, ResearchConfig, ResearchRequest,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ResearchConfig::load_or_default("research.toml")?;
//!     let llm = Arc::from(config.provider()?.create_client().await?);
//!     let memory = Arc::new(FileStore::open(&config.memory.path).await?);
//!
//!     let orchestrator =
//!         Orchestrator::new(llm, Arc::new(DuckDuckGoSearch::new()), memory, config.limits());
//!     let outcome = orchestrator
//!         .run(ResearchRequest::new("grid-scale battery storage costs"))
//!         .await?;
//!
//!     println!("{}", outcome.report.report.detailed_analysis);
//!     Ok(())
//! }
//! ```
//!
//! ## Capabilities
//!
//! The orchestrator depends only on three traits, so every agent can run
//! against deterministic fakes in tests:
//!
//! - [`LLMClient`] - text completion
//! - [`SearchProvider`] - web search
//! - [`MemoryStore`] - keyed records with similarity lookup
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama local inference (default) |
//! | `openai` | OpenAI API and compatible endpoints |
//!
//! ## Modules
//!
//! - [`research`] - Lead, worker and citation agents plus the orchestrator
//! - [`llm`] - Completion clients and structured-output retry
//! - [`tools`] - Web search
//! - [`memory`] - Persistent research memory
//! - [`types`] - Data model and error handling
//! - [`utils`] - TOML configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line parsing and terminal output.
pub mod cli;
/// LLM provider clients and abstractions.
pub mod llm;
/// Research memory stores (in-memory, JSON file).
pub mod memory;
/// Multi-agent research coordination.
pub mod research;
/// Web search.
pub mod tools;
/// Core types (queries, findings, reports, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use llm::{LLMClient, Provider};
pub use memory::{FileStore, InMemoryStore, MemoryStore};
pub use research::{Orchestrator, ResearchOutcome};
pub use tools::{DuckDuckGoSearch, SearchProvider};
pub use types::{AppError, ResearchRequest, Result};
pub use utils::toml_config::{ResearchConfig, ResearchLimits};
