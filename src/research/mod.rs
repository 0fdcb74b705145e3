//! Multi-Agent Research Coordination
//!
//! A run answers one research query through a loop of lead, worker and
//! citation agents driven by the [`Orchestrator`](orchestrator::Orchestrator).
//!
//! # Architecture
//!
//! - [`lead::LeadAgent`] - Plans sub-tasks, synthesizes findings, decides whether to loop
//! - [`worker::WorkerAgent`] - Searches and evaluates sources for one sub-task
//! - [`citation::CitationAgent`] - Inserts citation markers into the final report
//! - [`orchestrator::Orchestrator`] - State machine, worker fan-out, timeout and persistence
//!
//! # Usage
//!
//! ```ignore
//! use ares_research::research::Orchestrator;
//! use ares_research::types::ResearchRequest;
//!
//! let orchestrator = Orchestrator::new(llm, search, memory, config.limits());
//! let outcome = orchestrator
//!     .run(ResearchRequest::new("renewable energy storage costs"))
//!     .await?;
//!
//! println!("{}", outcome.report.report.executive_summary);
//! for url in &outcome.report.citation_metadata.sources_used {
//!     println!("- {}", url);
//! }
//! ```
//!
//! # Research Workflow
//!
//! 1. **Planning** - Break the question into at most `max_subagents` sub-tasks
//! 2. **Dispatching** - Run one worker per sub-task in parallel, wait for all
//! 3. **Synthesizing** - Merge the findings into a report
//! 4. **Deciding** - Stop, or plan another iteration around the open gaps
//! 5. **Citing** - Attribute claims to sources
//! 6. **Persisting** - Store the cited report for status and re-submission

/// Citation insertion and verification.
pub mod citation;
/// Planning, synthesis and the continue/stop decision.
pub mod lead;
/// Research loop state machine.
pub mod orchestrator;
/// Per-sub-task search and evaluation.
pub mod worker;

pub use citation::CitationAgent;
pub use lead::LeadAgent;
pub use orchestrator::{Orchestrator, ResearchOutcome};
pub use worker::WorkerAgent;

/// Shorten text to at most `max_chars` characters, marking the cut.
pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}
