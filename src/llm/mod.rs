//! Completion Capability
//!
//! This module provides the single interface every agent uses to reach a
//! language model, plus the retry discipline wrapped around it.
//!
//! # Architecture
//!
//! - [`LLMClient`] - The core trait that all providers implement
//! - [`Provider`] - Runtime provider selection, builds boxed clients
//! - [`retry`] - Bounded backoff and narrowed-prompt retries for JSON output
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `ollama` - Local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints
//!
//! # Example
//!
//! ```ignore
//! use ares_research::llm::{CompletionOptions, Provider};
//!
//! let client = Provider::Ollama {
//!     base_url: "http://localhost:11434".to_string(),
//!     model: "llama3.2".to_string(),
//! }
//! .create_client()
//! .await?;
//!
//! let text = client.complete("What is 2+2?", &CompletionOptions::default()).await?;
//! ```

/// Core completion trait and provider selection.
pub mod client;
/// Retry policy and structured-output helpers.
pub mod retry;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{CompletionOptions, LLMClient, Provider};
pub use retry::{RetryPolicy, StructuredPrompt};
