//! Deterministic fakes for the completion and search capabilities.
//!
//! [`ScriptedLLMClient`] routes each prompt by its leading `TASK:` line, so a
//! test scripts planning, evaluation, synthesis, review and citation
//! independently, whatever order concurrent workers call in. [`FakeSearch`]
//! serves canned hits per query and can fail or stall chosen queries.

#![allow(dead_code)]

use ares_research::llm::{CompletionOptions, LLMClient};
use ares_research::tools::{SearchHit, SearchProvider};
use ares_research::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Unavailable(String),
}

impl Reply {
    fn into_result(self) -> Result<String> {
        match self {
            Reply::Text(text) => Ok(text),
            Reply::Unavailable(msg) => Err(AppError::CompletionUnavailable(msg)),
        }
    }
}

/// Completion fake scripted per task tag.
///
/// Queued replies (`then`, `then_fail`) are consumed first, in order; once a
/// task's queue is empty its standing reply (`respond`) is used. A task with
/// neither fails as unavailable.
#[derive(Default)]
pub struct ScriptedLLMClient {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    standing: Mutex<HashMap<String, Reply>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, String)>>,
}

/// Task tag of a prompt: its first line when that line starts with `TASK:`.
pub fn task_of(prompt: &str) -> String {
    prompt
        .lines()
        .next()
        .filter(|line| line.starts_with("TASK:"))
        .unwrap_or("")
        .trim()
        .to_string()
}

impl ScriptedLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used for `task` whenever nothing is queued.
    pub fn respond(&self, task: &str, response: impl Into<String>) -> &Self {
        self.standing
            .lock()
            .insert(task.to_string(), Reply::Text(response.into()));
        self
    }

    /// Queue a one-off reply for `task`.
    pub fn then(&self, task: &str, response: impl Into<String>) -> &Self {
        self.queued
            .lock()
            .entry(task.to_string())
            .or_default()
            .push_back(Reply::Text(response.into()));
        self
    }

    /// Queue a one-off transport failure for `task`.
    pub fn then_fail(&self, task: &str) -> &Self {
        self.queued
            .lock()
            .entry(task.to_string())
            .or_default()
            .push_back(Reply::Unavailable(format!("scripted failure for {}", task)));
        self
    }

    /// Every call for `task` sleeps for `delay` before answering.
    pub fn delay(&self, task: &str, delay: Duration) -> &Self {
        self.delays.lock().insert(task.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, task: &str) -> usize {
        self.calls.lock().iter().filter(|(t, _)| t == task).count()
    }

    pub fn prompts_for(&self, task: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(t, _)| t == task)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        let task = task_of(prompt);
        self.calls.lock().push((task.clone(), prompt.to_string()));

        let delay = self.delays.lock().get(&task).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&task)
            .and_then(|queue| queue.pop_front());
        let reply = queued.or_else(|| self.standing.lock().get(&task).cloned());

        match reply {
            Some(reply) => reply.into_result(),
            None => Err(AppError::CompletionUnavailable(format!(
                "no scripted reply for '{}'",
                task
            ))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Search fake with per-query hits, failures and delays.
#[derive(Default)]
pub struct FakeSearch {
    hits: Mutex<HashMap<String, Vec<SearchHit>>>,
    failing: Mutex<HashSet<String>>,
    slow: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

pub fn hit(url: &str, title: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        snippet: format!("Snippet about {}", title.to_lowercase()),
    }
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.lock().insert(query.to_string(), hits);
        self
    }

    /// Every call for `query` fails as unavailable.
    pub fn failing(self, query: &str) -> Self {
        self.failing.lock().insert(query.to_string());
        self
    }

    /// Calls for `query` sleep for `delay` before answering.
    pub fn slow(self, query: &str, delay: Duration) -> Self {
        self.slow.lock().insert(query.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, query: &str) -> usize {
        self.calls.lock().iter().filter(|q| q.as_str() == query).count()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.calls.lock().push(query.to_string());

        let delay = self.slow.lock().get(query).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(query) {
            return Err(AppError::SearchUnavailable(format!(
                "scripted outage for '{}'",
                query
            )));
        }

        Ok(self
            .hits
            .lock()
            .get(query)
            .map(|hits| hits.iter().take(max_results).cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_routes_by_task() {
        let client = ScriptedLLMClient::new();
        client
            .respond("TASK: a", "standing")
            .then("TASK: a", "first");

        let options = CompletionOptions::default();
        assert_eq!(client.complete("TASK: a\nbody", &options).await.unwrap(), "first");
        assert_eq!(client.complete("TASK: a\nbody", &options).await.unwrap(), "standing");
        assert!(client.complete("TASK: b\nbody", &options).await.is_err());
        assert_eq!(client.calls_for("TASK: a"), 2);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_client_failure() {
        let client = ScriptedLLMClient::new();
        client.then_fail("TASK: a").respond("TASK: a", "ok");

        let options = CompletionOptions::default();
        let first = client.complete("TASK: a", &options).await;
        assert!(matches!(first, Err(AppError::CompletionUnavailable(_))));
        assert_eq!(client.complete("TASK: a", &options).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_fake_search() {
        let search = FakeSearch::new()
            .with_hits("q", vec![hit("https://a.example", "A"), hit("https://b.example", "B")])
            .failing("down");

        assert_eq!(search.search("q", 1).await.unwrap().len(), 1);
        assert!(search.search("unknown", 5).await.unwrap().is_empty());
        assert!(matches!(
            search.search("down", 5).await,
            Err(AppError::SearchUnavailable(_))
        ));
        assert_eq!(search.calls(), 3);
    }
}
