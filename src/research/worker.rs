//! Worker agent: one sub-task, searched and evaluated into a [`Finding`].

use super::clip;
use crate::llm::retry::{complete_structured, parse_json};
use crate::llm::{CompletionOptions, LLMClient, StructuredPrompt};
use crate::memory::{keys, MemoryRecord, MemoryStore, RecordKind};
use crate::tools::{SearchHit, SearchProvider};
use crate::types::{Credibility, Finding, ResearchQuery, Result, SourceInsight, SubTask};
use crate::utils::toml_config::ResearchLimits;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const EVALUATE_TASK: &str = "TASK: evaluate-sources";

const WORKER_SYSTEM: &str = "You are a research assistant. You judge search results \
for relevance and credibility and extract the concrete insight each one offers. \
Answer with the JSON structure you are asked for and nothing else.";

#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    #[serde(default)]
    evaluations: Vec<HitVerdict>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    credibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HitVerdict {
    /// 1-based position in the prompt's hit list
    index: usize,
    #[serde(default)]
    relevant: bool,
    #[serde(default)]
    credibility: Option<String>,
    #[serde(default)]
    insight: String,
}

/// Queries a worker searches for a sub-task.
///
/// Falls back to the title and objective when the plan gave none.
pub fn search_queries_for(subtask: &SubTask) -> Vec<String> {
    let candidates = if subtask.search_queries.is_empty() {
        vec![subtask.title.clone(), subtask.objective.clone()]
    } else {
        subtask.search_queries.clone()
    };

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
        .take(3)
        .collect()
}

pub struct WorkerAgent {
    llm: Arc<dyn LLMClient>,
    search: Arc<dyn SearchProvider>,
    memory: Arc<dyn MemoryStore>,
    limits: ResearchLimits,
    options: CompletionOptions,
}

impl WorkerAgent {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        search: Arc<dyn SearchProvider>,
        memory: Arc<dyn MemoryStore>,
        limits: ResearchLimits,
    ) -> Self {
        let options =
            CompletionOptions::with_system(WORKER_SYSTEM).temperature(limits.temperature);
        Self {
            llm,
            search,
            memory,
            limits,
            options,
        }
    }

    /// Research one sub-task within the per-worker timeout.
    ///
    /// Never fails: search failures, evaluation failures and timeouts come
    /// back as a degraded [`Finding`]. The finding is written to memory under
    /// this worker's own key before it is returned.
    pub async fn research(&self, query: &ResearchQuery, iteration: u32, subtask: &SubTask) -> Finding {
        let timeout = self.limits.worker_timeout;
        let finding =
            match tokio::time::timeout(timeout, self.investigate(query, iteration, subtask)).await {
                Ok(finding) => finding,
                Err(_) => {
                    warn!("Worker for '{}' timed out after {:?}", subtask.title, timeout);
                    Finding::degraded(subtask, iteration, format!("timed out after {:?}", timeout))
                }
            };

        let record = MemoryRecord::new(
            keys::finding(query.id, iteration, subtask.slot),
            RecordKind::Finding,
            query.id,
            &finding,
        );
        match record {
            Ok(record) => {
                if let Err(e) = self.memory.put(record).await {
                    warn!("Failed to persist finding for slot {}: {}", subtask.slot, e);
                }
            }
            Err(e) => warn!("Failed to encode finding for slot {}: {}", subtask.slot, e),
        }

        finding
    }

    async fn investigate(&self, query: &ResearchQuery, iteration: u32, subtask: &SubTask) -> Finding {
        let queries = search_queries_for(subtask);

        let hits = match self.gather(&queries).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Search failed for '{}': {}", subtask.title, e);
                return Finding::degraded(subtask, iteration, e.to_string());
            }
        };

        if hits.is_empty() {
            info!("No search results for '{}'", subtask.title);
            return Finding {
                subtask_id: subtask.id.clone(),
                slot: subtask.slot,
                iteration,
                sources: Vec::new(),
                credibility: Credibility::Low,
                summary: format!("No search results found for '{}'", subtask.title),
                degraded: false,
                failure: None,
                completed_at: Utc::now(),
            };
        }

        match self.evaluate(query, subtask, &hits).await {
            Ok(response) => {
                let finding = build_finding(subtask, iteration, &hits, response);
                info!(
                    "Kept {} of {} hit(s) for '{}'",
                    finding.sources.len(),
                    hits.len(),
                    subtask.title
                );
                finding
            }
            Err(e) => {
                warn!("Evaluation failed for '{}': {}", subtask.title, e);
                Finding::degraded(subtask, iteration, format!("evaluation failed: {}", e))
            }
        }
    }

    /// Run every query concurrently, de-duplicating hits by url in query
    /// order. Any query still failing after its retries fails the search step.
    async fn gather(&self, queries: &[String]) -> Result<Vec<SearchHit>> {
        let results = join_all(queries.iter().map(|query| self.search_with_retry(query))).await;

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for result in results {
            for hit in result? {
                if !hit.url.is_empty() && seen.insert(hit.url.clone()) {
                    hits.push(hit);
                }
            }
        }

        Ok(hits)
    }

    async fn search_with_retry(&self, query: &str) -> Result<Vec<SearchHit>> {
        let policy = self.limits.search_retry;
        let mut attempt = 0;
        loop {
            match self.search.search(query, self.limits.max_search_results).await {
                Ok(hits) => {
                    debug!("Search '{}' returned {} hit(s)", query, hits.len());
                    return Ok(hits);
                }
                Err(e) if e.is_capability_unavailable() && attempt < policy.max_retries => {
                    let delay = policy.backoff_for(attempt);
                    warn!(
                        "Search '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        query,
                        attempt + 1,
                        policy.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn evaluate(
        &self,
        query: &ResearchQuery,
        subtask: &SubTask,
        hits: &[SearchHit],
    ) -> Result<EvaluationResponse> {
        let prompt = StructuredPrompt::with_narrowed(
            evaluation_prompt(query, subtask, hits, 400),
            evaluation_prompt(query, subtask, hits, 120),
        );
        complete_structured(
            self.llm.as_ref(),
            &prompt,
            &self.options,
            self.limits.completion_retry,
            parse_json,
        )
        .await
    }
}

fn build_finding(
    subtask: &SubTask,
    iteration: u32,
    hits: &[SearchHit],
    response: EvaluationResponse,
) -> Finding {
    let mut kept = HashSet::new();
    let sources: Vec<SourceInsight> = response
        .evaluations
        .iter()
        .filter(|v| v.relevant && v.index >= 1 && v.index <= hits.len())
        .filter(|v| kept.insert(v.index))
        .map(|v| {
            let hit = &hits[v.index - 1];
            SourceInsight {
                url: hit.url.clone(),
                title: hit.title.clone(),
                snippet: hit.snippet.clone(),
                insight: if v.insight.trim().is_empty() {
                    hit.snippet.clone()
                } else {
                    v.insight.trim().to_string()
                },
                credibility: v
                    .credibility
                    .as_deref()
                    .map(Credibility::parse_lenient)
                    .unwrap_or_default(),
            }
        })
        .collect();

    let credibility = match response.credibility.as_deref() {
        Some(value) => Credibility::parse_lenient(value),
        None => sources
            .iter()
            .map(|s| s.credibility)
            .max()
            .unwrap_or(Credibility::Low),
    };

    let summary = if response.summary.trim().is_empty() {
        sources
            .iter()
            .map(|s| s.insight.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        response.summary.trim().to_string()
    };

    Finding {
        subtask_id: subtask.id.clone(),
        slot: subtask.slot,
        iteration,
        sources,
        credibility,
        summary,
        degraded: false,
        failure: None,
        completed_at: Utc::now(),
    }
}

fn evaluation_prompt(
    query: &ResearchQuery,
    subtask: &SubTask,
    hits: &[SearchHit],
    snippet_chars: usize,
) -> String {
    let mut prompt = format!(
        "{}\n\nResearch question: {}\nSub-task: {}\nObjective: {}\n",
        EVALUATE_TASK, query.text, subtask.title, subtask.objective
    );
    if !subtask.expected_output.is_empty() {
        let _ = writeln!(prompt, "Expected output: {}", subtask.expected_output);
    }

    prompt.push_str("\nSearch results:\n");
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. {} <{}>\n   {}",
            i + 1,
            hit.title,
            hit.url,
            clip(&hit.snippet, snippet_chars)
        );
    }

    prompt.push_str(
        r#"
Judge every result. Mark a result relevant only if it helps the objective.

Respond with JSON:
{
  "evaluations": [
    {"index": 1, "relevant": true, "credibility": "high | medium | low", "insight": "what this source contributes"}
  ],
  "summary": "what the relevant results establish together",
  "credibility": "high | medium | low"
}"#,
    );
    prompt
}
