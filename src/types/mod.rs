use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============= Query & Submission Types =============

/// A research question plus the identity it was submitted under.
///
/// The id is what memory lookups, status checks and idempotent
/// re-submission key on; the text is never mutated after submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchQuery {
    pub id: Uuid,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl ResearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), text)
    }

    pub fn with_id(id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }

    /// Lowercased, whitespace-collapsed text used for lookups by query text.
    pub fn normalized_text(&self) -> String {
        normalize_query_text(&self.text)
    }
}

/// Normalize free text the same way stored queries are indexed.
pub fn normalize_query_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Request accepted by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    /// Re-use an existing id; re-submitting a finished id returns the stored report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subagents: Option<usize>,
    /// Where the final report is additionally written as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// How a caller identifies the run it wants the status of.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    Id(Uuid),
    Text(String),
}

/// Orchestrator state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResearchState {
    Planning,
    Dispatching,
    Synthesizing,
    Deciding,
    Citing,
    Persisting,
    Done,
    Failed,
}

impl ResearchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResearchState::Done | ResearchState::Failed)
    }

    /// Transition guard for the research loop.
    ///
    /// `Deciding` is the only branching state; `Failed` is reachable from any
    /// non-terminal state.
    pub fn can_transition_to(self, next: ResearchState) -> bool {
        use ResearchState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Planning, Dispatching)
            | (Dispatching, Synthesizing)
            | (Synthesizing, Deciding)
            | (Deciding, Dispatching)
            | (Deciding, Citing)
            | (Citing, Persisting)
            | (Persisting, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ResearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResearchState::Planning => "PLANNING",
            ResearchState::Dispatching => "DISPATCHING",
            ResearchState::Synthesizing => "SYNTHESIZING",
            ResearchState::Deciding => "DECIDING",
            ResearchState::Citing => "CITING",
            ResearchState::Persisting => "PERSISTING",
            ResearchState::Done => "DONE",
            ResearchState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Persisted progress of one run, stored under the run's status key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub query: ResearchQuery,
    pub state: ResearchState,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub query_id: Uuid,
    pub query: String,
    pub state: ResearchState,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present only once the run is `DONE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CitedReport>,
}

// ============= Plan Types =============

/// One decomposed unit of research handed to a single worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTask {
    pub id: String,
    /// Worker slot, 1..=max_subagents
    pub slot: usize,
    pub title: String,
    pub objective: String,
    #[serde(default)]
    pub focus_area: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchPlan {
    pub query_id: Uuid,
    pub iteration: u32,
    pub subtasks: Vec<SubTask>,
    #[serde(default)]
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

// ============= Finding Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Credibility {
    Low,
    #[default]
    Medium,
    High,
}

impl Credibility {
    /// Lenient parse of model output; unknown values fall back to medium.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" => Credibility::High,
            "low" => Credibility::Low,
            _ => Credibility::Medium,
        }
    }
}

/// A single relevant hit kept by a worker, keyed by its url.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInsight {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub insight: String,
    pub credibility: Credibility,
}

/// Output of one worker for one sub-task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub subtask_id: String,
    pub slot: usize,
    pub iteration: u32,
    pub sources: Vec<SourceInsight>,
    pub credibility: Credibility,
    pub summary: String,
    /// Set iff the search or evaluation step failed or timed out
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl Finding {
    /// Finding recorded in place of a worker that failed.
    pub fn degraded(subtask: &SubTask, iteration: u32, failure: impl Into<String>) -> Self {
        Self {
            subtask_id: subtask.id.clone(),
            slot: subtask.slot,
            iteration,
            sources: Vec::new(),
            credibility: Credibility::Low,
            summary: String::new(),
            degraded: true,
            failure: Some(failure.into()),
            completed_at: Utc::now(),
        }
    }

    /// True when the worker produced at least one usable source.
    pub fn is_productive(&self) -> bool {
        !self.degraded && !self.sources.is_empty()
    }
}

// ============= Report Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" => ConfidenceLevel::High,
            "low" => ConfidenceLevel::Low,
            _ => ConfidenceLevel::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

/// A source as listed in a report's `sources_used`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub domain: String,
    /// Snippet the source was kept for, used when matching claims
    #[serde(default)]
    pub context: String,
}

/// Aggregate of one iteration's findings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesizedReport {
    pub query_id: Uuid,
    pub query: String,
    pub iteration: u32,
    pub executive_summary: String,
    pub key_findings: Vec<String>,
    pub detailed_analysis: String,
    pub sources_used: Vec<Source>,
    pub gaps_identified: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence_level: ConfidenceLevel,
    /// 0-100
    pub completeness_score: u8,
    #[serde(default)]
    pub degraded: bool,
}

impl SynthesizedReport {
    pub fn has_source(&self, url: &str) -> bool {
        self.sources_used.iter().any(|s| s.url == url)
    }

    pub fn source(&self, url: &str) -> Option<&Source> {
        self.sources_used.iter().find(|s| s.url == url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    /// `[n](url)`
    #[default]
    Markdown,
    /// `[n]`
    Numeric,
}

/// One cited source within a citation, numbered as in the reference list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitedSource {
    pub number: usize,
    pub url: String,
    pub title: String,
}

/// Claim identifier mapped to the sources it was attributed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub claim_id: String,
    pub claim: String,
    pub sources: Vec<CitedSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationMetadata {
    /// Exactly the number of markers inserted into the text
    pub total_citations: usize,
    pub distinct_sources: usize,
    /// Urls referenced by at least one marker, in reference-list order
    pub sources_used: Vec<String>,
    pub citation_style: CitationStyle,
}

/// Terminal artifact of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitedReport {
    #[serde(flatten)]
    pub report: SynthesizedReport,
    pub citations: Vec<Citation>,
    pub citation_metadata: CitationMetadata,
}

// ============= Loop Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    pub reason: String,
    /// Gaps the next plan should target
    #[serde(default)]
    pub specific_gaps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_query: Option<String>,
}

impl Decision {
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            outcome: DecisionOutcome::Stop,
            reason: reason.into(),
            specific_gaps: Vec::new(),
            refined_query: None,
        }
    }

    pub fn should_continue(&self) -> bool {
        self.outcome == DecisionOutcome::Continue
    }
}

/// Append-only snapshot of one loop pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    pub query_id: Uuid,
    pub iteration: u32,
    pub plan: ResearchPlan,
    pub findings: Vec<Finding>,
    pub report: SynthesizedReport,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Completion unavailable: {0}")]
    CompletionUnavailable(String),

    #[error("Completion output malformed: {0}")]
    CompletionMalformed(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Planning failed: {0}")]
    PlanningFailure(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("Decision failed: {0}")]
    DecisionFailure(String),

    #[error("Citation for claim '{claim_id}' references unknown source '{url}'")]
    CitationConsistency { claim_id: String, url: String },

    #[error("No findings: {0}")]
    NoFindings(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transport-level failure of the completion or search capability.
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(
            self,
            AppError::CompletionUnavailable(_) | AppError::SearchUnavailable(_)
        )
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, AppError::CompletionMalformed(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(format!("serialization failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
