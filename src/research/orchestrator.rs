use super::citation::CitationAgent;
use super::lead::{fallback_report, LeadAgent};
use super::worker::WorkerAgent;
use crate::llm::LLMClient;
use crate::memory::{get_as, keys, MemoryRecord, MemoryStore, RecordKind};
use crate::tools::SearchProvider;
use crate::types::{
    normalize_query_text, AppError, CitedReport, Decision, Finding, IterationRecord, ResearchPlan,
    ResearchQuery, ResearchRequest, ResearchState, Result, RunRecord, StatusLookup, StatusReport,
    SubTask, SynthesizedReport,
};
use crate::utils::toml_config::ResearchLimits;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Gap added to a report cut short by the research timeout
pub const TIMEOUT_GAP: &str = "Research timed out before completion";

/// Result of a research run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub query_id: Uuid,
    pub report: CitedReport,
    /// Loop passes executed
    pub iterations: u32,
    /// The research timeout cut the loop short
    pub timed_out: bool,
    /// Served from memory without running the loop
    pub cached: bool,
}

/// Drives one research run per request through the state machine
/// `PLANNING -> DISPATCHING -> SYNTHESIZING -> DECIDING -> {DISPATCHING | CITING}
/// -> PERSISTING -> DONE`, with `FAILED` reachable from any state.
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn LLMClient>,
    search: Arc<dyn SearchProvider>,
    memory: Arc<dyn MemoryStore>,
    limits: ResearchLimits,
}

/// Current state of one run, mirrored to memory on every transition.
struct RunTracker {
    memory: Arc<dyn MemoryStore>,
    record: RunRecord,
}

impl RunTracker {
    async fn start(memory: Arc<dyn MemoryStore>, query: &ResearchQuery) -> Result<Self> {
        let now = Utc::now();
        let tracker = Self {
            memory,
            record: RunRecord {
                query: query.clone(),
                state: ResearchState::Planning,
                iteration: 1,
                created_at: now,
                updated_at: now,
                error: None,
            },
        };
        tracker.save().await?;
        tracker
            .memory
            .put(MemoryRecord::new(
                keys::query_index(&query.normalized_text()),
                RecordKind::QueryIndex,
                query.id,
                &query.id,
            )?)
            .await?;

        info!("Research started in {}", ResearchState::Planning);
        Ok(tracker)
    }

    async fn save(&self) -> Result<()> {
        let id = self.record.query.id;
        self.memory
            .put(MemoryRecord::new(
                keys::status(id),
                RecordKind::Status,
                id,
                &self.record,
            )?)
            .await
    }

    async fn transition(&mut self, next: ResearchState, iteration: u32) -> Result<()> {
        let current = self.record.state;
        if !current.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "invalid state transition {} -> {}",
                current, next
            )));
        }

        info!(iteration, "{} -> {}", current, next);
        self.record.state = next;
        self.record.iteration = iteration;
        self.record.updated_at = Utc::now();
        self.save().await
    }

    /// Record the failure and hand the error back to the caller.
    async fn fail(&mut self, err: AppError) -> AppError {
        error!("Research failed in {}: {}", self.record.state, err);
        if !self.record.state.is_terminal() {
            self.record.state = ResearchState::Failed;
        }
        self.record.error = Some(err.to_string());
        self.record.updated_at = Utc::now();
        if let Err(e) = self.save().await {
            warn!("Could not record failure status: {}", e);
        }
        err
    }
}

fn mark_timed_out(report: &mut SynthesizedReport) {
    if !report.gaps_identified.iter().any(|g| g == TIMEOUT_GAP) {
        report.gaps_identified.push(TIMEOUT_GAP.to_string());
    }
    report.degraded = true;
}

async fn write_output(path: Option<&Path>, report: &CitedReport) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::Storage(format!("failed to create {:?}: {}", parent, e)))?;
    }

    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, json).await.map_err(|e| {
        AppError::Storage(format!(
            "failed to write report to {}: {}",
            path.display(),
            e
        ))
    })?;

    info!("Report written to {}", path.display());
    Ok(())
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        search: Arc<dyn SearchProvider>,
        memory: Arc<dyn MemoryStore>,
        limits: ResearchLimits,
    ) -> Self {
        Self {
            llm,
            search,
            memory,
            limits,
        }
    }

    /// Default limits applied to requests without overrides
    pub fn limits(&self) -> &ResearchLimits {
        &self.limits
    }

    /// Run the research loop for a request.
    ///
    /// Re-submitting an id whose report is already persisted returns that
    /// report without calling any agent. Degraded work is folded into the
    /// report; only a run with no usable findings, a citation consistency
    /// violation, a storage failure or an initial planning failure ends in
    /// `FAILED` and returns an error.
    pub async fn run(&self, request: ResearchRequest) -> Result<ResearchOutcome> {
        let text = request.query.trim();
        if text.is_empty() {
            return Err(AppError::InvalidInput(
                "Research query must not be empty".to_string(),
            ));
        }

        let limits = self.limits.clone().with_request(&request)?;
        let query_id = request.query_id.unwrap_or_else(Uuid::new_v4);
        let deadline = Instant::now() + limits.research_timeout;

        if let Some(report) =
            get_as::<CitedReport>(self.memory.as_ref(), &keys::report(query_id)).await?
        {
            info!(%query_id, "Returning stored report");
            let record =
                get_as::<RunRecord>(self.memory.as_ref(), &keys::status(query_id)).await?;
            write_output(request.output.as_deref(), &report).await?;
            return Ok(ResearchOutcome {
                query_id,
                iterations: record
                    .map(|r| r.iteration)
                    .unwrap_or(report.report.iteration),
                timed_out: false,
                cached: true,
                report,
            });
        }

        if let Some(existing) =
            get_as::<RunRecord>(self.memory.as_ref(), &keys::status(query_id)).await?
        {
            return Err(AppError::InvalidInput(format!(
                "query id {} already has a run in state {}; submit without an id to start over",
                query_id, existing.state
            )));
        }

        let query = ResearchQuery::with_id(query_id, text);
        let span = info_span!("research", query_id = %query_id);

        async move {
            let mut run = RunTracker::start(self.memory.clone(), &query).await?;
            match self
                .execute(&mut run, &query, &limits, deadline, request.output.as_deref())
                .await
            {
                Ok(outcome) => Ok(outcome),
                Err(e) => Err(run.fail(e).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        run: &mut RunTracker,
        query: &ResearchQuery,
        limits: &ResearchLimits,
        deadline: Instant,
        output: Option<&Path>,
    ) -> Result<ResearchOutcome> {
        let lead = LeadAgent::new(self.llm.clone(), self.memory.clone(), limits.clone());
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut best: Option<SynthesizedReport> = None;
        let mut timed_out = false;
        let mut iteration = 1;

        let mut plan = match tokio::time::timeout_at(deadline, lead.plan(query, 1, &[], None)).await
        {
            Ok(plan) => plan?,
            Err(_) => {
                return Err(AppError::Timeout(
                    "research timed out before a plan was produced".to_string(),
                ))
            }
        };

        loop {
            run.transition(ResearchState::Dispatching, iteration).await?;
            let (findings, cut_short) = self
                .dispatch(query, iteration, &plan, limits, deadline)
                .await;
            timed_out |= cut_short;

            run.transition(ResearchState::Synthesizing, iteration).await?;
            let (mut report, mut abort) = if findings.iter().all(|f| f.degraded) {
                match best.clone() {
                    Some(prior) => {
                        warn!(
                            "No usable findings in iteration {}, keeping the previous report",
                            iteration
                        );
                        (prior, true)
                    }
                    None => {
                        return Err(AppError::NoFindings(format!(
                            "none of the {} worker(s) produced a usable finding",
                            findings.len()
                        )))
                    }
                }
            } else {
                match lead.synthesize(query, iteration, &findings).await {
                    Ok(report) => (report, false),
                    Err(e) => {
                        warn!("{}; continuing with the best available report", e);
                        let mut fallback = best.clone().unwrap_or_else(|| {
                            fallback_report(query, iteration, &findings, &e.to_string())
                        });
                        fallback.degraded = true;
                        (fallback, true)
                    }
                }
            };

            timed_out |= Instant::now() >= deadline;
            if timed_out {
                mark_timed_out(&mut report);
                abort = true;
            }

            run.transition(ResearchState::Deciding, iteration).await?;
            let decision = if abort {
                Decision::stop(if timed_out {
                    "Research timed out"
                } else {
                    "Stopping after a failed research step"
                })
            } else {
                match lead.decide(&report, iteration).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        warn!("{}; citing the current report", e);
                        Decision::stop(e.to_string())
                    }
                }
            };
            let next_iteration = decision.should_continue() && iteration < limits.max_iterations;
            info!(iteration, outcome = ?decision.outcome, "Decision: {}", decision.reason);

            let record = IterationRecord {
                query_id: query.id,
                iteration,
                plan: plan.clone(),
                findings,
                report: report.clone(),
                decision: decision.clone(),
                timestamp: Utc::now(),
            };
            self.memory
                .put(MemoryRecord::new(
                    keys::iteration(query.id, iteration),
                    RecordKind::Iteration,
                    query.id,
                    &record,
                )?)
                .await?;
            history.push(record);
            best = Some(report);

            if !next_iteration {
                break;
            }

            let replan = lead.plan(query, iteration + 1, &history, Some(&decision));
            match tokio::time::timeout_at(deadline, replan).await {
                Ok(Ok(next)) => {
                    plan = next;
                    iteration += 1;
                }
                Ok(Err(e)) => {
                    warn!("{}; citing the current report", e);
                    break;
                }
                Err(_) => {
                    warn!("Research timed out while planning iteration {}", iteration + 1);
                    timed_out = true;
                    if let Some(report) = best.as_mut() {
                        mark_timed_out(report);
                    }
                    break;
                }
            }
        }

        let Some(report) = best else {
            return Err(AppError::Internal(
                "research loop ended without a report".to_string(),
            ));
        };

        run.transition(ResearchState::Citing, iteration).await?;
        let cited = CitationAgent::new(self.llm.clone(), limits)
            .cite(report)
            .await?;

        run.transition(ResearchState::Persisting, iteration).await?;
        let summary_text = format!("{} {}", query.text, cited.report.executive_summary);
        self.memory
            .put(
                MemoryRecord::new(keys::report(query.id), RecordKind::Report, query.id, &cited)?
                    .with_text(summary_text),
            )
            .await?;
        write_output(output, &cited).await?;

        run.transition(ResearchState::Done, iteration).await?;

        Ok(ResearchOutcome {
            query_id: query.id,
            report: cited,
            iterations: iteration,
            timed_out,
            cached: false,
        })
    }

    /// Fan out one worker per sub-task and wait for every one of them, or
    /// for the research deadline. Returns the findings in slot order and
    /// whether the deadline cut the cohort short.
    async fn dispatch(
        &self,
        query: &ResearchQuery,
        iteration: u32,
        plan: &ResearchPlan,
        limits: &ResearchLimits,
        deadline: Instant,
    ) -> (Vec<Finding>, bool) {
        let subtasks: Vec<SubTask> = plan
            .subtasks
            .iter()
            .take(limits.max_subagents)
            .cloned()
            .collect();
        info!(iteration, "Dispatching {} worker(s)", subtasks.len());

        let mut set = JoinSet::new();
        for subtask in subtasks.iter().cloned() {
            let worker = WorkerAgent::new(
                self.llm.clone(),
                self.search.clone(),
                self.memory.clone(),
                limits.clone(),
            );
            let query = query.clone();
            let span = info_span!("worker", slot = subtask.slot);
            set.spawn(
                async move { worker.research(&query, iteration, &subtask).await }.instrument(span),
            );
        }

        let mut findings = Vec::with_capacity(subtasks.len());
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(finding))) => findings.push(finding),
                Ok(Some(Err(e))) => warn!("Worker task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Research timeout reached with {} worker(s) still running",
                        set.len()
                    );
                    set.abort_all();
                    timed_out = true;
                    break;
                }
            }
        }

        for subtask in &subtasks {
            if findings.iter().any(|f| f.subtask_id == subtask.id) {
                continue;
            }
            let reason = if timed_out {
                "cancelled at the research timeout"
            } else {
                "worker task failed"
            };
            let finding = Finding::degraded(subtask, iteration, reason);
            let key = keys::finding(query.id, iteration, subtask.slot);
            match MemoryRecord::new(key, RecordKind::Finding, query.id, &finding) {
                Ok(record) => {
                    if let Err(e) = self.memory.put(record).await {
                        debug!("Finding for slot {} not recorded: {}", subtask.slot, e);
                    }
                }
                Err(e) => debug!("Finding for slot {} not encoded: {}", subtask.slot, e),
            }
            findings.push(finding);
        }

        findings.sort_by_key(|f| f.slot);
        (findings, timed_out)
    }

    /// Current state of a run, looked up by id or by query text.
    ///
    /// Text lookups resolve to the most recent run submitted with that text.
    pub async fn status(&self, lookup: StatusLookup) -> Result<StatusReport> {
        let query_id = match lookup {
            StatusLookup::Id(id) => id,
            StatusLookup::Text(text) => {
                let key = keys::query_index(&normalize_query_text(&text));
                get_as::<Uuid>(self.memory.as_ref(), &key)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("no research found for '{}'", text.trim()))
                    })?
            }
        };

        let record = get_as::<RunRecord>(self.memory.as_ref(), &keys::status(query_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no research run with id {}", query_id)))?;

        let report = if record.state == ResearchState::Done {
            get_as::<CitedReport>(self.memory.as_ref(), &keys::report(query_id)).await?
        } else {
            None
        };

        Ok(StatusReport {
            query_id,
            query: record.query.text,
            state: record.state,
            iteration: record.iteration,
            created_at: record.created_at,
            updated_at: record.updated_at,
            error: record.error,
            report,
        })
    }

    /// Iteration history of a run, oldest first.
    pub async fn history(&self, query_id: Uuid) -> Result<Vec<IterationRecord>> {
        self.memory
            .scan_prefix(&keys::iteration_prefix(query_id))
            .await?
            .iter()
            .map(MemoryRecord::decode::<IterationRecord>)
            .collect()
    }
}
