//! Lead agent: plans each iteration, merges worker findings into a report and
//! decides whether another pass is worth running.

use super::clip;
use crate::llm::retry::{complete_structured, parse_json};
use crate::llm::{CompletionOptions, LLMClient, StructuredPrompt};
use crate::memory::{keys, MemoryRecord, MemoryStore, RecordKind};
use crate::tools::search::domain_of;
use crate::types::{
    AppError, CitedReport, ConfidenceLevel, Decision, DecisionOutcome, Finding, IterationRecord,
    ResearchPlan, ResearchQuery, Result, Source, SubTask, SynthesizedReport,
};
use crate::utils::toml_config::ResearchLimits;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PLAN_TASK: &str = "TASK: research-plan";
pub const SYNTHESIS_TASK: &str = "TASK: synthesize-findings";
pub const REVIEW_TASK: &str = "TASK: review-completeness";

const LEAD_SYSTEM: &str = "You are the lead researcher of a small research team. \
You break questions into focused sub-tasks, merge your team's findings into one \
report and judge when a question has been answered well enough. Answer with the \
JSON structure you are asked for and nothing else.";

const MAX_SEARCH_QUERIES: usize = 3;

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    subtasks: Vec<SubTaskDraft>,
}

#[derive(Debug, Deserialize)]
struct SubTaskDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    objective: String,
    #[serde(default)]
    focus_area: String,
    #[serde(default)]
    search_queries: Vec<String>,
    #[serde(default)]
    expected_output: String,
}

impl SubTaskDraft {
    fn is_usable(&self) -> bool {
        !self.title.trim().is_empty() || !self.objective.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    executive_summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    detailed_analysis: String,
    #[serde(default)]
    gaps_identified: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    confidence_level: Option<String>,
    #[serde(default)]
    completeness_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    needs_more_research: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    specific_gaps: Vec<String>,
    #[serde(default)]
    refined_query: Option<String>,
}

fn parse_plan(text: &str) -> Result<PlanResponse> {
    let response: PlanResponse = parse_json(text)?;
    if !response.subtasks.iter().any(SubTaskDraft::is_usable) {
        return Err(AppError::CompletionMalformed(
            "plan contains no usable sub-tasks".to_string(),
        ));
    }
    Ok(response)
}

fn parse_synthesis(text: &str) -> Result<SynthesisResponse> {
    let response: SynthesisResponse = parse_json(text)?;
    if response.executive_summary.trim().is_empty() && response.detailed_analysis.trim().is_empty()
    {
        return Err(AppError::CompletionMalformed(
            "synthesis has neither a summary nor an analysis".to_string(),
        ));
    }
    Ok(response)
}

/// Completeness used when the model does not score its own report.
pub fn fallback_completeness(distinct_sources: usize, gaps: usize) -> u8 {
    let score = 40 + 10 * distinct_sources as i64 - 10 * gaps as i64;
    score.clamp(0, 100) as u8
}

/// True when the numeric stop rule does not yet hold.
pub fn needs_more_research(report: &SynthesizedReport, threshold: u8) -> bool {
    !report.gaps_identified.is_empty() || report.completeness_score < threshold
}

/// Every source of every usable finding, first occurrence wins.
pub fn collect_sources(findings: &[Finding]) -> Vec<Source> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .filter(|f| !f.degraded)
        .flat_map(|f| f.sources.iter())
        .filter(|s| seen.insert(s.url.clone()))
        .map(|s| Source {
            url: s.url.clone(),
            title: s.title.clone(),
            domain: domain_of(&s.url),
            context: if s.insight.is_empty() {
                s.snippet.clone()
            } else {
                s.insight.clone()
            },
        })
        .collect()
}

/// Report assembled straight from the findings when synthesis is unavailable.
pub fn fallback_report(
    query: &ResearchQuery,
    iteration: u32,
    findings: &[Finding],
    failure: &str,
) -> SynthesizedReport {
    let sources = collect_sources(findings);
    let summaries: Vec<String> = findings
        .iter()
        .filter(|f| !f.degraded && !f.summary.trim().is_empty())
        .map(|f| f.summary.trim().to_string())
        .collect();
    let gaps = vec![format!("Synthesis unavailable: {}", failure)];

    SynthesizedReport {
        query_id: query.id,
        query: query.text.clone(),
        iteration,
        executive_summary: "Automated synthesis failed; the findings below are reported as \
                            the research workers returned them."
            .to_string(),
        key_findings: summaries.clone(),
        detailed_analysis: summaries.join("\n\n"),
        completeness_score: fallback_completeness(sources.len(), gaps.len()),
        sources_used: sources,
        gaps_identified: gaps,
        recommendations: Vec::new(),
        confidence_level: ConfidenceLevel::Low,
        degraded: true,
    }
}

/// Plans, synthesizes and decides for a single run.
pub struct LeadAgent {
    llm: Arc<dyn LLMClient>,
    memory: Arc<dyn MemoryStore>,
    limits: ResearchLimits,
    options: CompletionOptions,
}

impl LeadAgent {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        memory: Arc<dyn MemoryStore>,
        limits: ResearchLimits,
    ) -> Self {
        let options = CompletionOptions::with_system(LEAD_SYSTEM).temperature(limits.temperature);
        Self {
            llm,
            memory,
            limits,
            options,
        }
    }

    /// Decompose the query into at most `max_subagents` sub-tasks and persist
    /// the plan under the (query id, iteration) key.
    ///
    /// `guidance` is the decision that asked for this iteration; its gaps and
    /// refined query steer the new plan.
    pub async fn plan(
        &self,
        query: &ResearchQuery,
        iteration: u32,
        history: &[IterationRecord],
        guidance: Option<&Decision>,
    ) -> Result<ResearchPlan> {
        let related = self.related_research(query).await;
        let prompt = StructuredPrompt::with_narrowed(
            self.plan_prompt(query, iteration, history, guidance, &related),
            self.plan_prompt(query, iteration, &[], guidance, &[]),
        );

        let response = complete_structured(
            self.llm.as_ref(),
            &prompt,
            &self.options,
            self.limits.completion_retry,
            parse_plan,
        )
        .await
        .map_err(|e| AppError::PlanningFailure(e.to_string()))?;

        let plan = ResearchPlan {
            query_id: query.id,
            iteration,
            subtasks: assign_slots(iteration, response.subtasks, self.limits.max_subagents),
            rationale: response.rationale,
            created_at: Utc::now(),
        };

        info!(
            "Planned iteration {} with {} sub-task(s)",
            iteration,
            plan.subtasks.len()
        );

        self.memory
            .put(MemoryRecord::new(
                keys::plan(query.id, iteration),
                RecordKind::Plan,
                query.id,
                &plan,
            )?)
            .await?;

        Ok(plan)
    }

    /// Merge one iteration's findings into a report.
    ///
    /// `sources_used` is built from the findings alone; urls the model mentions
    /// on its own never make it into the report.
    pub async fn synthesize(
        &self,
        query: &ResearchQuery,
        iteration: u32,
        findings: &[Finding],
    ) -> Result<SynthesizedReport> {
        let sources = collect_sources(findings);
        let prompt = StructuredPrompt::with_narrowed(
            synthesis_prompt(query, findings, 600),
            synthesis_prompt(query, findings, 150),
        );

        let response = complete_structured(
            self.llm.as_ref(),
            &prompt,
            &self.options,
            self.limits.completion_retry,
            parse_synthesis,
        )
        .await
        .map_err(|e| AppError::SynthesisFailure(e.to_string()))?;

        let gaps = clean_list(response.gaps_identified);
        let completeness_score = response
            .completeness_score
            .map(|s| s.clamp(0.0, 100.0).round() as u8)
            .unwrap_or_else(|| fallback_completeness(sources.len(), gaps.len()));

        let report = SynthesizedReport {
            query_id: query.id,
            query: query.text.clone(),
            iteration,
            executive_summary: response.executive_summary.trim().to_string(),
            key_findings: clean_list(response.key_findings),
            detailed_analysis: response.detailed_analysis.trim().to_string(),
            sources_used: sources,
            gaps_identified: gaps,
            recommendations: clean_list(response.recommendations),
            confidence_level: response
                .confidence_level
                .as_deref()
                .map(ConfidenceLevel::parse_lenient)
                .unwrap_or_default(),
            completeness_score,
            degraded: findings.iter().any(|f| f.degraded),
        };

        info!(
            "Synthesized iteration {}: {} source(s), {} gap(s), completeness {}",
            iteration,
            report.sources_used.len(),
            report.gaps_identified.len(),
            report.completeness_score
        );

        Ok(report)
    }

    /// Continue only below the iteration cap and while gaps remain or the
    /// score is under the threshold; the model may still veto continuing.
    pub async fn decide(&self, report: &SynthesizedReport, iteration: u32) -> Result<Decision> {
        if iteration >= self.limits.max_iterations {
            return Ok(Decision::stop(format!(
                "Reached the iteration limit ({})",
                self.limits.max_iterations
            )));
        }

        let threshold = self.limits.completeness_threshold;
        if !needs_more_research(report, threshold) {
            return Ok(Decision::stop(format!(
                "No open gaps and completeness {} meets the threshold {}",
                report.completeness_score, threshold
            )));
        }

        let prompt = StructuredPrompt::new(review_prompt(report, iteration, &self.limits));
        let review: ReviewResponse = complete_structured(
            self.llm.as_ref(),
            &prompt,
            &self.options,
            self.limits.completion_retry,
            parse_json,
        )
        .await
        .map_err(|e| AppError::DecisionFailure(e.to_string()))?;

        if !review.needs_more_research {
            let reason = if review.reason.trim().is_empty() {
                "Reviewer judged the report sufficient".to_string()
            } else {
                review.reason
            };
            return Ok(Decision::stop(reason));
        }

        let mut specific_gaps = clean_list(review.specific_gaps);
        if specific_gaps.is_empty() {
            specific_gaps = report.gaps_identified.clone();
        }

        Ok(Decision {
            outcome: DecisionOutcome::Continue,
            reason: review.reason,
            specific_gaps,
            refined_query: review
                .refined_query
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty()),
        })
    }

    /// Summaries of similar past research on other queries.
    async fn related_research(&self, query: &ResearchQuery) -> Vec<String> {
        let k = self.limits.similar_context;
        if k == 0 {
            return Vec::new();
        }

        let records = match self.memory.similar(&query.text, k * 4).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Similar research lookup failed: {}", e);
                return Vec::new();
            }
        };

        records
            .iter()
            .filter(|r| r.kind == RecordKind::Report && r.query_id != query.id)
            .filter_map(|r| r.decode::<CitedReport>().ok())
            .take(k)
            .map(|cited| {
                format!(
                    "{}: {}",
                    cited.report.query,
                    clip(&cited.report.executive_summary, 300)
                )
            })
            .collect()
    }

    fn plan_prompt(
        &self,
        query: &ResearchQuery,
        iteration: u32,
        history: &[IterationRecord],
        guidance: Option<&Decision>,
        related: &[String],
    ) -> String {
        let max = self.limits.max_subagents;
        let mut prompt = format!(
            "{}\n\nResearch question: {}\nIteration: {} of at most {}\n",
            PLAN_TASK, query.text, iteration, self.limits.max_iterations
        );

        if !history.is_empty() {
            prompt.push_str("\nPrevious iterations:\n");
            for record in history {
                let _ = writeln!(
                    prompt,
                    "- Iteration {}: completeness {}/100, {} source(s); gaps: {}",
                    record.iteration,
                    record.report.completeness_score,
                    record.report.sources_used.len(),
                    if record.report.gaps_identified.is_empty() {
                        "none".to_string()
                    } else {
                        record.report.gaps_identified.join("; ")
                    }
                );
            }
        }

        if let Some(decision) = guidance {
            if !decision.specific_gaps.is_empty() {
                prompt.push_str("\nFocus this iteration on these gaps:\n");
                for gap in &decision.specific_gaps {
                    let _ = writeln!(prompt, "- {}", gap);
                }
            }
            if let Some(refined) = &decision.refined_query {
                let _ = writeln!(prompt, "\nRefined question: {}", refined);
            }
        }

        if !related.is_empty() {
            prompt.push_str("\nRelated past research:\n");
            for summary in related {
                let _ = writeln!(prompt, "- {}", summary);
            }
        }

        let _ = write!(
            prompt,
            r#"
Break the question into between 1 and {max} sub-tasks (aim for {preferred}) that cover
distinct aspects and do not overlap. Each sub-task gets 1-3 web search queries.

Respond with JSON:
{{
  "rationale": "why this decomposition",
  "subtasks": [
    {{
      "title": "short title",
      "objective": "what this sub-task must find out",
      "focus_area": "aspect covered",
      "search_queries": ["query one", "query two"],
      "expected_output": "what a good answer contains"
    }}
  ]
}}"#,
            max = max,
            preferred = max.min(2).max(1),
        );

        debug!("Plan prompt: {} chars", prompt.len());
        prompt
    }
}

fn assign_slots(iteration: u32, drafts: Vec<SubTaskDraft>, max_subagents: usize) -> Vec<SubTask> {
    drafts
        .into_iter()
        .filter(SubTaskDraft::is_usable)
        .take(max_subagents)
        .enumerate()
        .map(|(i, draft)| {
            let slot = i + 1;
            let objective = if draft.objective.trim().is_empty() {
                draft.title.trim().to_string()
            } else {
                draft.objective.trim().to_string()
            };
            let title = if draft.title.trim().is_empty() {
                clip(&objective, 80)
            } else {
                draft.title.trim().to_string()
            };
            SubTask {
                id: format!("{}-{}", iteration, slot),
                slot,
                title,
                objective,
                focus_area: draft.focus_area.trim().to_string(),
                search_queries: clean_list(draft.search_queries)
                    .into_iter()
                    .take(MAX_SEARCH_QUERIES)
                    .collect(),
                expected_output: draft.expected_output.trim().to_string(),
            }
        })
        .collect()
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn synthesis_prompt(query: &ResearchQuery, findings: &[Finding], insight_chars: usize) -> String {
    let mut prompt = format!(
        "{}\n\nResearch question: {}\n\nFindings from the research team:\n",
        SYNTHESIS_TASK, query.text
    );

    for finding in findings {
        if finding.degraded {
            let _ = writeln!(
                prompt,
                "\n## Sub-task {} (incomplete: {})",
                finding.slot,
                finding.failure.as_deref().unwrap_or("unknown failure")
            );
            continue;
        }

        let _ = writeln!(
            prompt,
            "\n## Sub-task {} (credibility: {:?})\n{}",
            finding.slot, finding.credibility, finding.summary
        );
        for source in &finding.sources {
            let _ = writeln!(
                prompt,
                "- {} <{}>: {}",
                source.title,
                source.url,
                clip(&source.insight, insight_chars)
            );
        }
    }

    prompt.push_str(
        r#"
Merge these findings into one report. Only rely on the sources listed above.

Respond with JSON:
{
  "executive_summary": "2-3 sentences",
  "key_findings": ["finding", "..."],
  "detailed_analysis": "several paragraphs of prose",
  "gaps_identified": ["what is still unknown", "..."],
  "recommendations": ["..."],
  "confidence_level": "high | medium | low",
  "completeness_score": 0-100
}"#,
    );
    prompt
}

fn review_prompt(report: &SynthesizedReport, iteration: u32, limits: &ResearchLimits) -> String {
    let mut prompt = format!(
        "{}\n\nResearch question: {}\nIteration {} of at most {}\nCompleteness: {}/100 (threshold {})\nSources: {}\n\nExecutive summary:\n{}\n",
        REVIEW_TASK,
        report.query,
        iteration,
        limits.max_iterations,
        report.completeness_score,
        limits.completeness_threshold,
        report.sources_used.len(),
        report.executive_summary
    );

    if !report.gaps_identified.is_empty() {
        prompt.push_str("\nIdentified gaps:\n");
        for gap in &report.gaps_identified {
            let _ = writeln!(prompt, "- {}", gap);
        }
    }

    prompt.push_str(
        r#"
Decide whether another research iteration would materially improve the answer.

Respond with JSON:
{
  "needs_more_research": true,
  "reason": "short justification",
  "specific_gaps": ["gap the next iteration should target"],
  "refined_query": "optional sharper question, or null"
}"#,
    );
    prompt
}
