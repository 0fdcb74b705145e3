//! Citation agent
//!
//! Claims are deterministic segments of the final report: every sentence of
//! `detailed_analysis` (`analysis-N`) and every key finding (`finding-N`). The
//! completion model proposes which source urls back which claim ids; this
//! module verifies each proposal against the report's `sources_used`, inserts
//! one marker per (claim, source) pair right after the claim and appends a
//! numbered reference list.
//!
//! A proposed url that is not one of the report's sources is a hard
//! [`AppError::CitationConsistency`] failure. Unknown claim ids are ignored.

use super::clip;
use crate::llm::retry::{complete_structured, parse_json};
use crate::llm::{CompletionOptions, LLMClient, RetryPolicy, StructuredPrompt};
use crate::types::{
    AppError, Citation, CitationMetadata, CitationStyle, CitedReport, CitedSource, Result,
    SynthesizedReport,
};
use crate::utils::toml_config::ResearchLimits;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CITE_TASK: &str = "TASK: cite-claims";

const CITATION_SYSTEM: &str = "You attribute claims in research reports to the \
sources they come from. Only use the sources you are given. Answer with the JSON \
structure you are asked for and nothing else.";

/// Minimum words for a sentence to count as a claim
const MIN_CLAIM_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimLocation {
    /// Byte offset in `detailed_analysis` just past the claim
    Analysis { end: usize },
    /// Index into `key_findings`
    KeyFinding(usize),
}

/// A span of report text that may carry citations.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub id: String,
    pub text: String,
    location: ClaimLocation,
}

#[derive(Debug, Deserialize)]
struct CitationResponse {
    #[serde(default)]
    citations: Vec<ProposedCitation>,
}

/// Model proposal: which sources back a claim.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposedCitation {
    pub claim_id: String,
    #[serde(default, alias = "sources")]
    pub urls: Vec<String>,
}

/// Segment a report into citable claims, in text order.
pub fn segment_claims(report: &SynthesizedReport) -> Vec<Claim> {
    let analysis = &report.detailed_analysis;
    let mut claims: Vec<Claim> = sentence_spans(analysis)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| Claim {
            id: format!("analysis-{}", i + 1),
            text: analysis[start..end].to_string(),
            location: ClaimLocation::Analysis { end },
        })
        .collect();

    claims.extend(
        report
            .key_findings
            .iter()
            .enumerate()
            .filter(|(_, finding)| !finding.trim().is_empty())
            .map(|(i, finding)| Claim {
                id: format!("finding-{}", i + 1),
                text: finding.trim().to_string(),
                location: ClaimLocation::KeyFinding(i),
            }),
    );

    claims
}

/// Byte spans of claim-worthy sentences. Sentences end at `.`, `!` or `?`
/// followed by whitespace, or at a line break.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let (end, next_start) = match c {
            '\n' => (i, i + 1),
            '.' | '!' | '?' => {
                let end = i + c.len_utf8();
                match chars.peek() {
                    None => (end, end),
                    Some((_, next)) if next.is_whitespace() => (end, end),
                    _ => continue,
                }
            }
            _ => continue,
        };
        push_span(text, start, end, &mut spans);
        start = next_start;
    }
    push_span(text, start, text.len(), &mut spans);

    spans
}

fn push_span(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let raw = &text[start..end];
    let leading = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    if trimmed.starts_with('#') || trimmed.split_whitespace().count() < MIN_CLAIM_WORDS {
        return;
    }
    let s = start + leading;
    spans.push((s, s + trimmed.len()));
}

fn marker(style: CitationStyle, number: usize, url: &str) -> String {
    match style {
        CitationStyle::Markdown => format!("[{}]({})", number, url),
        CitationStyle::Numeric => format!("[{}]", number),
    }
}

/// Report returned unchanged with empty citation metadata.
pub fn uncited(report: SynthesizedReport, style: CitationStyle) -> CitedReport {
    CitedReport {
        report,
        citations: Vec::new(),
        citation_metadata: CitationMetadata {
            total_citations: 0,
            distinct_sources: 0,
            sources_used: Vec::new(),
            citation_style: style,
        },
    }
}

/// Verify proposals and rewrite the report with markers and references.
pub fn apply_citations(
    mut report: SynthesizedReport,
    claims: &[Claim],
    proposals: &[ProposedCitation],
    style: CitationStyle,
) -> Result<CitedReport> {
    let index: HashMap<&str, usize> = claims
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut assigned: Vec<Vec<String>> = vec![Vec::new(); claims.len()];
    for proposal in proposals {
        let Some(&slot) = index.get(proposal.claim_id.trim()) else {
            debug!("Ignoring citation for unknown claim '{}'", proposal.claim_id);
            continue;
        };
        for url in proposal.urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            if !report.has_source(url) {
                return Err(AppError::CitationConsistency {
                    claim_id: proposal.claim_id.trim().to_string(),
                    url: url.to_string(),
                });
            }
            if !assigned[slot].iter().any(|u| u == url) {
                assigned[slot].push(url.to_string());
            }
        }
    }

    // reference numbers follow first use in text order
    let mut referenced: Vec<String> = Vec::new();
    for url in assigned.iter().flatten() {
        if !referenced.contains(url) {
            referenced.push(url.clone());
        }
    }
    let number_of = |url: &str| {
        referenced
            .iter()
            .position(|u| u == url)
            .map(|p| p + 1)
            .unwrap_or_default()
    };
    let markers_for = |urls: &[String]| {
        let markers: Vec<String> = urls
            .iter()
            .map(|u| marker(style, number_of(u), u))
            .collect();
        format!(" {}", markers.join(" "))
    };

    let mut analysis = String::with_capacity(report.detailed_analysis.len() + 256);
    let mut cursor = 0;
    let mut citations = Vec::new();
    let mut total_citations = 0;

    for (claim, urls) in claims.iter().zip(&assigned) {
        if urls.is_empty() {
            continue;
        }
        match claim.location {
            ClaimLocation::Analysis { end } => {
                analysis.push_str(&report.detailed_analysis[cursor..end]);
                analysis.push_str(&markers_for(urls));
                cursor = end;
            }
            ClaimLocation::KeyFinding(i) => {
                let suffix = markers_for(urls);
                if let Some(finding) = report.key_findings.get_mut(i) {
                    let trimmed_len = finding.trim_end().len();
                    finding.truncate(trimmed_len);
                    finding.push_str(&suffix);
                }
            }
        }

        total_citations += urls.len();
        citations.push(Citation {
            claim_id: claim.id.clone(),
            claim: claim.text.clone(),
            sources: urls
                .iter()
                .map(|u| CitedSource {
                    number: number_of(u),
                    url: u.clone(),
                    title: source_title(&report, u),
                })
                .collect(),
        });
    }
    analysis.push_str(&report.detailed_analysis[cursor..]);

    if !referenced.is_empty() {
        let mut references = String::from("\n\nReferences:\n");
        for (i, url) in referenced.iter().enumerate() {
            let _ = writeln!(references, "{}. {} <{}>", i + 1, source_title(&report, url), url);
        }
        analysis.push_str(references.trim_end());
    }
    report.detailed_analysis = analysis;

    info!(
        "Inserted {} citation(s) across {} source(s)",
        total_citations,
        referenced.len()
    );

    Ok(CitedReport {
        report,
        citations,
        citation_metadata: CitationMetadata {
            total_citations,
            distinct_sources: referenced.len(),
            sources_used: referenced,
            citation_style: style,
        },
    })
}

fn source_title(report: &SynthesizedReport, url: &str) -> String {
    match report.source(url) {
        Some(source) if !source.title.trim().is_empty() => source.title.trim().to_string(),
        Some(source) => source.domain.clone(),
        None => url.to_string(),
    }
}

/// Attaches citations to the final report.
pub struct CitationAgent {
    llm: Arc<dyn LLMClient>,
    retry: RetryPolicy,
    style: CitationStyle,
    options: CompletionOptions,
}

impl CitationAgent {
    pub fn new(llm: Arc<dyn LLMClient>, limits: &ResearchLimits) -> Self {
        Self {
            llm,
            retry: limits.completion_retry,
            style: limits.citation_style,
            options: CompletionOptions::with_system(CITATION_SYSTEM).temperature(0.0),
        }
    }

    pub async fn cite(&self, report: SynthesizedReport) -> Result<CitedReport> {
        let claims = segment_claims(&report);
        if claims.is_empty() || report.sources_used.is_empty() {
            debug!("Nothing to cite ({} claims)", claims.len());
            return Ok(uncited(report, self.style));
        }

        let prompt = StructuredPrompt::new(citation_prompt(&report, &claims));
        let response: CitationResponse = match complete_structured(
            self.llm.as_ref(),
            &prompt,
            &self.options,
            self.retry,
            parse_json,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Citation extraction failed, returning uncited report: {}", e);
                let mut report = report;
                report.degraded = true;
                return Ok(uncited(report, self.style));
            }
        };

        apply_citations(report, &claims, &response.citations, self.style)
    }
}

fn citation_prompt(report: &SynthesizedReport, claims: &[Claim]) -> String {
    let mut prompt = format!("{}\n\nSources:\n", CITE_TASK);
    for source in &report.sources_used {
        let _ = writeln!(
            prompt,
            "- {} ({})\n  {}",
            source.url,
            source.title,
            clip(&source.context, 240)
        );
    }

    prompt.push_str("\nClaims:\n");
    for claim in claims {
        let _ = writeln!(prompt, "{}: {}", claim.id, claim.text);
    }

    prompt.push_str(
        r#"
For each claim that clearly derives from one or more of the sources, list the
source urls exactly as given. Leave out claims no source supports.

Respond with JSON:
{"citations": [{"claim_id": "analysis-1", "urls": ["https://..."]}]}"#,
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfidenceLevel, Source};
    use uuid::Uuid;

    fn report() -> SynthesizedReport {
        SynthesizedReport {
            query_id: Uuid::nil(),
            query: "storage costs".to_string(),
            iteration: 1,
            executive_summary: "Costs are falling.".to_string(),
            key_findings: vec!["Pack prices fell 14% in 2023".to_string(), " ".to_string()],
            detailed_analysis: "## Overview\nBattery pack prices fell to $139/kWh in 2023. \
                                Pumped hydro remains the cheapest bulk option! Ok.\n\
                                Hydrogen storage is still expensive at scale"
                .to_string(),
            sources_used: vec![
                Source {
                    url: "https://a.example/packs".to_string(),
                    title: "Pack survey".to_string(),
                    domain: "a.example".to_string(),
                    context: String::new(),
                },
                Source {
                    url: "https://b.example/hydro".to_string(),
                    title: String::new(),
                    domain: "b.example".to_string(),
                    context: String::new(),
                },
            ],
            gaps_identified: vec![],
            recommendations: vec![],
            confidence_level: ConfidenceLevel::Medium,
            completeness_score: 70,
            degraded: false,
        }
    }

    fn proposal(claim_id: &str, urls: &[&str]) -> ProposedCitation {
        ProposedCitation {
            claim_id: claim_id.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn test_segment_claims() {
        let claims = segment_claims(&report());
        let ids: Vec<_> = claims.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["analysis-1", "analysis-2", "analysis-3", "finding-1"]);
        assert_eq!(claims[0].text, "Battery pack prices fell to $139/kWh in 2023.");
        assert_eq!(claims[2].text, "Hydrogen storage is still expensive at scale");
    }

    #[test]
    fn test_markers_and_references() {
        let report = report();
        let claims = segment_claims(&report);
        let proposals = vec![
            proposal("analysis-2", &["https://b.example/hydro"]),
            proposal("analysis-1", &["https://a.example/packs", "https://a.example/packs"]),
            proposal("finding-1", &["https://a.example/packs", "https://b.example/hydro"]),
            proposal("analysis-99", &["https://a.example/packs"]),
        ];

        let cited = apply_citations(report, &claims, &proposals, CitationStyle::Markdown).unwrap();
        let text = &cited.report.detailed_analysis;

        assert!(text.contains("in 2023. [1](https://a.example/packs) Pumped"));
        assert!(text.contains("option! [2](https://b.example/hydro) Ok."));
        assert!(text.ends_with("2. b.example <https://b.example/hydro>"));
        assert!(text.contains("1. Pack survey <https://a.example/packs>"));
        assert_eq!(
            cited.report.key_findings[0],
            "Pack prices fell 14% in 2023 [1](https://a.example/packs) [2](https://b.example/hydro)"
        );

        let meta = &cited.citation_metadata;
        assert_eq!(meta.total_citations, 4);
        assert_eq!(meta.distinct_sources, 2);
        assert_eq!(
            meta.sources_used,
            vec!["https://a.example/packs", "https://b.example/hydro"]
        );
        assert_eq!(cited.citations.len(), 3);
        assert_eq!(cited.citations[0].claim_id, "analysis-1");
    }

    #[test]
    fn test_numeric_style() {
        let report = report();
        let claims = segment_claims(&report);
        let proposals = vec![proposal("analysis-3", &["https://b.example/hydro"])];

        let cited = apply_citations(report, &claims, &proposals, CitationStyle::Numeric).unwrap();

        assert!(cited
            .report
            .detailed_analysis
            .contains("expensive at scale [1]\n\nReferences:"));
        assert_eq!(cited.citation_metadata.total_citations, 1);
        assert_eq!(cited.citation_metadata.citation_style, CitationStyle::Numeric);
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let report = report();
        let claims = segment_claims(&report);
        let proposals = vec![proposal("analysis-1", &["https://invented.example"])];

        let result = apply_citations(report, &claims, &proposals, CitationStyle::Markdown);

        assert!(matches!(
            result,
            Err(AppError::CitationConsistency { claim_id, url })
                if claim_id == "analysis-1" && url == "https://invented.example"
        ));
    }

    #[test]
    fn test_no_proposals_leaves_text_untouched() {
        let report = report();
        let original = report.detailed_analysis.clone();
        let claims = segment_claims(&report);

        let cited = apply_citations(report, &claims, &[], CitationStyle::Markdown).unwrap();

        assert_eq!(cited.report.detailed_analysis, original);
        assert_eq!(cited.citation_metadata.total_citations, 0);
        assert!(cited.citation_metadata.sources_used.is_empty());
    }
}
