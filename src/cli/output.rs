//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the ares-research CLI.

use crate::research::ResearchOutcome;
use crate::types::{CitedReport, IterationRecord, ResearchState, StatusReport};
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the one-line banner
    pub fn banner(&self) {
        if self.colored {
            println!(
                "\n  {} {}\n",
                "ares-research".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            );
        } else {
            println!("\n  ares-research v{}\n", env!("CARGO_PKG_VERSION"));
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a subheader
    pub fn subheader(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.cyan().bold());
        } else {
            println!("\n  --- {} ---", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a list item
    pub fn list_item(&self, item: &str) {
        if self.colored {
            println!("    {} {}", "•".blue(), item);
        } else {
            println!("    - {}", item);
        }
    }

    /// Print an indented block of text
    pub fn paragraph(&self, text: &str) {
        for line in text.lines() {
            println!("    {}", line);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "💡".dimmed(), message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a command suggestion
    pub fn command(&self, cmd: &str) {
        if self.colored {
            println!("     {}", format!("$ {}", cmd).bright_cyan());
        } else {
            println!("     $ {}", cmd);
        }
    }

    /// Print completion message
    pub fn complete(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "🚀".green(), message.bright_green().bold());
        } else {
            println!("\n  [DONE] {}", message);
        }
    }

    /// Print a created file message
    pub fn created(&self, file_type: &str, path: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "✓".green().bold(),
                file_type.dimmed(),
                path.bright_white()
            );
        } else {
            println!("  [CREATED] {} {}", file_type, path);
        }
    }

    /// Print a skipped path message
    pub fn skipped(&self, path: &str, reason: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "○".yellow(),
                path.dimmed(),
                format!("({})", reason).yellow()
            );
        } else {
            println!("  [SKIPPED] {} ({})", path, reason);
        }
    }

    /// Print a created directory message
    pub fn created_dir(&self, path: &str) {
        self.created("directory", path);
    }

    /// Print a table header row
    pub fn table_header(&self, columns: &[&str]) {
        let header: String = columns
            .iter()
            .map(|c| format!("{:<15}", c))
            .collect::<Vec<_>>()
            .join(" ");
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(columns.len() * 16).dimmed());
        } else {
            println!("    {}", header);
            println!("    {}", "-".repeat(columns.len() * 16));
        }
    }

    /// Print a table row
    pub fn table_row(&self, values: &[&str]) {
        let row: String = values
            .iter()
            .map(|v| format!("{:<15}", v))
            .collect::<Vec<_>>()
            .join(" ");
        println!("    {}", row);
    }

    /// Print newline
    pub fn newline(&self) {
        println!();
    }

    /// Print a run state, colored by how it ended
    pub fn state(&self, state: ResearchState) {
        let label = state.to_string();
        if !self.colored {
            self.kv("state", &label);
            return;
        }
        let painted = match state {
            ResearchState::Done => label.green().bold().to_string(),
            ResearchState::Failed => label.red().bold().to_string(),
            _ => label.yellow().to_string(),
        };
        println!("    {}: {}", "state".dimmed(), painted);
    }

    /// Print the human-readable view of a cited report
    pub fn report(&self, cited: &CitedReport) {
        let report = &cited.report;

        self.header(&report.query);
        self.kv("iteration", &report.iteration.to_string());
        self.kv("confidence", report.confidence_level.as_str());
        self.kv("completeness", &format!("{}/100", report.completeness_score));
        if report.degraded {
            self.warning("Report is degraded; some research steps failed or timed out");
        }

        self.subheader("Executive Summary");
        self.paragraph(&report.executive_summary);

        if !report.key_findings.is_empty() {
            self.subheader("Key Findings");
            for finding in &report.key_findings {
                self.list_item(finding);
            }
        }

        self.subheader("Analysis");
        self.paragraph(&report.detailed_analysis);

        if !report.gaps_identified.is_empty() {
            self.subheader("Open Gaps");
            for gap in &report.gaps_identified {
                self.list_item(gap);
            }
        }

        if !report.recommendations.is_empty() {
            self.subheader("Recommendations");
            for recommendation in &report.recommendations {
                self.list_item(recommendation);
            }
        }

        let meta = &cited.citation_metadata;
        self.subheader("Citations");
        self.kv("markers", &meta.total_citations.to_string());
        self.kv("distinct sources", &meta.distinct_sources.to_string());
    }

    /// Print a finished run with its provenance line
    pub fn outcome(&self, outcome: &ResearchOutcome) {
        self.report(&outcome.report);
        self.newline();
        self.kv("query id", &outcome.query_id.to_string());
        self.kv("iterations", &outcome.iterations.to_string());
        if outcome.timed_out {
            self.warning("Research timed out; the report covers partial findings");
        }
        if outcome.cached {
            self.info("Returned the stored report for this query id");
        }
    }

    /// Print one row per recorded iteration
    pub fn history(&self, history: &[IterationRecord]) {
        if history.is_empty() {
            return;
        }

        self.subheader("Iterations");
        self.table_header(&["Iteration", "Workers", "Productive", "Completeness", "Decision"]);
        for record in history {
            let productive = record.findings.iter().filter(|f| f.is_productive()).count();
            self.table_row(&[
                &record.iteration.to_string(),
                &record.findings.len().to_string(),
                &productive.to_string(),
                &format!("{}/100", record.report.completeness_score),
                &format!("{:?}", record.decision.outcome),
            ]);
        }
    }

    /// Print a status answer
    pub fn status(&self, status: &StatusReport) {
        self.header("Research Status");
        self.kv("query id", &status.query_id.to_string());
        self.kv("query", &status.query);
        self.state(status.state);
        self.kv("iteration", &status.iteration.to_string());
        self.kv("created", &status.created_at.to_rfc3339());
        self.kv("updated", &status.updated_at.to_rfc3339());
        if let Some(error) = &status.error {
            self.error(error);
        }
        if let Some(report) = &status.report {
            self.report(report);
        }
    }
}
