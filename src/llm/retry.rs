//! Bounded retries and structured (JSON) completions
//!
//! Two failure classes are handled differently:
//! - transport failures ([`AppError::CompletionUnavailable`]) are retried with
//!   exponential backoff up to [`RetryPolicy::max_retries`] times;
//! - unusable output, or a call still failing after its backoff budget, gets
//!   exactly one more attempt with a narrowed prompt before the error is
//!   returned to the agent.

use crate::llm::client::{CompletionOptions, LLMClient};
use crate::types::{AppError, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

const NARROWING_SUFFIX: &str = "\n\nIMPORTANT: Respond with ONLY one valid JSON value that \
matches the requested structure. Do not add explanations, markdown or code fences.";

/// Backoff policy for transient capability failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests and offline fakes
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based), doubling up to 8x base.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.pow(attempt.min(3))
    }
}

/// Prompt pair for a structured call: the normal prompt and its narrowed retry.
#[derive(Debug, Clone)]
pub struct StructuredPrompt {
    pub primary: String,
    pub narrowed: String,
}

impl StructuredPrompt {
    /// Narrowed prompt is the primary prompt with a strict output instruction.
    pub fn new(primary: impl Into<String>) -> Self {
        let primary = primary.into();
        let narrowed = format!("{}{}", primary, NARROWING_SUFFIX);
        Self { primary, narrowed }
    }

    /// Use a separately built (e.g. shorter-context) narrowed prompt.
    pub fn with_narrowed(primary: impl Into<String>, narrowed: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            narrowed: format!("{}{}", narrowed.into(), NARROWING_SUFFIX),
        }
    }
}

/// Call the model, retrying transport failures with bounded backoff.
pub async fn complete_with_retry(
    llm: &dyn LLMClient,
    prompt: &str,
    options: &CompletionOptions,
    policy: RetryPolicy,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        match llm.complete(prompt, options).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_capability_unavailable() && attempt < policy.max_retries => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "Completion unavailable (attempt {}/{}), retrying in {:?}: {}",
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

/// Structured call: primary prompt, then one narrowed retry on any failure.
pub async fn complete_structured<T, F>(
    llm: &dyn LLMClient,
    prompt: &StructuredPrompt,
    options: &CompletionOptions,
    policy: RetryPolicy,
    parse: F,
) -> Result<T>
where
    F: Fn(&str) -> Result<T>,
{
    let first = match complete_with_retry(llm, &prompt.primary, options, policy).await {
        Ok(text) => parse(&text),
        Err(e) => Err(e),
    };

    match first {
        Ok(value) => Ok(value),
        Err(e) => {
            let cause = if e.is_malformed() {
                "unusable output"
            } else {
                "call failed"
            };
            warn!(
                "Structured completion failed ({}), retrying with narrowed prompt: {}",
                cause, e
            );
            let text = complete_with_retry(llm, &prompt.narrowed, options, policy).await?;
            parse(&text)
        }
    }
}

/// Locate the JSON value inside a model response.
///
/// Handles code fences and leading/trailing prose by taking the span from the
/// first `{` or `[` to the last matching closer.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model response into `T`, mapping failures to `CompletionMalformed`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json = extract_json(text).ok_or_else(|| {
        AppError::CompletionMalformed(format!(
            "no JSON found in response ({} chars)",
            text.len()
        ))
    })?;
    debug!("Parsing {} bytes of model JSON", json.len());
    serde_json::from_str(json).map_err(|e| AppError::CompletionMalformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;

    struct Sequenced {
        responses: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Sequenced {
        fn new(mut responses: Vec<Result<String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMClient for Sequenced {
        async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(AppError::CompletionUnavailable("exhausted".into())))
        }

        fn model_name(&self) -> &str {
            "sequenced"
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: u32,
    }

    #[test]
    fn test_extract_json_from_fenced_response() {
        let text = "Here you go:\n```json\n{\"value\": 3}\n```\nThanks";
        assert_eq!(extract_json(text), Some("{\"value\": 3}"));
    }

    #[test]
    fn test_extract_json_array_and_missing() {
        assert_eq!(extract_json("x [1, 2] y"), Some("[1, 2]"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_json_malformed() {
        let result: Result<Answer> = parse_json("{\"value\": }");
        assert!(matches!(result, Err(AppError::CompletionMalformed(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_for(7), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let llm = Sequenced::new(vec![
            Err(AppError::CompletionUnavailable("down".into())),
            Ok("{\"value\": 1}".into()),
        ]);
        let text = complete_with_retry(
            &llm,
            "p",
            &CompletionOptions::default(),
            RetryPolicy::immediate(2),
        )
        .await
        .unwrap();
        assert_eq!(text, "{\"value\": 1}");
        assert_eq!(llm.prompts.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_output_retries_once_with_narrowed_prompt() {
        let llm = Sequenced::new(vec![Ok("not json".into()), Ok("{\"value\": 7}".into())]);
        let answer: Answer = complete_structured(
            &llm,
            &StructuredPrompt::new("give me a value"),
            &CompletionOptions::default(),
            RetryPolicy::immediate(0),
            parse_json,
        )
        .await
        .unwrap();

        assert_eq!(answer, Answer { value: 7 });
        let prompts = llm.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("IMPORTANT"));
    }

    #[tokio::test]
    async fn test_second_failure_is_returned() {
        let llm = Sequenced::new(vec![Ok("nope".into()), Ok("still nope".into())]);
        let result: Result<Answer> = complete_structured(
            &llm,
            &StructuredPrompt::new("give me a value"),
            &CompletionOptions::default(),
            RetryPolicy::immediate(0),
            parse_json,
        )
        .await;
        assert!(matches!(result, Err(AppError::CompletionMalformed(_))));
        assert_eq!(llm.prompts.lock().len(), 2);
    }
}
