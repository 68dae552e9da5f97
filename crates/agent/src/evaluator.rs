use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use hirewire_core::config::EvaluatorConfig;
use hirewire_core::domain::evaluation::{EvaluatorKind, EvaluatorResult};

use crate::llm::LlmClient;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluatorSettings {
    pub pass_threshold: u8,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl EvaluatorSettings {
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self {
            pass_threshold: config.pass_threshold,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Second-pass quality judge. One instance lives per session so the retry
/// counter spans turns; once it reaches `max_retries` the next failing verdict
/// is forced to pass and the counter starts over.
pub struct Evaluator {
    judge: Arc<dyn LlmClient>,
    settings: EvaluatorSettings,
    retries: AtomicU32,
}

impl Evaluator {
    pub fn new(judge: Arc<dyn LlmClient>, settings: EvaluatorSettings) -> Self {
        Self { judge, settings, retries: AtomicU32::new(0) }
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn record_retry(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn should_retry(&self, result: &EvaluatorResult) -> bool {
        result.score < self.settings.pass_threshold && !result.needs_user_input && !result.forced
    }

    pub async fn evaluate(
        &self,
        model: &str,
        request: &str,
        response: &str,
        kind: EvaluatorKind,
    ) -> EvaluatorResult {
        let threshold = self.settings.pass_threshold;
        let prompt = judge_prompt(kind, request, response, threshold);

        let mut result =
            match tokio::time::timeout(self.settings.timeout, self.judge.complete(model, &prompt))
                .await
            {
                Ok(Ok(reply)) => parse_verdict(&reply, threshold).unwrap_or_else(|| {
                    warn!(
                        event_name = "evaluator.unparseable",
                        kind = kind.as_str(),
                        "judge reply was not valid JSON; passing response"
                    );
                    EvaluatorResult::passing_default()
                }),
                Ok(Err(error)) => {
                    warn!(
                        event_name = "evaluator.judge_failed",
                        kind = kind.as_str(),
                        error = %error,
                        "judge call failed; passing response"
                    );
                    EvaluatorResult::passing_default()
                }
                Err(_) => {
                    warn!(
                        event_name = "evaluator.timeout",
                        kind = kind.as_str(),
                        timeout_secs = self.settings.timeout.as_secs(),
                        "judge call timed out; passing response"
                    );
                    EvaluatorResult::passing_default()
                }
            };

        let failing = !result.meets_criteria || result.score < threshold;
        if failing && self.retries() >= self.settings.max_retries {
            result.meets_criteria = true;
            result.score = result.score.max(threshold);
            result.forced = true;
            self.retries.store(0, Ordering::SeqCst);
        }

        debug!(
            event_name = "evaluator.verdict",
            kind = kind.as_str(),
            score = result.score,
            meets_criteria = result.meets_criteria,
            forced = result.forced,
            "evaluation finished"
        );
        result
    }
}

fn rubric(kind: EvaluatorKind) -> &'static str {
    match kind {
        EvaluatorKind::Career => {
            "- Listings or advice are specific to the user's stated role, level and location.\n\
             - Every job listing includes a company, a title and a link.\n\
             - No invented companies, salaries or application outcomes.\n\
             - Next steps are concrete."
        }
        EvaluatorKind::Crm => {
            "- Answers cite records returned by the CRM lookup rather than guesses.\n\
             - Names, companies and deal stages are reported exactly.\n\
             - Missing records are stated plainly instead of fabricated."
        }
        EvaluatorKind::General => {
            "- The response answers the question that was asked.\n\
             - It is accurate, clear and appropriately concise.\n\
             - It asks for clarification only when the request is genuinely ambiguous."
        }
    }
}

fn judge_prompt(kind: EvaluatorKind, request: &str, response: &str, threshold: u8) -> String {
    format!(
        "You are grading an assistant's reply.\n\n\
         Rubric ({kind}):\n{rubric}\n\n\
         User request:\n{request}\n\n\
         Assistant reply:\n{response}\n\n\
         Reply with JSON only, no prose, using exactly these keys:\n\
         {{\"feedback\": string, \"meets_criteria\": boolean, \"needs_user_input\": boolean, \
         \"score\": integer 0-100}}\n\
         A score of {threshold} or more passes. Set needs_user_input to true only when the \
         reply cannot improve without more information from the user.",
        kind = kind.as_str(),
        rubric = rubric(kind),
    )
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    meets_criteria: Option<bool>,
    #[serde(default)]
    needs_user_input: Option<bool>,
    score: Value,
}

/// Parses a judge reply, tolerating markdown fences and surrounding prose.
pub fn parse_verdict(reply: &str, threshold: u8) -> Option<EvaluatorResult> {
    let unfenced: String = reply
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }

    let raw: RawVerdict = serde_json::from_str(&unfenced[start..=end]).ok()?;
    let score = match &raw.score {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }
    let score = score.round().clamp(0.0, 100.0) as u8;

    Some(EvaluatorResult {
        feedback: raw.feedback.unwrap_or_default(),
        meets_criteria: raw.meets_criteria.unwrap_or(score >= threshold),
        needs_user_input: raw.needs_user_input.unwrap_or(false),
        score,
        forced: false,
    })
}
