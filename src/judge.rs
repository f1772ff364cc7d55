use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time;

use crate::{
    agents::DriverError,
    providers::{CompletionRequest, LLMProvider},
    transcript::Transcript,
    types::Message,
};

/// The fixed failure taxonomy. Every evaluation scores all twelve.
pub const FAILURE_CATEGORIES: [&str; 12] = [
    "technical_failures",
    "comprehension_failures",
    "response_quality_failures",
    "knowledge_failures",
    "task_execution_failures",
    "interaction_design_failures",
    "safety_compliance_failures",
    "escalation_boundary_failures",
    "user_experience_failures",
    "business_logic_failures",
    "meta_cognitive_failures",
    "temporal_failures",
];

/// Score for one failure category. 0 is perfect, 5 is critical failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub score: u8,
    pub justification: String,
    pub confidence: f32,
}

impl CategoryScore {
    fn failed(justification: &str) -> Self {
        Self {
            score: 5,
            justification: justification.to_string(),
            confidence: 0.0,
        }
    }
}

/// Fixed-schema judge output. Deserialization fails if any category is
/// missing, which is what makes a partial judge response a parse error
/// instead of a silently coerced report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub technical_failures: CategoryScore,
    pub comprehension_failures: CategoryScore,
    pub response_quality_failures: CategoryScore,
    pub knowledge_failures: CategoryScore,
    pub task_execution_failures: CategoryScore,
    pub interaction_design_failures: CategoryScore,
    pub safety_compliance_failures: CategoryScore,
    pub escalation_boundary_failures: CategoryScore,
    pub user_experience_failures: CategoryScore,
    pub business_logic_failures: CategoryScore,
    pub meta_cognitive_failures: CategoryScore,
    pub temporal_failures: CategoryScore,
    pub overall_summary: String,
    pub primary_failure_mode: String,
    pub suggestion: String,
}

impl EvaluationReport {
    /// Category names and scores in taxonomy order.
    pub fn categories(&self) -> [(&'static str, &CategoryScore); 12] {
        [
            ("technical_failures", &self.technical_failures),
            ("comprehension_failures", &self.comprehension_failures),
            ("response_quality_failures", &self.response_quality_failures),
            ("knowledge_failures", &self.knowledge_failures),
            ("task_execution_failures", &self.task_execution_failures),
            ("interaction_design_failures", &self.interaction_design_failures),
            ("safety_compliance_failures", &self.safety_compliance_failures),
            ("escalation_boundary_failures", &self.escalation_boundary_failures),
            ("user_experience_failures", &self.user_experience_failures),
            ("business_logic_failures", &self.business_logic_failures),
            ("meta_cognitive_failures", &self.meta_cognitive_failures),
            ("temporal_failures", &self.temporal_failures),
        ]
    }

    /// Sum of all twelve category scores; the per-conversation badness scalar.
    pub fn total_score(&self) -> u32 {
        self.categories()
            .iter()
            .map(|(_, c)| u32::from(c.score))
            .sum()
    }

    /// Degraded report used when the judge call or its parsing failed: every
    /// category at score 5 with zero confidence, so downstream aggregation
    /// never sees a partially keyed structure.
    pub fn fallback(reason: &str) -> Self {
        let failed = CategoryScore::failed("Judge failed to evaluate");
        Self {
            technical_failures: failed.clone(),
            comprehension_failures: failed.clone(),
            response_quality_failures: failed.clone(),
            knowledge_failures: failed.clone(),
            task_execution_failures: failed.clone(),
            interaction_design_failures: failed.clone(),
            safety_compliance_failures: failed.clone(),
            escalation_boundary_failures: failed.clone(),
            user_experience_failures: failed.clone(),
            business_logic_failures: failed.clone(),
            meta_cognitive_failures: failed.clone(),
            temporal_failures: failed,
            overall_summary: format!("Evaluation error: {reason}"),
            primary_failure_mode: "Technical - Evaluation system failure".to_string(),
            suggestion: "Review evaluation system logs".to_string(),
        }
    }
}

/// Judge failure carried as data: the raw error plus the fallback report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
    pub report: EvaluationReport,
}

/// The evaluation slot of a `RunResult`. Serialized untagged: a well-formed
/// report has the twelve category keys at the top level, an error carries
/// `error` plus the fallback report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evaluation {
    Report(EvaluationReport),
    Error(ErrorReport),
}

impl Evaluation {
    pub fn is_report(&self) -> bool {
        matches!(self, Evaluation::Report(_))
    }

    /// The report to read scores from; the fallback when the judge failed.
    pub fn report(&self) -> &EvaluationReport {
        match self {
            Evaluation::Report(report) => report,
            Evaluation::Error(error) => &error.report,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("judge output did not match schema: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Scores a finished transcript against the failure taxonomy via one
/// provider round trip. Never fails outward; every failure path collapses
/// into `Evaluation::Error`.
pub struct Judge {
    provider: Arc<dyn LLMProvider>,
    model: String,
    call_timeout: Duration,
}

impl Judge {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub async fn evaluate(&self, transcript: &Transcript, goal: Option<&str>) -> Evaluation {
        match self.evaluate_inner(transcript, goal).await {
            Ok(report) => Evaluation::Report(report),
            Err(error) => {
                tracing::warn!(error = %error, "judge evaluation failed, using fallback report");
                Evaluation::Error(ErrorReport {
                    error: error.to_string(),
                    report: EvaluationReport::fallback(&error.to_string()),
                })
            }
        }
    }

    async fn evaluate_inner(
        &self,
        transcript: &Transcript,
        goal: Option<&str>,
    ) -> Result<EvaluationReport, JudgeError> {
        let prompt = build_judge_prompt(&transcript.render(), goal);
        let request = CompletionRequest::new(self.model.clone(), vec![Message::user(prompt)])
            .with_system("You are an expert evaluator assessing AI customer support agent performance.")
            .with_max_tokens(4096);

        let response = match time::timeout(self.call_timeout, self.provider.complete(request)).await {
            Ok(result) => result.map_err(DriverError::from)?,
            Err(_) => return Err(DriverError::Timeout(self.call_timeout).into()),
        };

        parse_report(&response.text)
    }
}

/// Decode a raw judge response into the fixed schema. One evaluation call
/// per transcript, no retries; anything malformed is a `Parse` error.
pub fn parse_report(raw: &str) -> Result<EvaluationReport, JudgeError> {
    let block = extract_structured_block(raw);
    Ok(serde_json::from_str(block)?)
}

/// Pull the structured payload out of the raw response: a ```json fence
/// first, any bare fence second, the whole response last. Only the text
/// strictly between the opening fence and the next fence counts.
fn extract_structured_block(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let body = &raw[start + "```json".len()..];
        return slice_to_closing_fence(body);
    }
    if let Some(start) = raw.find("```") {
        let body = &raw[start + "```".len()..];
        return slice_to_closing_fence(body);
    }
    raw.trim()
}

fn slice_to_closing_fence(body: &str) -> &str {
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn build_judge_prompt(transcript: &str, goal: Option<&str>) -> String {
    let goal_section = goal
        .map(|g| format!("\nUser's Goal: {g}\n"))
        .unwrap_or_default();

    format!(
        r#"You are an expert evaluator assessing the performance of an AI Customer Support Agent.

Given the conversation transcript below, evaluate the interaction across the following 12 categories of failure.
For each category, assign:
- A **score from 0-5** (0 = perfect, 5 = critical failure)
- A **short justification** (1-2 sentences)
- A **confidence level** (0-1)

Categories:
1. technical_failures: Downtime, latency, API issues, data quality
2. comprehension_failures: Intent misclassification, entity extraction, context loss
3. response_quality_failures: Hallucinations, irrelevant responses, contradictions
4. knowledge_failures: Knowledge gaps, outdated info, retrieval failures
5. task_execution_failures: Action failures, workflow errors, authorization issues
6. interaction_design_failures: Inappropriate tone, cultural insensitivity
7. safety_compliance_failures: Privacy breaches, security vulnerabilities
8. escalation_boundary_failures: Over-confidence, premature escalation
9. user_experience_failures: Frustration amplification, expectation mismatch
10. business_logic_failures: Policy misapplication, exception handling errors
11. meta_cognitive_failures: Calibration errors, self-awareness gaps
12. temporal_failures: State management, timing errors, sequencing failures

Then, provide:
1. overall_summary: Brief summary of the conversation quality
2. primary_failure_mode: The single most significant failure (if any)
3. suggestion: One actionable improvement recommendation
{goal_section}
Return ONLY valid JSON in this exact format (no additional text):

{{
"technical_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"comprehension_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"response_quality_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"knowledge_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"task_execution_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"interaction_design_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"safety_compliance_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"escalation_boundary_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"user_experience_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"business_logic_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"meta_cognitive_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"temporal_failures": {{"score": 0, "justification": "...", "confidence": 0.9}},
"overall_summary": "...",
"primary_failure_mode": "...",
"suggestion": "..."
}}

[Transcript begins below]

{transcript}
"#
    )
}
