//! Classification oracles.
//!
//! An oracle answers one question per failed record: is this failure
//! transient? Implementations return the raw structured text they received
//! (or produced); parsing and repair live in [`crate::classifier`].

pub mod heuristic;
pub mod openai;

pub use heuristic::HeuristicOracle;
pub use openai::OpenAiOracle;

use crate::error::Result;
use crate::report::TestRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Default character budget for the stack-trace excerpt sent to an oracle.
pub const DEFAULT_STACKTRACE_BUDGET: usize = 1000;

/// Name of the function the oracle is asked to call.
pub const ASSESSMENT_FUNCTION: &str = "return_failure_assessment";

/// The descriptive fields of one failed record, as handed to an oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub test_selector: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub exception: Option<String>,
    /// Leading excerpt of the stack trace, at most `stacktrace_budget` characters.
    pub stacktrace_excerpt: Option<String>,
}

impl OracleRequest {
    #[must_use]
    pub fn from_record(record: &TestRecord, stacktrace_budget: usize) -> Self {
        Self {
            test_selector: record.test_selector.clone(),
            description: record.description.clone(),
            file_path: (!record.file_path.is_empty()).then(|| record.file_path.clone()),
            exception: record.exception.clone(),
            stacktrace_excerpt: record
                .stacktrace
                .as_deref()
                .map(|trace| truncate_chars(trace, stacktrace_budget)),
        }
    }

    /// Exception and stack trace joined into one text blob.
    ///
    /// The description is context for the reader, not failure evidence, and
    /// is left out.
    #[must_use]
    pub fn evidence(&self) -> String {
        [self.exception.as_deref(), self.stacktrace_excerpt.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
    }
}

/// A source of failure assessments.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Ask for an assessment of one failure.
    ///
    /// Returns the oracle's raw answer, which should contain a single JSON
    /// object shaped like [`crate::classifier::ClassificationAssessment`] but
    /// may carry extra text or broken punctuation.
    async fn assess(&self, request: &OracleRequest) -> Result<String>;
}

/// JSON schema of the assessment function offered to tool-calling oracles.
#[must_use]
pub fn assessment_parameters_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "category": {
                "type": "string",
                "enum": [
                    "Assertion Failure", "Environment Issue", "Network Error",
                    "Application Logic Error", "Test Data Issue",
                    "Timeout or Sync Issue", "Unknown"
                ]
            },
            "retryable": {
                "type": "boolean",
                "description": "True when the failure is transient and a re-run may pass."
            },
            "confidence": {
                "type": "number",
                "description": "Confidence between 0.0 and 1.0."
            },
            "signals": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Phrases from the failure evidence that support the category."
            },
            "reason": {
                "type": "string",
                "description": "One sentence explaining the decision."
            }
        },
        "required": ["category", "retryable", "confidence", "reason", "signals"]
    })
}

fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
