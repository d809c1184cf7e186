//! Failure classification adapter.
//!
//! Wraps an [`Oracle`] so the rest of the pipeline only ever sees a typed
//! [`ClassificationAssessment`]. Oracle answers are repaired (object
//! extraction, trailing-comma and dangling-quote cleanup) before parsing, and
//! any failure degrades to a non-retryable `Unknown` assessment.

use crate::error::{Error, Result};
use crate::oracle::{DEFAULT_STACKTRACE_BUDGET, Oracle, OracleRequest};
use crate::report::{TestRecord, TestStatus};
use futures::StreamExt;
use futures::stream;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

static TRAILING_COMMA_REGEX: OnceLock<Regex> = OnceLock::new();
static DANGLING_QUOTE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Root-cause category of a test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureCategory {
    AssertionFailure,
    EnvironmentIssue,
    NetworkError,
    ApplicationLogicError,
    TestDataIssue,
    TimeoutOrSyncIssue,
    Unknown,
}

impl FailureCategory {
    /// All categories, in schema order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::AssertionFailure,
            Self::EnvironmentIssue,
            Self::NetworkError,
            Self::ApplicationLogicError,
            Self::TestDataIssue,
            Self::TimeoutOrSyncIssue,
            Self::Unknown,
        ]
    }

    /// Human-readable label, as used in the oracle schema.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AssertionFailure => "Assertion Failure",
            Self::EnvironmentIssue => "Environment Issue",
            Self::NetworkError => "Network Error",
            Self::ApplicationLogicError => "Application Logic Error",
            Self::TestDataIssue => "Test Data Issue",
            Self::TimeoutOrSyncIssue => "Timeout or Sync Issue",
            Self::Unknown => "Unknown",
        }
    }

    /// Lenient parse: ignores case, spaces and punctuation. Unrecognized
    /// labels map to `Unknown`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let folded: String = label
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "assertionfailure" | "assertion" => Self::AssertionFailure,
            "environmentissue" | "environment" => Self::EnvironmentIssue,
            "networkerror" | "network" => Self::NetworkError,
            "applicationlogicerror" | "applicationerror" => Self::ApplicationLogicError,
            "testdataissue" | "testdata" => Self::TestDataIssue,
            "timeoutorsyncissue" | "timeoutsyncissue" | "timeout" => Self::TimeoutOrSyncIssue,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for FailureCategory {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<FailureCategory> for String {
    fn from(value: FailureCategory) -> Self {
        value.label().to_string()
    }
}

/// Verdict attached to one failed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationAssessment {
    pub category: FailureCategory,
    pub retryable: bool,
    pub confidence: f64,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl ClassificationAssessment {
    /// The safe default used whenever the oracle cannot produce an answer.
    #[must_use]
    pub fn fallback(reason: impl Into<String>, signals: Vec<String>) -> Self {
        Self {
            category: FailureCategory::Unknown,
            retryable: false,
            confidence: 0.0,
            signals,
            reason: reason.into(),
        }
    }
}

/// Why an assessment had to fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleFault {
    /// The oracle could not be reached or refused the request.
    Unavailable,
    /// The oracle answered with something that could not be repaired.
    Malformed,
}

/// An assessment plus the fault that produced it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessed {
    pub assessment: ClassificationAssessment,
    pub fault: Option<OracleFault>,
}

/// Result of classifying a batch of failed records.
#[derive(Debug, Clone, Default)]
pub struct ClassifyReport {
    /// Input records, in input order, each with its assessment attached.
    pub records: Vec<TestRecord>,
    pub retryable: usize,
    pub malformed_responses: usize,
    pub oracle_failures: usize,
}

/// Classification adapter over an [`Oracle`].
#[derive(Clone)]
pub struct Classifier {
    oracle: Arc<dyn Oracle>,
    stacktrace_budget: usize,
    concurrency: usize,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("oracle", &self.oracle.name())
            .field("stacktrace_budget", &self.stacktrace_budget)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Classifier {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            stacktrace_budget: DEFAULT_STACKTRACE_BUDGET,
            concurrency: 1,
        }
    }

    #[must_use]
    pub const fn with_stacktrace_budget(mut self, budget: usize) -> Self {
        self.stacktrace_budget = budget;
        self
    }

    /// Number of records classified at once. Values below 1 are treated as 1.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = if concurrency == 0 { 1 } else { concurrency };
        self
    }

    /// Classify one record. Never fails; see [`ClassificationAssessment::fallback`].
    pub async fn classify(&self, record: &TestRecord) -> ClassificationAssessment {
        self.assess(record).await.assessment
    }

    /// Classify one record and report whether the oracle misbehaved.
    pub async fn assess(&self, record: &TestRecord) -> Assessed {
        tracing::info!(
            selector = %record.test_selector,
            oracle = self.oracle.name(),
            "classifying failure"
        );
        let request = OracleRequest::from_record(record, self.stacktrace_budget);

        let raw = match self.oracle.assess(&request).await {
            Ok(raw) => raw,
            Err(err) => {
                let fault = match err {
                    Error::OracleMalformedResponse(_) => OracleFault::Malformed,
                    _ => OracleFault::Unavailable,
                };
                tracing::warn!(
                    selector = %record.test_selector,
                    error = %err,
                    "oracle call failed; using fallback assessment"
                );
                return Assessed {
                    assessment: ClassificationAssessment::fallback(
                        "The classification oracle could not be consulted.",
                        vec![err.to_string()],
                    ),
                    fault: Some(fault),
                };
            }
        };

        match parse_assessment(&raw) {
            Ok(assessment) => {
                tracing::info!(
                    selector = %record.test_selector,
                    category = %assessment.category,
                    retryable = assessment.retryable,
                    "classified"
                );
                Assessed {
                    assessment,
                    fault: None,
                }
            }
            Err(err) => {
                tracing::warn!(
                    selector = %record.test_selector,
                    error = %err,
                    raw = %raw,
                    "malformed oracle response; using fallback assessment"
                );
                Assessed {
                    assessment: ClassificationAssessment::fallback(
                        "The oracle response could not be parsed.",
                        vec![err.to_string()],
                    ),
                    fault: Some(OracleFault::Malformed),
                }
            }
        }
    }

    /// Classify every record, attaching assessments in place.
    ///
    /// Records that are not `FAIL` are passed through unassessed.
    pub async fn classify_all(&self, records: Vec<TestRecord>) -> ClassifyReport {
        let assessed: Vec<(TestRecord, Option<Assessed>)> = stream::iter(records)
            .map(|record| async move {
                if record.status == TestStatus::Fail {
                    let assessed = self.assess(&record).await;
                    (record, Some(assessed))
                } else {
                    (record, None)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ClassifyReport::default();
        for (mut record, outcome) in assessed {
            if let Some(outcome) = outcome {
                match outcome.fault {
                    Some(OracleFault::Malformed) => report.malformed_responses += 1,
                    Some(OracleFault::Unavailable) => report.oracle_failures += 1,
                    None => {}
                }
                if outcome.assessment.retryable {
                    report.retryable += 1;
                }
                record.assessment = Some(outcome.assessment);
            }
            report.records.push(record);
        }
        report
    }
}

/// Repair and parse an oracle answer into an assessment.
pub fn parse_assessment(raw: &str) -> Result<ClassificationAssessment> {
    let repaired = repair_json_object(raw)
        .ok_or_else(|| Error::oracle_malformed("no JSON object found in oracle response"))?;
    let value: Value = serde_json::from_str(&repaired)
        .map_err(|e| Error::oracle_malformed(format!("unparsable after repair: {e}")))?;
    assessment_from_value(&value)
}

/// Extract the outermost `{...}` from `raw` and clean common syntax slips.
///
/// Returns `None` when no object delimiters are present.
#[must_use]
pub fn repair_json_object(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches(|c: char| c == '"' || c.is_whitespace());
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    let object = &trimmed[start..=end];

    let trailing_comma = TRAILING_COMMA_REGEX
        .get_or_init(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"));
    let dangling_quote = DANGLING_QUOTE_REGEX
        .get_or_init(|| Regex::new(r#",\s*"\s*\}"#).expect("dangling quote regex"));

    let cleaned = dangling_quote.replace_all(object, "}");
    let cleaned = trailing_comma.replace_all(&cleaned, "$1");
    Some(cleaned.into_owned())
}

fn assessment_from_value(value: &Value) -> Result<ClassificationAssessment> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::oracle_malformed("assessment is not an object"))?;

    let category = object
        .get("category")
        .and_then(Value::as_str)
        .map(FailureCategory::parse)
        .ok_or_else(|| Error::oracle_malformed("missing 'category'"))?;

    let retryable = match object.get("retryable") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        _ => return Err(Error::oracle_malformed("missing or non-boolean 'retryable'")),
    };

    let confidence = match object.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let signals = object
        .get("signals")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(ClassificationAssessment {
        category,
        retryable,
        confidence,
        signals,
        reason,
    })
}
