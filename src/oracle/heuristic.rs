// Offline failure oracle
//
// Classifies test failures as deterministic or transient from known
// signal patterns in the exception text and stack trace. Transient evidence
// always wins over the surface symptom, so an assertion that compared
// against a 503 is still retryable.

use super::{Oracle, OracleRequest};
use crate::classifier::{ClassificationAssessment, FailureCategory};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

static HTTP_STATUS_REGEX: OnceLock<Regex> = OnceLock::new();

/// Statuses accepted without an explicit `HTTP`/`status` keyword.
const WELL_KNOWN_STATUSES: &[u16] = &[
    400, 401, 403, 404, 405, 409, 410, 415, 422, 429, 500, 502, 503, 504,
];

/// Words that turn a three-digit number into a measurement.
const UNIT_WORDS: &[&str] = &[
    "ms", "s", "sec", "secs", "second", "seconds", "millis", "milliseconds", "min", "mins",
    "minute", "minutes", "items", "rows", "records", "bytes", "kb", "mb",
];

// A three-digit number counts as an HTTP status only in HTTP context: after
// `http`/`status`/`code` keywords, after `found`/`was`-style comparison words,
// or wrapped as `[503]` / `<503>`. Applied to lowercased text.
fn http_status_regex() -> &'static Regex {
    HTTP_STATUS_REGEX.get_or_init(|| {
        Regex::new(concat!(
            r"(?:\b(?P<strong>http(?:/\d(?:\.\d)?)?|status(?:[\s_-]?code)?",
            r"|(?:response|error)[\s_-]?code)",
            r"|\b(?P<weak>found|was|got|returned|received))",
            r"\s*[:=]?\s*[\[<(]?\s*(?P<code>\d{3})\b",
            r"|[\[<](?P<bracketed>\d{3})[\]>]",
        ))
        .expect("http status regex")
    })
}

/// HTTP 4xx/5xx statuses named in the evidence, in order of appearance.
fn http_statuses(lower: &str) -> Vec<u16> {
    http_status_regex()
        .captures_iter(lower)
        .filter_map(|captures| {
            if let Some(bracketed) = captures.name("bracketed") {
                let code = bracketed.as_str().parse().ok()?;
                return WELL_KNOWN_STATUSES.contains(&code).then_some(code);
            }
            let matched = captures.name("code")?;
            let code: u16 = matched.as_str().parse().ok()?;
            if followed_by_unit(&lower[matched.end()..]) {
                return None;
            }
            let in_context =
                captures.name("strong").is_some() || WELL_KNOWN_STATUSES.contains(&code);
            ((400..600).contains(&code) && in_context).then_some(code)
        })
        .collect()
}

fn followed_by_unit(rest: &str) -> bool {
    let rest = rest.trim_start();
    if rest.starts_with('%') {
        return true;
    }
    let word = rest
        .split(|c: char| !c.is_alphabetic())
        .next()
        .unwrap_or_default();
    UNIT_WORDS.contains(&word)
}

/// One matched piece of failure evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signal {
    category: FailureCategory,
    matched: String,
}

/// Oracle that applies the retry policy with fixed patterns, no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify failure evidence directly.
    #[must_use]
    pub fn classify_text(evidence: &str) -> ClassificationAssessment {
        let lower = evidence.to_lowercase();

        let transient = transient_signals(&lower);
        if let Some(first) = transient.first() {
            return ClassificationAssessment {
                category: first.category,
                retryable: true,
                confidence: if transient.len() > 1 { 0.9 } else { 0.8 },
                reason: format!(
                    "Transient condition '{}' is the root cause, so a re-run may pass.",
                    first.matched
                ),
                signals: transient.into_iter().map(|s| s.matched).collect(),
            };
        }

        let deterministic = deterministic_signals(&lower);
        if let Some(first) = deterministic.first() {
            return ClassificationAssessment {
                category: first.category,
                retryable: false,
                confidence: 0.8,
                reason: format!(
                    "Deterministic failure '{}' with no transient signal.",
                    first.matched
                ),
                signals: deterministic.into_iter().map(|s| s.matched).collect(),
            };
        }

        ClassificationAssessment {
            category: FailureCategory::Unknown,
            retryable: false,
            confidence: 0.3,
            signals: Vec::new(),
            reason: "No known failure pattern matched.".to_string(),
        }
    }
}

#[async_trait]
impl Oracle for HeuristicOracle {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn assess(&self, request: &OracleRequest) -> Result<String> {
        let assessment = Self::classify_text(&request.evidence());
        Ok(serde_json::to_string(&assessment)?)
    }
}

fn transient_signals(lower: &str) -> Vec<Signal> {
    let mut signals = Vec::new();
    let mut push = |category, matched: &str| {
        if !signals.iter().any(|s: &Signal| s.matched == matched) {
            signals.push(Signal {
                category,
                matched: matched.to_string(),
            });
        }
    };

    for code in http_statuses(lower) {
        if code >= 500 {
            push(FailureCategory::NetworkError, &code.to_string());
        }
    }

    for line in lower.lines() {
        let trimmed = line.trim();

        if trimmed.contains("service unavailable") {
            push(FailureCategory::NetworkError, "service unavailable");
        }
        if trimmed.contains("bad gateway") {
            push(FailureCategory::NetworkError, "bad gateway");
        }

        // Timeouts
        if trimmed.contains("timeoutexception") {
            push(FailureCategory::TimeoutOrSyncIssue, "timeoutexception");
        } else if trimmed.contains("timed out") || trimmed.contains("timeout") {
            push(FailureCategory::TimeoutOrSyncIssue, "timeout");
        }

        // Connection and socket errors
        if trimmed.contains("connectexception") || trimmed.contains("connection refused") {
            push(FailureCategory::NetworkError, "connection refused");
        }
        if trimmed.contains("connection reset") {
            push(FailureCategory::NetworkError, "connection reset");
        }
        if trimmed.contains("socketexception") {
            push(FailureCategory::NetworkError, "socketexception");
        }

        if trimmed.contains("deadlock") {
            push(FailureCategory::EnvironmentIssue, "deadlock");
        }
    }

    signals
}

fn deterministic_signals(lower: &str) -> Vec<Signal> {
    let mut signals = Vec::new();

    for code in http_statuses(lower) {
        if code < 500 {
            signals.push(Signal {
                category: FailureCategory::ApplicationLogicError,
                matched: code.to_string(),
            });
        }
    }
    if lower.contains("nullpointerexception") || lower.contains("null reference") {
        signals.push(Signal {
            category: FailureCategory::ApplicationLogicError,
            matched: "nullpointerexception".to_string(),
        });
    }
    if lower.contains("illegalargumentexception") {
        signals.push(Signal {
            category: FailureCategory::TestDataIssue,
            matched: "illegalargumentexception".to_string(),
        });
    }
    if lower.contains("assertionerror")
        || lower.contains("assertion failed")
        || (lower.contains("expected") && lower.contains("but found"))
    {
        signals.push(Signal {
            category: FailureCategory::AssertionFailure,
            matched: "assertion mismatch".to_string(),
        });
    }

    signals
}

// ============================================================================
// Tests
// ============================================================================
