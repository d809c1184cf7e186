//! Pipeline context and stage driver.
//!
//! [`PipelineContext`] owns the output of each stage in a named slot. Stages
//! can be invoked one at a time in any order; a stage whose input slot has not
//! been filled fails with [`Error::PrerequisiteMissing`] instead of running on
//! an empty sequence.

use crate::classifier::Classifier;
use crate::error::{Error, Result};
use crate::executor::TestExecutor;
use crate::merge::merge;
use crate::report::{RawReport, TestRecord, TestStatus, normalize};
use crate::retry::{RetryAttempt, RetryPolicy, retry_failures};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// The named pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Classify,
    Retry,
    Merge,
}

impl Stage {
    pub const ALL: [Self; 4] = [Self::Normalize, Self::Classify, Self::Retry, Self::Merge];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Classify => "classify",
            Self::Retry => "retry",
            Self::Merge => "merge",
        }
    }

    /// The stage whose output this stage consumes.
    #[must_use]
    pub const fn prerequisite(self) -> Option<Self> {
        match self {
            Self::Normalize => None,
            Self::Classify => Some(Self::Normalize),
            Self::Retry => Some(Self::Classify),
            Self::Merge => Some(Self::Retry),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
struct NormalizedSlot {
    raw: RawReport,
    records: Vec<TestRecord>,
    duplicate_selectors: usize,
}

#[derive(Debug, Clone)]
struct ClassifiedSlot {
    records: Vec<TestRecord>,
    retryable: usize,
    malformed_responses: usize,
    oracle_failures: usize,
}

#[derive(Debug, Clone)]
struct FinalSlot {
    records: Vec<TestRecord>,
    attempts: Vec<RetryAttempt>,
    retried: usize,
    promoted: usize,
    executor_errors: usize,
}

#[derive(Debug, Clone)]
struct MergedSlot {
    path: PathBuf,
    updated_entries: usize,
    unmatched_keys: usize,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_records: usize,
    pub failed_records: usize,
    pub duplicate_selectors: usize,
    pub retryable: usize,
    pub retried: usize,
    pub promoted: usize,
    pub attempts: usize,
    pub malformed_oracle_responses: usize,
    pub oracle_failures: usize,
    pub executor_errors: usize,
    pub updated_entries: usize,
    pub unmatched_merge_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl RunSummary {
    /// Multi-line human-readable rendering.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Found {} failed tests out of {} total.",
            self.failed_records, self.total_records
        );
        let _ = writeln!(
            out,
            "{} of {} retryable tests passed on retry ({} attempts).",
            self.promoted, self.retryable, self.attempts
        );
        if let Some(path) = &self.output_path {
            let _ = writeln!(
                out,
                "Wrote {} status updates to {}.",
                self.updated_entries,
                path.display()
            );
        }
        let recovered = [
            (self.malformed_oracle_responses, "malformed oracle responses"),
            (self.oracle_failures, "failed oracle calls"),
            (self.executor_errors, "failed executor invocations"),
            (self.unmatched_merge_keys, "promoted tests missing from the report"),
            (self.duplicate_selectors, "duplicate test selectors"),
        ];
        for (count, label) in recovered {
            if count > 0 {
                let _ = writeln!(out, "Warning: {count} {label}.");
            }
        }
        out
    }
}

/// Single-owner state carried between pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    project_root: PathBuf,
    normalized: Option<NormalizedSlot>,
    classified: Option<ClassifiedSlot>,
    final_records: Option<FinalSlot>,
    merged: Option<MergedSlot>,
}

impl PipelineContext {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            normalized: None,
            classified: None,
            final_records: None,
            merged: None,
        }
    }

    /// Whether the slot written by `stage` is populated.
    #[must_use]
    pub const fn has_run(&self, stage: Stage) -> bool {
        match stage {
            Stage::Normalize => self.normalized.is_some(),
            Stage::Classify => self.classified.is_some(),
            Stage::Retry => self.final_records.is_some(),
            Stage::Merge => self.merged.is_some(),
        }
    }

    fn warn_if_downstream_stale(&self, stage: Stage) {
        if !self.has_run(stage) {
            return;
        }
        let downstream = Stage::ALL
            .into_iter()
            .filter(|s| *s as u8 > stage as u8 && self.has_run(*s))
            .map(Stage::name)
            .collect::<Vec<_>>();
        if !downstream.is_empty() {
            tracing::warn!(
                stage = stage.name(),
                stale = ?downstream,
                "re-running stage; downstream results are from the previous invocation"
            );
        }
    }

    /// Stage 1: read and normalize the report at `path`.
    pub fn load_report(&mut self, path: &Path) -> Result<&[TestRecord]> {
        self.warn_if_downstream_stale(Stage::Normalize);
        let raw = RawReport::read(path)?;
        let normalized = normalize(&raw, &self.project_root)?;
        let failed = normalized
            .records
            .iter()
            .filter(|r| r.status == TestStatus::Fail)
            .count();
        tracing::info!(
            path = %path.display(),
            total = normalized.records.len(),
            failed,
            "loaded test report"
        );

        let slot = self.normalized.insert(NormalizedSlot {
            raw,
            records: normalized.records,
            duplicate_selectors: normalized.duplicate_selectors.len(),
        });
        Ok(slot.records.as_slice())
    }

    /// Stage 2: classify every `FAIL` record from the normalize stage.
    pub async fn classify_failures(&mut self, classifier: &Classifier) -> Result<&[TestRecord]> {
        let failed: Vec<TestRecord> = self
            .normalized
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Classify))?
            .records
            .iter()
            .filter(|r| r.status == TestStatus::Fail)
            .cloned()
            .collect();
        self.warn_if_downstream_stale(Stage::Classify);

        let report = classifier.classify_all(failed).await;
        tracing::info!(
            classified = report.records.len(),
            retryable = report.retryable,
            malformed = report.malformed_responses,
            oracle_failures = report.oracle_failures,
            "classified failures"
        );

        let slot = self.classified.insert(ClassifiedSlot {
            records: report.records,
            retryable: report.retryable,
            malformed_responses: report.malformed_responses,
            oracle_failures: report.oracle_failures,
        });
        Ok(slot.records.as_slice())
    }

    /// Records from the classify stage.
    pub fn classified(&self) -> Result<&[TestRecord]> {
        self.classified
            .as_ref()
            .map(|slot| slot.records.as_slice())
            .ok_or_else(|| missing_input(Stage::Retry))
    }

    /// Stage 3: re-run retryable failures.
    pub async fn retry_failures(
        &mut self,
        policy: &RetryPolicy,
        executor: &dyn TestExecutor,
    ) -> Result<&[TestRecord]> {
        let classified = self
            .classified
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Retry))?
            .records
            .clone();
        self.warn_if_downstream_stale(Stage::Retry);

        let report = retry_failures(classified, policy, executor).await;
        let slot = self.final_records.insert(FinalSlot {
            records: report.records,
            attempts: report.attempts,
            retried: report.retried,
            promoted: report.promoted,
            executor_errors: report.executor_errors,
        });
        Ok(slot.records.as_slice())
    }

    /// Stage 4: write the report loaded by [`Self::load_report`] to `output`
    /// with promotions applied.
    ///
    /// Works from the in-memory copy; the input file is neither re-read nor
    /// modified.
    pub fn write_merged(&mut self, output: &Path) -> Result<&Path> {
        let final_slot = self
            .final_records
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Merge))?;
        // Retry output implies a loaded report.
        let normalized = self
            .normalized
            .as_ref()
            .ok_or_else(|| missing_input(Stage::Merge))?;

        let outcome = merge(&normalized.raw, &final_slot.records);
        outcome.report.write(output)?;
        tracing::info!(
            path = %output.display(),
            updated = outcome.updated_entries,
            unmatched = outcome.unmatched_keys.len(),
            "wrote merged report"
        );

        let slot = self.merged.insert(MergedSlot {
            path: output.to_path_buf(),
            updated_entries: outcome.updated_entries,
            unmatched_keys: outcome.unmatched_keys.len(),
        });
        Ok(slot.path.as_path())
    }

    /// Path written by the merge stage.
    pub fn merged_path(&self) -> Result<&Path> {
        self.merged
            .as_ref()
            .map(|slot| slot.path.as_path())
            .ok_or_else(|| Error::PrerequisiteMissing {
                stage: Stage::Merge.name(),
                requested: "summary",
            })
    }

    /// Counts from every stage that has run so far.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        if let Some(slot) = &self.normalized {
            summary.total_records = slot.records.len();
            summary.failed_records = slot
                .records
                .iter()
                .filter(|r| r.status == TestStatus::Fail)
                .count();
            summary.duplicate_selectors = slot.duplicate_selectors;
        }
        if let Some(slot) = &self.classified {
            summary.retryable = slot.retryable;
            summary.malformed_oracle_responses = slot.malformed_responses;
            summary.oracle_failures = slot.oracle_failures;
        }
        if let Some(slot) = &self.final_records {
            summary.retried = slot.retried;
            summary.promoted = slot.promoted;
            summary.attempts = slot.attempts.len();
            summary.executor_errors = slot.executor_errors;
        }
        if let Some(slot) = &self.merged {
            summary.updated_entries = slot.updated_entries;
            summary.unmatched_merge_keys = slot.unmatched_keys;
            summary.output_path = Some(slot.path.clone());
        }
        summary
    }
}

/// Error for `requested` running before the stage it consumes.
fn missing_input(requested: Stage) -> Error {
    Error::PrerequisiteMissing {
        stage: requested.prerequisite().unwrap_or(requested).name(),
        requested: requested.name(),
    }
}

/// Run all four stages in order and return the run summary.
pub async fn run_pipeline(
    context: &mut PipelineContext,
    input: &Path,
    output: &Path,
    classifier: &Classifier,
    policy: &RetryPolicy,
    executor: &dyn TestExecutor,
) -> Result<RunSummary> {
    context.load_report(input)?;
    context.classify_failures(classifier).await?;
    context.retry_failures(policy, executor).await?;
    context.write_merged(output)?;
    Ok(context.summary())
}
