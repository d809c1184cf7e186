//! Merging retry outcomes back into the original report.
//!
//! Only records promoted to `PASSED_ON_RETRY` are carried over, matched by
//! `(test_class, test_method)`. Every other entry, and every other field of a
//! matched entry, is copied unchanged.

use crate::report::{CompositeKey, RawReport, TestRecord, TestStatus};
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub report: RawReport,
    /// Original entries whose existing status was overwritten.
    pub updated_entries: usize,
    /// Promoted keys that matched no entry of the original report.
    pub unmatched_keys: Vec<CompositeKey>,
}

/// Overlay the promotions in `final_records` onto `original`.
#[must_use]
pub fn merge(original: &RawReport, final_records: &[TestRecord]) -> MergeOutcome {
    let mut promoted: BTreeMap<CompositeKey, bool> = final_records
        .iter()
        .filter(|record| record.status == TestStatus::PassedOnRetry)
        .map(|record| (record.key(), false))
        .collect();

    if promoted.is_empty() {
        tracing::info!("no tests passed on retry; output is a copy of the input");
        return MergeOutcome {
            report: original.clone(),
            ..MergeOutcome::default()
        };
    }

    let mut updated_entries = 0;
    let entries = original
        .entries()
        .iter()
        .map(|entry| {
            let Value::Object(map) = entry else {
                return entry.clone();
            };
            match promoted.get_mut(&CompositeKey::from_entry(map)) {
                Some(matched) => {
                    *matched = true;
                    let mut map = map.clone();
                    // Entries without a status field are left as they are.
                    if let Some(status) = map.get_mut("status") {
                        *status = Value::String(TestStatus::PassedOnRetry.to_string());
                        updated_entries += 1;
                    }
                    Value::Object(map)
                }
                None => entry.clone(),
            }
        })
        .collect();

    let unmatched_keys: Vec<CompositeKey> = promoted
        .into_iter()
        .filter_map(|(key, matched)| (!matched).then_some(key))
        .collect();
    for key in &unmatched_keys {
        tracing::warn!(key = %key, "promoted test has no matching entry in the original report");
    }

    tracing::info!(
        updated = updated_entries,
        unmatched = unmatched_keys.len(),
        "merged retry outcomes"
    );
    MergeOutcome {
        report: RawReport::from_entries(entries),
        updated_entries,
        unmatched_keys,
    }
}
