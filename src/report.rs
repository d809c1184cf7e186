//! Test report ingestion and normalization.
//!
//! A report is a JSON array of loosely-typed, flat test records as emitted by
//! a TestNG-style listener. [`RawReport`] keeps the array untouched so the
//! merger can write it back verbatim, and [`normalize`] turns it into typed
//! [`TestRecord`]s with derived identifiers and resolved file paths.

use crate::classifier::ClassificationAssessment;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

const STATUS_PASSED_ON_RETRY: &str = "PASSED_ON_RETRY";

/// Normalized outcome of one test execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Unknown,
    PassedOnRetry,
    /// Any other uppercased status the listener reported.
    Other(String),
}

impl TestStatus {
    /// Normalize a raw status string.
    ///
    /// Anything starting with `PASS`, `FAIL` or `SKIP` collapses to that
    /// status; other values pass through uppercased.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() {
            Self::Unknown
        } else if upper.starts_with("PASS") {
            Self::Pass
        } else if upper.starts_with("FAIL") {
            Self::Fail
        } else if upper.starts_with("SKIP") {
            Self::Skip
        } else if upper == "UNKNOWN" {
            Self::Unknown
        } else {
            Self::Other(upper)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
            Self::Unknown => "UNKNOWN",
            Self::PassedOnRetry => STATUS_PASSED_ON_RETRY,
            Self::Other(value) => value,
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TestStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            "SKIP" => Self::Skip,
            "UNKNOWN" => Self::Unknown,
            STATUS_PASSED_ON_RETRY => Self::PassedOnRetry,
            _ => Self::Other(value),
        }
    }
}

impl From<TestStatus> for String {
    fn from(value: TestStatus) -> Self {
        match value {
            TestStatus::Other(value) => value,
            other => other.as_str().to_string(),
        }
    }
}

/// The `(test_class, test_method)` pair used to match records across the
/// normalized sequence and the untouched original report.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub test_class: String,
    pub test_method: String,
}

impl CompositeKey {
    /// Build the key from a raw report entry, using only the two identifying fields.
    #[must_use]
    pub fn from_entry(entry: &Map<String, Value>) -> Self {
        Self {
            test_class: identity_field(entry, "test_class"),
            test_method: identity_field(entry, "test_method"),
        }
    }

    /// Stable `class#method` selector handed to the executor.
    #[must_use]
    pub fn selector(&self) -> String {
        format!("{}#{}", self.test_class, self.test_method)
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.test_class, self.test_method)
    }
}

/// One observed execution of a test, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_class: String,
    pub test_method: String,
    pub status: TestStatus,
    pub owner: Option<String>,
    pub service: Option<String>,
    pub priority: Option<Value>,
    pub description: Option<String>,
    pub exception: Option<String>,
    pub stacktrace: Option<String>,
    pub file_path: String,
    pub start_time: Option<Value>,
    pub end_time: Option<Value>,
    pub duration_ms: Option<f64>,
    pub method_path: String,
    pub abs_file_path: Option<PathBuf>,
    pub test_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<ClassificationAssessment>,
}

impl TestRecord {
    #[must_use]
    pub fn key(&self) -> CompositeKey {
        CompositeKey {
            test_class: self.test_class.clone(),
            test_method: self.test_method.clone(),
        }
    }

    /// Whether the attached assessment marks this record for retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.assessment.as_ref().is_some_and(|a| a.retryable)
    }
}

/// The original report, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReport {
    entries: Vec<Value>,
}

impl RawReport {
    /// Wrap an already-parsed JSON document; it must be an array.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(entries) => Ok(Self { entries }),
            other => Err(Error::malformed_report(format!(
                "expected a JSON array of test objects, found {}",
                json_type_name(&other)
            ))),
        }
    }

    #[must_use]
    pub const fn from_entries(entries: Vec<Value>) -> Self {
        Self { entries }
    }

    /// Read and parse a report file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::ReportNotFound {
                    path: path.display().to_string(),
                }
            } else {
                Error::from(err)
            }
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            Error::malformed_report(format!("could not parse {}: {e}", path.display()))
        })?;
        Self::from_value(value)
    }

    /// Write the report as pretty JSON, atomically replacing `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            std::fs::create_dir_all(parent)?;
            parent
        };

        let mut contents = serde_json::to_string_pretty(&self.entries)?;
        contents.push('\n');

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| {
            Error::from(std::io::Error::new(
                err.error.kind(),
                format!("failed to persist report to {}: {}", path.display(), err.error),
            ))
        })?;
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of one normalization pass.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub records: Vec<TestRecord>,
    /// Selectors seen more than once in the same report.
    pub duplicate_selectors: Vec<String>,
}

/// Normalize every entry of `report` against `project_root`.
pub fn normalize(report: &RawReport, project_root: &Path) -> Result<Normalized> {
    let mut records = Vec::with_capacity(report.len());
    let mut seen = HashSet::with_capacity(report.len());
    let mut duplicate_selectors = Vec::new();

    for (index, entry) in report.entries().iter().enumerate() {
        let Value::Object(map) = entry else {
            return Err(Error::malformed_report(format!(
                "entry {index} is {}, expected an object",
                json_type_name(entry)
            )));
        };
        let record = normalize_entry(map, project_root);
        if !seen.insert(record.test_selector.clone()) {
            tracing::warn!(
                selector = %record.test_selector,
                "duplicate test selector in report; matching by key will treat them as one test"
            );
            duplicate_selectors.push(record.test_selector.clone());
        }
        records.push(record);
    }

    Ok(Normalized {
        records,
        duplicate_selectors,
    })
}

fn normalize_entry(entry: &Map<String, Value>, project_root: &Path) -> TestRecord {
    let key = CompositeKey::from_entry(entry);
    let status = match entry.get("status") {
        None | Some(Value::Null) => TestStatus::Unknown,
        Some(Value::String(s)) => TestStatus::normalize(s),
        Some(other) => TestStatus::normalize(&other.to_string()),
    };
    let file_path = coerce_file_path(entry.get("file_path"));
    let abs_file_path = if file_path.is_empty() {
        None
    } else {
        Some(normalize_lexically(&project_root.join(&file_path)))
    };

    TestRecord {
        method_path: format!("{}/{}", key.test_class.replace('.', "/"), key.test_method),
        test_selector: key.selector(),
        test_class: key.test_class,
        test_method: key.test_method,
        status,
        owner: optional_text(entry, "owner"),
        service: optional_text(entry, "service"),
        priority: optional_value(entry, "priority"),
        description: optional_text(entry, "desc"),
        exception: optional_text(entry, "exception"),
        stacktrace: optional_text(entry, "stacktrace"),
        file_path,
        start_time: optional_value(entry, "start_time"),
        end_time: optional_value(entry, "end_time"),
        duration_ms: entry.get("duration_ms").and_then(Value::as_f64),
        abs_file_path,
        assessment: None,
    }
}

/// Read an identifying field; missing and null both map to the empty string.
fn identity_field(entry: &Map<String, Value>, key: &str) -> String {
    match entry.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn optional_text(entry: &Map<String, Value>, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn optional_value(entry: &Map<String, Value>, key: &str) -> Option<Value> {
    entry.get(key).filter(|v| !v.is_null()).cloned()
}

/// Coerce the listener's `file_path` into a slash-separated relative path.
#[must_use]
pub fn coerce_file_path(value: Option<&Value>) -> String {
    let joined = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| !part.is_null())
            .map(|part| {
                let text = match part {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text.trim_matches(|c| c == '/' || c == '\\').to_string()
            })
            .collect::<Vec<_>>()
            .join("/"),
        Some(other) => other.to_string(),
    };
    joined.trim().to_string()
}

/// Fold `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                let ends_in_parent =
                    matches!(out.components().next_back(), Some(Component::ParentDir));
                if ends_in_parent || (at_root && !out.has_root()) {
                    out.push("..");
                } else if !at_root {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn report(value: Value) -> RawReport {
        RawReport::from_value(value).expect("array report")
    }

    #[test]
    fn status_prefixes_collapse() {
        assert_eq!(TestStatus::normalize("passed"), TestStatus::Pass);
        assert_eq!(TestStatus::normalize(" FAILURE "), TestStatus::Fail);
        assert_eq!(TestStatus::normalize("skipped"), TestStatus::Skip);
        assert_eq!(TestStatus::normalize(""), TestStatus::Unknown);
        assert_eq!(TestStatus::normalize("   "), TestStatus::Unknown);
        assert_eq!(
            TestStatus::normalize("blocked"),
            TestStatus::Other("BLOCKED".into())
        );
    }

    #[test]
    fn status_serializes_as_plain_string() {
        let json = serde_json::to_string(&TestStatus::PassedOnRetry).unwrap();
        assert_eq!(json, "\"PASSED_ON_RETRY\"");
        let back: TestStatus = serde_json::from_str("\"BLOCKED\"").unwrap();
        assert_eq!(back, TestStatus::Other("BLOCKED".into()));
    }

    #[test]
    fn missing_status_is_unknown() {
        let raw = report(json!([
            {"test_class": "a.B", "test_method": "m"},
            {"test_class": "a.B", "test_method": "n", "status": null}
        ]));
        let normalized = normalize(&raw, Path::new("/proj")).unwrap();
        assert!(
            normalized
                .records
                .iter()
                .all(|r| r.status == TestStatus::Unknown)
        );
    }

    #[test]
    fn derives_selector_and_method_path() {
        let raw = report(json!([{
            "test_class": "com.example.tests.LoginTest",
            "test_method": "testValidLogin",
            "status": "pass"
        }]));
        let record = &normalize(&raw, Path::new("/proj")).unwrap().records[0];
        assert_eq!(
            record.test_selector,
            "com.example.tests.LoginTest#testValidLogin"
        );
        assert_eq!(
            record.method_path,
            "com/example/tests/LoginTest/testValidLogin"
        );
        assert_eq!(record.status, TestStatus::Pass);
    }

    #[test]
    fn file_path_list_is_joined_and_stripped() {
        let value = json!(["src/", "test", "/java", "com/example/tests/LoginTest.java"]);
        assert_eq!(
            coerce_file_path(Some(&value)),
            "src/test/java/com/example/tests/LoginTest.java"
        );
    }

    #[test]
    fn file_path_null_and_scalars() {
        assert_eq!(coerce_file_path(None), "");
        assert_eq!(coerce_file_path(Some(&Value::Null)), "");
        assert_eq!(coerce_file_path(Some(&json!(42))), "42");
        assert_eq!(coerce_file_path(Some(&json!("  a/b.java  "))), "a/b.java");
        assert_eq!(coerce_file_path(Some(&json!(["a", null, "b"]))), "a/b");
    }

    #[test]
    fn abs_file_path_is_joined_and_normalized() {
        let raw = report(json!([
            {"test_class": "A", "test_method": "x", "file_path": "src/./test/../main/A.java"},
            {"test_class": "A", "test_method": "y", "file_path": null}
        ]));
        let records = normalize(&raw, Path::new("/proj")).unwrap().records;
        assert_eq!(
            records[0].abs_file_path.as_deref(),
            Some(Path::new("/proj/src/main/A.java"))
        );
        assert_eq!(records[1].abs_file_path, None);
    }

    #[test]
    fn lexical_normalization_edges() {
        assert_eq!(normalize_lexically(Path::new("/a/../..")), PathBuf::from("/"));
        assert_eq!(normalize_lexically(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(normalize_lexically(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn description_comes_from_desc_key() {
        let raw = report(json!([{
            "test_class": "A", "test_method": "x", "status": "FAIL",
            "desc": "checks login", "priority": 1, "duration_ms": 1520
        }]));
        let record = &normalize(&raw, Path::new("/")).unwrap().records[0];
        assert_eq!(record.description.as_deref(), Some("checks login"));
        assert_eq!(record.priority, Some(json!(1)));
        assert_eq!(record.duration_ms, Some(1520.0));
    }

    #[test]
    fn non_array_report_is_malformed() {
        let err = RawReport::from_value(json!({"tests": []})).unwrap_err();
        assert!(matches!(err, Error::MalformedReport(_)), "{err}");
    }

    #[test]
    fn non_object_entry_is_malformed() {
        let raw = report(json!([{"test_class": "A"}, "oops"]));
        let err = normalize(&raw, Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("entry 1"), "{err}");
    }

    #[test]
    fn duplicate_selectors_are_reported() {
        let raw = report(json!([
            {"test_class": "A", "test_method": "x", "status": "FAIL"},
            {"test_class": "A", "test_method": "x", "status": "PASS"}
        ]));
        let normalized = normalize(&raw, Path::new("/")).unwrap();
        assert_eq!(normalized.records.len(), 2);
        assert_eq!(normalized.duplicate_selectors, vec!["A#x".to_string()]);
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = RawReport::read(&temp.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::ReportNotFound { .. }), "{err}");
    }

    #[test]
    fn read_invalid_json_is_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(&path, "[{").unwrap();
        let err = RawReport::read(&path).unwrap_err();
        assert!(matches!(err, Error::MalformedReport(_)), "{err}");
    }

    #[test]
    fn write_creates_parent_and_preserves_key_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out/nested/report.json");
        let raw = RawReport::read_from_str_for_test(
            r#"[{"zeta": 1, "test_class": "A", "alpha": 2}]"#,
        );
        raw.write(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let zeta = written.find("zeta").unwrap();
        let alpha = written.find("alpha").unwrap();
        assert!(zeta < alpha, "key order must survive: {written}");
        assert!(written.ends_with('\n'));
    }

    impl RawReport {
        fn read_from_str_for_test(content: &str) -> Self {
            Self::from_value(serde_json::from_str(content).unwrap()).unwrap()
        }
    }
}
