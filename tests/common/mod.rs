//! Shared integration-test harness: a temp project directory, a failure-only
//! logger, and scripted stand-ins for the oracle and the test executor.

#![allow(dead_code)]

pub mod logging;

use async_trait::async_trait;
use flake_triage::error::{Error, Result};
use flake_triage::executor::TestExecutor;
use flake_triage::oracle::{Oracle, OracleRequest};
use logging::TestLogger;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

pub struct TestHarness {
    name: String,
    temp: TempDir,
    log: TestLogger,
}

impl TestHarness {
    pub fn new(name: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix(&format!("flake-triage-{name}-"))
            .tempdir()
            .unwrap();
        let log = TestLogger::new();
        log.info_ctx("setup", "created harness", |ctx| {
            ctx.push(("test".into(), name.to_string()));
            ctx.push(("root".into(), temp.path().display().to_string()));
        });
        Self {
            name: name.to_string(),
            temp,
            log,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp.path()
    }

    pub fn temp_path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    pub fn create_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.temp_path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        self.log
            .info("setup", format!("wrote {} ({} bytes)", path.display(), content.len()));
        path
    }

    pub fn write_report(&self, relative: &str, report: &Value) -> PathBuf {
        self.create_file(relative, &serde_json::to_string_pretty(report).unwrap())
    }

    pub fn read_json(&self, path: &Path) -> Value {
        let text = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    pub fn log(&self) -> &TestLogger {
        &self.log
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if std::thread::panicking() {
            eprintln!("--- log for {} ---\n{}", self.name, self.log.dump());
        }
    }
}

pub fn run_async<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Oracle that answers from a fixed table keyed by selector.
#[derive(Default)]
pub struct TableOracle {
    answers: HashMap<String, std::result::Result<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl TableOracle {
    pub fn answer(mut self, selector: &str, raw: &str) -> Self {
        self.answers.insert(selector.to_string(), Ok(raw.to_string()));
        self
    }

    pub fn fail(mut self, selector: &str, message: &str) -> Self {
        self.answers
            .insert(selector.to_string(), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for TableOracle {
    fn name(&self) -> &str {
        "table"
    }

    async fn assess(&self, request: &OracleRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.test_selector.clone());
        match self.answers.get(&request.test_selector) {
            Some(Ok(raw)) => Ok(raw.clone()),
            Some(Err(message)) => Err(Error::oracle_unavailable("table", message.clone())),
            None => Err(Error::oracle_unavailable("table", "no scripted answer")),
        }
    }
}

/// Executor that replays a per-selector script of outcomes and records every call.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Result<bool>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn script(self, selector: &str, outcomes: Vec<Result<bool>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(selector.to_string(), outcomes.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, selector: &str) -> usize {
        self.calls().iter().filter(|s| *s == selector).count()
    }
}

#[async_trait]
impl TestExecutor for ScriptedExecutor {
    async fn execute(&self, selector: &str) -> Result<bool> {
        self.calls.lock().unwrap().push(selector.to_string());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(selector)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(false))
    }
}
