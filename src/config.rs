//! Configuration loading and resolution.
//!
//! The config file is JSON. Keys are snake_case, with the upper-case names
//! used by older deployments accepted as aliases. Resolution layers values as
//! CLI flag > config file > environment > default.

use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, CommandTemplate};
use crate::oracle::DEFAULT_STACKTRACE_BUDGET;
use crate::oracle::openai::{DEFAULT_MODEL, DEFAULT_OPENAI_BASE_URL};
use crate::retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "PROJECT_ROOT")]
    pub project_root: Option<ProjectRoot>,
    /// Retry command argv; `{test_selector}` is substituted per test.
    #[serde(alias = "AUTOMATION_SUITE_CMD")]
    pub automation_suite_cmd: Option<Vec<String>>,
    #[serde(alias = "LLM_MODEL")]
    pub llm_model: Option<String>,
    #[serde(alias = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,
    #[serde(alias = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,
    #[serde(alias = "MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,
    #[serde(alias = "RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,
    /// Characters of stack trace sent to the oracle.
    #[serde(alias = "STACKTRACE_BUDGET")]
    pub stacktrace_budget: Option<usize>,
    #[serde(alias = "CONCURRENCY")]
    pub concurrency: Option<usize>,
}

/// Project root as written in the config: a path, or a list whose first
/// element is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProjectRoot {
    Single(String),
    Many(Vec<String>),
}

impl ProjectRoot {
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(path) => Some(path.as_str()),
            Self::Many(paths) => paths.first().map(String::as_str),
        }
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub project_root: Option<PathBuf>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
}

/// Fully resolved run settings.
#[derive(Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    pub command: CommandTemplate,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub stacktrace_budget: usize,
    pub concurrency: usize,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("project_root", &self.project_root)
            .field("command", &self.command)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("stacktrace_budget", &self.stacktrace_budget)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Settings {
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy::new(self.max_attempts)?
            .with_retry_delay(self.retry_delay)
            .with_concurrency(self.concurrency))
    }

    #[must_use]
    pub fn command_executor(&self) -> CommandExecutor {
        CommandExecutor::new(self.command.clone(), &self.project_root)
    }

    /// The API key, or a config error naming where it can be supplied.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "no OpenAI API key; pass --api-key, set \"openai_api_key\" in the config \
                     file, or export {API_KEY_ENV}"
                ))
            })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

impl Config {
    /// Read the config at `path`. A missing or empty file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Like [`Self::load_from_path`], but falls back to defaults with a
    /// warning instead of failing.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_path(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "ignoring unreadable config file"
                );
                Self::default()
            }
        }
    }

    /// Resolve against the process environment and working directory.
    pub fn resolve(self, overrides: ConfigOverrides) -> Settings {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.resolve_with(overrides, &cwd, env_lookup)
    }

    pub fn resolve_with<F>(self, overrides: ConfigOverrides, cwd: &Path, env: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_root = resolve_project_root(
            overrides
                .project_root
                .or_else(|| {
                    self.project_root
                        .as_ref()
                        .and_then(ProjectRoot::first)
                        .map(PathBuf::from)
                }),
            cwd,
        );

        let command = match self.automation_suite_cmd {
            Some(argv) => CommandTemplate::new(argv).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "using the default retry command");
                CommandTemplate::default()
            }),
            None => CommandTemplate::default(),
        };
        if !command.has_placeholder() {
            tracing::warn!(
                command = %command.argv().join(" "),
                "retry command has no {{test_selector}} placeholder; \
                 every retry runs the same command"
            );
        }

        let max_attempts = overrides
            .max_attempts
            .or(self.max_attempts)
            .filter(|&attempts| {
                if attempts == 0 {
                    tracing::warn!("max_attempts must be at least 1; using the default");
                }
                attempts > 0
            })
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        Settings {
            project_root,
            command,
            model: overrides
                .model
                .or(self.llm_model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: overrides
                .api_key
                .or(self.openai_api_key)
                .or_else(|| env(API_KEY_ENV)),
            base_url: overrides
                .base_url
                .or(self.openai_base_url)
                .or_else(|| env(BASE_URL_ENV))
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms.unwrap_or(0)),
            stacktrace_budget: self.stacktrace_budget.unwrap_or(DEFAULT_STACKTRACE_BUDGET),
            concurrency: overrides.concurrency.or(self.concurrency).unwrap_or(1).max(1),
        }
    }
}

fn resolve_project_root(candidate: Option<PathBuf>, cwd: &Path) -> PathBuf {
    let Some(candidate) = candidate else {
        return cwd.to_path_buf();
    };
    let absolute = if candidate.is_absolute() {
        candidate
    } else {
        cwd.join(candidate)
    };
    if absolute.is_dir() {
        absolute
    } else {
        tracing::warn!(
            project_root = %absolute.display(),
            "project root is not a directory; using the current directory"
        );
        cwd.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_and_empty_files_yield_defaults() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            Config::load_from_path(&temp.path().join("absent.json")).unwrap(),
            Config::default()
        );
        let empty = write(temp.path(), "  \n");
        assert_eq!(Config::load_from_path(&empty).unwrap(), Config::default());
    }

    #[test]
    fn unparsable_file_is_error_but_lenient_load_defaults() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "{not json");
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
        assert_eq!(Config::load_or_default(&path), Config::default());
    }

    #[test]
    fn legacy_upper_case_keys_are_accepted() {
        let temp = TempDir::new().unwrap();
        let path = write(
            temp.path(),
            r#"{
                "PROJECT_ROOT": ["/a", "/b"],
                "AUTOMATION_SUITE_CMD": ["gradle", "test", "--tests", "{test_selector}"],
                "LLM_MODEL": "gpt-4o",
                "MAX_ATTEMPTS": 5
            }"#,
        );
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.project_root.as_ref().and_then(ProjectRoot::first), Some("/a"));
        assert_eq!(config.llm_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.max_attempts, Some(5));
        assert_eq!(config.automation_suite_cmd.unwrap()[0], "gradle");
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let temp = TempDir::new().unwrap();
        let settings =
            Config::default().resolve_with(ConfigOverrides::default(), temp.path(), no_env);
        assert_eq!(settings.project_root, temp.path());
        assert_eq!(settings.command, CommandTemplate::default());
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.retry_delay, Duration::ZERO);
        assert_eq!(settings.stacktrace_budget, DEFAULT_STACKTRACE_BUDGET);
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn cli_beats_file_beats_env() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            llm_model: Some("file-model".into()),
            openai_api_key: Some("file-key".into()),
            max_attempts: Some(4),
            ..Config::default()
        };
        let env = |key: &str| match key {
            API_KEY_ENV => Some("env-key".to_string()),
            BASE_URL_ENV => Some("http://env".to_string()),
            _ => None,
        };

        let from_file = config.clone().resolve_with(ConfigOverrides::default(), temp.path(), env);
        assert_eq!(from_file.model, "file-model");
        assert_eq!(from_file.api_key.as_deref(), Some("file-key"));
        assert_eq!(from_file.base_url, "http://env");
        assert_eq!(from_file.max_attempts, 4);

        let overrides = ConfigOverrides {
            model: Some("cli-model".into()),
            api_key: Some("cli-key".into()),
            max_attempts: Some(2),
            ..ConfigOverrides::default()
        };
        let from_cli = config.resolve_with(overrides, temp.path(), env);
        assert_eq!(from_cli.model, "cli-model");
        assert_eq!(from_cli.api_key.as_deref(), Some("cli-key"));
        assert_eq!(from_cli.max_attempts, 2);

        let env_only = Config::default().resolve_with(ConfigOverrides::default(), temp.path(), env);
        assert_eq!(env_only.api_key.as_deref(), Some("env-key"));
    }

    #[test]
    fn invalid_project_root_falls_back_to_cwd() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            project_root: Some(ProjectRoot::Single("does/not/exist".into())),
            ..Config::default()
        };
        let settings = config.resolve_with(ConfigOverrides::default(), temp.path(), no_env);
        assert_eq!(settings.project_root, temp.path());
    }

    #[test]
    fn relative_project_root_is_joined_to_cwd() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("svc")).unwrap();
        let config = Config {
            project_root: Some(ProjectRoot::Many(vec!["svc".into()])),
            ..Config::default()
        };
        let settings = config.resolve_with(ConfigOverrides::default(), temp.path(), no_env);
        assert_eq!(settings.project_root, temp.path().join("svc"));
    }

    #[test]
    fn bad_numeric_values_are_sanitized() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            max_attempts: Some(0),
            concurrency: Some(0),
            automation_suite_cmd: Some(Vec::new()),
            ..Config::default()
        };
        let settings = config.resolve_with(ConfigOverrides::default(), temp.path(), no_env);
        assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.command, CommandTemplate::default());
        assert!(settings.retry_policy().is_ok());
    }

    #[test]
    fn missing_key_is_config_error() {
        let temp = TempDir::new().unwrap();
        let settings =
            Config::default().resolve_with(ConfigOverrides::default(), temp.path(), no_env);
        let err = settings.require_api_key().unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV), "{err}");

        let blank = Settings {
            api_key: Some("  ".into()),
            ..settings
        };
        assert!(blank.require_api_key().is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let temp = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            api_key: Some("sk-secret".into()),
            ..ConfigOverrides::default()
        };
        let settings = Config::default().resolve_with(overrides, temp.path(), no_env);
        assert!(!format!("{settings:?}").contains("sk-secret"));
        assert_eq!(settings.require_api_key().unwrap(), "sk-secret");
    }
}
