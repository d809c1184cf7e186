//! Re-execution of single tests through an external command.
//!
//! The command is an argv template in which every occurrence of
//! [`SELECTOR_PLACEHOLDER`] is replaced by the test selector. It runs in the
//! project root; exit code zero means the test passed.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;

/// Placeholder replaced by the `class#method` selector.
pub const SELECTOR_PLACEHOLDER: &str = "{test_selector}";

const OUTPUT_TAIL_CHARS: usize = 2000;

/// Runs one test and reports whether it passed.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Execute the test identified by `selector`.
    ///
    /// `Ok(false)` is an ordinary failed run; `Err` means the test could not
    /// be started at all.
    async fn execute(&self, selector: &str) -> Result<bool>;
}

/// Argv template for the retry command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            argv: ["mvn", "-q", "-Dtest={test_selector}", "test"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        match argv.first() {
            None => return Err(Error::config("retry command template is empty")),
            Some(program) if program.trim().is_empty() => {
                return Err(Error::config("retry command template has an empty program"));
            }
            Some(_) => {}
        }
        Ok(Self { argv })
    }

    #[must_use]
    pub fn has_placeholder(&self) -> bool {
        self.argv.iter().any(|arg| arg.contains(SELECTOR_PLACEHOLDER))
    }

    /// Substitute `selector` into every argument.
    #[must_use]
    pub fn render(&self, selector: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| arg.replace(SELECTOR_PLACEHOLDER, selector))
            .collect()
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

/// Executor that spawns the templated command as a child process.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    template: CommandTemplate,
    working_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new(template: CommandTemplate, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            template,
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl TestExecutor for CommandExecutor {
    async fn execute(&self, selector: &str) -> Result<bool> {
        let argv = self.template.render(selector);
        let command_line = argv.join(" ");
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::executor(command_line, "empty command"));
        };

        tracing::debug!(
            command = %command_line,
            cwd = %self.working_dir.display(),
            "running retry command"
        );
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                let message = if err.kind() == std::io::ErrorKind::NotFound {
                    format!("command '{program}' not found; is it installed and on PATH?")
                } else {
                    err.to_string()
                };
                Error::executor(command_line.clone(), message)
            })?;

        if output.status.success() {
            return Ok(true);
        }

        tracing::debug!(
            command = %command_line,
            exit_code = ?output.status.code(),
            stderr = %tail(&String::from_utf8_lossy(&output.stderr)),
            stdout = %tail(&String::from_utf8_lossy(&output.stdout)),
            "retry command failed"
        );
        Ok(false)
    }
}

fn tail(text: &str) -> &str {
    let count = text.chars().count();
    if count <= OUTPUT_TAIL_CHARS {
        return text;
    }
    let skip = count - OUTPUT_TAIL_CHARS;
    text.char_indices().nth(skip).map_or(text, |(idx, _)| &text[idx..])
}
