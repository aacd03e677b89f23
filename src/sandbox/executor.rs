//! Core execution engine for the snippet sandbox.

use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value as Json};

use crate::error::{Result, SandboxError};
use crate::sandbox::capabilities::CapabilityDescriptor;
use crate::sandbox::config::{ExecuteOptions, SandboxConfig, SandboxOptions};
use crate::sandbox::environment::is_denied;
use crate::sandbox::io::{LogBuffer, LogEntry};
use crate::sandbox::isolate::JobLimits;
use crate::sandbox::lifecycle::{Lifecycle, LifecycleState};
use crate::sandbox::marshal::{is_identifier, Variables};
use crate::sandbox::validator::validate;

/// Placeholder result of a dry run.
pub const DRY_RUN_RESULT: &str = "[DRY RUN - Not executed]";

/// Length above which a dry run warns about the snippet size.
const LONG_CODE_WARNING_CHARS: usize = 1_000;

static STATEMENT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|for|while|function|var|let|const|return)\b")
        .expect("statement keyword pattern is valid")
});

static LOOP_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:for|while|do)\b").expect("loop keyword pattern is valid")
});

/// Whether `code` is evaluated as a bare expression rather than a body.
pub fn is_expression(code: &str) -> bool {
    !code.contains(';') && !STATEMENT_KEYWORD.is_match(code)
}

/// The program actually run for `code`.
///
/// Expressions yield their value; anything else runs as a strict function
/// body and yields what it returns.
pub fn wrap(code: &str) -> String {
    if is_expression(code) {
        format!("({code}\n)")
    } else {
        format!("(function() {{ \"use strict\"; {code}\n}})()")
    }
}

/// Static analysis returned instead of executing in dry-run mode.
pub fn dry_run_report(code: &str, variables: &Variables) -> Json {
    let mut warnings = Vec::new();
    if LOOP_KEYWORD.is_match(code) {
        warnings.push("Code contains loops; make sure they terminate");
    }
    if code.chars().count() > LONG_CODE_WARNING_CHARS {
        warnings.push("Code is longer than 1000 characters");
    }
    json!({
        "dryRun": true,
        "code": code,
        "variables": variables.names(),
        "result": DRY_RUN_RESULT,
        "warnings": warnings,
    })
}

/// Outcome of [`Sandbox::test`]. Never an error itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub success: bool,
    pub result: Option<Json>,
    pub error: Option<String>,
    /// Console output of this call.
    pub logs: Vec<LogEntry>,
}

/// A sandbox that evaluates template snippets in an isolate of its own.
///
/// The isolate is created lazily by the first execution, or explicitly by
/// [`Sandbox::initialize`]. `execute` takes `&mut self`, so one instance
/// never runs two snippets at once.
#[derive(Debug)]
pub struct Sandbox {
    lifecycle: Lifecycle,
    logs: LogBuffer,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    /// Create a sandbox; no isolate exists until first use.
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(config),
            logs: LogBuffer::default(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        self.lifecycle.config()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Change the configuration. Fails with
    /// [`SandboxError::AlreadyInitialized`] while an isolate exists.
    pub fn configure(&mut self, options: SandboxOptions) -> Result<()> {
        self.lifecycle.configure(&options)
    }

    /// Create the isolate now instead of on first execution.
    pub fn initialize(&mut self) -> Result<()> {
        self.lifecycle.initialize()
    }

    /// Tear down the isolate. Further executions fail with
    /// [`SandboxError::NotInitialized`] until [`Sandbox::initialize`] or
    /// [`Sandbox::reset`].
    pub fn dispose(&mut self) {
        self.lifecycle.dispose();
    }

    /// Dispose, then initialize a fresh isolate.
    pub fn reset(&mut self) -> Result<()> {
        self.lifecycle.reset()
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::for_config(self.config())
    }

    /// Console output retained by this instance, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.entries()
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    /// Execute a snippet and return a detached copy of its result.
    ///
    /// # Arguments
    /// * `code` - The snippet source
    /// * `variables` - Values and callbacks visible to the snippet
    /// * `options` - Per-call overrides
    pub async fn execute(
        &mut self,
        code: &str,
        variables: Variables,
        options: ExecuteOptions,
    ) -> Result<Json> {
        let (result, logs) = self.run(code, variables, options).await;
        self.logs.extend(logs);
        result
    }

    /// Execute without ever failing; errors are reported in the result.
    pub async fn test(&mut self, code: &str, variables: Variables) -> TestReport {
        let (result, logs) = self.run(code, variables, ExecuteOptions::default()).await;
        self.logs.extend(logs.iter().cloned());
        match result {
            Ok(value) => TestReport {
                success: true,
                result: Some(value),
                error: None,
                logs,
            },
            Err(err) => TestReport {
                success: false,
                result: None,
                error: Some(err.to_string()),
                logs,
            },
        }
    }

    async fn run(
        &mut self,
        code: &str,
        variables: Variables,
        options: ExecuteOptions,
    ) -> (Result<Json>, Vec<LogEntry>) {
        if let Err(err) = validate(code) {
            return (Err(err), Vec::new());
        }
        if let Some(name) = variables.names().into_iter().find(|name| is_denied(name)) {
            return (
                Err(SandboxError::InvalidInput(format!(
                    "variable name '{name}' is reserved"
                ))),
                Vec::new(),
            );
        }
        if let Some(name) = variables.names().into_iter().find(|name| !is_identifier(name)) {
            return (
                Err(SandboxError::InvalidInput(format!(
                    "variable name '{name}' is not an identifier"
                ))),
                Vec::new(),
            );
        }
        if self.config().dry_run() {
            tracing::debug!(variables = variables.len(), "dry run");
            return (Ok(dry_run_report(code, &variables)), Vec::new());
        }

        let limits = JobLimits {
            timeout_ms: options.effective_timeout_ms(self.config()),
            memory_limit_mb: self.config().memory_limit_mb(),
        };
        let started = Instant::now();
        let isolate = match self.lifecycle.isolate() {
            Ok(isolate) => isolate,
            Err(err) => return (Err(err), Vec::new()),
        };
        let outcome = match isolate.run(wrap(code), variables, limits).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log_failure(&err);
                return (Err(err), Vec::new());
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome.result {
            Ok(_) => tracing::debug!(elapsed_ms, memory_used = outcome.memory_used, "snippet executed"),
            Err(err) => {
                log_failure(err);
                tracing::debug!(elapsed_ms, memory_used = outcome.memory_used, error = %err, "snippet failed");
            }
        }
        (outcome.result, outcome.logs)
    }
}

fn log_failure(err: &SandboxError) {
    match err {
        SandboxError::Timeout(ms) => tracing::warn!(timeout_ms = ms, "snippet timed out"),
        SandboxError::MemoryExceeded(mb) => {
            tracing::warn!(memory_limit_mb = mb, "snippet exceeded memory limit")
        }
        _ => {}
    }
}
