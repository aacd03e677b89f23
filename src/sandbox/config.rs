//! Sandbox configuration with builder pattern.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lowest accepted memory ceiling in megabytes.
pub const MIN_MEMORY_LIMIT_MB: u32 = 8;
/// Highest accepted memory ceiling in megabytes.
pub const MAX_MEMORY_LIMIT_MB: u32 = 512;
/// Default memory ceiling in megabytes.
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 128;

/// Lowest accepted time budget in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 100;
/// Highest accepted time budget in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 30_000;
/// Default time budget in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Maximum snippet length in characters.
pub const MAX_CODE_LENGTH: usize = 10_000;

/// Clamp a memory ceiling into the accepted range.
pub fn clamp_memory_limit_mb(mb: u32) -> u32 {
    mb.clamp(MIN_MEMORY_LIMIT_MB, MAX_MEMORY_LIMIT_MB)
}

/// Clamp a time budget into the accepted range.
pub fn clamp_timeout_ms(ms: u64) -> u64 {
    ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// Configuration for the snippet sandbox.
///
/// Values are always within range: the builder and [`SandboxOptions`] clamp
/// them on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    memory_limit_mb: u32,
    timeout_ms: u64,
    dry_run: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            dry_run: false,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Memory ceiling of the isolate in megabytes.
    pub fn memory_limit_mb(&self) -> u32 {
        self.memory_limit_mb
    }

    /// Memory ceiling of the isolate in bytes.
    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb as usize * 1024 * 1024
    }

    /// Time budget of a single execution in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Time budget of a single execution.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether snippets are analysed instead of executed.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Return a copy with the set fields of `options` applied.
    pub fn merged(&self, options: &SandboxOptions) -> Self {
        Self {
            memory_limit_mb: options
                .memory_limit_mb
                .map(clamp_memory_limit_mb)
                .unwrap_or(self.memory_limit_mb),
            timeout_ms: options
                .timeout_ms
                .map(clamp_timeout_ms)
                .unwrap_or(self.timeout_ms),
            dry_run: options.dry_run.unwrap_or(self.dry_run),
        }
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    memory_limit_mb: Option<u32>,
    timeout_ms: Option<u64>,
    dry_run: Option<bool>,
}

impl SandboxConfigBuilder {
    /// Set the memory ceiling in megabytes (clamped to 8..=512).
    pub fn memory_limit_mb(mut self, mb: u32) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Set the time budget in milliseconds (clamped to 100..=30000).
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set the time budget (clamped to 100ms..=30s).
    pub fn timeout(self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms(ms)
    }

    /// Enable or disable dry-run analysis.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        SandboxConfig::default().merged(&SandboxOptions {
            memory_limit_mb: self.memory_limit_mb,
            timeout_ms: self.timeout_ms,
            dry_run: self.dry_run,
        })
    }
}

/// Partial configuration accepted by `Sandbox::configure`.
///
/// Unset fields keep their current value. Deserializes from the camelCase
/// keys used in template settings, e.g. `{"timeoutMs": 2000}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxOptions {
    /// Memory ceiling in megabytes.
    pub memory_limit_mb: Option<u32>,
    /// Time budget in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Dry-run mode.
    pub dry_run: Option<bool>,
}

impl SandboxOptions {
    /// Parse options from a JSON document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Time budget for this call only, clamped like the configured timeout.
    pub timeout_ms: Option<u64>,
}

impl ExecuteOptions {
    /// Options overriding the time budget of one call.
    pub fn with_timeout_ms(ms: u64) -> Self {
        Self {
            timeout_ms: Some(ms),
        }
    }

    /// Effective time budget given the sandbox configuration.
    pub fn effective_timeout_ms(&self, config: &SandboxConfig) -> u64 {
        self.timeout_ms
            .map(clamp_timeout_ms)
            .unwrap_or(config.timeout_ms())
    }
}
