//! Isolate lifecycle: `Uninitialized -> Initialized -> Disposed`.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, SandboxError};
use crate::sandbox::config::{SandboxConfig, SandboxOptions};
use crate::sandbox::isolate::Isolate;

/// Where a sandbox is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No isolate yet; configuration may change.
    Uninitialized,
    /// An isolate exists; configuration is frozen.
    Initialized,
    /// The isolate was torn down; configuration may change again.
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Owns the configuration and, while initialized, the isolate built from it.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    config: SandboxConfig,
    isolate: Option<Isolate>,
    disposed: bool,
}

impl Lifecycle {
    pub(crate) fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            isolate: None,
            disposed: false,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        match (&self.isolate, self.disposed) {
            (Some(_), _) => LifecycleState::Initialized,
            (None, false) => LifecycleState::Uninitialized,
            (None, true) => LifecycleState::Disposed,
        }
    }

    pub(crate) fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Apply `options`; refused while an isolate exists.
    pub(crate) fn configure(&mut self, options: &SandboxOptions) -> Result<()> {
        if self.isolate.is_some() {
            return Err(SandboxError::AlreadyInitialized);
        }
        self.config = self.config.merged(options);
        tracing::debug!(config = ?self.config, "sandbox configured");
        Ok(())
    }

    /// Create the isolate if there is none. Idempotent.
    pub(crate) fn initialize(&mut self) -> Result<()> {
        if self.isolate.is_none() {
            self.isolate = Some(Isolate::spawn(&self.config)?);
            self.disposed = false;
        }
        Ok(())
    }

    /// The isolate, created on first use. A disposed sandbox stays disposed
    /// until it is initialized again explicitly.
    pub(crate) fn isolate(&mut self) -> Result<&mut Isolate> {
        if self.disposed {
            return Err(SandboxError::NotInitialized);
        }
        if self.isolate.is_none() {
            self.initialize()?;
        }
        self.isolate.as_mut().ok_or(SandboxError::NotInitialized)
    }

    /// Tear down the isolate. Idempotent from any state.
    pub(crate) fn dispose(&mut self) {
        if let Some(mut isolate) = self.isolate.take() {
            isolate.shutdown();
        }
        self.disposed = true;
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        self.dispose();
        self.initialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut lifecycle = Lifecycle::new(SandboxConfig::default());
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        lifecycle.initialize().unwrap();
        lifecycle.initialize().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);

        lifecycle.dispose();
        lifecycle.dispose();
        assert_eq!(lifecycle.state(), LifecycleState::Disposed);
        assert!(matches!(lifecycle.isolate(), Err(SandboxError::NotInitialized)));

        lifecycle.reset().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
    }

    #[test]
    fn test_configuration_frozen_while_initialized() {
        let mut lifecycle = Lifecycle::new(SandboxConfig::default());
        let options = SandboxOptions {
            timeout_ms: Some(1000),
            ..Default::default()
        };
        lifecycle.configure(&options).unwrap();
        assert_eq!(lifecycle.config().timeout_ms(), 1000);

        lifecycle.initialize().unwrap();
        assert!(matches!(
            lifecycle.configure(&options),
            Err(SandboxError::AlreadyInitialized)
        ));

        lifecycle.dispose();
        lifecycle.configure(&options).unwrap();
    }

    #[test]
    fn test_first_use_initializes() {
        let mut lifecycle = Lifecycle::new(SandboxConfig::default());
        assert!(lifecycle.isolate().is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
    }
}
