//! Prelude module for convenient imports.

pub use crate::error::{Result, SandboxError};
pub use crate::sandbox::{
    config::{ExecuteOptions, SandboxConfig, SandboxOptions},
    executor::{Sandbox, TestReport},
    marshal::{Callback, HostValue, Variables},
};
