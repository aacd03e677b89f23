//! # Snippet Sandbox
//!
//! Secure evaluation of the small script snippets embedded in note templates.
//!
//! Snippets are JavaScript, run by an embedded V8 isolate on a dedicated
//! thread. The context has no filesystem, network, process or
//! module-loading operations, and the names a snippet might use to look for
//! them are bound to `undefined`. On top of that the sandbox enforces:
//!
//! - **Static validation**: obviously hostile source is rejected before it
//!   reaches the isolate
//! - **Memory limits**: the V8 heap is capped, and a script that reaches the
//!   cap is terminated
//! - **Timeout protection**: a host-side deadline terminates the running
//!   script
//! - **Copy-only boundary**: inputs and results cross as detached JSON

//! ## Example
//!
//! ```rust,no_run
//! use snippet_sandbox::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout_ms(2_000)
//!         .memory_limit_mb(32)
//!         .build();
//!
//!     let mut sandbox = Sandbox::new(config);
//!     let variables = Variables::new().with("title", json!("Weekly Review"));
//!     let slug = sandbox
//!         .execute("slugify(title)", variables, ExecuteOptions::default())
//!         .await?;
//!
//!     assert_eq!(slug, json!("weekly-review"));
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! 1. **Static validator**: regex screen for `eval(`, `require(`, `process.`
//!    and similar constructs
//! 2. **Environment**: standard globals and helpers are frozen; deny-listed
//!    names read as `undefined` and refuse to be called or assigned, and
//!    code generation from strings is disabled
//! 3. **Resource limits**: heap and execution time are bounded, and limit
//!    faults cannot be caught by the snippet
//! 4. **Isolation**: V8 handles never leave the isolate thread

pub mod error;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{ErrorKind, Result, SandboxError};
pub use sandbox::capabilities::CapabilityDescriptor;
pub use sandbox::config::{ExecuteOptions, SandboxConfig, SandboxConfigBuilder, SandboxOptions};
pub use sandbox::executor::{Sandbox, TestReport};
pub use sandbox::io::{LogEntry, LogLevel};
pub use sandbox::lifecycle::LifecycleState;
pub use sandbox::marshal::{Callback, HostValue, Variables};
