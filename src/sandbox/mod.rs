//! Sandbox module containing all execution-related components.

pub mod capabilities;
pub mod config;
pub mod environment;
pub mod executor;
pub mod io;
pub(crate) mod isolate;
pub mod lifecycle;
pub(crate) mod limits;
pub mod marshal;
pub(crate) mod runtime;
pub mod validator;
