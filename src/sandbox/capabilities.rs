//! Serializable description of what a sandbox allows.

use serde::Serialize;

use crate::sandbox::config::{SandboxConfig, MAX_CODE_LENGTH};
use crate::sandbox::validator::blocked_pattern_labels;

/// Snapshot of limits, blocked patterns, and feature/restriction flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub limits: Limits,
    pub blocked_patterns: Vec<String>,
    pub features: Features,
    pub restrictions: Restrictions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub memory_limit_mb: u32,
    pub timeout_ms: u64,
    pub max_code_length: usize,
}

/// Language features available to snippets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub variables: bool,
    pub functions: bool,
    pub loops: bool,
    pub conditionals: bool,
    pub date_time: bool,
    pub math: bool,
    pub strings: bool,
    pub arrays: bool,
    pub objects: bool,
    pub console: bool,
}

/// Host capabilities; `false` means the sandbox grants no access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Restrictions {
    pub file_system: bool,
    pub network: bool,
    pub eval: bool,
    pub imports: bool,
    pub globals: bool,
    pub native_modules: bool,
    pub process_access: bool,
}

impl CapabilityDescriptor {
    pub fn for_config(config: &SandboxConfig) -> Self {
        Self {
            limits: Limits {
                memory_limit_mb: config.memory_limit_mb(),
                timeout_ms: config.timeout_ms(),
                max_code_length: MAX_CODE_LENGTH,
            },
            blocked_patterns: blocked_pattern_labels(),
            features: Features {
                variables: true,
                functions: true,
                loops: true,
                conditionals: true,
                date_time: true,
                math: true,
                strings: true,
                arrays: true,
                objects: true,
                console: true,
            },
            restrictions: Restrictions {
                file_system: false,
                network: false,
                eval: false,
                imports: false,
                globals: false,
                native_modules: false,
                process_access: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let config = SandboxConfig::builder().memory_limit_mb(64).timeout_ms(2000).build();
        let json = serde_json::to_value(CapabilityDescriptor::for_config(&config)).unwrap();

        assert_eq!(json["limits"]["memoryLimitMb"], 64);
        assert_eq!(json["limits"]["timeoutMs"], 2000);
        assert_eq!(json["blockedPatterns"][0], "eval(");
        assert_eq!(json["blockedPatterns"].as_array().map(Vec::len), Some(14));
        assert_eq!(json["features"]["dateTime"], true);
        assert_eq!(json["restrictions"]["fileSystem"], false);
        assert_eq!(json["restrictions"]["processAccess"], false);
    }
}
