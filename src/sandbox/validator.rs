//! Static pre-execution validation of snippet source text.
//!
//! This is a cheap lexical screen in front of the isolate. The environment
//! deny-list is what actually keeps host capabilities out of reach; the
//! patterns here reject obviously hostile code before an isolate is used.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SandboxError};
use crate::sandbox::config::MAX_CODE_LENGTH;

/// A forbidden lexical construct.
#[derive(Debug)]
pub struct BlockedPattern {
    /// Human-readable form reported to callers.
    pub label: &'static str,
    regex: Regex,
}

impl BlockedPattern {
    fn new(label: &'static str, pattern: &str) -> Self {
        Self {
            label,
            regex: Regex::new(pattern).expect("blocked pattern must compile"),
        }
    }

    /// Whether `code` contains this pattern.
    pub fn is_match(&self, code: &str) -> bool {
        self.regex.is_match(code)
    }
}

/// Ordered list of blocked patterns; the first match is reported.
pub static BLOCKED_PATTERNS: LazyLock<Vec<BlockedPattern>> = LazyLock::new(|| {
    vec![
        BlockedPattern::new("eval(", r"\beval\s*\("),
        BlockedPattern::new("Function(", r"\bFunction\s*\("),
        BlockedPattern::new("require(", r"\brequire\s*\("),
        BlockedPattern::new("import ", r"\bimport\s"),
        BlockedPattern::new("export ", r"\bexport\s"),
        BlockedPattern::new("process.", r"\bprocess\s*\."),
        BlockedPattern::new("Buffer.", r"\bBuffer\s*\."),
        BlockedPattern::new("__dirname", r"__dirname"),
        BlockedPattern::new("__filename", r"__filename"),
        BlockedPattern::new("fs.", r"\bfs\s*\."),
        BlockedPattern::new("child_process", r"child_process"),
        BlockedPattern::new("net.", r"\bnet\s*\."),
        BlockedPattern::new("http.", r"\bhttp\s*\."),
        BlockedPattern::new("https.", r"\bhttps\s*\."),
    ]
});

/// Labels of every blocked pattern, in check order.
pub fn blocked_pattern_labels() -> Vec<String> {
    BLOCKED_PATTERNS.iter().map(|p| p.label.to_string()).collect()
}

/// Reject code that is empty, too long, or contains a blocked pattern.
pub fn validate(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(SandboxError::InvalidInput(
            "code must be a non-empty string".to_string(),
        ));
    }

    let length = code.chars().count();
    if length > MAX_CODE_LENGTH {
        return Err(SandboxError::TooLong {
            max: MAX_CODE_LENGTH,
            actual: length,
        });
    }

    if let Some(pattern) = BLOCKED_PATTERNS.iter().find(|p| p.is_match(code)) {
        tracing::warn!(pattern = pattern.label, "rejected snippet with blocked pattern");
        return Err(SandboxError::BlockedPattern(pattern.label.to_string()));
    }

    Ok(())
}
