//! One-line confirmations for CLI operations.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Success,
    Warning,
    Error,
}

impl StatusLevel {
    fn label(self) -> &'static str {
        match self {
            StatusLevel::Success => "Success:",
            StatusLevel::Warning => "Warning:",
            StatusLevel::Error => "Error:",
        }
    }
}

/// A short status message, e.g. after discarding a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub level: StatusLevel,
    pub message: String,
}

impl OperationStatus {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Warning,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.level.label(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(
            OperationStatus::success("Plan discarded").to_string(),
            "Success: Plan discarded\n"
        );
        assert!(OperationStatus::warning("2 lines dropped")
            .to_string()
            .starts_with("Warning:"));
        assert!(OperationStatus::failure("boom").to_string().starts_with("Error:"));
    }
}
