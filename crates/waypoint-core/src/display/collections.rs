//! Collection wrapper types for displaying groups of domain objects.
//!
//! This module provides wrapper types that format collections of domain objects
//! with consistent structure and empty collection handling.

use std::fmt;

use crate::models::{OperationResult, Turn};

/// Newtype wrapper rendering executor results as a markdown table, one row
/// per item in request order.
///
/// # Examples
///
/// ```rust
/// use waypoint_core::display::OperationResults;
///
/// let output = OperationResults(Vec::new()).to_string();
/// assert_eq!(output, "No results.\n");
/// ```
pub struct OperationResults(pub Vec<OperationResult>);

impl OperationResults {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperationResult> {
        self.0.iter()
    }
}

impl fmt::Display for OperationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No results.");
        }
        writeln!(f, "| Item | Action | Status | Attempts | ms | Result |")?;
        writeln!(f, "|---|---|---|---|---|---|")?;
        for result in &self.0 {
            let detail = match (&result.payload_ref, &result.error) {
                (_, Some(error)) => error.to_string(),
                (Some(payload_ref), None) => payload_ref.to_string(),
                (None, None) => String::new(),
            };
            let status = if result.coalesced {
                format!("{} (coalesced)", result.status)
            } else {
                result.status.to_string()
            };
            writeln!(
                f,
                "| {} | {} | {} | {} | {} | {} |",
                result.item_id.as_deref().unwrap_or("-"),
                result.action,
                status,
                result.attempts,
                result.duration_ms,
                detail.replace('|', "\\|")
            )?;
        }
        Ok(())
    }
}

/// Newtype wrapper for a session's turn history, oldest first.
#[derive(Debug)]
pub struct History(pub Vec<Turn>);

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No turns recorded.");
        }
        for turn in &self.0 {
            write!(f, "{turn}")?;
        }
        Ok(())
    }
}
