//! Status enumerations for plan steps and operation items.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Type-safe enumeration of plan step statuses.
///
/// Statuses only move forward: `pending → processing → {done, failed}`,
/// `pending → failed` for steps that fail before dispatch, and
/// `pending → skipped` for sequence-abort propagation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step is waiting for its dependencies or its turn
    #[default]
    Pending,

    /// Step has been dispatched and its result is outstanding
    Processing,

    /// Step ran and succeeded
    Done,

    /// Step ran and failed, or failed before dispatch
    Failed,

    /// Step did not run because an earlier sequence item failed
    Skipped,
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "processing" => Ok(StepStatus::Processing),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}

impl StepStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Get status with consistent icon formatting for display.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use waypoint_core::models::StepStatus;
    ///
    /// assert_eq!(StepStatus::Done.with_icon(), "✓ Done");
    /// assert_eq!(StepStatus::Pending.with_icon(), "○ Pending");
    /// ```
    pub fn with_icon(&self) -> &'static str {
        match self {
            StepStatus::Pending => "○ Pending",
            StepStatus::Processing => "➤ Processing",
            StepStatus::Done => "✓ Done",
            StepStatus::Failed => "✗ Failed",
            StepStatus::Skipped => "↷ Skipped",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Done | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Processing)
                | (StepStatus::Pending, StepStatus::Failed)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Processing, StepStatus::Done)
                | (StepStatus::Processing, StepStatus::Failed)
        )
    }
}

/// Outcome status of a single operation item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// The tool ran and succeeded
    Done,

    /// The tool failed, or the item was rejected before running
    Failed,

    /// Served from the result cache without invoking the tool
    CacheHit,

    /// Not run because an earlier sequence item failed
    Skipped,

    /// No rate-limit token within the allowed wait; the caller may resubmit
    RateLimited,
}

impl ItemStatus {
    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
            ItemStatus::CacheHit => "cache_hit",
            ItemStatus::Skipped => "skipped",
            ItemStatus::RateLimited => "rate_limited",
        }
    }

    /// Whether the item produced a payload.
    pub fn is_success(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::CacheHit)
    }
}
