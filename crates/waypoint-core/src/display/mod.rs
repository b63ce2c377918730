//! Display formatting functions and wrapper types.
//!
//! Domain models implement [`std::fmt::Display`] directly (see [`models`]);
//! collections get newtype wrappers so they can carry their own empty-state
//! and table formatting. All output is markdown, rendered by the CLI's
//! terminal renderer.
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  Domain Models  │    │ Display Impls   │    │   Formatted     │
//! │ (Plan, Turn...) │───▶│ & Wrappers      │───▶│    Output       │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`collections`]: Collection wrapper types (OperationResults, History)
//! - [`status`]: Status and confirmation messages (OperationStatus)
//! - [`datetime`]: Date/time formatting utilities
//! - [`models`]: Display implementations for domain models
//!
//! ## Usage Examples
//!
//! ```rust
//! use waypoint_core::display::OperationStatus;
//!
//! let success = OperationStatus::success("Plan discarded".to_string());
//! assert!(success.to_string().starts_with("Success:"));
//! ```

pub mod collections;
pub mod datetime;
pub mod models;
pub mod status;

// Re-export commonly used types for convenience
pub use collections::{History, OperationResults};
pub use datetime::{Elapsed, LocalDateTime};
pub use status::{OperationStatus, StatusLevel};
