//! Business logic services
//!
//! Everything here operates on [`crate::state::AppState`]: calendar
//! resolution, gap reconciliation, the consumer-facing accessors, and
//! feature generation.

pub mod accessors;
pub mod calendar;
pub mod features;
pub mod reconciler;
