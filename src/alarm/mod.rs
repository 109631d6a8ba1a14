//! Threshold evaluation and alarm gating.
//!
//! ```text
//! readings of one message ──► evaluate ──► AlarmEvent ──► AlarmGate ──► emit
//!                               ▲                           (cooldown)
//!                        ThresholdSet (watch)
//! ```
//!
//! Evaluation is pure; the gate holds the only alarm state.

pub mod evaluator;
pub mod thresholds;

pub use evaluator::{evaluate, AlarmGate};
pub use thresholds::{ThresholdControl, ThresholdSet};
