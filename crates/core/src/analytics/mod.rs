//! Analytics kernel
//!
//! Deterministic pure functions over snapshots of the canonical event graph.
//! No function here reads the wall clock or performs I/O; callers pass
//! `now` and the snapshot explicitly, so identical inputs always produce
//! identical results.

pub mod availability;
pub mod cognitive_load;
pub mod context_switch;
pub mod deep_work;
pub mod risk;
pub mod working_hours;

pub use availability::{
    availability_grid, cancellation_rates, combined_free_probability, AvailabilitySlot,
};
pub use cognitive_load::{daily_cognitive_load, CognitiveLoad};
pub use context_switch::{analyze_context_switches, ContextSwitchAnalysis};
pub use deep_work::{analyze_deep_work, DeepWorkAnalysis};
pub use risk::{temporal_risk, AllocationShares, RiskInputs, RiskLevel, RiskScores};
pub use working_hours::{day_bounds, working_days_between, DayBounds};
