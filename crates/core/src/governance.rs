//! Commitment tracking
//!
//! Rolling-window math and compliance status for client-hour commitments.
//! All functions take `now` explicitly so status computation stays
//! deterministic and testable.

use crate::models::{BillingCategory, CanonicalEvent, Commitment, TimeAllocation, WindowType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Half-open commitment window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CommitmentWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Compliance state of a commitment within its window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceState {
    Compliant,
    Under,
    Over,
}

/// Computed commitment status
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CommitmentStatus {
    pub window: CommitmentWindow,
    pub target_hours: f64,
    pub actual_hours: f64,
    pub status: ComplianceState,
    pub billable_event_count: u64,
}

/// Derive the rolling window ending at `now`.
///
/// WEEKLY spans `rolling_window_weeks × 7` days; MONTHLY approximates a
/// rolling month by 7-day units, never less than 4 weeks. No calendar-aware
/// month arithmetic is attempted.
pub fn commitment_window(commitment: &Commitment, now: DateTime<Utc>) -> CommitmentWindow {
    let weeks = match commitment.window_type {
        WindowType::Weekly => commitment.rolling_window_weeks.max(1),
        WindowType::Monthly => commitment.rolling_window_weeks.max(4),
    };
    CommitmentWindow {
        start: now - Duration::weeks(weeks),
        end: now,
    }
}

/// Hours a single allocated event contributes to the commitment window
fn billable_hours(
    commitment: &Commitment,
    event: &CanonicalEvent,
    allocation: &TimeAllocation,
    window: CommitmentWindow,
) -> Option<f64> {
    if allocation.billing_category != BillingCategory::Billable {
        return None;
    }
    if allocation.client_id.as_deref() != Some(commitment.client_id.as_str()) {
        return None;
    }

    let start = event.sort_instant()?;
    let end = event.end_instant()?;
    if end <= window.start || start >= window.end {
        return None;
    }

    Some((end - start).num_minutes() as f64 / 60.0)
}

/// Classify actual hours against the target.
///
/// `compliant` strictly inside the ±10 % band; sitting exactly on a band
/// edge counts as out of band. A zero target is compliant only at zero
/// actual hours and `over` otherwise.
pub fn compliance_state(target_hours: f64, actual_hours: f64) -> ComplianceState {
    if target_hours <= 0.0 {
        return if actual_hours > 0.0 {
            ComplianceState::Over
        } else {
            ComplianceState::Compliant
        };
    }

    if actual_hours <= 0.9 * target_hours {
        ComplianceState::Under
    } else if actual_hours >= 1.1 * target_hours {
        ComplianceState::Over
    } else {
        ComplianceState::Compliant
    }
}

/// Compute commitment status over the allocated events of the window.
///
/// `entries` pairs each allocation with its underlying event; entries for
/// other clients or non-billable categories are ignored.
pub fn commitment_status(
    commitment: &Commitment,
    entries: &[(CanonicalEvent, TimeAllocation)],
    now: DateTime<Utc>,
) -> CommitmentStatus {
    let window = commitment_window(commitment, now);

    let mut actual_hours = 0.0;
    let mut billable_event_count = 0;
    for (event, allocation) in entries {
        if let Some(hours) = billable_hours(commitment, event, allocation, window) {
            actual_hours += hours;
            billable_event_count += 1;
        }
    }

    CommitmentStatus {
        window,
        target_hours: commitment.target_hours,
        actual_hours,
        status: compliance_state(commitment.target_hours, actual_hours),
        billable_event_count,
    }
}
