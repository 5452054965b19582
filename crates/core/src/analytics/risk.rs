//! Temporal risk scoring
//!
//! Combines sustained cognitive load, travel density and strategic
//! allocation drift into one risk figure.

use serde::Serialize;
use utoipa::ToSchema;

const HIGH_LOAD_SCORE: u32 = 80;

/// Strategic vs non-strategic share of allocated hours, in percent
#[derive(Debug, Clone, Copy, Default, Serialize, ToSchema)]
pub struct AllocationShares {
    pub strategic_pct: f64,
    pub non_strategic_pct: f64,
}

impl AllocationShares {
    /// Derive shares from raw hours; an empty window is all non-strategic.
    pub fn from_hours(strategic_hours: f64, total_hours: f64) -> Self {
        if total_hours <= 0.0 {
            return Self {
                strategic_pct: 0.0,
                non_strategic_pct: 100.0,
            };
        }
        let strategic_pct = (strategic_hours / total_hours * 100.0).clamp(0.0, 100.0);
        Self {
            strategic_pct,
            non_strategic_pct: 100.0 - strategic_pct,
        }
    }
}

/// Inputs for the temporal risk computation
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    /// Daily cognitive load scores, oldest first
    pub daily_scores: Vec<u32>,
    pub trip_days: u32,
    pub working_days: u32,
    pub current_allocation: AllocationShares,
    pub previous_allocation: AllocationShares,
}

/// Risk severity banding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// LOW < 30 ≤ MODERATE < 60 ≤ HIGH < 85 ≤ CRITICAL
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=29 => Self::Low,
            30..=59 => Self::Moderate,
            60..=84 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Computed risk scores, each in `[0, 100]`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RiskScores {
    pub burnout_risk: u32,
    pub travel_overload: u32,
    pub strategic_drift: u32,
    pub overall_risk: u32,
    pub risk_level: RiskLevel,
}

/// Trailing run of days at or above the high-load threshold
fn high_load_streak(daily_scores: &[u32]) -> u32 {
    daily_scores
        .iter()
        .rev()
        .take_while(|score| **score >= HIGH_LOAD_SCORE)
        .count() as u32
}

fn burnout_risk(streak: u32) -> u32 {
    match streak {
        0 => 5,
        1..=2 => 20,
        3..=6 => 40,
        7..=13 => 65,
        _ => 90,
    }
}

fn travel_overload(trip_days: u32, working_days: u32) -> u32 {
    if working_days == 0 {
        return 0;
    }
    let ratio = f64::from(trip_days) / f64::from(working_days);
    let score = if ratio < 0.2 {
        ratio / 0.2 * 25.0
    } else if ratio < 0.3 {
        25.0 + (ratio - 0.2) / 0.1 * 30.0
    } else if ratio <= 0.5 {
        55.0 + (ratio - 0.3) / 0.2 * 25.0
    } else {
        80.0 + (ratio - 0.5) * 40.0
    };
    score.round().clamp(0.0, 100.0) as u32
}

fn strategic_drift(current: AllocationShares, previous: AllocationShares) -> u32 {
    let drift = (current.strategic_pct - previous.strategic_pct).abs()
        + (current.non_strategic_pct - previous.non_strategic_pct).abs();
    drift.round().clamp(0.0, 100.0) as u32
}

/// Compute the temporal risk profile.
///
/// `overall = 0.50·burnout + 0.25·travel + 0.25·drift`, rounded.
pub fn temporal_risk(inputs: &RiskInputs) -> RiskScores {
    let burnout = burnout_risk(high_load_streak(&inputs.daily_scores));
    let travel = travel_overload(inputs.trip_days, inputs.working_days);
    let drift = strategic_drift(inputs.current_allocation, inputs.previous_allocation);

    let overall = (0.50 * f64::from(burnout) + 0.25 * f64::from(travel) + 0.25 * f64::from(drift))
        .round()
        .clamp(0.0, 100.0) as u32;

    RiskScores {
        burnout_risk: burnout,
        travel_overload: travel,
        strategic_drift: drift,
        overall_risk: overall,
        risk_level: RiskLevel::from_score(overall),
    }
}
