//! Context-switch cost analysis
//!
//! Walks one day's meetings in time order, prices each category transition
//! from the fixed cost matrix and proposes clustering when two categories
//! dominate the day's switching.

use crate::classify::{classify_title, transition_cost, Category, SAME_CATEGORY_COST};
use crate::models::CanonicalEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

/// One priced transition between adjacent meetings
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub from_title: String,
    pub to_title: String,
    pub from_category: Category,
    pub to_category: Category,
    pub cost: f64,
}

/// Suggestion to cluster two categories that keep interleaving
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClusterSuggestion {
    pub category_a: Category,
    pub category_b: Category,
    pub transition_count: u32,
    /// Cost of today's interleaving minus the same-category baseline
    pub estimated_savings: f64,
}

/// Full context-switch analysis for one day
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ContextSwitchAnalysis {
    pub transitions: Vec<Transition>,
    pub total_cost: f64,
    pub suggestions: Vec<ClusterSuggestion>,
}

const CLUSTER_THRESHOLD: u32 = 3;

/// Analyze context switches over the day's busy meetings.
pub fn analyze_context_switches(events: &[CanonicalEvent]) -> ContextSwitchAnalysis {
    let mut ordered: Vec<&CanonicalEvent> = events
        .iter()
        .filter(|e| e.is_busy() && e.sort_instant().is_some())
        .collect();
    ordered.sort_by_key(|e| e.sort_instant());

    let mut transitions = Vec::new();
    let mut total_cost = 0.0;
    let mut pair_counts: HashMap<(Category, Category), u32> = HashMap::new();

    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let from_category = classify_title(&prev.title);
        let to_category = classify_title(&next.title);
        let cost = transition_cost(from_category, to_category);
        total_cost += cost;

        if from_category != to_category {
            // Count unordered pairs so A→B and B→A accumulate together
            let key = if from_category <= to_category {
                (from_category, to_category)
            } else {
                (to_category, from_category)
            };
            *pair_counts.entry(key).or_default() += 1;
        }

        transitions.push(Transition {
            at: next.sort_instant().unwrap_or_default(),
            from_title: prev.title.clone(),
            to_title: next.title.clone(),
            from_category,
            to_category,
            cost,
        });
    }

    let mut suggestions: Vec<ClusterSuggestion> = pair_counts
        .into_iter()
        .filter(|(_, count)| *count >= CLUSTER_THRESHOLD)
        .map(|((a, b), count)| {
            let interleaved = f64::from(count) * transition_cost(a, b);
            let clustered = f64::from(count) * SAME_CATEGORY_COST;
            ClusterSuggestion {
                category_a: a,
                category_b: b,
                transition_count: count,
                estimated_savings: interleaved - clustered,
            }
        })
        .collect();
    suggestions.sort_by(|a, b| {
        b.estimated_savings
            .partial_cmp(&a.estimated_savings)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ContextSwitchAnalysis {
        transitions,
        total_cost,
        suggestions,
    }
}
