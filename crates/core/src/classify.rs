//! Meeting title classification
//!
//! Maps event titles onto a small set of work categories using keyword
//! routing. Category precedence is fixed (engineering, sales, hiring,
//! deep_work, admin, other) and the first matching set wins, so a title
//! matching several sets classifies deterministically.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Work category resolved from an event title
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Engineering,
    Sales,
    Hiring,
    DeepWork,
    Admin,
    Other,
}

impl Category {
    /// All categories in precedence order
    pub const ALL: [Category; 6] = [
        Category::Engineering,
        Category::Sales,
        Category::Hiring,
        Category::DeepWork,
        Category::Admin,
        Category::Other,
    ];

    fn index(self) -> usize {
        match self {
            Category::Engineering => 0,
            Category::Sales => 1,
            Category::Hiring => 2,
            Category::DeepWork => 3,
            Category::Admin => 4,
            Category::Other => 5,
        }
    }
}

const ENGINEERING_KEYWORDS: &[&str] = &[
    "standup",
    "stand-up",
    "sprint",
    "code review",
    "deploy",
    "architecture",
    "incident",
    "postmortem",
    "debug",
    "engineering",
    "tech design",
    "api",
];

const SALES_KEYWORDS: &[&str] = &[
    "sales",
    "client call",
    "demo",
    "pipeline",
    "prospect",
    "renewal",
    "discovery call",
    "deal",
    "quarterly business review",
    "qbr",
];

const HIRING_KEYWORDS: &[&str] = &[
    "interview",
    "candidate",
    "recruiting",
    "hiring",
    "phone screen",
    "debrief",
    "offer",
];

const DEEP_WORK_KEYWORDS: &[&str] = &[
    "focus",
    "deep work",
    "writing",
    "research",
    "heads down",
    "thinking time",
];

const ADMIN_KEYWORDS: &[&str] = &[
    "1:1",
    "one-on-one",
    "all hands",
    "all-hands",
    "planning",
    "budget",
    "expense",
    "status",
    "sync",
    "check-in",
    "review",
];

/// Classify an event title into its work category
pub fn classify_title(title: &str) -> Category {
    let normalized = title.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| normalized.contains(k));

    if matches(ENGINEERING_KEYWORDS) {
        Category::Engineering
    } else if matches(SALES_KEYWORDS) {
        Category::Sales
    } else if matches(HIRING_KEYWORDS) {
        Category::Hiring
    } else if matches(DEEP_WORK_KEYWORDS) {
        Category::DeepWork
    } else if matches(ADMIN_KEYWORDS) {
        Category::Admin
    } else {
        Category::Other
    }
}

/// Cost of switching between two categories, row = from, column = to.
/// Staying within a category costs 0.1; the most jarring switches
/// (engineering↔sales, sales↔deep work) cost 0.9.
#[rustfmt::skip]
const TRANSITION_COSTS: [[f64; 6]; 6] = [
    // eng   sales  hiring deep   admin  other
    [0.1,   0.9,   0.7,   0.4,   0.6,   0.5], // engineering
    [0.9,   0.1,   0.5,   0.9,   0.5,   0.5], // sales
    [0.7,   0.5,   0.1,   0.8,   0.4,   0.5], // hiring
    [0.4,   0.9,   0.8,   0.1,   0.7,   0.6], // deep_work
    [0.6,   0.5,   0.4,   0.7,   0.1,   0.3], // admin
    [0.5,   0.5,   0.5,   0.6,   0.3,   0.1], // other
];

/// Cognitive cost of a transition between two meeting categories
pub fn transition_cost(from: Category, to: Category) -> f64 {
    TRANSITION_COSTS[from.index()][to.index()]
}

/// Cost estimate for two adjacent meetings of the same category; used as the
/// post-clustering baseline in savings estimates.
pub const SAME_CATEGORY_COST: f64 = 0.1;
