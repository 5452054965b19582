//! Tempo Core - Domain logic and models
//!
//! This crate contains pure domain logic with no I/O operations.
//! All domain models, the analytics kernel, governance math, ICS feed
//! parsing/diffing and error types are defined here.

pub mod analytics;
pub mod classify;
pub mod config;
pub mod error;
pub mod governance;
pub mod ics;
pub mod models;
pub mod onboarding;
pub mod proof;
pub mod recurrence;
pub mod security;
pub mod types;
pub mod upgrade;

pub use error::{CoreError, CoreResult};
pub use ics::{classify_feed_status, diff_feeds, parse_ics, FeedErrorCategory, Staleness};
pub use recurrence::{expand_rrule, validate_rrule};
pub use security::{hash_participant_email, sha256_hex};
