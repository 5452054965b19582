pub mod accounts;
pub mod analytics;
pub mod commitments;
pub mod constraints;
pub mod events;
pub mod feeds;
pub mod health;
pub mod onboarding;
pub mod vip;
