//! Partition repositories
//!
//! Raw-SQL data access for one user partition. Callers hold the partition
//! writer lock; functions here never acquire locks or open transactions of
//! their own unless noted.

pub mod accounts;
pub mod allocations;
pub mod commitments;
pub mod constraints;
pub mod events;
pub mod sessions;
pub mod vip;
