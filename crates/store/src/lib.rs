//! Tempo Store - Canonical Event Store (CES)
//!
//! Durable per-user storage partitions with a single logical writer each,
//! the delta applicator, the outbound mirror queue and the proof blob
//! store. Every other component reads and writes user state through the
//! [`Partition`] operations defined here.

pub mod blob;
pub mod db;
mod delta;
pub mod health;
mod migrations;
pub mod mirror;
pub mod partition;

pub use blob::{ProofMetadata, ProofStore};
pub use db::accounts::FeedRefreshUpdate;
pub use health::{account_health, AccountHealth};
pub use mirror::{mirror_channel, MirrorReceiver, MirrorSender, MIRROR_QUEUE_DEPTH};
pub use partition::{Ces, DowngradeOutcome, EventPage, NewAccount, Partition};
