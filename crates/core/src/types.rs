//! Type-safe wrappers for domain identifiers
//!
//! These newtypes prevent mixing different ID types at compile time.
//! For example, you cannot pass a `UserId` where an `AccountId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, sqlx::Type, utoipa::ToSchema,
        )]
        #[sqlx(transparent)]
        #[serde(transparent)]
        #[schema(value_type = String)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_type!(
    /// User identifier (one storage partition per user)
    UserId
);
id_type!(
    /// Calendar account identifier (OAuth or ICS feed)
    AccountId
);
id_type!(
    /// Canonical event identifier (stable across provider syncs and upgrades)
    EventId
);
id_type!(
    /// Scheduling constraint identifier
    ConstraintId
);
id_type!(
    /// VIP policy identifier
    VipId
);
id_type!(
    /// Time allocation identifier
    AllocationId
);
id_type!(
    /// Client-hour commitment identifier
    CommitmentId
);
id_type!(
    /// Onboarding session identifier
    SessionId
);
