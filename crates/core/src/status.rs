//! Status enum mapping to the SMALLINT `task_statuses` lookup table.
//!
//! Each variant's discriminant matches the seed data order (1-based) in
//! the `task_statuses` table; the string form is what API clients see.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in seed-data order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// Lowercase label used on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Task lifecycle status.
    TaskStatus {
        Pending = 1 => "pending",
        Processing = 2 => "processing",
        Running = 3 => "running",
        Success = 4 => "success",
        Failed = 5 => "failed",
        Cancelled = 6 => "cancelled",
    }
}

/// Statuses that count against the concurrency limit.
pub const ACTIVE_STATUSES: [TaskStatus; 2] = [TaskStatus::Processing, TaskStatus::Running];

/// Statuses with no further transitions.
pub const TERMINAL_STATUSES: [TaskStatus; 3] =
    [TaskStatus::Success, TaskStatus::Failed, TaskStatus::Cancelled];

impl TaskStatus {
    /// `true` for `processing` and `running`.
    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    /// `true` for `success`, `failed`, and `cancelled`.
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }
}
