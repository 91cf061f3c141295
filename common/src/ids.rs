use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! index_id {
    ($name:ident, $repr:ty) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const fn new(value: $repr) -> Self {
                $name(value)
            }

            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                $name(value)
            }
        }
    };
}

// ModelId is assigned once, at registration, and never reused even after
// UnregisterModel -- the analyzer/estimator caches are keyed on it.
index_id!(ModelId, u32);

// WorkerId is a dense index into the engine's worker vector; the engine
// never has more workers than it was configured with, so plain `usize`
// semantics (no sentinel) are enough. `Job::target_worker_id` uses
// `Option<WorkerId>` in place of the original's `-1` sentinel.
index_id!(WorkerId, usize);

// Assigned on JobId on enqueue and used (mod NUM_FINISHED_RECORDS) as the
// finished-jobs ring index.
index_id!(JobId, u64);

index_id!(CallbackId, u32);
