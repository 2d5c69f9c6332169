//! Map/set aliases shared by the instance arena, the template registry,
//! list bookkeeping and commit bookkeeping.
//!
//! The default build uses `hashbrown`. Enabling `std-hash` swaps these
//! aliases and the hasher in [`crate::hash`] for the standard library's, so
//! every id-keyed map in the crate changes together without touching call
//! sites.

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use hashbrown::{HashMap, HashSet};
}
