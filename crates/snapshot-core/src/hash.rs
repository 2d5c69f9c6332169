//! Hashing for child keys and stylesheet scope ids.

use core::hash::Hash;
use std::hash::Hasher;

#[cfg(feature = "std-hash")]
pub mod default {
    pub use std::collections::hash_map::DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
pub mod default {
    pub use ahash::AHasher as DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// Hash a single value with whichever hasher the `std-hash` feature selects.
#[inline]
pub fn hash_one<T: Hash>(v: &T) -> u64 {
    let mut h = default::new();
    v.hash(&mut h);
    h.finish()
}

/// Stable-within-process scope id for a template's stylesheet, derived from
/// the bundle entry and the template's compile-time css id.
pub fn css_scope_id(entry: Option<&str>, css_id: u32) -> u64 {
    hash_one(&(entry.unwrap_or_default(), css_id))
}
