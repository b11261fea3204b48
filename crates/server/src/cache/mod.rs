//! Cache coordination state.
//!
//! [`CacheRegistry`] is the single owner of which paths are available,
//! busy or purge-pending, and of the [`AccessRecencyTracker`].

pub mod recency;
pub mod registry;

pub use recency::{AccessEntry, AccessRecencyTracker, RecencyIter};
pub use registry::{BusyClaim, CacheError, CacheRegistry};
