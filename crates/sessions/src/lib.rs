//! Ordered conversational session log with token-budget-triggered
//! compaction, plus the pluggable persistence interface it writes through.

pub mod persistence;
pub mod store;

pub use persistence::{InMemoryPersistence, SessionPersistence};
pub use store::SessionStore;
