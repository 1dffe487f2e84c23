//! Table modules - extend Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks for one table.

mod channel_rules; // channel_rules
mod channels;      // channels
pub mod messages;  // messages (+ link-overlap upsert, dedup)
