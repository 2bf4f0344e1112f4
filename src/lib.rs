//! txcache: per-entry lifecycle state machine and wait protocol for a
//! node-local transactional data store cache.
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod entry;
pub mod error;
pub mod key;
pub mod table;

pub mod prelude;
