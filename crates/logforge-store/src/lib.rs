//! logforge-store — pluggable storage backends for Logforge.
//!
//! Backends:
//! - [`memory`] — in-memory rows + checkpoints (dev/testing, no persistence)
//! - [`sqlite`] — SQLite checkpoint persistence via `sqlx` (feature: `sqlite`)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
