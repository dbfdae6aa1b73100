//! SQLite backend for the Sage runtime-control store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Governed mutations write
//! their audit rows inside the same transaction as the state change, and
//! the bridge claim runs in an immediate (write-locking) transaction — the
//! SQLite equivalent of a `SELECT … FOR UPDATE` row lock.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
