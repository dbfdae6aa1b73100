//! Core types and trait definitions for the Sage runtime-control engine.
//!
//! This crate is deliberately free of HTTP and database dependencies; the
//! store trait, resolver, governor, bridge engine and router all live here
//! and are exercised by every other crate.

pub mod audit;
pub mod bridge;
pub mod error;
pub mod flag;
pub mod governor;
pub mod module;
pub mod profile;
pub mod resolver;
pub mod router;
pub mod snapshot;
pub mod state;
pub mod store;

pub use error::{Error, Result};
