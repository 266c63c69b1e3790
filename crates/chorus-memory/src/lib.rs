//! # chorus-memory
//!
//! Persistent store for Chorus (SQLite-backed).

pub mod store;

pub use store::Store;
