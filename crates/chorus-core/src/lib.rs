//! # chorus-core
//!
//! Core types, capability traits, queues, configuration, and error handling
//! shared by every Chorus crate.

pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod prompt;
pub mod queue;
pub mod registry;
pub mod task;
pub mod traits;

pub use config::shellexpand;
