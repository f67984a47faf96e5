//! Passive memcache traffic analyzer.
//!
//! Captured frames are sharded across a fixed pool of workers, reconstructed
//! into memcache commands, and every response feeds a per-key rate table that
//! a reporter renders periodically.

pub mod backoff;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod parser;
pub mod report;
pub mod sniff;
pub mod stats;

pub use error::{Error, Result};
