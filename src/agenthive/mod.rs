// src/agenthive/mod.rs

pub mod client;
pub mod clients;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod export;
pub mod gateway;
pub mod hive;
pub mod pool;
pub mod protection;
pub mod roundtable;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod tool_protocol;
pub mod tools;

// Explicitly export the root handle so callers reach it as agenthive::Hive
// instead of agenthive::agenthive::hive::Hive.
pub use hive::Hive;
