//! Durable task store for the nightshift daemon.
//!
//! A single SQLite file (WAL mode) holds the task queue. This crate owns the
//! schema, the connection pool, and every SQL statement; the lifecycle
//! semantics built on top live in `nightshift-core`.

pub mod config;
pub mod migrate;
pub mod models;
pub mod pool;
pub mod queries;
