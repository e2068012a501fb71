//! Runner adapter interface for conversational coding agents.
//!
//! This module defines the [`Runner`] trait the executor drives, the wire
//! types shared by every implementation ([`Message`], [`Part`], [`Todo`]),
//! and the two concrete adapters: [`HttpRunner`] (in-process client against
//! an agent server) and [`CliRunner`] (subprocess around an agent CLI).
//! The executor never inspects which one it holds.

pub mod cli;
pub mod http;
pub mod trait_def;
pub mod types;

pub use cli::CliRunner;
pub use http::HttpRunner;
pub use trait_def::Runner;
pub use types::{Message, Part, Role, RunnerError, SessionStatus, Todo, TodoStatus};
