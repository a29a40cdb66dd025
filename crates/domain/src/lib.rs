//! Shared domain types for the sage memory service.
//!
//! Every other crate in the workspace depends on this one: the value
//! types that cross component boundaries (turns, tool calls, hook
//! records, stored memories, query contexts), the workspace-wide
//! error type, and configuration.

pub mod config;
pub mod error;
pub mod hook;
pub mod memory;
pub mod project;
pub mod query;
pub mod turn;

pub use error::{Error, ProviderErrorKind, Result};
