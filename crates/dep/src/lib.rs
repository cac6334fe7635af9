//! bake-dep: the dependency system behind bake.
//!
//! This crate provides the in-memory dependency graph the orchestrator
//! grows while executing a Bakefile:
//! - `DepSystem`: named symbols, dependency edges, ordered dependency
//!   lists with shadowing, and build states
//! - `SymbolState`: the five-state staleness model
//! - build planning and topological traversal
//! - a sentinel-delimited dump format for writing a whole system to a
//!   stream and reading it back
//!
//! The crate is a pure data structure: process spawning, the interchange
//! pipe protocol, and filesystem staleness live in `bake-lib`.

pub mod error;
pub mod serial;
pub mod state;
pub mod system;

pub use error::DepError;
pub use state::SymbolState;
pub use system::{BuildCallback, DepSystem};
