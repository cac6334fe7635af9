//! bake-lib: Bakefile orchestration for bake.
//!
//! This crate binds the dependency system from `bake-dep` to the outside
//! world:
//! - `scan`: tokenizes Bakefile commands, including here-doc sentinels
//! - `interchange`: the line-oriented format piped between bake and the
//!   commands it spawns
//! - `subdir`: symbol-name rewriting across the sub-directory boundary
//! - `spawn`: child process plumbing and the build wait queue
//! - `orchestrate`: the Bakefile loop, staleness pass, and build rounds

pub mod error;
pub mod interchange;
pub mod orchestrate;
pub mod scan;
pub mod spawn;
pub mod subdir;

pub use error::BakeError;
pub use orchestrate::{bake, bake_sub, BakeOptions, SubOptions};
