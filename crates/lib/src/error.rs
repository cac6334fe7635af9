//! Error types for Bakefile orchestration.

use std::io;

use thiserror::Error;

use bake_dep::DepError;

use crate::scan::ScanError;

/// Errors that can occur while running a Bakefile.
#[derive(Debug, Error)]
pub enum BakeError {
  /// Dependency system failure.
  #[error(transparent)]
  Dep(#[from] DepError),

  /// Command scanning failure.
  #[error(transparent)]
  Scan(#[from] ScanError),

  /// The Bakefile could not be opened.
  #[error("cannot open Bakefile {path}")]
  BakefileOpen {
    path: String,
    #[source]
    source: io::Error,
  },

  /// An interchange dependency statement had the wrong shape.
  #[error("invalid dependency specification: {line:?}")]
  InvalidDependencySpecification { line: String },

  /// An augmentation tried to create a symbol, or add a new dependency
  /// to a symbol, outside the working directory.
  #[error("{name}: outside working directory")]
  OutOfScopeDependency { name: String },

  /// A build callback was invoked for a symbol with no command.
  #[error("{symbol}: no rule to build target")]
  NoRule { symbol: String },

  /// A build command exited abnormally.
  #[error("{symbol}: build failure")]
  BuildFailure { symbol: String },

  /// A Bakefile command was terminated by a signal.
  #[error("{command}: terminated by signal {signal}")]
  ChildSignalled { command: String, signal: i32 },

  /// A Bakefile command exited with a non-zero status.
  #[error("{command}: exited with status {code}")]
  ChildNonZero { command: String, code: i32 },

  /// A build command exited cleanly but did not touch its target.
  #[error("{symbol}: build completed without modifying its target")]
  NoOutputProduced { symbol: String },

  /// The `--sub` argument does not name a directory.
  #[error("{path}: not a directory")]
  NotADirectory { path: String },

  /// A child process could not be started.
  #[error("cannot execute {command:?}")]
  Spawn {
    command: String,
    #[source]
    source: io::Error,
  },

  /// Other I/O failure.
  #[error(transparent)]
  Io(#[from] io::Error),
}
