//! Error types for the dependency system.

use std::error::Error;

use thiserror::Error;

/// Errors that can occur while manipulating a [`DepSystem`].
///
/// [`DepSystem`]: crate::system::DepSystem
#[derive(Debug, Error)]
pub enum DepError {
  /// An operation named a symbol that does not exist.
  #[error("no such symbol: {0}")]
  NoSuchSymbol(String),

  /// A dependency edge was expected between two symbols but is absent.
  #[error("no dependency from {from} to {to}")]
  NoSuchDependency { from: String, to: String },

  /// A dependency list index is out of range for its symbol.
  #[error("dependency list index {index} out of range for {symbol}")]
  IndexOutOfRange { symbol: String, index: usize },

  /// The requested edge or list would make the graph cyclic. The system
  /// is left untouched.
  #[error("cyclic dependency: {from} / {to}")]
  CyclicDependency { from: String, to: String },

  /// A build plan was requested for a symbol with an invalid symbol
  /// among its dependencies.
  #[error("{0}: unbuildable symbol in build plan")]
  Unbuildable(String),

  /// A symbol's build callback reported failure.
  #[error("building {symbol} failed")]
  Callback {
    symbol: String,
    #[source]
    source: Box<dyn Error + Send + Sync>,
  },

  /// A serialized dump did not follow the expected structure.
  #[error("malformed dependency dump: {0}")]
  MalformedDump(String),

  /// I/O failure while reading or writing a dump.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}
