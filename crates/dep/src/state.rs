//! Symbol build states.

use std::fmt;

/// Build state of a symbol.
///
/// `Disabled` means "valid, but unable to be regenerated from its
/// dependencies": a plain value write superseded a symbol that still has
/// dependencies. `Invalid` is `Disabled` plus `Stale` — the symbol is
/// neither fresh nor rebuildable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolState {
  NonBuilt,
  Disabled,
  Stale,
  Invalid,
  Valid,
}

impl SymbolState {
  /// Stable ordinal used by the dump format.
  pub fn ordinal(self) -> u8 {
    match self {
      SymbolState::NonBuilt => 0,
      SymbolState::Disabled => 1,
      SymbolState::Stale => 2,
      SymbolState::Invalid => 3,
      SymbolState::Valid => 4,
    }
  }

  /// Inverse of [`SymbolState::ordinal`].
  pub fn from_ordinal(ordinal: u8) -> Option<SymbolState> {
    match ordinal {
      0 => Some(SymbolState::NonBuilt),
      1 => Some(SymbolState::Disabled),
      2 => Some(SymbolState::Stale),
      3 => Some(SymbolState::Invalid),
      4 => Some(SymbolState::Valid),
      _ => None,
    }
  }
}

impl fmt::Display for SymbolState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SymbolState::NonBuilt => "non-built",
      SymbolState::Disabled => "disabled",
      SymbolState::Stale => "stale",
      SymbolState::Invalid => "invalid",
      SymbolState::Valid => "valid",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ordinals_round_trip() {
    for state in [
      SymbolState::NonBuilt,
      SymbolState::Disabled,
      SymbolState::Stale,
      SymbolState::Invalid,
      SymbolState::Valid,
    ] {
      assert_eq!(SymbolState::from_ordinal(state.ordinal()), Some(state));
    }
  }

  #[test]
  fn unknown_ordinal_is_rejected() {
    assert_eq!(SymbolState::from_ordinal(5), None);
  }
}
