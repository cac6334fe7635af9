//! The interchange format piped between bake and the commands it spawns.
//!
//! Line-oriented, with two statement shapes:
//! - `NAME COMMAND` assigns `COMMAND` as the value of symbol `NAME`,
//!   creating it if absent. A non-empty command installs the default
//!   build callback. The command may contain here-doc sentinels, in
//!   which case the statement spans the body lines too.
//! - `DEP / TARGET` declares that `TARGET` depends on `DEP`. Missing
//!   symbols are created with an empty value and no callback.
//!
//! End of stream, or a blank line, terminates an augmentation. Symbols
//! are emitted in build order, so a dependency statement always names
//! symbols an earlier assignment created.

use std::io::{BufRead, Write};

use tracing::debug;

use bake_dep::DepSystem;

use crate::error::BakeError;
use crate::scan::get_command;
use crate::spawn::{build_callback, WaitQueue};

/// Whether augmentation statements may touch `../`-prefixed names.
///
/// Bakefile commands must stay inside the working directory; the graph a
/// parent invocation pipes into a `--sub` child legitimately crosses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  Enforce,
  Trust,
}

/// Write `deps` to `out` in interchange format, rewriting every symbol
/// name through `mutate`.
pub fn output_depsystem<W: Write>(
  out: &mut W,
  deps: &DepSystem,
  mutate: &dyn Fn(&str) -> String,
) -> Result<(), BakeError> {
  for symbol in deps.get_symbols()? {
    let value = deps.get_value(&symbol)?;
    if value.is_empty() {
      writeln!(out, "{}", mutate(&symbol))?;
    } else {
      writeln!(out, "{} {}", mutate(&symbol), value)?;
    }
    for dep in deps.get_dependency_edges(&symbol)? {
      writeln!(out, "{} / {}", mutate(&dep), mutate(&symbol))?;
    }
  }
  Ok(())
}

/// Apply interchange statements from `input` to `deps`, rewriting every
/// symbol name through `mutate`.
pub fn augment_depsystem<R: BufRead>(
  input: &mut R,
  deps: &mut DepSystem,
  mutate: &dyn Fn(&str) -> String,
  queue: &WaitQueue,
  scope: Scope,
) -> Result<(), BakeError> {
  loop {
    let Some(statement) = get_command(input)? else {
      break;
    };
    if statement.is_empty() {
      break;
    }
    let tokens: Vec<&str> = statement.split_whitespace().collect();
    let Some(&first) = tokens.first() else {
      continue;
    };

    if tokens.len() >= 2 && tokens[1] == "/" {
      if tokens.len() != 3 {
        return Err(BakeError::InvalidDependencySpecification { line: statement });
      }
      let dep = mutate(first);
      let target = mutate(tokens[2]);
      debug!(dep = %dep, target = %target, "dependency statement");
      add_if_absent(deps, &dep, scope)?;
      add_if_absent(deps, &target, scope)?;
      if scope == Scope::Enforce && target.starts_with("../") && !deps.has_dependency(&target, &dep)? {
        return Err(BakeError::OutOfScopeDependency { name: target });
      }
      deps.add_dependency(&target, &dep)?;
    } else {
      let name = mutate(first);
      let rest = statement.strip_prefix(first).unwrap_or("");
      let value = rest.strip_prefix([' ', '\t']).unwrap_or(rest);
      debug!(symbol = %name, "assignment statement");
      deps.add_set_symbol(&name, value)?;
      if !value.is_empty() {
        deps.set_callback(&name, build_callback(queue.clone()))?;
      }
    }
  }
  Ok(())
}

fn add_if_absent(deps: &mut DepSystem, name: &str, scope: Scope) -> Result<(), BakeError> {
  if deps.has_symbol(name) {
    return Ok(());
  }
  if scope == Scope::Enforce && name.starts_with("../") {
    return Err(BakeError::OutOfScopeDependency {
      name: name.to_string(),
    });
  }
  deps.add_set_symbol(name, "")?;
  Ok(())
}
