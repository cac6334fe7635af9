//! Sentinel-delimited dump of a whole dependency system.
//!
//! The format is line-oriented: every field is written verbatim (names
//! and values may span multiple lines) followed by a `%%%END...%%%`
//! terminator line. Symbols come first, then the shadower pairs.
//! Callbacks are not serialized.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use petgraph::Direction;

use crate::error::DepError;
use crate::state::SymbolState;
use crate::system::{DepSystem, Symbol};

const END_SYMBOLS: &str = "%%%ENDSYMBOLS%%%";
const END_SHADOWER: &str = "%%%ENDSHADOWER%%%";
const END_SHADOWEE: &str = "%%%ENDSHADOWEE%%%";
const END_SHADOWERS: &str = "%%%ENDSHADOWERS%%%";
const END_SYM_NAME: &str = "%%%ENDSYMNAME%%%";
const END_SYM_VALUE: &str = "%%%ENDSYMVALUE%%%";
const END_SYM_STATE: &str = "%%%ENDSYMSTATE%%%";
const END_DEP_EDGE: &str = "%%%ENDDEPEDGE%%%";
const END_DEP_EDGES: &str = "%%%ENDDEPEDGES%%%";
const END_REV_DEP_EDGE: &str = "%%%ENDREVDEPEDGE%%%";
const END_REV_DEP_EDGES: &str = "%%%ENDREVDEPEDGES%%%";
const END_DEP_LIST_ITEM: &str = "%%%ENDDEPLISTITEM%%%";
const END_DEP_LIST: &str = "%%%ENDDEPLIST%%%";
const END_DEP_LIST_LIST: &str = "%%%ENDDEPLISTLIST%%%";
const END_REV_DEP: &str = "%%%ENDREVDEP%%%";
const END_REV_DEP_LIST: &str = "%%%ENDREVDEPLIST%%%";
const END_SYMBOL: &str = "%%%ENDSYMBOL%%%";

impl DepSystem {
  /// Write the whole system to `out` in dump format.
  pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), DepError> {
    for idx in self.graph.node_indices() {
      let symbol = &self.graph[idx];
      write_field(out, &symbol.name, END_SYM_NAME)?;
      write_field(out, &symbol.value, END_SYM_VALUE)?;
      write_field(out, &symbol.state.ordinal().to_string(), END_SYM_STATE)?;

      for dep in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        write_field(out, &self.graph[dep].name, END_DEP_EDGE)?;
      }
      writeln!(out, "{END_DEP_EDGES}")?;

      for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
        write_field(out, &self.graph[dependent].name, END_REV_DEP_EDGE)?;
      }
      writeln!(out, "{END_REV_DEP_EDGES}")?;

      for list in &symbol.dependency_lists {
        for item in list {
          write_field(out, item, END_DEP_LIST_ITEM)?;
        }
        writeln!(out, "{END_DEP_LIST}")?;
      }
      writeln!(out, "{END_DEP_LIST_LIST}")?;

      for owner in &symbol.list_owners {
        write_field(out, owner, END_REV_DEP)?;
      }
      writeln!(out, "{END_REV_DEP_LIST}")?;

      writeln!(out, "{END_SYMBOL}")?;
    }
    writeln!(out, "{END_SYMBOLS}")?;

    for (shadower, owners) in &self.shadowers {
      for owner in owners {
        writeln!(out, "{shadower}")?;
        writeln!(out, "{END_SHADOWER}")?;
        writeln!(out, "{owner}")?;
        writeln!(out, "{END_SHADOWEE}")?;
      }
    }
    writeln!(out, "{END_SHADOWERS}")?;
    Ok(())
  }

  /// Read a system previously written with [`DepSystem::write_to`].
  pub fn read_from<R: BufRead>(input: &mut R) -> Result<DepSystem, DepError> {
    let mut lines = LineReader::new(input);
    let mut records = Vec::new();
    loop {
      let at_end = match lines.peek()? {
        None => return Err(unexpected_eof()),
        Some(line) => line == END_SYMBOLS,
      };
      if at_end {
        lines.next()?;
        break;
      }
      records.push(read_symbol(&mut lines)?);
    }

    let mut shadowers: HashMap<String, Vec<String>> = HashMap::new();
    loop {
      let line = lines.next()?.ok_or_else(unexpected_eof)?;
      if line == END_SHADOWERS {
        break;
      }
      let shadower = join_lines(line, read_field(&mut lines, END_SHADOWER)?);
      let owner = read_field(&mut lines, END_SHADOWEE)?;
      shadowers.entry(shadower).or_default().push(owner);
    }

    let mut system = DepSystem::new();
    for record in &records {
      let idx = system.graph.add_node(Symbol {
        name: record.name.clone(),
        value: record.value.clone(),
        state: record.state,
        callback: None,
        dependency_lists: record.dependency_lists.clone(),
        list_owners: record.list_owners.iter().cloned().collect(),
      });
      system.index.insert(record.name.clone(), idx);
    }
    for record in &records {
      let from = system.index[&record.name];
      for dep in &record.dependency_edges {
        let Some(&to) = system.index.get(dep) else {
          return Err(DepError::MalformedDump(format!(
            "{} depends on unknown symbol {dep}",
            record.name
          )));
        };
        system.graph.update_edge(from, to, ());
      }
    }
    system.shadowers = shadowers;
    Ok(system)
  }
}

struct SymbolRecord {
  name: String,
  value: String,
  state: SymbolState,
  dependency_edges: Vec<String>,
  dependency_lists: Vec<Vec<String>>,
  list_owners: Vec<String>,
}

fn read_symbol<R: BufRead>(lines: &mut LineReader<'_, R>) -> Result<SymbolRecord, DepError> {
  let name = read_field(lines, END_SYM_NAME)?;
  let value = read_field(lines, END_SYM_VALUE)?;
  let state_text = read_field(lines, END_SYM_STATE)?;
  let state = state_text
    .parse::<u8>()
    .ok()
    .and_then(SymbolState::from_ordinal)
    .ok_or_else(|| DepError::MalformedDump(format!("bad state {state_text:?} for symbol {name:?}")))?;

  let dependency_edges = read_items(lines, END_DEP_EDGE, END_DEP_EDGES)?;
  // Reverse edges are recorded redundantly; the graph restores them from
  // the forward direction.
  read_items(lines, END_REV_DEP_EDGE, END_REV_DEP_EDGES)?;
  let dependency_lists = read_lists(lines)?;
  let list_owners = read_items(lines, END_REV_DEP, END_REV_DEP_LIST)?;

  let line = lines.next()?.ok_or_else(unexpected_eof)?;
  if line != END_SYMBOL {
    return Err(DepError::MalformedDump(format!(
      "expected {END_SYMBOL}, found {line:?}"
    )));
  }
  Ok(SymbolRecord {
    name,
    value,
    state,
    dependency_edges,
    dependency_lists,
    list_owners,
  })
}

/// Collect lines up to (not including) `terminus`, joined with newlines.
fn read_field<R: BufRead>(lines: &mut LineReader<'_, R>, terminus: &str) -> Result<String, DepError> {
  let mut field = String::new();
  let mut first = true;
  loop {
    let line = lines.next()?.ok_or_else(unexpected_eof)?;
    if line == terminus {
      return Ok(field);
    }
    if !first {
      field.push('\n');
    }
    field.push_str(&line);
    first = false;
  }
}

/// Read `item_terminus`-terminated entries until `list_terminus`.
fn read_items<R: BufRead>(
  lines: &mut LineReader<'_, R>,
  item_terminus: &str,
  list_terminus: &str,
) -> Result<Vec<String>, DepError> {
  let mut items = Vec::new();
  loop {
    let line = lines.next()?.ok_or_else(unexpected_eof)?;
    if line == list_terminus {
      return Ok(items);
    }
    let rest = read_field(lines, item_terminus)?;
    items.push(join_lines(line, rest));
  }
}

fn read_lists<R: BufRead>(lines: &mut LineReader<'_, R>) -> Result<Vec<Vec<String>>, DepError> {
  let mut lists = Vec::new();
  let mut current = Vec::new();
  loop {
    let line = lines.next()?.ok_or_else(unexpected_eof)?;
    match line.as_str() {
      END_DEP_LIST_LIST => return Ok(lists),
      END_DEP_LIST => lists.push(std::mem::take(&mut current)),
      _ => {
        let rest = read_field(lines, END_DEP_LIST_ITEM)?;
        current.push(join_lines(line, rest));
      }
    }
  }
}

fn join_lines(first: String, rest: String) -> String {
  if rest.is_empty() {
    first
  } else {
    format!("{first}\n{rest}")
  }
}

fn write_field<W: Write>(out: &mut W, field: &str, terminus: &str) -> Result<(), DepError> {
  writeln!(out, "{field}")?;
  writeln!(out, "{terminus}")?;
  Ok(())
}

fn unexpected_eof() -> DepError {
  DepError::MalformedDump("unexpected end of input".to_string())
}

/// Buffered line reader with one line of lookahead.
struct LineReader<'a, R: BufRead> {
  input: &'a mut R,
  peeked: Option<Option<String>>,
}

impl<'a, R: BufRead> LineReader<'a, R> {
  fn new(input: &'a mut R) -> Self {
    Self { input, peeked: None }
  }

  fn peek(&mut self) -> Result<Option<&str>, DepError> {
    if self.peeked.is_none() {
      self.peeked = Some(self.read()?);
    }
    match &self.peeked {
      Some(Some(line)) => Ok(Some(line.as_str())),
      _ => Ok(None),
    }
  }

  fn next(&mut self) -> Result<Option<String>, DepError> {
    match self.peeked.take() {
      Some(line) => Ok(line),
      None => self.read(),
    }
  }

  fn read(&mut self) -> Result<Option<String>, DepError> {
    let mut line = String::new();
    if self.input.read_line(&mut line)? == 0 {
      return Ok(None);
    }
    if line.ends_with('\n') {
      line.pop();
      if line.ends_with('\r') {
        line.pop();
      }
    }
    Ok(Some(line))
  }
}
