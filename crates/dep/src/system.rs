//! The in-memory dependency system.
//!
//! A [`DepSystem`] maps unique names to symbols. A symbol carries an
//! opaque value (usually a build command), a [`SymbolState`], a set of
//! dependency edges, and any number of *ordered dependency lists*. In an
//! ordered list the first name that currently exists acts as the
//! dependency; earlier, nonexistent names are tracked as *shadowers* so
//! that creating one of them later re-binds the list to the more
//! specific symbol.
//!
//! Storage is a stable graph plus a name index: symbol records are graph
//! node weights, dependency edges are graph edges (`a -> b` meaning "a
//! depends on b"), and reverse edges are the incoming direction. Edges
//! implied by dependency lists are never materialized; traversal and
//! cycle detection resolve each list's active element on the fly.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::rc::Rc;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::error::DepError;
use crate::state::SymbolState;

/// Action invoked when a symbol is rebuilt, receiving the symbol name
/// and its value. Callbacks are never serialized.
pub type BuildCallback = Rc<dyn Fn(&str, &str) -> Result<(), Box<dyn Error + Send + Sync>>>;

/// A named node: a build target or an abstract dependency hub.
#[derive(Clone)]
pub(crate) struct Symbol {
  pub(crate) name: String,
  pub(crate) value: String,
  pub(crate) state: SymbolState,
  pub(crate) callback: Option<BuildCallback>,
  /// Ordered dependency lists owned by this symbol.
  pub(crate) dependency_lists: Vec<Vec<String>>,
  /// Names of symbols owning a dependency list currently satisfied by
  /// this symbol.
  pub(crate) list_owners: HashSet<String>,
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Symbol")
      .field("name", &self.name)
      .field("value", &self.value)
      .field("state", &self.state)
      .field("callback", &self.callback.is_some())
      .field("dependency_lists", &self.dependency_lists)
      .field("list_owners", &self.list_owners)
      .finish()
  }
}

/// The dependency system.
///
/// All operations keep the graph acyclic and the shadower bookkeeping
/// consistent; operations that would introduce a cycle fail with
/// [`DepError::CyclicDependency`] and leave the system untouched.
#[derive(Debug, Clone, Default)]
pub struct DepSystem {
  pub(crate) graph: StableDiGraph<Symbol, ()>,
  pub(crate) index: HashMap<String, NodeIndex>,
  /// Nonexistent names that would shadow the active element of some
  /// owner's dependency list, mapped to those owners.
  pub(crate) shadowers: HashMap<String, Vec<String>>,
}

impl DepSystem {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether a symbol with this name exists.
  pub fn has_symbol(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// The symbol's value.
  pub fn get_value(&self, name: &str) -> Result<String, DepError> {
    let idx = self.node(name)?;
    Ok(self.graph[idx].value.clone())
  }

  /// Insert a symbol, or update an existing one's value.
  ///
  /// A new symbol starts `Valid`. If it was registered as a shadower, it
  /// takes over every dependency list it now satisfies from the element
  /// it shadows. An updated symbol becomes `Disabled` when it has any
  /// dependency edge or satisfied dependency list (its value can no
  /// longer be regenerated from them), `Valid` otherwise. Both paths
  /// invalidate dependents; setting the current value again is a no-op.
  pub fn add_set_symbol(&mut self, name: &str, value: &str) -> Result<(), DepError> {
    if let Some(&idx) = self.index.get(name) {
      if self.graph[idx].value == value {
        return Ok(());
      }
      let has_edges = self
        .graph
        .neighbors_directed(idx, Direction::Outgoing)
        .next()
        .is_some();
      let has_active_list = self.graph[idx]
        .dependency_lists
        .iter()
        .any(|list| self.active_element(list).is_some());
      let symbol = &mut self.graph[idx];
      symbol.value = value.to_string();
      symbol.state = if has_edges || has_active_list {
        SymbolState::Disabled
      } else {
        SymbolState::Valid
      };
      return self.invalidate_dependents(name);
    }

    // Insert path: steal every dependency list this name now satisfies
    // from the element it was registered to shadow.
    let mut list_owners = HashSet::new();
    if let Some(owners) = self.shadowers.remove(name) {
      for owner in owners {
        let owner_idx = self.node(&owner)?;
        let lists = self.graph[owner_idx].dependency_lists.clone();
        for list in &lists {
          let first = list
            .iter()
            .position(|candidate| candidate.as_str() == name || self.index.contains_key(candidate));
          let Some(position) = first else { continue };
          if list[position] != name {
            continue;
          }
          if let Some(shadowed) = list[position + 1..]
            .iter()
            .find(|candidate| self.index.contains_key(*candidate))
          {
            let shadowed_idx = self.node(shadowed)?;
            self.graph[shadowed_idx].list_owners.remove(&owner);
          }
          list_owners.insert(owner.clone());
        }
      }
    }

    let idx = self.graph.add_node(Symbol {
      name: name.to_string(),
      value: value.to_string(),
      state: SymbolState::Valid,
      callback: None,
      dependency_lists: Vec::new(),
      list_owners,
    });
    self.index.insert(name.to_string(), idx);
    self.invalidate_dependents(name)
  }

  /// Delete a symbol and every edge touching it.
  ///
  /// For each dependency list the symbol satisfied, every name from its
  /// first occurrence in the list up to the next existing element is
  /// re-registered as a shadower, so re-creating any of them re-binds
  /// the list. Shadower entries owned by the deleted symbol are dropped.
  pub fn delete_symbol(&mut self, name: &str) -> Result<(), DepError> {
    let idx = self.node(name)?;
    let removed = self
      .graph
      .remove_node(idx)
      .ok_or_else(|| DepError::NoSuchSymbol(name.to_string()))?;
    self.index.remove(name);

    for owner in &removed.list_owners {
      let owner_idx = self.node(owner)?;
      let lists = self.graph[owner_idx].dependency_lists.clone();
      for list in &lists {
        let Some(start) = list.iter().position(|candidate| candidate.as_str() == name) else {
          continue;
        };
        for candidate in &list[start..] {
          if self.index.contains_key(candidate) {
            break;
          }
          self
            .shadowers
            .entry(candidate.clone())
            .or_default()
            .push(owner.clone());
        }
      }
    }

    // Detach from the active element of each list the deleted symbol
    // itself owned.
    for list in &removed.dependency_lists {
      if let Some(active) = self.active_element(list) {
        self.graph[active].list_owners.remove(name);
      }
    }

    for owners in self.shadowers.values_mut() {
      owners.retain(|owner| owner.as_str() != name);
    }
    self.shadowers.retain(|_, owners| !owners.is_empty());
    Ok(())
  }

  /// Drop every symbol and all shadower bookkeeping.
  pub fn clear(&mut self) {
    self.graph.clear();
    self.index.clear();
    self.shadowers.clear();
  }

  pub fn get_state(&self, name: &str) -> Result<SymbolState, DepError> {
    let idx = self.node(name)?;
    Ok(self.graph[idx].state)
  }

  /// Set a symbol's state directly. No dependency processing happens.
  pub fn set_state(&mut self, name: &str, state: SymbolState) -> Result<(), DepError> {
    let idx = self.node(name)?;
    self.graph[idx].state = state;
    Ok(())
  }

  /// The subsequence of `names` whose state is one of `states`.
  pub fn select_syms_with_states(
    &self,
    names: &[String],
    states: &[SymbolState],
  ) -> Result<Vec<String>, DepError> {
    let mut selected = Vec::new();
    for name in names {
      let idx = self.node(name)?;
      if states.contains(&self.graph[idx].state) {
        selected.push(name.clone());
      }
    }
    Ok(selected)
  }

  /// Attach a build callback to a symbol.
  pub fn set_callback(&mut self, name: &str, callback: BuildCallback) -> Result<(), DepError> {
    let idx = self.node(name)?;
    self.graph[idx].callback = Some(callback);
    Ok(())
  }

  /// Add a dependency edge: `from` depends on `to`. Fails without
  /// modifying the system if the edge would make the graph cyclic.
  pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), DepError> {
    let from_idx = self.node(from)?;
    let to_idx = self.node(to)?;
    if self.reaches(to_idx, from_idx) {
      return Err(DepError::CyclicDependency {
        from: from.to_string(),
        to: to.to_string(),
      });
    }
    self.graph.update_edge(from_idx, to_idx, ());
    Ok(())
  }

  /// Whether a direct dependency edge exists from `from` to `to`.
  pub fn has_dependency(&self, from: &str, to: &str) -> Result<bool, DepError> {
    let from_idx = self.node(from)?;
    let to_idx = self.node(to)?;
    Ok(self.graph.find_edge(from_idx, to_idx).is_some())
  }

  /// Remove the dependency edge from `from` to `to`.
  pub fn delete_dependency(&mut self, from: &str, to: &str) -> Result<(), DepError> {
    let from_idx = self.node(from)?;
    let to_idx = self.node(to)?;
    let edge = self
      .graph
      .find_edge(from_idx, to_idx)
      .ok_or_else(|| DepError::NoSuchDependency {
        from: from.to_string(),
        to: to.to_string(),
      })?;
    self.graph.remove_edge(edge);
    Ok(())
  }

  /// Attach an ordered dependency list to `to`.
  ///
  /// Nonexistent names before the first existing element are registered
  /// as shadowers; the first existing element (if any) records `to` as a
  /// list owner. Fails without modifying the system if the implied edge
  /// would make the graph cyclic.
  pub fn add_dependency_list(&mut self, list: &[String], to: &str) -> Result<(), DepError> {
    let to_idx = self.node(to)?;
    let active = self.active_element(list);
    if let Some(active_idx) = active {
      if self.reaches(active_idx, to_idx) {
        return Err(DepError::CyclicDependency {
          from: to.to_string(),
          to: self.graph[active_idx].name.clone(),
        });
      }
    }
    for name in list {
      if self.index.contains_key(name) {
        break;
      }
      self
        .shadowers
        .entry(name.clone())
        .or_default()
        .push(to.to_string());
    }
    if let Some(active_idx) = active {
      self.graph[active_idx].list_owners.insert(to.to_string());
    }
    self.graph[to_idx].dependency_lists.push(list.to_vec());
    Ok(())
  }

  /// The ordered dependency lists attached to a symbol.
  pub fn get_dependency_lists(&self, name: &str) -> Result<Vec<Vec<String>>, DepError> {
    let idx = self.node(name)?;
    Ok(self.graph[idx].dependency_lists.clone())
  }

  /// Remove the dependency list at `index` from `to`.
  ///
  /// The list's active element drops `to` from its owners unless it is
  /// also the active element of another of `to`'s lists. Shadower
  /// entries registered for the removed list's prefix are left in place
  /// until the shadowed name is created or the owner is deleted.
  pub fn delete_dependency_list(&mut self, index: usize, to: &str) -> Result<(), DepError> {
    let to_idx = self.node(to)?;
    if index >= self.graph[to_idx].dependency_lists.len() {
      return Err(DepError::IndexOutOfRange {
        symbol: to.to_string(),
        index,
      });
    }
    let removed = self.graph[to_idx].dependency_lists.remove(index);
    if let Some(active_idx) = self.active_element(&removed) {
      let still_active = self.graph[to_idx]
        .dependency_lists
        .iter()
        .any(|list| self.active_element(list) == Some(active_idx));
      if !still_active {
        self.graph[active_idx].list_owners.remove(to);
      }
    }
    Ok(())
  }

  /// Dependencies of `symbol` in a buildable order, excluding `symbol`
  /// itself.
  pub fn get_dependencies(&self, symbol: &str) -> Result<Vec<String>, DepError> {
    self.get_dependencies_where(symbol, |_, _, _| true)
  }

  /// [`DepSystem::get_dependencies`] filtered by a selector over
  /// `(name, value, state)`.
  pub fn get_dependencies_where<F>(&self, symbol: &str, selector: F) -> Result<Vec<String>, DepError>
  where
    F: FnMut(&str, &str, SymbolState) -> bool,
  {
    let idx = self.node(symbol)?;
    let mut order = Vec::new();
    self.collect_dependencies(idx, &mut HashSet::new(), &mut order);
    order.pop();
    self.filter_selected(order, selector)
  }

  /// Direct dependency edges of a symbol, in no particular order.
  /// Dependency lists are not consulted.
  pub fn get_dependency_edges(&self, symbol: &str) -> Result<Vec<String>, DepError> {
    let idx = self.node(symbol)?;
    Ok(
      self
        .graph
        .neighbors_directed(idx, Direction::Outgoing)
        .map(|dep| self.graph[dep].name.clone())
        .collect(),
    )
  }

  /// Every symbol, in an order where dependencies precede dependents.
  pub fn get_symbols(&self) -> Result<Vec<String>, DepError> {
    self.get_symbols_where(|_, _, _| true)
  }

  /// [`DepSystem::get_symbols`] filtered by a selector.
  pub fn get_symbols_where<F>(&self, selector: F) -> Result<Vec<String>, DepError>
  where
    F: FnMut(&str, &str, SymbolState) -> bool,
  {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for idx in self.graph.node_indices() {
      self.collect_dependencies(idx, &mut visited, &mut order);
    }
    self.filter_selected(order, selector)
  }

  /// Symbols depending on `symbol`, directly or transitively, through
  /// edges or dependency lists, excluding `symbol` itself. The result is
  /// ordered so that anything buildable comes out in build order.
  pub fn get_dependents(&self, symbol: &str) -> Result<Vec<String>, DepError> {
    self.get_dependents_where(symbol, |_, _, _| true)
  }

  /// [`DepSystem::get_dependents`] filtered by a selector.
  pub fn get_dependents_where<F>(&self, symbol: &str, mut selector: F) -> Result<Vec<String>, DepError>
  where
    F: FnMut(&str, &str, SymbolState) -> bool,
  {
    let idx = self.node(symbol)?;
    let mut reverse_order = Vec::new();
    self.collect_dependents(idx, &mut HashSet::new(), &mut reverse_order);
    let members: HashSet<NodeIndex> = reverse_order.iter().copied().collect();

    // Splice the full traversal of every reverse-reachable root into one
    // ordering, then keep only the dependents themselves.
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for &root in &reverse_order {
      let mut plan = Vec::new();
      self.collect_dependencies(root, &mut HashSet::new(), &mut plan);
      for name in plan {
        if seen.insert(name.clone()) {
          order.push(name);
        }
      }
    }

    let mut dependents = Vec::new();
    for name in order {
      let name_idx = self.node(&name)?;
      if name_idx == idx || !members.contains(&name_idx) {
        continue;
      }
      let sym = &self.graph[name_idx];
      if selector(&sym.name, &sym.value, sym.state) {
        dependents.push(name);
      }
    }
    Ok(dependents)
  }

  /// The stale and non-built dependencies of `symbol` (including
  /// `symbol` itself) in a buildable order.
  ///
  /// Disabled symbols are deliberately not part of the plan: disabled
  /// means valid but unable to be regenerated, which is a perfectly fine
  /// prerequisite. An invalid symbol anywhere in the dependencies makes
  /// the plan impossible.
  pub fn get_build_plan(&self, symbol: &str) -> Result<Vec<String>, DepError> {
    let idx = self.node(symbol)?;
    let mut order = Vec::new();
    self.collect_dependencies(idx, &mut HashSet::new(), &mut order);
    let unbuildable = self.select_syms_with_states(&order, &[SymbolState::Invalid])?;
    if !unbuildable.is_empty() {
      return Err(DepError::Unbuildable(symbol.to_string()));
    }
    self.select_syms_with_states(&order, &[SymbolState::NonBuilt, SymbolState::Stale])
  }

  /// Run the build plan for `symbol`: invoke each entry's callback (when
  /// present) and mark it valid.
  pub fn build_symbol(&mut self, symbol: &str) -> Result<(), DepError> {
    let plan = self.get_build_plan(symbol)?;
    for entry in plan {
      let idx = self.node(&entry)?;
      let callback = self.graph[idx].callback.clone();
      if let Some(callback) = callback {
        let value = self.graph[idx].value.clone();
        callback(&entry, &value).map_err(|source| DepError::Callback {
          symbol: entry.clone(),
          source,
        })?;
      }
      self.graph[idx].state = SymbolState::Valid;
    }
    Ok(())
  }

  /// Mark every valid dependent of `symbol` stale, and every disabled
  /// dependent invalid. Other states are untouched.
  pub fn invalidate_dependents(&mut self, symbol: &str) -> Result<(), DepError> {
    for dependent in self.get_dependents(symbol)? {
      let idx = self.node(&dependent)?;
      let sym = &mut self.graph[idx];
      sym.state = match sym.state {
        SymbolState::Valid => SymbolState::Stale,
        SymbolState::Disabled => SymbolState::Invalid,
        other => other,
      };
    }
    Ok(())
  }

  fn node(&self, name: &str) -> Result<NodeIndex, DepError> {
    self
      .index
      .get(name)
      .copied()
      .ok_or_else(|| DepError::NoSuchSymbol(name.to_string()))
  }

  /// The first existing name of an ordered dependency list.
  pub(crate) fn active_element(&self, list: &[String]) -> Option<NodeIndex> {
    list.iter().find_map(|name| self.index.get(name).copied())
  }

  /// Whether `target` is reachable from `from` through dependency edges
  /// and each list's active element. `from == target` counts as reached.
  fn reaches(&self, from: NodeIndex, target: NodeIndex) -> bool {
    let mut visited = HashSet::new();
    self.reaches_inner(from, target, &mut visited)
  }

  fn reaches_inner(&self, from: NodeIndex, target: NodeIndex, visited: &mut HashSet<NodeIndex>) -> bool {
    if from == target {
      return true;
    }
    if !visited.insert(from) {
      return false;
    }
    for dep in self.graph.neighbors_directed(from, Direction::Outgoing) {
      if self.reaches_inner(dep, target, visited) {
        return true;
      }
    }
    for list in &self.graph[from].dependency_lists {
      if let Some(active) = self.active_element(list) {
        if self.reaches_inner(active, target, visited) {
          return true;
        }
      }
    }
    false
  }

  /// Post-order traversal over dependency edges and active list
  /// elements: dependencies land before the symbol itself.
  fn collect_dependencies(&self, idx: NodeIndex, visited: &mut HashSet<NodeIndex>, order: &mut Vec<String>) {
    if !visited.insert(idx) {
      return;
    }
    let deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
    for dep in deps {
      self.collect_dependencies(dep, visited, order);
    }
    for list in &self.graph[idx].dependency_lists {
      if let Some(active) = self.active_element(list) {
        self.collect_dependencies(active, visited, order);
      }
    }
    order.push(self.graph[idx].name.clone());
  }

  /// Reverse-reachable walk over reverse edges and list ownership, in
  /// discovery order, starting with `idx` itself.
  fn collect_dependents(&self, idx: NodeIndex, visited: &mut HashSet<NodeIndex>, order: &mut Vec<NodeIndex>) {
    if !visited.insert(idx) {
      return;
    }
    order.push(idx);
    let reverse: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
    for dependent in reverse {
      self.collect_dependents(dependent, visited, order);
    }
    for owner in &self.graph[idx].list_owners {
      if let Some(&owner_idx) = self.index.get(owner) {
        self.collect_dependents(owner_idx, visited, order);
      }
    }
  }

  fn filter_selected<F>(&self, names: Vec<String>, mut selector: F) -> Result<Vec<String>, DepError>
  where
    F: FnMut(&str, &str, SymbolState) -> bool,
  {
    let mut kept = Vec::with_capacity(names.len());
    for name in names {
      let idx = self.node(&name)?;
      let sym = &self.graph[idx];
      if selector(&sym.name, &sym.value, sym.state) {
        kept.push(name);
      }
    }
    Ok(kept)
  }
}

/// Structural equality over names, values, states, edges (both
/// directions), dependency lists, list ownership, and shadowers.
/// Callbacks are ignored.
impl PartialEq for DepSystem {
  fn eq(&self, other: &Self) -> bool {
    if self.index.len() != other.index.len() {
      return false;
    }
    for (name, &idx) in &self.index {
      let Some(&other_idx) = other.index.get(name) else {
        return false;
      };
      let a = &self.graph[idx];
      let b = &other.graph[other_idx];
      if a.value != b.value
        || a.state != b.state
        || a.dependency_lists != b.dependency_lists
        || a.list_owners != b.list_owners
      {
        return false;
      }
      for direction in [Direction::Outgoing, Direction::Incoming] {
        let ours: HashSet<String> = self
          .graph
          .neighbors_directed(idx, direction)
          .map(|n| self.graph[n].name.clone())
          .collect();
        let theirs: HashSet<String> = other
          .graph
          .neighbors_directed(other_idx, direction)
          .map(|n| other.graph[n].name.clone())
          .collect();
        if ours != theirs {
          return false;
        }
      }
    }
    normalized_shadowers(self) == normalized_shadowers(other)
  }
}

fn normalized_shadowers(system: &DepSystem) -> Vec<(String, String)> {
  let mut pairs: Vec<(String, String)> = system
    .shadowers
    .iter()
    .flat_map(|(name, owners)| owners.iter().map(move |owner| (name.clone(), owner.clone())))
    .collect();
  pairs.sort();
  pairs
}
