//! Symbol-name rewriting across the sub-directory boundary.
//!
//! A `--sub` invocation lives one directory below its parent, so the two
//! graphs name the same targets differently: the parent's `x` is the
//! child's `../x`, and the parent's `subdir/y` is the child's `y`. The
//! incoming mutator is applied to every name read from the parent; the
//! outgoing mutator is its inverse, applied to every name written back.

/// Mutator for names arriving from the parent invocation.
pub fn incoming_mutator(subdir: &str) -> impl Fn(&str) -> String {
  let prefix = format!("{subdir}/");
  move |name| match name.strip_prefix(&prefix) {
    Some(local) => local.to_string(),
    None => format!("../{name}"),
  }
}

/// Mutator for names emitted back to the parent invocation.
pub fn outgoing_mutator(subdir: &str) -> impl Fn(&str) -> String {
  let subdir = subdir.to_string();
  move |name| match name.strip_prefix("../") {
    Some(parent) => parent.to_string(),
    None => format!("{subdir}/{name}"),
  }
}
