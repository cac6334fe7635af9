//! Child process plumbing.
//!
//! Two kinds of children exist. *Bakefile commands* get the current
//! dependency system piped to their stdin and have their stdout captured
//! for augmentation; the write and the read run concurrently so a child
//! that emits output before draining its input cannot deadlock either
//! side. *Build commands* are spawned by the default callback with null
//! stdio and parked on a FIFO wait queue for the orchestrator to reap.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::rc::Rc;
use std::time::SystemTime;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::debug;

use bake_dep::BuildCallback;

use crate::error::BakeError;
use crate::scan::parse_command;

/// A build child the orchestrator still has to wait on.
pub struct PendingBuild {
  pub symbol: String,
  pub child: Child,
  /// Timestamp taken just before the spawn; the target's mtime must not
  /// end up older than this.
  pub started: SystemTime,
}

/// FIFO of in-flight builds, shared with the per-symbol callbacks.
pub type WaitQueue = Rc<RefCell<VecDeque<PendingBuild>>>;

pub fn new_wait_queue() -> WaitQueue {
  Rc::new(RefCell::new(VecDeque::new()))
}

/// The build callback installed on symbols created through interchange
/// augmentation: parse the symbol's value as a command, spawn it, and
/// queue it for the orchestrator to wait on.
pub fn build_callback(queue: WaitQueue) -> BuildCallback {
  Rc::new(move |name, value| {
    if value.is_empty() {
      return Err(boxed(BakeError::NoRule {
        symbol: name.to_string(),
      }));
    }
    let argv = parse_command(value).map_err(|e| boxed(e.into()))?;
    if argv.is_empty() {
      return Err(boxed(BakeError::NoRule {
        symbol: name.to_string(),
      }));
    }
    let started = SystemTime::now();
    debug!(symbol = name, command = value, "spawning build command");
    let child = Command::new(&argv[0])
      .args(&argv[1..])
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .spawn()
      .map_err(|source| {
        boxed(BakeError::Spawn {
          command: value.to_string(),
          source,
        })
      })?;
    queue.borrow_mut().push_back(PendingBuild {
      symbol: name.to_string(),
      child,
      started,
    });
    Ok(())
  })
}

fn boxed(error: BakeError) -> Box<dyn Error + Send + Sync> {
  Box::new(error)
}

/// Run one Bakefile command: pipe `input` to its stdin, capture its
/// stdout, and wait for it. `command` is the original command text, used
/// in diagnostics.
pub async fn run_piped(
  command: &str,
  argv: &[String],
  input: &[u8],
) -> Result<(Vec<u8>, ExitStatus), BakeError> {
  debug!(command, "spawning Bakefile command");
  let mut child = Command::new(&argv[0])
    .args(&argv[1..])
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .spawn()
    .map_err(|source| BakeError::Spawn {
      command: command.to_string(),
      source,
    })?;

  let mut stdin = child
    .stdin
    .take()
    .ok_or_else(|| BakeError::Io(io::Error::other("child stdin unavailable")))?;
  let mut stdout = child
    .stdout
    .take()
    .ok_or_else(|| BakeError::Io(io::Error::other("child stdout unavailable")))?;

  let writer = async move {
    // A child may legitimately exit without reading its input.
    if let Err(error) = stdin.write_all(input).await {
      debug!(%error, "child did not drain its input");
    }
    drop(stdin);
  };
  let reader = async {
    let mut output = Vec::new();
    let result = stdout.read_to_end(&mut output).await;
    result.map(|_| output)
  };
  let (output, ()) = tokio::join!(reader, writer);
  let output = output?;
  let status = child.wait().await?;
  Ok((output, status))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
  }

  #[tokio::test]
  async fn captures_stdout_and_status() {
    let (output, status) = run_piped("echo hi", &argv(&["echo", "hi"]), b"").await.unwrap();
    assert!(status.success());
    assert_eq!(output, b"hi\n");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn pipes_input_to_the_child() {
    let (output, status) = run_piped("cat", &argv(&["cat"]), b"graph goes here\n")
      .await
      .unwrap();
    assert!(status.success());
    assert_eq!(output, b"graph goes here\n");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn child_ignoring_its_input_does_not_deadlock() {
    // Large enough to overflow the pipe buffer if nobody drained it.
    let input = vec![b'x'; 1 << 20];
    let (output, status) = run_piped("echo done", &argv(&["echo", "done"]), &input)
      .await
      .unwrap();
    assert!(status.success());
    assert_eq!(output, b"done\n");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn nonzero_exit_is_reported_in_the_status() {
    let (_, status) = run_piped("false", &argv(&["false"]), b"").await.unwrap();
    assert!(!status.success());
  }

  #[tokio::test]
  async fn missing_program_is_a_spawn_error() {
    let err = run_piped("no-such-bin", &argv(&["bake-definitely-not-a-binary"]), b"")
      .await
      .unwrap_err();
    assert!(matches!(err, BakeError::Spawn { .. }));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn callback_queues_a_build() {
    let queue = new_wait_queue();
    let callback = build_callback(queue.clone());
    callback("target", "true").unwrap();
    assert_eq!(queue.borrow().len(), 1);
    let pending = queue.borrow_mut().pop_front().unwrap();
    assert_eq!(pending.symbol, "target");
    let mut child = pending.child;
    assert!(child.wait().await.unwrap().success());
  }

  #[test]
  fn empty_value_is_no_rule() {
    let queue = new_wait_queue();
    let callback = build_callback(queue);
    let err = callback("target", "").unwrap_err();
    let err = err.downcast::<BakeError>().unwrap();
    assert!(matches!(*err, BakeError::NoRule { .. }));
  }
}
