//! Bakefile command scanning.
//!
//! A *logical command* is one line of a Bakefile plus the bodies of any
//! here-doc sentinels that line declares. `<<MARK` (at line start or
//! after whitespace) queues a sentinel; subsequent lines are read
//! verbatim until a line equals the mark exactly. Sentinels close in
//! declaration order.
//!
//! Tokens are separated by unquoted whitespace. Double quotes make
//! whitespace literal; a backslash escapes the next character.

use std::collections::VecDeque;
use std::io::BufRead;

use thiserror::Error;

/// Errors raised by the command scanner.
#[derive(Debug, Error)]
pub enum ScanError {
  /// A backslash escaped whitespace, or ended the line.
  #[error("invalid backslash escape")]
  InvalidEscape,

  /// `<<` with no mark characters following it.
  #[error("empty sentinel mark")]
  EmptySentinel,

  /// A sentinel mark contained `<`, `"`, or `\`.
  #[error("invalid character {0:?} in sentinel mark")]
  InvalidSentinelChar(char),

  /// `<<` appeared directly after a non-whitespace character.
  #[error("sentinel mark not preceded by whitespace")]
  SentinelNotPrecededByWhitespace,

  /// The input ended while a here-doc body was still open.
  #[error("input ended while reading here-doc body for {0:?}")]
  UnterminatedSentinel(String),

  /// I/O failure while reading the input.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// One token of a scanned line. Sentinel tokens are placeholders that
/// [`parse_command`] replaces with the corresponding here-doc body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
  Word(String),
  Sentinel(String),
}

/// Tokenize a single line, appending tokens to `tokens` and queueing any
/// sentinel marks onto `sentinels` in declaration order.
pub fn scan_line(
  line: &str,
  tokens: &mut Vec<Token>,
  sentinels: &mut VecDeque<String>,
) -> Result<(), ScanError> {
  let chars: Vec<char> = line.chars().collect();
  let mut inside_quotes = false;
  let mut current = String::new();
  let mut i = 0;
  while i < chars.len() {
    match chars[i] {
      '\\' => {
        let Some(&escaped) = chars.get(i + 1) else {
          return Err(ScanError::InvalidEscape);
        };
        if escaped == ' ' || escaped == '\t' {
          return Err(ScanError::InvalidEscape);
        }
        current.push(escaped);
        i += 2;
      }
      '"' => {
        inside_quotes = !inside_quotes;
        i += 1;
      }
      '<' if chars.get(i + 1) == Some(&'<') => {
        if i != 0 && chars[i - 1] != ' ' && chars[i - 1] != '\t' {
          return Err(ScanError::SentinelNotPrecededByWhitespace);
        }
        let mut mark = String::new();
        i += 2;
        while i < chars.len() && chars[i] != ' ' && chars[i] != '\t' {
          let c = chars[i];
          if c == '<' || c == '"' || c == '\\' {
            return Err(ScanError::InvalidSentinelChar(c));
          }
          mark.push(c);
          i += 1;
        }
        if mark.is_empty() {
          return Err(ScanError::EmptySentinel);
        }
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
          i += 1;
        }
        sentinels.push_back(mark.clone());
        tokens.push(Token::Sentinel(mark));
      }
      c @ (' ' | '\t') => {
        if inside_quotes {
          current.push(c);
          i += 1;
          continue;
        }
        if i != 0 {
          tokens.push(Token::Word(std::mem::take(&mut current)));
        }
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
          i += 1;
        }
      }
      c => {
        current.push(c);
        i += 1;
      }
    }
  }
  if !current.is_empty() {
    tokens.push(Token::Word(current));
  }
  Ok(())
}

/// Read one logical command from `input`.
///
/// Returns `Ok(None)` at end of stream. The returned command has no
/// trailing newline; interior newlines of here-doc bodies are preserved
/// verbatim, including their closing marks.
pub fn get_command<R: BufRead>(input: &mut R) -> Result<Option<String>, ScanError> {
  let Some(line) = read_line(input)? else {
    return Ok(None);
  };
  let mut tokens = Vec::new();
  let mut sentinels = VecDeque::new();
  scan_line(&line, &mut tokens, &mut sentinels)?;

  let mut command = line;
  while let Some(mark) = sentinels.front() {
    let Some(body_line) = read_line(input)? else {
      return Err(ScanError::UnterminatedSentinel(mark.clone()));
    };
    let closes = body_line == *mark;
    command.push('\n');
    command.push_str(&body_line);
    if closes {
      sentinels.pop_front();
    }
  }
  Ok(Some(command))
}

/// Expand a logical command into an argv: words, with each sentinel
/// replaced by its here-doc body (lines joined with newlines, closing
/// mark excluded).
pub fn parse_command(command: &str) -> Result<Vec<String>, ScanError> {
  let mut lines = command.lines();
  let first = lines.next().unwrap_or("");
  let body_lines: Vec<&str> = lines.collect();

  let mut tokens = Vec::new();
  let mut sentinels = VecDeque::new();
  scan_line(first, &mut tokens, &mut sentinels)?;

  let mut argv = Vec::with_capacity(tokens.len());
  let mut next_body = 0;
  for token in tokens {
    match token {
      Token::Word(word) => argv.push(word),
      Token::Sentinel(mark) => {
        let mut body = String::new();
        let mut closed = false;
        while next_body < body_lines.len() {
          let line = body_lines[next_body];
          next_body += 1;
          if line == mark {
            closed = true;
            break;
          }
          if !body.is_empty() {
            body.push('\n');
          }
          body.push_str(line);
        }
        if !closed {
          return Err(ScanError::UnterminatedSentinel(mark));
        }
        argv.push(body);
      }
    }
  }
  Ok(argv)
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>, ScanError> {
  let mut line = String::new();
  if input.read_line(&mut line)? == 0 {
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
