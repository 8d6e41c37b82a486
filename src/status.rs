//! The process-wide diagnostic message channel.
//!
//! Failures carry a [`SixelError`](crate::SixelError) kind, but the kind alone
//! is often too terse for a person debugging a pipeline. Operations therefore
//! also leave a one-line description in a process-wide buffer right before
//! returning an error. Writes are best-effort: the buffer is bounded and long
//! messages are truncated at a UTF-8 boundary.
//!
//! Messages may carry lightweight markup so surfaces with different
//! capabilities can render the same text:
//!
//! | Token     | Meaning                  | Notes               |
//! |-----------|--------------------------|---------------------|
//! | `\fB ...` | Bold text                | Closed by `\fP`     |
//! | `\fE ...` | Error highlight (red)    | Closed by `\fP`     |
//! | `\fW ...` | Warning highlight (yellow) | Closed by `\fP`   |
//! | `\fP`     | Reset attributes         |                     |
//! | `\\`      | Literal backslash        |                     |
//!
//! [`render_markup`] substitutes ANSI sequences for the tokens when the
//! output device supports them and elides them otherwise.

use std::sync::Mutex;

/// Upper bound on the stored message, in bytes.
const MESSAGE_LIMIT: usize = 4096;

static LAST_MESSAGE: Mutex<String> = Mutex::new(String::new());

/// Capabilities of the device diagnostics will be rendered to.
///
/// This is a snapshot the caller probes however it likes (isatty, terminfo,
/// environment); the crate only consumes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCaps {
  /// The destination is an interactive terminal.
  pub is_tty: bool,
  /// ANSI escape sequences may be emitted at all.
  pub use_ansi: bool,
  /// The terminal renders bold.
  pub has_bold: bool,
  /// The terminal renders color.
  pub has_color: bool,
}

impl OutputCaps {
  /// Caps for a dumb destination: every markup token is elided.
  #[inline]
  #[must_use]
  pub const fn plain() -> Self {
    Self { is_tty: false, use_ansi: false, has_bold: false, has_color: false }
  }

  #[inline]
  fn sequences_enabled(self) -> bool {
    self.is_tty && self.use_ansi
  }
}

/// Stores `message` as the last diagnostic, truncating at a UTF-8 boundary
/// if it exceeds the buffer limit.
pub fn set_additional_message(message: &str) {
  let mut guard = match LAST_MESSAGE.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  };
  guard.clear();
  if message.len() <= MESSAGE_LIMIT {
    guard.push_str(message);
  } else {
    let mut end = MESSAGE_LIMIT;
    while end > 0 && !message.is_char_boundary(end) {
      end -= 1;
    }
    guard.push_str(&message[..end]);
  }
}

/// Clears the last diagnostic.
pub fn clear_additional_message() {
  set_additional_message("");
}

/// Returns the last diagnostic with markup rendered for `caps`.
#[must_use]
pub fn additional_message(caps: OutputCaps) -> String {
  let guard = match LAST_MESSAGE.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  };
  render_markup(&guard, caps)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MarkupAttr {
  None,
  Bold,
  Error,
  Warning,
}

/// Renders `\fB`/`\fE`/`\fW`/`\fP` markup in `source` for a device with the
/// given capabilities.
///
/// Tokens become ANSI sequences when the device allows it and the specific
/// attribute is supported, and disappear otherwise; the text between tokens
/// is always preserved.
#[must_use]
pub fn render_markup(source: &str, caps: OutputCaps) -> String {
  let use_sequences = caps.sequences_enabled();
  let mut out = String::with_capacity(source.len());
  let mut active = MarkupAttr::None;
  let mut sequence_active = false;
  let bytes = source.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'\\' {
      // Copy a full UTF-8 scalar, not just a byte.
      let rest = &source[i..];
      let ch = rest.chars().next().unwrap();
      out.push(ch);
      i += ch.len_utf8();
      continue;
    }
    match bytes.get(i + 1) {
      Some(b'\\') => {
        out.push('\\');
        i += 2;
      }
      Some(b'f') => match bytes.get(i + 2) {
        Some(b'\\') if bytes.get(i + 3) == Some(&b'\\') => {
          out.push('\u{c}');
          i += 4;
        }
        Some(b'P') => {
          if sequence_active && use_sequences {
            out.push_str("\x1b[0m");
            sequence_active = false;
          }
          active = MarkupAttr::None;
          i += 3;
        }
        Some(&token) if matches!(token, b'B' | b'E' | b'W') => {
          let (target, sequence) = match token {
            b'B' => (MarkupAttr::Bold, caps.has_bold.then_some("\x1b[1m")),
            b'E' => (MarkupAttr::Error, caps.has_color.then_some("\x1b[31m")),
            _ => (MarkupAttr::Warning, caps.has_color.then_some("\x1b[33m")),
          };
          if target != active {
            if sequence_active && use_sequences {
              out.push_str("\x1b[0m");
              sequence_active = false;
            }
            if use_sequences {
              if let Some(seq) = sequence {
                out.push_str(seq);
                sequence_active = true;
              }
            }
            active = target;
          }
          i += 3;
        }
        _ => {
          // A lone `\f` or unknown token: drop the marker, keep going.
          i += 2;
        }
      },
      _ => {
        out.push('\\');
        i += 1;
      }
    }
  }
  if sequence_active && use_sequences {
    out.push_str("\x1b[0m");
  }
  out
}
