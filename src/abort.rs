//! Cooperative cancellation for long-running solver loops.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{SixelError, SixelResult};

/// A cancellation flag shared between a caller and a running operation.
///
/// The palette solvers and the histogram builder poll the token between
/// iterations. There is no pre-emption: once set, the operation returns
/// [`SixelError::Interrupted`] at its next polling point and releases all
/// scratch state on the way out.
///
/// Tokens are cheap to clone; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortToken {
  flag: Arc<AtomicBool>,
}

impl AbortToken {
  /// Makes a fresh, un-set token.
  #[inline]
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Requests cancellation of every operation holding a clone of this token.
  #[inline]
  pub fn abort(&self) {
    self.flag.store(true, Ordering::Release);
  }

  /// Has [`abort`](Self::abort) been called?
  #[inline]
  #[must_use]
  pub fn is_aborted(&self) -> bool {
    self.flag.load(Ordering::Acquire)
  }

  /// Polling helper for solver loops: `Err(Interrupted)` once aborted.
  #[inline]
  pub fn check(&self) -> SixelResult<()> {
    if self.is_aborted() {
      Err(SixelError::Interrupted)
    } else {
      Ok(())
    }
  }
}

/// Polls an optional token, which is how every long loop consumes it.
#[inline]
pub(crate) fn poll(token: Option<&AbortToken>) -> SixelResult<()> {
  match token {
    Some(t) => t.check(),
    None => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn abort_is_shared_between_clones() {
    let token = AbortToken::new();
    let other = token.clone();
    assert!(token.check().is_ok());
    other.abort();
    assert_eq!(token.check(), Err(SixelError::Interrupted));
    assert!(poll(Some(&token)).is_err());
    assert!(poll(None).is_ok());
  }
}
