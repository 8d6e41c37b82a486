use core::{
  fmt::{self, Display},
  num::TryFromIntError,
};
use std::collections::TryReserveError;

/// An error from the `sixel-color` crate.
///
/// Every fallible operation in the crate returns one of these through
/// [`SixelResult`]. The kinds mirror the status classes a caller can act on:
/// most are terminal, but [`Interrupted`](SixelError::Interrupted) means an
/// [`AbortToken`](crate::AbortToken) fired and the operation can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SixelError {
  /// A caller-provided abort token was set while the operation was running.
  Interrupted,

  /// The allocator couldn't give us enough space.
  BadAllocation,

  /// A parameter was outside the range the operation accepts.
  BadArgument,

  /// The input data itself is unusable (bad dimensions, missing palette,
  /// unsupported pixel format for this operation).
  BadInput,

  /// A checked integer computation overflowed.
  BadIntegerOverflow,

  /// A clipboard transfer failed. Raised by surface integrations that sit
  /// on top of this crate; the core never produces it itself.
  BadClipboard,

  /// A runtime condition outside the caller's control failed.
  RuntimeError,

  /// An internal invariant was violated. Seeing this is a bug in the crate.
  LogicError,

  /// The requested operation exists in the API but has no implementation in
  /// this build.
  NotImplemented,

  /// The requested feature combination is not supported.
  FeatureError,

  /// A libc-level failure, carrying the `errno` value observed.
  Libc(i32),
}

impl Display for SixelError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SixelError::Interrupted => write!(f, "interrupted by abort token"),
      SixelError::BadAllocation => write!(f, "runtime error: bad allocation"),
      SixelError::BadArgument => write!(f, "runtime error: bad argument detected"),
      SixelError::BadInput => write!(f, "runtime error: bad input detected"),
      SixelError::BadIntegerOverflow => write!(f, "runtime error: integer overflow"),
      SixelError::BadClipboard => write!(f, "runtime error: clipboard transfer failed"),
      SixelError::RuntimeError => write!(f, "runtime error"),
      SixelError::LogicError => write!(f, "logic error"),
      SixelError::NotImplemented => write!(f, "feature error: not implemented"),
      SixelError::FeatureError => write!(f, "feature error"),
      SixelError::Libc(errno) => write!(f, "libc error: errno {errno}"),
    }
  }
}

impl std::error::Error for SixelError {}

impl From<TryReserveError> for SixelError {
  #[inline]
  fn from(_: TryReserveError) -> Self {
    Self::BadAllocation
  }
}

impl From<TryFromIntError> for SixelError {
  #[inline]
  fn from(_: TryFromIntError) -> Self {
    Self::BadIntegerOverflow
  }
}

/// The result alias used throughout the crate.
pub type SixelResult<T> = Result<T, SixelError>;
