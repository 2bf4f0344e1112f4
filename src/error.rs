//! Error types for the txcache library.
//!
//! ## Key Components
//!
//! - [`InvalidStateError`]: Returned when a transition or wait operation is
//!   applied to an entry whose current state is outside the operation's
//!   source set (or when the abandon-fetch transition runs on a non-sentinel
//!   key). This is a caller bug; transaction logic should not catch it.
//! - [`WaitError`]: Returned by the blocking wait operations when the
//!   absolute deadline passes or the waiter's transaction is cancelled.
//!   Callers catch this at the transaction boundary, abort, and may retry.

use std::fmt;
use std::time::Duration;

use crate::entry::State;

// ---------------------------------------------------------------------------
// InvalidStateError
// ---------------------------------------------------------------------------

/// Which precondition of the failed operation was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateKind {
    /// The current state is outside the operation's source set.
    WrongState,
    /// The operation is reserved for the last-binding sentinel key.
    NotLastBinding,
}

/// Error returned when an entry operation's precondition does not hold.
///
/// Carries the operation name, the state(s) the operation accepts, the state
/// actually observed, and the entry identity. The entry is left unchanged.
///
/// # Example
///
/// ```
/// use txcache::entry::{Entry, State};
/// use txcache::key::ObjectId;
///
/// let entry: Entry<ObjectId, ()> = Entry::new(ObjectId(7), 1, State::CachedRead);
/// let err = entry.lock().set_cached_read().unwrap_err();
/// assert_eq!(err.found(), State::CachedRead);
/// assert_eq!(err.expected(), &[State::FetchingRead]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStateError {
    op: &'static str,
    kind: InvalidStateKind,
    expected: &'static [State],
    found: State,
    entry: String,
}

impl InvalidStateError {
    pub(crate) fn wrong_state(
        op: &'static str,
        expected: &'static [State],
        found: State,
        entry: String,
    ) -> Self {
        Self {
            op,
            kind: InvalidStateKind::WrongState,
            expected,
            found,
            entry,
        }
    }

    pub(crate) fn not_last_binding(
        op: &'static str,
        expected: &'static [State],
        found: State,
        entry: String,
    ) -> Self {
        Self {
            op,
            kind: InvalidStateKind::NotLastBinding,
            expected,
            found,
            entry,
        }
    }

    /// Name of the operation that failed.
    #[inline]
    pub fn operation(&self) -> &'static str {
        self.op
    }

    /// Which precondition was violated.
    #[inline]
    pub fn kind(&self) -> InvalidStateKind {
        self.kind
    }

    /// The state(s) the operation accepts.
    #[inline]
    pub fn expected(&self) -> &'static [State] {
        self.expected
    }

    /// The state that was observed.
    #[inline]
    pub fn found(&self) -> State {
        self.found
    }

    /// Identity of the entry, for debugging.
    #[inline]
    pub fn entry(&self) -> &str {
        &self.entry
    }
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            InvalidStateKind::WrongState => {
                write!(f, "{}: invalid state, expected ", self.op)?;
                for (i, state) in self.expected.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    f.write_str(state.name())?;
                }
                write!(f, ", found {}, entry {}", self.found, self.entry)
            },
            InvalidStateKind::NotLastBinding => write!(
                f,
                "{}: key is not the last-binding sentinel, entry {}",
                self.op, self.entry
            ),
        }
    }
}

impl std::error::Error for InvalidStateError {}

// ---------------------------------------------------------------------------
// WaitError
// ---------------------------------------------------------------------------

/// Error returned when a wait operation fails to complete.
///
/// `Timeout` and `Interrupted` are transaction-boundary errors: the entry
/// itself remains valid and available to other threads; the caller abandons
/// its current attempt. `InvalidState` wraps the precondition failures of
/// [`wait_decached`](crate::entry::EntryGuard::wait_decached) and
/// [`wait_not_upgrading`](crate::entry::EntryGuard::wait_not_upgrading).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The absolute deadline passed before the awaited condition held.
    Timeout {
        /// Time spent waiting before giving up.
        waited: Duration,
        /// Identity of the entry waited on.
        entry: String,
    },
    /// The waiter's transaction was cancelled during the wait.
    Interrupted {
        /// Identity of the entry waited on.
        entry: String,
    },
    /// The wait operation's state precondition did not hold.
    InvalidState(InvalidStateError),
}

impl WaitError {
    /// Whether this is a timeout.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    /// Whether the waiter was cancelled.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WaitError::Interrupted { .. })
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Timeout { waited, entry } => {
                write!(
                    f,
                    "timeout after {} ms waiting for entry {}",
                    waited.as_millis(),
                    entry
                )
            },
            WaitError::Interrupted { entry } => {
                write!(f, "interrupted while waiting for entry {}", entry)
            },
            WaitError::InvalidState(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for WaitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WaitError::InvalidState(err) => Some(err),
            _ => None,
        }
    }
}

impl From<InvalidStateError> for WaitError {
    fn from(err: InvalidStateError) -> Self {
        WaitError::InvalidState(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
