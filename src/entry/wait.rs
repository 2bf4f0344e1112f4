//! Timed blocking primitives and wait operations.
//!
//! Transactions block here until a concurrent fetch, upgrade, downgrade, or
//! eviction settles the entry into a usable (or terminally gone) state. All
//! waiting happens on the entry's condition variable while the caller holds
//! the entry guard; every transition broadcasts, and every waiter re-checks
//! its predicate on every wake-up, so spurious wake-ups are harmless.
//!
//! ## Key Components
//! - `wait_readable` / `wait_writable`: the transaction executor's entry
//!   points before reading or writing.
//! - `wait_decached` / `wait_not_upgrading`: narrower waits used by eviction
//!   and upgrade coordination.
//! - [`CancelToken`]: cooperative cancellation shared between a transaction
//!   and whichever of its threads is blocked.
//! - [`WriteWaitResult`]: the three-way outcome of `wait_writable`.
//!
//! ## Deadlines
//! Every wait takes an absolute [`Instant`]. By that instant the wait has
//! either succeeded or failed with [`WaitError::Timeout`] carrying the time
//! actually spent. A deadline already in the past fails immediately when the
//! awaited condition does not hold.
//!
//! ## Cancellation
//! Rust threads cannot be interrupted mid-wait, so cancellation is a flag
//! checked at every wake-up: set the token, then call
//! [`Entry::wake_all`](super::Entry::wake_all) on the entries the
//! transaction may be blocked on, and the waiter fails promptly with
//! [`WaitError::Interrupted`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::WaitError;
use crate::key::EntryKey;

use super::state::{DOWNGRADING, NOT_CACHED, READING, UPGRADING};
use super::{EntryGuard, State};

/// Iteration cap for `wait_writable`. Alternation between upgrading and
/// downgrading past this bound means upstream coordination is broken.
const MAX_WRITE_WAIT_RETRIES: u32 = 1000;

/// Outcome of [`EntryGuard::wait_writable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteWaitResult {
    /// The entry is writable.
    Writable,
    /// The entry is readable, settled, and not being upgraded; the caller
    /// must request an upgrade itself if it still wants to write.
    Readable,
    /// The entry is gone from the cache.
    Decached,
}

/// Cooperative cancellation flag for blocked waiters.
///
/// Clones share the flag. Cancelling is one-way and idempotent.
///
/// # Example
///
/// ```
/// use txcache::entry::CancelToken;
///
/// let token = CancelToken::new();
/// let shared = token.clone();
/// assert!(!shared.is_cancelled());
/// token.cancel();
/// assert!(shared.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every waiter sharing this token.
    ///
    /// Follow with [`Entry::wake_all`](super::Entry::wake_all) so waiters
    /// observe the flag before their deadline would have expired.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl<'a, K: EntryKey, V> EntryGuard<'a, K, V> {
    /// Waits for the entry to become readable.
    ///
    /// Returns `Ok(true)` once readable, or `Ok(false)` if the entry left
    /// the cache instead.
    pub fn wait_readable(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<bool, WaitError> {
        if self.is_readable() {
            // Already cached for read.
            Ok(true)
        } else if self.is_reading() {
            // A fetch for read is in flight; its completion decides.
            self.wait_clear(READING, deadline, cancel)?;
            Ok(self.is_readable())
        } else if self.is_decaching() {
            // Eviction in progress; wait it out so the caller can refetch.
            self.wait_set(NOT_CACHED, deadline, cancel)?;
            Ok(false)
        } else {
            // State is Decached: the entry is gone.
            Ok(false)
        }
    }

    /// Waits for the entry to become writable.
    ///
    /// Returns [`WriteWaitResult::Writable`] once writable,
    /// [`WriteWaitResult::Readable`] if the entry settles at read access
    /// with no upgrade in flight, or [`WriteWaitResult::Decached`] if the
    /// entry left the cache.
    ///
    /// # Panics
    ///
    /// Panics after 1000 retries. Perpetual alternation between upgrading
    /// and downgrading is an upstream coordination bug, not a recoverable
    /// condition.
    pub fn wait_writable(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<WriteWaitResult, WaitError> {
        let mut retries = 0u32;
        loop {
            assert!(
                retries < MAX_WRITE_WAIT_RETRIES,
                "too many retries waiting for entry {:?}",
                self.entry.key()
            );
            retries += 1;
            if self.is_writable() {
                // Already cached for write.
                return Ok(WriteWaitResult::Writable);
            } else if self.is_upgrading() {
                // Wait for the upgrade to complete, then retry.
                self.wait_clear(UPGRADING, deadline, cancel)?;
            } else if self.is_downgrading() {
                // Wait for the downgrade to complete, then retry.
                self.wait_clear(DOWNGRADING, deadline, cancel)?;
            } else if self.state() == State::CachedRead {
                // Cached for read and nobody is upgrading it.
                return Ok(WriteWaitResult::Readable);
            } else if self.is_reading() {
                // Wait for the fetch to complete, then retry.
                self.wait_clear(READING, deadline, cancel)?;
            } else if self.is_decaching() {
                // Eviction in progress; wait until it is gone.
                self.wait_decached(deadline, cancel)?;
                return Ok(WriteWaitResult::Decached);
            } else {
                // State is Decached: the entry is gone.
                return Ok(WriteWaitResult::Decached);
            }
        }
    }

    /// Waits for an eviction in progress to finish.
    ///
    /// Returns immediately if the entry is already decached. Any state other
    /// than the two evicting states is an invalid-state error.
    pub fn wait_decached(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<(), WaitError> {
        if self.is_decached() {
            return Ok(());
        }
        self.verify(
            "wait_decached",
            &[State::EvictingRead, State::EvictingWrite],
        )?;
        self.wait_set(NOT_CACHED, deadline, cancel)
    }

    /// Waits for an upgrade in progress to finish.
    ///
    /// Any state other than the two upgrading states is an invalid-state
    /// error.
    pub fn wait_not_upgrading(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<(), WaitError> {
        self.verify(
            "wait_not_upgrading",
            &[State::FetchingUpgrade, State::FetchingWrite],
        )?;
        self.wait_clear(UPGRADING, deadline, cancel)
    }

    // -- Primitives -------------------------------------------------------

    /// Blocks until every bit of `mask` is set in the state's encoding.
    fn wait_set(
        &mut self,
        mask: u8,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<(), WaitError> {
        self.wait_for(deadline, cancel, move |state| state.has_all(mask))
    }

    /// Blocks until every bit of `mask` is clear in the state's encoding.
    fn wait_clear(
        &mut self,
        mask: u8,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<(), WaitError> {
        self.wait_for(deadline, cancel, move |state| state.is_clear(mask))
    }

    /// The one true wait loop: releases the entry lock while parked,
    /// re-checks `done` on every wake-up, honors the deadline and the
    /// cancellation flag.
    fn wait_for(
        &mut self,
        deadline: Instant,
        cancel: &CancelToken,
        done: impl Fn(State) -> bool,
    ) -> Result<(), WaitError> {
        if done(self.body.state) {
            return Ok(());
        }
        let start = Instant::now();
        let mut now = start;
        while now < deadline {
            if cancel.is_cancelled() {
                return Err(WaitError::Interrupted {
                    entry: self.identity(),
                });
            }
            self.entry.changed.wait_until(&mut self.body, deadline);
            if cancel.is_cancelled() {
                return Err(WaitError::Interrupted {
                    entry: self.identity(),
                });
            }
            if done(self.body.state) {
                return Ok(());
            }
            now = Instant::now();
        }
        Err(WaitError::Timeout {
            waited: now - start,
            entry: self.identity(),
        })
    }
}
