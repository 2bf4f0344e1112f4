//! Per-entry lifecycle state machine.
//!
//! An [`Entry`] is the node-local image of one key's value, together with the
//! state that says whether that value is usable and who is currently mutating
//! its status. Transactional readers and writers, fetch workers, downgrade
//! workers, and eviction workers all coordinate through this one state
//! machine; the waits in [`wait`] let them block on each other's transitions
//! under bounded deadlines.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Entry<K, V>                            │
//! │                                                               │
//! │   key: K                          (immutable, lock-free)      │
//! │   ┌─────────────────────────────────────────┐                 │
//! │   │ Mutex<EntryBody>                        │   Condvar       │
//! │   │   state: State      (ten variants)      │   (broadcast    │
//! │   │   value: Option<V>  (valid if READABLE) │    on every     │
//! │   │   context_id: u64   (monotone)          │    transition)  │
//! │   └─────────────────────────────────────────┘                 │
//! │                                                               │
//! │   Entry::lock() ──► EntryGuard ──► transitions / predicates / │
//! │                                    waits / accessors          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The mutable fields live inside the entry's own `parking_lot::Mutex`, and
//! every operation that touches them is a method on [`EntryGuard`]. Holding
//! the guard *is* holding the lock, so "the caller must hold the associated
//! lock" is a compile-time property rather than a runtime assertion. Only
//! [`Entry::key`] reads outside the lock.
//!
//! ## Transitions
//!
//! See [`state`] for the full diagram. Every transition method verifies its
//! source state(s), applies the change, and wakes **all** waiters on the
//! entry's condition variable — waiters block on disjoint predicates, so a
//! single-waiter signal would strand some of them. A transition applied from
//! the wrong state returns
//! [`InvalidStateError`](crate::error::InvalidStateError) and changes
//! nothing.
//!
//! ## Thread Safety
//!
//! `Entry` is `Send + Sync` for `Send` key and value types. All coordination
//! is caller-driven through the guard; the entry spawns no threads and holds
//! no lock across calls.
//!
//! ## Example Usage
//!
//! ```
//! use txcache::entry::{Entry, State};
//! use txcache::key::ObjectId;
//!
//! let entry = Entry::new(ObjectId(42), 1, State::FetchingRead);
//!
//! // Fetch worker completes the read and publishes the value.
//! let mut guard = entry.lock();
//! guard.set_value(vec![1u8, 2, 3]);
//! guard.set_cached_read().unwrap();
//! assert!(guard.is_readable());
//! assert_eq!(guard.value(), Some(&vec![1u8, 2, 3]));
//! ```

pub mod state;
pub mod wait;

pub use state::State;
pub use wait::{CancelToken, WriteWaitResult};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::InvalidStateError;
use crate::key::EntryKey;
use state::{DECACHING, DOWNGRADING, MODIFIED, READABLE, READING, UPGRADING, WRITABLE};

/// Mutable fields of an entry. Lives inside the entry's mutex.
#[derive(Debug)]
struct EntryBody<V> {
    state: State,
    value: Option<V>,
    context_id: u64,
}

/// The cached image of one key's value together with its lifecycle state.
///
/// Constructed by the cache container in whichever state fits the occasion:
/// one of the fetching states when the value is on its way from the backing
/// store, or directly in a cached state when the value is synthesized
/// locally. The constructor does not validate the choice.
pub struct Entry<K, V> {
    key: K,
    body: Mutex<EntryBody<V>>,
    changed: Condvar,
}

impl<K: EntryKey, V> Entry<K, V> {
    /// Creates an entry with no value, in the given state.
    pub fn new(key: K, context_id: u64, state: State) -> Self {
        Self {
            key,
            body: Mutex::new(EntryBody {
                state,
                value: None,
                context_id,
            }),
            changed: Condvar::new(),
        }
    }

    /// The key this entry caches. Readable without the lock.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Acquires the entry's lock, blocking until it is available.
    ///
    /// The returned guard is the witness required by every state-touching
    /// operation.
    pub fn lock(&self) -> EntryGuard<'_, K, V> {
        EntryGuard {
            entry: self,
            body: self.body.lock(),
        }
    }

    /// Wakes every thread blocked in a wait operation on this entry, without
    /// changing its state.
    ///
    /// Waiters re-check their predicate on every wake-up, so a stray wake is
    /// harmless. Pair with [`CancelToken::cancel`] to make cancellation of a
    /// blocked transaction prompt.
    pub fn wake_all(&self) {
        let _body = self.body.lock();
        self.changed.notify_all();
    }
}

impl<K: EntryKey, V> std::fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Locked view of an entry: proof that the entry's mutex is held.
///
/// All transitions, predicates, waits, and value accessors live here.
/// Dropping the guard releases the lock.
pub struct EntryGuard<'a, K, V> {
    entry: &'a Entry<K, V>,
    body: MutexGuard<'a, EntryBody<V>>,
}

impl<'a, K: EntryKey, V> EntryGuard<'a, K, V> {
    // -- Predicates -------------------------------------------------------

    /// The current state.
    #[inline]
    pub fn state(&self) -> State {
        self.body.state
    }

    /// Whether a fetch for read is in progress.
    #[inline]
    pub fn is_reading(&self) -> bool {
        self.body.state.has_all(READING)
    }

    /// Whether the value may be read.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.body.state.has_all(READABLE)
    }

    /// Whether a transition to writable is in progress.
    #[inline]
    pub fn is_upgrading(&self) -> bool {
        self.body.state.has_all(UPGRADING)
    }

    /// Whether the value may be written.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.body.state.has_all(WRITABLE)
    }

    /// Whether the local value diverges from the backing store.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.body.state.has_all(MODIFIED)
    }

    /// Whether a transition away from writable is in progress.
    #[inline]
    pub fn is_downgrading(&self) -> bool {
        self.body.state.has_all(DOWNGRADING)
    }

    /// Whether an eviction is in progress.
    #[inline]
    pub fn is_decaching(&self) -> bool {
        self.body.state.has_all(DECACHING)
    }

    /// Whether the entry has reached the terminal [`State::Decached`].
    ///
    /// This is an identity comparison, not a bitmask test.
    #[inline]
    pub fn is_decached(&self) -> bool {
        self.body.state == State::Decached
    }

    // -- Accessors --------------------------------------------------------

    /// The key this entry caches.
    #[inline]
    pub fn key(&self) -> &K {
        self.entry.key()
    }

    /// The cached value, if one has been set.
    ///
    /// Only meaningful while the entry is readable; callers must not rely on
    /// it otherwise.
    #[inline]
    pub fn value(&self) -> Option<&V> {
        self.body.value.as_ref()
    }

    /// Replaces the cached value, returning the previous one.
    pub fn set_value(&mut self, value: V) -> Option<V> {
        self.body.value.replace(value)
    }

    /// Removes and returns the cached value.
    pub fn take_value(&mut self) -> Option<V> {
        self.body.value.take()
    }

    /// The highest context ID of any transaction that has accessed this
    /// entry.
    #[inline]
    pub fn context_id(&self) -> u64 {
        self.body.context_id
    }

    /// Records an access by a transaction with the given context ID.
    ///
    /// The stored ID only ever grows: the result is the max of the current
    /// and supplied values.
    pub fn note_access(&mut self, context_id: u64) {
        if context_id > self.body.context_id {
            self.body.context_id = context_id;
        }
    }

    // -- Transitions ------------------------------------------------------

    /// FetchingRead → CachedRead, when a fetch for read completes.
    pub fn set_cached_read(&mut self) -> Result<(), InvalidStateError> {
        self.transition("set_cached_read", &[State::FetchingRead], State::CachedRead)
    }

    /// FetchingWrite → CachedWrite, when a fetch for write completes.
    pub fn set_cached_write(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_cached_write",
            &[State::FetchingWrite],
            State::CachedWrite,
        )
    }

    /// FetchingUpgrade → CachedWrite, when an upgrade completes.
    pub fn set_upgraded(&mut self) -> Result<(), InvalidStateError> {
        self.transition("set_upgraded", &[State::FetchingUpgrade], State::CachedWrite)
    }

    /// CachedRead → FetchingUpgrade, when an upgrade to write begins.
    pub fn set_fetching_upgrade(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_fetching_upgrade",
            &[State::CachedRead],
            State::FetchingUpgrade,
        )
    }

    /// CachedRead → CachedWrite, when the entry is promoted synchronously
    /// because the neighboring binding was removed.
    pub fn set_upgraded_immediate(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_upgraded_immediate",
            &[State::CachedRead],
            State::CachedWrite,
        )
    }

    /// CachedWrite → CachedDirty, when a transaction modifies the value.
    pub fn set_cached_dirty(&mut self) -> Result<(), InvalidStateError> {
        self.transition("set_cached_dirty", &[State::CachedWrite], State::CachedDirty)
    }

    /// CachedDirty → CachedWrite, at transaction commit or abort once the
    /// modifications have been flushed.
    pub fn set_not_modified(&mut self) -> Result<(), InvalidStateError> {
        self.transition("set_not_modified", &[State::CachedDirty], State::CachedWrite)
    }

    /// CachedWrite → EvictingDowngrade, when a demotion to read begins.
    pub fn set_evicting_downgrade(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_evicting_downgrade",
            &[State::CachedWrite],
            State::EvictingDowngrade,
        )
    }

    /// EvictingDowngrade → CachedRead, when the demotion completes.
    pub fn set_evicted_downgrade(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_evicted_downgrade",
            &[State::EvictingDowngrade],
            State::CachedRead,
        )
    }

    /// CachedWrite → CachedRead directly, for an immediate demotion of an
    /// entry known not to be in use.
    pub fn set_evicted_downgrade_immediate(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_evicted_downgrade_immediate",
            &[State::CachedWrite],
            State::CachedRead,
        )
    }

    /// CachedRead → EvictingRead, or CachedWrite → EvictingWrite, when an
    /// eviction begins. The destination follows the source.
    pub fn set_evicting(&mut self) -> Result<(), InvalidStateError> {
        self.verify("set_evicting", &[State::CachedRead, State::CachedWrite])?;
        let next = if self.body.state == State::CachedRead {
            State::EvictingRead
        } else {
            State::EvictingWrite
        };
        self.body.state = next;
        self.entry.changed.notify_all();
        Ok(())
    }

    /// {EvictingRead, EvictingWrite} → Decached, when the eviction's
    /// writeback completes.
    pub fn set_evicted(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_evicted",
            &[State::EvictingRead, State::EvictingWrite],
            State::Decached,
        )
    }

    /// {CachedRead, CachedWrite} → Decached directly, for an immediate
    /// eviction of an entry known not to be in use.
    pub fn set_evicted_immediate(&mut self) -> Result<(), InvalidStateError> {
        self.transition(
            "set_evicted_immediate",
            &[State::CachedRead, State::CachedWrite],
            State::Decached,
        )
    }

    /// {FetchingRead, FetchingWrite} → Decached, abandoning a fetch that
    /// yielded no useful information.
    ///
    /// Only the last-binding sentinel entry may do this; any other key gets
    /// an invalid-state error even when the state matches.
    pub fn set_evicted_abandon_fetching(&mut self) -> Result<(), InvalidStateError> {
        const OP: &str = "set_evicted_abandon_fetching";
        const EXPECTED: &[State] = &[State::FetchingRead, State::FetchingWrite];
        if !self.entry.key.is_last_binding() {
            return Err(InvalidStateError::not_last_binding(
                OP,
                EXPECTED,
                self.body.state,
                self.identity(),
            ));
        }
        self.transition(OP, EXPECTED, State::Decached)
    }

    // -- Internal ---------------------------------------------------------

    /// Precondition check shared by transitions, the wait operations, and
    /// the entry table's removal path.
    pub(crate) fn verify(
        &self,
        op: &'static str,
        expected: &'static [State],
    ) -> Result<(), InvalidStateError> {
        if expected.contains(&self.body.state) {
            Ok(())
        } else {
            Err(InvalidStateError::wrong_state(
                op,
                expected,
                self.body.state,
                self.identity(),
            ))
        }
    }

    /// Verify, apply, broadcast.
    fn transition(
        &mut self,
        op: &'static str,
        expected: &'static [State],
        next: State,
    ) -> Result<(), InvalidStateError> {
        self.verify(op, expected)?;
        self.body.state = next;
        self.entry.changed.notify_all();
        Ok(())
    }

    /// Identity string carried by errors.
    fn identity(&self) -> String {
        format!("{:?}", self.entry.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{BindingKey, ObjectId};

    type TestEntry = Entry<ObjectId, &'static str>;

    fn entry(state: State) -> TestEntry {
        Entry::new(ObjectId(1), 10, state)
    }

    /// Applies the transition named by `op` to a freshly locked guard.
    fn apply(
        guard: &mut EntryGuard<'_, ObjectId, &'static str>,
        op: &str,
    ) -> Result<(), InvalidStateError> {
        match op {
            "set_cached_read" => guard.set_cached_read(),
            "set_cached_write" => guard.set_cached_write(),
            "set_upgraded" => guard.set_upgraded(),
            "set_fetching_upgrade" => guard.set_fetching_upgrade(),
            "set_upgraded_immediate" => guard.set_upgraded_immediate(),
            "set_cached_dirty" => guard.set_cached_dirty(),
            "set_not_modified" => guard.set_not_modified(),
            "set_evicting_downgrade" => guard.set_evicting_downgrade(),
            "set_evicted_downgrade" => guard.set_evicted_downgrade(),
            "set_evicted_downgrade_immediate" => guard.set_evicted_downgrade_immediate(),
            "set_evicting" => guard.set_evicting(),
            "set_evicted" => guard.set_evicted(),
            "set_evicted_immediate" => guard.set_evicted_immediate(),
            other => panic!("unknown op {other}"),
        }
    }

    /// Source set and destination of every transition except the
    /// sentinel-gated abandon (covered separately).
    const GRAPH: &[(&str, &[State], fn(State) -> State)] = &[
        ("set_cached_read", &[State::FetchingRead], |_| {
            State::CachedRead
        }),
        ("set_cached_write", &[State::FetchingWrite], |_| {
            State::CachedWrite
        }),
        ("set_upgraded", &[State::FetchingUpgrade], |_| {
            State::CachedWrite
        }),
        ("set_fetching_upgrade", &[State::CachedRead], |_| {
            State::FetchingUpgrade
        }),
        ("set_upgraded_immediate", &[State::CachedRead], |_| {
            State::CachedWrite
        }),
        ("set_cached_dirty", &[State::CachedWrite], |_| {
            State::CachedDirty
        }),
        ("set_not_modified", &[State::CachedDirty], |_| {
            State::CachedWrite
        }),
        ("set_evicting_downgrade", &[State::CachedWrite], |_| {
            State::EvictingDowngrade
        }),
        ("set_evicted_downgrade", &[State::EvictingDowngrade], |_| {
            State::CachedRead
        }),
        (
            "set_evicted_downgrade_immediate",
            &[State::CachedWrite],
            |_| State::CachedRead,
        ),
        (
            "set_evicting",
            &[State::CachedRead, State::CachedWrite],
            |from| {
                if from == State::CachedRead {
                    State::EvictingRead
                } else {
                    State::EvictingWrite
                }
            },
        ),
        (
            "set_evicted",
            &[State::EvictingRead, State::EvictingWrite],
            |_| State::Decached,
        ),
        (
            "set_evicted_immediate",
            &[State::CachedRead, State::CachedWrite],
            |_| State::Decached,
        ),
    ];

    #[test]
    fn every_transition_from_every_state() {
        for &(op, sources, dest) in GRAPH {
            for start in State::ALL {
                let e = entry(start);
                let mut guard = e.lock();
                let result = apply(&mut guard, op);
                if sources.contains(&start) {
                    assert_eq!(result, Ok(()), "{op} from {start} should succeed");
                    assert_eq!(guard.state(), dest(start), "{op} from {start}");
                } else {
                    let err = result.unwrap_err();
                    assert_eq!(err.operation(), op);
                    assert_eq!(err.expected(), sources);
                    assert_eq!(err.found(), start);
                    assert_eq!(guard.state(), start, "{op} must not mutate on failure");
                }
            }
        }
    }

    #[test]
    fn abandon_fetching_requires_sentinel_key() {
        for start in [State::FetchingRead, State::FetchingWrite] {
            let e: Entry<BindingKey, ()> = Entry::new(BindingKey::Last, 0, start);
            let mut guard = e.lock();
            assert_eq!(guard.set_evicted_abandon_fetching(), Ok(()));
            assert_eq!(guard.state(), State::Decached);
        }

        // Matching state, wrong key: refused, untouched.
        let e: Entry<BindingKey, ()> = Entry::new(BindingKey::name("a"), 0, State::FetchingWrite);
        let mut guard = e.lock();
        let err = guard.set_evicted_abandon_fetching().unwrap_err();
        assert_eq!(
            err.kind(),
            crate::error::InvalidStateKind::NotLastBinding
        );
        assert_eq!(guard.state(), State::FetchingWrite);
    }

    #[test]
    fn abandon_fetching_requires_fetching_state() {
        let e: Entry<BindingKey, ()> = Entry::new(BindingKey::Last, 0, State::CachedRead);
        let mut guard = e.lock();
        let err = guard.set_evicted_abandon_fetching().unwrap_err();
        assert_eq!(err.kind(), crate::error::InvalidStateKind::WrongState);
        assert_eq!(err.found(), State::CachedRead);
        assert_eq!(guard.state(), State::CachedRead);
    }

    #[test]
    fn decached_is_terminal() {
        let mut failures = 0;
        for &(op, _, _) in GRAPH {
            let e = entry(State::Decached);
            let mut guard = e.lock();
            if apply(&mut guard, op).is_err() {
                failures += 1;
            }
            assert_eq!(guard.state(), State::Decached);
        }
        assert_eq!(failures, GRAPH.len());
    }

    #[test]
    fn dirty_twice_without_flush_is_refused() {
        let e = entry(State::CachedWrite);
        let mut guard = e.lock();
        guard.set_cached_dirty().unwrap();
        let err = guard.set_cached_dirty().unwrap_err();
        assert_eq!(err.found(), State::CachedDirty);
        assert_eq!(guard.state(), State::CachedDirty);

        guard.set_not_modified().unwrap();
        assert_eq!(guard.set_cached_dirty(), Ok(()));
    }

    #[test]
    fn predicates_track_state() {
        let e = entry(State::FetchingUpgrade);
        let guard = e.lock();
        assert!(guard.is_readable());
        assert!(guard.is_upgrading());
        assert!(!guard.is_reading());
        assert!(!guard.is_writable());
        assert!(!guard.is_modified());
        assert!(!guard.is_downgrading());
        assert!(!guard.is_decaching());
        assert!(!guard.is_decached());
    }

    #[test]
    fn is_decached_is_identity_not_bit_test() {
        for state in State::ALL {
            let e = entry(state);
            assert_eq!(e.lock().is_decached(), state == State::Decached);
        }
    }

    #[test]
    fn note_access_is_monotone() {
        let e = entry(State::CachedRead);
        let mut guard = e.lock();
        assert_eq!(guard.context_id(), 10);
        guard.note_access(5);
        assert_eq!(guard.context_id(), 10);
        guard.note_access(20);
        assert_eq!(guard.context_id(), 20);
        guard.note_access(15);
        assert_eq!(guard.context_id(), 20);
    }

    #[test]
    fn value_round_trip() {
        let e = entry(State::CachedWrite);
        let mut guard = e.lock();
        assert_eq!(guard.value(), None);
        assert_eq!(guard.set_value("v1"), None);
        assert_eq!(guard.value(), Some(&"v1"));
        assert_eq!(guard.set_value("v2"), Some("v1"));
        assert_eq!(guard.take_value(), Some("v2"));
        assert_eq!(guard.value(), None);
    }

    #[test]
    fn key_is_lock_free_and_stable() {
        let e = entry(State::FetchingRead);
        assert_eq!(*e.key(), ObjectId(1));
        let guard = e.lock();
        // Still readable through the guard and outside it.
        assert_eq!(*guard.key(), ObjectId(1));
        assert_eq!(*e.key(), ObjectId(1));
    }

    #[test]
    fn constructor_accepts_any_state() {
        for state in State::ALL {
            let e = entry(state);
            assert_eq!(e.lock().state(), state);
        }
    }

    #[test]
    fn debug_shows_key_only() {
        let e = entry(State::CachedRead);
        let dbg = format!("{:?}", e);
        assert!(dbg.contains("ObjectId(1)"));
    }
}
