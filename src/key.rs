//! Cache key types.
//!
//! Entries are keyed either by an object identifier or by a name-binding key.
//! The binding namespace carries a designated sentinel ([`BindingKey::Last`])
//! that upper-bounds every real name; a fetch raced past the end of the
//! namespace lands on an entry with this key, and only such an entry may
//! abandon its fetch (see
//! [`EntryGuard::set_evicted_abandon_fetching`](crate::entry::EntryGuard::set_evicted_abandon_fetching)).
//!
//! ## Key Components
//! - [`EntryKey`]: the trait every entry key implements. The default
//!   `is_last_binding` of `false` is right for anything except the sentinel.
//! - [`ObjectId`]: 64-bit object identifier.
//! - [`BindingKey`]: a named binding or the `Last` sentinel, totally ordered
//!   with `Last` greatest.

use std::fmt;

/// A key identifying one cache entry.
///
/// The `Debug` bound feeds the entry identity strings carried by timeout and
/// invalid-state errors.
pub trait EntryKey: fmt::Debug {
    /// Whether this key is the sentinel upper bound of the binding namespace.
    #[inline]
    fn is_last_binding(&self) -> bool {
        false
    }
}

/// 64-bit identifier of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

impl EntryKey for ObjectId {}

/// Key of a name binding, or the sentinel that sorts after every name.
///
/// Derived ordering puts `Name` before `Last` and orders names
/// lexicographically, so `Last` is the greatest key in the namespace.
///
/// # Example
///
/// ```
/// use txcache::key::BindingKey;
///
/// let a = BindingKey::name("alpha");
/// let z = BindingKey::name("zulu");
/// assert!(a < z);
/// assert!(z < BindingKey::Last);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKey {
    /// A real, named binding.
    Name(String),
    /// The designated end of the binding namespace.
    Last,
}

impl BindingKey {
    /// Creates a key for the named binding.
    pub fn name(name: impl Into<String>) -> Self {
        BindingKey::Name(name.into())
    }

    /// Returns the binding name, or `None` for the sentinel.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            BindingKey::Name(name) => Some(name),
            BindingKey::Last => None,
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKey::Name(name) => f.write_str(name),
            BindingKey::Last => f.write_str("<last>"),
        }
    }
}

impl EntryKey for BindingKey {
    #[inline]
    fn is_last_binding(&self) -> bool {
        matches!(self, BindingKey::Last)
    }
}

// Plain keys for embedders that bring their own identifier scheme.
impl EntryKey for u64 {}
impl EntryKey for String {}
impl EntryKey for &str {}
