pub use crate::entry::{CancelToken, Entry, EntryGuard, State, WriteWaitResult};
pub use crate::error::{InvalidStateError, InvalidStateKind, WaitError};
pub use crate::key::{BindingKey, EntryKey, ObjectId};
pub use crate::table::{EntryTable, InsertError, TableMetrics};
