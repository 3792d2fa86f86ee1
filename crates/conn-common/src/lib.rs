//! Common helpers shared by the connectivity daemon's components.
//!
//! - [`SyncMap`]: a map that never creates entries behind your back
//! - [`RefCountSet`]: a multiset that reports first-add and last-remove,
//!   used to track routes installed by more than one consumer
//! - [`shell`]: command execution with proper quoting

mod error;
mod refcount;
pub mod shell;
mod sync_map;

pub use error::{ShellError, ShellResult};
pub use refcount::{RefChange, RefCountSet};
pub use sync_map::{HasRefCount, SyncMap, SyncMapError};
