//! Transactional snapshot maps for the STRVCT object store.
//!
//! [`AtomicMap`] keeps a committed snapshot and, while a transaction is
//! open, an overlay of pending changes. Reads consult the overlay first;
//! `commit()` folds it into the snapshot and `revert()` throws it away.
//! Removals are recorded as tombstones so "pending delete" and "pending
//! set" stay distinct until commit.
//!
//! [`PersistentAtomicMap`] layers the same map over a [`Folder`]: the
//! snapshot is loaded from the folder on open and every commit goes to the
//! folder as one [`KeyValueTransaction`] before it touches the snapshot.
//!
//! Enumeration (`for_each_kv`, `keys`, `count`) is only allowed outside a
//! transaction, which keeps reads free of merge-iteration.
//!
//! [`Folder`]: strvct_kv::Folder
//! [`KeyValueTransaction`]: strvct_kv::KeyValueTransaction

pub mod error;
pub mod map;
pub mod persistent;

pub use error::{AtomicError, AtomicResult};
pub use map::AtomicMap;
pub use persistent::PersistentAtomicMap;
