//! Object-graph persistence for STRVCT.
//!
//! Live objects implement [`Storable`] and are shared through
//! [`ObjectRef`] handles. An [`ObjectPool`] assigns each stored object a
//! [`Pid`](strvct_types::Pid), turns objects into records (nested objects
//! become `{"*": pid}` tokens), and writes every dirty record through one
//! [`PersistentAtomicMap`](strvct_atomic::PersistentAtomicMap) commit.
//!
//! Loading goes the other way: a record is parsed, the registered type is
//! instantiated as a placeholder, and its slots are filled with references
//! resolved through the pool's arena. Placeholders are visible to the rest
//! of the graph before their own slots are populated, which is what lets
//! reference cycles load without recursion blowing up.
//!
//! [`BlobObject`] and [`StorableNode`] are the two stock storable types.

pub mod blob;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod meta;
pub mod node;
pub mod pool;
pub mod registry;
pub mod slot;
pub mod storable;

pub use blob::BlobObject;
pub use config::PoolConfig;
pub use context::{LoadCx, StoreCx};
pub use error::{StoreError, StoreResult};
pub use handle::{ObjectRef, WeakObjectRef};
pub use meta::{DirtySink, StoreMeta, StoreStatus};
pub use node::StorableNode;
pub use pool::ObjectPool;
pub use registry::TypeRegistry;
pub use slot::SlotValue;
pub use storable::Storable;
