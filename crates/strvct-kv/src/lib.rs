//! Key-value substrate for the STRVCT object store.
//!
//! A [`Folder`] is one named partition of string keys mapped to text or
//! binary values. Writes go through a [`KeyValueTransaction`], which queues
//! add/update/remove requests and applies them all-or-nothing on commit.
//!
//! # Backends
//!
//! - [`InMemoryFolder`] -- `BTreeMap`-based folder for tests and embedding
//! - [`FileFolder`] -- the same table, made durable by an append-only
//!   journal of committed batches
//!
//! # Rules
//!
//! 1. One transaction at a time per folder: `begin()` waits on the folder's
//!    admission gate and the transaction holds it until it finishes.
//! 2. Requests are submitted in call order; only completion of the whole
//!    batch makes any of them visible.
//! 3. A per-request failure aborts the transaction. Nothing is retried here.
//! 4. Reads see committed state only.

pub mod config;
pub mod error;
pub mod file;
pub mod gate;
pub mod journal;
pub mod memory;
pub mod request;
pub mod traits;
pub mod transaction;
pub mod value;

mod table;

pub use config::{KvConfig, SyncMode};
pub use error::{KvError, KvResult};
pub use file::FileFolder;
pub use gate::{Admission, AdmissionGate};
pub use journal::{Journal, Recovery};
pub use memory::InMemoryFolder;
pub use request::{TxAction, TxRequest};
pub use traits::{Folder, NativeTransaction};
pub use transaction::KeyValueTransaction;
pub use value::KvValue;
