//! Foundation types for the STRVCT object store.
//!
//! Every other `strvct-*` crate depends on this one. It defines the shapes
//! that cross the persistence boundary: the identifier under which an
//! object is stored and the serialized record written under that key.
//!
//! # Key Types
//!
//! - [`Pid`]: Persistent identifier naming one stored record
//! - [`Record`]: Serialized form of one object (`ObjectRecord` or `BlobRecord`)
//! - [`pid_token`] / [`token_pid`]: Conversion between pids and the
//!   `{"*": pid}` reference tokens embedded in record entries

pub mod error;
pub mod pid;
pub mod record;

pub use error::TypeError;
pub use pid::Pid;
pub use record::{pid_token, token_pid, BlobRecord, ObjectRecord, Record, BLOB_TYPE_NAME};
