//! Content hashing for the STRVCT object store.
//!
//! Blobs are immutable, so their pid is derived from their bytes: two blobs
//! with identical content resolve to one record. Hashes are BLAKE3 with a
//! domain tag so a blob digest can never collide with another kind of
//! content-addressed key.

pub mod hasher;

pub use hasher::ContentHasher;
