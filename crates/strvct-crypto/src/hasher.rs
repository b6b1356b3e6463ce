use strvct_types::Pid;

/// Domain-separated BLAKE3 content hasher.
///
/// The domain tag is prepended to every hash computation, so a blob digest
/// never equals a plain BLAKE3 hash of the same bytes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for blob contents.
    pub const BLOB: Self = Self {
        domain: "strvct-blob-v1",
    };

    /// Raw 32-byte digest with domain separation.
    pub fn digest(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Content-addressed pid for `data`.
    pub fn pid(&self, data: &[u8]) -> Pid {
        Pid::from_hash(self.digest(data))
    }
}
