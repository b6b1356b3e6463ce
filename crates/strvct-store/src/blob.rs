use std::any::Any;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use strvct_types::{BlobRecord, Record, BLOB_TYPE_NAME};

use crate::context::{LoadCx, StoreCx};
use crate::error::{StoreError, StoreResult};
use crate::meta::StoreMeta;
use crate::slot::SlotValue;
use crate::storable::Storable;

const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Immutable binary payload stored as a base64 data URL.
///
/// Encoding runs off the async executor and must finish before the blob's
/// record is built: call [`prepare_to_store`](Self::prepare_to_store), or
/// let the pool do it during commit. `record_for_store` on an unprepared
/// blob fails with [`StoreError::MissingPreparedData`].
#[derive(Default)]
pub struct BlobObject {
    meta: StoreMeta,
    media_type: String,
    data: Bytes,
    data_url: Option<String>,
}

impl BlobObject {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_media_type(data, DEFAULT_MEDIA_TYPE)
    }

    pub fn with_media_type(data: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            meta: StoreMeta::new(),
            media_type: media_type.into(),
            data: data.into(),
            data_url: None,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_prepared(&self) -> bool {
        self.data_url.is_some()
    }

    /// Encode the data URL on the blocking pool and cache it.
    pub async fn prepare_to_store(&mut self) -> StoreResult<()> {
        if let Some(data) = self.pending_preparation() {
            let encoded = encode_base64(data).await?;
            self.accept_prepared(encoded);
        }
        Ok(())
    }

    /// The blob record, available once prepared.
    pub fn blob_record(&self) -> StoreResult<BlobRecord> {
        let data_url = self.data_url.clone().ok_or_else(|| {
            StoreError::MissingPreparedData(
                self.meta.pid().map_or_else(|| "<unregistered>".to_string(), |pid| pid.to_string()),
            )
        })?;
        Ok(BlobRecord::new(data_url))
    }
}

/// Base64-encode `data` on tokio's blocking pool.
pub(crate) async fn encode_base64(data: Bytes) -> StoreResult<String> {
    tokio::task::spawn_blocking(move || STANDARD.encode(&data))
        .await
        .map_err(|e| StoreError::Preparation(e.to_string()))
}

/// Split `data:<media type>;base64,<payload>` into media type and bytes.
fn parse_data_url(url: &str) -> StoreResult<(String, Vec<u8>)> {
    let malformed = || StoreError::MalformedRecord(format!("bad data url: {}", truncate(url)));
    let rest = url.strip_prefix("data:").ok_or_else(malformed)?;
    let (header, payload) = rest.split_once(',').ok_or_else(malformed)?;
    let media_type = header.strip_suffix(";base64").ok_or_else(malformed)?;
    let data = STANDARD
        .decode(payload)
        .map_err(|e| StoreError::MalformedRecord(format!("bad base64 in data url: {e}")))?;
    let media_type = if media_type.is_empty() {
        DEFAULT_MEDIA_TYPE
    } else {
        media_type
    };
    Ok((media_type.to_string(), data))
}

fn truncate(s: &str) -> &str {
    let end = s.char_indices().nth(32).map_or(s.len(), |(i, _)| i);
    &s[..end]
}

impl Storable for BlobObject {
    fn type_name(&self) -> &'static str {
        BLOB_TYPE_NAME
    }

    fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut StoreMeta {
        &mut self.meta
    }

    fn stored_slot_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn stored_slots(&self) -> Vec<(&'static str, SlotValue)> {
        Vec::new()
    }

    fn apply_slot(&mut self, name: &str, _value: SlotValue) -> StoreResult<()> {
        Err(StoreError::invalid_slot(name, "blobs have no slots"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn record_for_store(&self, _cx: &mut StoreCx<'_>) -> StoreResult<Record> {
        if !self.meta.should_store() {
            return Err(StoreError::NotStorable(BLOB_TYPE_NAME.to_string()));
        }
        self.blob_record().map(Record::Blob)
    }

    fn load_from_record(&mut self, record: &Record, _cx: &mut LoadCx<'_>) -> StoreResult<()> {
        let Record::Blob(blob) = record else {
            return Err(StoreError::MalformedRecord(format!(
                "Blob cannot load a {} record",
                record.type_name()
            )));
        };
        let (media_type, data) = parse_data_url(&blob.data_url)?;
        self.media_type = media_type;
        self.data = Bytes::from(data);
        self.data_url = Some(blob.data_url.clone());
        Ok(())
    }

    fn content_bytes(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn pending_preparation(&self) -> Option<Bytes> {
        if self.data_url.is_some() {
            None
        } else {
            Some(self.data.clone())
        }
    }

    fn accept_prepared(&mut self, base64: String) {
        self.data_url = Some(format!("data:{};base64,{base64}", self.media_type));
    }
}

impl std::fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobObject")
            .field("pid", &self.meta.pid())
            .field("media_type", &self.media_type)
            .field("len", &self.data.len())
            .field("prepared", &self.is_prepared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::Scratch;

    #[test]
    fn unprepared_blob_cannot_produce_record() {
        let blob = BlobObject::new(&b"\x00\x01binary"[..]);
        let mut scratch = Scratch::new();
        let err = blob.record_for_store(&mut scratch.store_cx()).unwrap_err();
        assert!(matches!(err, StoreError::MissingPreparedData(_)));
    }

    #[tokio::test]
    async fn prepared_blob_produces_data_url() {
        let mut blob = BlobObject::with_media_type(&b"hello"[..], "text/plain");
        blob.prepare_to_store().await.unwrap();
        assert!(blob.is_prepared());
        assert!(blob.pending_preparation().is_none());

        let mut scratch = Scratch::new();
        let record = blob.record_for_store(&mut scratch.store_cx()).unwrap();
        assert_eq!(
            record.to_json_string().unwrap(),
            r#"{"type":"Blob","dataUrl":"data:text/plain;base64,aGVsbG8="}"#
        );
    }

    #[tokio::test]
    async fn load_decodes_data_url() {
        let mut original = BlobObject::new(vec![0u8, 255, 7, 42]);
        original.prepare_to_store().await.unwrap();
        let record = Record::Blob(original.blob_record().unwrap());

        let mut loaded = BlobObject::default();
        let mut scratch = Scratch::new();
        loaded.load_from_record(&record, &mut scratch.load_cx()).unwrap();
        assert_eq!(loaded.data().as_ref(), &[0u8, 255, 7, 42]);
        assert_eq!(loaded.media_type(), DEFAULT_MEDIA_TYPE);
        assert!(loaded.is_prepared());
    }

    #[test]
    fn bad_data_urls_are_rejected() {
        assert!(parse_data_url("hello").is_err());
        assert!(parse_data_url("data:text/plain,hello").is_err());
        assert!(parse_data_url("data:;base64,!!!").is_err());
        let (media, data) = parse_data_url("data:;base64,").unwrap();
        assert_eq!(media, DEFAULT_MEDIA_TYPE);
        assert!(data.is_empty());
    }

    #[test]
    fn apply_slot_is_rejected() {
        let mut blob = BlobObject::new(&b"x"[..]);
        assert!(blob.apply_slot("data", SlotValue::null()).is_err());
    }
}
