use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, error, warn};

use crate::config::SyncMode;
use crate::error::{KvError, KvResult};
use crate::request::TxRequest;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    file: File,
    /// End of the last complete frame.
    offset: u64,
}

/// What replaying a journal produced.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Committed batches, oldest first.
    pub batches: Vec<Vec<TxRequest>>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
}

/// Append-only journal of committed transaction batches.
///
/// On-disk format, one frame per committed transaction:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized Vec<TxRequest>)]
/// ```
///
/// Replay stops at the first frame that is short, fails its CRC, or does
/// not decode. Everything after that point belongs to a torn write and is
/// discarded, so a batch is either fully replayed or not at all. A failed
/// append truncates the file back to the previous frame boundary.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
}

impl Journal {
    /// Open (or create) the journal file at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> KvResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter { file, offset }),
            sync_mode,
        })
    }

    /// Append one committed batch. Returns the byte offset of the frame.
    pub fn append(&self, batch: &[TxRequest]) -> KvResult<u64> {
        self.append_with(batch, |file, frame| file.write_all(frame))
    }

    /// Append through `write`, which receives the whole encoded frame.
    fn append_with<F>(&self, batch: &[TxRequest], write: F) -> KvResult<u64>
    where
        F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        let frame = encode_frame(batch)?;

        let mut w = self.writer.lock().expect("journal mutex poisoned");
        let frame_offset = w.offset;

        let written = write(&mut w.file, &frame).and_then(|()| match self.sync_mode {
            SyncMode::EveryWrite => w.file.sync_all(),
            SyncMode::OsDefault => Ok(()),
        });
        if let Err(e) = written {
            // Drop any partial frame so the next append starts on a boundary.
            if let Err(trunc) = w.file.set_len(frame_offset) {
                error!(offset = frame_offset, error = %trunc, "journal rollback failed");
            }
            warn!(offset = frame_offset, error = %e, "journal append failed");
            return Err(e.into());
        }

        w.offset += frame.len() as u64;

        debug!(offset = frame_offset, requests = batch.len(), "journal append");
        Ok(frame_offset)
    }

    /// Read every valid batch front to back.
    pub fn recover(&self) -> KvResult<Recovery> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut recovery = Recovery::default();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "torn journal frame; stopping replay");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated journal frame; stopping replay");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "journal CRC mismatch; stopping replay"
                );
                break;
            }

            match bincode::deserialize::<Vec<TxRequest>>(&payload) {
                Ok(batch) => recovery.batches.push(batch),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable journal frame; stopping replay");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        recovery.valid_len = offset;
        debug!(batches = recovery.batches.len(), "journal replay complete");
        Ok(recovery)
    }

    /// Cut the file back to `len` bytes, dropping a torn tail.
    pub fn truncate_to(&self, len: u64) -> KvResult<()> {
        let mut w = self.writer.lock().expect("journal mutex poisoned");
        if len >= w.offset {
            return Ok(());
        }
        w.file.set_len(len)?;
        w.file.sync_all()?;
        warn!(from = w.offset, to = len, "journal tail discarded");
        w.offset = len;
        Ok(())
    }

    /// Replace the whole journal with a single batch.
    ///
    /// The new content is written to a sibling file, synced, then renamed
    /// over the journal, so a crash leaves either the old or the new file.
    pub fn rewrite(&self, batch: &[TxRequest]) -> KvResult<()> {
        let frame = if batch.is_empty() {
            Vec::new()
        } else {
            encode_frame(batch)?
        };
        let tmp_path = self.path.with_extension("compact");

        let mut w = self.writer.lock().expect("journal mutex poisoned");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            tmp.write_all(&frame)?;
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.offset = file.metadata()?.len();
        w.file = file;

        debug!(requests = batch.len(), bytes = w.offset, "journal rewritten");
        Ok(())
    }

    /// Current end of the journal in bytes.
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("journal mutex poisoned").offset
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Header plus bincode payload for one batch.
fn encode_frame(batch: &[TxRequest]) -> KvResult<Vec<u8>> {
    let payload = bincode::serialize(batch).map_err(|e| KvError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| KvError::Engine(format!("batch of {} bytes too large", payload.len())))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("offset", &self.offset())
            .finish()
    }
}
