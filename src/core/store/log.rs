//! Append-only, checksummed log file backing the queue.
//!
//! Layout:
//! - 32-byte header: magic `CUSTQLOG`, format version (`u32` LE), identity
//!   floor (`u64` LE, the lowest id the store may hand out next), rest zero.
//! - Frames: kind (`u8`), payload length (`u32` LE), CRC32 over kind and
//!   payload (`u32` LE), payload.
//!
//! A put frame carries a whole record; a delete frame carries the ids it
//! removes. Opening the log replays every frame into an in-memory index. A
//! torn tail left by a crash mid-append is truncated; a checksum mismatch is
//! reported as corruption.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher as Crc32Hasher;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::StoreError;
use crate::core::record::{Record, RecordId};
use crate::core::store::Store;

const HEADER_MAGIC: &[u8; 8] = b"CUSTQLOG";
const HEADER_VERSION: u32 = 1;
const HEADER_LEN: u64 = 32;
const FRAME_HEADER_LEN: usize = 1 + 4 + 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;

/// Flush and compaction policy for a [`LogStore`].
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Call fsync every N appends. If `None`, do not fsync based on count.
    pub fsync_every_n: Option<usize>,
    /// Call fsync if at least this long has passed since the last one.
    /// Checked on each append. If `None`, do not fsync based on time.
    pub fsync_interval: Option<Duration>,
    /// Rewrite the log once this many frames no longer describe a live
    /// record. If `None`, only [`LogStore::compact`] rewrites it.
    pub compact_after: Option<usize>,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            fsync_every_n: Some(1),
            fsync_interval: None,
            compact_after: Some(1024),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStoreStats {
    /// Frames appended by this process.
    pub appends: u64,
    /// Bytes appended by this process, frame headers included.
    pub bytes_written: u64,
    pub compactions: u64,
    pub live_records: usize,
    pub obsolete_frames: usize,
}

#[derive(Debug)]
struct LogInner {
    file: File,
    records: BTreeMap<RecordId, Record>,
    next_id: u64,
    write_offset: u64,
    unflushed: usize,
    last_fsync: Instant,
    obsolete_frames: usize,
    appends: u64,
    bytes_written: u64,
    compactions: u64,
}

#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    config: LogStoreConfig,
    inner: Mutex<LogInner>,
}

enum Entry {
    Put(Record),
    Delete(Vec<RecordId>),
}

struct Replayed {
    records: BTreeMap<RecordId, Record>,
    max_id: u64,
    end_offset: u64,
    obsolete_frames: usize,
}

impl LogStore {
    /// Open or create a log at `path` with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_config(path, LogStoreConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: LogStoreConfig,
    ) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path_ref)?;

        let len = file.metadata()?.len();
        let id_floor = if len == 0 {
            write_header(&mut file, 1)?;
            1
        } else if len < HEADER_LEN {
            return Err(StoreError::Corruption(
                "file too small to contain header".to_string(),
            ));
        } else {
            read_header(&mut file)?
        };

        let replayed = replay(&mut file)?;
        let file_len = file.metadata()?.len();
        if replayed.end_offset < file_len {
            warn!(
                path = ?path_ref,
                dropped_bytes = file_len - replayed.end_offset,
                "truncating torn tail of store log"
            );
            file.set_len(replayed.end_offset)?;
        }
        file.seek(SeekFrom::Start(replayed.end_offset))?;

        info!(
            path = ?path_ref,
            records = replayed.records.len(),
            "store log opened"
        );

        let inner = LogInner {
            file,
            next_id: id_floor.max(replayed.max_id.saturating_add(1)),
            records: replayed.records,
            write_offset: replayed.end_offset,
            unflushed: 0,
            last_fsync: Instant::now(),
            obsolete_frames: replayed.obsolete_frames,
            appends: 0,
            bytes_written: 0,
            compactions: 0,
        };

        Ok(Self {
            path: path_ref.to_path_buf(),
            config,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LogStoreStats {
        let inner = self.inner.lock();
        LogStoreStats {
            appends: inner.appends,
            bytes_written: inner.bytes_written,
            compactions: inner.compactions,
            live_records: inner.records.len(),
            obsolete_frames: inner.obsolete_frames,
        }
    }

    /// Force a flush and an fsync, regardless of configuration.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.sync_data()?;
        inner.unflushed = 0;
        inner.last_fsync = Instant::now();
        Ok(())
    }

    /// Rewrite the log so it holds exactly one put frame per live record.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut LogInner) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("compact");
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&tmp_path)?;

        write_header(&mut file, inner.next_id)?;
        let mut offset = HEADER_LEN;
        for record in inner.records.values() {
            let frame = encode_frame(KIND_PUT, &encode_put(record)?)?;
            file.write_all(&frame)?;
            offset += frame.len() as u64;
        }
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(
            path = ?self.path,
            dropped_frames = inner.obsolete_frames,
            "store log compacted"
        );

        inner.file = file;
        inner.write_offset = offset;
        inner.obsolete_frames = 0;
        inner.unflushed = 0;
        inner.last_fsync = Instant::now();
        inner.compactions += 1;
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut LogInner) {
        let Some(threshold) = self.config.compact_after else {
            return;
        };
        if inner.obsolete_frames < threshold {
            return;
        }
        if let Err(e) = self.compact_locked(inner) {
            // The live log is untouched when compaction fails.
            warn!(path = ?self.path, error = %e, "store log compaction failed");
        }
    }

    /// Writes one frame and applies the fsync policy. On any failure the
    /// file is cut back to the last good offset.
    fn append(&self, inner: &mut LogInner, kind: u8, payload: &[u8]) -> Result<(), StoreError> {
        let frame = encode_frame(kind, payload)?;

        if let Err(e) = write_and_sync(inner, &frame, &self.config) {
            let offset = inner.write_offset;
            if let Err(rollback) = inner
                .file
                .set_len(offset)
                .and_then(|_| inner.file.seek(SeekFrom::Start(offset)).map(|_| ()))
            {
                warn!(error = %rollback, "failed to roll back partial store log append");
            }
            return Err(e);
        }

        inner.write_offset += frame.len() as u64;
        inner.appends = inner.appends.saturating_add(1);
        inner.bytes_written = inner.bytes_written.saturating_add(frame.len() as u64);
        Ok(())
    }
}

impl Store for LogStore {
    #[tracing::instrument(skip(self, record), fields(name = record.name()))]
    fn save(&self, record: &Record) -> Result<Record, StoreError> {
        let mut inner = self.inner.lock();
        let id = match record.id() {
            Some(id) if inner.records.contains_key(&id) => {
                return Err(StoreError::DuplicateIdentity(id));
            }
            Some(id) => id,
            None => RecordId::from_raw(inner.next_id),
        };
        let next = id.value().checked_add(1).ok_or_else(|| {
            StoreError::Unavailable("identity space exhausted".to_string())
        })?;
        let saved = record.with_identity(id);

        self.append(&mut inner, KIND_PUT, &encode_put(&saved)?)?;

        inner.next_id = inner.next_id.max(next);
        inner.records.insert(id, saved.clone());
        self.maybe_compact(&mut inner);
        Ok(saved)
    }

    fn delete(&self, record: &Record) -> Result<(), StoreError> {
        self.delete_all(std::slice::from_ref(record))
    }

    #[tracing::instrument(skip(self, records), fields(count = records.len()))]
    fn delete_all(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let ids: Vec<RecordId> = records
            .iter()
            .filter_map(Record::id)
            .filter(|id| inner.records.contains_key(id))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        self.append(&mut inner, KIND_DELETE, &encode_delete(&ids)?)?;

        for id in &ids {
            inner.records.remove(id);
        }
        inner.obsolete_frames += ids.len() + 1;
        self.maybe_compact(&mut inner);
        Ok(())
    }

    fn find_all(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.inner.lock().records.values().cloned().collect())
    }
}

fn write_and_sync(
    inner: &mut LogInner,
    frame: &[u8],
    config: &LogStoreConfig,
) -> Result<(), StoreError> {
    inner.file.write_all(frame)?;
    inner.unflushed += 1;

    let mut should_sync = config
        .fsync_every_n
        .is_some_and(|every_n| inner.unflushed >= every_n);
    if !should_sync {
        should_sync = config
            .fsync_interval
            .is_some_and(|interval| inner.last_fsync.elapsed() >= interval);
    }

    if should_sync {
        let span = tracing::trace_span!("store_log_fsync");
        let _guard = span.enter();
        inner.file.flush()?;
        inner.file.sync_data()?;
        inner.unflushed = 0;
        inner.last_fsync = Instant::now();
    }
    Ok(())
}

fn write_header(file: &mut File, id_floor: u64) -> Result<(), StoreError> {
    let mut buf = [0u8; HEADER_LEN as usize];
    buf[..8].copy_from_slice(HEADER_MAGIC);
    buf[8..12].copy_from_slice(&HEADER_VERSION.to_le_bytes());
    buf[12..20].copy_from_slice(&id_floor.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Validates the header and returns the persisted identity floor.
fn read_header(file: &mut File) -> Result<u64, StoreError> {
    let mut buf = [0u8; HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            StoreError::Corruption("unexpected EOF while reading store log header".to_string())
        }
        _ => StoreError::Io(e),
    })?;

    if &buf[..8] != HEADER_MAGIC {
        return Err(StoreError::Corruption("invalid store log magic".to_string()));
    }

    let mut version_bytes = [0u8; 4];
    version_bytes.copy_from_slice(&buf[8..12]);
    let version = u32::from_le_bytes(version_bytes);
    if version != HEADER_VERSION {
        return Err(StoreError::Corruption(format!(
            "unsupported store log version: {version}"
        )));
    }

    let mut floor_bytes = [0u8; 8];
    floor_bytes.copy_from_slice(&buf[12..20]);
    Ok(u64::from_le_bytes(floor_bytes).max(1))
}

fn replay(file: &mut File) -> Result<Replayed, StoreError> {
    file.seek(SeekFrom::Start(HEADER_LEN))?;
    let mut reader = BufReader::new(file);

    let mut replayed = Replayed {
        records: BTreeMap::new(),
        max_id: 0,
        end_offset: HEADER_LEN,
        obsolete_frames: 0,
    };

    while let Some((kind, payload)) = read_frame(&mut reader, replayed.end_offset)? {
        match decode_entry(kind, &payload)? {
            Entry::Put(record) => {
                if let Some(id) = record.id() {
                    replayed.max_id = replayed.max_id.max(id.value());
                    if replayed.records.insert(id, record).is_some() {
                        replayed.obsolete_frames += 1;
                    }
                }
            }
            Entry::Delete(ids) => {
                let removed = ids
                    .iter()
                    .filter(|id| replayed.records.remove(id).is_some())
                    .count();
                replayed.obsolete_frames += removed + 1;
            }
        }
        replayed.end_offset += (FRAME_HEADER_LEN + payload.len()) as u64;
    }

    Ok(replayed)
}

/// Reads the next frame. `None` means clean EOF or a torn tail.
fn read_frame<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(u8, Vec<u8>)>, StoreError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    if read_full(reader, &mut header)? < header.len() {
        return Ok(None);
    }

    let kind = header[0];
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[1..5]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&header[5..9]);
    let expected_crc = u32::from_le_bytes(crc_bytes);

    if len > MAX_FRAME_LEN {
        return Err(StoreError::Corruption(format!(
            "frame at offset {offset} claims {len} bytes"
        )));
    }

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)? < len {
        return Ok(None);
    }

    let actual_crc = checksum(kind, &payload);
    if actual_crc != expected_crc {
        return Err(StoreError::Corruption(format!(
            "CRC mismatch at offset {offset}: expected {expected_crc:08x}, got {actual_crc:08x}"
        )));
    }

    Ok(Some((kind, payload)))
}

/// Fills `buf` as far as the reader allows and returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0usize;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

fn checksum(kind: u8, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(&[kind]);
    hasher.update(payload);
    hasher.finalize()
}

fn encode_frame(kind: u8, payload: &[u8]) -> Result<Vec<u8>, StoreError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| StoreError::Corruption("record too large".to_string()))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(kind);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&checksum(kind, payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn encode_put(record: &Record) -> Result<Vec<u8>, StoreError> {
    let id = record
        .id()
        .ok_or_else(|| StoreError::Corruption("cannot persist a record without identity".into()))?;

    let mut buf = BytesMut::new();
    buf.put_u64(id.value());
    buf.put_u64(record.created_at());
    put_str(&mut buf, record.name())?;
    put_str(&mut buf, record.description())?;
    put_str(&mut buf, record.number())?;
    Ok(buf.to_vec())
}

fn encode_delete(ids: &[RecordId]) -> Result<Vec<u8>, StoreError> {
    let count = u32::try_from(ids.len())
        .map_err(|_| StoreError::Corruption("too many ids in one delete".to_string()))?;

    let mut buf = BytesMut::with_capacity(4 + ids.len() * 8);
    buf.put_u32(count);
    for id in ids {
        buf.put_u64(id.value());
    }
    Ok(buf.to_vec())
}

fn put_str(buf: &mut BytesMut, value: &str) -> Result<(), StoreError> {
    let len = u32::try_from(value.len())
        .map_err(|_| StoreError::Corruption("record field too long".to_string()))?;
    buf.put_u32(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn decode_entry(kind: u8, bytes: &[u8]) -> Result<Entry, StoreError> {
    let mut slice = bytes;
    match kind {
        KIND_PUT => {
            if slice.remaining() < 16 {
                return Err(StoreError::Corruption(
                    "put frame too short to contain header".to_string(),
                ));
            }
            let id = RecordId::from_raw(slice.get_u64());
            let created_at = slice.get_u64();
            let name = get_str(&mut slice, "name")?;
            let description = get_str(&mut slice, "description")?;
            let number = get_str(&mut slice, "number")?;
            Ok(Entry::Put(Record::restore(
                id,
                name,
                description,
                number,
                created_at,
            )))
        }
        KIND_DELETE => {
            if slice.remaining() < 4 {
                return Err(StoreError::Corruption(
                    "delete frame too short to contain count".to_string(),
                ));
            }
            let count = slice.get_u32() as usize;
            if slice.remaining() != count * 8 {
                return Err(StoreError::Corruption(format!(
                    "delete frame announces {count} ids but holds {} bytes",
                    slice.remaining()
                )));
            }
            let ids = (0..count)
                .map(|_| RecordId::from_raw(slice.get_u64()))
                .collect();
            Ok(Entry::Delete(ids))
        }
        other => Err(StoreError::Corruption(format!(
            "unknown frame kind {other}"
        ))),
    }
}

fn get_str(slice: &mut &[u8], field: &str) -> Result<String, StoreError> {
    if slice.remaining() < 4 {
        return Err(StoreError::Corruption(format!(
            "put frame truncated before {field}"
        )));
    }
    let len = slice.get_u32() as usize;
    if slice.remaining() < len {
        return Err(StoreError::Corruption(format!(
            "put frame truncated while reading {field}"
        )));
    }
    let bytes = slice.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StoreError::Corruption(format!("{field} in put frame is not valid UTF-8")))
}
