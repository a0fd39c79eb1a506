//! Durable remote log backed by append-only files.
//!
//! Each collection lives in `<dir>/<collection>.log` as a sequence of
//! entries:
//!
//! ```text
//! magic(4) version(1) op(1) seq(8) body_len(4) body(body_len) crc32(4)
//! ```
//!
//! `op` is a put (body = MessagePack record) or a delete (empty body).
//! The current contents of a collection are rebuilt by replaying its file
//! on first access. A torn entry at the end of a file is cut off.

use super::{backlog, sort_records, take_last, DeltaStream, FeedHub, RemoteLog};
use crate::error::{EventsError, Result};
use crate::types::{Cursor, Delta, DeltaKind, EventKey, EventRecord, OrderBy};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes for log entries.
const LOG_MAGIC: &[u8; 4] = b"EVT\0";

/// Current entry format version.
const LOG_VERSION: u8 = 1;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

/// File log configuration.
#[derive(Clone, Debug)]
pub struct FileLogConfig {
    /// Directory holding one file per collection.
    pub dir: PathBuf,

    /// Sync to disk every N writes (0 and 1 both mean every write).
    pub sync_interval: u64,
}

impl FileLogConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_interval(mut self, sync_interval: u64) -> Self {
        self.sync_interval = sync_interval;
        self
    }
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./events-log"),
            sync_interval: 100,
        }
    }
}

/// One decoded log entry.
#[derive(Clone, Debug, PartialEq)]
enum Entry {
    Put { seq: u64, record: EventRecord },
    Delete { seq: u64 },
}

impl Entry {
    fn encode(&self) -> Result<Vec<u8>> {
        let (op, seq, body) = match self {
            Entry::Put { seq, record } => (OP_PUT, *seq, rmp_serde::to_vec_named(record)?),
            Entry::Delete { seq } => (OP_DELETE, *seq, Vec::new()),
        };

        let mut buf = Vec::with_capacity(4 + 1 + 1 + 8 + 4 + body.len() + 4);
        buf.extend_from_slice(LOG_MAGIC);
        buf.push(LOG_VERSION);
        buf.push(op);
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(buf)
    }

    fn decode(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(EventsError::InvalidFormat("Invalid entry magic".into()));
        }

        let mut header = [0u8; 2];
        reader.read_exact(&mut header)?;
        if header[0] != LOG_VERSION {
            return Err(EventsError::InvalidFormat(format!(
                "Unsupported log version: {}",
                header[0]
            )));
        }
        let op = header[1];

        let mut seq_bytes = [0u8; 8];
        reader.read_exact(&mut seq_bytes)?;
        let seq = u64::from_le_bytes(seq_bytes);

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let mut body = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
        reader.read_exact(&mut body)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&body);
        if stored != computed {
            return Err(EventsError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        match op {
            OP_PUT => Ok(Entry::Put {
                seq,
                record: rmp_serde::from_slice(&body)?,
            }),
            OP_DELETE => Ok(Entry::Delete { seq }),
            other => Err(EventsError::InvalidFormat(format!("Unknown entry op: {}", other))),
        }
    }
}

/// Open file and materialized contents of one collection.
struct CollectionFile {
    file: File,
    size: u64,
    writes_since_sync: u64,
    next_seq: u64,
    records: BTreeMap<EventKey, EventRecord>,
}

impl CollectionFile {
    fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let mut records = BTreeMap::new();
        let mut max_seq = 0u64;
        let mut offset = 0u64;

        file.seek(SeekFrom::Start(0))?;
        let mut reader = std::io::BufReader::new(&mut file);
        while offset < file_size {
            match Entry::decode(&mut reader) {
                Ok(entry) => {
                    match entry {
                        Entry::Put { seq, record } => {
                            max_seq = max_seq.max(seq);
                            records.insert(EventKey::from_sequence(seq), record);
                        }
                        Entry::Delete { seq } => {
                            max_seq = max_seq.max(seq);
                            records.remove(&EventKey::from_sequence(seq));
                        }
                    }
                    offset = reader.stream_position()?;
                }
                Err(EventsError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(path = %path.display(), offset, "truncating torn entry at end of log");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        drop(reader);

        if offset < file_size {
            file.set_len(offset)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), records = records.len(), "collection loaded");

        Ok(Self {
            file,
            size: offset,
            writes_since_sync: 0,
            next_seq: max_seq + 1,
            records,
        })
    }

    fn write(&mut self, entry: &Entry, sync_interval: u64) -> Result<()> {
        let bytes = entry.encode()?;
        self.file.seek(SeekFrom::Start(self.size))?;
        if let Err(e) = self.file.write_all(&bytes) {
            self.discard_partial();
            return Err(e.into());
        }
        self.size += bytes.len() as u64;

        self.writes_since_sync += 1;
        if self.writes_since_sync >= sync_interval.max(1) {
            self.file.sync_all()?;
            self.writes_since_sync = 0;
        }
        Ok(())
    }

    /// Cut off bytes past the last complete entry left by a failed write.
    fn discard_partial(&mut self) {
        if let Err(e) = self.file.set_len(self.size) {
            warn!(size = self.size, error = %e, "failed to cut partial entry");
        }
    }
}

/// Remote log persisted to local files.
///
/// The directory is locked exclusively while the log is open. Live feeds
/// observe changes made through this instance.
pub struct FileLog {
    config: FileLogConfig,
    _lock_file: File,
    collections: Mutex<HashMap<String, CollectionFile>>,
    feeds: Arc<FeedHub>,
}

impl FileLog {
    /// Open (or create) the log directory.
    pub fn open(config: FileLogConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let lock_file = Self::acquire_lock(&config.dir)?;

        Ok(Self {
            config,
            _lock_file: lock_file,
            collections: Mutex::new(HashMap::new()),
            feeds: FeedHub::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.dir
    }

    /// Replace the record under `key`, reporting an update (or an insert if
    /// the key was unknown).
    pub fn update(&self, collection: &str, key: &EventKey, record: EventRecord) -> Result<()> {
        let seq = Self::parse_key(key)?;
        let mut collections = self.collections.lock();
        let coll = self.collection(&mut collections, collection)?;

        coll.write(
            &Entry::Put {
                seq,
                record: record.clone(),
            },
            self.config.sync_interval,
        )?;
        coll.next_seq = coll.next_seq.max(seq + 1);

        let kind = match coll.records.insert(key.clone(), record.clone()) {
            Some(_) => DeltaKind::Update,
            None => DeltaKind::Insert,
        };
        self.feeds
            .broadcast(collection, Delta::new(kind, key.clone(), record));
        Ok(())
    }

    /// Remove the record under `key`, reporting a delete with its last value.
    pub fn remove(&self, collection: &str, key: &EventKey) -> Result<Option<EventRecord>> {
        let seq = Self::parse_key(key)?;
        let mut collections = self.collections.lock();
        let coll = self.collection(&mut collections, collection)?;

        let Some(record) = coll.records.remove(key) else {
            return Ok(None);
        };
        coll.write(&Entry::Delete { seq }, self.config.sync_interval)?;

        self.feeds.broadcast(
            collection,
            Delta::new(DeltaKind::Delete, key.clone(), record.clone()),
        );
        Ok(Some(record))
    }

    /// Number of live records in a collection.
    pub fn len(&self, collection: &str) -> Result<usize> {
        let mut collections = self.collections.lock();
        Ok(self.collection(&mut collections, collection)?.records.len())
    }

    /// Number of open live feeds.
    pub fn feed_count(&self) -> usize {
        self.feeds.feed_count()
    }

    /// Force sync all collection files to disk.
    pub fn sync(&self) -> Result<()> {
        let mut collections = self.collections.lock();
        for coll in collections.values_mut() {
            coll.file.sync_all()?;
            coll.writes_since_sync = 0;
        }
        Ok(())
    }

    fn collection<'a>(
        &self,
        collections: &'a mut HashMap<String, CollectionFile>,
        name: &str,
    ) -> Result<&'a mut CollectionFile> {
        if !collections.contains_key(name) {
            let path = self.collection_path(name)?;
            collections.insert(name.to_string(), CollectionFile::open(&path)?);
        }
        collections
            .get_mut(name)
            .ok_or_else(|| EventsError::Corruption(format!("collection {} vanished", name)))
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(EventsError::InvalidFormat(format!(
                "Invalid collection name: {:?}",
                name
            )));
        }
        Ok(self.config.dir.join(format!("{}.log", name)))
    }

    fn parse_key(key: &EventKey) -> Result<u64> {
        u64::from_str_radix(key.as_str(), 16)
            .map_err(|_| EventsError::MalformedRecord(format!("foreign key {}", key)))
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| EventsError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for FileLog {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[async_trait]
impl RemoteLog for FileLog {
    fn is_connected(&self) -> bool {
        true
    }

    async fn append(&self, collection: &str, record: &EventRecord) -> Result<EventKey> {
        let mut collections = self.collections.lock();
        let coll = self.collection(&mut collections, collection)?;

        let seq = coll.next_seq;
        coll.write(
            &Entry::Put {
                seq,
                record: record.clone(),
            },
            self.config.sync_interval,
        )?;
        coll.next_seq += 1;

        let key = EventKey::from_sequence(seq);
        coll.records.insert(key.clone(), record.clone());

        self.feeds.broadcast(
            collection,
            Delta::new(DeltaKind::Insert, key.clone(), record.clone()),
        );
        Ok(key)
    }

    async fn query_last(
        &self,
        collection: &str,
        limit: usize,
        order: OrderBy,
    ) -> Result<Vec<(EventKey, EventRecord)>> {
        let mut collections = self.collections.lock();
        let coll = self.collection(&mut collections, collection)?;

        let mut records: Vec<_> = coll
            .records
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        sort_records(&mut records, order);
        Ok(take_last(records, limit))
    }

    async fn subscribe_from(&self, collection: &str, cursor: Cursor) -> Result<DeltaStream> {
        let mut collections = self.collections.lock();
        let coll = self.collection(&mut collections, collection)?;

        let replay = backlog(coll.records.iter(), cursor);
        Ok(self.feeds.open(collection, cursor, replay))
    }
}
