use crate::error::{Result, VectorStoreError};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const MAGIC: &[u8; 4] = b"SFVS";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 12;

/// Validity byte values for on-disk records.
const RECORD_LIVE: u8 = 1;
const RECORD_TOMBSTONE: u8 = 0;

/// Fraction of tombstoned records that triggers a compaction pass.
pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.25;

/// One stored vector as seen by readers. Vectors are shared via `Arc` so
/// snapshots stay cheap even at 100k+ items.
#[derive(Clone)]
pub struct SnapshotSlot {
    id: i64,
    live: bool,
    vector: Arc<[f32]>,
}

impl SnapshotSlot {
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live
    }

    #[must_use]
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }
}

/// An all-or-none view of the store taken at call time.
///
/// Appends and removals that happen after the snapshot was taken are
/// invisible to it, which gives scans read-stability without any global
/// locking. Re-snapshot to observe newer writes.
pub struct VectorSnapshot {
    dimension: usize,
    live_count: usize,
    slots: Vec<SnapshotSlot>,
}

impl VectorSnapshot {
    /// Number of live vectors in this snapshot.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Raw slot array, tombstones included, for range-partitioned scans.
    #[must_use]
    pub fn slots(&self) -> &[SnapshotSlot] {
        &self.slots
    }

    /// Iterate live `(id, vector)` pairs. Finite and restartable.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[f32])> {
        self.slots
            .iter()
            .filter(|slot| slot.live)
            .map(|slot| (slot.id, slot.vector.as_ref()))
    }
}

struct StoreInner {
    path: PathBuf,
    dimension: usize,
    /// Single writer discipline: every disk mutation goes through this.
    file: Mutex<File>,
    slots: RwLock<Vec<SnapshotSlot>>,
    by_id: RwLock<HashMap<i64, usize>>,
    next_id: AtomicI64,
    dead: AtomicUsize,
    compaction_threshold: f32,
}

/// Append-only binary store of embedding vectors keyed by id.
///
/// On-disk layout: a fixed header (magic, format version, dimension)
/// followed by fixed-stride records `(id: u64 LE, validity: u8, dim × f32
/// LE)`. The stride is constant for a given dimension, so any record is one
/// seek away and a torn tail from a crash is detectable by length alone.
#[derive(Clone)]
pub struct VectorStore {
    inner: Arc<StoreInner>,
}

impl VectorStore {
    /// Create a new store file, failing if one already exists at `path`.
    pub fn create(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if dimension == 0 {
            return Err(VectorStoreError::Corrupt(
                "vector dimension must be non-zero".to_string(),
            ));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&u32::try_from(dimension).unwrap_or(u32::MAX).to_le_bytes())?;
        file.sync_data()?;

        log::info!(
            "Created vector store at {} (dimension {dimension})",
            path.display()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                dimension,
                file: Mutex::new(file),
                slots: RwLock::new(Vec::new()),
                by_id: RwLock::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                dead: AtomicUsize::new(0),
                compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            }),
        })
    }

    /// Open an existing store, recovering from a torn trailing record.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut magic = [0u8; 4];
        let mut version = [0u8; 4];
        let mut dim = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| VectorStoreError::Corrupt("header shorter than 12 bytes".to_string()))?;
        file.read_exact(&mut version)
            .map_err(|_| VectorStoreError::Corrupt("header shorter than 12 bytes".to_string()))?;
        file.read_exact(&mut dim)
            .map_err(|_| VectorStoreError::Corrupt("header shorter than 12 bytes".to_string()))?;

        if &magic != MAGIC {
            return Err(VectorStoreError::Corrupt(format!(
                "bad magic {magic:02x?} in {}",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(VectorStoreError::Corrupt(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let dimension = u32::from_le_bytes(dim) as usize;
        if dimension == 0 || dimension > 1_000_000 {
            return Err(VectorStoreError::Corrupt(format!(
                "implausible dimension {dimension}"
            )));
        }

        let stride = record_stride(dimension) as u64;
        let file_len = file.metadata()?.len();
        let payload = file_len.saturating_sub(HEADER_LEN);
        let complete = payload / stride;
        let expected_len = HEADER_LEN + complete * stride;
        if expected_len != file_len {
            // Crash recovery: drop the partially written trailing record.
            log::warn!(
                "Truncating {} from {file_len} to {expected_len} bytes (torn trailing record)",
                path.display()
            );
            file.set_len(expected_len)?;
            file.sync_data()?;
        }

        let mut slots = Vec::with_capacity(usize::try_from(complete).unwrap_or(0));
        let mut by_id = HashMap::new();
        let mut dead = 0usize;
        let mut max_id = 0i64;

        file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut record = vec![0u8; record_stride(dimension)];
        for slot_idx in 0..complete {
            file.read_exact(&mut record)?;
            let id = i64::from_le_bytes(
                record[0..8]
                    .try_into()
                    .map_err(|_| VectorStoreError::Corrupt("short record id".to_string()))?,
            );
            let live = match record[8] {
                RECORD_LIVE => true,
                RECORD_TOMBSTONE => false,
                other => {
                    return Err(VectorStoreError::Corrupt(format!(
                        "invalid validity byte {other} in record {slot_idx}"
                    )));
                }
            };
            let mut vector = Vec::with_capacity(dimension);
            for chunk in record[9..].chunks_exact(4) {
                vector.push(f32::from_le_bytes(chunk.try_into().map_err(|_| {
                    VectorStoreError::Corrupt("short record payload".to_string())
                })?));
            }
            if live {
                by_id.insert(id, slots.len());
            } else {
                dead += 1;
            }
            max_id = max_id.max(id);
            slots.push(SnapshotSlot {
                id,
                live,
                vector: vector.into(),
            });
        }

        log::info!(
            "Opened vector store at {} ({} live, {dead} tombstoned, dimension {dimension})",
            path.display(),
            by_id.len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                dimension,
                file: Mutex::new(file),
                slots: RwLock::new(slots),
                by_id: RwLock::new(by_id),
                next_id: AtomicI64::new(max_id + 1),
                dead: AtomicUsize::new(dead),
                compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            }),
        })
    }

    /// Open `path` if it exists, otherwise create it. An existing store
    /// whose pinned dimension differs from `dimension` is a configuration
    /// error (the embedding model changed); it requires a full re-index.
    pub fn open_or_create(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let store = Self::open(path)?;
            if store.dimension() != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: store.dimension(),
                    actual: dimension,
                });
            }
            Ok(store)
        } else {
            Self::create(path, dimension)
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.inner.dimension
    }

    /// Number of live vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_by_id().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn tombstone_ratio(&self) -> f32 {
        let slots = self.read_slots().len();
        if slots == 0 {
            return 0.0;
        }
        self.inner.dead.load(Ordering::Relaxed) as f32 / slots as f32
    }

    /// Append a vector and return its id. The record is durable on disk
    /// before it becomes visible to readers.
    pub fn append(&self, vector: &[f32]) -> Result<i64> {
        if vector.len() != self.inner.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.inner.dimension,
                actual: vector.len(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = Vec::with_capacity(record_stride(self.inner.dimension));
        record.extend_from_slice(&id.to_le_bytes());
        record.push(RECORD_LIVE);
        for value in vector {
            record.extend_from_slice(&value.to_le_bytes());
        }

        {
            let mut file = self.lock_file();
            file.seek(SeekFrom::End(0))?;
            file.write_all(&record)?;
            file.sync_data()?;
        }

        let slot = SnapshotSlot {
            id,
            live: true,
            vector: vector.to_vec().into(),
        };
        let slot_idx = {
            let mut slots = self.write_slots();
            slots.push(slot);
            slots.len() - 1
        };
        self.write_by_id().insert(id, slot_idx);

        Ok(id)
    }

    /// Fetch one live vector by id.
    pub fn get(&self, id: i64) -> Result<Vec<f32>> {
        let by_id = self.read_by_id();
        let slot_idx = *by_id.get(&id).ok_or(VectorStoreError::NotFound(id))?;
        let slots = self.read_slots();
        let slot = slots.get(slot_idx).ok_or(VectorStoreError::NotFound(id))?;
        if !slot.live {
            return Err(VectorStoreError::NotFound(id));
        }
        Ok(slot.vector.to_vec())
    }

    /// Tombstone a vector in O(1). Space is reclaimed by `compact` once the
    /// tombstone ratio crosses the configured threshold.
    pub fn remove(&self, id: i64) -> Result<()> {
        let slot_idx = {
            let mut by_id = self.write_by_id();
            by_id.remove(&id).ok_or(VectorStoreError::NotFound(id))?
        };

        let offset = HEADER_LEN + (slot_idx as u64) * record_stride(self.inner.dimension) as u64;
        {
            let mut file = self.lock_file();
            file.seek(SeekFrom::Start(offset + 8))?;
            file.write_all(&[RECORD_TOMBSTONE])?;
            file.sync_data()?;
        }

        {
            let mut slots = self.write_slots();
            if let Some(slot) = slots.get_mut(slot_idx) {
                slot.live = false;
            }
        }
        self.inner.dead.fetch_add(1, Ordering::Relaxed);

        if self.tombstone_ratio() > self.inner.compaction_threshold {
            self.compact()?;
        }
        Ok(())
    }

    /// Take a cheap point-in-time snapshot for scans.
    #[must_use]
    pub fn snapshot(&self) -> VectorSnapshot {
        let slots = self.read_slots().clone();
        let live_count = slots.iter().filter(|slot| slot.live).count();
        VectorSnapshot {
            dimension: self.inner.dimension,
            live_count,
            slots,
        }
    }

    /// Rewrite the file without tombstoned records: staging file + atomic
    /// rename, so a crash mid-compaction leaves the old file intact.
    pub fn compact(&self) -> Result<()> {
        let mut file = self.lock_file();
        let mut slots = self.write_slots();
        let mut by_id = self.write_by_id();

        let before = slots.len();
        let staging = self.inner.path.with_extension("bin.tmp");
        {
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&staging)?;
            out.write_all(MAGIC)?;
            out.write_all(&FORMAT_VERSION.to_le_bytes())?;
            out.write_all(
                &u32::try_from(self.inner.dimension)
                    .unwrap_or(u32::MAX)
                    .to_le_bytes(),
            )?;
            for slot in slots.iter().filter(|slot| slot.live) {
                out.write_all(&slot.id.to_le_bytes())?;
                out.write_all(&[RECORD_LIVE])?;
                for value in slot.vector.iter() {
                    out.write_all(&value.to_le_bytes())?;
                }
            }
            out.sync_data()?;
        }
        std::fs::rename(&staging, &self.inner.path)?;

        // The renamed file replaced the inode the old handle pointed at.
        *file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.inner.path)?;

        slots.retain(|slot| slot.live);
        by_id.clear();
        for (slot_idx, slot) in slots.iter().enumerate() {
            by_id.insert(slot.id, slot_idx);
        }
        self.inner.dead.store(0, Ordering::Relaxed);

        log::info!(
            "Compacted vector store {} ({before} -> {} records)",
            self.inner.path.display(),
            slots.len()
        );
        Ok(())
    }

    fn lock_file(&self) -> std::sync::MutexGuard<'_, File> {
        self.inner
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, Vec<SnapshotSlot>> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, Vec<SnapshotSlot>> {
        self.inner
            .slots
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_by_id(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, usize>> {
        self.inner
            .by_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_by_id(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<i64, usize>> {
        self.inner
            .by_id
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

const fn record_stride(dimension: usize) -> usize {
    8 + 1 + dimension * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir, dimension: usize) -> VectorStore {
        VectorStore::create(dir.path().join("vectors.bin"), dimension).unwrap()
    }

    #[test]
    fn append_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 3);

        let id = store.append(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(store.get(id).unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_rejects_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 3);

        let err = store.append(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 2);
        assert!(matches!(
            store.get(42),
            Err(VectorStoreError::NotFound(42))
        ));
    }

    #[test]
    fn removed_vector_is_invisible_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        let store = VectorStore::create(&path, 2).unwrap();

        let a = store.append(&[1.0, 0.0]).unwrap();
        let b = store.append(&[0.0, 1.0]).unwrap();
        let c = store.append(&[1.0, 1.0]).unwrap();
        let d = store.append(&[0.5, 0.5]).unwrap();
        let e = store.append(&[0.25, 0.75]).unwrap();
        store.remove(b).unwrap();
        assert!(store.get(b).is_err());
        assert_eq!(store.len(), 4);
        drop(store);

        let reopened = VectorStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 4);
        assert!(reopened.get(b).is_err());
        for id in [a, c, d, e] {
            assert!(reopened.get(id).is_ok());
        }
    }

    #[test]
    fn tombstone_ratio_triggers_compaction() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 2);

        let mut ids = Vec::new();
        for i in 0..8 {
            ids.push(store.append(&[i as f32, 1.0]).unwrap());
        }
        // Removing 3 of 8 crosses the default 0.25 threshold.
        for id in &ids[0..3] {
            store.remove(*id).unwrap();
        }

        assert_eq!(store.tombstone_ratio(), 0.0, "compaction should have run");
        assert_eq!(store.len(), 5);
        for id in &ids[3..] {
            assert!(store.get(*id).is_ok(), "survivor {id} lost in compaction");
        }
        // Ids keep increasing after compaction; no reuse.
        let next = store.append(&[9.0, 9.0]).unwrap();
        assert!(next > ids[7]);
    }

    #[test]
    fn open_truncates_torn_trailing_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        let store = VectorStore::create(&path, 2).unwrap();
        store.append(&[1.0, 2.0]).unwrap();
        store.append(&[3.0, 4.0]).unwrap();
        drop(store);

        // Simulate a crash mid-append: chop 5 bytes off the last record.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let reopened = VectorStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(1).unwrap(), vec![1.0, 2.0]);

        // The store keeps working after recovery.
        let id = reopened.append(&[5.0, 6.0]).unwrap();
        assert_eq!(reopened.get(id).unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn open_surfaces_bad_magic_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        std::fs::write(&path, b"JUNKJUNKJUNKJUNK").unwrap();

        assert!(matches!(
            VectorStore::open(&path),
            Err(VectorStoreError::Corrupt(_))
        ));
    }

    #[test]
    fn open_or_create_rejects_dimension_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        let store = VectorStore::create(&path, 4).unwrap();
        store.append(&[0.0; 4]).unwrap();
        drop(store);

        assert!(matches!(
            VectorStore::open_or_create(&path, 8),
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn snapshot_is_stable_under_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 2);
        for i in 0..100 {
            store.append(&[i as f32, 0.0]).unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 100);

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    store.append(&[i as f32, 1.0]).unwrap();
                }
            })
        };

        // Scan the snapshot repeatedly while the writer runs: the view must
        // stay all-or-none, never a torn subset.
        for _ in 0..50 {
            assert_eq!(snapshot.iter().count(), 100);
        }
        writer.join().unwrap();

        assert_eq!(snapshot.iter().count(), 100);
        assert_eq!(store.snapshot().len(), 1100);
    }

    #[test]
    fn snapshot_iteration_is_restartable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 2);
        store.append(&[1.0, 0.0]).unwrap();
        store.append(&[0.0, 1.0]).unwrap();

        let snapshot = store.snapshot();
        let first: Vec<i64> = snapshot.iter().map(|(id, _)| id).collect();
        let second: Vec<i64> = snapshot.iter().map(|(id, _)| id).collect();
        assert_eq!(first, second);
    }
}
