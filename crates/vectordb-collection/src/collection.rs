//! The `Collection`: one vector store + payload index + HNSW graph + WAL,
//! bound together and exposed through the CRUD/search/snapshot operations
//! the query/manager layers drive.
//!
//! Grounded on `CollectionImpl<N, M>`. The gRPC/replication-wire fields
//! (`replication_tx`, `ReplicationLog`, the idle-eviction reaper) are
//! trimmed as out-of-scope wire-layer concerns, but the shape they implied
//! is kept: insert is WAL-logged synchronously and indexed asynchronously
//! through a bounded channel plus a semaphore-limited worker, so the
//! vector-store/id-map mutation — the part read-your-writes actually
//! depends on — completes before `insert` returns, while HNSW graph
//! linkage catches up shortly after.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};

use vectordb_core::error::{CapacityError, InputError, StateError};
use vectordb_core::filter::FilterValue;
use vectordb_core::{
    CancellationToken, CollectionConfig, DenseVector, DistanceMetric, ExternalId, InternalId,
    MetricKind, QuantizationMode, SearchHit, SearchParams, SearchResponse,
};
use vectordb_index::{HnswIndex, HnswSnapshot, PayloadIndex};
use vectordb_store::wal::{Wal, WalEntry, WalSyncMode};
use vectordb_store::VectorStore;

use crate::digest;
use crate::error::CollectionError;
use crate::query;

const SNAPSHOT_MAGIC: &[u8; 4] = b"VDBC";
const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Durability mode requested by a caller for one write. `Default` means
/// "whatever the collection's configured WAL sync mode already is" — a
/// separate variant from `Strict`/`Batch` because a per-write caller should
/// be able to opt into extra durability without knowing the collection's
/// baseline sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Fsync the WAL before returning.
    Strict,
    /// Defer to the collection's configured sync mode.
    #[default]
    Default,
    /// Same as `Default`; batching policy lives in the WAL itself.
    Batch,
}

/// Tunables that would be environment variables in the teacher's process;
/// here they are constructor arguments, since the wire/CLI layer that read
/// those environment variables is out of scope.
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    pub sync_mode: WalSyncMode,
    pub indexer_concurrency: usize,
    pub tombstone_compaction_threshold: f64,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self { sync_mode: WalSyncMode::Async, indexer_concurrency: 1, tombstone_compaction_threshold: 0.3 }
    }
}

#[derive(Debug)]
pub struct CollectionStats {
    pub count: usize,
    pub deleted: usize,
    pub tombstone_ratio: f64,
    pub max_layer: u32,
    pub queue_size: u64,
    pub approx_memory_bytes: usize,
}

/// The index and payload-index pair swapped atomically on compaction —
/// grounded on the teacher's `index_link: Arc<ArcSwap<HnswIndex<N, M>>>`,
/// extended to cover the payload index too since compaction renumbers
/// handles both structures must agree on.
struct IndexBundle {
    index: Arc<HnswIndex>,
    payload_index: Arc<PayloadIndex>,
}

fn element_size_for(dim: usize, quantization: QuantizationMode) -> usize {
    match quantization {
        QuantizationMode::None => dim * 4,
        QuantizationMode::ScalarI8 => dim + 4,
        QuantizationMode::Binary => (dim + 7) / 8 + 4,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionState {
    name: String,
    dim: usize,
    metric: MetricKind,
    quantization: QuantizationMode,
    id_map: HashMap<ExternalId, InternalId>,
    payloads: HashMap<InternalId, HashMap<String, FilterValue>>,
    buckets: Vec<u64>,
    last_clock: u64,
    vector_count: usize,
}

pub struct Collection {
    name: String,
    dim: usize,
    metric_kind: MetricKind,
    metric: Arc<dyn DistanceMetric>,
    quantization: QuantizationMode,
    config: Arc<CollectionConfig>,
    bundle: Arc<ArcSwap<IndexBundle>>,
    wal: AsyncMutex<Wal>,
    id_map: DashMap<ExternalId, InternalId>,
    reverse_id_map: DashMap<InternalId, ExternalId>,
    payloads: DashMap<InternalId, HashMap<String, FilterValue>>,
    buckets: Vec<AtomicU64>,
    last_clock: AtomicU64,
    index_tx: mpsc::UnboundedSender<(InternalId, DenseVector)>,
    bg_tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    data_dir: PathBuf,
    options: CollectionOptions,
}

impl Collection {
    /// Opens (or creates) a collection rooted at `data_dir`: restores the
    /// last snapshot if one exists, replays the WAL on top of it, then
    /// spawns the background indexer task.
    pub async fn open(
        name: impl Into<String>,
        dim: usize,
        metric_kind: MetricKind,
        quantization: QuantizationMode,
        data_dir: PathBuf,
        options: CollectionOptions,
    ) -> vectordb_core::Result<Arc<Self>> {
        let name = name.into();
        std::fs::create_dir_all(&data_dir)?;

        let metric = metric_kind.build();
        let config = Arc::new(CollectionConfig::new());
        let element_size = element_size_for(dim, quantization);
        let storage = Arc::new(VectorStore::new(&data_dir, element_size));
        let index = Arc::new(HnswIndex::new(storage.clone(), metric.clone(), dim, quantization, config.clone()));
        let payload_index = Arc::new(PayloadIndex::new());

        let id_map: DashMap<ExternalId, InternalId> = DashMap::new();
        let reverse_id_map: DashMap<InternalId, ExternalId> = DashMap::new();
        let payloads: DashMap<InternalId, HashMap<String, FilterValue>> = DashMap::new();
        let buckets: Vec<AtomicU64> = (0..digest::SYNC_BUCKETS).map(|_| AtomicU64::new(0)).collect();
        let mut last_clock = 0u64;

        let snapshot_path = data_dir.join("snapshot.bin");
        if snapshot_path.exists() {
            let loaded = Self::decode_snapshot_file(&snapshot_path)?;
            if loaded.dim != dim {
                return Err(InputError::DimensionMismatch { expected: dim, got: loaded.dim }.into());
            }
            for chunk in loaded.vector_bytes.chunks(element_size) {
                storage.append(chunk)?;
            }
            loaded.hnsw.restore_into(&index);
            for (internal_id, fields) in &loaded.state.payloads {
                payload_index.index(*internal_id, fields);
            }
            for (ext, internal) in loaded.state.id_map {
                id_map.insert(ext.clone(), internal);
                reverse_id_map.insert(internal, ext);
            }
            for (internal, fields) in loaded.state.payloads {
                payloads.insert(internal, fields);
            }
            for (i, b) in loaded.state.buckets.iter().enumerate() {
                if i < buckets.len() {
                    buckets[i].store(*b, Ordering::Relaxed);
                }
            }
            last_clock = loaded.state.last_clock;
        }

        let (index_tx, mut index_rx) = mpsc::unbounded_channel::<(InternalId, DenseVector)>();

        let wal_path = data_dir.join("wal.log");
        let loaded_clock = last_clock;
        let replay_index = index.clone();
        let replay_payload_index = payload_index.clone();
        Wal::replay(&wal_path, |entry| match entry {
            WalEntry::Insert { id, vector, metadata, logical_clock } => {
                if logical_clock <= loaded_clock {
                    return;
                }
                let dv = DenseVector::new(vector);
                if let Some(ext) = metadata.get("__external_id") {
                    id_map.insert(ext.clone(), id);
                    reverse_id_map.insert(id, ext.clone());
                }
                if let Some(payload_json) = metadata.get("__payload") {
                    if let Ok(fields) = serde_json::from_str::<HashMap<String, FilterValue>>(payload_json) {
                        replay_payload_index.index(id, &fields);
                        payloads.insert(id, fields);
                    }
                }
                let _ = replay_index.index_node(id, &dv);
                let bucket = digest::bucket_index(id);
                buckets[bucket].fetch_xor(digest::hash_entry(id, &dv.components), Ordering::Relaxed);
                last_clock = last_clock.max(logical_clock);
            }
            WalEntry::Tombstone { id, logical_clock } => {
                if logical_clock <= loaded_clock {
                    return;
                }
                replay_index.delete(id);
                replay_payload_index.remove(id);
                last_clock = last_clock.max(logical_clock);
            }
        })?;

        let wal = Wal::new(&wal_path, options.sync_mode)?;

        let bundle = Arc::new(ArcSwap::from_pointee(IndexBundle { index, payload_index }));

        let collection = Arc::new(Self {
            name,
            dim,
            metric_kind,
            metric,
            quantization,
            config: config.clone(),
            bundle: bundle.clone(),
            wal: AsyncMutex::new(wal),
            id_map,
            reverse_id_map,
            payloads,
            buckets,
            last_clock: AtomicU64::new(last_clock),
            index_tx,
            bg_tasks: parking_lot::Mutex::new(Vec::new()),
            data_dir,
            options,
        });

        let semaphore = Arc::new(Semaphore::new(collection.options.indexer_concurrency.max(1)));
        let bundle_for_task = bundle.clone();
        let config_for_task = config.clone();
        let indexer_handle = tokio::spawn(async move {
            while let Some((internal_id, vector)) = index_rx.recv().await {
                let permit = semaphore.clone().acquire_owned().await;
                let bundle = bundle_for_task.load_full();
                let config = config_for_task.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    config.inc_active();
                    if let Err(e) = bundle.index.index_node(internal_id, &vector) {
                        tracing::warn!(error = %e, internal_id, "failed to index vector into hnsw graph");
                    }
                    config.dec_active();
                    config.dec_queue();
                    drop(permit);
                })
                .await;
            }
        });
        collection.bg_tasks.lock().push(indexer_handle);

        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric_kind(&self) -> MetricKind {
        self.metric_kind
    }

    pub fn count(&self) -> usize {
        self.id_map.len()
    }

    pub fn queue_size(&self) -> u64 {
        self.config.get_queue_size()
    }

    fn next_clock(&self) -> u64 {
        self.last_clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn update_bucket(&self, id: InternalId, components: &[f32]) {
        let bucket = digest::bucket_index(id);
        self.buckets[bucket].fetch_xor(digest::hash_entry(id, components), Ordering::Relaxed);
    }

    /// Root digest hash over all live entries, used as a cheap
    /// "do these two replicas agree" check ahead of full anti-entropy.
    pub fn state_hash(&self) -> u64 {
        let snapshot: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        digest::state_hash(&snapshot)
    }

    pub fn buckets(&self) -> Vec<u64> {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    /// Fails with `DUPLICATE_ID` if `external_id` is already live.
    pub async fn insert(
        &self,
        external_id: ExternalId,
        vector: DenseVector,
        payload: HashMap<String, FilterValue>,
        durability: Durability,
    ) -> vectordb_core::Result<InternalId> {
        if self.id_map.contains_key(&external_id) {
            return Err(InputError::DuplicateId(external_id).into());
        }
        self.write_entry(external_id, vector, payload, durability).await
    }

    /// Inserts, or replaces a live entry under the same external id.
    pub async fn upsert(
        &self,
        external_id: ExternalId,
        vector: DenseVector,
        payload: HashMap<String, FilterValue>,
        durability: Durability,
    ) -> vectordb_core::Result<InternalId> {
        if let Some(old) = self.id_map.get(&external_id).map(|r| *r) {
            let bundle = self.bundle.load();
            let old_vector = bundle.index.get_vector(old);
            self.update_bucket(old, &old_vector.components);
            bundle.index.delete(old);
            bundle.payload_index.remove(old);
            self.reverse_id_map.remove(&old);
            self.payloads.remove(&old);
        }
        self.write_entry(external_id, vector, payload, durability).await
    }

    async fn write_entry(
        &self,
        external_id: ExternalId,
        vector: DenseVector,
        payload: HashMap<String, FilterValue>,
        durability: Durability,
    ) -> vectordb_core::Result<InternalId> {
        vector.validate_dim(self.dim)?;
        self.metric.validate(&vector.components)?;
        let mut vector = vector;
        self.metric.normalize(&mut vector.components);

        let bundle = self.bundle.load_full();
        let internal_id = bundle.index.insert_to_storage(&vector)?;

        self.id_map.insert(external_id.clone(), internal_id);
        self.reverse_id_map.insert(internal_id, external_id.clone());
        self.payloads.insert(internal_id, payload.clone());
        bundle.payload_index.index(internal_id, &payload);
        self.update_bucket(internal_id, &vector.components);

        let clock = self.next_clock();
        let mut wire_meta = HashMap::with_capacity(2);
        wire_meta.insert("__external_id".to_string(), external_id);
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| CollectionError::SnapshotCorruption(format!("payload serialize: {e}")))?;
        wire_meta.insert("__payload".to_string(), payload_json);

        {
            let mut wal = self.wal.lock().await;
            wal.append(internal_id, &vector.components, &wire_meta, clock)?;
            if durability == Durability::Strict {
                wal.sync()?;
            }
        }

        self.config.inc_queue();
        let _ = self.index_tx.send((internal_id, vector));

        Ok(internal_id)
    }

    /// Atomic-per-entry but not atomic across entries: one failure does
    /// not roll back the entries ahead of it.
    pub async fn batch_insert(
        &self,
        entries: Vec<(ExternalId, DenseVector, HashMap<String, FilterValue>)>,
        durability: Durability,
    ) -> Vec<vectordb_core::Result<InternalId>> {
        let mut results = Vec::with_capacity(entries.len());
        for (external_id, vector, payload) in entries {
            results.push(self.insert(external_id, vector, payload, durability).await);
        }
        results
    }

    pub async fn delete(&self, external_id: &str) -> vectordb_core::Result<()> {
        let (_, internal_id) = self
            .id_map
            .remove(external_id)
            .ok_or_else(|| InputError::UnknownId(external_id.to_string()))?;
        self.reverse_id_map.remove(&internal_id);
        self.payloads.remove(&internal_id);

        let bundle = self.bundle.load();
        bundle.index.delete(internal_id);
        bundle.payload_index.remove(internal_id);

        let clock = self.next_clock();
        let mut wal = self.wal.lock().await;
        wal.append_tombstone(internal_id, clock)?;
        Ok(())
    }

    pub fn get(&self, external_id: &str) -> vectordb_core::Result<(DenseVector, HashMap<String, FilterValue>)> {
        let internal_id = *self
            .id_map
            .get(external_id)
            .ok_or_else(|| InputError::UnknownId(external_id.to_string()))?;
        let bundle = self.bundle.load();
        if bundle.index.tombstones().is_tombstoned(internal_id) {
            return Err(StateError::Tombstoned(internal_id).into());
        }
        let vector = bundle.index.get_vector(internal_id);
        let payload = self.payloads.get(&internal_id).map(|r| r.clone()).unwrap_or_default();
        Ok((vector, payload))
    }

    pub fn scroll(&self, offset: usize, limit: usize) -> Vec<(ExternalId, DenseVector, HashMap<String, FilterValue>)> {
        let bundle = self.bundle.load();
        self.id_map
            .iter()
            .skip(offset)
            .take(limit)
            .map(|entry| {
                let (ext, internal) = (entry.key().clone(), *entry.value());
                let vector = bundle.index.get_vector(internal);
                let payload = self.payloads.get(&internal).map(|r| r.clone()).unwrap_or_default();
                (ext, vector, payload)
            })
            .collect()
    }

    pub fn search(
        &self,
        query: &DenseVector,
        params: &SearchParams,
        cancel: &CancellationToken,
    ) -> vectordb_core::Result<SearchResponse> {
        query.validate_dim(self.dim)?;
        let mut normalized = query.clone();
        self.metric.normalize(&mut normalized.components);

        let bundle = self.bundle.load();
        let total = bundle.index.count_nodes();
        let hits = query::plan_and_search(&bundle.index, &bundle.payload_index, &normalized, params, total, cancel);

        let hits: Vec<SearchHit> = hits
            .into_iter()
            .filter_map(|(internal_id, distance)| {
                self.reverse_id_map.get(&internal_id).map(|ext| {
                    let payload = if params.with_payload {
                        self.payloads.get(&internal_id).map(|r| r.clone())
                    } else {
                        None
                    };
                    SearchHit { external_id: ext.clone(), distance, payload }
                })
            })
            .collect();

        let recall_warning = if hits.len() < params.top_k {
            Some(CapacityError::RecallBelowTarget {
                collection: self.name.clone(),
                observed: hits.len() as f64 / params.top_k.max(1) as f64,
                target: 1.0,
            })
        } else {
            None
        };

        Ok(SearchResponse { hits, recall_warning })
    }

    pub fn stats(&self) -> CollectionStats {
        let bundle = self.bundle.load();
        let node_count = bundle.index.count_nodes();
        CollectionStats {
            count: self.count(),
            deleted: bundle.index.count_deleted(),
            tombstone_ratio: bundle.index.tombstones().ratio(node_count),
            max_layer: bundle.index.max_layer(),
            queue_size: self.config.get_queue_size(),
            approx_memory_bytes: bundle.index.storage().total_size_bytes(),
        }
    }

    /// Rebuilds the vector store and HNSW graph over only the live handles,
    /// then atomically swaps the bundle. In-flight readers finish on the
    /// old snapshot, since they hold their own `Arc` from `bundle.load()`.
    ///
    /// Grounded on `CollectionImpl::optimize`'s "Hot Vacuum" shadow index.
    pub fn optimize(&self) -> vectordb_core::Result<()> {
        let bundle = self.bundle.load_full();
        let live_ids: Vec<u32> = (0..bundle.index.count_nodes() as u32)
            .filter(|id| !bundle.index.tombstones().is_tombstoned(*id))
            .collect();

        let (new_storage, remap) = bundle.index.storage().compact(&self.data_dir, live_ids.iter().copied())?;
        let new_storage = Arc::new(new_storage);
        let new_index =
            Arc::new(HnswIndex::new(new_storage, self.metric.clone(), self.dim, self.quantization, self.config.clone()));
        let new_payload_index = Arc::new(PayloadIndex::new());

        for old_id in &live_ids {
            let new_id = remap[old_id];
            let vector = bundle.index.get_vector(*old_id);
            new_index.index_node(new_id, &vector)?;
            if let Some(fields) = self.payloads.get(old_id) {
                new_payload_index.index(new_id, &fields);
            }
        }

        let old_id_map: Vec<(ExternalId, u32)> = self.id_map.iter().map(|e| (e.key().clone(), *e.value())).collect();
        self.reverse_id_map.clear();
        for (ext, old_id) in old_id_map {
            match remap.get(&old_id) {
                Some(&new_id) => {
                    self.id_map.insert(ext.clone(), new_id);
                    self.reverse_id_map.insert(new_id, ext);
                }
                None => {
                    self.id_map.remove(&ext);
                }
            }
        }

        let old_payloads: Vec<(u32, HashMap<String, FilterValue>)> =
            self.payloads.iter().map(|e| (*e.key(), e.value().clone())).collect();
        self.payloads.clear();
        for (old_id, fields) in old_payloads {
            if let Some(&new_id) = remap.get(&old_id) {
                self.payloads.insert(new_id, fields);
            }
        }

        self.bundle.store(Arc::new(IndexBundle { index: new_index, payload_index: new_payload_index }));
        Ok(())
    }

    fn snapshot_state(&self, vector_count: usize) -> CollectionState {
        CollectionState {
            name: self.name.clone(),
            dim: self.dim,
            metric: self.metric_kind,
            quantization: self.quantization,
            id_map: self.id_map.iter().map(|e| (e.key().clone(), *e.value())).collect(),
            payloads: self.payloads.iter().map(|e| (*e.key(), e.value().clone())).collect(),
            buckets: self.buckets(),
            last_clock: self.last_clock.load(Ordering::Relaxed),
            vector_count,
        }
    }

    /// Writes a framed snapshot file: magic + version, then length-prefixed
    /// JSON collection-state / raw vector-segment / HNSW-segment sections,
    /// then a whole-body CRC32 trailer.
    pub fn snapshot_create(&self, path: &Path) -> vectordb_core::Result<()> {
        let bundle = self.bundle.load();
        let vector_count = bundle.index.count_nodes();
        let state = self.snapshot_state(vector_count);
        let state_bytes = serde_json::to_vec(&state)
            .map_err(|e| CollectionError::SnapshotCorruption(format!("state serialize: {e}")))?;

        let mut hnsw_bytes = Vec::new();
        HnswSnapshot::capture(&bundle.index).encode(&mut hnsw_bytes)?;

        let element_size = element_size_for(self.dim, self.quantization);
        let storage = bundle.index.storage();
        let mut vector_bytes = Vec::with_capacity(vector_count * element_size);
        for id in 0..vector_count as u32 {
            vector_bytes.extend_from_slice(storage.get(id));
        }

        let mut body = Vec::new();
        body.extend_from_slice(SNAPSHOT_MAGIC);
        body.write_u16::<LittleEndian>(SNAPSHOT_FORMAT_VERSION)?;
        write_section(&mut body, &state_bytes)?;
        write_section(&mut body, &vector_bytes)?;
        write_section(&mut body, &hnsw_bytes)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let tmp_path = path.with_extension("tmp");
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(&body)?;
            f.write_u32::<LittleEndian>(crc)?;
        }
        std::fs::rename(tmp_path, path)?;
        Ok(())
    }

    fn decode_snapshot_file(path: &Path) -> vectordb_core::Result<DecodedSnapshot> {
        let mut body = std::fs::read(path)?;
        if body.len() < 4 {
            return Err(CollectionError::SnapshotCorruption("truncated snapshot".into()).into());
        }
        let crc_off = body.len() - 4;
        let stored_crc =
            u32::from_le_bytes([body[crc_off], body[crc_off + 1], body[crc_off + 2], body[crc_off + 3]]);
        body.truncate(crc_off);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(CollectionError::ChecksumMismatch { expected: stored_crc, actual: actual_crc }.into());
        }

        let mut cursor = Cursor::new(&body[..]);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(CollectionError::SnapshotCorruption("bad magic bytes".into()).into());
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != SNAPSHOT_FORMAT_VERSION {
            return Err(CollectionError::SnapshotCorruption(format!("unsupported format version {version}")).into());
        }

        let state_bytes = read_section(&mut cursor)?;
        let vector_bytes = read_section(&mut cursor)?;
        let hnsw_bytes = read_section(&mut cursor)?;

        let state: CollectionState = serde_json::from_slice(&state_bytes)
            .map_err(|e| CollectionError::SnapshotCorruption(format!("state deserialize: {e}")))?;
        let hnsw = HnswSnapshot::decode(&mut Cursor::new(hnsw_bytes))?;

        Ok(DecodedSnapshot { dim: state.dim, state, vector_bytes, hnsw })
    }

    /// Restores this collection in place from a snapshot file written by
    /// [`Self::snapshot_create`]. Existing state is replaced wholesale.
    pub fn snapshot_restore(&self, path: &Path) -> vectordb_core::Result<()> {
        let loaded = Self::decode_snapshot_file(path)?;
        if loaded.dim != self.dim {
            return Err(InputError::DimensionMismatch { expected: self.dim, got: loaded.dim }.into());
        }

        let element_size = element_size_for(self.dim, self.quantization);
        let storage = Arc::new(VectorStore::new(&self.data_dir, element_size));
        for chunk in loaded.vector_bytes.chunks(element_size) {
            storage.append(chunk)?;
        }

        let index = Arc::new(HnswIndex::new(storage, self.metric.clone(), self.dim, self.quantization, self.config.clone()));
        loaded.hnsw.restore_into(&index);

        let payload_index = Arc::new(PayloadIndex::new());
        for (internal_id, fields) in &loaded.state.payloads {
            payload_index.index(*internal_id, fields);
        }

        self.id_map.clear();
        self.reverse_id_map.clear();
        self.payloads.clear();
        for (ext, internal) in loaded.state.id_map {
            self.id_map.insert(ext.clone(), internal);
            self.reverse_id_map.insert(internal, ext);
        }
        for (internal, fields) in loaded.state.payloads {
            self.payloads.insert(internal, fields);
        }
        for (i, b) in loaded.state.buckets.iter().enumerate() {
            if i < self.buckets.len() {
                self.buckets[i].store(*b, Ordering::Relaxed);
            }
        }
        self.last_clock.store(loaded.state.last_clock, Ordering::Relaxed);

        self.bundle.store(Arc::new(IndexBundle { index, payload_index }));
        Ok(())
    }
}

struct DecodedSnapshot {
    dim: usize,
    state: CollectionState,
    vector_bytes: Vec<u8>,
    hnsw: HnswSnapshot,
}

fn write_section(out: &mut Vec<u8>, bytes: &[u8]) -> std::io::Result<()> {
    out.write_u64::<LittleEndian>(bytes.len() as u64)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_section(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec<u8>> {
    let len = cursor.read_u64::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

impl Drop for Collection {
    fn drop(&mut self) {
        for handle in self.bg_tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectordb_core::filter::FilterValue as FV;

    async fn open_test_collection(dim: usize) -> (Arc<Collection>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let collection = Collection::open(
            "test",
            dim,
            MetricKind::Euclidean,
            QuantizationMode::None,
            dir.path().to_path_buf(),
            CollectionOptions::default(),
        )
        .await
        .unwrap();
        (collection, dir)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let (collection, _dir) = open_test_collection(3).await;
        let mut payload = HashMap::new();
        payload.insert("color".to_string(), FV::Str("red".to_string()));
        collection
            .insert("a".to_string(), DenseVector::new(vec![1.0, 2.0, 3.0]), payload.clone(), Durability::Strict)
            .await
            .unwrap();

        let (vector, got_payload) = collection.get("a").unwrap();
        assert_eq!(vector.components, vec![1.0, 2.0, 3.0]);
        assert_eq!(got_payload, payload);
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let (collection, _dir) = open_test_collection(2).await;
        collection
            .insert("a".to_string(), DenseVector::new(vec![1.0, 0.0]), HashMap::new(), Durability::Default)
            .await
            .unwrap();
        let err = collection
            .insert("a".to_string(), DenseVector::new(vec![1.0, 0.0]), HashMap::new(), Durability::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, vectordb_core::Error::Input(InputError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn delete_then_get_is_unknown_id() {
        let (collection, _dir) = open_test_collection(2).await;
        collection
            .insert("a".to_string(), DenseVector::new(vec![1.0, 0.0]), HashMap::new(), Durability::Default)
            .await
            .unwrap();
        collection.delete("a").await.unwrap();
        assert!(collection.get("a").is_err());
    }

    #[tokio::test]
    async fn search_finds_nearest_after_indexing_settles() {
        let (collection, _dir) = open_test_collection(2).await;
        for i in 0..20 {
            collection
                .insert(format!("v{i}"), DenseVector::new(vec![i as f32, 0.0]), HashMap::new(), Durability::Default)
                .await
                .unwrap();
        }
        // Give the background indexer a moment to link nodes into the graph.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let params = SearchParams { top_k: 3, ef_search: Some(50), filter: None, with_payload: false };
        let response = collection
            .search(&DenseVector::new(vec![10.0, 0.0]), &params, &CancellationToken::new())
            .unwrap();
        assert!(!response.hits.is_empty());
        assert_eq!(response.hits[0].external_id, "v10");
    }

    #[tokio::test]
    async fn snapshot_round_trips_state() {
        let (collection, dir) = open_test_collection(2).await;
        collection
            .insert("a".to_string(), DenseVector::new(vec![1.0, 0.0]), HashMap::new(), Durability::Strict)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let snap_path = dir.path().join("snapshot.bin");
        collection.snapshot_create(&snap_path).unwrap();

        let (fresh, _dir2) = open_test_collection(2).await;
        fresh.snapshot_restore(&snap_path).unwrap();
        let (vector, _) = fresh.get("a").unwrap();
        assert_eq!(vector.components, vec![1.0, 0.0]);
    }
}
