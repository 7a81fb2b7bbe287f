//! On-disk format for the HNSW segment described in the snapshot layout:
//! header, per-node level + neighbor arrays, tombstone bitset, trailing
//! CRC32. Grounded on the teacher's WAL framing style (`byteorder` +
//! `crc32fast`, see `vectordb_store::wal`), reused here for a segment
//! instead of a log.
//!
//! The collection layer (out of this crate) is responsible for the outer
//! snapshot file — header with collection name/dimension/metric, vector
//! segment, external-id map, payload segment, trailer offsets — and calls
//! [`HnswSnapshot::encode`]/[`HnswSnapshot::decode`] for the HNSW portion.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use roaring::RoaringBitmap;
use std::io::{self, Cursor, Read, Write};

use crate::error::{IndexError, Result};
use crate::hnsw::{HnswIndex, NodeId};

const SEGMENT_MAGIC: [u8; 4] = *b"HNS1";
const FORMAT_VERSION: u16 = 1;

/// A fully materialized copy of one collection's HNSW graph, ready to
/// write to or read from a segment file.
#[derive(Debug, Clone)]
pub struct HnswSnapshot {
    pub entry_point: NodeId,
    pub max_layer: u32,
    /// `nodes[handle]` is `None` for a handle with no graph presence
    /// (never happens for a live index, but keeps the array dense over
    /// `[0, node_count)` without a separate presence bitmap).
    pub nodes: Vec<Vec<Vec<NodeId>>>,
    pub tombstones: RoaringBitmap,
}

/// Parsed header fields, exposed separately so a caller can inspect the
/// format version before committing to a full decode.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotHeader {
    pub version: u16,
    pub entry_point: NodeId,
    pub max_layer: u32,
    pub node_count: u32,
}

impl HnswSnapshot {
    /// Captures the live state of `index` into a snapshot struct.
    pub fn capture(index: &HnswIndex) -> Self {
        let node_count = index.count_nodes();
        let mut nodes = Vec::with_capacity(node_count);
        for id in 0..node_count as u32 {
            nodes.push(index.raw_layers(id));
        }
        HnswSnapshot {
            entry_point: index.entry_point(),
            max_layer: index.max_layer(),
            nodes,
            tombstones: index.tombstones().snapshot(),
        }
    }

    /// Writes the segment to `out`, returning the CRC32 of everything
    /// written before the trailer (the collection-level trailer can fold
    /// this into a whole-file checksum if it wants).
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<u32> {
        let mut buf = Vec::new();
        buf.write_all(&SEGMENT_MAGIC)?;
        buf.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        buf.write_u32::<LittleEndian>(self.entry_point)?;
        buf.write_u32::<LittleEndian>(self.max_layer)?;
        buf.write_u32::<LittleEndian>(self.nodes.len() as u32)?;

        for layers in &self.nodes {
            buf.write_u32::<LittleEndian>(layers.len() as u32)?;
            for neighbors in layers {
                buf.write_u32::<LittleEndian>(neighbors.len() as u32)?;
                for &n in neighbors {
                    buf.write_u32::<LittleEndian>(n)?;
                }
            }
        }

        let mut tomb_bytes = Vec::new();
        self.tombstones.serialize_into(&mut tomb_bytes)?;
        buf.write_u32::<LittleEndian>(tomb_bytes.len() as u32)?;
        buf.write_all(&tomb_bytes)?;

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();

        out.write_all(&buf)?;
        out.write_u32::<LittleEndian>(crc)?;
        Ok(crc)
    }

    /// Reads and validates a segment previously written by [`Self::encode`].
    /// Corruption (bad magic, CRC mismatch, dangling neighbor reference, a
    /// live node missing from one of its own layers) is FATAL per the
    /// persistence contract: the caller should mark the collection
    /// read-only rather than serve a partially-restored graph.
    pub fn decode<R: Read>(input: &mut R) -> Result<Self> {
        let mut body = Vec::new();
        input.read_to_end(&mut body)?;
        if body.len() < 4 {
            return Err(IndexError::SnapshotCorruption("truncated segment".into()));
        }
        let (payload, crc_bytes) = body.split_at(body.len() - 4);
        let expected_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut hasher = Hasher::new();
        hasher.update(payload);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            return Err(IndexError::SnapshotCorruption(format!(
                "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
            )));
        }

        let mut cursor = Cursor::new(payload);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != SEGMENT_MAGIC {
            return Err(IndexError::SnapshotCorruption("bad magic bytes".into()));
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(IndexError::SnapshotCorruption(format!(
                "unsupported format version {version}"
            )));
        }
        let entry_point = cursor.read_u32::<LittleEndian>()?;
        let max_layer = cursor.read_u32::<LittleEndian>()?;
        let node_count = cursor.read_u32::<LittleEndian>()?;

        let mut nodes = Vec::with_capacity(node_count as usize);
        for _ in 0..node_count {
            let layer_count = cursor.read_u32::<LittleEndian>()?;
            let mut layers = Vec::with_capacity(layer_count as usize);
            for _ in 0..layer_count {
                let neighbor_count = cursor.read_u32::<LittleEndian>()?;
                let mut neighbors = Vec::with_capacity(neighbor_count as usize);
                for _ in 0..neighbor_count {
                    neighbors.push(cursor.read_u32::<LittleEndian>()?);
                }
                layers.push(neighbors);
            }
            nodes.push(layers);
        }

        let tomb_len = cursor.read_u32::<LittleEndian>()?;
        let mut tomb_bytes = vec![0u8; tomb_len as usize];
        cursor.read_exact(&mut tomb_bytes)?;
        let tombstones = RoaringBitmap::deserialize_from(&tomb_bytes[..])
            .map_err(|e| IndexError::SnapshotCorruption(format!("tombstone bitmap: {e}")))?;

        let snapshot = HnswSnapshot { entry_point, max_layer, nodes, tombstones };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Every neighbor reference must point to a handle within the node
    /// table, and a node's presence at level `L` implies presence at every
    /// level below it (layer containment, invariant (b) in the data model).
    fn validate(&self) -> Result<()> {
        let count = self.nodes.len() as u32;
        for (id, layers) in self.nodes.iter().enumerate() {
            if layers.is_empty() {
                continue;
            }
            for neighbors in layers {
                for &n in neighbors {
                    if n >= count {
                        return Err(IndexError::GraphCorruption(format!(
                            "node {id} references nonexistent neighbor {n}"
                        )));
                    }
                }
            }
        }
        if count > 0 && self.entry_point >= count {
            return Err(IndexError::GraphCorruption(format!(
                "entry point {} is out of range for {count} nodes",
                self.entry_point
            )));
        }
        Ok(())
    }

    /// Rebuilds `index`'s internal graph state from this snapshot in place.
    /// `index` must already be constructed over a vector store holding the
    /// same handles (the vector segment is restored separately, first).
    pub fn restore_into(&self, index: &HnswIndex) {
        for (id, layers) in self.nodes.iter().enumerate() {
            index.set_raw_node(id as NodeId, layers.clone());
        }
        index.set_entry_point(self.entry_point, self.max_layer);
        for tomb in &self.tombstones {
            index.delete(tomb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use vectordb_core::metric::EuclideanMetric;
    use vectordb_core::{CancellationToken, CollectionConfig, DenseVector, QuantizationMode};
    use vectordb_store::VectorStore;

    fn build_index(dim: usize) -> HnswIndex {
        let dir = tempdir().unwrap();
        let storage = Arc::new(VectorStore::new(dir.path(), dim * 4));
        let config = Arc::new(CollectionConfig::new());
        config.set_m(4);
        HnswIndex::new(storage, Arc::new(EuclideanMetric), dim, QuantizationMode::None, config)
    }

    #[test]
    fn round_trips_through_bytes() {
        let idx = build_index(2);
        for p in [[0.0, 0.0], [1.0, 1.0], [5.0, 5.0], [9.0, 9.0]] {
            let v = DenseVector::new(p.to_vec());
            let id = idx.insert_to_storage(&v).unwrap();
            idx.index_node(id, &v).unwrap();
        }
        idx.delete(1);

        let snapshot = HnswSnapshot::capture(&idx);
        let mut bytes = Vec::new();
        snapshot.encode(&mut bytes).unwrap();

        let decoded = HnswSnapshot::decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.entry_point, snapshot.entry_point);
        assert_eq!(decoded.max_layer, snapshot.max_layer);
        assert_eq!(decoded.nodes.len(), snapshot.nodes.len());
        assert!(decoded.tombstones.contains(1));

        let restored = build_index(2);
        for p in [[0.0, 0.0], [1.0, 1.0], [5.0, 5.0], [9.0, 9.0]] {
            let v = DenseVector::new(p.to_vec());
            restored.insert_to_storage(&v).unwrap();
        }
        decoded.restore_into(&restored);
        let cancel = CancellationToken::new();
        let results = restored.search(&DenseVector::new(vec![5.0, 5.0]), 1, 16, None, &cancel);
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn rejects_corrupted_crc() {
        let idx = build_index(1);
        let v = DenseVector::new(vec![0.0]);
        let id = idx.insert_to_storage(&v).unwrap();
        idx.index_node(id, &v).unwrap();

        let snapshot = HnswSnapshot::capture(&idx);
        let mut bytes = Vec::new();
        snapshot.encode(&mut bytes).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(HnswSnapshot::decode(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn rejects_dangling_neighbor_reference() {
        let mut bytes = Vec::new();
        let bad = HnswSnapshot {
            entry_point: 0,
            max_layer: 0,
            nodes: vec![vec![vec![99]]],
            tombstones: RoaringBitmap::new(),
        };
        bad.encode(&mut bytes).unwrap();
        assert!(HnswSnapshot::decode(&mut Cursor::new(bytes)).is_err());
    }
}
