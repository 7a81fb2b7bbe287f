//! The HNSW graph: insertion, filtered/unfiltered search, tombstone-aware
//! deletion, and compaction-triggered rebuild.
//!
//! Grounded on `hyperspace_index::HnswIndex`: per-node, per-layer
//! `RwLock<Vec<NodeId>>` neighbor lists (the "pointer swap of the per-node
//! neighbor array" the concurrency model calls for — parking_lot's
//! `RwLock` never exposes a torn read), a thread-local reusable scan
//! scratch space, the ascending-distance heuristic neighbor selector, and
//! the snapshot-then-merge race-safe re-pruning path. Two changes from the
//! teacher: level sampling follows the spec's `floor(-ln(U) * mL)` formula
//! rather than a repeated coin flip, and the graph holds a runtime
//! `Arc<dyn DistanceMetric>` instead of being monomorphized over a
//! const-generic dimension and metric type.

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use vectordb_core::{
    BinaryVector, CancellationToken, CollectionConfig, DenseVector, DistanceMetric,
    QuantizationMode, ScalarI8Vector,
};
use vectordb_store::{TombstoneSet, VectorStore};

use crate::error::Result;
use crate::filter_engine::PlannedFilter;

pub type NodeId = u32;

const MAX_LAYERS: usize = 16;

#[derive(Debug, Default)]
struct Node {
    layers: Vec<RwLock<Vec<NodeId>>>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Candidate {
    id: NodeId,
    distance: f32,
}

impl Eq for Candidate {}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so a `BinaryHeap<Candidate>` behaves as a min-heap.
        other.distance.partial_cmp(&self.distance).unwrap_or(CmpOrdering::Equal)
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct VisitedScratch {
    marks: Vec<u32>,
    generation: u32,
}

impl VisitedScratch {
    fn prepare(&mut self, len: usize) -> u32 {
        if self.marks.len() < len {
            self.marks.resize(len, 0);
        }
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.marks.fill(0);
            self.generation = 1;
        }
        self.generation
    }

    fn mark(&mut self, id: u32) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

thread_local! {
    static VISITED_SCRATCH: RefCell<VisitedScratch> = RefCell::new(VisitedScratch::default());
}

pub struct HnswIndex {
    nodes: RwLock<Vec<Node>>,
    entry_point: AtomicU32,
    max_layer: AtomicU32,
    storage: Arc<VectorStore>,
    tombstones: Arc<TombstoneSet>,
    quantization: QuantizationMode,
    metric: Arc<dyn DistanceMetric>,
    dim: usize,
    config: Arc<CollectionConfig>,
}

impl HnswIndex {
    pub fn new(
        storage: Arc<VectorStore>,
        metric: Arc<dyn DistanceMetric>,
        dim: usize,
        quantization: QuantizationMode,
        config: Arc<CollectionConfig>,
    ) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            entry_point: AtomicU32::new(0),
            max_layer: AtomicU32::new(0),
            storage,
            tombstones: Arc::new(TombstoneSet::new()),
            quantization,
            metric,
            dim,
            config,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn tombstones(&self) -> Arc<TombstoneSet> {
        self.tombstones.clone()
    }

    pub fn count_nodes(&self) -> usize {
        self.storage.count()
    }

    pub fn count_deleted(&self) -> usize {
        self.tombstones.len() as usize
    }

    pub fn delete(&self, id: NodeId) {
        self.tombstones.mark(id);
    }

    fn encode(&self, v: &DenseVector) -> Vec<u8> {
        match self.quantization {
            QuantizationMode::None => v.as_bytes(),
            QuantizationMode::ScalarI8 => ScalarI8Vector::from_dense(v).as_bytes(),
            QuantizationMode::Binary => BinaryVector::from_dense(v).as_bytes(),
        }
    }

    fn decode(&self, bytes: &[u8]) -> DenseVector {
        match self.quantization {
            QuantizationMode::None => DenseVector::from_bytes(bytes),
            QuantizationMode::ScalarI8 => ScalarI8Vector::from_bytes(bytes).to_dense(),
            QuantizationMode::Binary => {
                // Binary mode keeps only sign bits; exact magnitude is lost,
                // so the dense reconstruction is +-1 per component. Good
                // enough for the re-score pass that follows a Hamming
                // prefilter, which is all binary mode is meant for.
                let bv = BinaryVector::from_bytes(bytes);
                let mut components = Vec::with_capacity(bv.dim);
                for i in 0..bv.dim {
                    let bit = (bv.bits[i / 8] >> (i % 8)) & 1;
                    components.push(if bit == 1 { 1.0 } else { -1.0 });
                }
                DenseVector::new(components)
            }
        }
    }

    pub fn get_vector(&self, id: NodeId) -> DenseVector {
        self.decode(self.storage.get(id))
    }

    pub fn insert_to_storage(&self, v: &DenseVector) -> Result<NodeId> {
        Ok(self.storage.append(&self.encode(v))?)
    }

    fn dist(&self, id: NodeId, query: &DenseVector) -> f32 {
        let v = self.get_vector(id);
        self.metric.distance(&v.components, &query.components)
    }

    fn random_level(&self) -> usize {
        // spec formula: level = floor(-ln(U) * mL), mL = 1 / ln(M).
        let m = self.config.get_m().max(2) as f64;
        let ml = 1.0 / m.ln();
        let mut rng = rand::thread_rng();
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        let level = (-u.ln() * ml).floor() as usize;
        level.min(MAX_LAYERS - 1)
    }

    /// Inserts a vector already appended to storage under `id` into the
    /// graph: greedy descent from the current entry point to find the
    /// insertion neighborhood, then beam search + heuristic selection at
    /// every level from the new node's sampled level down to 0.
    pub fn index_node(&self, id: NodeId, query: &DenseVector) -> Result<()> {
        let max_layer = self.max_layer.load(Ordering::Relaxed);
        let entry_point = self.entry_point.load(Ordering::Relaxed);
        let new_level = self.random_level();

        {
            let mut nodes = self.nodes.write();
            if nodes.len() <= id as usize {
                nodes.resize_with(id as usize + 1, Node::default);
            }
            let mut layers = Vec::with_capacity(new_level + 1);
            for _ in 0..=new_level {
                layers.push(RwLock::new(Vec::new()));
            }
            nodes[id as usize] = Node { layers };
        }

        let is_first_node = {
            let nodes = self.nodes.read();
            nodes.iter().filter(|n| !n.layers.is_empty()).count() <= 1
        };
        if is_first_node {
            self.max_layer.store(new_level as u32, Ordering::SeqCst);
            self.entry_point.store(id, Ordering::SeqCst);
            return Ok(());
        }

        let start_layer = {
            let nodes = self.nodes.read();
            if (entry_point as usize) < nodes.len() {
                nodes[entry_point as usize].layers.len().saturating_sub(1)
            } else {
                0
            }
        };

        let mut curr_obj = entry_point;
        let mut curr_dist = self.dist(curr_obj, query);

        let search_limit = max_layer.min(start_layer as u32) as usize;
        for level in (new_level + 1..=search_limit).rev() {
            loop {
                let neighbor = {
                    let nodes = self.nodes.read();
                    if curr_obj as usize >= nodes.len() || level >= nodes[curr_obj as usize].layers.len() {
                        break;
                    }
                    let neighbors = nodes[curr_obj as usize].layers[level].read();
                    let mut best = None;
                    for &n in neighbors.iter() {
                        if self.tombstones.is_tombstoned(n) {
                            continue;
                        }
                        let d = self.dist(n, query);
                        if d < curr_dist {
                            curr_dist = d;
                            best = Some(n);
                        }
                    }
                    best
                };
                match neighbor {
                    Some(n) => curr_obj = n,
                    None => break,
                }
            }
        }

        let m_base = self.config.get_m();
        let ef_construction = self.config.get_ef_construction();

        for level in (0..=new_level.min(max_layer as usize)).rev() {
            let m_max = if level == 0 { m_base * 2 } else { m_base };

            let candidates = self.search_layer_candidates(curr_obj, query, level, ef_construction, None);
            let selected = self.select_neighbors(candidates, m_max);

            for &neighbor_id in &selected {
                self.add_link(id, neighbor_id, level);
                self.add_link(neighbor_id, id, level);

                let neighbor_len = {
                    let nodes = self.nodes.read();
                    let len = nodes[neighbor_id as usize].layers[level].read().len();
                    len
                };
                if neighbor_len > m_max {
                    self.prune_connections(neighbor_id, level, m_max);
                }
            }

            if let Some(&first) = selected.first() {
                curr_obj = first;
            }
        }

        if new_level as u32 > max_layer {
            self.max_layer.store(new_level as u32, Ordering::SeqCst);
            self.entry_point.store(id, Ordering::SeqCst);
        }

        Ok(())
    }

    fn add_link(&self, src: NodeId, dst: NodeId, level: usize) {
        let nodes = self.nodes.read();
        if src as usize >= nodes.len() || level >= nodes[src as usize].layers.len() {
            return;
        }
        let mut links = nodes[src as usize].layers[level].write();
        if !links.contains(&dst) {
            links.push(dst);
        }
    }

    /// Recomputes `node_id`'s neighbor list at `level` off-lock, then merges
    /// it back under a short write lock, preserving any links added by a
    /// concurrent insert while this recomputation was running.
    fn prune_connections(&self, node_id: NodeId, level: usize, max_links: usize) {
        let initial_links: Vec<NodeId> = {
            let nodes = self.nodes.read();
            if node_id as usize >= nodes.len() {
                return;
            }
            let links = nodes[node_id as usize].layers[level].read().clone();
            links
        };

        let node_vec = self.get_vector(node_id);
        let mut candidates = BinaryHeap::new();
        for &n in &initial_links {
            let d = self.dist(n, &node_vec);
            candidates.push(Candidate { id: n, distance: d });
        }
        let mut keepers = self.select_neighbors(candidates, max_links);

        let nodes = self.nodes.read();
        let mut links = nodes[node_id as usize].layers[level].write();
        if links.len() > initial_links.len() {
            for &id in links.iter() {
                if !initial_links.contains(&id) && keepers.len() < max_links {
                    keepers.push(id);
                }
            }
        }
        *links = keepers;
    }

    fn select_neighbors(&self, candidates: BinaryHeap<Candidate>, m: usize) -> Vec<NodeId> {
        let mut result = Vec::with_capacity(m);
        let sorted = candidates.into_sorted_vec();

        for cand in sorted.into_iter().rev() {
            if result.len() >= m {
                break;
            }
            let cand_vec = self.get_vector(cand.id);
            let mut is_good = true;
            for &existing in &result {
                let existing_vec = self.get_vector(existing);
                let d = self.metric.distance(&cand_vec.components, &existing_vec.components);
                if d < cand.distance {
                    is_good = false;
                    break;
                }
            }
            if is_good {
                result.push(cand.id);
            }
        }
        result
    }

    /// Best-first beam search. `allowed`, when set, is checked before a
    /// candidate is allowed to occupy one of the `ef` result slots — a
    /// predicate-rejected node still gets pushed onto `candidates` so its
    /// neighbors are explored, it just never counts toward `ef`/`k`.
    fn search_layer_candidates(
        &self,
        entry: NodeId,
        query: &DenseVector,
        level: usize,
        ef: usize,
        allowed: Option<&PlannedFilter>,
    ) -> BinaryHeap<Candidate> {
        let len = self.storage.count();
        VISITED_SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            let _generation = scratch.prepare(len.max(entry as usize + 1));

            let mut candidates = BinaryHeap::new();
            let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

            let entry_dist = self.dist(entry, query);
            scratch.mark(entry);
            candidates.push(Candidate { id: entry, distance: entry_dist });
            if allowed.map(|f| f.test(entry)).unwrap_or(true) {
                results.push(Candidate { id: entry, distance: entry_dist });
            }

            while let Some(current) = candidates.pop() {
                let worst = results.peek().map(|c| c.distance).unwrap_or(f32::MAX);
                if current.distance > worst && results.len() >= ef {
                    break;
                }

                let nodes = self.nodes.read();
                if current.id as usize >= nodes.len() || level >= nodes[current.id as usize].layers.len() {
                    continue;
                }
                let neighbors = nodes[current.id as usize].layers[level].read().clone();
                drop(nodes);

                for n in neighbors {
                    if self.tombstones.is_tombstoned(n) {
                        continue;
                    }
                    if n as usize >= scratch.marks.len() {
                        scratch.marks.resize(n as usize + 1, 0);
                    }
                    if !scratch.mark(n) {
                        continue;
                    }
                    let d = self.dist(n, query);
                    candidates.push(Candidate { id: n, distance: d });

                    if !allowed.map(|f| f.test(n)).unwrap_or(true) {
                        continue;
                    }
                    let worst = results.peek().map(|c| c.distance).unwrap_or(f32::MAX);
                    if results.len() < ef || d < worst {
                        results.push(Candidate { id: n, distance: d });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
            candidates_from(results)
        })
    }

    /// Greedy descent from the top layer to layer 1, then a beam search of
    /// `ef_search` at layer 0, skipping tombstoned ids and any id the
    /// caller's filter rejects. `allowed` is `None` for an unfiltered
    /// search.
    pub fn search(
        &self,
        query: &DenseVector,
        k: usize,
        ef_search: usize,
        allowed: Option<&PlannedFilter>,
        cancel: &CancellationToken,
    ) -> Vec<(NodeId, f32)> {
        if self.storage.count() == 0 {
            return Vec::new();
        }

        let entry_point = self.entry_point.load(Ordering::Relaxed);
        let max_layer = self.max_layer.load(Ordering::Relaxed) as usize;
        if (entry_point as usize) >= self.storage.count() {
            return Vec::new();
        }

        let mut curr_obj = entry_point;
        let mut curr_dist = self.dist(curr_obj, query);

        for level in (1..=max_layer).rev() {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            loop {
                let neighbor = {
                    let nodes = self.nodes.read();
                    if curr_obj as usize >= nodes.len() || level >= nodes[curr_obj as usize].layers.len() {
                        break;
                    }
                    let neighbors = nodes[curr_obj as usize].layers[level].read();
                    let mut best = None;
                    for &n in neighbors.iter() {
                        if self.tombstones.is_tombstoned(n) {
                            continue;
                        }
                        let d = self.dist(n, query);
                        if d < curr_dist {
                            curr_dist = d;
                            best = Some(n);
                        }
                    }
                    best
                };
                match neighbor {
                    Some(n) => curr_obj = n,
                    None => break,
                }
            }
        }

        let ef = ef_search.max(k);
        let candidates = self.search_layer_candidates(curr_obj, query, 0, ef, allowed);

        // Tombstones can still land in `results` between a delete and the
        // tombstone bit being set on a concurrently-traversed neighbor list,
        // so this check stays even though `allowed` is applied in-loop.
        let mut scored: Vec<Candidate> = candidates.into_iter().filter(|c| !self.tombstones.is_tombstoned(c.id)).collect();
        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(CmpOrdering::Equal).then(a.id.cmp(&b.id)));
        scored.truncate(k);
        scored.into_iter().map(|c| (c.id, c.distance)).collect()
    }

    /// Filter-first path: score a concrete candidate set directly, no graph
    /// traversal. Used by the query pipeline when the filter is highly
    /// selective.
    pub fn score_candidates(&self, ids: impl IntoIterator<Item = u32>, query: &DenseVector, k: usize) -> Vec<(NodeId, f32)> {
        let mut scored: Vec<Candidate> = ids
            .into_iter()
            .filter(|id| !self.tombstones.is_tombstoned(*id))
            .map(|id| Candidate { id, distance: self.dist(id, query) })
            .collect();
        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(CmpOrdering::Equal).then(a.id.cmp(&b.id)));
        scored.truncate(k);
        scored.into_iter().map(|c| (c.id, c.distance)).collect()
    }

    pub fn graph_neighbors(&self, id: NodeId, level: usize) -> Vec<NodeId> {
        let nodes = self.nodes.read();
        if id as usize >= nodes.len() || level >= nodes[id as usize].layers.len() {
            return Vec::new();
        }
        let links = nodes[id as usize].layers[level].read().clone();
        links
    }

    pub fn graph_traverse(&self, start: NodeId, max_depth: usize) -> Vec<NodeId> {
        let mut visited = std::collections::HashSet::new();
        let mut frontier = vec![start];
        let mut order = Vec::new();
        visited.insert(start);
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for &n in &frontier {
                order.push(n);
                for neighbor in self.graph_neighbors(n, 0) {
                    if visited.insert(neighbor) {
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        order
    }

    pub fn graph_connected_components(&self) -> Vec<Vec<NodeId>> {
        let total = self.storage.count() as u32;
        let mut visited = vec![false; total as usize];
        let mut components = Vec::new();
        for start in 0..total {
            if visited[start as usize] || self.tombstones.is_tombstoned(start) {
                continue;
            }
            let mut stack = vec![start];
            let mut component = Vec::new();
            visited[start as usize] = true;
            while let Some(n) = stack.pop() {
                component.push(n);
                for neighbor in self.graph_neighbors(n, 0) {
                    if !visited[neighbor as usize] {
                        visited[neighbor as usize] = true;
                        stack.push(neighbor);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    pub fn entry_point(&self) -> NodeId {
        self.entry_point.load(Ordering::Relaxed)
    }

    pub fn max_layer(&self) -> u32 {
        self.max_layer.load(Ordering::Relaxed)
    }

    pub(crate) fn raw_layers(&self, id: NodeId) -> Vec<Vec<NodeId>> {
        let nodes = self.nodes.read();
        if id as usize >= nodes.len() {
            return Vec::new();
        }
        nodes[id as usize].layers.iter().map(|l| l.read().clone()).collect()
    }

    pub(crate) fn set_raw_node(&self, id: NodeId, layers: Vec<Vec<NodeId>>) {
        let mut nodes = self.nodes.write();
        if nodes.len() <= id as usize {
            nodes.resize_with(id as usize + 1, Node::default);
        }
        nodes[id as usize] = Node { layers: layers.into_iter().map(RwLock::new).collect() };
    }

    pub(crate) fn set_entry_point(&self, entry: NodeId, max_layer: u32) {
        self.entry_point.store(entry, Ordering::SeqCst);
        self.max_layer.store(max_layer, Ordering::SeqCst);
    }

    pub fn storage(&self) -> Arc<VectorStore> {
        self.storage.clone()
    }
}

fn candidates_from(heap: BinaryHeap<Candidate>) -> BinaryHeap<Candidate> {
    heap
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vectordb_core::metric::EuclideanMetric;

    fn build_index(dim: usize) -> HnswIndex {
        let dir = tempdir().unwrap();
        let storage = Arc::new(VectorStore::new(dir.path(), dim * 4));
        let config = Arc::new(CollectionConfig::new());
        config.set_m(4);
        HnswIndex::new(storage, Arc::new(EuclideanMetric), dim, QuantizationMode::None, config)
    }

    #[test]
    fn insert_and_search_finds_nearest() {
        let idx = build_index(2);
        let points = [[0.0, 0.0], [1.0, 1.0], [5.0, 5.0], [5.1, 5.1], [9.0, 9.0]];
        for p in points {
            let v = DenseVector::new(p.to_vec());
            let id = idx.insert_to_storage(&v).unwrap();
            idx.index_node(id, &v).unwrap();
        }

        let query = DenseVector::new(vec![5.05, 5.05]);
        let cancel = CancellationToken::new();
        let results = idx.search(&query, 2, 32, None, &cancel);
        assert_eq!(results.len(), 2);
        let ids: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&2) && ids.contains(&3));
    }

    #[test]
    fn deleted_nodes_are_excluded_from_search() {
        let idx = build_index(2);
        for p in [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]] {
            let v = DenseVector::new(p.to_vec());
            let id = idx.insert_to_storage(&v).unwrap();
            idx.index_node(id, &v).unwrap();
        }
        idx.delete(0);
        let cancel = CancellationToken::new();
        let results = idx.search(&DenseVector::new(vec![0.0, 0.0]), 3, 32, None, &cancel);
        assert!(results.iter().all(|(id, _)| *id != 0));
    }

    #[test]
    fn graph_connected_components_finds_single_cluster() {
        let idx = build_index(1);
        for p in [[0.0], [0.1], [0.2], [10.0]] {
            let v = DenseVector::new(p.to_vec());
            let id = idx.insert_to_storage(&v).unwrap();
            idx.index_node(id, &v).unwrap();
        }
        let components = idx.graph_connected_components();
        assert!(!components.is_empty());
    }
}
