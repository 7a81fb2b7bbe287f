//! The DAG coordinator: accepts local writes as new vertices, integrates
//! remote vertices under causal-delivery, advances finalization, and
//! detects/resolves conflicting concurrent writes to the same key.
//!
//! Locking discipline mirrors the per-author append lock plus shared
//! tip-set lock: `tips` and `vertices` are each a single `parking_lot::RwLock`
//! guarding small, cheaply-cloned metadata, never the write payloads
//! themselves once stored.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::clock::VectorClock;
use crate::error::{CoordinatorError, Result};
use crate::vertex::{AuthorId, OperationPayload, Vertex, VertexId};

pub const DEFAULT_FINALIZATION_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStatus {
    Pending,
    Finalized,
}

/// How conflicting concurrent writes to the same key are resolved once
/// both sides are finalized.
#[derive(Debug, Clone)]
pub enum ResolutionStrategy {
    /// The vertex with the greatest vector-clock entry for its own author
    /// wins; ties break on the lexicographically greater vertex id.
    LastWriterWins,
    /// A fixed, configured total order on authors; earlier in the list
    /// wins.
    NodePriority(Vec<AuthorId>),
    /// Never auto-resolves: both writes are kept and
    /// [`CoordinatorError::ConflictPending`] is raised until an
    /// application-submitted vertex descends from both.
    Manual,
}

struct StoredVertex {
    vertex: Vertex,
    status: VertexStatus,
    children: HashSet<VertexId>,
}

/// One node's view of the write DAG for a single collection shard.
pub struct Coordinator {
    local_author: AuthorId,
    finalization_depth: usize,
    strategy: ResolutionStrategy,
    vertices: RwLock<HashMap<VertexId, StoredVertex>>,
    tips: RwLock<HashSet<VertexId>>,
    local_clock: RwLock<VectorClock>,
    next_seq: AtomicU64,
}

impl Coordinator {
    pub fn new(local_author: AuthorId, finalization_depth: usize, strategy: ResolutionStrategy) -> Self {
        Self {
            local_author,
            finalization_depth: finalization_depth.max(1),
            strategy,
            vertices: RwLock::new(HashMap::new()),
            tips: RwLock::new(HashSet::new()),
            local_clock: RwLock::new(VectorClock::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn local_author(&self) -> AuthorId {
        self.local_author
    }

    pub fn tip_set(&self) -> Vec<VertexId> {
        self.tips.read().iter().copied().collect()
    }

    pub fn vertex(&self, id: &VertexId) -> Option<Vertex> {
        self.vertices.read().get(id).map(|sv| sv.vertex.clone())
    }

    pub fn status(&self, id: &VertexId) -> Option<VertexStatus> {
        self.vertices.read().get(id).map(|sv| sv.status)
    }

    pub fn local_clock(&self) -> VectorClock {
        self.local_clock.read().clone()
    }

    /// Creates and integrates a new local vertex, picking up to two tips
    /// as parents: one arbitrary local-chain tip plus, when available, a
    /// distinct tip authored elsewhere, so the graph stays merged instead
    /// of forking into per-author chains. Returns the vertex for the
    /// caller to broadcast; broadcast itself is out of scope here.
    pub fn submit(&self, key: impl Into<String>, body: Vec<u8>) -> Vertex {
        let parents = self.pick_parents();
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);

        let mut clock = self.local_clock.read().clone();
        clock.advance(self.local_author, seq);

        let vertex = Vertex::new(parents, self.local_author, seq, clock, OperationPayload::new(key, body));
        self.integrate(vertex.clone()).expect("locally-authored vertex is always well-formed");
        vertex
    }

    fn pick_parents(&self) -> SmallVec<[VertexId; 2]> {
        let tips = self.tips.read();
        let vertices = self.vertices.read();
        let mut local_tip = None;
        let mut remote_tip = None;
        for tip in tips.iter() {
            let Some(sv) = vertices.get(tip) else { continue };
            if sv.vertex.author == self.local_author {
                local_tip.get_or_insert(*tip);
            } else {
                remote_tip.get_or_insert(*tip);
            }
        }
        let mut parents = SmallVec::new();
        if let Some(t) = local_tip {
            parents.push(t);
        }
        if let Some(t) = remote_tip {
            parents.push(t);
        } else if parents.is_empty() {
            if let Some(t) = tips.iter().next() {
                parents.push(*t);
            }
        }
        parents
    }

    /// Integrates a vertex received from a peer (or produced locally by
    /// [`submit`]). Returns [`CoordinatorError::UnknownParent`] if a
    /// parent has not been seen yet; the caller is expected to queue the
    /// vertex and retry once the missing parent arrives (causal delivery
    /// is the caller's responsibility, matching the sync-then-replay
    /// pattern of a pruned-log catch-up).
    pub fn integrate(&self, vertex: Vertex) -> Result<()> {
        {
            let vertices = self.vertices.read();
            for parent in &vertex.parents {
                if !vertices.contains_key(parent) {
                    return Err(CoordinatorError::UnknownParent { parent: crate::vertex::vertex_id_hex(parent) });
                }
            }
            if vertices.contains_key(&vertex.id) {
                return Ok(());
            }
        }

        let id = vertex.id;
        let parents = vertex.parents.clone();
        self.local_clock.write().merge(&vertex.clock);

        {
            let mut vertices = self.vertices.write();
            vertices.insert(id, StoredVertex { vertex, status: VertexStatus::Pending, children: HashSet::new() });
            for parent in &parents {
                if let Some(sv) = vertices.get_mut(parent) {
                    sv.children.insert(id);
                }
            }
        }

        let mut tips = self.tips.write();
        for parent in &parents {
            tips.remove(parent);
        }
        tips.insert(id);
        Ok(())
    }

    fn compute_depths(&self) -> HashMap<VertexId, usize> {
        let vertices = self.vertices.read();
        let mut memo = HashMap::new();
        let mut order: Vec<VertexId> = vertices.keys().copied().collect();
        order.sort_unstable();
        for id in order {
            depth_of(id, &vertices, &mut memo);
        }
        memo
    }

    /// Advances finalization: any vertex whose longest descendant chain
    /// reaches the configured depth, and whose parents are already
    /// finalized, becomes finalized. Runs to a fixpoint each call so a
    /// single pass finalizes an entire newly-eligible ancestor chain.
    /// Finalization is monotone: a vertex, once finalized, is never
    /// revisited.
    pub fn finalize(&self) -> Vec<VertexId> {
        let depths = self.compute_depths();
        let mut vertices = self.vertices.write();
        let mut newly = Vec::new();
        loop {
            let mut changed = false;
            let mut candidates: Vec<VertexId> = vertices
                .iter()
                .filter(|(_, sv)| sv.status == VertexStatus::Pending)
                .map(|(id, _)| *id)
                .collect();
            candidates.sort_unstable();
            for id in candidates {
                let depth = *depths.get(&id).unwrap_or(&0);
                if depth < self.finalization_depth {
                    continue;
                }
                let parents = vertices[&id].vertex.parents.clone();
                let parents_ready = parents
                    .iter()
                    .all(|p| vertices.get(p).map_or(true, |sv| sv.status == VertexStatus::Finalized));
                if parents_ready {
                    vertices.get_mut(&id).unwrap().status = VertexStatus::Finalized;
                    newly.push(id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        newly
    }

    fn is_ancestor(&self, vertices: &HashMap<VertexId, StoredVertex>, candidate: VertexId, of: VertexId) -> bool {
        let mut stack = vec![of];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == candidate {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(sv) = vertices.get(&id) {
                stack.extend(sv.vertex.parents.iter().copied());
            }
        }
        false
    }

    /// Finalized vertices touching `key` that are mutually concurrent
    /// (neither is an ancestor of the other): the live conflict set for
    /// that key.
    pub fn concurrent_writers(&self, key: &str) -> Vec<VertexId> {
        let vertices = self.vertices.read();
        let touching: Vec<VertexId> = vertices
            .iter()
            .filter(|(_, sv)| sv.status == VertexStatus::Finalized && sv.vertex.key() == key)
            .map(|(id, _)| *id)
            .collect();

        touching
            .iter()
            .copied()
            .filter(|&a| {
                // a is concurrent with every other touching vertex: neither
                // an ancestor nor a descendant of it.
                touching
                    .iter()
                    .all(|&b| a == b || (!self.is_ancestor(&vertices, a, b) && !self.is_ancestor(&vertices, b, a)))
            })
            .collect()
    }

    /// Resolves the conflict set for `key` per the configured strategy,
    /// returning the winning vertex id.
    pub fn resolve(&self, key: &str) -> Result<VertexId> {
        let concurrent = self.concurrent_writers(key);
        if concurrent.len() <= 1 {
            return concurrent.into_iter().next().ok_or_else(|| CoordinatorError::NotFinalized(key.to_string()));
        }

        match &self.strategy {
            ResolutionStrategy::Manual => Err(CoordinatorError::ConflictPending(key.to_string())),
            ResolutionStrategy::LastWriterWins => {
                let vertices = self.vertices.read();
                Ok(*concurrent
                    .iter()
                    .max_by_key(|id| {
                        let v = &vertices[*id].vertex;
                        (v.clock.get(&v.author), *id)
                    })
                    .unwrap())
            }
            ResolutionStrategy::NodePriority(order) => {
                let vertices = self.vertices.read();
                Ok(*concurrent
                    .iter()
                    .min_by_key(|id| {
                        let author = vertices[*id].vertex.author;
                        order.iter().position(|a| *a == author).unwrap_or(usize::MAX)
                    })
                    .unwrap())
            }
        }
    }
}

fn depth_of(id: VertexId, vertices: &HashMap<VertexId, StoredVertex>, memo: &mut HashMap<VertexId, usize>) -> usize {
    if let Some(d) = memo.get(&id) {
        return *d;
    }
    let children: Vec<VertexId> = vertices.get(&id).map(|sv| sv.children.iter().copied().collect()).unwrap_or_default();
    let depth = if children.is_empty() { 0 } else { 1 + children.iter().map(|c| depth_of(*c, vertices, memo)).max().unwrap() };
    memo.insert(id, depth);
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(b: u8) -> AuthorId {
        [b; 16]
    }

    #[test]
    fn submit_with_no_tips_has_no_parents() {
        let c = Coordinator::new(author(1), 3, ResolutionStrategy::LastWriterWins);
        let v = c.submit("coll/a", vec![1]);
        assert!(v.parents.is_empty());
        assert_eq!(c.tip_set(), vec![v.id]);
    }

    #[test]
    fn chained_submits_link_as_parent_child() {
        let c = Coordinator::new(author(1), 3, ResolutionStrategy::LastWriterWins);
        let v1 = c.submit("coll/a", vec![1]);
        let v2 = c.submit("coll/b", vec![2]);
        assert_eq!(v2.parents.as_slice(), &[v1.id]);
        assert_eq!(c.tip_set(), vec![v2.id]);
    }

    #[test]
    fn integrate_rejects_unknown_parent() {
        let c = Coordinator::new(author(1), 3, ResolutionStrategy::LastWriterWins);
        let ghost_parent: VertexId = [9; 32];
        let v = Vertex::new(
            SmallVec::from_slice(&[ghost_parent]),
            author(2),
            1,
            VectorClock::new(),
            OperationPayload::new("coll/a", vec![1]),
        );
        assert!(matches!(c.integrate(v), Err(CoordinatorError::UnknownParent { .. })));
    }

    #[test]
    fn finalization_requires_depth_and_finalized_ancestors() {
        let c = Coordinator::new(author(1), 2, ResolutionStrategy::LastWriterWins);
        let mut last = c.submit("coll/a", vec![0]);
        for i in 0..5 {
            last = c.submit("coll/a", vec![i]);
        }
        let finalized = c.finalize();
        assert!(!finalized.is_empty());
        // The most recent vertex cannot be finalized: it has no
        // descendants yet, so its depth is 0.
        assert!(!finalized.contains(&last.id));
        // Ancestors-before-descendants: every finalized vertex's parents
        // are themselves either finalized or the graph root.
        for id in &finalized {
            let v = c.vertex(id).unwrap();
            for p in &v.parents {
                assert_eq!(c.status(p), Some(VertexStatus::Finalized));
            }
        }
    }

    #[test]
    fn concurrent_writes_to_same_key_are_detected() {
        let c = Coordinator::new(author(1), 1, ResolutionStrategy::LastWriterWins);
        let v1 = c.submit("coll/a", vec![1]);
        // Two independent children of v1, both touching the same key:
        // concurrent since neither is an ancestor of the other.
        let clock_a = {
            let mut cl = v1.clock.clone();
            cl.advance(author(1), 10);
            cl
        };
        let branch_a = Vertex::new(SmallVec::from_slice(&[v1.id]), author(1), 10, clock_a, OperationPayload::new("coll/a", vec![2]));
        let clock_b = {
            let mut cl = v1.clock.clone();
            cl.advance(author(2), 1);
            cl
        };
        let branch_b = Vertex::new(SmallVec::from_slice(&[v1.id]), author(2), 1, clock_b, OperationPayload::new("coll/a", vec![3]));
        c.integrate(branch_a.clone()).unwrap();
        c.integrate(branch_b.clone()).unwrap();

        // Force both into Finalized for the purposes of this test by
        // driving enough descendants.
        for i in 0..5 {
            c.submit("coll/other", vec![i]);
        }
        c.finalize();

        let conflict = c.concurrent_writers("coll/a");
        assert!(conflict.contains(&branch_a.id) || conflict.contains(&branch_b.id));
    }

    #[test]
    fn manual_strategy_raises_conflict_pending_on_unresolved_concurrent_writes() {
        let c = Coordinator::new(author(1), 1, ResolutionStrategy::Manual);
        let v1 = c.submit("coll/a", vec![1]);
        let branch_a = Vertex::new(SmallVec::from_slice(&[v1.id]), author(1), 10, VectorClock::new(), OperationPayload::new("coll/a", vec![2]));
        let branch_b = Vertex::new(SmallVec::from_slice(&[v1.id]), author(2), 1, VectorClock::new(), OperationPayload::new("coll/a", vec![3]));
        c.integrate(branch_a).unwrap();
        c.integrate(branch_b).unwrap();
        for i in 0..5 {
            c.submit("coll/other", vec![i]);
        }
        c.finalize();
        assert!(matches!(c.resolve("coll/a"), Err(CoordinatorError::ConflictPending(_))));
    }
}
