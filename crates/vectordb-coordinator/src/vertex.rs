//! DAG vertices: content-addressed write records. A vertex's id is the
//! hash of everything that determines its meaning (its parents, its
//! author, that author's sequence number, and its payload) so any peer
//! that recomputes the hash can detect tampering or transmission errors
//! without trusting the sender.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use std::io::{self, Cursor, Read};

use crate::clock::VectorClock;
use crate::error::{CoordinatorError, Result};

pub type VertexId = [u8; 32];
pub type AuthorId = [u8; 16];

pub fn vertex_id_hex(id: &VertexId) -> String {
    hex::encode(id)
}

pub fn author_id_hex(id: &AuthorId) -> String {
    hex::encode(id)
}

/// A single write, addressed by the key it mutates (`collection/external_id`)
/// and carrying an opaque delta the collection layer knows how to apply.
/// The coordinator only ever inspects `key`, never `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPayload {
    pub key: String,
    pub body: Vec<u8>,
}

impl OperationPayload {
    pub fn new(key: impl Into<String>, body: Vec<u8>) -> Self {
        Self { key: key.into(), body }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.key.len() + self.body.len());
        buf.write_u32::<LittleEndian>(self.key.len() as u32).unwrap();
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let key_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut key_buf = vec![0u8; key_len];
        cursor.read_exact(&mut key_buf)?;
        let key = String::from_utf8(key_buf)
            .map_err(|e| CoordinatorError::Malformed(format!("payload key is not utf-8: {e}")))?;
        let mut body = Vec::new();
        cursor.read_to_end(&mut body)?;
        Ok(Self { key, body })
    }
}

/// A DAG vertex: one write, causally linked to the 1-2 tips its author
/// observed at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub id: VertexId,
    pub parents: SmallVec<[VertexId; 2]>,
    pub author: AuthorId,
    pub author_seq: u64,
    pub clock: VectorClock,
    pub payload: OperationPayload,
}

impl Vertex {
    /// Builds a new vertex and computes its content-addressed id. `clock`
    /// is excluded from the id: it is local bookkeeping a vertex carries
    /// for causal-delivery and finalization purposes, not part of what the
    /// write *is*.
    pub fn new(
        parents: SmallVec<[VertexId; 2]>,
        author: AuthorId,
        author_seq: u64,
        clock: VectorClock,
        payload: OperationPayload,
    ) -> Self {
        let id = compute_id(&parents, &author, author_seq, &payload);
        Self { id, parents, author, author_seq, clock, payload }
    }

    pub fn key(&self) -> &str {
        &self.payload.key
    }

    /// Encodes the wire record:
    /// `vertex_id(32) | n_parents(1) | parent_ids[n](32 each) | author(16) |
    ///  author_seq(8) | clock_len(4) | clock_entries[(author(16), seq(8))] |
    ///  payload_len(4) | payload_bytes`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id);
        buf.push(self.parents.len() as u8);
        for p in &self.parents {
            buf.extend_from_slice(p);
        }
        buf.extend_from_slice(&self.author);
        buf.write_u64::<LittleEndian>(self.author_seq).unwrap();

        let clock_entries: Vec<(&AuthorId, &u64)> = self.clock.entries().collect();
        buf.write_u32::<LittleEndian>(clock_entries.len() as u32).unwrap();
        for (author, seq) in clock_entries {
            buf.extend_from_slice(author);
            buf.write_u64::<LittleEndian>(*seq).unwrap();
        }

        let payload_bytes = self.payload.encode();
        buf.write_u32::<LittleEndian>(payload_bytes.len() as u32).unwrap();
        buf.extend_from_slice(&payload_bytes);
        buf
    }

    /// Decodes and re-verifies a wire record. Returns
    /// [`CoordinatorError::IdMismatch`] if the recomputed id does not match
    /// the claimed one: peers must never accept a vertex whose id they
    /// cannot reproduce.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let mut id = [0u8; 32];
        cursor.read_exact(&mut id)?;

        let n_parents = cursor.read_u8()?;
        let mut parents = SmallVec::new();
        for _ in 0..n_parents {
            let mut p = [0u8; 32];
            cursor.read_exact(&mut p)?;
            parents.push(p);
        }

        let mut author = [0u8; 16];
        cursor.read_exact(&mut author)?;
        let author_seq = cursor.read_u64::<LittleEndian>()?;

        let clock_len = cursor.read_u32::<LittleEndian>()?;
        let mut clock = VectorClock::new();
        for _ in 0..clock_len {
            let mut a = [0u8; 16];
            cursor.read_exact(&mut a)?;
            let seq = cursor.read_u64::<LittleEndian>()?;
            clock.advance(a, seq);
        }

        let payload_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut payload_bytes = vec![0u8; payload_len];
        cursor.read_exact(&mut payload_bytes)?;
        let payload = OperationPayload::decode(&payload_bytes)?;

        let expected = compute_id(&parents, &author, author_seq, &payload);
        if expected != id {
            return Err(CoordinatorError::IdMismatch { expected: vertex_id_hex(&expected), got: vertex_id_hex(&id) });
        }

        Ok(Self { id, parents, author, author_seq, clock, payload })
    }
}

fn compute_id(parents: &[VertexId], author: &AuthorId, author_seq: u64, payload: &OperationPayload) -> VertexId {
    let mut hasher = Sha256::new();
    for p in parents {
        hasher.update(p);
    }
    hasher.update(author);
    hasher.update(author_seq.to_le_bytes());
    hasher.update(payload.encode());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

impl From<io::Error> for CoordinatorError {
    fn from(e: io::Error) -> Self {
        CoordinatorError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(author: AuthorId, seq: u64) -> VectorClock {
        let mut c = VectorClock::new();
        c.advance(author, seq);
        c
    }

    #[test]
    fn same_inputs_produce_same_id() {
        let author = [1u8; 16];
        let v1 = Vertex::new(SmallVec::new(), author, 1, vc(author, 1), OperationPayload::new("c/k1", vec![1, 2, 3]));
        let v2 = Vertex::new(SmallVec::new(), author, 1, vc(author, 1), OperationPayload::new("c/k1", vec![1, 2, 3]));
        assert_eq!(v1.id, v2.id);
    }

    #[test]
    fn different_payload_produces_different_id() {
        let author = [1u8; 16];
        let v1 = Vertex::new(SmallVec::new(), author, 1, VectorClock::new(), OperationPayload::new("c/k1", vec![1]));
        let v2 = Vertex::new(SmallVec::new(), author, 1, VectorClock::new(), OperationPayload::new("c/k1", vec![2]));
        assert_ne!(v1.id, v2.id);
    }

    #[test]
    fn clock_does_not_affect_id() {
        let author = [1u8; 16];
        let v1 = Vertex::new(SmallVec::new(), author, 1, VectorClock::new(), OperationPayload::new("c/k1", vec![1]));
        let v2 = Vertex::new(SmallVec::new(), author, 1, vc(author, 99), OperationPayload::new("c/k1", vec![1]));
        assert_eq!(v1.id, v2.id);
    }

    #[test]
    fn encode_decode_round_trips() {
        let author = [7u8; 16];
        let v = Vertex::new(SmallVec::new(), author, 3, vc(author, 3), OperationPayload::new("coll/ext-9", vec![9, 9, 9]));
        let bytes = v.encode();
        let decoded = Vertex::decode(&bytes).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn tampered_payload_fails_id_verification() {
        let author = [7u8; 16];
        let v = Vertex::new(SmallVec::new(), author, 3, VectorClock::new(), OperationPayload::new("coll/ext-9", vec![9]));
        let mut bytes = v.encode();
        *bytes.last_mut().unwrap() ^= 0xFF;
        assert!(Vertex::decode(&bytes).is_err());
    }
}
