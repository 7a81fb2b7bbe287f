//! Quantized vector encodings.
//!
//! The teacher's `HyperVector<const N: usize>` packed coordinates into a
//! fixed-size `#[repr(C, align(64))]` array and cast it to/from bytes with
//! `unsafe` raw-pointer reinterpretation, which is only sound because `N` is
//! known at compile time. Collections here have a runtime `dim`, so the same
//! byte-for-byte layout is produced with a safe little-endian encode/decode
//! pass instead (the store's WAL already does this for its own framing via
//! `byteorder`, so this keeps one encoding idiom across the workspace rather
//! than mixing an unsafe cast in one crate with safe framing in another).

use crate::error::{Error, InputError};

/// `None`: store raw f32 components. `ScalarI8`: each component quantized to
/// a signed byte against a per-vector scale. `Binary`: one sign bit per
/// component, for Hamming-distance prefiltering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QuantizationMode {
    None,
    ScalarI8,
    Binary,
}

impl Default for QuantizationMode {
    fn default() -> Self {
        QuantizationMode::None
    }
}

/// A full-precision vector plus the byte codec used to persist it.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVector {
    pub components: Vec<f32>,
}

impl DenseVector {
    pub fn new(components: Vec<f32>) -> Self {
        Self { components }
    }

    pub fn dim(&self) -> usize {
        self.components.len()
    }

    pub fn validate_dim(&self, expected: usize) -> Result<(), Error> {
        if self.components.len() != expected {
            return Err(InputError::DimensionMismatch {
                expected,
                got: self.components.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.components.len() * 4);
        for c in &self.components {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let components = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self { components }
    }
}

/// Scalar-quantized vector: one i8 per component plus a single f32 scale
/// recovering the original magnitude as `i8 as f32 * scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarI8Vector {
    pub scale: f32,
    pub codes: Vec<i8>,
}

impl ScalarI8Vector {
    pub fn from_dense(v: &DenseVector) -> Self {
        let max_abs = v
            .components
            .iter()
            .fold(0.0f32, |acc, x| acc.max(x.abs()))
            .max(1e-9);
        let scale = max_abs / i8::MAX as f32;
        let codes = v
            .components
            .iter()
            .map(|x| (x / scale).round().clamp(i8::MIN as f32, i8::MAX as f32) as i8)
            .collect();
        Self { scale, codes }
    }

    pub fn to_dense(&self) -> DenseVector {
        DenseVector::new(self.codes.iter().map(|c| *c as f32 * self.scale).collect())
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.codes.len());
        out.extend_from_slice(&self.scale.to_le_bytes());
        out.extend(self.codes.iter().map(|c| *c as u8));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let scale = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let codes = bytes[4..].iter().map(|b| *b as i8).collect();
        Self { scale, codes }
    }

    /// Distance between two quantized vectors without fully dequantizing:
    /// scales are pulled out of the sum so the inner loop stays integer.
    pub fn euclidean_distance_sq(&self, other: &ScalarI8Vector) -> f32 {
        let sum_sq: i64 = self
            .codes
            .iter()
            .zip(&other.codes)
            .map(|(a, b)| {
                let a = (*a as f32 * self.scale) as i64;
                let b = (*b as f32 * other.scale) as i64;
                (a - b).pow(2)
            })
            .sum();
        sum_sq as f32
    }
}

/// One bit per component, packed MSB-first into bytes. Used for a cheap
/// Hamming-distance prefilter ahead of an exact re-score, grounded on the
/// teacher's `BinaryHyperVector`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryVector {
    pub dim: usize,
    pub bits: Vec<u8>,
}

impl BinaryVector {
    pub fn from_dense(v: &DenseVector) -> Self {
        let dim = v.components.len();
        let mut bits = vec![0u8; (dim + 7) / 8];
        for (i, c) in v.components.iter().enumerate() {
            if *c >= 0.0 {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        Self { dim, bits }
    }

    pub fn hamming_distance(&self, other: &BinaryVector) -> u32 {
        self.bits
            .iter()
            .zip(&other.bits)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.bits.len());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let dim = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        Self {
            dim,
            bits: bytes[4..].to_vec(),
        }
    }
}
