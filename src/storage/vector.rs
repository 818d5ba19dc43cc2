//! Append-only inner-product index over unit vectors
//!
//! One index per tenant. Vectors are stored in a contiguous f32 matrix; row
//! ids are stable and equal to insertion order, and search is a brute-force
//! matrix-vector multiply. Since both query and stored vectors are
//! unit-length, the inner product equals the cosine similarity.

use crate::utils::error::{CacheError, Result};

/// L2-normalize a vector in place
///
/// A small epsilon keeps the all-zero vector from dividing by zero, matching
/// the normalization applied by embedding backends.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-12;
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Brute-force inner-product nearest-neighbor index
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    /// Dimension, fixed by the first insertion
    dim: Option<usize>,
    /// Row-major matrix of stored vectors
    data: Vec<f32>,
    /// Number of stored vectors
    len: usize,
}

impl VectorIndex {
    /// Create an empty index; the dimension is fixed by the first `add`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no vectors
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Dimension of stored vectors, if any have been added
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Append a vector; its row id is the current length
    ///
    /// The vector is normalized defensively before storage so the
    /// inner-product/cosine equivalence holds even for slightly drifted
    /// inputs.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.is_empty() {
            return Err(CacheError::invariant("cannot index an empty vector"));
        }
        match self.dim {
            None => self.dim = Some(vector.len()),
            Some(dim) if dim != vector.len() => {
                return Err(CacheError::invariant(format!(
                    "vector dimension {} does not match index dimension {}",
                    vector.len(),
                    dim
                )));
            }
            Some(_) => {}
        }

        let row = self.len;
        let start = self.data.len();
        self.data.extend_from_slice(vector);
        l2_normalize(&mut self.data[start..]);
        self.len += 1;
        Ok(row)
    }

    /// Return up to `k` `(row, inner_product)` pairs sorted descending
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let Some(dim) = self.dim else {
            return Vec::new();
        };
        if query.len() != dim || k == 0 {
            return Vec::new();
        }

        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut scores: Vec<(usize, f32)> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(row, stored)| {
                let dot = stored.iter().zip(q.iter()).map(|(a, b)| a * b).sum();
                (row, dot)
            })
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k.min(self.len));
        scores
    }

    /// Borrow the stored vector at `row`
    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        let dim = self.dim?;
        if row >= self.len {
            return None;
        }
        Some(&self.data[row * dim..(row + 1) * dim])
    }
}
