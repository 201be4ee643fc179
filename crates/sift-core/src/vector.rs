//! Vector math for embeddings: L2 normalization and cosine similarity.
//!
//! Everything that enters the store is expected to be unit length, so cosine
//! similarity reduces to a dot product.

/// Euclidean (L2) length of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns `v` scaled to unit length. A zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// In-place variant of [`normalize`].
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Cosine similarity of two unit vectors (their dot product).
///
/// Vectors of different length score exactly `0.0`. Stores may hold vectors from
/// more than one embedding model while a migration is under way, and a query must
/// keep working against them rather than fail.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
