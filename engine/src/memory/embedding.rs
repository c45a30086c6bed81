//! Vector helpers and the hash-based fallback embedding

/// Embedding space name used for hash-derived vectors
pub const PSEUDO_MODEL: &str = "pseudo-blake3";

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1]
///
/// Vectors of different length or with zero norm score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Scale to unit length; zero vectors are returned unchanged
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// True if the vector can be stored and scored
pub fn is_usable(v: &[f32]) -> bool {
    !v.is_empty() && v.iter().all(|x| x.is_finite()) && l2_norm(v) > 0.0
}

/// Deterministic unit vector derived from the text
///
/// blake3 extendable output is read four bytes per component and mapped
/// to [-1, 1]. Identical text always yields the identical vector.
pub fn pseudo_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(text.as_bytes());
    let mut reader = hasher.finalize_xof();

    let mut bytes = vec![0u8; dimensions * 4];
    reader.fill(&mut bytes);

    let v = bytes
        .chunks_exact(4)
        .map(|chunk| {
            let n = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            ((n as f64 / u32::MAX as f64) * 2.0 - 1.0) as f32
        })
        .collect();

    normalize(v)
}
