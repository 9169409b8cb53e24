//! Cosine similarity over embedding vectors.

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when lengths differ, either vector is empty, or either
/// vector has zero norm.
///
/// # Examples
///
/// ```
/// use warden_codelens::similarity::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
/// assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Pairwise cosine similarity: `result[i][j] = cos(a[i], b[j])`.
///
/// # Examples
///
/// ```
/// use warden_codelens::similarity::similarity_matrix;
///
/// let a = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
/// let b = vec![vec![1.0, 0.0]];
/// let m = similarity_matrix(&a, &b);
/// assert_eq!(m.len(), 2);
/// assert_eq!(m[0].len(), 1);
/// assert!((m[0][0] - 1.0).abs() < 1e-6);
/// ```
pub fn similarity_matrix(a: &[Vec<f32>], b: &[Vec<f32>]) -> Vec<Vec<f32>> {
    a.iter()
        .map(|row| b.iter().map(|col| cosine_similarity(row, col)).collect())
        .collect()
}
