//! Vector math for cosine retrieval
//!
//! Plain iterator loops that LLVM auto-vectorizes with `-C target-cpu=native`.
//!
//! Every vector that enters the index is L2-normalized first, so the index
//! only ever computes inner products:
//! ```text
//! cos(θ) = A · B  when ||A|| = ||B|| = 1
//! ```

/// Inner product of two equal-length vectors.
#[inline(always)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector length mismatch");

    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm ||v||.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place.
///
/// A vector whose norm is zero or not finite is left as is, so the zero
/// vector stays the zero vector instead of turning into NaNs. Any positive
/// norm is divided out, however small. Returns `false` when the vector was
/// left untouched.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
        true
    } else {
        false
    }
}

/// Copying variant of [`l2_normalize`].
pub fn l2_normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    l2_normalize(&mut out);
    out
}

/// Normalize every `dim`-wide row of a row-major buffer.
///
/// Returns how many rows had a zero norm and were kept unnormalized.
pub fn l2_normalize_rows(data: &mut [f32], dim: usize) -> usize {
    if dim == 0 {
        return 0;
    }
    data.chunks_exact_mut(dim)
        .map(|row| usize::from(!l2_normalize(row)))
        .sum()
}

/// Zero every `dim`-wide row that holds a NaN or an infinity.
///
/// Returns how many rows were zeroed.
pub fn zero_non_finite_rows(data: &mut [f32], dim: usize) -> usize {
    if dim == 0 {
        return 0;
    }
    let mut zeroed = 0;
    for row in data.chunks_exact_mut(dim) {
        if row.iter().any(|x| !x.is_finite()) {
            row.fill(0.0);
            zeroed += 1;
        }
    }
    zeroed
}

/// Check if a vector has unit length within `tolerance`.
#[inline]
pub fn is_normalized(v: &[f32], tolerance: f32) -> bool {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    (norm_sq - 1.0).abs() < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_basic() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];

        // 5 + 12 + 21 + 32
        assert!((dot_product(&a, &b) - 70.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_three_four_five() {
        let mut v = vec![3.0, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(is_normalized(&v, 1e-5));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = l2_normalized(&[0.3, -1.7, 2.2, 0.05]);
        let twice = l2_normalized(&once);
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_vector_stays_zero() {
        let mut v = vec![0.0f32; 8];
        assert!(!l2_normalize(&mut v));
        assert!(v.iter().all(|x| *x == 0.0));
        assert!(l2_normalized(&v).iter().all(|x| !x.is_nan()));
    }

    #[test]
    fn test_normalize_rows_counts_zero_rows() {
        let mut data = vec![3.0, 4.0, 0.0, 0.0, 0.0, 2.0];
        let zero_rows = l2_normalize_rows(&mut data, 2);

        assert_eq!(zero_rows, 1);
        assert!(is_normalized(&data[0..2], 1e-5));
        assert_eq!(&data[2..4], &[0.0, 0.0]);
        assert_eq!(&data[4..6], &[0.0, 1.0]);
    }

    #[test]
    fn test_tiny_norm_is_still_normalized() {
        let mut v = vec![1e-8f32, 0.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 1.0).abs() < 1e-6);
        assert!(is_normalized(&v, 1e-5));

        let unit = l2_normalized(&[3e-9, 4e-9]);
        assert!((unit[0] - 0.6).abs() < 1e-5);
        assert!((unit[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_non_finite_rows_are_zeroed() {
        let mut data = vec![1.0, 0.0, f32::NAN, 0.5, 0.0, f32::INFINITY, 0.0, 2.0];
        assert_eq!(zero_non_finite_rows(&mut data, 2), 2);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]);

        assert!(!l2_normalize(&mut [f32::NAN, 1.0]));
    }

    #[test]
    fn test_orthogonal_unit_vectors() {
        let a = l2_normalized(&[1.0, 0.0, 0.0]);
        let b = l2_normalized(&[0.0, 5.0, 0.0]);

        assert!(dot_product(&a, &b).abs() < 1e-6);
        assert!((dot_product(&a, &a) - 1.0).abs() < 1e-6);
    }
}
