//! Context vector mixing strategies (§4.3 "Mixing", §9): combine a hold-pose
//! context and a reward context into one active context vector.

use motivo_cache::ContextVector;

/// Below this sine-of-angle threshold, two context vectors are treated as
/// parallel (or anti-parallel) and `slerp` degrades to `linear` to avoid
/// dividing by a near-zero `sin(omega)`.
pub const SLERP_DEGENERATE_THRESHOLD: f64 = 1e-4;

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

fn norm(a: &[f32]) -> f64 {
    dot(a, a).sqrt()
}

/// `(1 - weight) * a + weight * b`, component-wise.
pub fn linear(a: &ContextVector, b: &ContextVector, weight: f64) -> ContextVector {
    let w = weight.clamp(0.0, 1.0);
    let out = a
        .0
        .iter()
        .zip(&b.0)
        .map(|(x, y)| ((1.0 - w) * f64::from(*x) + w * f64::from(*y)) as f32)
        .collect();
    ContextVector(out)
}

/// Linear mix followed by L2-normalization to unit length.
pub fn normalized(a: &ContextVector, b: &ContextVector, weight: f64) -> ContextVector {
    let mixed = linear(a, b, weight);
    let current_norm = norm(&mixed.0);
    if current_norm < f64::EPSILON {
        return mixed;
    }
    ContextVector(mixed.0.iter().map(|v| v / current_norm as f32).collect())
}

/// Spherical linear interpolation between `a` and `b`. Falls back to
/// [`linear`] when the vectors are (anti-)parallel within
/// [`SLERP_DEGENERATE_THRESHOLD`], since `sin(omega)` would otherwise be
/// numerically unstable to divide by.
pub fn slerp(a: &ContextVector, b: &ContextVector, weight: f64) -> ContextVector {
    let w = weight.clamp(0.0, 1.0);
    let norm_a = norm(&a.0);
    let norm_b = norm(&b.0);
    if norm_a < f64::EPSILON || norm_b < f64::EPSILON {
        return linear(a, b, w);
    }

    let cos_omega = (dot(&a.0, &b.0) / (norm_a * norm_b)).clamp(-1.0, 1.0);
    let omega = cos_omega.acos();
    let sin_omega = omega.sin();

    if sin_omega.abs() < SLERP_DEGENERATE_THRESHOLD {
        return linear(a, b, w);
    }

    let scale_a = ((1.0 - w) * omega).sin() / sin_omega;
    let scale_b = (w * omega).sin() / sin_omega;
    let out = a
        .0
        .iter()
        .zip(&b.0)
        .map(|(x, y)| (scale_a * f64::from(*x) + scale_b * f64::from(*y)) as f32)
        .collect();
    ContextVector(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_at_zero_returns_a_at_one_returns_b() {
        let a = ContextVector(vec![1.0, 0.0]);
        let b = ContextVector(vec![0.0, 1.0]);
        assert_eq!(linear(&a, &b, 0.0).0, vec![1.0, 0.0]);
        assert_eq!(linear(&a, &b, 1.0).0, vec![0.0, 1.0]);
    }

    #[test]
    fn slerp_midpoint_of_orthogonal_unit_vectors_is_equidistant() {
        let a = ContextVector(vec![1.0, 0.0]);
        let b = ContextVector(vec![0.0, 1.0]);
        let mid = slerp(&a, &b, 0.5);
        let da = ((mid.0[0] - 1.0).powi(2) + mid.0[1].powi(2)).sqrt();
        let db = (mid.0[0].powi(2) + (mid.0[1] - 1.0).powi(2)).sqrt();
        assert!((da - db).abs() < 1e-6);
    }

    #[test]
    fn slerp_degenerates_to_linear_on_parallel_vectors() {
        let a = ContextVector(vec![2.0, 0.0]);
        let b = ContextVector(vec![4.0, 0.0]);
        let out = slerp(&a, &b, 0.5);
        assert_eq!(out.0, linear(&a, &b, 0.5).0);
    }

    #[test]
    fn normalized_produces_a_unit_vector() {
        let a = ContextVector(vec![3.0, 0.0]);
        let b = ContextVector(vec![0.0, 5.0]);
        let out = normalized(&a, &b, 0.5);
        let out_norm = norm(&out.0);
        assert!((out_norm - 1.0).abs() < 1e-6);
    }
}
