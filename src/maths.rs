//! Numeric helpers shared by the scene decoders.
//!
//! Covariances are stored as the six upper-triangular entries of a symmetric
//! 3x3 matrix, in the order `[xx, xy, xz, yy, yz, zz]`.

use glam::{Mat3, Vec3};

/// Zeroth-order spherical harmonic basis constant.
pub const SH_C0: f32 = 0.282_094_79;

/// Number of SH coefficients per color channel for degree-3 harmonics.
pub const SH_COEFFS_PER_CHANNEL: usize = 16;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Component-wise `exp`, used to turn stored log-scales into scales.
pub fn exp3(v: [f32; 3]) -> [f32; 3] {
    [v[0].exp(), v[1].exp(), v[2].exp()]
}

/// Normalize a `[w, x, y, z]` quaternion.
///
/// A zero (or non-finite) quaternion normalizes to identity rather than NaN.
pub fn normalize_quaternion(q: [f32; 4]) -> [f32; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return [1.0, 0.0, 0.0, 0.0];
    }
    [q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm]
}

/// Rotation matrix for a normalized `[w, x, y, z]` quaternion, laid out with
/// the same column order the projection shader expects.
pub fn rotation_matrix(q: [f32; 4]) -> Mat3 {
    let [r, x, y, z] = q;
    Mat3::from_cols_array(&[
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - r * z),
        2.0 * (x * z + r * y),
        2.0 * (x * y + r * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - r * x),
        2.0 * (x * z - r * y),
        2.0 * (y * z + r * x),
        1.0 - 2.0 * (x * x + y * y),
    ])
}

/// Build the 3D covariance `(S*R)^T * (S*R)` from a linear scale and a raw
/// quaternion. The quaternion is normalized first.
pub fn compute_cov3d(scale: [f32; 3], rotation: [f32; 4]) -> [f32; 6] {
    let s = Mat3::from_diagonal(Vec3::from_array(scale));
    let r = rotation_matrix(normalize_quaternion(rotation));
    let m = s * r;
    let sigma = m.transpose() * m;

    [
        sigma.x_axis.x,
        sigma.x_axis.y,
        sigma.x_axis.z,
        sigma.y_axis.y,
        sigma.y_axis.z,
        sigma.z_axis.z,
    ]
}

/// Flat RGB color from the DC spherical-harmonic term.
pub fn sh_dc_to_color(dc: [f32; 3]) -> [f32; 3] {
    [
        0.5 + SH_C0 * dc[0],
        0.5 + SH_C0 * dc[1],
        0.5 + SH_C0 * dc[2],
    ]
}

// ============================================================================
// Codebooks
// ============================================================================

/// Fetch row `index` from a flat, row-major codebook with rows of width `K`.
pub fn codebook_entry<const K: usize>(codebook: &[f32], index: usize) -> Option<[f32; K]> {
    let start = index.checked_mul(K)?;
    let row = codebook.get(start..start.checked_add(K)?)?;
    let mut out = [0.0; K];
    out.copy_from_slice(row);
    Some(out)
}

/// Decompress a whole index array against a codebook.
///
/// Returns the first out-of-range index on failure.
pub fn lookup_rows<const K: usize>(codebook: &[f32], indices: &[u32]) -> Result<Vec<[f32; K]>, u32> {
    indices
        .iter()
        .map(|&i| codebook_entry::<K>(codebook, i as usize).ok_or(i))
        .collect()
}
