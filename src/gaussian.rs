//! Decoded, device-independent Gaussian scene representation.

use crate::error::{SplatError, SplatResult};
use crate::maths::SH_COEFFS_PER_CHANNEL;

/// Color source for one splat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SplatColor {
    /// Flat RGB derived from the DC harmonic term.
    Rgb([f32; 3]),
    /// Index into the scene's shared SH codebook.
    ShIndex(u32),
}

/// One normalized Gaussian.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianRecord {
    pub mean: [f32; 3],
    /// Post-sigmoid opacity in `[0, 1]`.
    pub opacity: f32,
    /// Upper triangle `[xx, xy, xz, yy, yz, zz]`.
    pub covariance: [f32; 6],
    pub color: SplatColor,
}

/// Clustered spherical-harmonic coefficients shared across splats.
///
/// Each cluster holds 16 coefficients with one RGB triple each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShCodebook {
    pub clusters: Vec<[[f32; 3]; SH_COEFFS_PER_CHANNEL]>,
}

impl ShCodebook {
    /// Build from a flat array of 48 floats per cluster (coefficient-major, then channel).
    pub fn from_flat(flat: &[f32]) -> SplatResult<Self> {
        const CLUSTER_LEN: usize = SH_COEFFS_PER_CHANNEL * 3;
        if flat.len() % CLUSTER_LEN != 0 {
            return Err(SplatError::format(format!(
                "SH codebook length {} is not a multiple of {}",
                flat.len(),
                CLUSTER_LEN
            )));
        }
        let clusters = flat
            .chunks_exact(CLUSTER_LEN)
            .map(|chunk| {
                let mut cluster = [[0.0; 3]; SH_COEFFS_PER_CHANNEL];
                for (coeff, rgb) in cluster.iter_mut().enumerate() {
                    rgb.copy_from_slice(&chunk[coeff * 3..coeff * 3 + 3]);
                }
                cluster
            })
            .collect();
        Ok(Self { clusters })
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// A decoded scene: the record set plus the optional SH codebook.
///
/// Records are either all `Rgb` (no codebook) or all `ShIndex` (with codebook).
#[derive(Clone, Debug, Default)]
pub struct GaussianSet {
    pub records: Vec<GaussianRecord>,
    pub codebook: Option<ShCodebook>,
}

impl GaussianSet {
    pub fn uncompressed(records: Vec<GaussianRecord>) -> Self {
        Self { records, codebook: None }
    }

    pub fn compressed(records: Vec<GaussianRecord>, codebook: ShCodebook) -> Self {
        Self { records, codebook: Some(codebook) }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_compressed(&self) -> bool {
        self.codebook.is_some()
    }

    /// Check that color kinds agree with the presence of a codebook and that
    /// every SH index is in range.
    pub fn validate(&self) -> SplatResult<()> {
        let clusters = self.codebook.as_ref().map(|c| c.len());
        for (i, record) in self.records.iter().enumerate() {
            match (record.color, clusters) {
                (SplatColor::Rgb(_), None) => {}
                (SplatColor::ShIndex(idx), Some(n)) if (idx as usize) < n => {}
                (SplatColor::ShIndex(idx), Some(n)) => {
                    return Err(SplatError::format(format!(
                        "splat {} references SH cluster {} of {}",
                        i, idx, n
                    )));
                }
                (SplatColor::Rgb(_), Some(_)) | (SplatColor::ShIndex(_), None) => {
                    return Err(SplatError::format(format!(
                        "splat {} mixes direct color and SH codebook modes",
                        i
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(color: SplatColor) -> GaussianRecord {
        GaussianRecord {
            mean: [0.0; 3],
            opacity: 1.0,
            covariance: [1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            color,
        }
    }

    #[test]
    fn test_codebook_from_flat() {
        let flat: Vec<f32> = (0..96).map(|i| i as f32).collect();
        let book = ShCodebook::from_flat(&flat).unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book.clusters[0][1], [3.0, 4.0, 5.0]);
        assert_eq!(book.clusters[1][0], [48.0, 49.0, 50.0]);
        assert!(ShCodebook::from_flat(&flat[..47]).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let book = ShCodebook::from_flat(&[0.0; 48]).unwrap();
        let ok = GaussianSet::compressed(vec![record(SplatColor::ShIndex(0))], book.clone());
        assert!(ok.validate().is_ok());
        let bad = GaussianSet::compressed(vec![record(SplatColor::ShIndex(1))], book);
        assert!(matches!(bad.validate(), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_validate_rejects_mixed_modes() {
        let set = GaussianSet::uncompressed(vec![record(SplatColor::ShIndex(0))]);
        assert!(set.validate().is_err());
        assert!(GaussianSet::default().validate().is_ok());
    }
}
