//! Codebook-quantized NPZ scenes.
//!
//! The archive carries per-splat means and opacities plus indices into small
//! shared codebooks for scale, rotation and spherical harmonics. Covariances
//! are rebuilt here from the scale and rotation codebook entries; SH
//! coefficients stay clustered and are uploaded once per cluster.

use std::io::{Cursor, Read};

use crate::error::{SplatError, SplatResult};
use crate::gaussian::{GaussianRecord, GaussianSet, ShCodebook, SplatColor};
use crate::loader::npy::NpyArray;
use crate::maths::{compute_cov3d, exp3, lookup_rows, sigmoid};

pub const MEAN: &str = "mean";
pub const OPACITY: &str = "opacity";
pub const SH_INDICES: &str = "iDCSH";
pub const SH_CODEBOOK: &str = "cDCSH";
pub const SCALE_INDICES: &str = "iSc";
pub const SCALE_CODEBOOK: &str = "cSc";
pub const ROTATION_INDICES: &str = "iRo";
pub const ROTATION_CODEBOOK: &str = "cRo";

/// Every array a compressed scene must provide.
pub const REQUIRED_ARRAYS: [&str; 8] = [
    MEAN,
    OPACITY,
    SH_INDICES,
    SH_CODEBOOK,
    SCALE_INDICES,
    SCALE_CODEBOOK,
    ROTATION_INDICES,
    ROTATION_CODEBOOK,
];

/// Named arrays read out of an NPZ archive.
pub struct NpzArchive<'a> {
    zip: zip::ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> NpzArchive<'a> {
    pub fn new(bytes: &'a [u8]) -> SplatResult<Self> {
        Ok(Self {
            zip: zip::ZipArchive::new(Cursor::new(bytes))?,
        })
    }

    fn entry_name(&self, name: &str) -> Option<String> {
        [format!("{}.npy", name), name.to_string()]
            .into_iter()
            .find(|candidate| self.zip.index_for_name(candidate).is_some())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry_name(name).is_some()
    }

    /// Read array `name`, stored either as `name.npy` or bare `name`.
    pub fn array(&mut self, name: &str) -> SplatResult<NpyArray> {
        let entry = self
            .entry_name(name)
            .ok_or_else(|| SplatError::format(format!("NPZ archive is missing array '{}'", name)))?;

        let mut file = self.zip.by_name(&entry)?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        NpyArray::parse(&bytes).map_err(|e| SplatError::format(format!("array '{}': {}", name, e)))
    }
}

fn expect_len(name: &str, actual: usize, expected: usize) -> SplatResult<()> {
    if actual != expected {
        return Err(SplatError::format(format!(
            "array '{}' has {} elements, expected {}",
            name, actual, expected
        )));
    }
    Ok(())
}

pub fn decode(bytes: &[u8]) -> SplatResult<GaussianSet> {
    let mut archive = NpzArchive::new(bytes)?;

    if let Some(missing) = REQUIRED_ARRAYS.iter().find(|name| !archive.contains(name)) {
        return Err(SplatError::format(format!("NPZ archive is missing array '{}'", missing)));
    }

    let sh_indices = archive.array(SH_INDICES)?.to_indices()?;
    let count = sh_indices.len();

    let means = archive.array(MEAN)?.to_f32();
    expect_len(MEAN, means.len(), count * 3)?;
    let opacities = archive.array(OPACITY)?.to_f32();
    expect_len(OPACITY, opacities.len(), count)?;

    let scale_indices = archive.array(SCALE_INDICES)?.to_indices()?;
    expect_len(SCALE_INDICES, scale_indices.len(), count)?;
    let rotation_indices = archive.array(ROTATION_INDICES)?.to_indices()?;
    expect_len(ROTATION_INDICES, rotation_indices.len(), count)?;

    let scale_codebook = archive.array(SCALE_CODEBOOK)?.to_f32();
    let rotation_codebook = archive.array(ROTATION_CODEBOOK)?.to_f32();
    let codebook = ShCodebook::from_flat(&archive.array(SH_CODEBOOK)?.to_f32())?;

    let scales = lookup_rows::<3>(&scale_codebook, &scale_indices)
        .map_err(|index| out_of_range(SCALE_CODEBOOK, index))?;
    let rotations = lookup_rows::<4>(&rotation_codebook, &rotation_indices)
        .map_err(|index| out_of_range(ROTATION_CODEBOOK, index))?;

    let records = (0..count)
        .map(|i| GaussianRecord {
            mean: [means[i * 3], means[i * 3 + 1], means[i * 3 + 2]],
            opacity: sigmoid(opacities[i]),
            covariance: compute_cov3d(exp3(scales[i]), rotations[i]),
            color: SplatColor::ShIndex(sh_indices[i]),
        })
        .collect();

    let set = GaussianSet::compressed(records, codebook);
    set.validate()?;
    Ok(set)
}

fn out_of_range(codebook: &str, index: u32) -> SplatError {
    SplatError::format(format!("index {} is past the end of '{}'", index, codebook))
}
