//! Byte layouts shared between host packing and the WGSL programs.
//!
//! Each GPU record type is described once by a [`RecordLayout`]. Packing goes
//! through [`RecordWriter`], which only writes named fields at their declared
//! offsets and formats, so the host side cannot drift from the shader structs
//! without a layout validation failure.

use crate::error::{SplatError, SplatResult};
use crate::gaussian::{GaussianSet, SplatColor};
use crate::maths::SH_COEFFS_PER_CHANNEL;

/// Scalar encoding of one field component. All encodings are little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldFormat {
    Float32,
    Float16,
    Uint32,
}

impl FieldFormat {
    pub const fn width(self) -> u32 {
        match self {
            Self::Float32 | Self::Uint32 => 4,
            Self::Float16 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: u32,
    pub format: FieldFormat,
    pub count: u32,
}

impl Field {
    pub const fn new(name: &'static str, offset: u32, format: FieldFormat, count: u32) -> Self {
        Self { name, offset, format, count }
    }

    pub const fn end(&self) -> u32 {
        self.offset + self.format.width() * self.count
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    pub name: &'static str,
    pub stride: u32,
    pub fields: &'static [Field],
}

// ============================================================================
// Layouts
// ============================================================================

/// Uncompressed splat, matches `RawGaussian` in `preprocess.wgsl`.
pub const RAW_GAUSSIAN: RecordLayout = RecordLayout {
    name: "RawGaussian",
    stride: 64,
    fields: &[
        Field::new("mean", 0, FieldFormat::Float32, 3),
        Field::new("color", 16, FieldFormat::Float32, 3),
        Field::new("opacity", 28, FieldFormat::Float32, 1),
        Field::new("covariance", 32, FieldFormat::Float32, 6),
    ],
};

/// Codebook-compressed splat, matches `CompressedGaussian` in
/// `preprocess_compressed.wgsl`. Mean and opacity share one 64-bit slot.
pub const COMPRESSED_GAUSSIAN: RecordLayout = RecordLayout {
    name: "CompressedGaussian",
    stride: 24,
    fields: &[
        Field::new("mean_opacity", 0, FieldFormat::Float16, 4),
        Field::new("sh_index", 8, FieldFormat::Uint32, 1),
        Field::new("covariance", 12, FieldFormat::Float16, 6),
    ],
};

/// Screen-space splat written by preprocessing and read by the draw.
pub const PROCESSED_GAUSSIAN: RecordLayout = RecordLayout {
    name: "ProcessedGaussian",
    stride: 24,
    fields: &[
        Field::new("position", 0, FieldFormat::Float32, 2),
        Field::new("conic_opacity", 8, FieldFormat::Uint32, 2),
        Field::new("color", 16, FieldFormat::Uint32, 1),
        Field::new("radius", 20, FieldFormat::Float32, 1),
    ],
};

/// One SH cluster: 16 RGB coefficients, each padded to a vec4.
pub const SH_CLUSTER: RecordLayout = RecordLayout {
    name: "ShCluster",
    stride: 256,
    fields: &[Field::new("coefficients", 0, FieldFormat::Float32, 64)],
};

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check fields lie inside the stride, are aligned to their component
    /// width and do not overlap, and that the stride is 4-byte aligned.
    pub fn validate(&self) -> SplatResult<()> {
        if self.stride == 0 || self.stride % 4 != 0 {
            return Err(layout_error(self, format!("stride {} is not a positive multiple of 4", self.stride)));
        }
        for (i, f) in self.fields.iter().enumerate() {
            if f.count == 0 {
                return Err(layout_error(self, format!("field '{}' has no components", f.name)));
            }
            if f.offset % f.format.width() != 0 {
                return Err(layout_error(self, format!("field '{}' at {} is misaligned", f.name, f.offset)));
            }
            if f.end() > self.stride {
                return Err(layout_error(
                    self,
                    format!("field '{}' ends at {} past stride {}", f.name, f.end(), self.stride),
                ));
            }
            for g in &self.fields[i + 1..] {
                if f.offset < g.end() && g.offset < f.end() {
                    return Err(layout_error(self, format!("fields '{}' and '{}' overlap", f.name, g.name)));
                }
                if f.name == g.name {
                    return Err(layout_error(self, format!("field '{}' declared twice", f.name)));
                }
            }
        }
        Ok(())
    }

    /// Bytes needed for `count` records. Never zero, so empty scenes still bind.
    pub fn buffer_size(&self, count: usize) -> u64 {
        self.stride as u64 * count.max(1) as u64
    }
}

fn layout_error(layout: &RecordLayout, msg: String) -> SplatError {
    SplatError::Layout(format!("{}: {}", layout.name, msg))
}

// ============================================================================
// Writer
// ============================================================================

/// Writes records into a byte buffer through a validated layout.
pub struct RecordWriter<'a> {
    layout: &'a RecordLayout,
    bytes: &'a mut [u8],
}

impl<'a> RecordWriter<'a> {
    pub fn new(layout: &'a RecordLayout, bytes: &'a mut [u8]) -> SplatResult<Self> {
        layout.validate()?;
        if bytes.len() % layout.stride as usize != 0 {
            return Err(layout_error(
                layout,
                format!("buffer of {} bytes is not a whole number of records", bytes.len()),
            ));
        }
        Ok(Self { layout, bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.layout.stride as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn slot(&mut self, record: usize, name: &str, format: FieldFormat, count: usize) -> SplatResult<&mut [u8]> {
        let layout = self.layout;
        let field = layout
            .field(name)
            .ok_or_else(|| layout_error(layout, format!("no field named '{}'", name)))?;
        if field.format != format || field.count as usize != count {
            return Err(layout_error(
                layout,
                format!(
                    "field '{}' is {}x{:?}, got {}x{:?}",
                    name, field.count, field.format, count, format
                ),
            ));
        }
        let start = record * layout.stride as usize + field.offset as usize;
        let end = record * layout.stride as usize + field.end() as usize;
        let len = self.bytes.len();
        self.bytes
            .get_mut(start..end)
            .ok_or_else(|| layout_error(layout, format!("record {} past end of {} bytes", record, len)))
    }

    pub fn put_f32(&mut self, record: usize, name: &str, values: &[f32]) -> SplatResult<()> {
        let slot = self.slot(record, name, FieldFormat::Float32, values.len())?;
        for (dst, v) in slot.chunks_exact_mut(4).zip(values) {
            dst.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    pub fn put_f16(&mut self, record: usize, name: &str, values: &[f32]) -> SplatResult<()> {
        let slot = self.slot(record, name, FieldFormat::Float16, values.len())?;
        for (dst, v) in slot.chunks_exact_mut(2).zip(values) {
            dst.copy_from_slice(&half::f16::from_f32(*v).to_bits().to_le_bytes());
        }
        Ok(())
    }

    pub fn put_u32(&mut self, record: usize, name: &str, values: &[u32]) -> SplatResult<()> {
        let slot = self.slot(record, name, FieldFormat::Uint32, values.len())?;
        for (dst, v) in slot.chunks_exact_mut(4).zip(values) {
            dst.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }
}

// ============================================================================
// Packing
// ============================================================================

/// Host-side bytes ready for upload.
#[derive(Debug)]
pub struct PackedScene {
    pub layout: &'static RecordLayout,
    pub count: usize,
    pub raw: Vec<u8>,
    /// Padded SH clusters, compressed scenes only.
    pub sh: Option<Vec<u8>>,
}

impl PackedScene {
    pub fn is_compressed(&self) -> bool {
        self.sh.is_some()
    }
}

/// Pack a decoded scene into device byte layouts.
pub fn pack(set: &GaussianSet) -> SplatResult<PackedScene> {
    set.validate()?;
    let count = set.len();

    match &set.codebook {
        None => {
            let mut raw = vec![0u8; RAW_GAUSSIAN.buffer_size(count) as usize];
            let mut w = RecordWriter::new(&RAW_GAUSSIAN, &mut raw)?;
            for (i, r) in set.records.iter().enumerate() {
                let SplatColor::Rgb(color) = r.color else {
                    return Err(SplatError::format(format!("splat {} has no direct color", i)));
                };
                w.put_f32(i, "mean", &r.mean)?;
                w.put_f32(i, "color", &color)?;
                w.put_f32(i, "opacity", &[r.opacity])?;
                w.put_f32(i, "covariance", &r.covariance)?;
            }
            Ok(PackedScene { layout: &RAW_GAUSSIAN, count, raw, sh: None })
        }
        Some(codebook) => {
            let mut raw = vec![0u8; COMPRESSED_GAUSSIAN.buffer_size(count) as usize];
            let mut w = RecordWriter::new(&COMPRESSED_GAUSSIAN, &mut raw)?;
            for (i, r) in set.records.iter().enumerate() {
                let SplatColor::ShIndex(index) = r.color else {
                    return Err(SplatError::format(format!("splat {} has no SH index", i)));
                };
                w.put_f16(i, "mean_opacity", &[r.mean[0], r.mean[1], r.mean[2], r.opacity])?;
                w.put_u32(i, "sh_index", &[index])?;
                w.put_f16(i, "covariance", &r.covariance)?;
            }

            let mut sh = vec![0u8; SH_CLUSTER.buffer_size(codebook.len()) as usize];
            let mut w = RecordWriter::new(&SH_CLUSTER, &mut sh)?;
            let mut padded = [0.0f32; SH_COEFFS_PER_CHANNEL * 4];
            for (i, cluster) in codebook.clusters.iter().enumerate() {
                for (coeff, rgb) in cluster.iter().enumerate() {
                    padded[coeff * 4..coeff * 4 + 3].copy_from_slice(rgb);
                }
                w.put_f32(i, "coefficients", &padded)?;
            }
            Ok(PackedScene { layout: &COMPRESSED_GAUSSIAN, count, raw, sh: Some(sh) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::{GaussianRecord, ShCodebook};

    fn f32_at(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn f16_at(bytes: &[u8], offset: usize) -> f32 {
        half::f16::from_bits(u16::from_le_bytes([bytes[offset], bytes[offset + 1]])).to_f32()
    }

    #[test]
    fn test_builtin_layouts_validate() {
        for layout in [RAW_GAUSSIAN, COMPRESSED_GAUSSIAN, PROCESSED_GAUSSIAN, SH_CLUSTER] {
            layout.validate().unwrap();
        }
    }

    #[test]
    fn test_overlap_and_overflow_rejected() {
        const OVERLAP: RecordLayout = RecordLayout {
            name: "Overlap",
            stride: 8,
            fields: &[
                Field::new("a", 0, FieldFormat::Float32, 2),
                Field::new("b", 4, FieldFormat::Uint32, 1),
            ],
        };
        assert!(matches!(OVERLAP.validate(), Err(SplatError::Layout(_))));

        const OVERFLOW: RecordLayout = RecordLayout {
            name: "Overflow",
            stride: 8,
            fields: &[Field::new("a", 4, FieldFormat::Float32, 2)],
        };
        assert!(OVERFLOW.validate().is_err());

        const MISALIGNED: RecordLayout = RecordLayout {
            name: "Misaligned",
            stride: 8,
            fields: &[Field::new("a", 2, FieldFormat::Float32, 1)],
        };
        assert!(MISALIGNED.validate().is_err());
    }

    #[test]
    fn test_writer_rejects_wrong_shape() {
        let mut bytes = vec![0u8; 64];
        let mut w = RecordWriter::new(&RAW_GAUSSIAN, &mut bytes).unwrap();
        assert!(w.put_f32(0, "mean", &[1.0, 2.0]).is_err());
        assert!(w.put_u32(0, "mean", &[1, 2, 3]).is_err());
        assert!(w.put_f32(0, "missing", &[1.0]).is_err());
        assert!(w.put_f32(1, "opacity", &[1.0]).is_err());
    }

    #[test]
    fn test_pack_uncompressed_offsets() {
        let set = GaussianSet::uncompressed(vec![GaussianRecord {
            mean: [1.0, 2.0, 3.0],
            opacity: 0.25,
            covariance: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            color: SplatColor::Rgb([0.1, 0.2, 0.3]),
        }]);
        let packed = pack(&set).unwrap();
        assert_eq!(packed.raw.len(), 64);
        assert!(packed.sh.is_none());
        assert_eq!(f32_at(&packed.raw, 8), 3.0);
        assert_eq!(f32_at(&packed.raw, 20), 0.2);
        assert_eq!(f32_at(&packed.raw, 28), 0.25);
        assert_eq!(f32_at(&packed.raw, 32 + 5 * 4), 6.0);
    }

    #[test]
    fn test_pack_compressed_halves_and_padding() {
        let flat: Vec<f32> = (0..96).map(|i| i as f32 * 0.5).collect();
        let codebook = ShCodebook::from_flat(&flat).unwrap();
        let set = GaussianSet::compressed(
            vec![GaussianRecord {
                mean: [0.5, -1.0, 2.0],
                opacity: 0.75,
                covariance: [1.0, 0.0, 0.0, 0.5, 0.0, 0.25],
                color: SplatColor::ShIndex(1),
            }],
            codebook,
        );
        let packed = pack(&set).unwrap();
        assert_eq!(packed.raw.len(), 24);
        assert_eq!(f16_at(&packed.raw, 2), -1.0);
        assert_eq!(f16_at(&packed.raw, 6), 0.75);
        assert_eq!(u32::from_le_bytes(packed.raw[8..12].try_into().unwrap()), 1);
        assert_eq!(f16_at(&packed.raw, 12 + 3 * 2), 0.5);

        let sh = packed.sh.unwrap();
        // One padding float per coefficient: 48 floats become 64.
        assert_eq!(sh.len(), 2 * 256);
        // Cluster 1, coefficient 1, green channel is flat[48 + 4].
        assert_eq!(f32_at(&sh, 256 + 16 + 4), 26.0);
        assert_eq!(f32_at(&sh, 256 + 16 + 12), 0.0);
    }

    #[test]
    fn test_empty_scene_keeps_one_record() {
        let packed = pack(&GaussianSet::default()).unwrap();
        assert_eq!(packed.count, 0);
        assert_eq!(packed.raw.len(), RAW_GAUSSIAN.stride as usize);
    }
}
