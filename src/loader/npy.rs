//! Minimal reader for NumPy `.npy` arrays (format versions 1-3).
//!
//! Only C-ordered, little-endian (or byte-sized) numeric arrays are accepted.

use crate::error::{SplatError, SplatResult};

const MAGIC: &[u8] = b"\x93NUMPY";

/// Element type of a `.npy` array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl DType {
    fn parse(descr: &str) -> SplatResult<Self> {
        let (order, kind) = descr.split_at(1.min(descr.len()));
        if !matches!(order, "<" | "|" | "=") {
            return Err(SplatError::format(format!("unsupported byte order in dtype '{}'", descr)));
        }
        Ok(match kind {
            "f2" => Self::F16,
            "f4" => Self::F32,
            "f8" => Self::F64,
            "i1" => Self::I8,
            "i2" => Self::I16,
            "i4" => Self::I32,
            "i8" => Self::I64,
            "u1" | "b1" => Self::U8,
            "u2" => Self::U16,
            "u4" => Self::U32,
            _ => return Err(SplatError::format(format!("unsupported dtype '{}'", descr))),
        })
    }

    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::F16 | Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }
}

/// A parsed array: shape, dtype and the raw little-endian element bytes.
#[derive(Clone, Debug)]
pub struct NpyArray {
    pub dtype: DType,
    pub shape: Vec<usize>,
    data: Vec<u8>,
}

impl NpyArray {
    pub fn parse(bytes: &[u8]) -> SplatResult<Self> {
        if bytes.len() < 10 || &bytes[..6] != MAGIC {
            return Err(SplatError::format("missing .npy magic"));
        }
        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(SplatError::format("truncated .npy header"));
                }
                (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
            }
            v => return Err(SplatError::format(format!("unsupported .npy version {}", v))),
        };
        let data_start = header_start + header_len;
        let header = bytes
            .get(header_start..data_start)
            .ok_or_else(|| SplatError::format("truncated .npy header"))?;
        let header = std::str::from_utf8(header)
            .map_err(|_| SplatError::format(".npy header is not text"))?;

        let descr = header_value(header, "descr")
            .ok_or_else(|| SplatError::format(".npy header lacks 'descr'"))?;
        let dtype = DType::parse(descr.trim_matches(|c| c == '\'' || c == '"'))?;

        if header_value(header, "fortran_order").map(str::trim) == Some("True") {
            return Err(SplatError::format("Fortran-ordered .npy arrays are not supported"));
        }

        let shape_text = header_value(header, "shape")
            .ok_or_else(|| SplatError::format(".npy header lacks 'shape'"))?;
        let shape = parse_shape(shape_text)?;

        let byte_len = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .and_then(|count| count.checked_mul(dtype.size()))
            .ok_or_else(|| SplatError::format(".npy shape overflows"))?;
        let data_end = data_start
            .checked_add(byte_len)
            .ok_or_else(|| SplatError::format(".npy shape overflows"))?;
        let data = bytes
            .get(data_start..data_end)
            .ok_or_else(|| {
                SplatError::format(format!(
                    ".npy payload holds {} bytes, shape {:?} needs {}",
                    bytes.len().saturating_sub(data_start),
                    shape,
                    byte_len
                ))
            })?
            .to_vec();

        Ok(Self { dtype, shape, data })
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every element to `f32`.
    pub fn to_f32(&self) -> Vec<f32> {
        let step = self.dtype.size();
        self.data
            .chunks_exact(step)
            .map(|b| match self.dtype {
                DType::F16 => half::f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32(),
                DType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                DType::F64 => f64::from_le_bytes(le8(b)) as f32,
                DType::I8 => b[0] as i8 as f32,
                DType::I16 => i16::from_le_bytes([b[0], b[1]]) as f32,
                DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
                DType::I64 => i64::from_le_bytes(le8(b)) as f32,
                DType::U8 => b[0] as f32,
                DType::U16 => u16::from_le_bytes([b[0], b[1]]) as f32,
                DType::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            })
            .collect()
    }

    /// Read every element as an index. Negative or non-integer values fail.
    pub fn to_indices(&self) -> SplatResult<Vec<u32>> {
        let step = self.dtype.size();
        self.data
            .chunks_exact(step)
            .map(|b| {
                let value: i64 = match self.dtype {
                    DType::I8 => b[0] as i8 as i64,
                    DType::I16 => i16::from_le_bytes([b[0], b[1]]) as i64,
                    DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
                    DType::I64 => i64::from_le_bytes(le8(b)),
                    DType::U8 => b[0] as i64,
                    DType::U16 => u16::from_le_bytes([b[0], b[1]]) as i64,
                    DType::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
                    other => {
                        return Err(SplatError::format(format!(
                            "index array has non-integer dtype {:?}",
                            other
                        )))
                    }
                };
                u32::try_from(value)
                    .map_err(|_| SplatError::format(format!("index {} out of range", value)))
            })
            .collect()
    }
}

fn le8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

/// Extract the raw text of `'key': value` from a Python dict literal.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let quoted = [format!("'{}'", key), format!("\"{}\"", key)];
    let start = quoted.iter().find_map(|k| header.find(k.as_str()).map(|i| i + k.len()))?;
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find(',').or_else(|| rest.find('}')).unwrap_or(rest.len())
    };
    Some(rest[..end].trim())
}

fn parse_shape(text: &str) -> SplatResult<Vec<usize>> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| SplatError::format(format!("malformed .npy shape '{}'", text)))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| SplatError::format(format!("malformed .npy dimension '{}'", s)))
        })
        .collect()
}

/// Encode a little-endian `.npy` (v1) file. Used by tests and fixtures.
pub fn encode(descr: &str, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_text = match dims.len() {
        1 => format!("({},)", dims[0]),
        _ => format!("({})", dims.join(", ")),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape_text
    );
    // Pad so the payload starts on a 64-byte boundary, newline-terminated.
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_f32_matrix() {
        let values = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes = encode("<f4", &[2, 3], bytemuck::cast_slice(&values));
        let arr = NpyArray::parse(&bytes).unwrap();
        assert_eq!(arr.dtype, DType::F32);
        assert_eq!(arr.shape, vec![2, 3]);
        assert_eq!(arr.to_f32(), values.to_vec());
    }

    #[test]
    fn test_parse_f16_vector() {
        let halves: Vec<u16> = [0.5f32, -2.0]
            .iter()
            .map(|v| half::f16::from_f32(*v).to_bits())
            .collect();
        let bytes = encode("<f2", &[2], bytemuck::cast_slice(&halves));
        let arr = NpyArray::parse(&bytes).unwrap();
        assert_eq!(arr.to_f32(), vec![0.5, -2.0]);
    }

    #[test]
    fn test_int16_indices() {
        let idx = [0i16, 7, 32000];
        let bytes = encode("<i2", &[3], bytemuck::cast_slice(&idx));
        let arr = NpyArray::parse(&bytes).unwrap();
        assert_eq!(arr.to_indices().unwrap(), vec![0, 7, 32000]);

        let neg = encode("<i2", &[1], bytemuck::cast_slice(&[-1i16]));
        assert!(NpyArray::parse(&neg).unwrap().to_indices().is_err());
    }

    #[test]
    fn test_rejects_big_endian_and_fortran() {
        let be = encode(">f4", &[1], &[0, 0, 0, 0]);
        assert!(NpyArray::parse(&be).is_err());

        let mut fortran = encode("<f4", &[1], &[0, 0, 0, 0]);
        let pos = fortran.windows(5).position(|w| w == b"False").unwrap();
        fortran[pos..pos + 5].copy_from_slice(b"True ");
        assert!(NpyArray::parse(&fortran).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = encode("<f4", &[4], &[0u8; 16]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(NpyArray::parse(&bytes), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_oversized_shape_is_format_error() {
        let bytes = encode("<f4", &[1 << 32, 1 << 32, 2], &[]);
        assert!(matches!(NpyArray::parse(&bytes), Err(SplatError::Format(_))));

        let bytes = encode("<f8", &[usize::MAX / 4], &[]);
        assert!(matches!(NpyArray::parse(&bytes), Err(SplatError::Format(_))));

        // Fits in usize, but not once added to the header length
        let bytes = encode("|u1", &[usize::MAX], &[]);
        assert!(matches!(NpyArray::parse(&bytes), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_header_alignment() {
        let bytes = encode("<u4", &[0], &[]);
        assert_eq!(bytes.len() % 64, 0);
        assert!(NpyArray::parse(&bytes).unwrap().is_empty());
    }
}
