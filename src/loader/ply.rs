//! Binary little-endian PLY decoding.
//!
//! The ASCII header is scanned inside a bounded window. Vertex properties
//! declared in the header define the record stride; a header that declares
//! none is read with the fixed 62-float record of trained splat exports.

use std::collections::HashMap;

use crate::error::{SplatError, SplatResult};
use crate::gaussian::{GaussianRecord, GaussianSet, SplatColor};
use crate::maths::{compute_cov3d, exp3, sh_dc_to_color, sigmoid};

/// Bytes searched for the header terminator.
pub const HEADER_SCAN_WINDOW: usize = 2000;

/// Floats per vertex in the default export layout.
pub const DEFAULT_RECORD_FLOATS: usize = 62;

const END_HEADER: &str = "end_header";

/// Byte offsets of the fields we read, relative to the start of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Offsets {
    mean: usize,
    f_dc: usize,
    opacity: usize,
    scale: usize,
    rot: usize,
}

impl Offsets {
    const DEFAULT: Offsets = Offsets {
        mean: 0,
        f_dc: 6 * 4,
        opacity: 54 * 4,
        scale: 55 * 4,
        rot: 58 * 4,
    };
}

/// Parsed PLY header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlyHeader {
    pub vertex_count: usize,
    /// Byte offset of the first vertex record.
    pub payload_offset: usize,
    /// Bytes per vertex record.
    pub stride: usize,
    offsets: Offsets,
}

pub fn parse_header(bytes: &[u8]) -> SplatResult<PlyHeader> {
    let window = &bytes[..bytes.len().min(HEADER_SCAN_WINDOW)];
    // The binary payload may follow inside the window; only the prefix must be text.
    let text = String::from_utf8_lossy(window);

    let end = text
        .find(END_HEADER)
        .ok_or_else(|| SplatError::format("PLY header has no 'end_header' terminator"))?;
    let mut payload_offset = end + END_HEADER.len();
    if window.get(payload_offset) == Some(&b'\r') {
        payload_offset += 1;
    }
    if window.get(payload_offset) == Some(&b'\n') {
        payload_offset += 1;
    }

    let mut lines = text[..end].lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("ply") {
        return Err(SplatError::format("missing 'ply' magic"));
    }

    let mut vertex_count = None;
    let mut in_vertex = false;
    let mut stride = 0usize;
    let mut named: HashMap<&str, usize> = HashMap::new();

    for line in lines {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("format") => {
                if words.next() != Some("binary_little_endian") {
                    return Err(SplatError::format(format!("unsupported PLY format: '{}'", line)));
                }
            }
            Some("element") => {
                let name = words.next();
                if vertex_count.is_some() {
                    // Elements after the vertex block are never read.
                    in_vertex = false;
                    continue;
                }
                if name != Some("vertex") {
                    return Err(SplatError::format(format!(
                        "element '{}' precedes the vertex element",
                        name.unwrap_or("")
                    )));
                }
                let count = words
                    .next()
                    .and_then(|c| c.parse::<usize>().ok())
                    .ok_or_else(|| SplatError::format(format!("bad vertex count in '{}'", line)))?;
                vertex_count = Some(count);
                in_vertex = true;
            }
            Some("property") if in_vertex => {
                let ty = words.next().unwrap_or("");
                let name = words.next().unwrap_or("");
                if ty != "float" && ty != "float32" {
                    return Err(SplatError::format(format!(
                        "unsupported vertex property type '{}' for '{}'",
                        ty, name
                    )));
                }
                named.insert(name, stride);
                stride += 4;
            }
            _ => {}
        }
    }

    let vertex_count =
        vertex_count.ok_or_else(|| SplatError::format("PLY header has no 'element vertex' count"))?;

    let (stride, offsets) = if named.is_empty() {
        (DEFAULT_RECORD_FLOATS * 4, Offsets::DEFAULT)
    } else {
        (stride, resolve_offsets(&named)?)
    };

    Ok(PlyHeader {
        vertex_count,
        payload_offset,
        stride,
        offsets,
    })
}

/// Map required property names to offsets, checking each vector's components
/// are contiguous.
fn resolve_offsets(named: &HashMap<&str, usize>) -> SplatResult<Offsets> {
    let run = |names: &[&str]| -> SplatResult<usize> {
        let first = *named
            .get(names[0])
            .ok_or_else(|| SplatError::format(format!("missing vertex property '{}'", names[0])))?;
        for (i, name) in names.iter().enumerate().skip(1) {
            match named.get(name) {
                Some(&off) if off == first + i * 4 => {}
                Some(_) => {
                    return Err(SplatError::format(format!(
                        "vertex property '{}' is not contiguous with '{}'",
                        name, names[0]
                    )))
                }
                None => return Err(SplatError::format(format!("missing vertex property '{}'", name))),
            }
        }
        Ok(first)
    };

    Ok(Offsets {
        mean: run(&["x", "y", "z"])?,
        f_dc: run(&["f_dc_0", "f_dc_1", "f_dc_2"])?,
        opacity: run(&["opacity"])?,
        scale: run(&["scale_0", "scale_1", "scale_2"])?,
        rot: run(&["rot_0", "rot_1", "rot_2", "rot_3"])?,
    })
}

fn read_f32s<const N: usize>(record: &[u8], offset: usize) -> [f32; N] {
    let mut out = [0.0; N];
    for (i, v) in out.iter_mut().enumerate() {
        let at = offset + i * 4;
        *v = f32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]);
    }
    out
}

/// Decode a complete PLY file into an uncompressed record set.
pub fn decode(bytes: &[u8]) -> SplatResult<GaussianSet> {
    let header = parse_header(bytes)?;

    let payload_end = header
        .vertex_count
        .checked_mul(header.stride)
        .and_then(|len| header.payload_offset.checked_add(len))
        .ok_or_else(|| SplatError::format("PLY vertex count overflows"))?;
    let payload_len = payload_end - header.payload_offset;
    let payload = bytes
        .get(header.payload_offset..payload_end)
        .ok_or_else(|| {
            SplatError::format(format!(
                "PLY payload truncated: {} vertices of {} bytes need {} bytes, found {}",
                header.vertex_count,
                header.stride,
                payload_len,
                bytes.len().saturating_sub(header.payload_offset)
            ))
        })?;

    let o = header.offsets;
    let records = payload
        .chunks_exact(header.stride)
        .map(|record| {
            let dc = read_f32s::<3>(record, o.f_dc);
            let [opacity] = read_f32s::<1>(record, o.opacity);
            let scale = read_f32s::<3>(record, o.scale);
            let rot = read_f32s::<4>(record, o.rot);
            GaussianRecord {
                mean: read_f32s::<3>(record, o.mean),
                opacity: sigmoid(opacity),
                covariance: compute_cov3d(exp3(scale), rot),
                color: SplatColor::Rgb(sh_dc_to_color(dc)),
            }
        })
        .collect();

    Ok(GaussianSet::uncompressed(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_only(count: usize) -> Vec<u8> {
        format!(
            "ply\nformat binary_little_endian 1.0\nelement vertex {}\nend_header\n",
            count
        )
        .into_bytes()
    }

    fn default_record(opacity: f32, scale: [f32; 3], rot: [f32; 4]) -> Vec<u8> {
        let mut floats = [0.0f32; DEFAULT_RECORD_FLOATS];
        floats[0..3].copy_from_slice(&[1.0, 2.0, 3.0]);
        floats[6..9].copy_from_slice(&[0.0, 0.0, 0.0]);
        floats[54] = opacity;
        floats[55..58].copy_from_slice(&scale);
        floats[58..62].copy_from_slice(&rot);
        bytemuck::cast_slice(&floats).to_vec()
    }

    #[test]
    fn test_zero_vertex_header() {
        let set = decode(&header_only(0)).unwrap();
        assert!(set.is_empty());
        assert!(!set.is_compressed());
    }

    #[test]
    fn test_default_layout_record() {
        let mut bytes = header_only(1);
        bytes.extend(default_record(0.0, [0.0; 3], [1.0, 0.0, 0.0, 0.0]));
        let set = decode(&bytes).unwrap();
        let r = set.records[0];
        assert_eq!(r.mean, [1.0, 2.0, 3.0]);
        assert!((r.opacity - 0.5).abs() < 1e-6);
        for (a, b) in r.covariance.iter().zip([1.0, 0.0, 0.0, 1.0, 0.0, 1.0]) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(r.color, SplatColor::Rgb([0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_missing_vertex_count() {
        let bytes = b"ply\nformat binary_little_endian 1.0\nend_header\n";
        assert!(matches!(decode(bytes), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_missing_terminator() {
        let bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\n";
        assert!(matches!(decode(bytes), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_terminator_outside_scan_window() {
        let mut text = String::from("ply\nformat binary_little_endian 1.0\nelement vertex 0\n");
        while text.len() < HEADER_SCAN_WINDOW {
            text.push_str("comment padding padding padding\n");
        }
        text.push_str("end_header\n");
        assert!(decode(text.as_bytes()).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = header_only(2);
        bytes.extend(default_record(0.0, [0.0; 3], [1.0, 0.0, 0.0, 0.0]));
        assert!(matches!(decode(&bytes), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_vertex_count_overflow_is_format_error() {
        let names = [
            "x", "y", "z", "opacity", "f_dc_0", "f_dc_1", "f_dc_2", "scale_0", "scale_1",
            "scale_2", "rot_0", "rot_1", "rot_2", "rot_3", "pad_0", "pad_1",
        ];
        // Count times the 64-byte stride fits, header offset on top does not
        let mut text = format!(
            "ply\nformat binary_little_endian 1.0\nelement vertex {}\n",
            usize::MAX / 64
        );
        for n in names {
            text.push_str(&format!("property float {}\n", n));
        }
        text.push_str("end_header\n");
        assert!(matches!(decode(text.as_bytes()), Err(SplatError::Format(_))));

        let too_many = format!("ply\nformat binary_little_endian 1.0\nelement vertex {}\nend_header\n", usize::MAX);
        assert!(matches!(decode(too_many.as_bytes()), Err(SplatError::Format(_))));
    }

    #[test]
    fn test_declared_properties_define_stride() {
        let names = [
            "x", "y", "z", "opacity", "f_dc_0", "f_dc_1", "f_dc_2", "scale_0", "scale_1",
            "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        ];
        let mut text = String::from("ply\r\nformat binary_little_endian 1.0\r\nelement vertex 1\r\n");
        for n in names {
            text.push_str(&format!("property float {}\r\n", n));
        }
        text.push_str("end_header\r\n");
        let values: [f32; 14] = [
            4.0, 5.0, 6.0, 2.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0,
        ];
        let mut bytes = text.into_bytes();
        bytes.extend_from_slice(bytemuck::cast_slice(&values));

        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.stride, 14 * 4);

        let r = decode(&bytes).unwrap().records[0];
        assert_eq!(r.mean, [4.0, 5.0, 6.0]);
        assert!((r.opacity - sigmoid(2.0)).abs() < 1e-6);
        // Unnormalized identity quaternion still yields unit covariance.
        assert!((r.covariance[0] - 1.0).abs() < 1e-6);
        match r.color {
            SplatColor::Rgb(c) => assert!(c[0] > 0.5 && c[2] < 0.5),
            other => panic!("unexpected color {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_float_property() {
        let bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 0\nproperty uchar red\nend_header\n";
        assert!(decode(bytes).is_err());
    }

    #[test]
    fn test_rejects_ascii_format() {
        let bytes = b"ply\nformat ascii 1.0\nelement vertex 0\nend_header\n";
        assert!(decode(bytes).is_err());
    }
}
