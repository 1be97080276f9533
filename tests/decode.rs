//! Scene decoding from in-memory PLY files and NPZ archives.

use std::io::{Cursor, Write};

use splat_viewer::error::SplatError;
use splat_viewer::gaussian::SplatColor;
use splat_viewer::gpu::layout;
use splat_viewer::loader::{self, npy, npz, SceneFormat};

const EPS: f32 = 1e-5;

fn ply_bytes(records: &[[f32; 62]]) -> Vec<u8> {
    let mut bytes = format!(
        "ply\nformat binary_little_endian 1.0\nelement vertex {}\nend_header\n",
        records.len()
    )
    .into_bytes();
    for r in records {
        bytes.extend_from_slice(bytemuck::cast_slice(r));
    }
    bytes
}

fn ply_record(mean: [f32; 3], opacity: f32, log_scale: [f32; 3], rot: [f32; 4]) -> [f32; 62] {
    let mut r = [0.0f32; 62];
    r[0..3].copy_from_slice(&mean);
    r[54] = opacity;
    r[55..58].copy_from_slice(&log_scale);
    r[58..62].copy_from_slice(&rot);
    r
}

fn f32_npy(shape: &[usize], data: &[f32]) -> Vec<u8> {
    npy::encode("<f4", shape, bytemuck::cast_slice(data))
}

fn u32_npy(data: &[u32]) -> Vec<u8> {
    npy::encode("<u4", &[data.len()], bytemuck::cast_slice(data))
}

/// Two splats sharing one SH cluster, with two scale and rotation entries.
fn npz_arrays() -> Vec<(&'static str, Vec<u8>)> {
    let mut sh = vec![0.0f32; 48];
    sh[0..3].copy_from_slice(&[0.1, 0.2, 0.3]);
    vec![
        (npz::MEAN, f32_npy(&[2, 3], &[0.0, 0.0, 1.0, 1.0, 2.0, 3.0])),
        (npz::OPACITY, f32_npy(&[2], &[0.0, 10.0])),
        (npz::SH_INDICES, u32_npy(&[0, 0])),
        (npz::SH_CODEBOOK, f32_npy(&[1, 16, 3], &sh)),
        (npz::SCALE_INDICES, u32_npy(&[1, 0])),
        (npz::SCALE_CODEBOOK, f32_npy(&[2, 3], &[0.0, 0.0, 0.0, 1.0_f32.ln(), 2.0_f32.ln(), 0.0])),
        (npz::ROTATION_INDICES, u32_npy(&[0, 1])),
        (npz::ROTATION_CODEBOOK, f32_npy(&[2, 4], &[1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0])),
    ]
}

fn npz_bytes(arrays: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in arrays {
        writer.start_file(format!("{}.npy", name), options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn test_ply_records_normalized() {
    let bytes = ply_bytes(&[
        ply_record([1.0, 2.0, 3.0], 0.0, [0.0; 3], [1.0, 0.0, 0.0, 0.0]),
        ply_record([0.0, 0.0, 5.0], 2.0, [2.0_f32.ln(), 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]),
    ]);
    let set = loader::decode(&bytes, SceneFormat::Ply).unwrap();
    assert_eq!(set.len(), 2);
    assert!(!set.is_compressed());

    let first = &set.records[0];
    assert!((first.opacity - 0.5).abs() < EPS);
    for (a, b) in first.covariance.iter().zip([1.0, 0.0, 0.0, 1.0, 0.0, 1.0]) {
        assert!((a - b).abs() < EPS);
    }

    // Zero quaternion decodes as identity rotation
    let second = &set.records[1];
    assert!((second.covariance[0] - 4.0).abs() < 1e-4);
    assert!(second.covariance.iter().all(|c| c.is_finite()));
    assert!(matches!(second.color, SplatColor::Rgb(_)));
}

#[test]
fn test_ply_zero_vertices_packs() {
    let set = loader::decode(&ply_bytes(&[]), SceneFormat::Ply).unwrap();
    assert!(set.is_empty());

    let packed = layout::pack(&set).unwrap();
    assert_eq!(packed.count, 0);
    // One zeroed record so the buffer still binds
    assert_eq!(packed.raw.len(), layout::RAW_GAUSSIAN.stride as usize);
}

#[test]
fn test_npz_compressed_scene() {
    let set = loader::decode(&npz_bytes(&npz_arrays()), SceneFormat::Npz).unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.is_compressed());

    let codebook = set.codebook.as_ref().unwrap();
    assert_eq!(codebook.len(), 1);
    assert!((codebook.clusters[0][0][2] - 0.3).abs() < EPS);

    let a = &set.records[0];
    assert_eq!(a.mean, [0.0, 0.0, 1.0]);
    assert!((a.opacity - 0.5).abs() < EPS);
    assert_eq!(a.color, SplatColor::ShIndex(0));
    // Scale entry 1 is (1, 2, 1)
    assert!((a.covariance[0] - 1.0).abs() < 1e-4);
    assert!((a.covariance[3] - 4.0).abs() < 1e-4);

    // A negated quaternion gives the same covariance
    let b = &set.records[1];
    for (x, y) in b.covariance.iter().zip([1.0, 0.0, 0.0, 1.0, 0.0, 1.0]) {
        assert!((x - y).abs() < 1e-4);
    }

    let packed = layout::pack(&set).unwrap();
    assert!(packed.is_compressed());
    assert_eq!(packed.raw.len(), 2 * layout::COMPRESSED_GAUSSIAN.stride as usize);
}

#[test]
fn test_npz_missing_array_is_format_error() {
    let arrays: Vec<_> = npz_arrays().into_iter().filter(|(name, _)| *name != npz::OPACITY).collect();
    let result = loader::decode(&npz_bytes(&arrays), SceneFormat::Npz);
    match result {
        Err(SplatError::Format(msg)) => assert!(msg.contains(npz::OPACITY)),
        other => panic!("expected format error, got {:?}", other.map(|s| s.len())),
    }
}

#[test]
fn test_npz_index_out_of_range() {
    let mut arrays = npz_arrays();
    for (name, data) in arrays.iter_mut() {
        if *name == npz::SCALE_INDICES {
            *data = u32_npy(&[0, 9]);
        }
    }
    assert!(matches!(
        loader::decode(&npz_bytes(&arrays), SceneFormat::Npz),
        Err(SplatError::Format(_))
    ));
}

#[test]
fn test_not_an_archive() {
    assert!(matches!(
        loader::decode(b"definitely not a zip", SceneFormat::Npz),
        Err(SplatError::Format(_))
    ));
}

#[test]
fn test_decode_file_from_disk() {
    let dir = std::env::temp_dir().join("splat_viewer_decode_file");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("two.ply");
    std::fs::write(
        &path,
        ply_bytes(&[
            ply_record([0.0; 3], 0.0, [0.0; 3], [1.0, 0.0, 0.0, 0.0]),
            ply_record([1.0; 3], 0.0, [0.0; 3], [1.0, 0.0, 0.0, 0.0]),
        ]),
    )
    .unwrap();

    let set = pollster::block_on(loader::decode_file_async(&path)).unwrap();
    assert_eq!(set.len(), 2);
}
