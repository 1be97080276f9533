//! Scene decoding: file bytes to a normalized [`GaussianSet`].
//!
//! Decoding never touches the GPU. [`decode_file_async`] runs the decode on a
//! worker thread and hands back a future, so a caller can stay responsive
//! while a large scene loads.

pub mod npy;
pub mod npz;
pub mod ply;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{SplatError, SplatResult};
use crate::gaussian::GaussianSet;

/// Supported scene containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneFormat {
    Ply,
    Npz,
}

impl SceneFormat {
    /// Pick the container from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> SplatResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ply") => Ok(Self::Ply),
            Some("npz") => Ok(Self::Npz),
            _ => Err(SplatError::format(format!(
                "unsupported scene file {:?}: expected .ply or .npz",
                path
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ply => "ply",
            Self::Npz => "npz",
        }
    }
}

pub fn decode(bytes: &[u8], format: SceneFormat) -> SplatResult<GaussianSet> {
    match format {
        SceneFormat::Ply => ply::decode(bytes),
        SceneFormat::Npz => npz::decode(bytes),
    }
}

pub fn decode_file(path: &Path) -> SplatResult<GaussianSet> {
    let format = SceneFormat::from_path(path)?;
    let start = std::time::Instant::now();
    let bytes = std::fs::read(path)?;
    let set = decode(&bytes, format)?;
    log::info!(
        "Decoded {} splats from {:?} ({}, {}) in {:.3}s",
        set.len(),
        path,
        format.name(),
        match &set.codebook {
            Some(book) => format!("{} SH clusters", book.len()),
            None => "uncompressed".to_string(),
        },
        start.elapsed().as_secs_f32()
    );
    Ok(set)
}

/// Pending background decode. Resolves once the worker thread finishes.
pub struct DecodeTask {
    receiver: oneshot::Receiver<SplatResult<GaussianSet>>,
}

impl Future for DecodeTask {
    type Output = SplatResult<GaussianSet>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(SplatError::format(
                "scene decode worker exited without a result",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Decode `path` on a worker thread.
pub fn decode_file_async(path: impl Into<PathBuf>) -> DecodeTask {
    let path = path.into();
    let (sender, receiver) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("scene-decode".into())
        .spawn(move || {
            sender.send(decode_file(&path)).ok();
        });
    if let Err(e) = spawned {
        // Dropping the sender resolves the task with an error instead.
        log::warn!("Could not spawn decode thread: {}", e);
    }
    DecodeTask { receiver }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SceneFormat::from_path(Path::new("a/b.PLY")).unwrap(), SceneFormat::Ply);
        assert_eq!(SceneFormat::from_path(Path::new("scene.npz")).unwrap(), SceneFormat::Npz);
        assert!(SceneFormat::from_path(Path::new("scene.splat")).is_err());
        assert!(SceneFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_async_decode_reports_missing_file() {
        let result = pollster::block_on(decode_file_async("/nonexistent/scene.ply"));
        assert!(matches!(result, Err(SplatError::Io(_))));
    }
}
