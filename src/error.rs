//! Error types for scene decoding, device setup and GPU profiling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplatError {
    /// Malformed or unsupported scene, archive or viewpoint file.
    #[error("Format error: {0}")]
    Format(String),

    /// Adapter, device, feature or limit unavailable, or a device allocation failed.
    #[error("Device error: {0}")]
    Device(String),

    /// A timestamp readback has not resolved yet.
    #[error("Timing unavailable: {0}")]
    TimingUnavailable(String),

    /// A byte-layout descriptor is inconsistent, or a record did not fit it.
    #[error("Layout error: {0}")]
    Layout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SplatError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Whether this error only means "no data yet" and can be ignored for a frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimingUnavailable(_))
    }
}

impl From<zip::result::ZipError> for SplatError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Format(format!("archive: {}", err))
    }
}

impl From<serde_json::Error> for SplatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(format!("json: {}", err))
    }
}

pub type SplatResult<T> = Result<T, SplatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_format_errors() {
        let err: SplatError = serde_json::from_str::<Vec<f32>>("{").unwrap_err().into();
        assert!(matches!(err, SplatError::Format(_)));
    }

    #[test]
    fn test_only_timing_is_transient() {
        assert!(SplatError::TimingUnavailable("render".into()).is_transient());
        assert!(!SplatError::device("lost").is_transient());
    }
}
