//! Error types for NEDF file operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stage of the per-frame read sequence.
///
/// Frames are laid out as: accelerometer (every 5th frame), EEG,
/// stimulation (two vectors), marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ReadStage {
    Accelerometer,
    Eeg,
    Stimulation,
    Marker,
}

impl fmt::Display for ReadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerometer => write!(f, "accelerometer"),
            Self::Eeg => write!(f, "EEG"),
            Self::Stimulation => write!(f, "stimulation"),
            Self::Marker => write!(f, "marker"),
        }
    }
}

/// Details of a payload that ended before the header's declared sample count.
///
/// Attached to a partially decoded recording, or returned as
/// [`NedfError::TruncatedStream`] when strict decoding is requested.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TruncatedStream {
    /// Index of the frame whose reads could not complete.
    pub frame: usize,
    /// Number of frames fully decoded (equal to `frame`).
    pub frames_decoded: usize,
    /// Read stage that ran out of bytes.
    pub stage: ReadStage,
    /// Channel being read when the buffer ran out, for per-channel stages.
    pub channel: Option<usize>,
    /// Payload offset at which the failing read started.
    pub offset: usize,
}

impl TruncatedStream {
    /// Index of the last fully decoded frame, if any.
    pub fn last_complete_frame(&self) -> Option<usize> {
        self.frames_decoded.checked_sub(1)
    }
}

impl fmt::Display for TruncatedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "payload truncated at frame {} while reading {}",
            self.frame, self.stage
        )?;
        if let Some(channel) = self.channel {
            write!(f, " (channel {})", channel)?;
        }
        write!(
            f,
            " at offset {}; {} complete frames decoded",
            self.offset, self.frames_decoded
        )
    }
}

/// Errors that can occur when reading NEDF files.
#[derive(Debug, Error)]
pub enum NedfError {
    /// Input path does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Header markup is malformed or unterminated.
    #[error("invalid NEDF header: {message}")]
    HeaderParse { message: String },

    /// Required header field is absent.
    #[error("missing header field: {field}")]
    HeaderFieldMissing { field: String },

    /// Required header field is present but not coercible to its type.
    #[error("invalid value for header field {field}: {value:?}")]
    HeaderFieldInvalid { field: String, value: String },

    /// Payload ended early and strict decoding was requested.
    #[error("{0}")]
    TruncatedStream(TruncatedStream),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for NEDF operations.
pub type Result<T> = std::result::Result<T, NedfError>;

impl NedfError {
    /// Create a HeaderParse error.
    pub fn header_parse(message: impl Into<String>) -> Self {
        Self::HeaderParse {
            message: message.into(),
        }
    }

    /// Create a HeaderFieldMissing error.
    pub fn field_missing(field: impl Into<String>) -> Self {
        Self::HeaderFieldMissing {
            field: field.into(),
        }
    }

    /// Create a HeaderFieldInvalid error.
    pub fn field_invalid(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::HeaderFieldInvalid {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NedfError::header_parse("unterminated root element");
        assert_eq!(
            format!("{err}"),
            "invalid NEDF header: unterminated root element"
        );

        let err = NedfError::field_missing("EEGSettings/EEGSamplingRate");
        assert_eq!(
            format!("{err}"),
            "missing header field: EEGSettings/EEGSamplingRate"
        );
    }

    #[test]
    fn test_truncation_display() {
        let truncation = TruncatedStream {
            frame: 4,
            frames_decoded: 4,
            stage: ReadStage::Eeg,
            channel: Some(2),
            offset: 120,
        };
        let text = truncation.to_string();
        assert!(text.contains("frame 4"));
        assert!(text.contains("EEG"));
        assert!(text.contains("channel 2"));
        assert_eq!(truncation.last_complete_frame(), Some(3));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: NedfError = io_err.into();
        assert!(matches!(err, NedfError::Io(_)));
    }
}
