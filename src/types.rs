use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::error::TruncatedStream;
use crate::header::NedfHeader;

/// Options controlling how a NEDF file is located and decoded.
///
/// # Examples
///
/// ```
/// use nedf_importer::ReaderOptions;
///
/// let options = ReaderOptions::new().strict(true).progress_step(25);
/// assert!(options.strict);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Retry with `.nedf` appended when the given path does not exist
    pub append_extension: bool,
    /// Fail with [`NedfError::TruncatedStream`](crate::NedfError::TruncatedStream)
    /// instead of returning the decoded prefix of a short payload
    pub strict: bool,
    /// Percentage step between decode progress log lines (0 disables them)
    pub progress_step: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            append_extension: true,
            strict: false,
            progress_step: 10,
        }
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn append_extension(mut self, enabled: bool) -> Self {
        self.append_extension = enabled;
        self
    }

    #[must_use]
    pub fn strict(mut self, enabled: bool) -> Self {
        self.strict = enabled;
        self
    }

    #[must_use]
    pub fn progress_step(mut self, percent: usize) -> Self {
        self.progress_step = percent;
        self
    }
}

/// Non-fatal conditions found while reading a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NedfWarning {
    /// The electrode montage lists a different number of channels than
    /// `TotalNumberOfChannels`; the declared count is used.
    ChannelCountMismatch { declared: usize, montage: usize },
    /// Bytes left in the payload after the last declared frame.
    TrailingBytes { count: usize },
}

impl fmt::Display for NedfWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NedfWarning::ChannelCountMismatch { declared, montage } => write!(
                f,
                "header declares {} channels but the montage lists {}",
                declared, montage
            ),
            NedfWarning::TrailingBytes { count } => {
                write!(f, "{} unread bytes after the last frame", count)
            }
        }
    }
}

/// Signals decoded from the payload of a NEDF file.
///
/// Rows are samples, columns are channels. All arrays cover the same
/// leading frames: `eeg`, `markers` and `timestamps` have one row per frame,
/// `accelerometer` one row per 5 frames and `stimulation` two rows per frame.
#[derive(Debug, Clone, Serialize)]
pub struct NedfData {
    /// EEG (μV)
    /// - Shape: [num_samples, num_channels]
    pub eeg: Array2<f32>,
    /// Accelerometer counts, when enabled
    /// - Shape: [num_samples / 5, 3]
    pub accelerometer: Option<Array2<i32>>,
    /// Stimulation current (μA), when enabled
    /// - Shape: [2 * num_samples, num_channels]
    pub stimulation: Option<Array2<i32>>,
    /// Marker value for each EEG sample
    pub markers: Array1<i32>,
    /// Time of each EEG sample from the start of the recording (s)
    pub timestamps: Array1<f64>,
    /// Set when the payload ended before the declared sample count
    pub truncation: Option<TruncatedStream>,
}

impl NedfData {
    /// Number of EEG samples decoded.
    pub fn num_samples(&self) -> usize {
        self.eeg.nrows()
    }
}

/// Complete representation of a NEDF file, including header and data.
///
/// # Examples
///
/// ```no_run
/// use nedf_importer::load;
///
/// let nedf = load("path/to/recording.nedf").unwrap();
/// println!("{} channels at {} Hz", nedf.header.num_channels, nedf.header.sampling_rate);
/// if let Some(truncation) = &nedf.data.truncation {
///     println!("Partial recording: {}", truncation);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct NedfFile {
    /// Parsed header metadata
    pub header: NedfHeader,
    /// Decoded signals
    pub data: NedfData,
    /// Path the file was read from, when loaded from disk
    pub path: Option<PathBuf>,
    /// File name without directory or `.nedf` extension, when loaded from disk
    pub basename: Option<String>,
    /// Advisories raised while reading
    pub warnings: Vec<NedfWarning>,
}

impl NedfFile {
    /// Returns the decoded duration of the recording in seconds.
    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / f64::from(self.header.sampling_rate)
    }

    /// Returns the number of EEG samples decoded.
    pub fn num_samples(&self) -> usize {
        self.data.num_samples()
    }

    /// Whether every frame declared by the header was decoded.
    pub fn is_complete(&self) -> bool {
        self.data.truncation.is_none()
    }

    /// Column of the named electrode in the EEG and stimulation arrays.
    pub fn channel_index(&self, electrode: &str) -> Option<usize> {
        self.header.electrodes.iter().position(|name| name == electrode)
    }

    /// Start of the recording as `YYYY-MM-DD HH:MM:SS` in local time.
    pub fn start_date_string(&self) -> Option<String> {
        self.header.start_date_string()
    }
}
