//! Reader for NEDF EEG recordings.
//!
//! A NEDF file starts with an XML header (at most 10240 bytes) followed by a
//! big-endian payload that interleaves EEG, accelerometer, stimulation and
//! marker samples recorded at different rates. [`load`] returns the header
//! metadata together with the decoded signals as `ndarray` arrays.

pub mod cursor;
pub mod decoder;
mod error;
pub mod header;
mod reader;
pub mod scale;
pub mod types;

use std::path::Path;

// Re-export types
pub use error::{NedfError, ReadStage, Result, TruncatedStream};
pub use header::{parse_header, parse_markup, HeaderNode, HeaderTree, NedfHeader, NodeMap};
pub use reader::decode_bytes;
pub use types::*;

/// Loads a NEDF file and returns a struct representation
///
/// # Examples
///
/// ```no_run
/// use nedf_importer::load;
///
/// let result = load("path/to/your/file.nedf");
/// match result {
///     Ok(nedf) => println!("Sampling rate: {} Hz", nedf.header.sampling_rate),
///     Err(e) => println!("Error loading file: {}", e),
/// }
/// ```
pub fn load<P: AsRef<Path>>(file_path: P) -> Result<NedfFile> {
    reader::load_file(file_path, &ReaderOptions::default())
}

/// Loads a NEDF file with explicit [`ReaderOptions`]
///
/// # Examples
///
/// ```no_run
/// use nedf_importer::{load_with_options, ReaderOptions};
///
/// let options = ReaderOptions::new().strict(true);
/// let nedf = load_with_options("path/to/your/file.nedf", &options).unwrap();
/// assert!(nedf.is_complete());
/// ```
pub fn load_with_options<P: AsRef<Path>>(
    file_path: P,
    options: &ReaderOptions,
) -> Result<NedfFile> {
    reader::load_file(file_path, options)
}
