use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::decoder::{
    decode_stream, FrameLayout, RawStreams, ACCELEROMETER_AXES, STIMULATION_PER_FRAME,
};
use crate::error::{NedfError, Result};
use crate::header::{parse_header, NedfHeader, HEADER_LEN};
use crate::scale::{frame_timestamps, scale_eeg_data};
use crate::types::*;

const NEDF_EXTENSION: &str = "nedf";

/// Loads a NEDF file and returns a strongly-typed struct representation.
///
/// The whole file is read into memory and the handle closed before any
/// decoding starts.
///
/// # Arguments
///
/// * `file_path` - Path to the NEDF file, with or without the `.nedf` extension
/// * `options` - Lookup and decoding options
///
/// # Returns
///
/// A `Result` containing either the loaded `NedfFile` or an error. A payload
/// shorter than the header declares is returned as a partial recording with
/// `data.truncation` set, unless `options.strict` is on.
pub fn load_file<P: AsRef<Path>>(file_path: P, options: &ReaderOptions) -> Result<NedfFile> {
    let tic = Instant::now();

    let path = resolve_path(file_path.as_ref(), options)?;
    info!(path = %path.display(), "File found");

    let bytes = read_all_bytes(&path)?;
    let mut nedf = decode_bytes(&bytes, options)?;
    nedf.basename = Some(basename(&path));
    nedf.path = Some(path);

    info!(
        "Done! Elapsed time: {:.1} seconds",
        tic.elapsed().as_secs_f64()
    );

    Ok(nedf)
}

/// Decodes a complete NEDF image already held in memory.
///
/// `bytes` must start at the beginning of the file: the header occupies the
/// first 10240 bytes (or the whole buffer if it is shorter) and the payload
/// follows.
pub fn decode_bytes(bytes: &[u8], options: &ReaderOptions) -> Result<NedfFile> {
    let header_end = bytes.len().min(HEADER_LEN);
    let header = parse_header(&bytes[..header_end])?;
    print_header_summary(&header);

    let mut warnings = Vec::new();
    if let Some(mismatch) = header.channel_count_mismatch() {
        warn!(%mismatch, "Using the declared channel count");
        warnings.push(mismatch);
    }

    let payload = &bytes[header_end..];
    let layout = FrameLayout::from(&header);
    let raw = decode_stream(payload, &layout, options.progress_step);

    if let Some(truncation) = &raw.truncation {
        if options.strict {
            return Err(NedfError::TruncatedStream(truncation.clone()));
        }
    } else {
        check_end_of_payload(payload.len(), raw.bytes_consumed, &mut warnings);
    }

    let data = process_data(&header, raw);

    Ok(NedfFile {
        header,
        data,
        path: None,
        basename: None,
        warnings,
    })
}

/// Finds the file to read, trying the `.nedf` extension when allowed.
fn resolve_path(path: &Path, options: &ReaderOptions) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let has_extension = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(NEDF_EXTENSION));
    if options.append_extension && !has_extension {
        let mut with_extension = path.as_os_str().to_owned();
        with_extension.push(".");
        with_extension.push(NEDF_EXTENSION);
        let candidate = PathBuf::from(with_extension);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(NedfError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// Reads the whole file and releases the handle.
fn read_all_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            NedfError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            NedfError::Io(e)
        }
    })?;
    let mut bytes = Vec::with_capacity(file.metadata().map(|m| m.len() as usize).unwrap_or(0));
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// File name without directory or `.nedf` extension.
fn basename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".nedf") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

// Helper function to log the decoded header
fn print_header_summary(header: &NedfHeader) {
    info!(
        root = %header.tree.root,
        channels = header.num_channels,
        sampling_rate = header.sampling_rate,
        samples = header.total_samples,
        accelerometer = header.accelerometer_enabled,
        stimulation = header.stimulation_enabled,
        "Header information has been correctly retrieved"
    );
    match header.start_date_string() {
        Some(date) => info!("Recording started {}", date),
        None => warn!(
            start_unix_ms = header.start_unix_ms,
            "Recording start time is out of range"
        ),
    }
    if let Some(seconds) = header.stimulation_duration_s {
        info!("Stimulation protocol lasts {} seconds", seconds);
    } else {
        info!(
            "Recording lasts {} seconds",
            header.recording_duration_s
        );
    }
}

/// Records unread bytes after the last frame of a complete decode.
fn check_end_of_payload(payload_len: usize, consumed: usize, warnings: &mut Vec<NedfWarning>) {
    let count = payload_len - consumed;
    if count != 0 {
        let warning = NedfWarning::TrailingBytes { count };
        warn!(%warning, "Payload is longer than the header declares");
        warnings.push(warning);
    }
}

// Helper function to assemble the decoded streams into arrays
fn process_data(header: &NedfHeader, raw: RawStreams) -> NedfData {
    let frames = raw.frames;
    let channels = header.num_channels;

    let eeg_raw = Array2::from_shape_fn((frames, channels), |(i, c)| raw.eeg[i * channels + c]);
    let eeg = scale_eeg_data(&eeg_raw);

    let accelerometer = header.accelerometer_enabled.then(|| {
        Array2::from_shape_fn((raw.accelerometer.len(), ACCELEROMETER_AXES), |(i, axis)| {
            raw.accelerometer[i][axis]
        })
    });

    // Stimulation codes are already in μA
    let stimulation = header.stimulation_enabled.then(|| {
        Array2::from_shape_fn((frames * STIMULATION_PER_FRAME, channels), |(i, c)| {
            raw.stimulation[i * channels + c]
        })
    });

    NedfData {
        eeg,
        accelerometer,
        stimulation,
        markers: Array1::from(raw.markers),
        timestamps: frame_timestamps(frames),
        truncation: raw.truncation,
    }
}
