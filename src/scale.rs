//! Conversion of raw ADC codes to physical units.

use ndarray::{Array1, Array2};

/// Full-scale reference of the EEG front end, in nanovolts.
const EEG_REFERENCE_NV: f64 = 2.4e9;
/// Programmable gain of the EEG front end.
const EEG_GAIN: f64 = 6.0;
/// Largest positive 24-bit ADC code.
const EEG_FULL_SCALE_CODE: f64 = 8_388_607.0;

/// Nominal spacing between EEG frames, in milliseconds.
pub const FRAME_PERIOD_MS: u64 = 2;

/// Converts a sign-extended 24-bit EEG code to nanovolts.
pub fn eeg_code_to_nanovolts(code: i32) -> f64 {
    f64::from(code) * EEG_REFERENCE_NV / EEG_GAIN / EEG_FULL_SCALE_CODE
}

/// Converts a sign-extended 24-bit EEG code to microvolts.
pub fn eeg_code_to_microvolts(code: i32) -> f64 {
    eeg_code_to_nanovolts(code) / 1000.0
}

/// Scales raw EEG codes (samples x channels) to microvolts.
pub fn scale_eeg_data(data_raw: &Array2<i32>) -> Array2<f32> {
    data_raw.mapv(|code| eeg_code_to_microvolts(code) as f32)
}

/// Builds the synthetic frame clock, in seconds.
///
/// Frame `i` sits at `2 * i` milliseconds regardless of the declared
/// sampling rate; the device does not store per-sample timestamps.
pub fn frame_timestamps(num_frames: usize) -> Array1<f64> {
    Array1::from_iter((0..num_frames as u64).map(|i| (i * FRAME_PERIOD_MS) as f64 / 1000.0))
}
