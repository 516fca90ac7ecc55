use nedf_importer::load;
use ndarray::s;
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/20180213122712_Patient01.nedf".to_string());

    // Load NEDF file
    let nedf = load(&path)?;

    // Print basic file information
    if let Some(name) = &nedf.basename {
        println!("Recording: {}", name);
    }
    println!("Sampling rate: {} Hz", nedf.header.sampling_rate);
    if let Some(date) = nedf.start_date_string() {
        println!("Started: {}", date);
    }
    println!("Accelerometer: {}", nedf.header.accelerometer_enabled);
    println!("Stimulation: {}", nedf.header.stimulation_enabled);

    // List first few electrodes
    println!("\nNumber of EEG channels: {}", nedf.header.num_channels);
    for (i, name) in nedf.header.electrodes.iter().enumerate().take(5) {
        println!("  {}: {}", i, name);
    }
    if nedf.header.electrodes.len() > 5 {
        println!("  ... and {} more", nedf.header.electrodes.len() - 5);
    }

    // Summarize decoded data
    let data = &nedf.data;
    println!("\nData summary:");
    println!("  Number of EEG samples: {}", nedf.num_samples());
    println!("  Duration: {:.3} seconds", nedf.duration());
    if let Some(truncation) = &data.truncation {
        println!("  Warning: {}", truncation);
    }
    for warning in &nedf.warnings {
        println!("  Warning: {}", warning);
    }

    let (rows, cols) = data.eeg.dim();
    if rows > 0 && cols > 0 {
        let channel_data = data.eeg.slice(s![.., 0]);
        let num_samples = std::cmp::min(5, rows);
        println!("  First channel data (first {} samples):", num_samples);
        for i in 0..num_samples {
            println!(
                "    {:.3} s: {} μV (marker {})",
                data.timestamps[i], channel_data[i], data.markers[i]
            );
        }
    }

    if let Some(acc) = &data.accelerometer {
        println!("  Accelerometer samples: {}", acc.nrows());
    }
    if let Some(stim) = &data.stimulation {
        println!("  Stimulation samples: {}", stim.nrows());
    }

    // Header metadata as JSON
    println!("\nHeader:\n{}", nedf.header.to_json_pretty()?);

    Ok(())
}
