//! Multi-rate payload decoder.
//!
//! The payload is a sequence of frames, one per EEG sample. Each frame holds,
//! in order:
//!
//! | Field | Present | Encoding |
//! |---|---|---|
//! | accelerometer (x, y, z) | accelerometer on, frame index divisible by 5 | 3 x 16-bit BE signed |
//! | EEG | always | `num_channels` x 24-bit BE signed |
//! | stimulation | stimulation on | 2 x `num_channels` x 24-bit BE signed |
//! | marker | always | 32-bit BE |

use tracing::{debug, warn};

use crate::cursor::{ByteCursor, Exhausted};
use crate::error::{ReadStage, TruncatedStream};
use crate::header::NedfHeader;

/// EEG frames per accelerometer sample.
pub const ACCELEROMETER_DECIMATION: usize = 5;
/// Stimulation samples per EEG frame.
pub const STIMULATION_PER_FRAME: usize = 2;
/// Accelerometer axes per sample.
pub const ACCELEROMETER_AXES: usize = 3;

const EEG_CODE_LEN: usize = 3;
const MARKER_LEN: usize = 4;

/// Shape of the frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub num_channels: usize,
    pub accelerometer: bool,
    pub stimulation: bool,
    pub total_frames: usize,
}

impl FrameLayout {
    /// Bytes in a frame that carries no accelerometer sample.
    pub fn min_frame_len(&self) -> usize {
        let vectors = if self.stimulation {
            1 + STIMULATION_PER_FRAME
        } else {
            1
        };
        self.num_channels
            .saturating_mul(vectors)
            .saturating_mul(EEG_CODE_LEN)
            .saturating_add(MARKER_LEN)
    }

    /// Frames a payload of `payload_len` bytes can hold at most, capped at
    /// the declared frame count.
    pub fn frames_within(&self, payload_len: usize) -> usize {
        self.total_frames.min(payload_len / self.min_frame_len())
    }
}

impl From<&NedfHeader> for FrameLayout {
    fn from(header: &NedfHeader) -> Self {
        Self {
            num_channels: header.num_channels,
            accelerometer: header.accelerometer_enabled,
            stimulation: header.stimulation_enabled,
            total_frames: header.total_samples,
        }
    }
}

/// Raw integer codes decoded from the payload.
///
/// Per-channel data is stored frame-major: sample `i`, channel `c` lives at
/// `i * num_channels + c`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawStreams {
    pub eeg: Vec<i32>,
    pub accelerometer: Vec<[i32; ACCELEROMETER_AXES]>,
    pub stimulation: Vec<i32>,
    pub markers: Vec<i32>,
    /// Frames fully decoded
    pub frames: usize,
    /// Payload bytes consumed by the decoded frames
    pub bytes_consumed: usize,
    pub truncation: Option<TruncatedStream>,
}

impl RawStreams {
    /// Sized for the frames `payload_len` bytes can hold, never for more
    /// than the payload could deliver.
    fn with_capacity(layout: &FrameLayout, payload_len: usize) -> Self {
        let frames = layout.frames_within(payload_len);
        Self {
            eeg: Vec::with_capacity(frames * layout.num_channels),
            accelerometer: if layout.accelerometer {
                Vec::with_capacity(frames.div_ceil(ACCELEROMETER_DECIMATION))
            } else {
                Vec::new()
            },
            stimulation: if layout.stimulation {
                Vec::with_capacity(frames * STIMULATION_PER_FRAME * layout.num_channels)
            } else {
                Vec::new()
            },
            markers: Vec::with_capacity(frames),
            ..Self::default()
        }
    }

    /// Drops everything past the first `frames` complete frames.
    fn truncate_to(&mut self, layout: &FrameLayout, frames: usize) {
        self.eeg.truncate(frames * layout.num_channels);
        self.stimulation
            .truncate(frames * STIMULATION_PER_FRAME * layout.num_channels);
        self.markers.truncate(frames);
        // An accelerometer sample spans five frames and is kept once all five are decoded
        self.accelerometer
            .truncate(frames / ACCELEROMETER_DECIMATION);
        self.frames = frames;
    }
}

/// Position within a frame, used to describe where the payload ran out.
struct ReadSite {
    frame: usize,
    stage: ReadStage,
    channel: Option<usize>,
}

impl ReadSite {
    fn truncated(self, exhausted: Exhausted) -> TruncatedStream {
        TruncatedStream {
            frame: self.frame,
            frames_decoded: self.frame,
            stage: self.stage,
            channel: self.channel,
            offset: exhausted.offset,
        }
    }
}

fn read_channel_vector(
    cursor: &mut ByteCursor<'_>,
    out: &mut Vec<i32>,
    num_channels: usize,
    frame: usize,
    stage: ReadStage,
) -> Result<(), TruncatedStream> {
    for channel in 0..num_channels {
        let code = cursor.read_i24().map_err(|e| {
            ReadSite {
                frame,
                stage,
                channel: Some(channel),
            }
            .truncated(e)
        })?;
        out.push(code);
    }
    Ok(())
}

/// Reads one frame, appending its values to `streams`.
///
/// On error the streams may hold a partial frame; the caller trims them.
fn read_frame(
    cursor: &mut ByteCursor<'_>,
    layout: &FrameLayout,
    frame: usize,
    streams: &mut RawStreams,
) -> Result<(), TruncatedStream> {
    if layout.accelerometer && frame % ACCELEROMETER_DECIMATION == 0 {
        let mut sample = [0i32; ACCELEROMETER_AXES];
        for (axis, value) in sample.iter_mut().enumerate() {
            *value = cursor.read_i16().map(i32::from).map_err(|e| {
                ReadSite {
                    frame,
                    stage: ReadStage::Accelerometer,
                    channel: Some(axis),
                }
                .truncated(e)
            })?;
        }
        streams.accelerometer.push(sample);
    }

    read_channel_vector(
        cursor,
        &mut streams.eeg,
        layout.num_channels,
        frame,
        ReadStage::Eeg,
    )?;

    if layout.stimulation {
        for _ in 0..STIMULATION_PER_FRAME {
            read_channel_vector(
                cursor,
                &mut streams.stimulation,
                layout.num_channels,
                frame,
                ReadStage::Stimulation,
            )?;
        }
    }

    // Markers are unsigned on the wire; values above i32::MAX wrap
    let marker = cursor.read_u32().map_err(|e| {
        ReadSite {
            frame,
            stage: ReadStage::Marker,
            channel: None,
        }
        .truncated(e)
    })?;
    streams.markers.push(marker as i32);

    Ok(())
}

/// Decodes up to `layout.total_frames` frames from `payload`.
///
/// A short payload is not an error: decoding stops at the first read that
/// cannot complete, the streams are trimmed to the frames decoded before it,
/// and the failing read is recorded in [`RawStreams::truncation`].
pub fn decode_stream(payload: &[u8], layout: &FrameLayout, progress_step: usize) -> RawStreams {
    let mut cursor = ByteCursor::new(payload);
    let mut streams = RawStreams::with_capacity(layout, payload.len());
    let total = layout.total_frames;

    debug!(
        frames = total,
        channels = layout.num_channels,
        accelerometer = layout.accelerometer,
        stimulation = layout.stimulation,
        "Decoding payload"
    );

    let mut percent_done = progress_step;
    for frame in 0..total {
        if let Err(truncation) = read_frame(&mut cursor, layout, frame, &mut streams) {
            warn!(%truncation, "NEDF payload is shorter than declared");
            streams.truncate_to(layout, frame);
            streams.truncation = Some(truncation);
            return streams;
        }
        streams.bytes_consumed = cursor.offset();

        if progress_step > 0 {
            let progress = ((frame + 1) as f64 / total as f64) * 100.0;
            while percent_done <= 100 && progress >= percent_done as f64 {
                debug!("{}% done...", percent_done);
                percent_done += progress_step;
            }
        }
    }

    streams.truncate_to(layout, total);
    streams
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout(
        num_channels: usize,
        accelerometer: bool,
        stimulation: bool,
        total_frames: usize,
    ) -> FrameLayout {
        FrameLayout {
            num_channels,
            accelerometer,
            stimulation,
            total_frames,
        }
    }

    fn frame_len(layout: &FrameLayout, frame: usize) -> usize {
        let mut len = layout.num_channels * 3 + 4;
        if layout.accelerometer && frame % ACCELEROMETER_DECIMATION == 0 {
            len += 6;
        }
        if layout.stimulation {
            len += STIMULATION_PER_FRAME * layout.num_channels * 3;
        }
        len
    }

    /// Payload whose bytes count up from 0, wrapping at 256.
    fn counting_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    fn payload_len(layout: &FrameLayout) -> usize {
        (0..layout.total_frames).map(|f| frame_len(layout, f)).sum()
    }

    #[test]
    fn test_eeg_and_markers_only() {
        let layout = layout(2, false, false, 3);
        let mut payload = Vec::new();
        for frame in 0..3u32 {
            payload.extend_from_slice(&[0x00, 0x00, 0x01]); // +1
            payload.extend_from_slice(&[0xFF, 0xFF, 0xFE]); // -2
            payload.extend_from_slice(&(frame + 100).to_be_bytes());
        }
        assert_eq!(payload.len(), 30);

        let streams = decode_stream(&payload, &layout, 10);
        assert_eq!(streams.eeg, vec![1, -2, 1, -2, 1, -2]);
        assert_eq!(streams.markers, vec![100, 101, 102]);
        assert_eq!(streams.frames, 3);
        assert_eq!(streams.bytes_consumed, 30);
        assert!(streams.truncation.is_none());
        assert!(streams.accelerometer.is_empty());
        assert!(streams.stimulation.is_empty());
    }

    #[test]
    fn test_interleaving_order() {
        // One channel, accelerometer and stimulation on, 5 frames
        let layout = layout(1, true, true, 5);
        let mut payload = Vec::new();
        for frame in 0..5i32 {
            if frame == 0 {
                payload.extend_from_slice(&[0x00, 0x0A, 0xFF, 0xF6, 0x80, 0x00]);
            }
            payload.extend_from_slice(&(frame * 10).to_be_bytes()[1..]);
            payload.extend_from_slice(&(-frame).to_be_bytes()[1..]);
            payload.extend_from_slice(&(frame + 1000).to_be_bytes()[1..]);
            payload.extend_from_slice(&(frame as u32).to_be_bytes());
        }
        assert_eq!(payload.len(), payload_len(&layout));

        let streams = decode_stream(&payload, &layout, 0);
        assert_eq!(streams.accelerometer, vec![[10, -10, -32768]]);
        assert_eq!(streams.eeg, vec![0, 10, 20, 30, 40]);
        assert_eq!(
            streams.stimulation,
            vec![0, 1000, -1, 1001, -2, 1002, -3, 1003, -4, 1004]
        );
        assert_eq!(streams.markers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_marker_high_bit_wraps() {
        let layout = layout(1, false, false, 1);
        let payload = [0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF];
        let streams = decode_stream(&payload, &layout, 10);
        assert_eq!(streams.markers, vec![-1]);
    }

    #[test]
    fn test_truncated_mid_channel() {
        let layout = layout(4, false, false, 10);
        let full = counting_payload(payload_len(&layout));
        let k = 6;
        // cut inside channel 3 (index 2) of frame k
        let cut = k * frame_len(&layout, 0) + 2 * 3 + 1;
        let streams = decode_stream(&full[..cut], &layout, 10);

        assert_eq!(streams.frames, k);
        assert_eq!(streams.eeg.len(), k * 4);
        assert_eq!(streams.markers.len(), k);
        assert_eq!(streams.bytes_consumed, k * frame_len(&layout, 0));
        let truncation = streams.truncation.unwrap();
        assert_eq!(truncation.frame, k);
        assert_eq!(truncation.frames_decoded, k);
        assert_eq!(truncation.stage, ReadStage::Eeg);
        assert_eq!(truncation.channel, Some(2));
        assert_eq!(truncation.offset, cut - 1);
    }

    #[test]
    fn test_truncated_in_stimulation_drops_frame() {
        let layout = layout(2, true, true, 10);
        let full = counting_payload(payload_len(&layout));
        // frame 7 is complete up to its second stimulation vector
        let start: usize = (0..7).map(|f| frame_len(&layout, f)).sum();
        let cut = start + 2 * 3 + 2 * 3 + 3;
        let streams = decode_stream(&full[..cut], &layout, 10);

        assert_eq!(streams.frames, 7);
        assert_eq!(streams.eeg.len(), 14);
        assert_eq!(streams.stimulation.len(), 7 * 2 * 2);
        assert_eq!(streams.markers.len(), 7);
        assert_eq!(streams.accelerometer.len(), 1);
        let truncation = streams.truncation.unwrap();
        assert_eq!(truncation.stage, ReadStage::Stimulation);
        assert_eq!(truncation.channel, Some(1));
    }

    #[test]
    fn test_truncated_in_accelerometer() {
        let layout = layout(1, true, false, 10);
        let full = counting_payload(payload_len(&layout));
        let start: usize = (0..5).map(|f| frame_len(&layout, f)).sum();
        let streams = decode_stream(&full[..start + 3], &layout, 10);
        assert_eq!(streams.frames, 5);
        assert_eq!(streams.accelerometer.len(), 1);
        let truncation = streams.truncation.unwrap();
        assert_eq!(truncation.stage, ReadStage::Accelerometer);
        assert_eq!(truncation.channel, Some(1));
    }

    #[test]
    fn test_truncated_at_marker() {
        let layout = layout(1, false, false, 2);
        let streams = decode_stream(&[0, 0, 1, 0, 0, 0, 9, 0, 0, 2, 0], &layout, 10);
        assert_eq!(streams.frames, 1);
        assert_eq!(streams.eeg, vec![1]);
        assert_eq!(streams.markers, vec![9]);
        let truncation = streams.truncation.unwrap();
        assert_eq!(truncation.stage, ReadStage::Marker);
        assert_eq!(truncation.channel, None);
        assert_eq!(truncation.last_complete_frame(), Some(0));
    }

    #[test]
    fn test_empty_payload() {
        let layout = layout(2, true, true, 4);
        let streams = decode_stream(&[], &layout, 10);
        assert_eq!(streams.frames, 0);
        assert!(streams.eeg.is_empty());
        assert!(streams.accelerometer.is_empty());
        let truncation = streams.truncation.unwrap();
        assert_eq!(truncation.frame, 0);
        assert_eq!(truncation.stage, ReadStage::Accelerometer);
        assert_eq!(truncation.last_complete_frame(), None);
    }

    #[test]
    fn test_extra_payload_is_left_unread() {
        let layout = layout(1, false, false, 1);
        let streams = decode_stream(&[0, 0, 5, 0, 0, 0, 1, 0xAA, 0xBB], &layout, 10);
        assert_eq!(streams.bytes_consumed, 7);
        assert!(streams.truncation.is_none());
    }

    #[test]
    fn test_frames_within_payload() {
        let plain = layout(2, false, false, 100);
        assert_eq!(plain.min_frame_len(), 10);
        assert_eq!(plain.frames_within(25), 2);
        assert_eq!(plain.frames_within(10_000), 100);

        let stim = layout(2, true, true, 100);
        assert_eq!(stim.min_frame_len(), 22);
        assert_eq!(stim.frames_within(21), 0);
    }

    #[test]
    fn test_huge_declared_length_with_one_frame() {
        let layout = layout(2, true, true, usize::MAX / 2);
        let payload = counting_payload(frame_len(&layout, 0));
        let streams = decode_stream(&payload, &layout, 10);

        assert_eq!(streams.frames, 1);
        assert_eq!(streams.eeg.len(), 2);
        assert_eq!(streams.stimulation.len(), 4);
        assert_eq!(streams.markers.len(), 1);
        assert!(streams.accelerometer.is_empty());
        let truncation = streams.truncation.unwrap();
        assert_eq!(truncation.frame, 1);
        assert_eq!(truncation.stage, ReadStage::Eeg);
    }

    proptest! {
        #[test]
        fn rate_ratios_hold_for_any_cut(
            channels in 1usize..5,
            accelerometer in any::<bool>(),
            stimulation in any::<bool>(),
            frames in 0usize..40,
            cut_fraction in 0.0f64..=1.0,
        ) {
            let layout = layout(channels, accelerometer, stimulation, frames);
            let full = counting_payload(payload_len(&layout));
            let cut = (full.len() as f64 * cut_fraction) as usize;
            let streams = decode_stream(&full[..cut], &layout, 0);

            let n = streams.frames;
            prop_assert!(n <= frames);
            prop_assert_eq!(streams.eeg.len(), n * channels);
            prop_assert_eq!(streams.markers.len(), n);
            let expected_acc = if accelerometer { n / ACCELEROMETER_DECIMATION } else { 0 };
            prop_assert_eq!(streams.accelerometer.len(), expected_acc);
            let expected_stim = if stimulation { n * STIMULATION_PER_FRAME * channels } else { 0 };
            prop_assert_eq!(streams.stimulation.len(), expected_stim);
            prop_assert_eq!(streams.truncation.is_none(), n == frames);
            if cut == full.len() {
                prop_assert_eq!(n, frames);
            }
        }
    }
}
