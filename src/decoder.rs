// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware decode session.
//!
//! The decoder is split in the same layers as the hardware it drives: a [`session`] owning the
//! device, a [`feeder`] pushing compressed data into it, a [`frames`] tracker pulling decoded
//! pictures out, and the [`controller`] tying them together and publishing its state to
//! [`crate::process_info::ProcessInfo`].

pub mod controller;
pub mod display;
pub mod feeder;
pub mod frames;
pub mod poll;
pub mod session;

use std::time::Duration;

use enumn::N;
use thiserror::Error;

use crate::backend::BackendError;
use crate::metadata::ColorPrimaries;
use crate::metadata::ColorRange;
use crate::metadata::ColorSpace;
use crate::metadata::DoviFrameMetadata;
use crate::metadata::DoviStreamInfo;
use crate::metadata::HdrStaticMetadata;
use crate::metadata::HdrType;
use crate::metadata::TransferCharacteristics;
use crate::EncodedFormat;
use crate::Resolution;

/// Frequency of the presentation timestamps used by the hardware.
pub const PTS_FREQ: u64 = 90_000;
/// Frequency the hardware expresses its video rate in.
pub const UNIT_FREQ: u64 = 96_000;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("stream not supported by the hardware decoder: {0}")]
    UnsupportedStream(String),
    #[error("decoder input buffer is full, retry later")]
    BufferFull,
    #[error("decoder device failed: {0}")]
    Device(#[source] BackendError),
    #[error("decoder device failed again before recovering: {0}")]
    PlaybackFatal(#[source] BackendError),
    #[error("operation not valid while the decoder is {0:?}")]
    InvalidState(DecoderState),
    #[error("frame index {0} is out of range")]
    InvalidFrameIndex(u32),
    #[error("frame index {0} is not held by the client")]
    FrameNotHeld(u32),
    #[error("invalid bitstream: {0}")]
    InvalidData(#[from] anyhow::Error),
}

/// States of a decode session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DecoderState {
    #[default]
    Closed,
    Opened,
    /// No more input will come, pending frames are being flushed out.
    Draining,
}

/// H.264 `profile_idc` values relevant to the hardware limits.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum H264Profile {
    Baseline = 66,
    Main = 77,
    Extended = 88,
    High = 100,
    High10 = 110,
    High422P = 122,
    High444P = 244,
}

/// Description of the stream a decoder is opened for, as provided by the demuxer.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamHints {
    pub codec: EncodedFormat,
    /// Codec specific profile, e.g. `profile_idc` for H.264.
    pub profile: u32,
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub fps_rate: u32,
    pub fps_scale: u32,
    /// Display aspect ratio, 0 when unknown.
    pub aspect: f32,
    pub bit_depth: u32,
    pub hdr_type: HdrType,
    pub color_primaries: ColorPrimaries,
    pub color_transfer: TransferCharacteristics,
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
    pub mastering_metadata: Option<HdrStaticMetadata>,
    pub dovi: Option<DoviStreamInfo>,
    /// Container codec tag, used to tell `hvc1` from `hev1` style streams.
    pub codec_tag: u32,
    /// Codec configuration record or Annex-B parameter sets.
    pub extradata: Vec<u8>,
    pub stereo_mode: String,
    /// The container does not carry reliable timestamps.
    pub pts_invalid: bool,
}

impl Default for StreamHints {
    fn default() -> Self {
        Self {
            codec: EncodedFormat::H264,
            profile: 0,
            level: 0,
            width: 0,
            height: 0,
            fps_rate: 0,
            fps_scale: 0,
            aspect: 0.0,
            bit_depth: 8,
            hdr_type: HdrType::None,
            color_primaries: Default::default(),
            color_transfer: Default::default(),
            color_space: Default::default(),
            color_range: Default::default(),
            mastering_metadata: None,
            dovi: None,
            codec_tag: 0,
            extradata: Vec::new(),
            stereo_mode: String::new(),
            pts_invalid: false,
        }
    }
}

impl StreamHints {
    pub fn resolution(&self) -> Resolution {
        Resolution::from((self.width, self.height))
    }

    /// Frame rate announced by the container, or 0.0 when unknown.
    pub fn fps(&self) -> f32 {
        if self.fps_rate == 0 || self.fps_scale == 0 {
            0.0
        } else {
            self.fps_rate as f32 / self.fps_scale as f32
        }
    }

    /// Frame duration in `UNIT_FREQ` units, as the hardware expects it.
    pub fn video_rate(&self) -> u32 {
        if self.fps_rate == 0 || self.fps_scale == 0 {
            0
        } else {
            (0.5 + UNIT_FREQ as f64 * self.fps_scale as f64 / self.fps_rate as f64) as u32
        }
    }

    pub fn display_aspect_ratio(&self) -> f32 {
        if self.aspect > 0.0 {
            self.aspect
        } else if self.height > 0 {
            self.width as f32 / self.height as f32
        } else {
            0.0
        }
    }
}

/// A decoded picture owned by the client until released with
/// [`controller::AmlCodec::release_frame`].
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    /// Slot of the hardware frame arena holding the picture.
    pub index: u32,
    /// Presentation timestamp in `PTS_FREQ` units.
    pub pts: u64,
    /// Duration in `PTS_FREQ` units.
    pub duration: u32,
    pub interlaced: bool,
    pub dovi_metadata: Option<DoviFrameMetadata>,
}

impl DecodedFrame {
    pub fn pts_seconds(&self) -> f64 {
        device_pts_to_seconds(self.pts)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration as f64 / PTS_FREQ as f64
    }
}

/// Result of polling the decoder for a picture.
#[derive(Debug, PartialEq)]
pub enum PictureStatus {
    /// A picture is ready.
    Frame(DecodedFrame),
    /// The hardware has not produced a picture yet, poll again on the next tick.
    TryAgain,
    /// The stream buffer runs low, more data should be fed before polling again.
    NeedData,
    /// All the pictures of a drained stream have been returned.
    Eos,
}

/// Converts a timestamp to hardware `PTS_FREQ` units.
pub fn duration_to_device_pts(time: Duration) -> u64 {
    (time.as_micros() * PTS_FREQ as u128 / 1_000_000) as u64
}

/// Converts a hardware timestamp to seconds.
pub fn device_pts_to_seconds(pts: u64) -> f64 {
    pts as f64 / PTS_FREQ as f64
}

/// Converts a hardware duration to nanoseconds.
pub fn device_duration_to_ns(duration: u32) -> u64 {
    duration as u64 * 1_000_000_000 / PTS_FREQ
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_rate_matches_frame_rate() {
        let hints = StreamHints {
            fps_rate: 24000,
            fps_scale: 1001,
            ..Default::default()
        };
        // 96000 * 1001 / 24000 = 4004
        assert_eq!(hints.video_rate(), 4004);
        assert!((hints.fps() - 23.976).abs() < 0.001);

        let unknown = StreamHints::default();
        assert_eq!(unknown.video_rate(), 0);
        assert_eq!(unknown.fps(), 0.0);
    }

    #[test]
    fn timestamp_conversions() {
        assert_eq!(duration_to_device_pts(Duration::from_secs(2)), 180_000);
        assert_eq!(device_pts_to_seconds(45_000), 0.5);
        assert_eq!(device_duration_to_ns(3750), 41_666_666);
    }

    #[test]
    fn aspect_falls_back_to_dimensions() {
        let hints = StreamHints {
            width: 1920,
            height: 800,
            ..Default::default()
        };
        assert_eq!(hints.display_aspect_ratio(), 2.4);
    }
}
