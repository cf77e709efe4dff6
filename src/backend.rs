// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware boundary of the decoder.
//!
//! A backend is the provider of the kernel decoder: the stream device compressed data is written
//! to ([`DecoderBackend`]) and the video layer decoded pictures are shown on ([`VideoOutput`]).
//! The [`amlogic`] backend drives the real device nodes, the [`dummy`] backend simulates them so
//! the session logic can run without hardware.

#[cfg(feature = "amlogic")]
pub mod amlogic;
pub mod dummy;

use std::os::fd::AsFd;
use std::sync::Arc;

use thiserror::Error;

use crate::metadata::DoviFrameMetadata;
use crate::EncodedFormat;
use crate::Rect;
use crate::Resolution;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("the decoder ran out of resources")]
    OutOfResources,
    #[error("invalid frame slot {0}")]
    InvalidIndex(u32),
    #[error("decoder device call failed: {0}")]
    Errno(#[from] nix::errno::Errno),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Parameters the stream device is configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenParams {
    pub codec: EncodedFormat,
    pub coded_resolution: Resolution,
    /// Frame duration in [`crate::decoder::UNIT_FREQ`] units, 0 when unknown.
    pub video_rate: u32,
    pub bit_depth: u32,
    /// The hardware should parse timestamps from the stream instead of trusting ours.
    pub pts_invalid: bool,
    pub dolby_vision: bool,
}

/// Occupancy of the stream buffer of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatus {
    pub size: usize,
    pub data_len: usize,
    pub free_len: usize,
}

impl BufferStatus {
    /// Fill level in percent once `pending` more bytes are written.
    pub fn level(&self, pending: usize) -> f32 {
        if self.size == 0 {
            return 0.0;
        }

        (self.data_len + pending) as f32 * 100.0 / self.size as f32
    }
}

/// A picture taken out of the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DequeuedFrame {
    pub index: u32,
    /// Timestamp in [`crate::decoder::PTS_FREQ`] units.
    pub pts: u64,
    pub interlaced: bool,
    pub dovi_metadata: Option<DoviFrameMetadata>,
}

/// The stream decoder device.
pub trait DecoderBackend: Send {
    /// Opens and configures the device. Called on a closed backend only.
    fn open(&mut self, params: &OpenParams) -> BackendResult<()>;
    /// Releases the device. Closing a closed backend does nothing.
    fn close(&mut self);
    /// Drops all pending data and pictures while keeping the device configured.
    fn reset(&mut self) -> BackendResult<()>;
    /// Writes compressed data stamped with `pts`, returning how many bytes were accepted.
    fn write(&mut self, data: &[u8], pts: u64) -> BackendResult<usize>;
    fn buffer_status(&mut self) -> BackendResult<BufferStatus>;
    /// Takes the next decoded picture, if any.
    fn dequeue_frame(&mut self) -> BackendResult<Option<DequeuedFrame>>;
    /// Gives frame slot `index` back to the device. A `drop`ped picture is not displayed.
    fn queue_frame(&mut self, index: u32, drop: bool) -> BackendResult<()>;
    /// Switches the decoder to I-frames only.
    fn set_trick_mode(&mut self, enable: bool) -> BackendResult<()>;
    fn pause(&mut self, pause: bool) -> BackendResult<()>;
    /// Size of the frame slot arena.
    fn num_frame_slots(&self) -> u32;
    /// Descriptor becoming readable when a picture is ready.
    fn poll_handle(&self) -> Option<Arc<dyn AsFd + Send + Sync>> {
        None
    }
}

/// How the video layer should turn a stereoscopic picture into what the display shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Video3dMode {
    #[default]
    Disabled,
    /// Show one half of a side by side picture, full screen.
    SideBySideToMono { right: bool },
    /// Show one half of a top and bottom picture, full screen.
    TopBottomToMono { right: bool },
}

/// The hardware video layer.
pub trait VideoOutput: Send {
    /// Places the video layer, in screen pixels.
    fn set_video_axis(&mut self, axis: Rect) -> BackendResult<()>;
    /// Sets the zoom of the video layer in percent.
    fn set_zoom(&mut self, percent: i32) -> BackendResult<()>;
    fn set_3d_mode(&mut self, mode: Video3dMode) -> BackendResult<()>;
    fn show_video(&mut self, show: bool) -> BackendResult<()>;
    /// Enables the `vadj1` picture quality stage.
    fn enable_vadj1(&mut self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_level() {
        let status = BufferStatus {
            size: 1000,
            data_len: 250,
            free_len: 750,
        };
        assert_eq!(status.level(0), 25.0);
        assert_eq!(status.level(250), 50.0);
        assert_eq!(BufferStatus::default().level(100), 0.0);
    }
}
