// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Downstream sink of the process information, read by the user interface.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;

use crate::metadata::ColorPrimaries;
use crate::metadata::ColorRange;
use crate::metadata::ColorSpace;
use crate::metadata::DoviFrameMetadata;
use crate::metadata::DoviStreamInfo;
use crate::metadata::DoviStreamMetadata;
use crate::metadata::DtsXType;
use crate::metadata::HdrStaticMetadata;
use crate::metadata::HdrType;
use crate::metadata::TransferCharacteristics;
use crate::metadata::Vs10Mode;

/// A change of one of the values mirrored to the cache.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheUpdate {
    VideoPts(f64),
    VideoDecoderName { name: String, is_hw: bool },
    VideoDeintMethod(String),
    VideoPixelFormat(String),
    VideoDimensions { width: u32, height: u32 },
    VideoFps(f32),
    VideoDar(f32),
    VideoStereoMode(String),
    VideoBitDepth(u32),
    VideoHdrType(HdrType),
    VideoSourceHdrType(HdrType),
    VideoSourceAdditionalHdrType(HdrType),
    VideoColorSpace(ColorSpace),
    VideoColorRange(ColorRange),
    VideoColorPrimaries(ColorPrimaries),
    VideoColorTransferCharacteristic(TransferCharacteristics),
    VideoDoviFrameMetadata(DoviFrameMetadata),
    VideoDoviStreamMetadata(DoviStreamMetadata),
    VideoDoviStreamInfo(DoviStreamInfo),
    VideoSourceDoviStreamInfo(DoviStreamInfo),
    VideoDoviCodecFourcc(String),
    VideoHdrStaticMetadata(HdrStaticMetadata),
    VideoVs10Mode(Vs10Mode),
    VideoLiveBitRate(f64),
    VideoQueueLevel(i32),
    VideoQueueDataLevel(i32),
    VideoInterlaced(bool),
    AudioDecoderName(String),
    AudioChannels(String),
    AudioSampleRate(u32),
    AudioBitsPerSample(u32),
    AudioIsDolbyAtmos(bool),
    AudioDtsXType(DtsXType),
    AudioLiveBitRate(f64),
    AudioQueueLevel(i32),
    AudioQueueDataLevel(i32),
    RenderClockSync(bool),
    StateSeeking(bool),
    SeekFinished(i64),
    /// The pending tempo and speed.
    Speed { tempo: f32, speed: f32 },
    FrameAdvance(bool),
    GuiRender(bool),
    VideoRender(bool),
    PlayTimes {
        start: SystemTime,
        current: i64,
        min: i64,
        max: i64,
    },
}

/// Receiver of [`CacheUpdate`]s.
///
/// Updates are delivered while the registry holds the lock of the value, so an implementation
/// must not call back into the registry.
pub trait DataCache: Send + Sync {
    fn update(&self, update: CacheUpdate);
}

impl<F> DataCache for F
where
    F: Fn(CacheUpdate) + Send + Sync,
{
    fn update(&self, update: CacheUpdate) {
        self(update)
    }
}

/// Cache keeping every update it receives.
#[derive(Debug, Default)]
pub struct RecordingCache {
    updates: Mutex<Vec<CacheUpdate>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn updates(&self) -> Vec<CacheUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of received updates matching `pred`.
    pub fn count(&self, pred: impl Fn(&CacheUpdate) -> bool) -> usize {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|u| pred(u))
            .count()
    }

    pub fn last(&self) -> Option<CacheUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn clear(&self) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DataCache for RecordingCache {
    fn update(&self, update: CacheUpdate) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update);
    }
}
