// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The hardware decode session as seen by the player.
//!
//! [`AmlCodec`] runs the `Closed -> Opened -> Draining -> Closed` life cycle of a session on top
//! of the device, feeder and frame layers, and mirrors what it learns about the stream into
//! [`ProcessInfo`].
//!
//! Device failures get one chance: the first one resets the device and is reported as
//! [`Error::Device`]. If the device fails again before delivering a picture, the session is torn
//! down and [`Error::PlaybackFatal`] is returned. A decoder holding data without producing
//! pictures for longer than the decoder timeout, while it has a free frame slot to decode into,
//! counts as a failure.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use log::debug;
use log::error;
use log::info;
use log::trace;
use log::warn;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::DecoderBackend;
use crate::backend::VideoOutput;
use crate::capabilities::HardwareCapabilities;
use crate::config::DecoderConfig;
use crate::decoder::device_pts_to_seconds;
use crate::decoder::display::DisplayPlacement;
use crate::decoder::display::StereoMode;
use crate::decoder::display::StereoView;
use crate::decoder::display::StreamStereo;
use crate::decoder::feeder::BitstreamFeeder;
use crate::decoder::feeder::BufferLevel;
use crate::decoder::frames::FrameTracker;
use crate::decoder::poll::PollDevice;
use crate::decoder::poll::PollDeviceHandle;
use crate::decoder::poll::PollError;
use crate::decoder::poll::PollOutcome;
use crate::decoder::session::enable_vadj1;
use crate::decoder::session::DeviceSession;
use crate::decoder::DecodedFrame;
use crate::decoder::DecoderState;
use crate::decoder::Error;
use crate::decoder::PictureStatus;
use crate::decoder::Result;
use crate::decoder::StreamHints;
use crate::decoder::PTS_FREQ;
use crate::decoder::UNIT_FREQ;
use crate::metadata::HdrType;
use crate::metadata::TransferCharacteristics;
use crate::process_info::DeinterlaceMethod;
use crate::process_info::ProcessInfo;
use crate::EncodedFormat;
use crate::Fourcc;
use crate::Rect;
use crate::Resolution;

/// Longest pause between two buffer checks while draining.
const MAX_DRAIN_BACKOFF: Duration = Duration::from_millis(32);

const DOVI_FOURCCS: [&str; 5] = ["dvhe", "dvh1", "dvav", "dva1", "dav1"];

/// Playback rate requested by the player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlaybackRate {
    Paused,
    Normal,
    /// Fast forward or rewind, decoding I-frames only.
    Trick(f32),
    /// Audio preserving rate change, the decoder keeps decoding every frame.
    Tempo(f32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateOutcome {
    Applied,
    /// The rate was out of the allowed range and has been brought within it.
    Clamped { requested: f32, applied: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Everything written to the device was consumed before teardown.
    Drained,
    /// The device still held data when the drain timeout expired.
    DrainTimedOut,
    AlreadyClosed,
}

/// A hardware decode session.
pub struct AmlCodec {
    hints: StreamHints,
    config: DecoderConfig,
    session: DeviceSession,
    feeder: Option<BitstreamFeeder>,
    frames: FrameTracker,
    display: DisplayPlacement,
    process_info: Arc<ProcessInfo>,
    poll_device: Option<Arc<PollDevice>>,
    /// Descriptor this session installed in `poll_device`.
    poll_handle: Option<PollDeviceHandle>,
    state: DecoderState,
    rate: PlaybackRate,
    /// Current rate of the device, in `UNIT_FREQ` units per frame.
    video_rate: u32,
    cur_pts: u64,
    buffer_index: Option<u32>,
    /// The device failed and was reset, no picture has come out since.
    recovering: bool,
}

impl AmlCodec {
    pub fn new(
        hints: StreamHints,
        backend: Box<dyn DecoderBackend>,
        output: Box<dyn VideoOutput>,
        caps: Arc<dyn HardwareCapabilities>,
        process_info: Arc<ProcessInfo>,
        config: DecoderConfig,
    ) -> Self {
        let num_slots = backend.num_frame_slots();
        let stereo = StreamStereo::from_hint(&hints.stereo_mode);

        Self {
            video_rate: hints.video_rate(),
            hints,
            config,
            session: DeviceSession::new(backend, caps),
            feeder: None,
            frames: FrameTracker::new(num_slots),
            display: DisplayPlacement::new(output, stereo),
            process_info,
            poll_device: None,
            poll_handle: None,
            state: DecoderState::Closed,
            rate: PlaybackRate::Normal,
            cur_pts: 0,
            buffer_index: None,
            recovering: false,
        }
    }

    /// Makes the session install its device in `poll_device` while opened.
    pub fn with_poll_device(mut self, poll_device: Arc<PollDevice>) -> Self {
        self.poll_device = Some(poll_device);
        self
    }

    /// Opens the device for the stream. On failure the session stays closed.
    pub fn open_decoder(&mut self) -> Result<()> {
        if self.state != DecoderState::Closed {
            return Err(Error::InvalidState(self.state));
        }

        self.process_info.reset_video_codec_info();
        let feeder = BitstreamFeeder::new(&self.hints, self.config.clone())?;
        self.session.open(&self.hints)?;
        if let Err(e) = self.apply_rate(self.rate) {
            error!("failed to apply {:?} to the new session: {}", self.rate, e);
            self.session.close();
            return Err(Error::Device(e));
        }

        self.feeder = Some(feeder);
        self.frames = FrameTracker::new(self.session.backend().num_frame_slots());
        self.cur_pts = 0;
        self.buffer_index = None;
        self.recovering = false;
        self.state = DecoderState::Opened;

        enable_vadj1(self.display.output());
        let stereo = StreamStereo::from_hint(&self.hints.stereo_mode);
        if let Err(e) = self.display.set_stream_stereo(stereo) {
            warn!("failed to configure stereo output: {}", e);
        }
        if let Err(e) = self.display.show(true) {
            warn!("failed to show the video layer: {}", e);
        }
        if let Some(poll_device) = &self.poll_device {
            self.poll_handle = self.session.backend().poll_handle();
            if let Some(handle) = &self.poll_handle {
                poll_device.set_device(Some(handle.clone()));
            }
        }

        self.publish_stream_info();
        info!(
            "{} session opened ({}x{} @ {:.3} fps)",
            self.hints.codec.name(),
            self.hints.width,
            self.hints.height,
            self.hints.fps()
        );

        Ok(())
    }

    fn check_opened(&self) -> Result<()> {
        match self.state {
            DecoderState::Closed => Err(Error::InvalidState(self.state)),
            _ => Ok(()),
        }
    }

    /// Submits one compressed access unit, returning the number of bytes consumed.
    ///
    /// [`Error::BufferFull`] is transient: the same data should be submitted again later.
    pub fn add_data(
        &mut self,
        data: &[u8],
        dts: Option<Duration>,
        pts: Option<Duration>,
    ) -> Result<usize> {
        if self.state != DecoderState::Opened {
            return Err(Error::InvalidState(self.state));
        }
        let Some(feeder) = self.feeder.as_mut() else {
            return Err(Error::InvalidState(self.state));
        };

        match feeder.add_data(self.session.backend(), data, dts, pts) {
            Err(Error::Device(e)) => Err(self.device_failure(e)),
            res => res,
        }
    }

    /// Takes the next decoded picture, if any. Never blocks.
    pub fn get_picture(&mut self) -> Result<PictureStatus> {
        self.check_opened()?;
        let draining = self.state == DecoderState::Draining;
        let Some(feeder) = self.feeder.as_ref() else {
            return Err(Error::InvalidState(self.state));
        };

        let level = match feeder.buffer_level(self.session.backend()) {
            Ok(level) => level,
            Err(Error::Device(e)) => return Err(self.device_failure(e)),
            Err(e) => return Err(e),
        };
        self.publish_queue_levels(&level);
        if !draining && !feeder.is_prefilled() {
            return Ok(PictureStatus::NeedData);
        }

        let frame = match self.frames.dequeue(self.session.backend()) {
            Ok(frame) => frame,
            Err(e) => return Err(self.device_failure(e)),
        };
        let Some(frame) = frame else {
            return self.no_picture(&level, draining);
        };

        self.recovering = false;
        self.cur_pts = frame.pts;
        self.buffer_index = Some(frame.index);

        let picture = DecodedFrame {
            index: frame.index,
            pts: frame.pts,
            duration: self.frame_duration(),
            interlaced: frame.interlaced,
            dovi_metadata: frame.dovi_metadata,
        };
        self.publish_picture(&picture);
        trace!(
            "picture slot {} pts {:.3}s",
            picture.index,
            picture.pts_seconds()
        );

        Ok(PictureStatus::Frame(picture))
    }

    fn no_picture(&mut self, level: &BufferLevel, draining: bool) -> Result<PictureStatus> {
        let waited = self.frames.since_last_delivery();

        // With every slot held the device cannot decode, so waiting is up to the client.
        let slot_free = self.frames.free_count() > 0;

        if draining {
            if level.data_len == 0 || (slot_free && waited > self.config.decoder_timeout) {
                debug!("drained, {} bytes left in the device", level.data_len);
                return Ok(PictureStatus::Eos);
            }
            return Ok(PictureStatus::TryAgain);
        }

        if self.rate != PlaybackRate::Paused
            && slot_free
            && level.data_len > 0
            && waited > self.config.decoder_timeout
        {
            let stall = anyhow!(
                "no picture for {:?} with {} bytes buffered",
                waited,
                level.data_len
            );
            return Err(self.device_failure(BackendError::Other(stall)));
        }

        if level.percent < self.config.minimum_buffer_level {
            Ok(PictureStatus::NeedData)
        } else {
            Ok(PictureStatus::TryAgain)
        }
    }

    /// Gives the picture in slot `index` back to the device. A `drop`ped picture is not shown.
    pub fn release_frame(&mut self, index: u32, drop: bool) -> Result<()> {
        self.check_opened()?;

        match self.frames.release(self.session.backend(), index, drop) {
            Err(Error::Device(e)) => Err(self.device_failure(e)),
            res => res,
        }
    }

    /// Waits up to `timeout` for the device to signal a ready picture.
    pub fn poll_frame(&self, timeout: Duration) -> std::result::Result<PollOutcome, PollError> {
        match &self.poll_device {
            Some(poll_device) => poll_device.poll(timeout),
            None => Err(PollError::NoDevice),
        }
    }

    /// Changes the playback rate. Tempos are brought within the range allowed by the platform.
    pub fn set_speed(&mut self, rate: PlaybackRate) -> Result<RateOutcome> {
        let mut outcome = RateOutcome::Applied;
        let rate = match rate {
            PlaybackRate::Tempo(requested) => {
                let applied = self.process_info.clamp_tempo(requested);
                if applied != requested {
                    debug!("tempo {} clamped to {}", requested, applied);
                    outcome = RateOutcome::Clamped { requested, applied };
                }
                self.process_info.set_tempo(applied);
                self.process_info.set_speed(1.0);
                PlaybackRate::Tempo(applied)
            }
            PlaybackRate::Trick(speed) if speed == 1.0 => {
                self.process_info.set_speed(1.0);
                PlaybackRate::Normal
            }
            PlaybackRate::Trick(speed) => {
                self.process_info.set_speed(speed);
                PlaybackRate::Trick(speed)
            }
            PlaybackRate::Normal => {
                self.process_info.set_tempo(1.0);
                self.process_info.set_speed(1.0);
                PlaybackRate::Normal
            }
            PlaybackRate::Paused => {
                self.process_info.set_speed(0.0);
                PlaybackRate::Paused
            }
        };

        let resuming = self.rate == PlaybackRate::Paused && rate != PlaybackRate::Paused;
        self.rate = rate;
        if self.state != DecoderState::Closed {
            if let Err(e) = self.apply_rate(rate) {
                return Err(self.device_failure(e));
            }
            if resuming {
                self.frames.restart_delivery_timer();
            }
        }

        Ok(outcome)
    }

    fn apply_rate(&mut self, rate: PlaybackRate) -> BackendResult<()> {
        let backend = self.session.backend();
        backend.pause(rate == PlaybackRate::Paused)?;
        backend.set_trick_mode(matches!(rate, PlaybackRate::Trick(_)))?;
        debug!("playback rate {:?}", rate);

        Ok(())
    }

    /// Announces the end of the input. Pending pictures keep coming out until
    /// [`PictureStatus::Eos`].
    pub fn set_drain(&mut self, drain: bool) -> Result<()> {
        self.check_opened()?;
        let state = if drain {
            DecoderState::Draining
        } else {
            DecoderState::Opened
        };
        if state != self.state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }

        Ok(())
    }

    /// Drops everything in flight, e.g. on seek. Draining stops.
    pub fn reset(&mut self) -> Result<()> {
        self.check_opened()?;
        self.reset_device().map_err(|e| self.device_failure(e))?;
        self.state = DecoderState::Opened;

        Ok(())
    }

    fn reset_device(&mut self) -> BackendResult<()> {
        self.session.reset()?;
        self.frames.reset();
        if let Some(feeder) = self.feeder.as_mut() {
            feeder.reset();
        }
        self.cur_pts = 0;
        self.buffer_index = None;

        Ok(())
    }

    /// Applies the recovery policy to a device failure and returns the error to report.
    fn device_failure(&mut self, err: BackendError) -> Error {
        if self.recovering {
            error!("decoder failed again before recovering: {}", err);
            self.teardown();
            return Error::PlaybackFatal(err);
        }

        warn!("decoder failure, resetting the device: {}", err);
        self.recovering = true;
        if let Err(e) = self.reset_device() {
            error!("decoder reset failed: {}", e);
            self.teardown();
            return Error::PlaybackFatal(e);
        }

        Error::Device(err)
    }

    /// Drains the device for at most the drain timeout, then releases it.
    pub fn close_decoder(&mut self) -> CloseOutcome {
        if self.state == DecoderState::Closed {
            return CloseOutcome::AlreadyClosed;
        }
        self.state = DecoderState::Draining;

        let deadline = Instant::now() + self.config.drain_timeout;
        let mut backoff = Duration::from_millis(1);
        let outcome = loop {
            match self.session.backend().buffer_status() {
                Ok(status) if status.data_len == 0 => break CloseOutcome::Drained,
                Ok(_) => (),
                Err(e) => {
                    warn!("cannot drain the decoder: {}", e);
                    break CloseOutcome::DrainTimedOut;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("decoder not drained after {:?}", self.config.drain_timeout);
                break CloseOutcome::DrainTimedOut;
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_DRAIN_BACKOFF);
        };

        self.teardown();
        outcome
    }

    fn teardown(&mut self) {
        if let Err(e) = self.display.show(false) {
            warn!("failed to hide the video layer: {}", e);
        }
        if let (Some(poll_device), Some(handle)) = (&self.poll_device, self.poll_handle.take()) {
            poll_device.remove_device(&handle);
        }
        self.session.close();
        self.feeder = None;
        self.frames.reset();
        self.buffer_index = None;
        self.state = DecoderState::Closed;
        info!("{} session closed", self.hints.codec.name());
    }

    pub fn set_video_rect(&mut self, src: Rect, dst: Rect) {
        if let Err(e) = self.display.set_video_rect(src, dst) {
            warn!("failed to place the video layer: {}", e);
        }
    }

    pub fn set_video_zoom(&mut self, zoom: f32) {
        if let Err(e) = self.display.set_zoom(zoom) {
            warn!("failed to zoom the video layer: {}", e);
        }
    }

    pub fn set_stereo_mode(&mut self, mode: StereoMode, view: StereoView) {
        if let Err(e) = self.display.set_stereo_mode(mode, view) {
            warn!("failed to set the stereo mode: {}", e);
        }
    }

    pub fn set_display_resolution(&mut self, gui: Resolution, display: Resolution) {
        if let Err(e) = self.display.set_display_resolution(gui, display) {
            warn!("failed to place the video layer: {}", e);
        }
    }

    /// Sets the frame duration, in `UNIT_FREQ` units, when the stream changes rate.
    pub fn set_video_rate(&mut self, video_rate: u32) {
        if video_rate == 0 || video_rate == self.video_rate {
            return;
        }

        debug!("video rate {} -> {}", self.video_rate, video_rate);
        self.video_rate = video_rate;
        self.process_info
            .set_video_fps(UNIT_FREQ as f32 / video_rate as f32);
    }

    /// Frame duration in `PTS_FREQ` units derived from the video rate, 0 when unknown.
    pub fn aml_duration(&self) -> u32 {
        (self.video_rate as u64 * PTS_FREQ / UNIT_FREQ) as u32
    }

    fn frame_duration(&self) -> u32 {
        match self.aml_duration() {
            0 => self
                .feeder
                .as_ref()
                .and_then(BitstreamFeeder::frame_duration)
                .unwrap_or(0),
            duration => duration,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn rate(&self) -> PlaybackRate {
        self.rate
    }

    /// Timestamp of the last delivered picture, in `PTS_FREQ` units.
    pub fn cur_pts(&self) -> u64 {
        self.cur_pts
    }

    pub fn pts_seconds(&self) -> f64 {
        device_pts_to_seconds(self.cur_pts)
    }

    /// Slot of the last delivered picture, while the session is opened.
    pub fn buffer_index(&self) -> Option<u32> {
        self.buffer_index
    }

    pub fn held_frames(&self) -> usize {
        self.frames.held_count()
    }

    pub fn hints(&self) -> &StreamHints {
        &self.hints
    }

    fn output_hdr_type(&self) -> HdrType {
        let hints = &self.hints;
        if hints.hdr_type != HdrType::DolbyVision || self.session.capabilities().support_dolby_vision()
        {
            return hints.hdr_type;
        }

        // Only the base layer gets decoded.
        match hints.color_transfer {
            TransferCharacteristics::Smpte2084 => HdrType::Hdr10,
            TransferCharacteristics::Hlg => HdrType::Hlg,
            _ => HdrType::None,
        }
    }

    fn dovi_codec_fourcc(&self) -> String {
        let tag = Fourcc(self.hints.codec_tag).to_string();
        if DOVI_FOURCCS.contains(&tag.as_str()) {
            return tag;
        }

        match self.hints.codec {
            EncodedFormat::H265 => "dvhe",
            EncodedFormat::H264 => "dvav",
            EncodedFormat::AV1 => "dav1",
            _ => "",
        }
        .to_string()
    }

    fn publish_stream_info(&self) {
        let info = &self.process_info;
        let hints = &self.hints;

        info.set_video_decoder_name(format!("amlogic-{}", hints.codec.name()), true);
        info.set_video_pixel_format("amlogic");
        info.set_video_deint_method(DeinterlaceMethod::Hardware.name());
        info.update_deinterlacing_methods(&[DeinterlaceMethod::Hardware]);
        info.set_deinterlacing_method_default(DeinterlaceMethod::Hardware);
        info.set_video_dimensions(hints.width, hints.height);
        info.set_video_fps(hints.fps());
        info.set_video_dar(hints.display_aspect_ratio());
        info.set_video_bit_depth(hints.bit_depth);
        info.set_video_stereo_mode(hints.stereo_mode.as_str());

        info.set_video_hdr_type(self.output_hdr_type());
        info.set_video_source_hdr_type(hints.hdr_type);
        info.set_video_color_space(hints.color_space);
        info.set_video_color_range(hints.color_range);
        info.set_video_color_primaries(hints.color_primaries);
        info.set_video_color_transfer_characteristic(hints.color_transfer);
        if let Some(metadata) = hints.mastering_metadata {
            info.set_video_hdr_static_metadata(metadata);
        }
        if let Some(dovi) = hints.dovi {
            info.set_video_source_dovi_stream_info(dovi);
            if self.output_hdr_type() == HdrType::DolbyVision {
                info.set_video_dovi_stream_info(dovi);
                info.set_video_dovi_codec_fourcc(self.dovi_codec_fourcc());
            }
        }
    }

    fn publish_queue_levels(&self, level: &BufferLevel) {
        let slots = self.frames.num_slots().max(1);
        self.process_info
            .set_video_queue_level((self.frames.held_count() * 100 / slots) as i32);
        self.process_info
            .set_video_queue_data_level(level.percent.round() as i32);
    }

    fn publish_picture(&self, picture: &DecodedFrame) {
        let info = &self.process_info;
        info.set_video_pts(picture.pts_seconds());
        if picture.interlaced != info.video_interlaced() {
            info.set_video_interlaced(picture.interlaced);
        }
        if let Some(metadata) = picture.dovi_metadata {
            info.set_video_dovi_frame_metadata(metadata);
        }
        if self.hints.fps() == 0.0 {
            if let Some(fps) = self.feeder.as_ref().and_then(BitstreamFeeder::inferred_fps) {
                info.set_video_fps(fps);
            }
        }
    }
}

impl Drop for AmlCodec {
    fn drop(&mut self) {
        if self.state != DecoderState::Closed {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::eventfd::EventFd;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::dummy::DummyControl;
    use crate::backend::dummy::DummyOutput;
    use crate::capabilities::StaticCapabilities;
    use crate::metadata::DoviStreamInfo;
    use crate::process_info::cache::RecordingCache;
    use crate::process_info::CacheUpdate;
    use crate::process_info::ProcessInfoFactory;

    struct Fixture {
        codec: AmlCodec,
        control: DummyControl,
        output: DummyOutput,
        info: Arc<ProcessInfo>,
        cache: Arc<RecordingCache>,
    }

    fn hints() -> StreamHints {
        StreamHints {
            codec: EncodedFormat::H264,
            profile: 100,
            level: 41,
            width: 1920,
            height: 1080,
            fps_rate: 24000,
            fps_scale: 1001,
            ..Default::default()
        }
    }

    fn config() -> DecoderConfig {
        DecoderConfig {
            minimum_buffer_level: 0.0,
            drain_timeout: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn fixture_with(hints: StreamHints, config: DecoderConfig) -> Fixture {
        let backend = DummyBackend::new(1 << 16, 4);
        let control = backend.control();
        let output = DummyOutput::new();
        let info = ProcessInfoFactory::new().create_instance(Default::default());
        let cache = Arc::new(RecordingCache::new());
        info.set_data_cache(cache.clone());

        let codec = AmlCodec::new(
            hints,
            Box::new(backend),
            Box::new(output.clone()),
            Arc::new(StaticCapabilities::full_4k()),
            info.clone(),
            config,
        );

        Fixture {
            codec,
            control,
            output,
            info,
            cache,
        }
    }

    fn opened() -> Fixture {
        let mut fixture = fixture_with(hints(), config());
        fixture.codec.open_decoder().unwrap();
        fixture
    }

    fn ms(ms: u64) -> Option<Duration> {
        Some(Duration::from_millis(ms))
    }

    fn feed(codec: &mut AmlCodec, count: u64) {
        for i in 0..count {
            codec
                .add_data(&[0x00, 0x00, 0x01, 0x65, 0x88], ms(i * 40), ms(i * 40))
                .unwrap();
        }
    }

    fn next_frame(codec: &mut AmlCodec) -> DecodedFrame {
        match codec.get_picture().unwrap() {
            PictureStatus::Frame(frame) => frame,
            status => panic!("expected a frame, got {:?}", status),
        }
    }

    #[test]
    fn codec_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AmlCodec>();
    }

    #[test]
    fn decode_and_publish() {
        let mut f = opened();
        assert_eq!(f.codec.state(), DecoderState::Opened);
        assert_eq!(f.info.video_dimensions(), (1920, 1080));
        assert_eq!(f.info.video_decoder_name(), "amlogic-h264");
        assert!(f.info.is_video_hw_decoder());
        assert!((f.info.video_fps() - 23.976).abs() < 0.001);
        assert_eq!(f.info.deinterlacing_method_default(), DeinterlaceMethod::Hardware);
        assert_eq!(f.output.log().shown, Some(true));
        assert_eq!(f.output.log().vadj1_enabled, 1);

        feed(&mut f.codec, 2);
        let frame = next_frame(&mut f.codec);
        assert_eq!(frame.index, 0);
        assert_eq!(frame.pts, 0);
        // 4004 / 96000 s at 90 kHz.
        assert_eq!(frame.duration, 3753);
        assert_eq!(f.codec.aml_duration(), 3753);

        let frame = next_frame(&mut f.codec);
        assert_eq!(frame.pts, 3600);
        assert_eq!(f.codec.cur_pts(), 3600);
        assert_eq!(f.codec.buffer_index(), Some(1));
        assert_eq!(f.info.video_pts(), 0.04);
        assert_eq!(f.codec.held_frames(), 2);
        assert!(f.cache.updates().contains(&CacheUpdate::VideoQueueLevel(25)));

        f.codec.release_frame(0, false).unwrap();
        f.codec.release_frame(1, true).unwrap();
        assert_eq!(f.control.counters().queued, vec![(0, false), (1, true)]);
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::TryAgain);
    }

    #[test]
    fn unsupported_stream_stays_closed() {
        let mut f = fixture_with(
            StreamHints {
                width: 8192,
                height: 4320,
                ..hints()
            },
            config(),
        );

        assert!(matches!(
            f.codec.open_decoder(),
            Err(Error::UnsupportedStream(_))
        ));
        assert_eq!(f.codec.state(), DecoderState::Closed);
        assert!(matches!(
            f.codec.add_data(&[0u8; 4], None, ms(0)),
            Err(Error::InvalidState(DecoderState::Closed))
        ));
        assert!(matches!(
            f.codec.get_picture(),
            Err(Error::InvalidState(DecoderState::Closed))
        ));
        assert!(!f.control.is_open());
    }

    #[test]
    fn double_release_is_rejected() {
        let mut f = opened();
        feed(&mut f.codec, 1);
        let frame = next_frame(&mut f.codec);

        f.codec.release_frame(frame.index, true).unwrap();
        let free = f.control.free_slots();
        assert!(matches!(
            f.codec.release_frame(frame.index, true),
            Err(Error::FrameNotHeld(_))
        ));
        assert!(matches!(
            f.codec.release_frame(17, true),
            Err(Error::InvalidFrameIndex(17))
        ));
        assert_eq!(f.control.free_slots(), free);
        assert_eq!(f.codec.state(), DecoderState::Opened);
    }

    #[test]
    fn tempo_is_clamped() {
        let mut f = opened();
        assert_eq!(
            f.codec.set_speed(PlaybackRate::Tempo(2.0)).unwrap(),
            RateOutcome::Clamped {
                requested: 2.0,
                applied: 1.55
            }
        );
        assert_eq!(f.info.new_tempo(), 1.55);
        assert_eq!(f.codec.rate(), PlaybackRate::Tempo(1.55));
        assert_eq!(
            f.cache.last(),
            Some(CacheUpdate::Speed {
                tempo: 1.55,
                speed: 1.0
            })
        );

        assert_eq!(
            f.codec.set_speed(PlaybackRate::Tempo(1.2)).unwrap(),
            RateOutcome::Applied
        );
        assert_eq!(f.info.tempo(), 1.2);
    }

    #[test]
    fn trick_play_and_pause_reach_the_device() {
        let mut f = opened();
        f.codec.set_speed(PlaybackRate::Trick(4.0)).unwrap();
        assert!(f.control.counters().trick_mode);
        assert_eq!(f.info.speed(), 4.0);

        f.codec.set_speed(PlaybackRate::Paused).unwrap();
        let counters = f.control.counters();
        assert!(counters.paused);
        assert!(!counters.trick_mode);

        f.codec.set_speed(PlaybackRate::Normal).unwrap();
        assert!(!f.control.counters().paused);
        assert_eq!(f.info.speed(), 1.0);
    }

    #[test]
    fn first_failure_resets_second_is_fatal() {
        let mut f = opened();
        feed(&mut f.codec, 1);
        f.control.fail_dequeues(1);
        assert!(matches!(f.codec.get_picture(), Err(Error::Device(_))));
        assert_eq!(f.control.counters().resets, 1);
        assert_eq!(f.codec.state(), DecoderState::Opened);

        feed(&mut f.codec, 1);
        f.control.fail_dequeues(1);
        assert!(matches!(f.codec.get_picture(), Err(Error::PlaybackFatal(_))));
        assert_eq!(f.codec.state(), DecoderState::Closed);
        assert!(!f.control.is_open());
        assert_eq!(f.output.log().shown, Some(false));
    }

    #[test]
    fn delivered_picture_ends_recovery() {
        let mut f = opened();
        f.control.fail_writes(1);
        assert!(matches!(
            f.codec.add_data(&[0u8; 4], None, ms(0)),
            Err(Error::Device(_))
        ));

        feed(&mut f.codec, 1);
        next_frame(&mut f.codec);

        f.control.fail_writes(1);
        assert!(matches!(
            f.codec.add_data(&[0u8; 4], None, ms(40)),
            Err(Error::Device(_))
        ));
        assert_eq!(f.control.counters().resets, 2);
        assert_eq!(f.codec.state(), DecoderState::Opened);
    }

    #[test]
    fn stall_counts_as_failure() {
        let mut f = fixture_with(
            hints(),
            DecoderConfig {
                decoder_timeout: Duration::from_millis(10),
                ..config()
            },
        );
        f.codec.open_decoder().unwrap();
        f.control.set_stalled(true);
        feed(&mut f.codec, 1);

        f.codec.set_speed(PlaybackRate::Paused).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::TryAgain);

        f.codec.set_speed(PlaybackRate::Normal).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(f.codec.get_picture(), Err(Error::Device(_))));
        assert_eq!(f.control.counters().resets, 1);
    }

    #[test]
    fn held_slots_are_not_a_stall() {
        let mut f = fixture_with(
            hints(),
            DecoderConfig {
                decoder_timeout: Duration::from_millis(10),
                ..config()
            },
        );
        f.codec.open_decoder().unwrap();
        feed(&mut f.codec, 5);
        let frames: Vec<_> = (0..4).map(|_| next_frame(&mut f.codec)).collect();

        // The client sits on every slot for longer than the decoder timeout.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::TryAgain);
        assert_eq!(f.control.counters().resets, 0);
        assert_eq!(f.codec.held_frames(), 4);

        f.codec.release_frame(frames[0].index, false).unwrap();
        assert_eq!(next_frame(&mut f.codec).pts, 4 * 3600);
        assert_eq!(f.control.counters().resets, 0);
    }

    #[test]
    fn held_slots_do_not_end_a_drain() {
        let mut f = fixture_with(
            hints(),
            DecoderConfig {
                decoder_timeout: Duration::from_millis(10),
                ..config()
            },
        );
        f.codec.open_decoder().unwrap();
        feed(&mut f.codec, 5);
        let frames: Vec<_> = (0..4).map(|_| next_frame(&mut f.codec)).collect();
        f.codec.set_drain(true).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::TryAgain);

        f.codec.release_frame(frames[0].index, false).unwrap();
        next_frame(&mut f.codec);
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::Eos);
    }

    #[test]
    fn failed_rate_leaves_session_closed() {
        let mut f = fixture_with(hints(), config());
        f.control.fail_pause(true);

        assert!(matches!(f.codec.open_decoder(), Err(Error::Device(_))));
        assert_eq!(f.codec.state(), DecoderState::Closed);
        assert!(!f.control.is_open());
        assert_eq!(f.output.log().shown, None);
        assert!(matches!(
            f.codec.add_data(&[0x00, 0x00, 0x01, 0x65], None, ms(0)),
            Err(Error::InvalidState(DecoderState::Closed))
        ));

        f.control.fail_pause(false);
        f.codec.open_decoder().unwrap();
        assert_eq!(f.codec.state(), DecoderState::Opened);
        assert_eq!(f.control.counters().opens, 2);
    }

    #[test]
    fn drain_returns_remaining_pictures_then_eos() {
        let mut f = opened();
        feed(&mut f.codec, 2);
        f.codec.set_drain(true).unwrap();
        assert_eq!(f.codec.state(), DecoderState::Draining);
        assert!(matches!(
            f.codec.add_data(&[0u8; 4], None, ms(80)),
            Err(Error::InvalidState(DecoderState::Draining))
        ));

        let first = next_frame(&mut f.codec);
        f.codec.release_frame(first.index, false).unwrap();
        next_frame(&mut f.codec);
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::Eos);

        f.codec.reset().unwrap();
        assert_eq!(f.codec.state(), DecoderState::Opened);
        assert_eq!(f.codec.buffer_index(), None);
    }

    #[test]
    fn prefill_gates_pictures() {
        let mut f = fixture_with(
            hints(),
            DecoderConfig {
                minimum_buffer_level: 50.0,
                ..config()
            },
        );
        f.codec.open_decoder().unwrap();
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::NeedData);
        feed(&mut f.codec, 1);
        assert_eq!(f.codec.get_picture().unwrap(), PictureStatus::NeedData);

        f.codec.set_drain(true).unwrap();
        next_frame(&mut f.codec);
    }

    #[test]
    fn close_drains_then_tears_down() {
        let mut f = opened();
        feed(&mut f.codec, 1);
        let frame = next_frame(&mut f.codec);
        f.codec.release_frame(frame.index, false).unwrap();

        assert_eq!(f.codec.close_decoder(), CloseOutcome::Drained);
        assert_eq!(f.codec.state(), DecoderState::Closed);
        assert!(!f.control.is_open());
        assert_eq!(f.output.log().shown, Some(false));
        assert_eq!(f.codec.close_decoder(), CloseOutcome::AlreadyClosed);
        assert!(matches!(
            f.codec.release_frame(frame.index, false),
            Err(Error::InvalidState(DecoderState::Closed))
        ));

        // The session can be opened again.
        f.codec.open_decoder().unwrap();
        assert_eq!(f.control.counters().opens, 2);
    }

    #[test]
    fn close_times_out_on_pending_data() {
        let mut f = opened();
        f.control.set_stalled(true);
        feed(&mut f.codec, 3);

        let start = Instant::now();
        assert_eq!(f.codec.close_decoder(), CloseOutcome::DrainTimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!f.control.is_open());
    }

    #[test]
    fn drop_releases_device() {
        let f = opened();
        let control = f.control.clone();
        drop(f);
        assert!(!control.is_open());
        assert_eq!(control.counters().closes, 1);
    }

    #[test]
    fn placement_is_dirty_checked() {
        let mut f = opened();
        let src = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let dst = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        for _ in 0..3 {
            f.codec.set_video_rect(src, dst);
            f.codec.set_video_zoom(1.0);
        }
        let log = f.output.log();
        assert_eq!(log.axis.len(), 1);
        assert_eq!(log.zoom, vec![100]);
    }

    #[test]
    fn video_rate_changes_fps() {
        let mut f = opened();
        f.codec.set_video_rate(3840);
        assert_eq!(f.codec.aml_duration(), 3600);
        assert_eq!(f.info.video_fps(), 25.0);

        f.cache.clear();
        f.codec.set_video_rate(3840);
        assert!(f.cache.updates().is_empty());
    }

    #[test]
    fn dolby_vision_base_layer() {
        let dovi = DoviStreamInfo {
            dv_profile: 8,
            bl_present: true,
            dv_bl_signal_compatibility_id: 1,
            ..Default::default()
        };
        let mut f = fixture_with(
            StreamHints {
                codec: EncodedFormat::H265,
                hdr_type: HdrType::DolbyVision,
                color_transfer: TransferCharacteristics::Smpte2084,
                bit_depth: 10,
                dovi: Some(dovi),
                ..hints()
            },
            config(),
        );
        f.codec.open_decoder().unwrap();

        assert_eq!(f.info.video_source_hdr_type(), HdrType::DolbyVision);
        assert_eq!(f.info.video_hdr_type(), HdrType::Hdr10);
        assert_eq!(f.info.video_source_dovi_stream_info(), dovi);
        assert_eq!(f.info.video_dovi_codec_fourcc(), "");
    }

    #[test]
    fn poll_device_follows_session() {
        let poll_device = Arc::new(PollDevice::new());
        let mut f = fixture_with(hints(), config());
        f.codec = f.codec.with_poll_device(poll_device.clone());
        f.codec.open_decoder().unwrap();
        // The simulated device has no descriptor to wait on.
        assert!(!poll_device.has_device());
        assert!(matches!(
            f.codec.poll_frame(Duration::from_millis(1)),
            Err(PollError::NoDevice)
        ));
    }

    #[test]
    fn closing_keeps_another_sessions_poll_device() {
        let poll_device = Arc::new(PollDevice::new());
        let own = Arc::new(EventFd::new().unwrap()) as PollDeviceHandle;
        let other = Arc::new(EventFd::new().unwrap()) as PollDeviceHandle;

        let mut codec = AmlCodec::new(
            hints(),
            Box::new(DummyBackend::new(1 << 16, 4).with_poll_handle(own.clone())),
            Box::new(DummyOutput::new()),
            Arc::new(StaticCapabilities::full_4k()),
            ProcessInfoFactory::new().create_instance(Default::default()),
            config(),
        )
        .with_poll_device(poll_device.clone());
        codec.open_decoder().unwrap();
        assert!(poll_device.has_device());

        // A newer session takes the device over before this one closes.
        poll_device.set_device(Some(other.clone()));
        codec.close_decoder();
        assert!(poll_device.has_device());
        assert!(poll_device.remove_device(&other));
    }

    #[test]
    fn closing_removes_own_poll_device() {
        let poll_device = Arc::new(PollDevice::new());
        let own = Arc::new(EventFd::new().unwrap()) as PollDeviceHandle;

        let mut codec = AmlCodec::new(
            hints(),
            Box::new(DummyBackend::new(1 << 16, 4).with_poll_handle(own)),
            Box::new(DummyOutput::new()),
            Arc::new(StaticCapabilities::full_4k()),
            ProcessInfoFactory::new().create_instance(Default::default()),
            config(),
        )
        .with_poll_device(poll_device.clone());
        codec.open_decoder().unwrap();
        assert_eq!(
            codec.poll_frame(Duration::from_millis(1)).unwrap(),
            PollOutcome::TimedOut
        );

        codec.close_decoder();
        assert!(!poll_device.has_device());
    }
}
