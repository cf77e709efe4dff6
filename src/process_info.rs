// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Registry of the decode, render and playback state of a playback session.
//!
//! The decode, render and control threads all write to the registry concurrently. The values are
//! split in five domains (video codec, audio codec, render, player state and settings), each
//! behind its own lock. A setter takes exactly one of these locks, and forwards the new value to
//! the attached [`DataCache`] before releasing it, so that the cache observes the updates of a
//! domain in the order they were made.

pub mod cache;
pub mod deinterlace;
pub mod factory;
pub mod platform;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;
use std::time::SystemTime;

use log::debug;

pub use cache::CacheUpdate;
pub use cache::DataCache;
pub use deinterlace::DeinterlaceCatalogue;
pub use deinterlace::DeinterlaceMethod;
pub use factory::create_instance;
pub use factory::register_process_control;
pub use factory::CreateProcessControl;
pub use factory::ProcessInfoFactory;
pub use platform::Platform;

use crate::config::PlayerSettings;
use crate::metadata::ColorPrimaries;
use crate::metadata::ColorRange;
use crate::metadata::ColorSpace;
use crate::metadata::DoviFrameMetadata;
use crate::metadata::DoviStreamInfo;
use crate::metadata::DoviStreamMetadata;
use crate::metadata::DtsXType;
use crate::metadata::HdrStaticMetadata;
use crate::metadata::HdrType;
use crate::metadata::PixelFormat;
use crate::metadata::TransferCharacteristics;
use crate::metadata::Vs10Mode;

/// Locks `mutex`, recovering the data of a poisoned lock. Setters never fail.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const UNKNOWN: &str = "unknown";

struct VideoCodecInfo {
    pts: f64,
    is_hw: bool,
    decoder_name: String,
    deint_method: String,
    pixel_format: String,
    stereo_mode: String,
    width: u32,
    height: u32,
    fps: f32,
    dar: f32,
    bit_depth: u32,
    hdr_type: HdrType,
    source_hdr_type: HdrType,
    source_additional_hdr_type: HdrType,
    color_space: ColorSpace,
    color_range: ColorRange,
    color_primaries: ColorPrimaries,
    color_transfer: TransferCharacteristics,
    dovi_frame_metadata: DoviFrameMetadata,
    dovi_stream_metadata: DoviStreamMetadata,
    dovi_stream_info: DoviStreamInfo,
    source_dovi_stream_info: DoviStreamInfo,
    dovi_codec_fourcc: String,
    hdr_static_metadata: HdrStaticMetadata,
    vs10_mode: Vs10Mode,
    live_bitrate: f64,
    queue_level: i32,
    queue_data_level: i32,
    interlaced: bool,
    deinterlace: DeinterlaceCatalogue,
    pix_formats: Vec<PixelFormat>,
}

impl Default for VideoCodecInfo {
    fn default() -> Self {
        Self {
            pts: 0.0,
            is_hw: false,
            decoder_name: UNKNOWN.into(),
            deint_method: UNKNOWN.into(),
            pixel_format: UNKNOWN.into(),
            stereo_mode: String::new(),
            width: 0,
            height: 0,
            fps: 0.0,
            dar: 0.0,
            bit_depth: 0,
            hdr_type: HdrType::None,
            source_hdr_type: HdrType::None,
            source_additional_hdr_type: HdrType::None,
            color_space: ColorSpace::Unspecified,
            color_range: ColorRange::Unspecified,
            color_primaries: ColorPrimaries::Unspecified,
            color_transfer: TransferCharacteristics::Unspecified,
            dovi_frame_metadata: Default::default(),
            dovi_stream_metadata: Default::default(),
            dovi_stream_info: Default::default(),
            source_dovi_stream_info: Default::default(),
            dovi_codec_fourcc: String::new(),
            hdr_static_metadata: Default::default(),
            vs10_mode: Vs10Mode::Bypass,
            live_bitrate: 0.0,
            queue_level: 0,
            queue_data_level: 0,
            interlaced: false,
            deinterlace: Default::default(),
            pix_formats: Vec::new(),
        }
    }
}

impl VideoCodecInfo {
    /// Every value mirrored to the cache.
    fn cache_updates(&self) -> Vec<CacheUpdate> {
        vec![
            CacheUpdate::VideoPts(self.pts),
            CacheUpdate::VideoDecoderName {
                name: self.decoder_name.clone(),
                is_hw: self.is_hw,
            },
            CacheUpdate::VideoDeintMethod(self.deint_method.clone()),
            CacheUpdate::VideoPixelFormat(self.pixel_format.clone()),
            CacheUpdate::VideoDimensions {
                width: self.width,
                height: self.height,
            },
            CacheUpdate::VideoFps(self.fps),
            CacheUpdate::VideoDar(self.dar),
            CacheUpdate::VideoStereoMode(self.stereo_mode.clone()),
            CacheUpdate::VideoBitDepth(self.bit_depth),
            CacheUpdate::VideoHdrType(self.hdr_type),
            CacheUpdate::VideoSourceHdrType(self.source_hdr_type),
            CacheUpdate::VideoSourceAdditionalHdrType(self.source_additional_hdr_type),
            CacheUpdate::VideoColorSpace(self.color_space),
            CacheUpdate::VideoColorRange(self.color_range),
            CacheUpdate::VideoColorPrimaries(self.color_primaries),
            CacheUpdate::VideoColorTransferCharacteristic(self.color_transfer),
            CacheUpdate::VideoDoviFrameMetadata(self.dovi_frame_metadata),
            CacheUpdate::VideoDoviStreamMetadata(self.dovi_stream_metadata),
            CacheUpdate::VideoDoviStreamInfo(self.dovi_stream_info),
            CacheUpdate::VideoSourceDoviStreamInfo(self.source_dovi_stream_info),
            CacheUpdate::VideoDoviCodecFourcc(self.dovi_codec_fourcc.clone()),
            CacheUpdate::VideoHdrStaticMetadata(self.hdr_static_metadata),
            CacheUpdate::VideoVs10Mode(self.vs10_mode),
            CacheUpdate::VideoLiveBitRate(self.live_bitrate),
            CacheUpdate::VideoQueueLevel(self.queue_level),
            CacheUpdate::VideoQueueDataLevel(self.queue_data_level),
            CacheUpdate::VideoInterlaced(self.interlaced),
        ]
    }
}

struct AudioCodecInfo {
    decoder_name: String,
    channels: String,
    sample_rate: u32,
    bits_per_sample: u32,
    is_dolby_atmos: bool,
    dtsx_type: DtsXType,
    live_bitrate: f64,
    queue_level: i32,
    queue_data_level: i32,
}

impl Default for AudioCodecInfo {
    fn default() -> Self {
        Self {
            decoder_name: UNKNOWN.into(),
            channels: UNKNOWN.into(),
            sample_rate: 0,
            bits_per_sample: 0,
            is_dolby_atmos: false,
            dtsx_type: DtsXType::None,
            live_bitrate: 0.0,
            queue_level: 0,
            queue_data_level: 0,
        }
    }
}

/// What the renderer can do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderInfo {
    pub formats: Vec<PixelFormat>,
    pub max_buffer_size: u32,
    pub optimal_buffer_size: u32,
    /// Pictures are handed over as opaque hardware references.
    pub opaque: bool,
    pub deinterlace_methods: Vec<DeinterlaceMethod>,
}

/// Occupancy of the render queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderBuffers {
    pub queued: u32,
    pub discard: u32,
    pub free: u32,
}

#[derive(Default)]
struct RenderState {
    clock_sync: bool,
    info: RenderInfo,
    buffers: RenderBuffers,
    gui_layer: bool,
    video_layer: bool,
}

/// Playback time range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayTimes {
    pub start: SystemTime,
    /// Current, minimum and maximum times, in milliseconds.
    pub current: i64,
    pub min: i64,
    pub max: i64,
}

impl Default for PlayTimes {
    fn default() -> Self {
        Self {
            start: SystemTime::UNIX_EPOCH,
            current: 0,
            min: 0,
            max: 0,
        }
    }
}

struct PlayerState {
    seeking: bool,
    realtime: bool,
    speed: f32,
    new_speed: f32,
    tempo: f32,
    new_tempo: f32,
    frame_advance: bool,
    play_times: PlayTimes,
    level_vq: i32,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            seeking: false,
            realtime: false,
            speed: 1.0,
            new_speed: 1.0,
            tempo: 1.0,
            new_tempo: 1.0,
            frame_advance: false,
            play_times: Default::default(),
            level_vq: 0,
        }
    }
}

/// Per-stream video settings chosen by the user.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoSettings {
    pub interlace_method: DeinterlaceMethod,
    pub view_mode: i32,
    pub custom_zoom_amount: f32,
    pub custom_pixel_ratio: f32,
    pub custom_vertical_shift: f32,
    pub custom_non_linear_stretch: bool,
    pub brightness: f32,
    pub contrast: f32,
    pub gamma: f32,
    pub sharpness: f32,
    pub noise_reduction: f32,
    pub stereo_invert: bool,
    pub audio_delay: f32,
    pub subtitle_delay: f32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            interlace_method: DeinterlaceMethod::Auto,
            view_mode: 0,
            custom_zoom_amount: 1.0,
            custom_pixel_ratio: 1.0,
            custom_vertical_shift: 0.0,
            custom_non_linear_stretch: false,
            brightness: 50.0,
            contrast: 50.0,
            gamma: 20.0,
            sharpness: 0.0,
            noise_reduction: 0.0,
            stereo_invert: false,
            audio_delay: 0.0,
            subtitle_delay: 0.0,
        }
    }
}

struct Settings {
    video: VideoSettings,
    player: PlayerSettings,
}

/// Generates a setter publishing the new value and a getter, both on a single domain.
macro_rules! accessors {
    ($domain:ident: $($(#[$meta:meta])* $field:ident: $ty:ty, $setter:ident, $getter:ident => $update:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $setter(&self, value: impl Into<$ty>) {
                let value: $ty = value.into();
                let mut domain = lock(&self.$domain);
                domain.$field = value.clone();
                self.publish(CacheUpdate::$update(value));
            }

            pub fn $getter(&self) -> $ty {
                lock(&self.$domain).$field.clone()
            }
        )*
    };
}

/// Aggregated state of a playback session.
pub struct ProcessInfo {
    platform: Box<dyn Platform>,
    cache: RwLock<Option<Arc<dyn DataCache>>>,
    video: Mutex<VideoCodecInfo>,
    audio: Mutex<AudioCodecInfo>,
    render: Mutex<RenderState>,
    state: Mutex<PlayerState>,
    settings: Mutex<Settings>,
}

impl ProcessInfo {
    pub(crate) fn new(platform: Box<dyn Platform>, player_settings: PlayerSettings) -> Self {
        Self {
            platform,
            cache: RwLock::new(None),
            video: Default::default(),
            audio: Default::default(),
            render: Default::default(),
            state: Default::default(),
            settings: Mutex::new(Settings {
                video: Default::default(),
                player: player_settings,
            }),
        }
    }

    /// Forwards `update` to the cache, if one is attached. Called with the domain lock held.
    fn publish(&self, update: CacheUpdate) {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = cache.as_ref() {
            cache.update(update);
        }
    }

    pub fn platform_name(&self) -> &'static str {
        self.platform.name()
    }

    /// Attaches the cache and brings it up to date with a fresh video state and hidden layers.
    pub fn set_data_cache(&self, cache: Arc<dyn DataCache>) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(cache);

        self.reset_video_codec_info();
        let mut render = lock(&self.render);
        render.gui_layer = false;
        render.video_layer = false;
        self.publish(CacheUpdate::GuiRender(false));
        self.publish(CacheUpdate::VideoRender(false));
    }

    // Video codec.

    /// Restores every video value to its default, including the deinterlacing catalogue, and
    /// ends seeking.
    pub fn reset_video_codec_info(&self) {
        {
            let mut video = lock(&self.video);
            *video = Default::default();
            for update in video.cache_updates() {
                self.publish(update);
            }
        }
        self.set_state_seeking(false);
    }

    accessors! { video:
        pts: f64, set_video_pts, video_pts => VideoPts;
        deint_method: String, set_video_deint_method, video_deint_method => VideoDeintMethod;
        pixel_format: String, set_video_pixel_format, video_pixel_format => VideoPixelFormat;
        stereo_mode: String, set_video_stereo_mode, video_stereo_mode => VideoStereoMode;
        fps: f32, set_video_fps, video_fps => VideoFps;
        dar: f32, set_video_dar, video_dar => VideoDar;
        bit_depth: u32, set_video_bit_depth, video_bit_depth => VideoBitDepth;
        hdr_type: HdrType, set_video_hdr_type, video_hdr_type => VideoHdrType;
        source_hdr_type: HdrType, set_video_source_hdr_type, video_source_hdr_type
            => VideoSourceHdrType;
        source_additional_hdr_type: HdrType, set_video_source_additional_hdr_type,
            video_source_additional_hdr_type => VideoSourceAdditionalHdrType;
        color_space: ColorSpace, set_video_color_space, video_color_space => VideoColorSpace;
        color_range: ColorRange, set_video_color_range, video_color_range => VideoColorRange;
        color_primaries: ColorPrimaries, set_video_color_primaries, video_color_primaries
            => VideoColorPrimaries;
        color_transfer: TransferCharacteristics, set_video_color_transfer_characteristic,
            video_color_transfer_characteristic => VideoColorTransferCharacteristic;
        dovi_frame_metadata: DoviFrameMetadata, set_video_dovi_frame_metadata,
            video_dovi_frame_metadata => VideoDoviFrameMetadata;
        dovi_stream_metadata: DoviStreamMetadata, set_video_dovi_stream_metadata,
            video_dovi_stream_metadata => VideoDoviStreamMetadata;
        dovi_stream_info: DoviStreamInfo, set_video_dovi_stream_info, video_dovi_stream_info
            => VideoDoviStreamInfo;
        source_dovi_stream_info: DoviStreamInfo, set_video_source_dovi_stream_info,
            video_source_dovi_stream_info => VideoSourceDoviStreamInfo;
        dovi_codec_fourcc: String, set_video_dovi_codec_fourcc, video_dovi_codec_fourcc
            => VideoDoviCodecFourcc;
        hdr_static_metadata: HdrStaticMetadata, set_video_hdr_static_metadata,
            video_hdr_static_metadata => VideoHdrStaticMetadata;
        vs10_mode: Vs10Mode, set_video_vs10_mode, video_vs10_mode => VideoVs10Mode;
        live_bitrate: f64, set_video_live_bitrate, video_live_bitrate => VideoLiveBitRate;
        /// Fill level of the decoder input queue, in percent.
        queue_level: i32, set_video_queue_level, video_queue_level => VideoQueueLevel;
        /// Fill level of the decoder data buffer, in percent.
        queue_data_level: i32, set_video_queue_data_level, video_queue_data_level
            => VideoQueueDataLevel;
        interlaced: bool, set_video_interlaced, video_interlaced => VideoInterlaced;
    }

    pub fn set_video_decoder_name(&self, name: impl Into<String>, is_hw: bool) {
        let mut video = lock(&self.video);
        video.decoder_name = name.into();
        video.is_hw = is_hw;
        self.publish(CacheUpdate::VideoDecoderName {
            name: video.decoder_name.clone(),
            is_hw,
        });
    }

    pub fn video_decoder_name(&self) -> String {
        lock(&self.video).decoder_name.clone()
    }

    pub fn is_video_hw_decoder(&self) -> bool {
        lock(&self.video).is_hw
    }

    pub fn set_video_dimensions(&self, width: u32, height: u32) {
        let mut video = lock(&self.video);
        video.width = width;
        video.height = height;
        self.publish(CacheUpdate::VideoDimensions { width, height });
    }

    pub fn video_dimensions(&self) -> (u32, u32) {
        let video = lock(&self.video);
        (video.width, video.height)
    }

    /// Sets the methods the decoder offers. The methods of the renderer are appended and
    /// [`DeinterlaceMethod::None`] is always offered.
    pub fn update_deinterlacing_methods(&self, methods: &[DeinterlaceMethod]) {
        let render_methods = lock(&self.render).info.deinterlace_methods.clone();
        lock(&self.video)
            .deinterlace
            .update(methods, &render_methods);
    }

    /// Offers the methods of the software deinterlacer.
    pub fn set_sw_deinterlacing_methods(&self) {
        self.update_deinterlacing_methods(&[
            DeinterlaceMethod::None,
            DeinterlaceMethod::Deinterlace,
            DeinterlaceMethod::DeinterlaceHalf,
        ]);
        self.set_deinterlacing_method_default(DeinterlaceMethod::Deinterlace);
    }

    pub fn supports(&self, method: DeinterlaceMethod) -> bool {
        lock(&self.video).deinterlace.supports(method)
    }

    pub fn deinterlacing_methods(&self) -> Vec<DeinterlaceMethod> {
        lock(&self.video).deinterlace.methods().to_vec()
    }

    pub fn set_deinterlacing_method_default(&self, method: DeinterlaceMethod) {
        lock(&self.video).deinterlace.set_default_method(method);
    }

    pub fn deinterlacing_method_default(&self) -> DeinterlaceMethod {
        lock(&self.video).deinterlace.default_method()
    }

    pub fn fallback_deinterlace_method(&self) -> DeinterlaceMethod {
        self.platform.fallback_deinterlace_method()
    }

    /// Formats announced by the decoder, or the render formats when it announced none.
    pub fn pix_formats(&self) -> Vec<PixelFormat> {
        let formats = lock(&self.video).pix_formats.clone();
        if formats.is_empty() {
            self.render_formats()
        } else {
            formats
        }
    }

    pub fn set_pix_formats(&self, formats: Vec<PixelFormat>) {
        lock(&self.video).pix_formats = formats;
    }

    // Audio codec.

    pub fn reset_audio_codec_info(&self) {
        let mut audio = lock(&self.audio);
        *audio = Default::default();
        self.publish(CacheUpdate::AudioDecoderName(audio.decoder_name.clone()));
        self.publish(CacheUpdate::AudioChannels(audio.channels.clone()));
        self.publish(CacheUpdate::AudioSampleRate(audio.sample_rate));
        self.publish(CacheUpdate::AudioBitsPerSample(audio.bits_per_sample));
        self.publish(CacheUpdate::AudioIsDolbyAtmos(audio.is_dolby_atmos));
        self.publish(CacheUpdate::AudioDtsXType(audio.dtsx_type));
        self.publish(CacheUpdate::AudioLiveBitRate(audio.live_bitrate));
        self.publish(CacheUpdate::AudioQueueLevel(audio.queue_level));
        self.publish(CacheUpdate::AudioQueueDataLevel(audio.queue_data_level));
    }

    accessors! { audio:
        decoder_name: String, set_audio_decoder_name, audio_decoder_name => AudioDecoderName;
        channels: String, set_audio_channels, audio_channels => AudioChannels;
        sample_rate: u32, set_audio_sample_rate, audio_sample_rate => AudioSampleRate;
        bits_per_sample: u32, set_audio_bits_per_sample, audio_bits_per_sample
            => AudioBitsPerSample;
        is_dolby_atmos: bool, set_audio_is_dolby_atmos, audio_is_dolby_atmos
            => AudioIsDolbyAtmos;
        dtsx_type: DtsXType, set_audio_dtsx_type, audio_dtsx_type => AudioDtsXType;
        live_bitrate: f64, set_audio_live_bitrate, audio_live_bitrate => AudioLiveBitRate;
        queue_level: i32, set_audio_queue_level, audio_queue_level => AudioQueueLevel;
        queue_data_level: i32, set_audio_queue_data_level, audio_queue_data_level
            => AudioQueueDataLevel;
    }

    pub fn allow_dts_hd_decode(&self) -> bool {
        self.platform.allow_dts_hd_decode()
    }

    // Render.

    accessors! { render:
        clock_sync: bool, set_render_clock_sync, is_render_clock_sync => RenderClockSync;
    }

    /// Stores what the renderer can do, and offers its deinterlacing methods.
    pub fn update_render_info(&self, info: RenderInfo) {
        let methods = info.deinterlace_methods.clone();
        lock(&self.render).info = info;
        lock(&self.video).deinterlace.merge(&methods);
    }

    pub fn render_info(&self) -> RenderInfo {
        lock(&self.render).info.clone()
    }

    pub fn update_render_buffers(&self, queued: u32, discard: u32, free: u32) {
        lock(&self.render).buffers = RenderBuffers {
            queued,
            discard,
            free,
        };
    }

    pub fn render_buffers(&self) -> RenderBuffers {
        lock(&self.render).buffers
    }

    pub fn render_formats(&self) -> Vec<PixelFormat> {
        self.platform.render_formats()
    }

    /// Shows or hides the GUI layer. The cache only hears about actual changes.
    pub fn set_gui_render(&self, gui: bool) {
        let mut render = lock(&self.render);
        if render.gui_layer != gui {
            render.gui_layer = gui;
            self.publish(CacheUpdate::GuiRender(gui));
        }
    }

    pub fn gui_render(&self) -> bool {
        lock(&self.render).gui_layer
    }

    /// Shows or hides the video layer. The cache only hears about actual changes.
    pub fn set_video_render(&self, video: bool) {
        let mut render = lock(&self.render);
        if render.video_layer != video {
            render.video_layer = video;
            self.publish(CacheUpdate::VideoRender(video));
        }
    }

    pub fn video_render(&self) -> bool {
        lock(&self.render).video_layer
    }

    // Player state.

    accessors! { state:
        seeking: bool, set_state_seeking, is_seeking => StateSeeking;
        frame_advance: bool, set_frame_advance, is_frame_advance => FrameAdvance;
    }

    pub fn seek_finished(&self, offset: i64) {
        let _state = lock(&self.state);
        self.publish(CacheUpdate::SeekFinished(offset));
    }

    pub fn set_state_realtime(&self, realtime: bool) {
        lock(&self.state).realtime = realtime;
    }

    pub fn is_realtime_stream(&self) -> bool {
        lock(&self.state).realtime
    }

    /// Commits `speed`, which also becomes the pending speed.
    pub fn set_speed(&self, speed: f32) {
        let mut state = lock(&self.state);
        state.speed = speed;
        state.new_speed = speed;
        self.publish_speed(&state);
    }

    /// Requests `speed` without committing it.
    pub fn set_new_speed(&self, speed: f32) {
        let mut state = lock(&self.state);
        state.new_speed = speed;
        self.publish_speed(&state);
    }

    pub fn speed(&self) -> f32 {
        lock(&self.state).speed
    }

    pub fn new_speed(&self) -> f32 {
        lock(&self.state).new_speed
    }

    /// Commits `tempo`, which also becomes the pending tempo.
    pub fn set_tempo(&self, tempo: f32) {
        let mut state = lock(&self.state);
        state.tempo = tempo;
        state.new_tempo = tempo;
        self.publish_speed(&state);
    }

    /// Requests `tempo` without committing it.
    pub fn set_new_tempo(&self, tempo: f32) {
        let mut state = lock(&self.state);
        state.new_tempo = tempo;
        self.publish_speed(&state);
    }

    pub fn tempo(&self) -> f32 {
        lock(&self.state).tempo
    }

    pub fn new_tempo(&self) -> f32 {
        lock(&self.state).new_tempo
    }

    fn publish_speed(&self, state: &PlayerState) {
        self.publish(CacheUpdate::Speed {
            tempo: state.new_tempo,
            speed: state.new_speed,
        });
    }

    pub fn min_tempo(&self) -> f32 {
        self.platform.min_tempo()
    }

    /// Highest tempo, the platform maximum extended by the configured one.
    pub fn max_tempo(&self) -> f32 {
        let configured = lock(&self.settings).player.max_tempo;
        self.platform.max_tempo().max(configured)
    }

    pub fn is_tempo_allowed(&self, tempo: f32) -> bool {
        let configured = lock(&self.settings).player.max_tempo;
        tempo > self.platform.min_tempo()
            && (tempo < self.platform.max_tempo() || tempo < configured)
    }

    /// Brings `tempo` within the allowed range.
    pub fn clamp_tempo(&self, tempo: f32) -> f32 {
        tempo.clamp(self.min_tempo(), self.max_tempo())
    }

    pub fn set_play_times(&self, start: SystemTime, current: i64, min: i64, max: i64) {
        let mut state = lock(&self.state);
        state.play_times = PlayTimes {
            start,
            current,
            min,
            max,
        };
        self.publish(CacheUpdate::PlayTimes {
            start,
            current,
            min,
            max,
        });
    }

    pub fn play_times(&self) -> PlayTimes {
        lock(&self.state).play_times
    }

    pub fn max_time(&self) -> i64 {
        lock(&self.state).play_times.max
    }

    pub fn set_level_vq(&self, level: i32) {
        lock(&self.state).level_vq = level;
    }

    pub fn level_vq(&self) -> i32 {
        lock(&self.state).level_vq
    }

    // Settings.

    pub fn video_settings(&self) -> VideoSettings {
        lock(&self.settings).video.clone()
    }

    pub fn set_video_settings(&self, settings: VideoSettings) {
        lock(&self.settings).video = settings;
    }

    /// Changes the video settings in place, under the settings lock.
    pub fn update_video_settings<R>(&self, f: impl FnOnce(&mut VideoSettings) -> R) -> R {
        f(&mut lock(&self.settings).video)
    }

    pub fn player_settings(&self) -> PlayerSettings {
        lock(&self.settings).player.clone()
    }

    pub fn set_player_settings(&self, settings: PlayerSettings) {
        debug!("player settings: {:?}", settings);
        lock(&self.settings).player = settings;
    }

    pub fn max_passthrough_offsync_duration(&self) -> Duration {
        lock(&self.settings).player.max_passthrough_offsync_duration
    }
}
