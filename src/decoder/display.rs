// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Placement of the hardware video layer.
//!
//! Reconfiguring the video layer is expensive and the render geometry is reported on every
//! frame, so the last applied values are kept and the hardware is only touched when they change.

use log::debug;

use crate::backend::BackendResult;
use crate::backend::Video3dMode;
use crate::backend::VideoOutput;
use crate::Rect;
use crate::Resolution;

const MIN_ZOOM_PERCENT: i32 = 50;
const MAX_ZOOM_PERCENT: i32 = 200;

/// How the user interface is rendered for stereoscopic displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StereoMode {
    #[default]
    Off,
    /// The GUI is drawn twice, one copy above the other.
    SplitHorizontal,
    /// The GUI is drawn twice, side by side.
    SplitVertical,
    /// Only one view of stereoscopic content is shown.
    Mono,
}

impl StereoMode {
    fn is_split(&self) -> bool {
        matches!(self, StereoMode::SplitHorizontal | StereoMode::SplitVertical)
    }
}

/// The eye a mono rendering of stereoscopic content shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StereoView {
    #[default]
    Off,
    Left,
    Right,
}

/// Frame packing of the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamStereo {
    #[default]
    Mono,
    SideBySide,
    TopBottom,
}

impl StreamStereo {
    /// Parses the stereo mode hint of the container.
    pub fn from_hint(mode: &str) -> Self {
        match mode {
            "left_right" | "right_left" | "block_lr" | "block_rl" => StreamStereo::SideBySide,
            "top_bottom" | "bottom_top" => StreamStereo::TopBottom,
            _ => StreamStereo::Mono,
        }
    }
}

/// The video layer with its last applied configuration.
pub struct DisplayPlacement {
    output: Box<dyn VideoOutput>,
    stream_stereo: StreamStereo,
    src_rect: Rect,
    dst_rect: Rect,
    stereo_mode: StereoMode,
    stereo_view: StereoView,
    gui_resolution: Resolution,
    display_resolution: Resolution,
    axis: Option<Rect>,
    zoom: Option<i32>,
    mode_3d: Option<Video3dMode>,
    shown: Option<bool>,
}

impl DisplayPlacement {
    pub fn new(output: Box<dyn VideoOutput>, stream_stereo: StreamStereo) -> Self {
        Self {
            output,
            stream_stereo,
            src_rect: Default::default(),
            dst_rect: Default::default(),
            stereo_mode: Default::default(),
            stereo_view: Default::default(),
            gui_resolution: Default::default(),
            display_resolution: Default::default(),
            axis: None,
            zoom: None,
            mode_3d: None,
            shown: None,
        }
    }

    pub fn set_stream_stereo(&mut self, stream_stereo: StreamStereo) -> BackendResult<()> {
        self.stream_stereo = stream_stereo;
        self.apply()
    }

    /// Places the video from the render geometry, `src` in picture and `dst` in GUI coordinates.
    pub fn set_video_rect(&mut self, src: Rect, dst: Rect) -> BackendResult<()> {
        self.src_rect = src;
        self.dst_rect = dst;
        self.apply()
    }

    pub fn set_stereo_mode(&mut self, mode: StereoMode, view: StereoView) -> BackendResult<()> {
        self.stereo_mode = mode;
        self.stereo_view = view;
        self.apply()
    }

    /// Sets the resolutions of the GUI and of the display the video layer is scanned out at.
    pub fn set_display_resolution(&mut self, gui: Resolution, display: Resolution) -> BackendResult<()> {
        self.gui_resolution = gui;
        self.display_resolution = display;
        self.apply()
    }

    /// Sets the zoom factor, 1.0 showing the picture unscaled.
    pub fn set_zoom(&mut self, zoom: f32) -> BackendResult<()> {
        let percent = ((zoom * 100.0).round() as i32).clamp(MIN_ZOOM_PERCENT, MAX_ZOOM_PERCENT);
        if self.zoom == Some(percent) {
            return Ok(());
        }

        self.output.set_zoom(percent)?;
        debug!("video zoom {}%", percent);
        self.zoom = Some(percent);

        Ok(())
    }

    pub fn show(&mut self, show: bool) -> BackendResult<()> {
        if self.shown == Some(show) {
            return Ok(());
        }

        self.output.show_video(show)?;
        self.shown = Some(show);

        Ok(())
    }

    pub fn output(&mut self) -> &mut dyn VideoOutput {
        self.output.as_mut()
    }

    pub fn src_rect(&self) -> Rect {
        self.src_rect
    }

    /// Position of the video layer in display pixels, once placed.
    pub fn axis(&self) -> Option<Rect> {
        self.axis
    }

    fn mode_3d(&self) -> Video3dMode {
        if self.stereo_mode.is_split() {
            return Video3dMode::Disabled;
        }

        let right = self.stereo_view == StereoView::Right;
        match self.stream_stereo {
            StreamStereo::Mono => Video3dMode::Disabled,
            StreamStereo::SideBySide => Video3dMode::SideBySideToMono { right },
            StreamStereo::TopBottom => Video3dMode::TopBottomToMono { right },
        }
    }

    fn target_axis(&self) -> Rect {
        let mut axis = self.dst_rect;

        // A split GUI gives the video half of the screen, the video layer spans the whole of it.
        match self.stereo_mode {
            StereoMode::SplitVertical => axis.x2 = axis.x1 + axis.width() * 2.0,
            StereoMode::SplitHorizontal => axis.y2 = axis.y1 + axis.height() * 2.0,
            _ => (),
        }

        let gui = self.gui_resolution;
        let display = self.display_resolution;
        if gui.width > 0 && gui.height > 0 && display.width > 0 && display.height > 0 && gui != display
        {
            let xscale = display.width as f32 / gui.width as f32;
            let yscale = display.height as f32 / gui.height as f32;
            axis = Rect::new(
                axis.x1 * xscale,
                axis.y1 * yscale,
                axis.x2 * xscale,
                axis.y2 * yscale,
            );
        }

        axis
    }

    fn apply(&mut self) -> BackendResult<()> {
        let mode = self.mode_3d();
        if self.mode_3d != Some(mode) {
            self.output.set_3d_mode(mode)?;
            debug!("video 3D mode {:?}", mode);
            self.mode_3d = Some(mode);
        }

        if self.dst_rect.is_empty() {
            return Ok(());
        }
        let axis = self.target_axis();
        if self.axis != Some(axis) {
            self.output.set_video_axis(axis)?;
            debug!(
                "video axis {},{} {}x{}",
                axis.x1,
                axis.y1,
                axis.width(),
                axis.height()
            );
            self.axis = Some(axis);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyOutput;

    fn placement(stereo: StreamStereo) -> (DisplayPlacement, DummyOutput) {
        let output = DummyOutput::new();
        (DisplayPlacement::new(Box::new(output.clone()), stereo), output)
    }

    #[test]
    fn unchanged_rect_is_not_reapplied() {
        let (mut placement, output) = placement(StreamStereo::Mono);
        let src = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let dst = Rect::new(0.0, 0.0, 1280.0, 720.0);

        placement.set_video_rect(src, dst).unwrap();
        placement.set_video_rect(src, dst).unwrap();
        assert_eq!(output.log().axis, vec![dst]);
        assert_eq!(output.log().modes_3d, vec![Video3dMode::Disabled]);

        let moved = Rect::new(10.0, 0.0, 1290.0, 720.0);
        placement.set_video_rect(src, moved).unwrap();
        assert_eq!(output.log().axis, vec![dst, moved]);
    }

    #[test]
    fn empty_rect_is_ignored() {
        let (mut placement, output) = placement(StreamStereo::Mono);
        placement.set_video_rect(Rect::default(), Rect::default()).unwrap();
        assert!(output.log().axis.is_empty());
        assert_eq!(placement.axis(), None);
    }

    #[test]
    fn rect_is_scaled_to_display() {
        let (mut placement, output) = placement(StreamStereo::Mono);
        placement
            .set_display_resolution((1920, 1080).into(), (3840, 2160).into())
            .unwrap();
        placement
            .set_video_rect(
                Rect::new(0.0, 0.0, 1920.0, 1080.0),
                Rect::new(0.0, 60.0, 1920.0, 1020.0),
            )
            .unwrap();
        assert_eq!(
            output.log().axis,
            vec![Rect::new(0.0, 120.0, 3840.0, 2040.0)]
        );
    }

    #[test]
    fn split_gui_doubles_rect_and_disables_3d() {
        let (mut placement, output) = placement(StreamStereo::SideBySide);
        placement
            .set_stereo_mode(StereoMode::SplitVertical, StereoView::Off)
            .unwrap();
        placement
            .set_video_rect(
                Rect::new(0.0, 0.0, 1920.0, 1080.0),
                Rect::new(0.0, 0.0, 960.0, 1080.0),
            )
            .unwrap();
        assert_eq!(output.log().axis, vec![Rect::new(0.0, 0.0, 1920.0, 1080.0)]);
        assert_eq!(output.log().modes_3d, vec![Video3dMode::Disabled]);
    }

    #[test]
    fn stereo_stream_on_mono_gui() {
        let (mut placement, output) = placement(StreamStereo::from_hint("top_bottom"));
        placement
            .set_stereo_mode(StereoMode::Mono, StereoView::Right)
            .unwrap();
        placement
            .set_stereo_mode(StereoMode::Mono, StereoView::Right)
            .unwrap();
        assert_eq!(
            output.log().modes_3d,
            vec![Video3dMode::TopBottomToMono { right: true }]
        );
        assert_eq!(StreamStereo::from_hint("mono"), StreamStereo::Mono);
    }

    #[test]
    fn zoom_is_clamped_and_cached() {
        let (mut placement, output) = placement(StreamStereo::Mono);
        placement.set_zoom(1.0).unwrap();
        placement.set_zoom(1.0).unwrap();
        placement.set_zoom(3.0).unwrap();
        placement.set_zoom(0.1).unwrap();
        assert_eq!(output.log().zoom, vec![100, 200, 50]);
    }

    #[test]
    fn show_is_cached() {
        let (mut placement, output) = placement(StreamStereo::Mono);
        placement.show(true).unwrap();
        placement.show(true).unwrap();
        assert_eq!(output.log().shown, Some(true));
        placement.show(false).unwrap();
        assert_eq!(output.log().shown, Some(false));
    }
}
