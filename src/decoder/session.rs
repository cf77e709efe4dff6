// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ownership of the hardware decoder device.

use std::sync::Arc;

use log::debug;
use log::info;
use log::warn;

use crate::backend::BackendResult;
use crate::backend::DecoderBackend;
use crate::backend::OpenParams;
use crate::backend::VideoOutput;
use crate::capabilities::check_stream_support;
use crate::capabilities::HardwareCapabilities;
use crate::decoder::Error;
use crate::decoder::Result;
use crate::decoder::StreamHints;
use crate::metadata::HdrType;

/// An opened (or closed) hardware decode context.
///
/// The device is released when the session is closed or dropped, whichever comes first.
pub struct DeviceSession {
    backend: Box<dyn DecoderBackend>,
    caps: Arc<dyn HardwareCapabilities>,
    params: Option<OpenParams>,
}

impl DeviceSession {
    pub fn new(backend: Box<dyn DecoderBackend>, caps: Arc<dyn HardwareCapabilities>) -> Self {
        Self {
            backend,
            caps,
            params: None,
        }
    }

    /// Checks `hints` against the hardware limits and configures the device for them. An opened
    /// session is closed first.
    pub fn open(&mut self, hints: &StreamHints) -> Result<()> {
        check_stream_support(self.caps.as_ref(), hints)?;
        self.close();

        let params = OpenParams {
            codec: hints.codec,
            coded_resolution: hints.resolution(),
            video_rate: hints.video_rate(),
            bit_depth: hints.bit_depth,
            pts_invalid: hints.pts_invalid,
            dolby_vision: hints.hdr_type == HdrType::DolbyVision && self.caps.support_dolby_vision(),
        };
        self.backend.open(&params).map_err(Error::Device)?;
        info!(
            "opened {} decoder for {}x{}, video rate {}",
            params.codec.name(),
            params.coded_resolution.width,
            params.coded_resolution.height,
            params.video_rate
        );
        self.params = Some(params);

        Ok(())
    }

    /// Releases the device. Does nothing on a closed session.
    pub fn close(&mut self) {
        if let Some(params) = self.params.take() {
            self.backend.close();
            info!("closed {} decoder", params.codec.name());
        }
    }

    /// Drops the pending data and pictures of the device.
    pub fn reset(&mut self) -> BackendResult<()> {
        debug!("resetting decoder device");
        self.backend.reset()
    }

    pub fn is_open(&self) -> bool {
        self.params.is_some()
    }

    /// Parameters the device was opened with.
    pub fn params(&self) -> Option<&OpenParams> {
        self.params.as_ref()
    }

    pub fn backend(&mut self) -> &mut dyn DecoderBackend {
        self.backend.as_mut()
    }

    pub fn capabilities(&self) -> &dyn HardwareCapabilities {
        self.caps.as_ref()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Enables the `vadj1` picture quality stage of the video post-processor.
///
/// The stage is shared by everything shown on the video layer, so a failure only gets logged.
pub fn enable_vadj1(output: &mut dyn VideoOutput) -> bool {
    match output.enable_vadj1() {
        Ok(()) => {
            debug!("vadj1 enabled");
            true
        }
        Err(e) => {
            warn!("failed to enable vadj1: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::dummy::DummyOutput;
    use crate::capabilities::StaticCapabilities;
    use crate::EncodedFormat;

    fn hints(width: u32, height: u32) -> StreamHints {
        StreamHints {
            codec: EncodedFormat::H265,
            width,
            height,
            fps_rate: 25,
            fps_scale: 1,
            ..Default::default()
        }
    }

    fn session() -> (DeviceSession, crate::backend::dummy::DummyControl) {
        let backend = DummyBackend::default();
        let control = backend.control();
        let session = DeviceSession::new(
            Box::new(backend),
            Arc::new(StaticCapabilities::full_4k()),
        );
        (session, control)
    }

    #[test]
    fn open_configures_backend() {
        let (mut session, control) = session();
        session.open(&hints(3840, 2160)).unwrap();
        assert!(session.is_open());
        let params = control.counters().last_params.unwrap();
        assert_eq!(params.coded_resolution, (3840, 2160).into());
        // 96000 / 25
        assert_eq!(params.video_rate, 3840);
        assert!(!params.dolby_vision);
    }

    #[test]
    fn unsupported_stream_keeps_session_closed() {
        let (mut session, control) = session();
        let err = session.open(&hints(7680, 4320)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedStream(_)));
        assert!(!session.is_open());
        assert_eq!(control.counters().opens, 0);
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let (mut session, control) = session();
        session.open(&hints(1920, 1080)).unwrap();
        session.close();
        session.close();
        assert_eq!(control.counters().closes, 1);

        session.open(&hints(1920, 1080)).unwrap();
        drop(session);
        assert_eq!(control.counters().closes, 2);
        assert!(!control.is_open());
    }

    #[test]
    fn reopen_closes_first() {
        let (mut session, control) = session();
        session.open(&hints(1920, 1080)).unwrap();
        session.open(&hints(1280, 720)).unwrap();
        let counters = control.counters();
        assert_eq!((counters.opens, counters.closes), (2, 1));
    }

    #[test]
    fn vadj1_failure_is_not_fatal() {
        let mut output = DummyOutput::new();
        assert!(enable_vadj1(&mut output));
        output.set_fail_vadj1(true);
        assert!(!enable_vadj1(&mut output));
        assert_eq!(output.log().vadj1_enabled, 1);
    }
}
