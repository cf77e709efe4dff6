// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend simulating the decoder device, so the session logic can be
//! run and tested without hardware. Faults can be injected through [`DummyControl`].

use std::collections::VecDeque;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::trace;
use nix::errno::Errno;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::BufferStatus;
use crate::backend::DecoderBackend;
use crate::backend::DequeuedFrame;
use crate::backend::OpenParams;
use crate::backend::Video3dMode;
use crate::backend::VideoOutput;
use crate::Rect;

/// Calls received by the dummy backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DummyCounters {
    pub opens: u32,
    pub closes: u32,
    pub resets: u32,
    pub writes: u32,
    pub bytes_written: usize,
    /// Released slots with their drop flag, in release order.
    pub queued: Vec<(u32, bool)>,
    pub trick_mode: bool,
    pub paused: bool,
    pub last_params: Option<OpenParams>,
}

#[derive(Debug)]
struct DummyState {
    opened: bool,
    buffer_size: usize,
    data_len: usize,
    /// Units written but not decoded yet, with their size.
    pending: VecDeque<(u64, usize)>,
    free_slots: VecDeque<u32>,
    num_slots: u32,
    interlaced: bool,
    fail_writes: u32,
    fail_dequeues: u32,
    fail_pause: bool,
    stalled: bool,
    max_write: Option<usize>,
    counters: DummyCounters,
}

impl DummyState {
    fn new(buffer_size: usize, num_slots: u32) -> Self {
        Self {
            opened: false,
            buffer_size,
            data_len: 0,
            pending: VecDeque::new(),
            free_slots: (0..num_slots).collect(),
            num_slots,
            interlaced: false,
            fail_writes: 0,
            fail_dequeues: 0,
            fail_pause: false,
            stalled: false,
            max_write: None,
            counters: Default::default(),
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.data_len = 0;
        self.free_slots = (0..self.num_slots).collect();
    }
}

/// Handle on the simulated device, kept by tests after the backend moved into the decoder.
#[derive(Debug, Clone)]
pub struct DummyControl(Arc<Mutex<DummyState>>);

impl DummyControl {
    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` writes fail.
    pub fn fail_writes(&self, count: u32) {
        self.lock().fail_writes = count;
    }

    /// Makes the next `count` dequeues fail.
    pub fn fail_dequeues(&self, count: u32) {
        self.lock().fail_dequeues = count;
    }

    /// Makes pausing and resuming fail until cleared.
    pub fn fail_pause(&self, fail: bool) {
        self.lock().fail_pause = fail;
    }

    /// A stalled decoder accepts data but never produces pictures.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Limits how many bytes a single write accepts.
    pub fn set_max_write(&self, max_write: Option<usize>) {
        self.lock().max_write = max_write;
    }

    pub fn set_interlaced(&self, interlaced: bool) {
        self.lock().interlaced = interlaced;
    }

    pub fn counters(&self) -> DummyCounters {
        self.lock().counters.clone()
    }

    pub fn free_slots(&self) -> usize {
        self.lock().free_slots.len()
    }

    pub fn buffered_units(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().opened
    }
}

/// Simulated decoder: every written unit turns into one picture as long as a frame slot is free.
pub struct DummyBackend {
    state: DummyControl,
    poll_handle: Option<Arc<dyn AsFd + Send + Sync>>,
}

impl DummyBackend {
    pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;
    pub const DEFAULT_FRAME_SLOTS: u32 = 8;

    pub fn new(buffer_size: usize, num_slots: u32) -> Self {
        Self {
            state: DummyControl(Arc::new(Mutex::new(DummyState::new(buffer_size, num_slots)))),
            poll_handle: None,
        }
    }

    /// Hands out `handle` as the descriptor signalling ready pictures.
    pub fn with_poll_handle(mut self, handle: Arc<dyn AsFd + Send + Sync>) -> Self {
        self.poll_handle = Some(handle);
        self
    }

    pub fn control(&self) -> DummyControl {
        self.state.clone()
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUFFER_SIZE, Self::DEFAULT_FRAME_SLOTS)
    }
}

impl DecoderBackend for DummyBackend {
    fn open(&mut self, params: &OpenParams) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.opened {
            return Err(Errno::EBUSY.into());
        }
        state.flush();
        state.opened = true;
        state.counters.opens += 1;
        state.counters.last_params = Some(params.clone());

        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.opened {
            state.opened = false;
            state.counters.closes += 1;
            state.flush();
        }
    }

    fn reset(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(Errno::EBADF.into());
        }
        state.flush();
        state.counters.resets += 1;

        Ok(())
    }

    fn write(&mut self, data: &[u8], pts: u64) -> BackendResult<usize> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(Errno::EBADF.into());
        }
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(Errno::EIO.into());
        }

        let free = state.buffer_size - state.data_len;
        let accepted = data.len().min(free).min(state.max_write.unwrap_or(usize::MAX));
        if accepted == 0 {
            return Ok(0);
        }

        state.data_len += accepted;
        state.counters.writes += 1;
        state.counters.bytes_written += accepted;
        match state.pending.back_mut() {
            // Remainder of a partially accepted unit.
            Some((last_pts, size)) if *last_pts == pts => *size += accepted,
            _ => state.pending.push_back((pts, accepted)),
        }
        trace!("dummy: accepted {} bytes at pts {}", accepted, pts);

        Ok(accepted)
    }

    fn buffer_status(&mut self) -> BackendResult<BufferStatus> {
        let state = self.state.lock();
        if !state.opened {
            return Err(Errno::EBADF.into());
        }

        Ok(BufferStatus {
            size: state.buffer_size,
            data_len: state.data_len,
            free_len: state.buffer_size - state.data_len,
        })
    }

    fn dequeue_frame(&mut self) -> BackendResult<Option<DequeuedFrame>> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(Errno::EBADF.into());
        }
        if state.fail_dequeues > 0 {
            state.fail_dequeues -= 1;
            return Err(Errno::EIO.into());
        }
        if state.stalled || state.pending.is_empty() {
            return Ok(None);
        }
        let Some(index) = state.free_slots.pop_front() else {
            return Ok(None);
        };
        let Some((pts, size)) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.data_len -= size;

        Ok(Some(DequeuedFrame {
            index,
            pts,
            interlaced: state.interlaced,
            dovi_metadata: None,
        }))
    }

    fn queue_frame(&mut self, index: u32, drop: bool) -> BackendResult<()> {
        let mut state = self.state.lock();
        if index >= state.num_slots || state.free_slots.contains(&index) {
            return Err(BackendError::InvalidIndex(index));
        }
        state.free_slots.push_back(index);
        state.counters.queued.push((index, drop));

        Ok(())
    }

    fn set_trick_mode(&mut self, enable: bool) -> BackendResult<()> {
        self.state.lock().counters.trick_mode = enable;
        Ok(())
    }

    fn pause(&mut self, pause: bool) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.fail_pause {
            return Err(Errno::EIO.into());
        }
        state.counters.paused = pause;

        Ok(())
    }

    fn num_frame_slots(&self) -> u32 {
        self.state.lock().num_slots
    }

    fn poll_handle(&self) -> Option<Arc<dyn AsFd + Send + Sync>> {
        self.poll_handle.clone()
    }
}

/// Configuration the dummy video layer received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputLog {
    pub axis: Vec<Rect>,
    pub zoom: Vec<i32>,
    pub modes_3d: Vec<Video3dMode>,
    pub shown: Option<bool>,
    pub vadj1_enabled: u32,
    /// Fail the picture quality call, as kernels without the control do.
    pub fail_vadj1: bool,
}

/// Video layer recording what it is asked to do.
#[derive(Debug, Clone, Default)]
pub struct DummyOutput(Arc<Mutex<OutputLog>>);

impl DummyOutput {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, OutputLog> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> OutputLog {
        self.lock().clone()
    }

    pub fn set_fail_vadj1(&self, fail: bool) {
        self.lock().fail_vadj1 = fail;
    }
}

impl VideoOutput for DummyOutput {
    fn set_video_axis(&mut self, axis: Rect) -> BackendResult<()> {
        self.lock().axis.push(axis);
        Ok(())
    }

    fn set_zoom(&mut self, percent: i32) -> BackendResult<()> {
        self.lock().zoom.push(percent);
        Ok(())
    }

    fn set_3d_mode(&mut self, mode: Video3dMode) -> BackendResult<()> {
        self.lock().modes_3d.push(mode);
        Ok(())
    }

    fn show_video(&mut self, show: bool) -> BackendResult<()> {
        self.lock().shown = Some(show);
        Ok(())
    }

    fn enable_vadj1(&mut self) -> BackendResult<()> {
        let mut log = self.lock();
        if log.fail_vadj1 {
            return Err(Errno::ENOTTY.into());
        }
        log.vadj1_enabled += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EncodedFormat;

    fn params() -> OpenParams {
        OpenParams {
            codec: EncodedFormat::H264,
            coded_resolution: (1920, 1080).into(),
            video_rate: 4004,
            bit_depth: 8,
            pts_invalid: false,
            dolby_vision: false,
        }
    }

    #[test]
    fn units_become_frames() {
        let mut backend = DummyBackend::new(100, 2);
        let control = backend.control();
        backend.open(&params()).unwrap();

        assert_eq!(backend.write(&[0u8; 30], 0).unwrap(), 30);
        assert_eq!(backend.write(&[0u8; 30], 3000).unwrap(), 30);
        assert_eq!(backend.write(&[0u8; 30], 6000).unwrap(), 30);
        assert_eq!(backend.buffer_status().unwrap().data_len, 90);

        let first = backend.dequeue_frame().unwrap().unwrap();
        let second = backend.dequeue_frame().unwrap().unwrap();
        assert_eq!((first.index, first.pts), (0, 0));
        assert_eq!((second.index, second.pts), (1, 3000));
        // Both slots are held.
        assert_eq!(backend.dequeue_frame().unwrap(), None);

        backend.queue_frame(0, false).unwrap();
        assert!(backend.queue_frame(0, false).is_err());
        assert_eq!(backend.dequeue_frame().unwrap().unwrap().pts, 6000);
        assert_eq!(control.counters().queued, vec![(0, false)]);
    }

    #[test]
    fn partial_writes_and_faults() {
        let mut backend = DummyBackend::new(50, 2);
        let control = backend.control();
        assert!(backend.write(&[0u8; 10], 0).is_err());
        backend.open(&params()).unwrap();

        control.set_max_write(Some(8));
        assert_eq!(backend.write(&[0u8; 10], 0).unwrap(), 8);
        assert_eq!(backend.write(&[0u8; 2], 0).unwrap(), 2);
        assert_eq!(control.buffered_units(), 1);

        control.fail_writes(1);
        assert!(matches!(
            backend.write(&[0u8; 1], 1),
            Err(BackendError::Errno(Errno::EIO))
        ));
        assert_eq!(backend.write(&[0u8; 1], 1).unwrap(), 1);

        backend.reset().unwrap();
        assert_eq!(control.buffered_units(), 0);
        backend.close();
        backend.close();
        assert_eq!(control.counters().closes, 1);
    }
}
