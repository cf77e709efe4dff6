// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bookkeeping of the hardware frame slots.
//!
//! The device decodes into a fixed arena of frame slots. A slot dequeued from the device is held
//! by the client until it is released, after which the device may decode into it again.

use std::time::Duration;
use std::time::Instant;

use log::trace;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::DecoderBackend;
use crate::backend::DequeuedFrame;
use crate::decoder::Error;
use crate::decoder::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// Owned by the device.
    Free,
    /// Handed to the client.
    Held,
}

pub struct FrameTracker {
    slots: Vec<Slot>,
    /// Last time a picture came out of the device, a slot was given back to it, or the tracker
    /// was reset.
    last_delivery: Instant,
    delivered: u64,
    dropped: u64,
}

impl FrameTracker {
    pub fn new(num_slots: u32) -> Self {
        Self {
            slots: vec![Slot::Free; num_slots as usize],
            last_delivery: Instant::now(),
            delivered: 0,
            dropped: 0,
        }
    }

    /// Takes the next decoded picture out of the device and marks its slot held.
    pub fn dequeue(&mut self, backend: &mut dyn DecoderBackend) -> BackendResult<Option<DequeuedFrame>> {
        let Some(frame) = backend.dequeue_frame()? else {
            return Ok(None);
        };

        let slot = self
            .slots
            .get_mut(frame.index as usize)
            .ok_or(BackendError::InvalidIndex(frame.index))?;
        *slot = Slot::Held;
        self.last_delivery = Instant::now();
        self.delivered += 1;
        trace!("dequeued slot {} pts {}", frame.index, frame.pts);

        Ok(Some(frame))
    }

    /// Gives slot `index` back to the device, which discards the picture if `drop` is set.
    ///
    /// Releasing a slot the client does not hold is rejected and leaves the arena untouched.
    pub fn release(
        &mut self,
        backend: &mut dyn DecoderBackend,
        index: u32,
        drop: bool,
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(Error::InvalidFrameIndex(index))?;
        if *slot != Slot::Held {
            return Err(Error::FrameNotHeld(index));
        }

        backend.queue_frame(index, drop).map_err(Error::Device)?;
        *slot = Slot::Free;
        // The device could not decode without a free slot, its delay starts over.
        self.last_delivery = Instant::now();
        if drop {
            self.dropped += 1;
        }
        trace!("released slot {}{}", index, if drop { " (dropped)" } else { "" });

        Ok(())
    }

    /// Returns every slot to the device, after the device itself was flushed.
    pub fn reset(&mut self) {
        self.slots.fill(Slot::Free);
        self.last_delivery = Instant::now();
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn held_count(&self) -> usize {
        self.slots.iter().filter(|s| **s == Slot::Held).count()
    }

    pub fn free_count(&self) -> usize {
        self.num_slots() - self.held_count()
    }

    pub fn is_held(&self, index: u32) -> bool {
        self.slots.get(index as usize) == Some(&Slot::Held)
    }

    /// Time since the last picture was delivered or slot released, or since the last reset.
    pub fn since_last_delivery(&self) -> Duration {
        self.last_delivery.elapsed()
    }

    /// Starts measuring the delivery delay from now, e.g. when playback resumes.
    pub fn restart_delivery_timer(&mut self) {
        self.last_delivery = Instant::now();
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::OpenParams;
    use crate::EncodedFormat;

    fn backend_with_units(units: u64) -> DummyBackend {
        let mut backend = DummyBackend::new(1 << 16, 3);
        backend
            .open(&OpenParams {
                codec: EncodedFormat::VP9,
                coded_resolution: (1280, 720).into(),
                video_rate: 3200,
                bit_depth: 8,
                pts_invalid: false,
                dolby_vision: false,
            })
            .unwrap();
        for i in 0..units {
            backend.write(&[0u8; 16], i * 3000).unwrap();
        }
        backend
    }

    #[test]
    fn dequeue_holds_slots() {
        let mut backend = backend_with_units(4);
        let mut tracker = FrameTracker::new(backend.num_frame_slots());

        for _ in 0..3 {
            assert!(tracker.dequeue(&mut backend).unwrap().is_some());
        }
        // Every slot is held, the last unit waits.
        assert!(tracker.dequeue(&mut backend).unwrap().is_none());
        assert_eq!(tracker.held_count(), 3);
        assert_eq!(tracker.free_count(), 0);

        tracker.release(&mut backend, 1, false).unwrap();
        let frame = tracker.dequeue(&mut backend).unwrap().unwrap();
        assert_eq!((frame.index, frame.pts), (1, 9000));
        assert_eq!(tracker.delivered(), 4);
    }

    #[test]
    fn double_release_is_rejected() {
        let mut backend = backend_with_units(2);
        let control = backend.control();
        let mut tracker = FrameTracker::new(backend.num_frame_slots());
        let frame = tracker.dequeue(&mut backend).unwrap().unwrap();

        tracker.release(&mut backend, frame.index, true).unwrap();
        let free = tracker.free_count();
        let device_free = control.free_slots();

        let err = tracker.release(&mut backend, frame.index, true).unwrap_err();
        assert!(matches!(err, Error::FrameNotHeld(i) if i == frame.index));
        assert_eq!(tracker.free_count(), free);
        assert_eq!(control.free_slots(), device_free);
        assert_eq!(tracker.dropped(), 1);
        assert_eq!(control.counters().queued, vec![(frame.index, true)]);
    }

    #[test]
    fn out_of_range_release_is_rejected() {
        let mut backend = backend_with_units(0);
        let mut tracker = FrameTracker::new(backend.num_frame_slots());
        assert!(matches!(
            tracker.release(&mut backend, 3, false),
            Err(Error::InvalidFrameIndex(3))
        ));
        assert!(matches!(
            tracker.release(&mut backend, 0, false),
            Err(Error::FrameNotHeld(0))
        ));
    }

    #[test]
    fn release_restarts_delivery_timer() {
        let mut backend = backend_with_units(1);
        let mut tracker = FrameTracker::new(backend.num_frame_slots());
        let frame = tracker.dequeue(&mut backend).unwrap().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.since_last_delivery() >= Duration::from_millis(20));
        tracker.release(&mut backend, frame.index, false).unwrap();
        assert!(tracker.since_last_delivery() < Duration::from_millis(20));
    }

    #[test]
    fn reset_frees_everything() {
        let mut backend = backend_with_units(2);
        let mut tracker = FrameTracker::new(backend.num_frame_slots());
        tracker.dequeue(&mut backend).unwrap();
        assert!(tracker.is_held(0));
        tracker.reset();
        assert!(!tracker.is_held(0));
        assert_eq!(tracker.free_count(), 3);
    }
}
