// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Submission of compressed access units to the stream device.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use log::debug;
use log::trace;
use log::warn;

use crate::backend::BackendError;
use crate::backend::BufferStatus;
use crate::backend::DecoderBackend;
use crate::bitstream_utils::is_annexb;
use crate::bitstream_utils::AvccConverter;
use crate::config::DecoderConfig;
use crate::decoder::duration_to_device_pts;
use crate::decoder::Error;
use crate::decoder::Result;
use crate::decoder::StreamHints;
use crate::decoder::PTS_FREQ;
use crate::EncodedFormat;

/// First delay between two attempts at writing the rest of a partially accepted unit.
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Occupancy of the stream buffer, as seen by the feeder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferLevel {
    pub data_len: usize,
    pub free_len: usize,
    /// Fill level in percent.
    pub percent: f32,
}

impl From<BufferStatus> for BufferLevel {
    fn from(status: BufferStatus) -> Self {
        Self {
            data_len: status.data_len,
            free_len: status.free_len,
            percent: status.level(0),
        }
    }
}

/// Turns container samples into the elementary stream of the device and tracks their timing.
pub struct BitstreamFeeder {
    codec: EncodedFormat,
    converter: Option<AvccConverter>,
    /// Codec configuration sent ahead of the first unit after open or reset.
    header: Vec<u8>,
    header_pending: bool,
    config: DecoderConfig,
    /// Last timestamp on the decode timeline, in `PTS_FREQ` units.
    last_timestamp: Option<u64>,
    /// Last submitted presentation timestamp, in `PTS_FREQ` units.
    last_pts: Option<u64>,
    durations: VecDeque<u64>,
    has_pts: bool,
    prefilled: bool,
    discontinuities: u32,
    unit: Vec<u8>,
}

impl BitstreamFeeder {
    pub fn new(hints: &StreamHints, config: DecoderConfig) -> Result<Self> {
        let mut converter = None;
        let mut header = Vec::new();

        match hints.codec {
            EncodedFormat::H264 | EncodedFormat::H265 if !hints.extradata.is_empty() => {
                if is_annexb(&hints.extradata) {
                    header.extend_from_slice(&hints.extradata);
                } else {
                    let avcc = AvccConverter::new(hints.codec, &hints.extradata)
                        .map_err(anyhow::Error::from)?;
                    debug!(
                        "converting {} samples with {} byte NAL lengths",
                        hints.codec.name(),
                        avcc.nal_length_size()
                    );
                    header.extend_from_slice(avcc.parameter_sets());
                    converter = Some(avcc);
                }
            }
            EncodedFormat::Mpeg2 | EncodedFormat::Mpeg4 | EncodedFormat::Vc1 => {
                header.extend_from_slice(&hints.extradata);
            }
            _ => (),
        }

        Ok(Self {
            codec: hints.codec,
            converter,
            header_pending: !header.is_empty(),
            header,
            config,
            last_timestamp: None,
            last_pts: None,
            durations: VecDeque::new(),
            has_pts: false,
            prefilled: false,
            discontinuities: 0,
            unit: Vec::new(),
        })
    }

    pub fn buffer_level(&self, backend: &mut dyn DecoderBackend) -> Result<BufferLevel> {
        backend
            .buffer_status()
            .map(BufferLevel::from)
            .map_err(Error::Device)
    }

    /// Writes one access unit stamped with `pts`, or `dts` when the container has no PTS for it.
    ///
    /// Fails with [`Error::BufferFull`] without writing anything when the unit does not fit, in
    /// which case the same unit should be submitted again later.
    pub fn add_data(
        &mut self,
        backend: &mut dyn DecoderBackend,
        data: &[u8],
        dts: Option<Duration>,
        pts: Option<Duration>,
    ) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut unit = std::mem::take(&mut self.unit);
        unit.clear();
        if self.header_pending {
            unit.extend_from_slice(&self.header);
        }
        let converted = match &self.converter {
            Some(converter) => converter
                .convert_into(data, &mut unit)
                .map_err(|e| Error::InvalidData(e.into())),
            None => {
                unit.extend_from_slice(data);
                Ok(())
            }
        };
        let res = converted.and_then(|()| self.submit(backend, &unit, data.len(), dts, pts));
        self.unit = unit;

        res
    }

    fn submit(
        &mut self,
        backend: &mut dyn DecoderBackend,
        unit: &[u8],
        consumed: usize,
        dts: Option<Duration>,
        pts: Option<Duration>,
    ) -> Result<usize> {
        let status = backend.buffer_status().map_err(Error::Device)?;
        let level = status.level(unit.len());
        if level > self.config.buffer_full_level || status.free_len < unit.len() {
            trace!(
                "buffer full: {} bytes pending, {} free, {:.1}%",
                unit.len(),
                status.free_len,
                level
            );
            return Err(Error::BufferFull);
        }

        let pts = pts.map(duration_to_device_pts);
        let dts = dts.map(duration_to_device_pts);
        let stamp = match pts.or(dts) {
            Some(stamp) => stamp,
            None => self.extrapolated_pts(),
        };

        self.write_all(backend, unit, stamp)?;
        self.header_pending = false;
        self.has_pts |= pts.is_some();
        self.last_pts = Some(stamp);
        if let Some(timestamp) = dts.or(pts) {
            self.track_timestamp(timestamp);
        }
        if !self.prefilled && level >= self.config.minimum_buffer_level {
            debug!("stream buffer prefilled at {:.1}%", level);
            self.prefilled = true;
        }
        trace!("{}: wrote {} bytes at pts {}", self.codec.name(), unit.len(), stamp);

        Ok(consumed)
    }

    /// Writes `unit` completely, retrying with an increasing delay while the device only takes
    /// part of it. A device refusing the first byte is reported as full right away.
    fn write_all(&self, backend: &mut dyn DecoderBackend, unit: &[u8], pts: u64) -> Result<()> {
        let mut offset = 0;
        let mut retries = 0;
        let mut backoff = WRITE_BACKOFF;

        while offset < unit.len() {
            let written = backend.write(&unit[offset..], pts).map_err(Error::Device)?;
            if written > 0 {
                offset += written;
                retries = 0;
                backoff = WRITE_BACKOFF;
                continue;
            }

            if offset == 0 {
                return Err(Error::BufferFull);
            }
            retries += 1;
            if retries > self.config.write_retries {
                warn!("device stopped accepting data after {}/{} bytes", offset, unit.len());
                return Err(Error::Device(BackendError::OutOfResources));
            }
            thread::sleep(backoff);
            backoff *= 2;
        }

        Ok(())
    }

    fn extrapolated_pts(&self) -> u64 {
        match self.last_pts {
            Some(last) => last + self.frame_duration().unwrap_or(0) as u64,
            None => 0,
        }
    }

    fn track_timestamp(&mut self, timestamp: u64) {
        let threshold = duration_to_device_pts(self.config.discontinuity_threshold);
        if let Some(last) = self.last_timestamp {
            if timestamp < last || timestamp - last > threshold {
                debug!("timestamp discontinuity: {} -> {}", last, timestamp);
                self.discontinuities += 1;
                self.durations.clear();
            } else if timestamp > last {
                self.durations.push_back(timestamp - last);
                while self.durations.len() > self.config.duration_window {
                    self.durations.pop_front();
                }
            }
        }
        self.last_timestamp = Some(timestamp);
    }

    /// Average frame duration over the recent units, in `PTS_FREQ` units.
    pub fn frame_duration(&self) -> Option<u32> {
        if self.durations.is_empty() {
            return None;
        }
        let sum: u64 = self.durations.iter().sum();

        Some((sum / self.durations.len() as u64) as u32)
    }

    /// Frame rate inferred from the submitted timestamps.
    pub fn inferred_fps(&self) -> Option<f32> {
        self.frame_duration()
            .filter(|duration| *duration > 0)
            .map(|duration| PTS_FREQ as f32 / duration as f32)
    }

    /// Forgets the timing and sends the codec configuration again with the next unit.
    pub fn reset(&mut self) {
        self.header_pending = !self.header.is_empty();
        self.last_timestamp = None;
        self.last_pts = None;
        self.durations.clear();
        self.has_pts = false;
        self.prefilled = false;
    }

    pub fn last_pts(&self) -> Option<u64> {
        self.last_pts
    }

    /// Whether the container provided presentation timestamps.
    pub fn has_pts(&self) -> bool {
        self.has_pts
    }

    /// Whether the buffer reached the minimum level since the last reset.
    pub fn is_prefilled(&self) -> bool {
        self.prefilled
    }

    pub fn discontinuities(&self) -> u32 {
        self.discontinuities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::dummy::DummyControl;
    use crate::backend::OpenParams;

    const AVCC: [u8; 18] = [
        0x01, 0x64, 0x00, 0x28, 0xff, // version, profile, compat, level, 4 byte lengths
        0xe1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x28, // one SPS
        0x01, 0x00, 0x03, 0x68, 0xee, 0x3c, // one PPS
    ];

    fn open_backend(size: usize) -> (DummyBackend, DummyControl) {
        let mut backend = DummyBackend::new(size, 4);
        let control = backend.control();
        backend
            .open(&OpenParams {
                codec: EncodedFormat::H264,
                coded_resolution: (1920, 1080).into(),
                video_rate: 0,
                bit_depth: 8,
                pts_invalid: false,
                dolby_vision: false,
            })
            .unwrap();
        (backend, control)
    }

    fn ms(ms: u64) -> Option<Duration> {
        Some(Duration::from_millis(ms))
    }

    #[test]
    fn avcc_samples_get_parameter_sets_once() {
        let hints = StreamHints {
            extradata: AVCC.to_vec(),
            ..Default::default()
        };
        let mut feeder = BitstreamFeeder::new(&hints, Default::default()).unwrap();
        let (mut backend, control) = open_backend(1 << 16);

        let sample = [0x00, 0x00, 0x00, 0x02, 0x65, 0x88];
        assert_eq!(feeder.add_data(&mut backend, &sample, None, ms(0)).unwrap(), 6);
        // Two parameter sets and one slice, each behind a 4 byte start code.
        assert_eq!(control.counters().bytes_written, 4 + 4 + 4 + 3 + 4 + 2);

        feeder.add_data(&mut backend, &sample, None, ms(40)).unwrap();
        assert_eq!(control.counters().bytes_written, 21 + 6);

        feeder.reset();
        feeder.add_data(&mut backend, &sample, None, ms(80)).unwrap();
        assert_eq!(control.counters().bytes_written, 27 + 21);
    }

    #[test]
    fn truncated_sample_is_invalid_data() {
        let hints = StreamHints {
            extradata: AVCC.to_vec(),
            ..Default::default()
        };
        let mut feeder = BitstreamFeeder::new(&hints, Default::default()).unwrap();
        let (mut backend, control) = open_backend(1 << 16);

        let err = feeder
            .add_data(&mut backend, &[0x00, 0x00, 0x00, 0x09, 0x65], None, ms(0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        assert_eq!(control.counters().writes, 0);
    }

    #[test]
    fn annexb_extradata_is_prepended_verbatim() {
        let extradata = vec![0x00, 0x00, 0x01, 0x67, 0x42];
        let hints = StreamHints {
            extradata: extradata.clone(),
            ..Default::default()
        };
        let mut feeder = BitstreamFeeder::new(&hints, Default::default()).unwrap();
        let (mut backend, control) = open_backend(1 << 16);
        feeder
            .add_data(&mut backend, &[0x00, 0x00, 0x01, 0x65], None, ms(0))
            .unwrap();
        assert_eq!(control.counters().bytes_written, extradata.len() + 4);
    }

    #[test]
    fn full_buffer_is_transient() {
        let config = DecoderConfig {
            buffer_full_level: 50.0,
            ..Default::default()
        };
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), config).unwrap();
        let (mut backend, control) = open_backend(100);

        feeder.add_data(&mut backend, &[0u8; 40], None, ms(0)).unwrap();
        let err = feeder.add_data(&mut backend, &[0u8; 20], None, ms(40)).unwrap_err();
        assert!(matches!(err, Error::BufferFull));
        assert_eq!(control.counters().bytes_written, 40);

        let level = feeder.buffer_level(&mut backend).unwrap();
        assert_eq!((level.data_len, level.free_len), (40, 60));
        assert_eq!(level.percent, 40.0);
    }

    #[test]
    fn refused_write_does_not_block() {
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), Default::default()).unwrap();
        let (mut backend, control) = open_backend(1 << 16);
        control.set_max_write(Some(0));

        let start = std::time::Instant::now();
        let err = feeder.add_data(&mut backend, &[1u8; 30], None, ms(0)).unwrap_err();
        assert!(matches!(err, Error::BufferFull));
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(control.counters().writes, 0);

        // Nothing was consumed, the same unit goes through once the device takes data again.
        control.set_max_write(None);
        assert_eq!(feeder.add_data(&mut backend, &[1u8; 30], None, ms(0)).unwrap(), 30);
    }

    #[test]
    fn partial_writes_are_completed() {
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), Default::default()).unwrap();
        let (mut backend, control) = open_backend(1 << 16);
        control.set_max_write(Some(7));

        assert_eq!(feeder.add_data(&mut backend, &[1u8; 30], None, ms(0)).unwrap(), 30);
        let counters = control.counters();
        assert_eq!(counters.writes, 5);
        assert_eq!(counters.bytes_written, 30);
        assert_eq!(control.buffered_units(), 1);
    }

    #[test]
    fn device_failure_is_reported() {
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), Default::default()).unwrap();
        let (mut backend, control) = open_backend(1 << 16);
        control.fail_writes(1);

        let err = feeder.add_data(&mut backend, &[1u8; 8], None, ms(0)).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn frame_duration_and_discontinuities() {
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), Default::default()).unwrap();
        let (mut backend, _control) = open_backend(1 << 20);

        for i in 0..5 {
            feeder
                .add_data(&mut backend, &[0u8; 4], ms(i * 40), ms(i * 40 + 80))
                .unwrap();
        }
        // 40ms at 90kHz.
        assert_eq!(feeder.frame_duration(), Some(3600));
        assert_eq!(feeder.inferred_fps(), Some(25.0));
        assert!(feeder.has_pts());
        assert_eq!(feeder.last_pts(), Some(duration_to_device_pts(Duration::from_millis(240))));

        // Seek back.
        feeder.add_data(&mut backend, &[0u8; 4], ms(0), ms(0)).unwrap();
        assert_eq!(feeder.discontinuities(), 1);
        assert_eq!(feeder.frame_duration(), None);

        // Jump forward past the threshold.
        feeder.add_data(&mut backend, &[0u8; 4], ms(5000), ms(5000)).unwrap();
        assert_eq!(feeder.discontinuities(), 2);
    }

    #[test]
    fn missing_timestamps_are_extrapolated() {
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), Default::default()).unwrap();
        let (mut backend, _control) = open_backend(1 << 20);

        feeder.add_data(&mut backend, &[0u8; 4], ms(0), None).unwrap();
        feeder.add_data(&mut backend, &[0u8; 4], ms(40), None).unwrap();
        feeder.add_data(&mut backend, &[0u8; 4], None, None).unwrap();
        assert!(!feeder.has_pts());
        assert_eq!(feeder.last_pts(), Some(7200));
    }

    #[test]
    fn prefill_tracks_minimum_level() {
        let config = DecoderConfig {
            minimum_buffer_level: 10.0,
            ..Default::default()
        };
        let mut feeder = BitstreamFeeder::new(&StreamHints::default(), config).unwrap();
        let (mut backend, _control) = open_backend(100);

        feeder.add_data(&mut backend, &[0u8; 5], None, ms(0)).unwrap();
        assert!(!feeder.is_prefilled());
        feeder.add_data(&mut backend, &[0u8; 5], None, ms(40)).unwrap();
        assert!(feeder.is_prefilled());
        feeder.reset();
        assert!(!feeder.is_prefilled());
    }
}
