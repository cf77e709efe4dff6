// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Session management for the Amlogic hardware video decoder, and the process information
//! registry that mirrors decode and render statistics between the player threads.
//!
//! The [`decoder::controller::AmlCodec`] struct drives one hardware decode session on top of a
//! [`backend::DecoderBackend`], while [`process_info::ProcessInfo`] aggregates the state that the
//! rest of the player reads.

pub mod backend;
pub mod bitstream_utils;
pub mod capabilities;
pub mod config;
pub mod decoder;
pub mod metadata;
pub mod process_info;

use std::fmt;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Whether `self` can contain `other`.
    pub fn can_contain(&self, other: Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    pub fn get_area(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

/// A rectangle in floating point coordinates, as used by the render geometry.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Compressed formats the hardware decoder may be asked to handle.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum EncodedFormat {
    Mpeg2,
    Mpeg4,
    H264,
    H265,
    Vc1,
    VP9,
    AV1,
}

impl EncodedFormat {
    pub fn name(&self) -> &'static str {
        match self {
            EncodedFormat::Mpeg2 => "mpeg2",
            EncodedFormat::Mpeg4 => "mpeg4",
            EncodedFormat::H264 => "h264",
            EncodedFormat::H265 => "hevc",
            EncodedFormat::Vc1 => "vc1",
            EncodedFormat::VP9 => "vp9",
            EncodedFormat::AV1 => "av1",
        }
    }
}

impl FromStr for EncodedFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpeg2" | "MPEG2" => Ok(EncodedFormat::Mpeg2),
            "mpeg4" | "MPEG4" => Ok(EncodedFormat::Mpeg4),
            "h264" | "H264" => Ok(EncodedFormat::H264),
            "h265" | "H265" | "hevc" | "HEVC" => Ok(EncodedFormat::H265),
            "vc1" | "VC1" => Ok(EncodedFormat::Vc1),
            "vp9" | "VP9" => Ok(EncodedFormat::VP9),
            "av1" | "AV1" => Ok(EncodedFormat::AV1),
            _ => Err("unrecognized input format. Valid values: mpeg2, mpeg4, h264, h265, vc1, vp9, av1"),
        }
    }
}

/// A four character code, stored little-endian.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(n: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*n))
    }
}

impl From<Fourcc> for [u8; 4] {
    fn from(n: Fourcc) -> Self {
        n.0.to_le_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: [u8; 4] = (*self).into();
        for b in c {
            // Non-printable codes are shown as '.' so that the string stays four characters.
            let ch = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_round_trips_through_display() {
        assert_eq!(Fourcc::from(b"dvhe").to_string(), "dvhe");
        assert_eq!(Fourcc(0x0000_3164).to_string(), "d1..");
    }

    #[test]
    fn resolution_containment() {
        let uhd = Resolution::from((3840, 2160));
        let fhd = Resolution::from((1920, 1080));
        assert!(uhd.can_contain(fhd));
        assert!(!fhd.can_contain(uhd));
        assert_eq!(fhd.get_area(), 1920 * 1080);
    }

    #[test]
    fn encoded_format_from_str() {
        assert_eq!("hevc".parse::<EncodedFormat>(), Ok(EncodedFormat::H265));
        assert!("mjpeg".parse::<EncodedFormat>().is_err());
    }
}
