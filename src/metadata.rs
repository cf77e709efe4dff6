// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Colour, HDR and audio descriptions shared between the decoder and the process info registry.

use enumn::N;

/// HDR signalling of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HdrType {
    #[default]
    None,
    Hdr10,
    Hdr10Plus,
    Hlg,
    DolbyVision,
}

impl HdrType {
    pub fn name(&self) -> &'static str {
        match self {
            HdrType::None => "none",
            HdrType::Hdr10 => "hdr10",
            HdrType::Hdr10Plus => "hdr10+",
            HdrType::Hlg => "hlg",
            HdrType::DolbyVision => "dolbyvision",
        }
    }
}

/// Colour primaries, see ITU-T H.273 table 2.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ColorPrimaries {
    Reserved0 = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Bt470M = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    GenericFilm = 8,
    Bt2020 = 9,
    Xyz = 10,
    Smpte431 = 11,
    Smpte432 = 12,
    Ebu3213 = 22,
}

/// Transfer characteristics, see ITU-T H.273 table 3.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TransferCharacteristics {
    Reserved0 = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Bt470m = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    Linear = 8,
    Log100 = 9,
    Log100Sqrt10 = 10,
    Iec61966 = 11,
    Bt1361 = 12,
    Srgb = 13,
    Bt202010Bit = 14,
    Bt202012Bit = 15,
    Smpte2084 = 16,
    Smpte428 = 17,
    Hlg = 18,
}

/// Matrix coefficients (colour space), see ITU-T H.273 table 4.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ColorSpace {
    Identity = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Fcc = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    Ycgco = 8,
    Bt2020Ncl = 9,
    Bt2020Cl = 10,
    Smpte2085 = 11,
    ChromaDerivedNcl = 12,
    ChromaDerivedCl = 13,
    Ictcp = 14,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ColorRange {
    #[default]
    Unspecified = 0,
    Limited = 1,
    Full = 2,
}

/// Pixel formats a renderer may accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Yuv420p,
    Nv12,
    P010,
    /// Frames stay inside the hardware video layer and are never mapped.
    Opaque,
}

/// Dolby Vision configuration record of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DoviStreamInfo {
    pub dv_version_major: u8,
    pub dv_version_minor: u8,
    pub dv_profile: u8,
    pub dv_level: u8,
    pub rpu_present: bool,
    pub el_present: bool,
    pub bl_present: bool,
    pub dv_bl_signal_compatibility_id: u8,
}

impl DoviStreamInfo {
    /// Whether the base layer can be shown on its own by a decoder without Dolby Vision support.
    pub fn has_compatible_base_layer(&self) -> bool {
        self.bl_present && self.dv_bl_signal_compatibility_id != 0
    }
}

/// Per-frame Dolby Vision RPU values, in PQ code values unless stated otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DoviFrameMetadata {
    pub level1_min_pq: u16,
    pub level1_max_pq: u16,
    pub level1_avg_pq: u16,
    pub level6_max_lum: u16,
    pub level6_min_lum: u16,
    pub level6_max_cll: u16,
    pub level6_max_fall: u16,
}

/// Stream level Dolby Vision values taken from the first RPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DoviStreamMetadata {
    pub source_min_pq: u16,
    pub source_max_pq: u16,
    pub has_level5: bool,
    pub has_level6: bool,
}

/// SMPTE ST 2086 mastering display and CTA-861.3 content light level information.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HdrStaticMetadata {
    /// Display primaries as (x, y) chromaticity pairs for green, blue and red.
    pub display_primaries: [(f32, f32); 3],
    pub white_point: (f32, f32),
    pub max_luminance: f32,
    pub min_luminance: f32,
    pub max_cll: u32,
    pub max_fall: u32,
}

/// Output mode of the Dolby Vision VS10 engine.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Vs10Mode {
    Dv = 0,
    Hdr10 = 1,
    Sdr8 = 2,
    Sdr10 = 3,
    #[default]
    Bypass = 4,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DtsXType {
    #[default]
    None,
    DtsX,
    DtsXImaxEnhanced,
}
