// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! What the decoder and display hardware of the running SoC can do, and the check deciding
//! whether a stream may be handed to it.

use std::fs;

use enumn::N;
use log::debug;

use crate::decoder::Error;
use crate::decoder::H264Profile;
use crate::decoder::Result;
use crate::decoder::StreamHints;
use crate::metadata::HdrType;
use crate::EncodedFormat;
use crate::Resolution;

const VCODEC_PROFILE_PATH: &str = "/sys/class/amstream/vcodec_profile";
const CPUINFO_PATH: &str = "/proc/cpuinfo";
const DOLBY_VISION_ENABLE_PATH: &str = "/sys/module/amdolby_vision/parameters/dolby_vision_enable";
const HDMITX_DV_CAP_PATH: &str = "/sys/class/amhdmitx/amhdmitx0/dv_cap";
const HDMITX_HDR_CAP_PATH: &str = "/sys/class/amhdmitx/amhdmitx0/hdr_cap";

/// Largest picture any decoder of the family accepts.
pub const MAX_RESOLUTION: Resolution = Resolution {
    width: 4096,
    height: 2304,
};
/// Largest picture with the 8K HEVC decoder.
pub const MAX_RESOLUTION_8K: Resolution = Resolution {
    width: 8192,
    height: 4352,
};
/// Largest picture of the decoders without 4K support.
pub const MAX_RESOLUTION_HD: Resolution = Resolution {
    width: 1920,
    height: 1088,
};

/// SoC family, from the first byte of the chip serial number.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CpuFamily {
    Gxbb = 0x1f,
    Gxl = 0x21,
    Gxm = 0x22,
    G12a = 0x28,
    G12b = 0x29,
    Sm1 = 0x2b,
}

/// H.264 4K decoding support.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum H264FourK {
    #[default]
    None,
    /// A dedicated 4K decoder is available.
    Has,
    /// The regular decoder handles 4K, within the limits of the High profile.
    SameProfile,
}

/// Decoder and display capabilities of the device.
pub trait HardwareCapabilities: Send + Sync {
    fn cpu_family(&self) -> Option<CpuFamily>;
    fn support_hevc(&self) -> bool;
    fn hevc_4k2k(&self) -> bool;
    fn hevc_8k4k(&self) -> bool;
    fn hevc_10bit(&self) -> bool;
    fn h264_4k2k(&self) -> H264FourK;
    fn support_vp9(&self) -> bool;
    fn support_av1(&self) -> bool;
    /// Whether the video pipeline can process Dolby Vision.
    fn support_dolby_vision(&self) -> bool;
    fn display_supports_dv(&self) -> bool;
    fn display_supports_hdr(&self) -> bool;
}

/// Decoders listed by the stream driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecProfile {
    pub hevc: bool,
    pub hevc_4k2k: bool,
    pub hevc_8k4k: bool,
    pub hevc_10bit: bool,
    pub h264_4k2k: H264FourK,
    pub vp9: bool,
    pub av1: bool,
}

/// Parses the `vcodec_profile` listing, made of one `name:attr;attr;` entry per line.
pub fn parse_vcodec_profile(profile: &str) -> CodecProfile {
    let mut codecs = CodecProfile::default();

    for line in profile.lines() {
        let Some((name, attributes)) = line.trim().split_once(':') else {
            continue;
        };
        let has = |attr: &str| attributes.split(';').any(|a| a.trim() == attr);

        match name.trim() {
            "hevc" => {
                codecs.hevc = true;
                codecs.hevc_4k2k = has("4k");
                codecs.hevc_8k4k = has("8k");
                codecs.hevc_10bit = has("10bit");
            }
            "h264" if has("4k") => codecs.h264_4k2k = H264FourK::SameProfile,
            "h264_4k2k" if codecs.h264_4k2k == H264FourK::None => {
                codecs.h264_4k2k = H264FourK::Has
            }
            "vp9" => codecs.vp9 = true,
            "av1" => codecs.av1 = true,
            _ => (),
        }
    }

    codecs
}

/// Extracts the SoC family from the `Serial` line of `/proc/cpuinfo`.
pub fn parse_cpu_family(cpuinfo: &str) -> Option<CpuFamily> {
    let serial = cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Serial")
        .map(|(_, value)| value.trim())?;
    let id = u8::from_str_radix(serial.get(0..2)?, 16).ok()?;

    CpuFamily::n(id)
}

/// A snapshot of the capabilities, probed once from sysfs and procfs or given as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCapabilities {
    pub cpu_family: Option<CpuFamily>,
    pub codecs: CodecProfile,
    pub dolby_vision: bool,
    pub display_dv: bool,
    pub display_hdr: bool,
}

impl StaticCapabilities {
    /// Reads the capabilities of the running device. Missing nodes read as unsupported.
    pub fn probe() -> Self {
        let caps = Self::from_nodes(|path| fs::read_to_string(path).ok());
        debug!("probed hardware capabilities: {:?}", caps);

        caps
    }

    /// Builds the capabilities from the content of the kernel nodes, `None` for a missing one.
    fn from_nodes(read: impl Fn(&str) -> Option<String>) -> Self {
        let contains = |path: &str, needle: &str| read(path).is_some_and(|s| s.contains(needle));

        Self {
            cpu_family: read(CPUINFO_PATH).and_then(|s| parse_cpu_family(&s)),
            codecs: read(VCODEC_PROFILE_PATH)
                .map(|s| parse_vcodec_profile(&s))
                .unwrap_or_default(),
            dolby_vision: read(DOLBY_VISION_ENABLE_PATH).is_some(),
            display_dv: contains(HDMITX_DV_CAP_PATH, "DolbyVision RX support list"),
            display_hdr: contains(HDMITX_HDR_CAP_PATH, "SMPTE ST 2084: 1"),
        }
    }

    /// A recent SoC decoding every supported format up to 4K, 10 bit.
    pub fn full_4k() -> Self {
        Self {
            cpu_family: Some(CpuFamily::Sm1),
            codecs: CodecProfile {
                hevc: true,
                hevc_4k2k: true,
                hevc_8k4k: false,
                hevc_10bit: true,
                h264_4k2k: H264FourK::SameProfile,
                vp9: true,
                av1: true,
            },
            dolby_vision: false,
            display_dv: false,
            display_hdr: true,
        }
    }
}

impl HardwareCapabilities for StaticCapabilities {
    fn cpu_family(&self) -> Option<CpuFamily> {
        self.cpu_family
    }

    fn support_hevc(&self) -> bool {
        self.codecs.hevc
    }

    fn hevc_4k2k(&self) -> bool {
        self.codecs.hevc_4k2k
    }

    fn hevc_8k4k(&self) -> bool {
        self.codecs.hevc_8k4k
    }

    fn hevc_10bit(&self) -> bool {
        self.codecs.hevc_10bit
    }

    fn h264_4k2k(&self) -> H264FourK {
        self.codecs.h264_4k2k
    }

    fn support_vp9(&self) -> bool {
        self.codecs.vp9
    }

    fn support_av1(&self) -> bool {
        self.codecs.av1
    }

    fn support_dolby_vision(&self) -> bool {
        self.dolby_vision
    }

    fn display_supports_dv(&self) -> bool {
        self.display_dv
    }

    fn display_supports_hdr(&self) -> bool {
        self.display_hdr
    }
}

fn unsupported(reason: String) -> Error {
    Error::UnsupportedStream(reason)
}

/// Checks that the stream described by `hints` can be decoded by the hardware.
pub fn check_stream_support(caps: &dyn HardwareCapabilities, hints: &StreamHints) -> Result<()> {
    let res = hints.resolution();
    if res.width == 0 || res.height == 0 {
        return Err(unsupported(format!("invalid resolution {}x{}", res.width, res.height)));
    }

    let ceiling = if hints.codec == EncodedFormat::H265 && caps.hevc_8k4k() {
        MAX_RESOLUTION_8K
    } else {
        MAX_RESOLUTION
    };
    if !ceiling.can_contain(res) {
        return Err(unsupported(format!(
            "{}x{} exceeds the {}x{} limit",
            res.width, res.height, ceiling.width, ceiling.height
        )));
    }
    let above_hd = !MAX_RESOLUTION_HD.can_contain(res);

    match hints.codec {
        EncodedFormat::Mpeg2 | EncodedFormat::Mpeg4 | EncodedFormat::Vc1 if above_hd => {
            return Err(unsupported(format!(
                "{} is limited to {}x{}",
                hints.codec.name(),
                MAX_RESOLUTION_HD.width,
                MAX_RESOLUTION_HD.height
            )));
        }
        EncodedFormat::H264 => check_h264(caps, hints, above_hd)?,
        EncodedFormat::H265 => check_hevc(caps, hints, above_hd)?,
        EncodedFormat::VP9 if !caps.support_vp9() => {
            return Err(unsupported("no VP9 decoder".into()));
        }
        EncodedFormat::AV1 if !caps.support_av1() => {
            return Err(unsupported("no AV1 decoder".into()));
        }
        _ => (),
    }

    if hints.hdr_type == HdrType::DolbyVision && !caps.support_dolby_vision() {
        let compatible = hints
            .dovi
            .map(|dovi| dovi.has_compatible_base_layer())
            .unwrap_or(false);
        if !compatible {
            return Err(unsupported(
                "Dolby Vision stream without a compatible base layer".into(),
            ));
        }
        debug!("no Dolby Vision support, decoding the base layer only");
    }

    Ok(())
}

fn check_h264(caps: &dyn HardwareCapabilities, hints: &StreamHints, above_hd: bool) -> Result<()> {
    let profile = u8::try_from(hints.profile).ok().and_then(H264Profile::n);
    if matches!(
        profile,
        Some(H264Profile::High10 | H264Profile::High422P | H264Profile::High444P)
    ) {
        return Err(unsupported(format!("H.264 profile {} is not supported", hints.profile)));
    }

    if !above_hd {
        return Ok(());
    }

    match caps.h264_4k2k() {
        H264FourK::Has => Ok(()),
        H264FourK::SameProfile
            if hints.profile <= H264Profile::High as u32 && hints.level <= 51 =>
        {
            Ok(())
        }
        H264FourK::SameProfile => Err(unsupported(format!(
            "4K H.264 limited to High profile level 5.1, got profile {} level {}",
            hints.profile, hints.level
        ))),
        H264FourK::None => Err(unsupported("no 4K H.264 decoder".into())),
    }
}

fn check_hevc(caps: &dyn HardwareCapabilities, hints: &StreamHints, above_hd: bool) -> Result<()> {
    if !caps.support_hevc() {
        return Err(unsupported("no HEVC decoder".into()));
    }
    if !MAX_RESOLUTION.can_contain(hints.resolution()) && !caps.hevc_8k4k() {
        return Err(unsupported("no 8K HEVC decoder".into()));
    }
    if above_hd && !caps.hevc_4k2k() {
        return Err(unsupported("no 4K HEVC decoder".into()));
    }
    if hints.bit_depth > 8 && !caps.hevc_10bit() {
        return Err(unsupported("no 10 bit HEVC decoder".into()));
    }

    Ok(())
}
