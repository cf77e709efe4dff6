// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Kernel interface of the amstream, amlvideo and amvecm drivers.

#![allow(dead_code)]

use nix::ioctl_none_bad;
use nix::ioctl_read;
use nix::ioctl_read_bad;
use nix::ioctl_readwrite;
use nix::ioctl_write_int_bad;
use nix::ioctl_write_ptr;
use nix::ioctl_write_ptr_bad;
use nix::libc;
use nix::request_code_none;
use nix::request_code_read;
use nix::request_code_write;

use crate::EncodedFormat;

const AMSTREAM_IOC_MAGIC: u8 = b'S';
// The amstream requests are declared with the size of an int whatever they carry.
const AMSTREAM_ARG_SIZE: usize = std::mem::size_of::<libc::c_int>();

ioctl_write_int_bad!(
    amstream_set_vformat,
    request_code_write!(AMSTREAM_IOC_MAGIC, 0x04, AMSTREAM_ARG_SIZE)
);
ioctl_read_bad!(
    amstream_vb_status,
    request_code_read!(AMSTREAM_IOC_MAGIC, 0x08, AMSTREAM_ARG_SIZE),
    AmIoParam
);
ioctl_write_ptr_bad!(
    amstream_set_sysinfo,
    request_code_write!(AMSTREAM_IOC_MAGIC, 0x0a, AMSTREAM_ARG_SIZE),
    DecSysinfo
);
ioctl_write_int_bad!(
    amstream_set_tstamp,
    request_code_write!(AMSTREAM_IOC_MAGIC, 0x0e, AMSTREAM_ARG_SIZE)
);
ioctl_none_bad!(amstream_port_init, request_code_none!(AMSTREAM_IOC_MAGIC, 0x11));
ioctl_write_int_bad!(
    amstream_set_trickmode,
    request_code_write!(AMSTREAM_IOC_MAGIC, 0x12, AMSTREAM_ARG_SIZE)
);
ioctl_write_int_bad!(
    amstream_vpause,
    request_code_write!(AMSTREAM_IOC_MAGIC, 0x17, AMSTREAM_ARG_SIZE)
);
ioctl_write_int_bad!(
    amstream_set_3d_type,
    request_code_write!(AMSTREAM_IOC_MAGIC, 0x3c, AMSTREAM_ARG_SIZE)
);

pub const TRICKMODE_NONE: libc::c_int = 0;
pub const TRICKMODE_I: libc::c_int = 1;

pub const MODE_3D_DISABLE: libc::c_int = 0x0000_0000;
pub const MODE_3D_LR: libc::c_int = 0x0000_0101;
pub const MODE_3D_TB: libc::c_int = 0x0000_0201;
pub const MODE_3D_TO_2D_L: libc::c_int = 0x0010_0000;
pub const MODE_3D_TO_2D_R: libc::c_int = 0x0020_0000;

/// Video formats of the amstream driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VFormat {
    Mpeg12 = 0,
    Mpeg4 = 1,
    H264 = 2,
    Vc1 = 6,
    Hevc = 11,
    Vp9 = 14,
    Av1 = 16,
}

impl From<EncodedFormat> for VFormat {
    fn from(format: EncodedFormat) -> Self {
        match format {
            EncodedFormat::Mpeg2 => VFormat::Mpeg12,
            EncodedFormat::Mpeg4 => VFormat::Mpeg4,
            EncodedFormat::H264 => VFormat::H264,
            EncodedFormat::H265 => VFormat::Hevc,
            EncodedFormat::Vc1 => VFormat::Vc1,
            EncodedFormat::VP9 => VFormat::Vp9,
            EncodedFormat::AV1 => VFormat::Av1,
        }
    }
}

/// Stream node serving `format`.
pub fn stream_node(format: EncodedFormat) -> &'static str {
    match format {
        EncodedFormat::H265 | EncodedFormat::VP9 | EncodedFormat::AV1 => "/dev/amstream_hevc",
        _ => "/dev/amstream_vbuf",
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct BufStatus {
    pub size: libc::c_int,
    pub data_len: libc::c_int,
    pub free_len: libc::c_int,
    pub read_pointer: libc::c_uint,
    pub write_pointer: libc::c_uint,
}

/// `struct am_io_param`. The kernel union is larger than the buffer status alone.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AmIoParam {
    pub data: libc::c_int,
    pub len: libc::c_int,
    pub status: BufStatus,
    reserved: [u8; 64],
}

impl Default for AmIoParam {
    fn default() -> Self {
        Self {
            data: 0,
            len: 0,
            status: Default::default(),
            reserved: [0; 64],
        }
    }
}

/// `struct dec_sysinfo`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DecSysinfo {
    pub format: libc::c_uint,
    pub width: libc::c_uint,
    pub height: libc::c_uint,
    pub rate: libc::c_uint,
    pub extra: libc::c_uint,
    pub status: libc::c_uint,
    pub ratio: libc::c_uint,
    pub param: u64,
    pub ratio64: u64,
}

/// Extra bit of the H.264 decoder to trust the container timestamps.
pub const SYSINFO_PARAM_SYNC_OUTSIDE: u64 = 0x02;
/// Extra bit asking the decoder to parse timestamps itself.
pub const SYSINFO_PARAM_EXTERNAL_PTS_INVALID: u64 = 0x10;

const V4L2_IOC_MAGIC: u8 = b'V';
pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_FIELD_INTERLACED: u32 = 4;
pub const V4L2_BUF_FLAG_DONE: u32 = 0x4;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Timeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

/// `struct v4l2_buffer` for 64 bit userspace.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: V4l2Timeval,
    pub timecode: V4l2Timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: u64,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl V4l2Buffer {
    pub fn capture(index: u32) -> Self {
        Self {
            index,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            ..Default::default()
        }
    }

    /// The amlvideo node packs the 90 kHz PTS of the frame in the timestamp.
    pub fn pts(&self) -> u64 {
        ((self.timestamp.tv_sec as u64) << 32) | (self.timestamp.tv_usec as u64 & 0xffff_ffff)
    }
}

ioctl_readwrite!(vidioc_qbuf, V4L2_IOC_MAGIC, 15, V4l2Buffer);
ioctl_readwrite!(vidioc_dqbuf, V4L2_IOC_MAGIC, 17, V4l2Buffer);

const AMVECM_IOC_MAGIC: u8 = b'C';

/// `struct pq_ctrl_s`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PqCtrl {
    pub sharpness0_en: u8,
    pub sharpness1_en: u8,
    pub dnlp_en: u8,
    pub cm_en: u8,
    pub vadj1_en: u8,
    pub vd1_ctrst_en: u8,
    pub vadj2_en: u8,
    pub post_ctrst_en: u8,
    pub wb_en: u8,
    pub gamma_en: u8,
    pub lc_en: u8,
    pub black_ext_en: u8,
    pub chroma_cor_en: u8,
    pub reserved: u8,
}

/// `struct vpp_pq_ctrl_s`, pointing to a [`PqCtrl`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VppPqCtrl {
    pub length: u32,
    pub ptr: u64,
}

ioctl_write_ptr!(amvecm_set_pq_ctrl, AMVECM_IOC_MAGIC, 0x69, VppPqCtrl);
ioctl_read!(amvecm_get_pq_ctrl, AMVECM_IOC_MAGIC, 0x6a, VppPqCtrl);
