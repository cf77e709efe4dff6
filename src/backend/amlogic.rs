// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backend for the Amlogic stream decoder.
//!
//! Compressed data is written to an amstream node, decoded pictures come out of the amlvideo
//! capture node (`/dev/video10`) once the frame path goes through it, and are shown by the
//! video layer configured through sysfs.

pub mod ioctl;
pub mod sysfs;

use std::fs::File;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::io::Write;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;

use anyhow::Context;
use log::debug;
use log::info;
use nix::errno::Errno;
use nix::libc;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::BufferStatus;
use crate::backend::DecoderBackend;
use crate::backend::DequeuedFrame;
use crate::backend::OpenParams;
use crate::backend::Video3dMode;
use crate::backend::VideoOutput;
use crate::EncodedFormat;
use crate::Rect;

use ioctl::AmIoParam;
use ioctl::DecSysinfo;
use ioctl::PqCtrl;
use ioctl::V4l2Buffer;
use ioctl::VFormat;
use ioctl::VppPqCtrl;
use sysfs::VfmMapGuard;

const AMLVIDEO_NODE: &str = "/dev/video10";
const AMVIDEO_NODE: &str = "/dev/amvideo";
const AMVECM_NODE: &str = "/dev/amvecm";

/// Depth of the amlvideo provider queue.
const AMLVIDEO_FRAME_SLOTS: u32 = 8;

fn open_node(path: &str, nonblocking: bool) -> BackendResult<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if nonblocking {
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path).map_err(|source| BackendError::Io {
        path: path.into(),
        source,
    })
}

struct OpenedDevice {
    stream: File,
    amlvideo: Arc<File>,
    // Restores the frame path after both nodes are closed.
    _vfm: VfmMapGuard,
}

/// The amstream decoder with its amlvideo output.
#[derive(Default)]
pub struct AmlogicBackend {
    device: Option<OpenedDevice>,
    params: Option<OpenParams>,
}

impl AmlogicBackend {
    pub fn new() -> Self {
        Default::default()
    }

    fn device(&self) -> BackendResult<&OpenedDevice> {
        self.device.as_ref().ok_or(BackendError::Errno(Errno::EBADF))
    }

    fn init_stream(params: &OpenParams) -> BackendResult<File> {
        let node = ioctl::stream_node(params.codec);
        let stream = open_node(node, true)?;
        let fd = stream.as_raw_fd();

        let mut sysinfo = DecSysinfo {
            format: VFormat::from(params.codec) as libc::c_uint,
            width: params.coded_resolution.width,
            height: params.coded_resolution.height,
            rate: params.video_rate,
            ..Default::default()
        };
        if params.codec == EncodedFormat::H264 {
            sysinfo.param = if params.pts_invalid {
                ioctl::SYSINFO_PARAM_EXTERNAL_PTS_INVALID
            } else {
                ioctl::SYSINFO_PARAM_SYNC_OUTSIDE
            };
        }

        // SAFETY: `fd` is the open amstream node, `sysinfo` outlives the calls and has the
        // layout the driver expects.
        unsafe {
            ioctl::amstream_set_vformat(fd, VFormat::from(params.codec) as libc::c_int)?;
            ioctl::amstream_set_sysinfo(fd, &sysinfo)?;
            ioctl::amstream_port_init(fd)?;
        }
        info!("opened {} for {}", node, params.codec.name());

        Ok(stream)
    }
}

impl DecoderBackend for AmlogicBackend {
    fn open(&mut self, params: &OpenParams) -> BackendResult<()> {
        if self.device.is_some() {
            return Err(Errno::EBUSY.into());
        }

        let vfm = VfmMapGuard::install(sysfs::AMLVIDEO_VFM_MAP)?;
        let stream = Self::init_stream(params)?;
        let amlvideo = Arc::new(open_node(AMLVIDEO_NODE, true)?);

        self.device = Some(OpenedDevice {
            stream,
            amlvideo,
            _vfm: vfm,
        });
        self.params = Some(params.clone());

        Ok(())
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            info!("closed the stream decoder");
        }
    }

    fn reset(&mut self) -> BackendResult<()> {
        let params = self.params.clone().ok_or(BackendError::Errno(Errno::EBADF))?;
        let OpenedDevice {
            stream,
            amlvideo,
            _vfm,
        } = self.device.take().ok_or(BackendError::Errno(Errno::EBADF))?;

        // The stream port has no flush request, reinitializing it drops everything it holds.
        // The node only accepts one user so it has to be closed first.
        drop(stream);
        let stream = Self::init_stream(&params)?;
        self.device = Some(OpenedDevice {
            stream,
            amlvideo,
            _vfm,
        });
        debug!("reset the stream decoder");

        Ok(())
    }

    fn write(&mut self, data: &[u8], pts: u64) -> BackendResult<usize> {
        let device = self.device.as_mut().ok_or(BackendError::Errno(Errno::EBADF))?;

        // SAFETY: `stream` is the open amstream node.
        unsafe { ioctl::amstream_set_tstamp(device.stream.as_raw_fd(), pts as libc::c_int)? };
        match device.stream.write(data) {
            Ok(written) => Ok(written),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(source) => Err(BackendError::Io {
                path: "amstream".into(),
                source,
            }),
        }
    }

    fn buffer_status(&mut self) -> BackendResult<BufferStatus> {
        let device = self.device()?;
        let mut param = AmIoParam::default();

        // SAFETY: `param` is large enough for any `am_io_param` variant the driver writes.
        unsafe { ioctl::amstream_vb_status(device.stream.as_raw_fd(), &mut param)? };

        Ok(BufferStatus {
            size: param.status.size.max(0) as usize,
            data_len: param.status.data_len.max(0) as usize,
            free_len: param.status.free_len.max(0) as usize,
        })
    }

    fn dequeue_frame(&mut self) -> BackendResult<Option<DequeuedFrame>> {
        let device = self.device()?;
        let mut buf = V4l2Buffer::capture(0);

        // SAFETY: `buf` is a `v4l2_buffer` with the layout of 64 bit userspace.
        match unsafe { ioctl::vidioc_dqbuf(device.amlvideo.as_raw_fd(), &mut buf) } {
            Ok(_) => Ok(Some(DequeuedFrame {
                index: buf.index,
                pts: buf.pts(),
                interlaced: buf.field == ioctl::V4L2_FIELD_INTERLACED,
                dovi_metadata: None,
            })),
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn queue_frame(&mut self, index: u32, drop: bool) -> BackendResult<()> {
        let device = self.device()?;
        let mut buf = V4l2Buffer::capture(index);
        if drop {
            buf.flags |= ioctl::V4L2_BUF_FLAG_DONE;
        }

        // SAFETY: `buf` is a `v4l2_buffer` with the layout of 64 bit userspace.
        match unsafe { ioctl::vidioc_qbuf(device.amlvideo.as_raw_fd(), &mut buf) } {
            Ok(_) => Ok(()),
            Err(Errno::EINVAL) => Err(BackendError::InvalidIndex(index)),
            Err(e) => Err(e.into()),
        }
    }

    fn set_trick_mode(&mut self, enable: bool) -> BackendResult<()> {
        let device = self.device()?;
        let mode = if enable {
            ioctl::TRICKMODE_I
        } else {
            ioctl::TRICKMODE_NONE
        };

        // SAFETY: `stream` is the open amstream node.
        unsafe { ioctl::amstream_set_trickmode(device.stream.as_raw_fd(), mode)? };
        Ok(())
    }

    fn pause(&mut self, pause: bool) -> BackendResult<()> {
        let device = self.device()?;

        // SAFETY: `stream` is the open amstream node.
        unsafe { ioctl::amstream_vpause(device.stream.as_raw_fd(), pause as libc::c_int)? };
        Ok(())
    }

    fn num_frame_slots(&self) -> u32 {
        AMLVIDEO_FRAME_SLOTS
    }

    fn poll_handle(&self) -> Option<Arc<dyn AsFd + Send + Sync>> {
        self.device
            .as_ref()
            .map(|d| d.amlvideo.clone() as Arc<dyn AsFd + Send + Sync>)
    }
}

/// The video layer, driven through sysfs and the amvideo/amvecm nodes.
#[derive(Default)]
pub struct AmlogicVideoOutput;

impl AmlogicVideoOutput {
    pub fn new() -> Self {
        Self
    }
}

impl VideoOutput for AmlogicVideoOutput {
    fn set_video_axis(&mut self, axis: Rect) -> BackendResult<()> {
        let value = format!(
            "{} {} {} {}",
            axis.x1 as i32, axis.y1 as i32, axis.x2 as i32, axis.y2 as i32
        );
        sysfs::write_string(sysfs::VIDEO_AXIS, &value)
    }

    fn set_zoom(&mut self, percent: i32) -> BackendResult<()> {
        sysfs::write_int(sysfs::VIDEO_ZOOM, percent)
    }

    fn set_3d_mode(&mut self, mode: Video3dMode) -> BackendResult<()> {
        let value = match mode {
            Video3dMode::Disabled => ioctl::MODE_3D_DISABLE,
            Video3dMode::SideBySideToMono { right: false } => {
                ioctl::MODE_3D_LR | ioctl::MODE_3D_TO_2D_L
            }
            Video3dMode::SideBySideToMono { right: true } => {
                ioctl::MODE_3D_LR | ioctl::MODE_3D_TO_2D_R
            }
            Video3dMode::TopBottomToMono { right: false } => {
                ioctl::MODE_3D_TB | ioctl::MODE_3D_TO_2D_L
            }
            Video3dMode::TopBottomToMono { right: true } => {
                ioctl::MODE_3D_TB | ioctl::MODE_3D_TO_2D_R
            }
        };
        let amvideo = open_node(AMVIDEO_NODE, false)?;

        // SAFETY: `amvideo` is an open amvideo node.
        unsafe { ioctl::amstream_set_3d_type(amvideo.as_raw_fd(), value)? };
        Ok(())
    }

    fn show_video(&mut self, show: bool) -> BackendResult<()> {
        sysfs::write_int(sysfs::VIDEO_DISABLE, if show { 0 } else { 1 })
    }

    fn enable_vadj1(&mut self) -> BackendResult<()> {
        let amvecm = open_node(AMVECM_NODE, false)?;
        let fd = amvecm.as_raw_fd();
        let mut pq = PqCtrl::default();
        let mut ctrl = VppPqCtrl {
            length: std::mem::size_of::<PqCtrl>() as u32,
            ptr: &mut pq as *mut PqCtrl as u64,
        };

        // SAFETY: `ctrl` points to `pq`, which lives until the end of this function.
        unsafe { ioctl::amvecm_get_pq_ctrl(fd, &mut ctrl) }
            .context("reading the picture quality stages")?;
        if pq.vadj1_en == 1 {
            return Ok(());
        }

        pq.vadj1_en = 1;
        ctrl.ptr = &mut pq as *mut PqCtrl as u64;
        // SAFETY: as above.
        unsafe { ioctl::amvecm_set_pq_ctrl(fd, &ctrl) }
            .context("enabling the vadj1 stage")?;
        debug!("enabled the vadj1 stage");

        Ok(())
    }
}
