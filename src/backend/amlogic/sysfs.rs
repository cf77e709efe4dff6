// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Attribute files of the video drivers.

use std::fs;

use log::debug;
use log::warn;

use crate::backend::BackendError;
use crate::backend::BackendResult;

pub const VIDEO_AXIS: &str = "/sys/class/video/axis";
pub const VIDEO_DISABLE: &str = "/sys/class/video/disable_video";
pub const VIDEO_ZOOM: &str = "/sys/class/video/zoom";
pub const VFM_MAP: &str = "/sys/class/vfm/map";

/// Frame path routing decoded pictures through the amlvideo capture node.
pub const AMLVIDEO_VFM_MAP: &str = "decoder ppmgr deinterlace amlvideo amvideo";

pub fn read_string(path: &str) -> BackendResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| BackendError::Io {
            path: path.into(),
            source,
        })
}

pub fn write_string(path: &str, value: &str) -> BackendResult<()> {
    debug!("{} <- {}", path, value);
    fs::write(path, value).map_err(|source| BackendError::Io {
        path: path.into(),
        source,
    })
}

pub fn write_int(path: &str, value: i32) -> BackendResult<()> {
    write_string(path, &value.to_string())
}

/// Extracts the chain of map `name` from the content of the vfm `map` attribute.
///
/// Each line reads like `default { decoder(0) ppmgr(1) amvideo }`, the numbers being the
/// activity state of each node.
pub fn parse_vfm_map(content: &str, name: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (map_name, rest) = line.trim().split_once('{')?;
        if map_name.trim() != name {
            return None;
        }
        let (chain, _) = rest.split_once('}')?;
        let nodes: Vec<&str> = chain
            .split_whitespace()
            .map(|node| node.split_once('(').map_or(node, |(n, _)| n))
            .collect();

        Some(nodes.join(" "))
    })
}

pub fn get_vfm_map(name: &str) -> BackendResult<Option<String>> {
    Ok(parse_vfm_map(&read_string(VFM_MAP)?, name))
}

pub fn set_vfm_map(name: &str, chain: &str) -> BackendResult<()> {
    write_string(VFM_MAP, &format!("rm {name}"))?;
    write_string(VFM_MAP, &format!("add {name} {chain}"))
}

/// Replaces the `default` frame path for as long as it lives.
pub struct VfmMapGuard {
    saved: Option<String>,
}

impl VfmMapGuard {
    pub fn install(chain: &str) -> BackendResult<Self> {
        let saved = get_vfm_map("default")?;
        if saved.as_deref() != Some(chain) {
            set_vfm_map("default", chain)?;
        }

        Ok(Self { saved })
    }
}

impl Drop for VfmMapGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = set_vfm_map("default", &saved) {
                warn!("failed to restore vfm map: {}", e);
            }
        }
    }
}
