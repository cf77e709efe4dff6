// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::str::FromStr;

use argh::FromArgs;

use aml_codecs::EncodedFormat;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BackendKind {
    Dummy,
    Amlogic,
}

impl FromStr for BackendKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dummy" => Ok(BackendKind::Dummy),
            "amlogic" => Ok(BackendKind::Amlogic),
            _ => Err("unrecognized backend. Valid values: dummy, amlogic"),
        }
    }
}

/// Feeds a stream to the Amlogic hardware decoder and reports what came out
#[derive(Debug, FromArgs)]
pub struct Args {
    /// input file, Annex-B H.264/HEVC or IVF
    #[argh(positional)]
    pub input: PathBuf,

    /// input format. Deduced from the IVF header when absent.
    #[argh(option)]
    pub input_format: Option<EncodedFormat>,

    /// decoder backend (dummy or amlogic). Default: dummy
    #[argh(option, default = "BackendKind::Dummy")]
    pub backend: BackendKind,

    /// coded width of the stream. Default: 1920
    #[argh(option, default = "1920")]
    pub width: u32,

    /// coded height of the stream. Default: 1080
    #[argh(option, default = "1080")]
    pub height: u32,

    /// frame rate numerator. Default: 24000
    #[argh(option, default = "24000")]
    pub fps_rate: u32,

    /// frame rate denominator. Default: 1001
    #[argh(option, default = "1001")]
    pub fps_scale: u32,

    /// tempo to play at, clamped to what the platform allows
    #[argh(option)]
    pub tempo: Option<f32>,

    /// print every decoded picture
    #[argh(switch)]
    pub verbose: bool,
}
