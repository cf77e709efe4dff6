// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Platform specific policies of the process information registry.

use crate::capabilities::StaticCapabilities;
use crate::metadata::PixelFormat;
use crate::process_info::deinterlace::DeinterlaceMethod;
use crate::process_info::factory::register_process_control;

/// Policies a platform may override.
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Method used when the configured one is not available.
    fn fallback_deinterlace_method(&self) -> DeinterlaceMethod {
        DeinterlaceMethod::Deinterlace
    }

    /// Formats the renderer accepts when the decoder did not announce any.
    fn render_formats(&self) -> Vec<PixelFormat> {
        vec![PixelFormat::Yuv420p]
    }

    fn min_tempo(&self) -> f32 {
        0.75
    }

    fn max_tempo(&self) -> f32 {
        1.55
    }

    fn allow_dts_hd_decode(&self) -> bool {
        true
    }
}

/// Platform used when no registered constructor matches the device.
#[derive(Debug, Default)]
pub struct GenericPlatform;

impl Platform for GenericPlatform {
    fn name(&self) -> &'static str {
        "generic"
    }
}

/// Amlogic SoCs, whose pictures never leave the hardware video layer.
#[derive(Debug, Default)]
pub struct AmlPlatform;

impl AmlPlatform {
    pub const ID: &'static str = "amlogic";

    /// Constructor for the registry factory, succeeding only on Amlogic hardware.
    pub fn create() -> Option<Box<dyn Platform>> {
        StaticCapabilities::probe()
            .cpu_family
            .map(|_| Box::new(AmlPlatform) as Box<dyn Platform>)
    }

    /// Makes registries created afterwards use this platform when running on Amlogic hardware.
    pub fn register() {
        register_process_control(Self::ID, Self::create);
    }
}

impl Platform for AmlPlatform {
    fn name(&self) -> &'static str {
        Self::ID
    }

    fn fallback_deinterlace_method(&self) -> DeinterlaceMethod {
        DeinterlaceMethod::Hardware
    }

    fn render_formats(&self) -> Vec<PixelFormat> {
        vec![PixelFormat::Opaque]
    }
}
