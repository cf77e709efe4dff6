// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Creation of [`ProcessInfo`] instances through platform constructors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;

use log::debug;

use crate::config::PlayerSettings;
use crate::process_info::platform::GenericPlatform;
use crate::process_info::platform::Platform;
use crate::process_info::ProcessInfo;

/// Constructor of a platform, returning `None` when the platform does not match the device.
pub type CreateProcessControl = fn() -> Option<Box<dyn Platform>>;

/// Table of platform constructors, tried in id order.
#[derive(Default)]
pub struct ProcessInfoFactory {
    controls: BTreeMap<String, CreateProcessControl>,
}

impl ProcessInfoFactory {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `create` under `id`, replacing a constructor previously registered there.
    pub fn register(&mut self, id: impl Into<String>, create: CreateProcessControl) {
        self.controls.insert(id.into(), create);
    }

    /// Builds a registry for the first platform whose constructor succeeds, or for the generic
    /// platform.
    pub fn create_instance(&self, settings: PlayerSettings) -> Arc<ProcessInfo> {
        let platform = self
            .controls
            .iter()
            .find_map(|(id, create)| {
                let platform = create()?;
                debug!("process info platform {} ({})", platform.name(), id);
                Some(platform)
            })
            .unwrap_or_else(|| Box::new(GenericPlatform));

        Arc::new(ProcessInfo::new(platform, settings))
    }
}

fn global_factory() -> &'static Mutex<ProcessInfoFactory> {
    static FACTORY: OnceLock<Mutex<ProcessInfoFactory>> = OnceLock::new();
    FACTORY.get_or_init(Default::default)
}

/// Registers a platform constructor with the process-wide factory.
pub fn register_process_control(id: impl Into<String>, create: CreateProcessControl) {
    global_factory()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(id, create);
}

/// Creates a registry through the process-wide factory.
pub fn create_instance(settings: PlayerSettings) -> Arc<ProcessInfo> {
    global_factory()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .create_instance(settings)
}
