// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Waiting for decoded pictures.
//!
//! The video layer exposes a single descriptor signalling that a picture is ready, whatever
//! session decoded it. [`PollDevice`] holds that descriptor and lets one poller at a time wait on
//! it. The session owning the device installs it when it opens and removes it when it closes.

use std::os::fd::AsFd;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::poll;
use nix::poll::PollFd;
use nix::poll::PollFlags;
use nix::poll::PollTimeout;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("the poll device is already being polled")]
    Busy,
    #[error("no poll device installed")]
    NoDevice,
    #[error("poll failed: {0}")]
    Errno(#[from] Errno),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// A picture is ready to be dequeued.
    Ready,
    TimedOut,
}

pub type PollDeviceHandle = Arc<dyn AsFd + Send + Sync>;

/// Descriptor signalling ready pictures, polled by at most one thread at a time.
pub struct PollDevice {
    device: Mutex<Option<PollDeviceHandle>>,
    polling: AtomicBool,
}

/// Clears the polling flag when the poll ends.
struct PollingGuard<'a>(&'a AtomicBool);

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollDevice {
    pub const fn new() -> Self {
        Self {
            device: Mutex::new(None),
            polling: AtomicBool::new(false),
        }
    }

    /// The instance shared by the sessions of the process.
    pub fn global() -> Arc<PollDevice> {
        static DEVICE: OnceLock<Arc<PollDevice>> = OnceLock::new();
        DEVICE.get_or_init(|| Arc::new(PollDevice::new())).clone()
    }

    /// Installs `device`, or removes the current one with `None`.
    pub fn set_device(&self, device: Option<PollDeviceHandle>) {
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = device;
    }

    /// Removes `device` if it is the one installed. Returns whether it was.
    ///
    /// A session closing after another one installed its own device leaves that device alone.
    pub fn remove_device(&self, device: &PollDeviceHandle) -> bool {
        let mut current = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(installed) if Arc::ptr_eq(installed, device) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_device(&self) -> bool {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Waits up to `timeout` for a picture to be ready.
    pub fn poll(&self, timeout: Duration) -> Result<PollOutcome, PollError> {
        if self.polling.swap(true, Ordering::Acquire) {
            return Err(PollError::Busy);
        }
        let _guard = PollingGuard(&self.polling);

        let device = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PollError::NoDevice)?;
        let timeout = PollTimeout::from(u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX));

        loop {
            let mut fds = [PollFd::new(device.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(PollOutcome::TimedOut),
                Ok(_) => return Ok(PollOutcome::Ready),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Default for PollDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use nix::sys::eventfd::EfdFlags;
    use nix::sys::eventfd::EventFd;

    use super::*;

    #[test]
    fn poll_without_device() {
        let device = PollDevice::new();
        assert!(!device.has_device());
        assert!(matches!(
            device.poll(Duration::from_millis(1)),
            Err(PollError::NoDevice)
        ));
        // The failed poll released the device.
        assert!(!device.polling.load(Ordering::Acquire));
    }

    #[test]
    fn poll_readiness() {
        let event = Arc::new(EventFd::from_flags(EfdFlags::EFD_SEMAPHORE).unwrap());
        let device = PollDevice::new();
        device.set_device(Some(event.clone() as PollDeviceHandle));

        assert_eq!(
            device.poll(Duration::from_millis(10)).unwrap(),
            PollOutcome::TimedOut
        );
        event.write(1).unwrap();
        assert_eq!(
            device.poll(Duration::from_millis(10)).unwrap(),
            PollOutcome::Ready
        );

        device.set_device(None);
        assert!(!device.has_device());
    }

    #[test]
    fn remove_only_the_installed_device() {
        let first = Arc::new(EventFd::new().unwrap()) as PollDeviceHandle;
        let second = Arc::new(EventFd::new().unwrap()) as PollDeviceHandle;
        let device = PollDevice::new();
        device.set_device(Some(second.clone()));

        assert!(!device.remove_device(&first));
        assert!(device.has_device());
        assert!(device.remove_device(&second));
        assert!(!device.has_device());
        assert!(!device.remove_device(&second));
    }

    #[test]
    fn single_poller_at_a_time() {
        let event = Arc::new(EventFd::from_flags(EfdFlags::EFD_SEMAPHORE).unwrap());
        let device = Arc::new(PollDevice::new());
        device.set_device(Some(event.clone() as PollDeviceHandle));
        let started = Arc::new(Barrier::new(2));

        let poller = {
            let device = device.clone();
            let started = started.clone();
            thread::spawn(move || {
                let flagged = device.polling.swap(true, Ordering::Acquire);
                let _guard = PollingGuard(&device.polling);
                started.wait();
                // Hold the device until the main thread has tried it.
                thread::sleep(Duration::from_millis(50));
                flagged
            })
        };

        started.wait();
        assert!(matches!(
            device.poll(Duration::from_millis(1)),
            Err(PollError::Busy)
        ));
        assert!(!poller.join().unwrap());
        assert_eq!(
            device.poll(Duration::from_millis(1)).unwrap(),
            PollOutcome::TimedOut
        );
    }
}
