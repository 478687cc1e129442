// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Move-only wrappers around port names.
//!
//! A [`Right`] is released exactly once: either explicitly through [`Right::release`] or by
//! [`Right::abandon`] when the name is known not to be backed by a live right (a name
//! inherited across a process split). Dropping a live right logs the leak.

use core::fmt;
use core::marker::PhantomData;

use crate::{Kernel, PortName, Result, RightType};

mod private {
    pub trait Sealed {}
}

/// Marker naming what a [`Right`] grants.
pub trait RightKind: private::Sealed {
    /// Kernel right type dropped on release.
    const RIGHT: RightType;
    /// Label used in log lines.
    const LABEL: &'static str;
}

/// Receive right marker.
#[derive(Debug)]
pub enum ReceiveKind {}
/// Send right marker.
#[derive(Debug)]
pub enum SendKind {}
/// Task port (send right) marker.
#[derive(Debug)]
pub enum TaskKind {}

impl private::Sealed for ReceiveKind {}
impl private::Sealed for SendKind {}
impl private::Sealed for TaskKind {}

impl RightKind for ReceiveKind {
    const RIGHT: RightType = RightType::Receive;
    const LABEL: &'static str = "receive";
}

impl RightKind for SendKind {
    const RIGHT: RightType = RightType::Send;
    const LABEL: &'static str = "send";
}

impl RightKind for TaskKind {
    const RIGHT: RightType = RightType::Send;
    const LABEL: &'static str = "task";
}

/// Owned port right.
#[must_use = "port rights must be released or abandoned"]
pub struct Right<K: RightKind> {
    name: PortName,
    live: bool,
    _kind: PhantomData<K>,
}

/// Owned receive right.
pub type ReceiveRight = Right<ReceiveKind>;
/// Owned send right.
pub type SendRight = Right<SendKind>;
/// Owned send right to another task.
pub type TaskRight = Right<TaskKind>;

impl<K: RightKind> Right<K> {
    /// Takes ownership of `name`.
    pub const fn from_raw(name: PortName) -> Self {
        Self { name, live: true, _kind: PhantomData }
    }

    /// Port name in the caller's name space.
    pub const fn name(&self) -> PortName {
        self.name
    }

    /// Drops the right in the kernel.
    pub fn release<Kn: Kernel + ?Sized>(mut self, kernel: &Kn) -> Result<()> {
        self.live = false;
        let result = kernel.release(self.name, K::RIGHT);
        if let Err(err) = &result {
            log::warn!("release of {} right {:#x} failed: {err}", K::LABEL, self.name);
        }
        result
    }

    /// Gives up ownership without touching the kernel and returns the bare name.
    pub fn abandon(mut self) -> PortName {
        self.live = false;
        self.name
    }
}

impl<K: RightKind> Drop for Right<K> {
    fn drop(&mut self) {
        if self.live {
            log::error!("{} right {:#x} dropped without release", K::LABEL, self.name);
        }
    }
}

impl<K: RightKind> fmt::Debug for Right<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Right({:#x})", K::LABEL, self.name)
    }
}

impl<K: RightKind> PartialEq for Right<K> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<K: RightKind> Eq for Right<K> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Credentials, KernelError, MessageBuffer, Wait};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        released: Mutex<Vec<(PortName, RightType)>>,
    }

    impl Kernel for Recorder {
        fn check_in(&self, _: &str) -> Result<PortName> {
            unreachable!()
        }
        fn look_up(&self, _: &str) -> Result<PortName> {
            unreachable!()
        }
        fn allocate_receive(&self) -> Result<PortName> {
            unreachable!()
        }
        fn task_self(&self) -> PortName {
            unreachable!()
        }
        fn send(&self, _: &mut MessageBuffer, _: usize, _: Wait) -> Result<()> {
            unreachable!()
        }
        fn receive(&self, _: &mut MessageBuffer, _: PortName, _: Wait, _: bool) -> Result<()> {
            unreachable!()
        }
        fn destroy(&self, _: &mut MessageBuffer) {}
        fn pid_for_task(&self, _: PortName) -> Result<i32> {
            unreachable!()
        }
        fn release(&self, name: PortName, right: RightType) -> Result<()> {
            if name == 0 {
                return Err(KernelError::from_kern("mach_port_deallocate", 15));
            }
            self.released.lock().unwrap().push((name, right));
            Ok(())
        }
        fn credentials(&self) -> Result<Credentials> {
            unreachable!()
        }
    }

    #[test]
    fn release_maps_kind_to_right_type() {
        let kernel = Recorder::default();
        ReceiveRight::from_raw(0x103).release(&kernel).expect("receive");
        SendRight::from_raw(0x207).release(&kernel).expect("send");
        TaskRight::from_raw(0x30b).release(&kernel).expect("task");
        assert_eq!(
            *kernel.released.lock().unwrap(),
            [(0x103, RightType::Receive), (0x207, RightType::Send), (0x30b, RightType::Send)]
        );
    }

    #[test]
    fn abandon_skips_the_kernel() {
        let kernel = Recorder::default();
        assert_eq!(ReceiveRight::from_raw(0x103).abandon(), 0x103);
        assert!(kernel.released.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_release_still_consumes() {
        let kernel = Recorder::default();
        assert!(SendRight::from_raw(0).release(&kernel).is_err());
    }
}
