// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Mach port runtime seam used by the multiprocess rendezvous fixture
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests in `fake.rs`, `rights.rs`, `registry.rs`
//!
//! PUBLIC API:
//!   - Kernel trait: bootstrap, port allocation, mach_msg send/receive, pid_for_task, release
//!   - ReceiveRight / SendRight / TaskRight: move-only rights with explicit release
//!   - registry::{check_in, look_up, new_receive_right}: typed bootstrap binding
//!   - Wait: blocking behaviour of send/receive
//!   - KernelError: kernel failures tagged with the failing call
//!
//! BACKENDS:
//!   - fake::FakeKernel (feature `backend-host`): deterministic in-memory emulation
//!   - darwin::MachKernel (`target_os = "macos"`): real Mach traps

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::fmt;
use core::time::Duration;

use nexus_mach_abi::kern::{self, KernReturn};
use nexus_mach_abi::{ExpectedIdentity, HELLO_RECEIVE_SIZE};

pub use nexus_mach_abi::{PortName, PORT_NULL};

pub mod registry;
mod rights;

pub use rights::{
    ReceiveKind, ReceiveRight, Right, RightKind, SendKind, SendRight, TaskKind, TaskRight,
};

#[cfg(feature = "backend-host")]
pub mod fake;

#[cfg(target_os = "macos")]
#[allow(unsafe_code)]
pub mod darwin;

/// Result type returned by kernel operations.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// No `MACH_*_TIMEOUT` option; `mach_msg` waits as long as it takes.
    Blocking,
    /// A zero timeout: the message must be deliverable right away.
    NonBlocking,
    /// `MACH_*_TIMEOUT` with this bound, rounded down to milliseconds.
    Timeout(Duration),
}

impl Wait {
    /// Timeout in the millisecond unit `mach_msg` takes, or `None` when blocking forever.
    pub fn timeout_ms(self) -> Option<u32> {
        match self {
            Self::Blocking => None,
            Self::NonBlocking => Some(0),
            Self::Timeout(duration) => Some(duration.as_millis().min(u128::from(u32::MAX)) as u32),
        }
    }
}

/// A `kern_return_t` rendered with its symbolic name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernCode(pub KernReturn);

impl fmt::Display for KernCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", kern::name(self.0), self.0)
    }
}

/// Errors produced by kernel operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The call returned a failure code.
    #[error("{call}: {code}")]
    Kern {
        /// Failing call.
        call: &'static str,
        /// Returned code.
        code: KernCode,
    },
    /// `bootstrap_check_in` found the name already registered.
    #[error("{call}: service name already registered")]
    NameInUse {
        /// Failing call.
        call: &'static str,
    },
    /// `bootstrap_look_up` found no such name.
    #[error("{call}: unknown service name")]
    UnknownService {
        /// Failing call.
        call: &'static str,
    },
    /// The requested timeout expired.
    #[error("{call}: timed out")]
    TimedOut {
        /// Failing call.
        call: &'static str,
    },
    /// A BSD call failed with `errno`.
    #[error("{call}: errno {errno}")]
    Os {
        /// Failing call.
        call: &'static str,
        /// `errno` at the time of failure.
        errno: i32,
    },
}

impl KernelError {
    /// Classifies a non-success return code from `call`.
    pub const fn from_kern(call: &'static str, code: KernReturn) -> Self {
        match code {
            kern::BOOTSTRAP_NAME_IN_USE => Self::NameInUse { call },
            kern::BOOTSTRAP_UNKNOWN_SERVICE => Self::UnknownService { call },
            kern::MACH_RCV_TIMED_OUT | kern::MACH_SEND_TIMED_OUT => Self::TimedOut { call },
            _ => Self::Kern { call, code: KernCode(code) },
        }
    }

    /// Name of the call that failed.
    pub const fn call(&self) -> &'static str {
        match self {
            Self::Kern { call, .. }
            | Self::NameInUse { call }
            | Self::UnknownService { call }
            | Self::TimedOut { call }
            | Self::Os { call, .. } => call,
        }
    }
}

/// Maps a return code to `Ok(())` or a classified [`KernelError`].
pub fn check(call: &'static str, code: KernReturn) -> Result<()> {
    if code == kern::KERN_SUCCESS {
        Ok(())
    } else {
        Err(KernelError::from_kern(call, code))
    }
}

/// Kind of right being released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RightType {
    /// Receive right (`MACH_PORT_RIGHT_RECEIVE`).
    Receive,
    /// Send right (`MACH_PORT_RIGHT_SEND`), task ports included.
    Send,
}

/// Identity of the calling process as the kernel sees it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Effective user id.
    pub euid: u32,
    /// Effective group id.
    pub egid: u32,
    /// Real user id.
    pub ruid: u32,
    /// Real group id.
    pub rgid: u32,
    /// Audit user id.
    pub auid: u32,
    /// Audit session id.
    pub asid: i32,
}

impl Credentials {
    /// Identity a child split off this process must present, given its pid.
    pub const fn expect_child(&self, pid: i32) -> ExpectedIdentity {
        ExpectedIdentity {
            auid: self.auid,
            euid: self.euid,
            egid: self.egid,
            ruid: self.ruid,
            rgid: self.rgid,
            pid,
            asid: self.asid,
        }
    }
}

/// Aligned buffer large enough for the hello message plus an audit trailer.
#[repr(C, align(8))]
#[derive(Clone)]
pub struct MessageBuffer {
    bytes: [u8; HELLO_RECEIVE_SIZE],
}

impl MessageBuffer {
    /// Creates a zeroed buffer.
    pub const fn new() -> Self {
        Self { bytes: [0; HELLO_RECEIVE_SIZE] }
    }

    /// Creates a buffer whose prefix is `message`; `None` if it does not fit.
    pub fn with_message(message: &[u8]) -> Option<Self> {
        let mut buffer = Self::new();
        buffer.bytes.get_mut(..message.len())?.copy_from_slice(message);
        Some(buffer)
    }

    /// Total capacity in bytes.
    pub const fn capacity(&self) -> usize {
        HELLO_RECEIVE_SIZE
    }

    /// Buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable buffer contents.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Zeroes the buffer.
    pub fn clear(&mut self) {
        self.bytes = [0; HELLO_RECEIVE_SIZE];
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer").field("bytes", &&self.bytes[..]).finish()
    }
}

/// Kernel surface the rendezvous handshake runs on.
///
/// Names are raw [`PortName`]s here; ownership is tracked one level up by [`Right`].
pub trait Kernel {
    /// `bootstrap_check_in`: registers `service` and returns the receive right behind it.
    fn check_in(&self, service: &str) -> Result<PortName>;

    /// `bootstrap_look_up`: resolves `service` to a send right.
    fn look_up(&self, service: &str) -> Result<PortName>;

    /// `mach_port_allocate(MACH_PORT_RIGHT_RECEIVE)`.
    fn allocate_receive(&self) -> Result<PortName>;

    /// `mach_task_self()`; not owned by the caller and never released.
    fn task_self(&self) -> PortName;

    /// `mach_msg(MACH_SEND_MSG)` of the first `send_size` bytes of `buffer`.
    fn send(&self, buffer: &mut MessageBuffer, send_size: usize, wait: Wait) -> Result<()>;

    /// `mach_msg(MACH_RCV_MSG)` on `port`, optionally requesting the audit trailer.
    fn receive(
        &self,
        buffer: &mut MessageBuffer,
        port: PortName,
        wait: Wait,
        audit_trailer: bool,
    ) -> Result<()>;

    /// `mach_msg_destroy`: releases every right carried by a received message.
    fn destroy(&self, buffer: &mut MessageBuffer);

    /// `pid_for_task`.
    fn pid_for_task(&self, task: PortName) -> Result<i32>;

    /// Drops one reference of `right` on `name`.
    fn release(&self, name: PortName, right: RightType) -> Result<()>;

    /// Identity of the calling process.
    fn credentials(&self) -> Result<Credentials>;
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn check_in(&self, service: &str) -> Result<PortName> {
        (**self).check_in(service)
    }

    fn look_up(&self, service: &str) -> Result<PortName> {
        (**self).look_up(service)
    }

    fn allocate_receive(&self) -> Result<PortName> {
        (**self).allocate_receive()
    }

    fn task_self(&self) -> PortName {
        (**self).task_self()
    }

    fn send(&self, buffer: &mut MessageBuffer, send_size: usize, wait: Wait) -> Result<()> {
        (**self).send(buffer, send_size, wait)
    }

    fn receive(
        &self,
        buffer: &mut MessageBuffer,
        port: PortName,
        wait: Wait,
        audit_trailer: bool,
    ) -> Result<()> {
        (**self).receive(buffer, port, wait, audit_trailer)
    }

    fn destroy(&self, buffer: &mut MessageBuffer) {
        (**self).destroy(buffer)
    }

    fn pid_for_task(&self, task: PortName) -> Result<i32> {
        (**self).pid_for_task(task)
    }

    fn release(&self, name: PortName, right: RightType) -> Result<()> {
        (**self).release(name, right)
    }

    fn credentials(&self) -> Result<Credentials> {
        (**self).credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_timeout_in_ms() {
        assert_eq!(Wait::Blocking.timeout_ms(), None);
        assert_eq!(Wait::NonBlocking.timeout_ms(), Some(0));
        assert_eq!(Wait::Timeout(Duration::from_millis(250)).timeout_ms(), Some(250));
        assert_eq!(Wait::Timeout(Duration::from_secs(u64::MAX)).timeout_ms(), Some(u32::MAX));
    }

    #[test]
    fn bootstrap_codes_are_classified() {
        assert_eq!(
            KernelError::from_kern("bootstrap_check_in", kern::BOOTSTRAP_NAME_IN_USE),
            KernelError::NameInUse { call: "bootstrap_check_in" }
        );
        assert!(matches!(
            KernelError::from_kern("mach_msg", kern::MACH_RCV_TIMED_OUT),
            KernelError::TimedOut { .. }
        ));
        let err = KernelError::from_kern("mach_msg", kern::MACH_SEND_INVALID_DEST);
        assert_eq!(err.to_string(), "mach_msg: MACH_SEND_INVALID_DEST (0x10000003)");
        assert_eq!(err.call(), "mach_msg");
    }

    #[test]
    fn message_buffer_is_aligned() {
        assert_eq!(core::mem::align_of::<MessageBuffer>(), 8);
        assert!(MessageBuffer::with_message(&[0u8; HELLO_RECEIVE_SIZE + 1]).is_none());
        let buffer = MessageBuffer::with_message(&[7u8; 4]).expect("fits");
        assert_eq!(&buffer.as_bytes()[..5], &[7, 7, 7, 7, 0]);
    }
}
