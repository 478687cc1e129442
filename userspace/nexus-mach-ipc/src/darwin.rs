// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Darwin backend issuing real Mach traps through libSystem
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: nexus-multiprocess/tests/darwin_fork.rs (macOS only)
//!
//! SAFETY: every `unsafe` block below is a single FFI call whose pointer arguments are
//! derived from live Rust references for the duration of the call.

use std::ffi::CString;
use std::mem::size_of;

use libc::{c_char, c_int};
use nexus_mach_abi::kern::{KernReturn, KERN_INVALID_ARGUMENT};
use nexus_mach_abi::{MsgHeader, MsgOptions, MSG_TIMEOUT_NONE};

use crate::{
    check, Credentials, Kernel, KernelError, MessageBuffer, PortName, Result, RightType, Wait,
    PORT_NULL,
};

const MACH_PORT_RIGHT_RECEIVE: u32 = 1;

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct AuMask {
    am_success: u32,
    am_failure: u32,
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct AuTidAddr {
    at_port: i32,
    at_type: u32,
    at_addr: [u32; 4],
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct AuditinfoAddr {
    ai_auid: u32,
    ai_mask: AuMask,
    ai_termid: AuTidAddr,
    ai_asid: i32,
    ai_flags: u64,
}

extern "C" {
    static mach_task_self_: PortName;
    static bootstrap_port: PortName;

    fn mach_msg(
        msg: *mut MsgHeader,
        option: c_int,
        send_size: u32,
        rcv_size: u32,
        rcv_name: PortName,
        timeout: u32,
        notify: PortName,
    ) -> KernReturn;
    fn mach_msg_destroy(msg: *mut MsgHeader);
    fn bootstrap_check_in(
        bp: PortName,
        service_name: *const c_char,
        sp: *mut PortName,
    ) -> KernReturn;
    fn bootstrap_look_up(
        bp: PortName,
        service_name: *const c_char,
        sp: *mut PortName,
    ) -> KernReturn;
    fn mach_port_allocate(task: PortName, right: u32, name: *mut PortName) -> KernReturn;
    fn mach_port_deallocate(task: PortName, name: PortName) -> KernReturn;
    fn mach_port_mod_refs(task: PortName, name: PortName, right: u32, delta: i32) -> KernReturn;
    fn pid_for_task(task: PortName, pid: *mut c_int) -> KernReturn;
    fn getaudit_addr(info: *mut AuditinfoAddr, length: c_int) -> c_int;
}

/// Kernel backed by the running Darwin system.
#[derive(Clone, Copy, Debug, Default)]
pub struct MachKernel;

impl MachKernel {
    /// Creates a handle; every call goes straight to the kernel.
    pub const fn new() -> Self {
        Self
    }

    fn self_task() -> PortName {
        // SAFETY: initialised by libSystem before `main` and never written afterwards.
        unsafe { mach_task_self_ }
    }

    fn service_name(call: &'static str, service: &str) -> Result<CString> {
        CString::new(service).map_err(|_| KernelError::from_kern(call, KERN_INVALID_ARGUMENT))
    }
}

impl Kernel for MachKernel {
    fn check_in(&self, service: &str) -> Result<PortName> {
        const CALL: &str = "bootstrap_check_in";
        let name = Self::service_name(CALL, service)?;
        let mut port = PORT_NULL;
        // SAFETY: `name` is NUL-terminated and `port` outlives the call.
        let kr = unsafe { bootstrap_check_in(bootstrap_port, name.as_ptr(), &mut port) };
        check(CALL, kr)?;
        Ok(port)
    }

    fn look_up(&self, service: &str) -> Result<PortName> {
        const CALL: &str = "bootstrap_look_up";
        let name = Self::service_name(CALL, service)?;
        let mut port = PORT_NULL;
        // SAFETY: as above.
        let kr = unsafe { bootstrap_look_up(bootstrap_port, name.as_ptr(), &mut port) };
        check(CALL, kr)?;
        Ok(port)
    }

    fn allocate_receive(&self) -> Result<PortName> {
        let mut port = PORT_NULL;
        // SAFETY: `port` outlives the call.
        let kr =
            unsafe { mach_port_allocate(Self::self_task(), MACH_PORT_RIGHT_RECEIVE, &mut port) };
        check("mach_port_allocate", kr)?;
        Ok(port)
    }

    fn task_self(&self) -> PortName {
        Self::self_task()
    }

    fn send(&self, buffer: &mut MessageBuffer, send_size: usize, wait: Wait) -> Result<()> {
        let mut options = MsgOptions::SEND_MSG;
        let timeout = match wait.timeout_ms() {
            Some(ms) => {
                options |= MsgOptions::SEND_TIMEOUT;
                ms
            }
            None => MSG_TIMEOUT_NONE,
        };
        let send_size = send_size.min(buffer.capacity()) as u32;
        // SAFETY: the buffer is 8-byte aligned and at least `send_size` bytes long.
        let kr = unsafe {
            mach_msg(
                buffer.as_mut_bytes().as_mut_ptr().cast(),
                options.bits(),
                send_size,
                0,
                PORT_NULL,
                timeout,
                PORT_NULL,
            )
        };
        check("mach_msg", kr)
    }

    fn receive(
        &self,
        buffer: &mut MessageBuffer,
        port: PortName,
        wait: Wait,
        audit_trailer: bool,
    ) -> Result<()> {
        let mut options = MsgOptions::RCV_MSG;
        if audit_trailer {
            options |= MsgOptions::RCV_TRAILER_AUDIT;
        }
        let timeout = match wait.timeout_ms() {
            Some(ms) => {
                options |= MsgOptions::RCV_TIMEOUT;
                ms
            }
            None => MSG_TIMEOUT_NONE,
        };
        let capacity = buffer.capacity() as u32;
        // SAFETY: the kernel writes at most `capacity` bytes into the aligned buffer.
        let kr = unsafe {
            mach_msg(
                buffer.as_mut_bytes().as_mut_ptr().cast(),
                options.bits(),
                0,
                capacity,
                port,
                timeout,
                PORT_NULL,
            )
        };
        check("mach_msg", kr)
    }

    fn destroy(&self, buffer: &mut MessageBuffer) {
        // SAFETY: the buffer holds a message previously written by `mach_msg`.
        unsafe { mach_msg_destroy(buffer.as_mut_bytes().as_mut_ptr().cast()) };
        buffer.clear();
    }

    fn pid_for_task(&self, task: PortName) -> Result<i32> {
        let mut pid: c_int = -1;
        // SAFETY: `pid` outlives the call.
        let kr = unsafe { pid_for_task(task, &mut pid) };
        check("pid_for_task", kr)?;
        Ok(pid)
    }

    fn release(&self, name: PortName, right: RightType) -> Result<()> {
        match right {
            RightType::Receive => {
                // SAFETY: plain value arguments.
                let kr = unsafe {
                    mach_port_mod_refs(Self::self_task(), name, MACH_PORT_RIGHT_RECEIVE, -1)
                };
                check("mach_port_mod_refs", kr)
            }
            RightType::Send => {
                // SAFETY: plain value arguments.
                let kr = unsafe { mach_port_deallocate(Self::self_task(), name) };
                check("mach_port_deallocate", kr)
            }
        }
    }

    fn credentials(&self) -> Result<Credentials> {
        let mut info = AuditinfoAddr::default();
        // SAFETY: `info` outlives the call and its size is passed alongside.
        let rv = unsafe { getaudit_addr(&mut info, size_of::<AuditinfoAddr>() as c_int) };
        if rv != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(KernelError::Os { call: "getaudit_addr", errno });
        }
        // SAFETY: the id getters cannot fail.
        let (euid, egid, ruid, rgid) =
            unsafe { (libc::geteuid(), libc::getegid(), libc::getuid(), libc::getgid()) };
        Ok(Credentials { euid, egid, ruid, rgid, auid: info.ai_auid, asid: info.ai_asid })
    }
}
