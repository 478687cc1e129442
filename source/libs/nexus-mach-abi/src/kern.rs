// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `kern_return_t` / `mach_msg_return_t` / bootstrap status codes used by the fixture.

/// `kern_return_t`.
pub type KernReturn = i32;

/// `KERN_SUCCESS` (also `MACH_MSG_SUCCESS`).
pub const KERN_SUCCESS: KernReturn = 0;
/// `KERN_INVALID_ARGUMENT`.
pub const KERN_INVALID_ARGUMENT: KernReturn = 4;
/// `KERN_FAILURE`.
pub const KERN_FAILURE: KernReturn = 5;
/// `KERN_INVALID_NAME`.
pub const KERN_INVALID_NAME: KernReturn = 15;
/// `KERN_INVALID_RIGHT`.
pub const KERN_INVALID_RIGHT: KernReturn = 17;

/// `MACH_SEND_INVALID_DEST`.
pub const MACH_SEND_INVALID_DEST: KernReturn = 0x1000_0003;
/// `MACH_SEND_TIMED_OUT`.
pub const MACH_SEND_TIMED_OUT: KernReturn = 0x1000_0004;
/// `MACH_SEND_INVALID_RIGHT`.
pub const MACH_SEND_INVALID_RIGHT: KernReturn = 0x1000_0007;
/// `MACH_SEND_MSG_TOO_SMALL`.
pub const MACH_SEND_MSG_TOO_SMALL: KernReturn = 0x1000_0008;
/// `MACH_SEND_INVALID_HEADER`.
pub const MACH_SEND_INVALID_HEADER: KernReturn = 0x1000_0010;
/// `MACH_RCV_INVALID_NAME`.
pub const MACH_RCV_INVALID_NAME: KernReturn = 0x1000_4002;
/// `MACH_RCV_TIMED_OUT`.
pub const MACH_RCV_TIMED_OUT: KernReturn = 0x1000_4003;
/// `MACH_RCV_TOO_LARGE`.
pub const MACH_RCV_TOO_LARGE: KernReturn = 0x1000_4004;
/// `MACH_RCV_PORT_DIED`.
pub const MACH_RCV_PORT_DIED: KernReturn = 0x1000_4009;

/// `BOOTSTRAP_NAME_IN_USE`.
pub const BOOTSTRAP_NAME_IN_USE: KernReturn = 1101;
/// `BOOTSTRAP_UNKNOWN_SERVICE`.
pub const BOOTSTRAP_UNKNOWN_SERVICE: KernReturn = 1102;

/// Symbolic name for `code`, or `"UNKNOWN"`.
pub const fn name(code: KernReturn) -> &'static str {
    match code {
        KERN_SUCCESS => "KERN_SUCCESS",
        KERN_INVALID_ARGUMENT => "KERN_INVALID_ARGUMENT",
        KERN_FAILURE => "KERN_FAILURE",
        KERN_INVALID_NAME => "KERN_INVALID_NAME",
        KERN_INVALID_RIGHT => "KERN_INVALID_RIGHT",
        MACH_SEND_INVALID_DEST => "MACH_SEND_INVALID_DEST",
        MACH_SEND_TIMED_OUT => "MACH_SEND_TIMED_OUT",
        MACH_SEND_INVALID_RIGHT => "MACH_SEND_INVALID_RIGHT",
        MACH_SEND_MSG_TOO_SMALL => "MACH_SEND_MSG_TOO_SMALL",
        MACH_SEND_INVALID_HEADER => "MACH_SEND_INVALID_HEADER",
        MACH_RCV_INVALID_NAME => "MACH_RCV_INVALID_NAME",
        MACH_RCV_TIMED_OUT => "MACH_RCV_TIMED_OUT",
        MACH_RCV_TOO_LARGE => "MACH_RCV_TOO_LARGE",
        MACH_RCV_PORT_DIED => "MACH_RCV_PORT_DIED",
        BOOTSTRAP_NAME_IN_USE => "BOOTSTRAP_NAME_IN_USE",
        BOOTSTRAP_UNKNOWN_SERVICE => "BOOTSTRAP_UNKNOWN_SERVICE",
        _ => "UNKNOWN",
    }
}
