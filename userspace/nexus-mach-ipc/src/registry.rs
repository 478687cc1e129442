// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bootstrap name registry binding.
//!
//! Wraps the raw bootstrap calls so callers receive owned rights instead of bare names.

use crate::{Kernel, ReceiveRight, Result, SendRight};

/// Registers `service` and takes ownership of the receive right behind it.
pub fn check_in<K: Kernel + ?Sized>(kernel: &K, service: &str) -> Result<ReceiveRight> {
    let name = kernel.check_in(service)?;
    log::debug!("bootstrap check-in {service} -> {name:#x}");
    Ok(ReceiveRight::from_raw(name))
}

/// Resolves `service` to an owned send right.
pub fn look_up<K: Kernel + ?Sized>(kernel: &K, service: &str) -> Result<SendRight> {
    let name = kernel.look_up(service)?;
    log::debug!("bootstrap look-up {service} -> {name:#x}");
    Ok(SendRight::from_raw(name))
}

/// Allocates a fresh, unregistered receive right.
pub fn new_receive_right<K: Kernel + ?Sized>(kernel: &K) -> Result<ReceiveRight> {
    kernel.allocate_receive().map(ReceiveRight::from_raw)
}
