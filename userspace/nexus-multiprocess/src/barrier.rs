// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shutdown barrier over the pair's pipes.
//!
//! The child announces success with one marker byte, closes its side and waits for the
//! parent to close. The parent closes its side once done with the child's task port and
//! reads the child's side to EOF.

use std::io;

use crate::split::ProcessPair;

/// Byte the child writes last when its routine succeeded.
pub const SUCCESS_MARKER: u8 = b'+';

/// What the parent learned from the barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierReport {
    /// Whether the child's last byte was [`SUCCESS_MARKER`].
    pub child_succeeded: bool,
}

/// Child side: optional marker, close, then block until the parent closes.
pub fn child_drain<P: ProcessPair + ?Sized>(pair: &mut P, succeeded: bool) -> io::Result<()> {
    if succeeded {
        pair.write_pipe(&[SUCCESS_MARKER])?;
    }
    pair.close_write_pipe()?;
    let trailing = pair.read_pipe_to_eof()?;
    if !trailing.is_empty() {
        log::debug!("barrier: child discarded {} unread bytes", trailing.len());
    }
    Ok(())
}

/// Parent side: close, then read the child's side to EOF.
pub fn parent_release<P: ProcessPair + ?Sized>(pair: &mut P) -> io::Result<BarrierReport> {
    pair.close_write_pipe()?;
    let bytes = pair.read_pipe_to_eof()?;
    let child_succeeded = bytes.last() == Some(&SUCCESS_MARKER);
    let marker = if child_succeeded { "seen" } else { "missing" };
    log::debug!("barrier: child {} (marker {marker})", pair.child_pid());
    Ok(BarrierReport { child_succeeded })
}
