// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process creation collaborators: how a parent/child pair is created, how the two
//! sides reach each other's barrier pipe, and how the child ends.

use std::io;

use nexus_mach_ipc::Kernel;

use crate::guard::Terminator;

/// One side's view of a parent/child pair.
pub trait ProcessPair {
    /// Pid of the child as reported by process creation.
    fn child_pid(&self) -> i32;

    /// Writes all of `bytes` to the peer.
    fn write_pipe(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads exactly `buf.len()` bytes from the peer.
    fn read_pipe(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Closes this side's outbound pipe; the peer then reads EOF.
    fn close_write_pipe(&mut self) -> io::Result<()>;

    /// Reads until the peer closes its outbound pipe.
    fn read_pipe_to_eof(&mut self) -> io::Result<Vec<u8>>;

    /// How this side terminates abruptly.
    fn terminator(&self) -> Terminator;
}

/// How the child ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
    /// Terminated abruptly without an exit status (thread backend).
    Aborted,
}

impl ChildExit {
    /// `true` for a zero exit status.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Outcome of [`ProcessSplitter::split`].
#[derive(Debug)]
pub struct Split<R> {
    /// Value returned by the parent side.
    pub parent: R,
    /// How the child ended.
    pub child_exit: ChildExit,
}

/// Creates a child and runs one routine on each side.
pub trait ProcessSplitter {
    /// Kernel handle each side talks to.
    type Kernel: Kernel;
    /// Pair handle each side receives.
    type Pair: ProcessPair;

    /// Kernel as seen by the parent before the split.
    fn parent_kernel(&self) -> &Self::Kernel;

    /// Splits off a child running `child`, runs `parent` here and waits for the child.
    ///
    /// `child` must not return into the caller's code; implementations end the child once
    /// it returns. Both pair handles are closed before the child is awaited.
    fn split<P, C, R>(&self, parent: P, child: C) -> io::Result<Split<R>>
    where
        P: FnOnce(&Self::Kernel, &mut Self::Pair) -> R,
        C: FnOnce(&Self::Kernel, &mut Self::Pair) + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_zero_exit_is_clean() {
        assert!(ChildExit::Exited(0).is_clean());
        assert!(!ChildExit::Exited(1).is_clean());
        assert!(!ChildExit::Signaled(6).is_clean());
        assert!(!ChildExit::Aborted.is_clean());
    }
}
