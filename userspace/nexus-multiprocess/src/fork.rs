// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: `fork(2)` process splitter with two pipes as the shutdown barrier
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: tests/darwin_fork.rs (macOS only, run with `--test-threads=1`)
//!
//! The child never returns into the caller: once its routine finishes it leaves through
//! `_exit(2)`. A panic that escapes the routine without meeting an armed guard leaves with
//! [`PANIC_EXIT_CODE`].

use std::fs::File;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getpid, pipe, ForkResult, Pid};
use nexus_mach_ipc::Kernel;

use crate::guard::Terminator;
use crate::split::{ChildExit, ProcessPair, ProcessSplitter, Split};

/// Exit status of a child whose routine panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// One side of a forked pair.
#[derive(Debug)]
pub struct ForkPair {
    child_pid: i32,
    read: File,
    write: Option<File>,
}

impl ProcessPair for ForkPair {
    fn child_pid(&self) -> i32 {
        self.child_pid
    }

    fn write_pipe(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write.as_mut().ok_or(io::ErrorKind::BrokenPipe)?.write_all(bytes)
    }

    fn read_pipe(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read.read_exact(buf)
    }

    fn close_write_pipe(&mut self) -> io::Result<()> {
        self.write = None;
        Ok(())
    }

    fn read_pipe_to_eof(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.read.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn terminator(&self) -> Terminator {
        Terminator::abort()
    }
}

fn wait_for(pid: Pid) -> io::Result<ChildExit> {
    let status = loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            result => break result?,
        }
    };
    Ok(match status {
        WaitStatus::Exited(_, code) => ChildExit::Exited(code),
        WaitStatus::Signaled(_, signal, _) => ChildExit::Signaled(signal as i32),
        other => {
            log::warn!("child {pid}: unexpected wait status {other:?}");
            ChildExit::Aborted
        }
    })
}

/// Splits with `fork(2)`; both sides talk to the same kernel handle.
///
/// The child keeps running Rust code (allocation, logging) after the fork, so the caller
/// must be single-threaded at the time of [`ProcessSplitter::split`]. Under `cargo test`
/// that means `--test-threads=1`.
#[derive(Clone, Debug, Default)]
pub struct ForkSplitter<K> {
    kernel: K,
}

impl<K: Kernel> ForkSplitter<K> {
    /// Wraps `kernel`, which must stay valid in a forked child.
    pub const fn new(kernel: K) -> Self {
        Self { kernel }
    }
}

impl<K: Kernel> ProcessSplitter for ForkSplitter<K> {
    type Kernel = K;
    type Pair = ForkPair;

    fn parent_kernel(&self) -> &K {
        &self.kernel
    }

    fn split<P, C, R>(&self, parent: P, child: C) -> io::Result<Split<R>>
    where
        P: FnOnce(&K, &mut ForkPair) -> R,
        C: FnOnce(&K, &mut ForkPair) + Send,
    {
        let (parent_read, child_write) = pipe()?;
        let (child_read, parent_write) = pipe()?;

        // SAFETY: the child runs only `child` and then leaves through `_exit`.
        match unsafe { fork() }? {
            ForkResult::Child => {
                drop(parent_read);
                drop(parent_write);
                let mut pair = ForkPair {
                    child_pid: getpid().as_raw(),
                    read: File::from(child_read),
                    write: Some(File::from(child_write)),
                };
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| child(&self.kernel, &mut pair)));
                drop(pair);
                let code = if outcome.is_ok() { 0 } else { PANIC_EXIT_CODE };
                // SAFETY: ends the child without running the parent's atexit handlers.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child: pid } => {
                drop(child_read);
                drop(child_write);
                log::debug!("forked child {pid}");
                let mut pair = ForkPair {
                    child_pid: pid.as_raw(),
                    read: File::from(parent_read),
                    write: Some(File::from(parent_write)),
                };
                let result = parent(&self.kernel, &mut pair);
                drop(pair);
                let child_exit = wait_for(pid)?;
                Ok(Split { parent: result, child_exit })
            }
        }
    }
}
