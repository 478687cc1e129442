// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Thread-backed process splitter over the in-memory kernel (host-first)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: tests/handshake.rs
//!
//! The "child" is a scoped thread running as a forked task of the fake kernel. The barrier
//! pipes are channels; abrupt termination unwinds the child thread and is reported as
//! [`ChildExit::Aborted`].

use std::collections::VecDeque;
use std::io;
use std::panic;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use nexus_mach_ipc::fake::{FakeKernel, FakeTask};
use nexus_mach_ipc::Credentials;

use crate::guard::Terminator;
use crate::split::{ChildExit, ProcessPair, ProcessSplitter, Split};

/// Panic payload used to unwind a terminated child thread.
#[derive(Debug)]
pub struct ChildAborted;

fn unwind_child() -> ! {
    panic::panic_any(ChildAborted)
}

/// One side of a thread pair.
#[derive(Debug)]
pub struct ThreadPair {
    child_pid: i32,
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl ThreadPair {
    fn new(child_pid: i32, tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self { child_pid, tx: Some(tx), rx, pending: VecDeque::new() }
    }
}

impl ProcessPair for ThreadPair {
    fn child_pid(&self) -> i32 {
        self.child_pid
    }

    fn write_pipe(&mut self, bytes: &[u8]) -> io::Result<()> {
        let tx = self.tx.as_ref().ok_or(io::ErrorKind::BrokenPipe)?;
        tx.send(bytes.to_vec()).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn read_pipe(&mut self, buf: &mut [u8]) -> io::Result<()> {
        while self.pending.len() < buf.len() {
            let chunk = self.rx.recv().map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
            self.pending.extend(chunk);
        }
        let len = buf.len();
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *slot = byte;
        }
        Ok(())
    }

    fn close_write_pipe(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }

    fn read_pipe_to_eof(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes: Vec<u8> = self.pending.drain(..).collect();
        while let Ok(chunk) = self.rx.recv() {
            bytes.extend(chunk);
        }
        Ok(bytes)
    }

    fn terminator(&self) -> Terminator {
        Terminator::unwinding("thread unwind", unwind_child)
    }
}

/// Splits by forking a fake task and running the child routine on a scoped thread.
#[derive(Debug)]
pub struct ThreadSplitter {
    kernel: FakeKernel,
    parent: FakeTask,
}

impl ThreadSplitter {
    /// Creates a parent task with `credentials` in `kernel`.
    pub fn new(kernel: FakeKernel, credentials: Credentials) -> Self {
        let parent = kernel.spawn(credentials);
        Self { kernel, parent }
    }

    /// Fake kernel both sides live in.
    pub fn kernel(&self) -> &FakeKernel {
        &self.kernel
    }

    /// Parent task.
    pub fn parent(&self) -> &FakeTask {
        &self.parent
    }
}

impl ProcessSplitter for ThreadSplitter {
    type Kernel = FakeTask;
    type Pair = ThreadPair;

    fn parent_kernel(&self) -> &FakeTask {
        &self.parent
    }

    fn split<P, C, R>(&self, parent: P, child: C) -> io::Result<Split<R>>
    where
        P: FnOnce(&FakeTask, &mut ThreadPair) -> R,
        C: FnOnce(&FakeTask, &mut ThreadPair) + Send,
    {
        let child_task = self.kernel.fork(&self.parent);
        let child_pid = child_task.pid();
        let (to_child, from_parent) = mpsc::channel();
        let (to_parent, from_child) = mpsc::channel();
        let mut parent_pair = ThreadPair::new(child_pid, to_child, from_child);
        let mut child_pair = ThreadPair::new(child_pid, to_parent, from_parent);

        let (result, joined) = thread::scope(|scope| -> io::Result<_> {
            let task = child_task.clone();
            let handle = thread::Builder::new()
                .name(format!("child-{child_pid}"))
                .spawn_scoped(scope, move || child(&task, &mut child_pair))?;
            let result = parent(&self.parent, &mut parent_pair);
            drop(parent_pair);
            Ok((result, handle.join()))
        })?;

        let child_exit = match joined {
            Ok(()) => ChildExit::Exited(0),
            Err(payload) => {
                if !payload.is::<ChildAborted>() {
                    log::error!("child {child_pid} panicked");
                }
                ChildExit::Aborted
            }
        };
        self.kernel.exit(&child_task);
        Ok(Split { parent: result, child_exit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_mach_ipc::fake::DEFAULT_CREDENTIALS;
    use nexus_mach_ipc::Kernel;

    #[test]
    fn pipes_cross_and_close() {
        let splitter = ThreadSplitter::new(FakeKernel::new(), DEFAULT_CREDENTIALS);
        let split = splitter
            .split(
                |_, pair| {
                    let mut buf = [0u8; 3];
                    pair.read_pipe(&mut buf).expect("read");
                    pair.write_pipe(b"ok").expect("write");
                    pair.close_write_pipe().expect("close");
                    (buf, pair.read_pipe_to_eof().expect("eof"))
                },
                |_, pair| {
                    pair.write_pipe(b"a").expect("write");
                    pair.write_pipe(b"bc!").expect("write");
                    pair.close_write_pipe().expect("close");
                    let mut buf = [0u8; 2];
                    pair.read_pipe(&mut buf).expect("read");
                    assert_eq!(&buf, b"ok");
                },
            )
            .expect("split");
        assert_eq!(&split.parent.0, b"abc");
        assert_eq!(split.parent.1, b"!");
        assert_eq!(split.child_exit, ChildExit::Exited(0));
    }

    #[test]
    fn child_is_a_distinct_task() {
        let splitter = ThreadSplitter::new(FakeKernel::new(), DEFAULT_CREDENTIALS);
        let parent_pid = splitter.parent().pid();
        let split = splitter
            .split(|_, pair| pair.child_pid(), |task, _| assert_ne!(task.pid(), parent_pid))
            .expect("split");
        assert_ne!(split.parent, parent_pid);
        assert_eq!(split.child_exit, ChildExit::Exited(0));
    }

    #[test]
    fn terminated_child_is_aborted_and_its_ports_die() {
        let splitter = ThreadSplitter::new(FakeKernel::new(), DEFAULT_CREDENTIALS);
        let split = splitter
            .split(
                |_, pair| pair.read_pipe_to_eof().expect("eof"),
                |task, pair| {
                    task.check_in("child.owned").expect("check in");
                    pair.terminator().terminate()
                },
            )
            .expect("split");
        assert!(split.parent.is_empty());
        assert_eq!(split.child_exit, ChildExit::Aborted);
        assert!(!splitter.kernel().is_registered("child.owned"));
    }
}
