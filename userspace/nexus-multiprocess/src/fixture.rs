// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixture driver: name, registration, split, handshake, workload and barrier in order.

use nexus_mach_ipc::{Credentials, Kernel, PortName, TaskRight, Wait};

use crate::barrier;
use crate::child::ChildRendezvous;
use crate::config::Config;
use crate::error::{Error, FailureLog};
use crate::guard::ForbidReturn;
use crate::name::RendezvousName;
use crate::parent::{InheritedSetup, ParentRendezvous};
use crate::split::{ChildExit, ProcessPair, ProcessSplitter};

/// What the parent side sees once the child is verified.
pub struct ParentContext<'a> {
    kernel: &'a dyn Kernel,
    pair: &'a mut dyn ProcessPair,
    child_pid: i32,
    local_port: PortName,
    remote_port: PortName,
    child_task: PortName,
}

impl<'a> ParentContext<'a> {
    /// Kernel handle of the parent.
    pub fn kernel(&self) -> &'a dyn Kernel {
        self.kernel
    }

    /// Child pid as reported by process creation.
    pub fn child_pid(&self) -> i32 {
        self.child_pid
    }

    /// Receive right registered under the rendezvous name.
    pub fn local_port(&self) -> PortName {
        self.local_port
    }

    /// Send right to the child's receive port.
    pub fn remote_port(&self) -> PortName {
        self.remote_port
    }

    /// Send right to the child's task.
    pub fn child_task(&self) -> PortName {
        self.child_task
    }

    /// Pipes to the child.
    pub fn pipe(&mut self) -> &mut (dyn ProcessPair + 'a) {
        &mut *self.pair
    }
}

/// What the child side sees once its hello is sent.
pub struct ChildContext<'a> {
    kernel: &'a dyn Kernel,
    pair: &'a mut dyn ProcessPair,
    local_port: PortName,
    remote_port: PortName,
}

impl<'a> ChildContext<'a> {
    /// Kernel handle of the child.
    pub fn kernel(&self) -> &'a dyn Kernel {
        self.kernel
    }

    /// The child's own receive right.
    pub fn local_port(&self) -> PortName {
        self.local_port
    }

    /// Send right to the parent's receive right.
    pub fn remote_port(&self) -> PortName {
        self.remote_port
    }

    /// Pipes to the parent.
    pub fn pipe(&mut self) -> &mut (dyn ProcessPair + 'a) {
        &mut *self.pair
    }
}

/// Code run on each side once the handshake is through.
pub trait Workload {
    /// Runs in the parent after the hello was verified.
    fn on_parent_ready(&self, _ctx: &mut ParentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs in the child after the hello was sent.
    fn on_child_ready(&self, _ctx: &mut ChildContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Workload that does nothing on either side.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoWorkload;

impl Workload for NoWorkload {}

/// Result of a completed parent side.
#[derive(Debug)]
pub struct RunReport {
    /// Rendezvous name used for the run.
    pub name: RendezvousName,
    /// Verified child pid.
    pub child_pid: i32,
    /// Send right to the child's task; the caller releases it.
    pub child_task: TaskRight,
    /// Non-fatal failures recorded on the parent side.
    pub failures: FailureLog,
    /// Whether the child's success marker was seen.
    pub child_succeeded: bool,
    /// How the child ended.
    pub child_exit: ChildExit,
}

impl RunReport {
    /// `Ok` when the child finished cleanly and nothing was recorded.
    pub fn check(&self) -> Result<(), Error> {
        if !self.child_succeeded || !self.child_exit.is_clean() {
            return Err(Error::ChildAbort(self.child_exit));
        }
        if self.failures.has_failure() {
            return Err(Error::Recorded(self.failures.len()));
        }
        Ok(())
    }
}

struct ParentOutcome {
    child_pid: i32,
    task: TaskRight,
    child_succeeded: bool,
}

/// Runs one verified parent/child pair.
#[derive(Clone, Debug, Default)]
pub struct MachMultiprocess {
    config: Config,
}

impl MachMultiprocess {
    /// Fixture with `config`.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Registers a fresh name, splits, verifies the child and runs `workload` on both sides.
    ///
    /// A fatal failure on the parent side is returned as `Err`; a failing child shows up
    /// as [`RunReport::child_succeeded`] being `false`.
    pub fn run<S, W>(&self, splitter: &S, workload: &W) -> Result<RunReport, Error>
    where
        S: ProcessSplitter,
        W: Workload + Sync + ?Sized,
    {
        let kernel = splitter.parent_kernel();
        let credentials = kernel.credentials().map_err(Error::Setup)?;
        let name =
            RendezvousName::generate_with(&self.config.service_prefix, &mut rand::thread_rng());
        let mut rendezvous = ParentRendezvous::new(name);
        rendezvous.register(kernel)?;

        let inherited = rendezvous.inherit();
        let wait = self.config.receive_wait;
        let mut failures = FailureLog::default();
        let split = splitter.split(
            |kernel, pair| {
                let side = ParentSide { credentials: &credentials, wait, failures: &mut failures };
                side.run(&mut rendezvous, kernel, pair, workload)
            },
            move |kernel, pair| run_child(kernel, pair, inherited, workload),
        );
        let split = match split {
            Ok(split) => split,
            Err(err) => {
                rendezvous.discard(kernel);
                return Err(Error::Split(err));
            }
        };
        let outcome = match split.parent {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("parent side failed ({err}); child ended with {:?}", split.child_exit);
                return Err(err);
            }
        };
        Ok(RunReport {
            name: rendezvous.name().clone(),
            child_pid: outcome.child_pid,
            child_task: outcome.task,
            failures,
            child_succeeded: outcome.child_succeeded,
            child_exit: split.child_exit,
        })
    }
}

struct ParentSide<'a> {
    credentials: &'a Credentials,
    wait: Wait,
    failures: &'a mut FailureLog,
}

impl ParentSide<'_> {
    fn run<K, P, W>(
        self,
        rendezvous: &mut ParentRendezvous,
        kernel: &K,
        pair: &mut P,
        workload: &W,
    ) -> Result<ParentOutcome, Error>
    where
        K: Kernel,
        P: ProcessPair,
        W: Workload + ?Sized,
    {
        let child_pid = pair.child_pid();
        let expected = self.credentials.expect_child(child_pid);
        let handshake = rendezvous
            .receive_hello(kernel, self.wait)
            .and_then(|()| rendezvous.validate(kernel, &expected, self.failures));
        if let Err(err) = handshake {
            rendezvous.discard(kernel);
            return Err(err);
        }

        let mut ctx = ParentContext {
            kernel,
            pair: &mut *pair,
            child_pid,
            local_port: rendezvous.local_port(),
            remote_port: rendezvous.remote_port(),
            child_task: rendezvous.child_task(),
        };
        if let Err(err) = workload.on_parent_ready(&mut ctx) {
            self.failures.record(Error::Workload(err));
        }

        let task = rendezvous.release(kernel)?;
        match barrier::parent_release(pair) {
            Ok(report) => {
                Ok(ParentOutcome { child_pid, task, child_succeeded: report.child_succeeded })
            }
            Err(err) => {
                let _ = task.release(kernel);
                Err(Error::Barrier(err))
            }
        }
    }
}

/// The child routine; returns only when everything succeeded.
fn run_child<K, P, W>(kernel: &K, pair: &mut P, inherited: InheritedSetup, workload: &W)
where
    K: Kernel,
    P: ProcessPair,
    W: Workload + ?Sized,
{
    let guard = ForbidReturn::arm(pair.terminator());

    let mut child = match ChildRendezvous::after_split(kernel, inherited) {
        Ok(child) => child,
        Err(err) => {
            log::error!("child setup failed: {err}");
            return;
        }
    };
    if let Err(err) = child.resolve(kernel).and_then(|()| child.send_hello(kernel)) {
        log::error!("child handshake failed: {err}");
        child.abort(kernel);
        return;
    }

    let mut failures = FailureLog::default();
    let mut ctx = ChildContext {
        kernel,
        pair: &mut *pair,
        local_port: child.local_port(),
        remote_port: child.remote_port(),
    };
    if let Err(err) = workload.on_child_ready(&mut ctx) {
        failures.record(Error::Workload(err));
    }
    if let Err(err) = child.release(kernel) {
        failures.record(err);
    }
    if let Err(err) = barrier::child_drain(pair, !failures.has_failure()) {
        failures.record(Error::Barrier(err));
    }
    child.finish(!failures.has_failure());
    if !failures.has_failure() {
        guard.disarm();
    }
}
