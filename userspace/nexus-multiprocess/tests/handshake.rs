// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: End-to-end rendezvous runs over the fake kernel and the thread splitter
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 6 integration tests
//!
//! TEST_SCENARIOS:
//!   - verified_child_runs_both_hooks(): hello verified, workloads talk over the pipe
//!   - parent_blocks_until_the_hello_arrives(): no message, no progress
//!   - failing_child_workload_aborts_the_child(): no marker, abnormal exit
//!   - parent_workload_failure_is_recorded(): run completes, failure surfaces in check()
//!   - custom_prefix_names_the_service(): configured prefix + 16-letter suffix
//!   - child_ports_are_fresh(): child never reuses the parent's receive name

#![cfg(feature = "backend-host")]

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{bail, ensure};
use nexus_mach_ipc::fake::{FakeKernel, DEFAULT_CREDENTIALS};
use nexus_mach_ipc::{Kernel, Wait, PORT_NULL};
use nexus_multiprocess::child::ChildRendezvous;
use nexus_multiprocess::host::ThreadSplitter;
use nexus_multiprocess::parent::{ParentRendezvous, ParentState};
use nexus_multiprocess::{
    ChildContext, ChildExit, Config, Error, FailureLog, MachMultiprocess, NoWorkload,
    ParentContext, RendezvousName, Workload,
};

fn splitter() -> ThreadSplitter {
    ThreadSplitter::new(FakeKernel::new(), DEFAULT_CREDENTIALS)
}

#[derive(Default)]
struct PingPong {
    parent_saw: Mutex<Option<(i32, i32, Vec<u8>)>>,
}

impl Workload for PingPong {
    fn on_parent_ready(&self, ctx: &mut ParentContext<'_>) -> anyhow::Result<()> {
        ensure!(ctx.remote_port() != PORT_NULL, "no reply right");
        let task_pid = ctx.kernel().pid_for_task(ctx.child_task())?;
        let mut greeting = [0u8; 2];
        ctx.pipe().read_pipe(&mut greeting)?;
        *self.parent_saw.lock().unwrap() = Some((ctx.child_pid(), task_pid, greeting.to_vec()));
        Ok(())
    }

    fn on_child_ready(&self, ctx: &mut ChildContext<'_>) -> anyhow::Result<()> {
        ensure!(ctx.local_port() != PORT_NULL, "no receive right");
        ensure!(ctx.remote_port() != PORT_NULL, "no send right to parent");
        ctx.pipe().write_pipe(b"hi")?;
        Ok(())
    }
}

#[test]
fn verified_child_runs_both_hooks() {
    let splitter = splitter();
    let workload = PingPong::default();
    let report = MachMultiprocess::default().run(&splitter, &workload).expect("run");

    let (child_pid, task_pid, greeting) =
        workload.parent_saw.lock().unwrap().take().expect("parent hook ran");
    assert_eq!(child_pid, report.child_pid);
    assert_eq!(task_pid, report.child_pid);
    assert_eq!(greeting, b"hi");
    assert!(report.child_succeeded);
    assert_eq!(report.child_exit, ChildExit::Exited(0));
    report.check().expect("clean run");

    assert!(!splitter.kernel().is_registered(report.name.as_str()));
    report.child_task.release(splitter.parent()).expect("release task right");
}

#[test]
fn parent_blocks_until_the_hello_arrives() {
    let kernel = FakeKernel::new();
    let parent_task = kernel.spawn(DEFAULT_CREDENTIALS);
    let mut parent = ParentRendezvous::new(RendezvousName::generate());
    parent.register(&parent_task).expect("register");
    let inherited = parent.inherit();
    let child_task = kernel.fork(&parent_task);

    let (done_tx, done_rx) = mpsc::channel();
    let receiver = {
        let task = parent_task.clone();
        thread::spawn(move || {
            let received = parent.receive_hello(&task, Wait::Blocking);
            done_tx.send(()).expect("notify");
            (parent, received)
        })
    };
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

    let mut child = ChildRendezvous::after_split(&child_task, inherited).expect("child setup");
    child.resolve(&child_task).expect("resolve");
    child.send_hello(&child_task).expect("send");
    done_rx.recv_timeout(Duration::from_secs(5)).expect("hello unblocks the parent");

    let (mut parent, received) = receiver.join().expect("receiver thread");
    received.expect("receive");
    let mut log = FailureLog::default();
    let expected = DEFAULT_CREDENTIALS.expect_child(child_task.pid());
    parent.validate(&parent_task, &expected, &mut log).expect("validate");
    assert_eq!(parent.state(), ParentState::VerifiedReady);
    assert!(log.is_empty());

    child.release(&child_task).expect("child release");
    let task = parent.release(&parent_task).expect("parent release");
    task.release(&parent_task).expect("task release");
}

struct FailingChild;

impl Workload for FailingChild {
    fn on_child_ready(&self, _ctx: &mut ChildContext<'_>) -> anyhow::Result<()> {
        bail!("child workload gave up")
    }
}

#[test]
fn failing_child_workload_aborts_the_child() {
    let splitter = splitter();
    let report = MachMultiprocess::default().run(&splitter, &FailingChild).expect("run");
    assert!(!report.child_succeeded);
    assert_eq!(report.child_exit, ChildExit::Aborted);
    assert!(report.failures.is_empty());
    assert!(matches!(report.check(), Err(Error::ChildAbort(ChildExit::Aborted))));
    report.child_task.release(splitter.parent()).expect("release task right");
}

struct FailingParent;

impl Workload for FailingParent {
    fn on_parent_ready(&self, _ctx: &mut ParentContext<'_>) -> anyhow::Result<()> {
        bail!("parent workload gave up")
    }
}

#[test]
fn parent_workload_failure_is_recorded() {
    let splitter = splitter();
    let report = MachMultiprocess::default().run(&splitter, &FailingParent).expect("run");
    assert!(report.child_succeeded);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures.failures()[0].to_string(),
        "workload failed: parent workload gave up"
    );
    assert!(matches!(report.check(), Err(Error::Recorded(1))));
    report.child_task.release(splitter.parent()).expect("release task right");
}

#[test]
fn custom_prefix_names_the_service() {
    let splitter = splitter();
    let config = Config::default()
        .with_service_prefix("org.opennexus.test.custom.")
        .with_receive_timeout(Duration::from_secs(5));
    let report = MachMultiprocess::new(config).run(&splitter, &NoWorkload).expect("run");
    let name = report.name.as_str();
    assert!(name.starts_with("org.opennexus.test.custom."));
    assert_eq!(report.name.suffix().len(), 16);
    assert!(report.name.suffix().bytes().all(|b| b.is_ascii_uppercase()));
    report.check().expect("clean run");
    report.child_task.release(splitter.parent()).expect("release task right");
}

#[derive(Default)]
struct LocalPorts {
    parent_local: Mutex<Option<u32>>,
    child_local: Mutex<Option<u32>>,
}

impl Workload for LocalPorts {
    fn on_parent_ready(&self, ctx: &mut ParentContext<'_>) -> anyhow::Result<()> {
        *self.parent_local.lock().unwrap() = Some(ctx.local_port());
        Ok(())
    }

    fn on_child_ready(&self, ctx: &mut ChildContext<'_>) -> anyhow::Result<()> {
        *self.child_local.lock().unwrap() = Some(ctx.local_port());
        Ok(())
    }
}

#[test]
fn child_ports_are_fresh() {
    let splitter = splitter();
    let ports = LocalPorts::default();
    let report = MachMultiprocess::default().run(&splitter, &ports).expect("run");
    let parent_local = ports.parent_local.lock().unwrap().expect("parent hook ran");
    let child_local = ports.child_local.lock().unwrap().expect("child hook ran");
    assert_ne!(parent_local, child_local);
    report.check().expect("clean run");
    report.child_task.release(splitter.parent()).expect("release task right");
}
