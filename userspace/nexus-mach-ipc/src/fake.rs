// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Deterministic in-memory Mach kernel for host-first handshake tests
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 7 unit tests below; drives nexus-multiprocess integration tests
//!
//! MODEL:
//!   - One global port name space; every task holds its own per-name right counts
//!   - Bootstrap registry maps service names to receive ports
//!   - `send` checks the sender's rights, applies dispositions and queues a kernel-shaped image
//!   - `receive` blocks on a condition variable, appends the trailer and grants carried rights
//!   - `exit` kills every port the task holds a receive right for
//!
//! TEST_SCENARIOS:
//!   - hello_delivery_matches_kernel_shape()
//!   - receive_honours_timeout()
//!   - send_without_right_is_rejected()
//!   - destroy_returns_carried_rights()
//!   - releasing_receive_right_unregisters_service()
//!   - minimal_trailer_without_audit_request()
//!   - exited_task_has_no_pid()

#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use nexus_mach_abi::kern::{
    KERN_FAILURE, KERN_INVALID_ARGUMENT, KERN_INVALID_NAME, KERN_INVALID_RIGHT,
    MACH_RCV_INVALID_NAME, MACH_RCV_PORT_DIED, MACH_RCV_TIMED_OUT, MACH_RCV_TOO_LARGE,
    MACH_SEND_INVALID_DEST, MACH_SEND_INVALID_HEADER, MACH_SEND_INVALID_RIGHT,
    MACH_SEND_MSG_TOO_SMALL, BOOTSTRAP_NAME_IN_USE, BOOTSTRAP_UNKNOWN_SERVICE,
};
use nexus_mach_abi::{
    descriptor_type, msgh_bits_local, msgh_bits_remote, AuditToken, AuditTrailer, Disposition,
    IdentityRecord, MsgBody, MsgHeader, PortDescriptor, AUDIT_TRAILER_SIZE, BODY_SIZE,
    HEADER_SIZE, PORT_DESCRIPTOR_SIZE, TRAILER_FORMAT_0, TRAILER_MIN_SIZE,
};
use parking_lot::{Condvar, Mutex};

use crate::{
    Credentials, Kernel, KernelError, MessageBuffer, PortName, Result, RightType, Wait, PORT_NULL,
};

/// Credentials handed to tasks in tests that do not care about identity.
pub const DEFAULT_CREDENTIALS: Credentials =
    Credentials { euid: 501, egid: 20, ruid: 501, rgid: 20, auid: 501, asid: 100_001 };

const FIRST_PID: i32 = 4000;

/// Rights a task holds on one name, as seen by tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FakeRights {
    /// Whether the task holds the receive right.
    pub receive: bool,
    /// User references on the send right.
    pub send_refs: u32,
}

impl FakeRights {
    fn is_empty(&self) -> bool {
        !self.receive && self.send_refs == 0
    }
}

#[derive(Debug)]
struct TaskState {
    credentials: Credentials,
    alive: bool,
    rights: HashMap<PortName, FakeRights>,
}

#[derive(Debug)]
struct Delivery {
    image: Vec<u8>,
    audit: AuditToken,
    seqno: u32,
}

#[derive(Debug, Default)]
struct PortState {
    queue: VecDeque<Delivery>,
    next_seqno: u32,
}

#[derive(Debug, Default)]
struct State {
    ports: HashMap<PortName, PortState>,
    task_ports: HashMap<PortName, i32>,
    tasks: HashMap<i32, TaskState>,
    services: HashMap<String, PortName>,
    next_name: u32,
    next_pid: i32,
}

impl State {
    fn allocate_name(&mut self) -> PortName {
        self.next_name += 1;
        (self.next_name << 8) | 0x03
    }

    fn live_task(&mut self, pid: i32, call: &'static str) -> Result<&mut TaskState> {
        match self.tasks.get_mut(&pid) {
            Some(task) if task.alive => Ok(task),
            _ => Err(KernelError::from_kern(call, KERN_FAILURE)),
        }
    }

    fn rights(&self, pid: i32, name: PortName) -> FakeRights {
        self.tasks
            .get(&pid)
            .and_then(|task| task.rights.get(&name))
            .copied()
            .unwrap_or_default()
    }

    fn can_transfer(&self, pid: i32, name: PortName, disposition: Disposition) -> bool {
        let rights = self.rights(pid, name);
        match disposition {
            Disposition::CopySend | Disposition::MoveSend => rights.send_refs > 0,
            Disposition::MakeSend => rights.receive,
            // Send-once and receive transfers are not modelled.
            _ => false,
        }
    }

    fn grant_send(&mut self, pid: i32, name: PortName) {
        if let Some(task) = self.tasks.get_mut(&pid) {
            task.rights.entry(name).or_default().send_refs += 1;
        }
    }

    fn drop_send(&mut self, pid: i32, name: PortName) {
        let Some(task) = self.tasks.get_mut(&pid) else {
            return;
        };
        let Some(rights) = task.rights.get_mut(&name) else {
            return;
        };
        rights.send_refs = rights.send_refs.saturating_sub(1);
        if rights.is_empty() {
            task.rights.remove(&name);
        }
    }

    fn new_port(&mut self, pid: i32) -> PortName {
        let name = self.allocate_name();
        self.ports.insert(name, PortState::default());
        if let Some(task) = self.tasks.get_mut(&pid) {
            task.rights.entry(name).or_default().receive = true;
        }
        name
    }

    fn kill_port(&mut self, name: PortName) {
        self.ports.remove(&name);
        self.services.retain(|_, port| *port != name);
    }

    fn create_task(&mut self, credentials: Credentials) -> (i32, PortName) {
        self.next_pid += 1;
        let pid = FIRST_PID + self.next_pid;
        let task_port = self.allocate_name();
        let mut rights = HashMap::new();
        rights.insert(task_port, FakeRights { receive: false, send_refs: 1 });
        self.tasks.insert(pid, TaskState { credentials, alive: true, rights });
        self.task_ports.insert(task_port, pid);
        (pid, task_port)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    delivered: Condvar,
}

/// In-memory Mach kernel shared by every [`FakeTask`] it creates.
///
/// Scope: host-first tests of the rendezvous handshake. Only port descriptors and send
/// rights are modelled.
#[derive(Clone, Debug)]
pub struct FakeKernel {
    shared: Arc<Shared>,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    /// Creates an empty kernel.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                delivered: Condvar::new(),
            }),
        }
    }

    /// Creates a task with the given identity and no rights beyond its own task port.
    pub fn spawn(&self, credentials: Credentials) -> FakeTask {
        let (pid, task_port) = self.shared.state.lock().create_task(credentials);
        log::debug!("fake kernel: spawned pid {pid}");
        FakeTask { kernel: self.clone(), pid, task_port }
    }

    /// Splits `parent`: the new task inherits its identity but none of its port rights.
    pub fn fork(&self, parent: &FakeTask) -> FakeTask {
        let mut state = self.shared.state.lock();
        let credentials =
            state.tasks.get(&parent.pid).map(|task| task.credentials).unwrap_or_default();
        let (pid, task_port) = state.create_task(credentials);
        log::debug!("fake kernel: pid {} forked pid {pid}", parent.pid);
        FakeTask { kernel: self.clone(), pid, task_port }
    }

    /// Terminates `task`, destroying its rights and every port it could receive on.
    pub fn exit(&self, task: &FakeTask) {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.tasks.get_mut(&task.pid) else {
            return;
        };
        entry.alive = false;
        let receive: Vec<PortName> = entry
            .rights
            .drain()
            .filter(|(_, rights)| rights.receive)
            .map(|(name, _)| name)
            .collect();
        for name in receive {
            state.kill_port(name);
        }
        drop(state);
        self.shared.delivered.notify_all();
        log::debug!("fake kernel: pid {} exited", task.pid);
    }

    /// Replaces the identity `task` presents in audit tokens from now on.
    pub fn set_credentials(&self, task: &FakeTask, credentials: Credentials) {
        if let Some(entry) = self.shared.state.lock().tasks.get_mut(&task.pid) {
            entry.credentials = credentials;
        }
    }

    /// Rights `task` holds on `name`.
    pub fn rights(&self, task: &FakeTask, name: PortName) -> FakeRights {
        self.shared.state.lock().rights(task.pid, name)
    }

    /// Whether `service` is currently registered.
    pub fn is_registered(&self, service: &str) -> bool {
        self.shared.state.lock().services.contains_key(service)
    }

    /// Number of messages queued on `port`.
    pub fn queued(&self, port: PortName) -> usize {
        self.shared.state.lock().ports.get(&port).map_or(0, |port| port.queue.len())
    }
}

/// One task's view of a [`FakeKernel`].
#[derive(Clone)]
pub struct FakeTask {
    kernel: FakeKernel,
    pid: i32,
    task_port: PortName,
}

impl FakeTask {
    /// Process id of the task.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Kernel the task lives in.
    pub fn kernel(&self) -> &FakeKernel {
        &self.kernel
    }
}

impl std::fmt::Debug for FakeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTask")
            .field("pid", &self.pid)
            .field("task_port", &self.task_port)
            .finish()
    }
}

fn fail<T>(call: &'static str, code: i32) -> Result<T> {
    Err(KernelError::from_kern(call, code))
}

fn yields_send(descriptor: &PortDescriptor) -> bool {
    Disposition::from_raw(descriptor.disposition).is_some_and(Disposition::yields_send)
}

/// Walks the port descriptors of a complex message image, stopping at the image end.
fn descriptors(image: &[u8]) -> impl Iterator<Item = (usize, PortDescriptor)> + '_ {
    let count = MsgBody::parse(image.get(HEADER_SIZE..).unwrap_or_default())
        .map_or(0, |body| body.descriptor_count as usize);
    (0..count)
        .map(|index| HEADER_SIZE + BODY_SIZE + index * PORT_DESCRIPTOR_SIZE)
        .map_while(move |at| image.get(at..).and_then(PortDescriptor::parse).map(|d| (at, d)))
}

impl Kernel for FakeTask {
    fn check_in(&self, service: &str) -> Result<PortName> {
        const CALL: &str = "bootstrap_check_in";
        let mut state = self.kernel.shared.state.lock();
        state.live_task(self.pid, CALL)?;
        if state.services.contains_key(service) {
            return fail(CALL, BOOTSTRAP_NAME_IN_USE);
        }
        let name = state.new_port(self.pid);
        state.services.insert(service.to_owned(), name);
        Ok(name)
    }

    fn look_up(&self, service: &str) -> Result<PortName> {
        const CALL: &str = "bootstrap_look_up";
        let mut state = self.kernel.shared.state.lock();
        state.live_task(self.pid, CALL)?;
        let Some(&name) = state.services.get(service) else {
            return fail(CALL, BOOTSTRAP_UNKNOWN_SERVICE);
        };
        state.grant_send(self.pid, name);
        Ok(name)
    }

    fn allocate_receive(&self) -> Result<PortName> {
        let mut state = self.kernel.shared.state.lock();
        state.live_task(self.pid, "mach_port_allocate")?;
        Ok(state.new_port(self.pid))
    }

    fn task_self(&self) -> PortName {
        self.task_port
    }

    fn send(&self, buffer: &mut MessageBuffer, send_size: usize, _wait: Wait) -> Result<()> {
        const CALL: &str = "mach_msg";
        if send_size < HEADER_SIZE {
            return fail(CALL, MACH_SEND_MSG_TOO_SMALL);
        }
        if send_size > buffer.capacity() || send_size % 4 != 0 {
            return fail(CALL, MACH_SEND_INVALID_HEADER);
        }
        let bytes = &buffer.as_bytes()[..send_size];
        let Some(header) = MsgHeader::parse(bytes) else {
            return fail(CALL, MACH_SEND_MSG_TOO_SMALL);
        };

        let mut state = self.kernel.shared.state.lock();
        state.live_task(self.pid, CALL)?;

        let Some(remote) = Disposition::from_raw(msgh_bits_remote(header.bits)) else {
            return fail(CALL, MACH_SEND_INVALID_HEADER);
        };
        if !state.ports.contains_key(&header.remote_port)
            || !state.can_transfer(self.pid, header.remote_port, remote)
        {
            return fail(CALL, MACH_SEND_INVALID_DEST);
        }
        let local = if header.local_port == PORT_NULL {
            None
        } else {
            let Some(local) = Disposition::from_raw(msgh_bits_local(header.bits)) else {
                return fail(CALL, MACH_SEND_INVALID_HEADER);
            };
            if !state.can_transfer(self.pid, header.local_port, local) {
                return fail(CALL, MACH_SEND_INVALID_RIGHT);
            }
            Some(local)
        };

        let mut carried = Vec::new();
        if header.is_complex() {
            let Some(body) = bytes.get(HEADER_SIZE..).and_then(MsgBody::parse) else {
                return fail(CALL, MACH_SEND_MSG_TOO_SMALL);
            };
            let found: Vec<(usize, PortDescriptor)> = descriptors(bytes).collect();
            if found.len() != body.descriptor_count as usize {
                return fail(CALL, MACH_SEND_MSG_TOO_SMALL);
            }
            for (at, descriptor) in found {
                if descriptor.ty != descriptor_type::PORT {
                    return fail(CALL, KERN_INVALID_ARGUMENT);
                }
                let Some(disposition) = Disposition::from_raw(descriptor.disposition) else {
                    return fail(CALL, MACH_SEND_INVALID_RIGHT);
                };
                if descriptor.name != PORT_NULL
                    && !state.can_transfer(self.pid, descriptor.name, disposition)
                {
                    return fail(CALL, MACH_SEND_INVALID_RIGHT);
                }
                carried.push((at, descriptor.name, disposition));
            }
        }

        // Every right checks out; consume moved rights and build the receiver's image.
        if remote == Disposition::MoveSend {
            state.drop_send(self.pid, header.remote_port);
        }
        if let Some(Disposition::MoveSend) = local {
            state.drop_send(self.pid, header.local_port);
        }
        let mut image = bytes.to_vec();
        for &(at, name, disposition) in &carried {
            if disposition == Disposition::MoveSend && name != PORT_NULL {
                state.drop_send(self.pid, name);
            }
            image[at + 10] = disposition.received().raw();
        }
        let local_bits = local.map_or(0, |local| u32::from(local.received().raw()));
        let delivered = MsgHeader {
            bits: header.flags().bits() | local_bits | (u32::from(remote.received().raw()) << 8),
            size: send_size as u32,
            remote_port: header.local_port,
            local_port: header.remote_port,
            voucher_port: PORT_NULL,
            id: header.id,
        };
        image[..HEADER_SIZE].copy_from_slice(&delivered.to_le_bytes());

        let Some(sender) = state.tasks.get(&self.pid) else {
            return fail(CALL, KERN_FAILURE);
        };
        let credentials = sender.credentials;
        let audit = AuditToken::new(
            &IdentityRecord {
                auid: credentials.auid,
                euid: credentials.euid,
                egid: credentials.egid,
                ruid: credentials.ruid,
                rgid: credentials.rgid,
                pid: self.pid,
                asid: credentials.asid,
            },
            0,
        );
        let Some(port) = state.ports.get_mut(&header.remote_port) else {
            return fail(CALL, MACH_SEND_INVALID_DEST);
        };
        let seqno = port.next_seqno;
        port.next_seqno = port.next_seqno.wrapping_add(1);
        port.queue.push_back(Delivery { image, audit, seqno });
        drop(state);
        self.kernel.shared.delivered.notify_all();
        Ok(())
    }

    fn receive(
        &self,
        buffer: &mut MessageBuffer,
        port: PortName,
        wait: Wait,
        audit_trailer: bool,
    ) -> Result<()> {
        const CALL: &str = "mach_msg";
        let mut state = self.kernel.shared.state.lock();
        state.live_task(self.pid, CALL)?;
        if !state.rights(self.pid, port).receive {
            return fail(CALL, MACH_RCV_INVALID_NAME);
        }
        let deadline = match wait {
            Wait::Blocking => None,
            Wait::NonBlocking => Some(Instant::now()),
            Wait::Timeout(timeout) => Some(Instant::now() + timeout),
        };
        let delivery = loop {
            let Some(queue) = state.ports.get_mut(&port) else {
                return fail(CALL, MACH_RCV_PORT_DIED);
            };
            if let Some(delivery) = queue.queue.pop_front() {
                break delivery;
            }
            match deadline {
                None => self.kernel.shared.delivered.wait(&mut state),
                Some(deadline) => {
                    if self.kernel.shared.delivered.wait_until(&mut state, deadline).timed_out() {
                        match state.ports.get_mut(&port).and_then(|queue| queue.queue.pop_front()) {
                            Some(delivery) => break delivery,
                            None => return fail(CALL, MACH_RCV_TIMED_OUT),
                        }
                    }
                }
            }
        };

        let trailer_size = if audit_trailer { AUDIT_TRAILER_SIZE } else { TRAILER_MIN_SIZE };
        let total = delivery.image.len() + trailer_size;
        if total > buffer.capacity() {
            log::warn!("fake kernel: {} byte message dropped, receive buffer too small", total);
            return fail(CALL, MACH_RCV_TOO_LARGE);
        }

        if let Some(header) = MsgHeader::parse(&delivery.image) {
            let reply = Disposition::from_raw(msgh_bits_remote(header.bits));
            if header.remote_port != PORT_NULL && reply.is_some_and(Disposition::yields_send) {
                state.grant_send(self.pid, header.remote_port);
            }
            if header.is_complex() {
                let granted: Vec<PortName> = descriptors(&delivery.image)
                    .filter(|(_, d)| d.name != PORT_NULL && yields_send(d))
                    .map(|(_, d)| d.name)
                    .collect();
                for name in granted {
                    state.grant_send(self.pid, name);
                }
            }
        }
        drop(state);

        buffer.clear();
        let len = delivery.image.len();
        let out = buffer.as_mut_bytes();
        out[..len].copy_from_slice(&delivery.image);
        if audit_trailer {
            let trailer = AuditTrailer::new(delivery.seqno, delivery.audit);
            out[len..total].copy_from_slice(&trailer.to_le_bytes());
        } else {
            out[len..len + 4].copy_from_slice(&TRAILER_FORMAT_0.to_le_bytes());
            out[len + 4..total].copy_from_slice(&(TRAILER_MIN_SIZE as u32).to_le_bytes());
        }
        Ok(())
    }

    fn destroy(&self, buffer: &mut MessageBuffer) {
        let mut state = self.kernel.shared.state.lock();
        let bytes = buffer.as_bytes();
        if let Some(header) = MsgHeader::parse(bytes) {
            let size = (header.size as usize).min(bytes.len());
            let reply = Disposition::from_raw(msgh_bits_remote(header.bits));
            if header.remote_port != PORT_NULL && reply.is_some_and(Disposition::yields_send) {
                state.drop_send(self.pid, header.remote_port);
            }
            if header.is_complex() {
                let carried: Vec<PortName> = descriptors(&bytes[..size])
                    .filter(|(_, d)| d.ty == descriptor_type::PORT && d.name != PORT_NULL)
                    .filter(|(_, d)| yields_send(d))
                    .map(|(_, d)| d.name)
                    .collect();
                for name in carried {
                    state.drop_send(self.pid, name);
                }
            }
        }
        drop(state);
        buffer.clear();
    }

    fn pid_for_task(&self, task: PortName) -> Result<i32> {
        const CALL: &str = "pid_for_task";
        let state = self.kernel.shared.state.lock();
        if state.rights(self.pid, task).send_refs == 0 {
            return fail(CALL, KERN_FAILURE);
        }
        match state.task_ports.get(&task) {
            Some(pid) if state.tasks.get(pid).is_some_and(|target| target.alive) => Ok(*pid),
            _ => fail(CALL, KERN_FAILURE),
        }
    }

    fn release(&self, name: PortName, right: RightType) -> Result<()> {
        let call = match right {
            RightType::Receive => "mach_port_mod_refs",
            RightType::Send => "mach_port_deallocate",
        };
        let mut state = self.kernel.shared.state.lock();
        let rights = state.tasks.get_mut(&self.pid).and_then(|task| task.rights.get_mut(&name));
        let Some(rights) = rights else {
            return fail(call, KERN_INVALID_NAME);
        };
        match right {
            RightType::Receive if rights.receive => rights.receive = false,
            RightType::Send if rights.send_refs > 0 => rights.send_refs -= 1,
            _ => return fail(call, KERN_INVALID_RIGHT),
        }
        let emptied = rights.is_empty();
        if emptied {
            if let Some(task) = state.tasks.get_mut(&self.pid) {
                task.rights.remove(&name);
            }
        }
        if right == RightType::Receive {
            state.kill_port(name);
            drop(state);
            self.kernel.shared.delivered.notify_all();
        }
        Ok(())
    }

    fn credentials(&self) -> Result<Credentials> {
        let mut state = self.kernel.shared.state.lock();
        Ok(state.live_task(self.pid, "getaudit_addr")?.credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_mach_abi::{decode_received, HelloExpectations, HelloMessage, HELLO_SIZE};
    use std::time::Duration;

    struct Pair {
        kernel: FakeKernel,
        parent: FakeTask,
        child: FakeTask,
        service: PortName,
    }

    fn pair() -> Pair {
        let kernel = FakeKernel::new();
        let parent = kernel.spawn(DEFAULT_CREDENTIALS);
        let service = parent.check_in("svc").expect("check in");
        let child = kernel.fork(&parent);
        Pair { kernel, parent, child, service }
    }

    fn send_hello(child: &FakeTask) -> PortName {
        let destination = child.look_up("svc").expect("look up");
        let reply = child.allocate_receive().expect("allocate");
        let message = HelloMessage::new(destination, reply, child.task_self());
        let mut buffer = MessageBuffer::with_message(&message.to_le_bytes()).expect("fits");
        child.send(&mut buffer, HELLO_SIZE, Wait::Blocking).expect("send");
        reply
    }

    #[test]
    fn hello_delivery_matches_kernel_shape() {
        let Pair { kernel, parent, child, service } = pair();
        let reply = send_hello(&child);

        let mut buffer = MessageBuffer::new();
        parent.receive(&mut buffer, service, Wait::Blocking, true).expect("receive");
        let expect = HelloExpectations { local_port: service, audit_trailer: true };
        let hello = decode_received(buffer.as_bytes(), &expect, |m| panic!("mismatch: {m}"))
            .expect("decodes");

        assert_eq!(hello.reply_port(), reply);
        assert_eq!(hello.identity().map(|id| id.pid), Some(child.pid()));
        assert_eq!(kernel.rights(&parent, reply).send_refs, 1);
        assert_eq!(parent.pid_for_task(hello.task_port()), Ok(child.pid()));
        // COPY_SEND leaves the child its own task port.
        assert_eq!(kernel.rights(&child, child.task_self()).send_refs, 1);
    }

    #[test]
    fn receive_honours_timeout() {
        let Pair { parent, service, .. } = pair();
        let mut buffer = MessageBuffer::new();
        let started = Instant::now();
        let err = parent
            .receive(&mut buffer, service, Wait::Timeout(Duration::from_millis(20)), true)
            .unwrap_err();
        assert_eq!(err, KernelError::TimedOut { call: "mach_msg" });
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn send_without_right_is_rejected() {
        let Pair { kernel, service, .. } = pair();
        let stranger = kernel.spawn(DEFAULT_CREDENTIALS);
        let reply = stranger.allocate_receive().expect("allocate");
        let message = HelloMessage::new(service, reply, stranger.task_self());
        let mut buffer = MessageBuffer::with_message(&message.to_le_bytes()).expect("fits");
        assert_eq!(
            stranger.send(&mut buffer, HELLO_SIZE, Wait::Blocking),
            Err(KernelError::from_kern("mach_msg", MACH_SEND_INVALID_DEST))
        );
        assert_eq!(kernel.queued(service), 0);
    }

    #[test]
    fn destroy_returns_carried_rights() {
        let Pair { kernel, parent, child, service } = pair();
        let reply = send_hello(&child);
        let mut buffer = MessageBuffer::new();
        parent.receive(&mut buffer, service, Wait::Blocking, true).expect("receive");
        assert_eq!(kernel.rights(&parent, reply).send_refs, 1);
        assert_eq!(kernel.rights(&parent, child.task_self()).send_refs, 1);

        parent.destroy(&mut buffer);
        assert_eq!(kernel.rights(&parent, reply), FakeRights::default());
        assert_eq!(kernel.rights(&parent, child.task_self()), FakeRights::default());
        assert!(buffer.as_bytes().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn releasing_receive_right_unregisters_service() {
        let Pair { kernel, parent, service, .. } = pair();
        parent.release(service, RightType::Receive).expect("release");
        assert!(!kernel.is_registered("svc"));
        let mut buffer = MessageBuffer::new();
        assert_eq!(
            parent.receive(&mut buffer, service, Wait::NonBlocking, true),
            Err(KernelError::from_kern("mach_msg", MACH_RCV_INVALID_NAME))
        );
        assert_eq!(
            parent.release(service, RightType::Receive),
            Err(KernelError::from_kern("mach_port_mod_refs", KERN_INVALID_NAME))
        );
    }

    #[test]
    fn minimal_trailer_without_audit_request() {
        let Pair { parent, child, service, .. } = pair();
        send_hello(&child);
        let mut buffer = MessageBuffer::new();
        parent.receive(&mut buffer, service, Wait::Blocking, false).expect("receive");
        let trailer = &buffer.as_bytes()[HELLO_SIZE..HELLO_SIZE + TRAILER_MIN_SIZE];
        assert_eq!(trailer, &[0, 0, 0, 0, 8, 0, 0, 0]);
        assert!(buffer.as_bytes()[HELLO_SIZE + TRAILER_MIN_SIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn exited_task_has_no_pid() {
        let Pair { kernel, parent, child, service } = pair();
        send_hello(&child);
        let mut buffer = MessageBuffer::new();
        parent.receive(&mut buffer, service, Wait::Blocking, true).expect("receive");
        let task = child.task_self();
        kernel.exit(&child);
        assert_eq!(
            parent.pid_for_task(task),
            Err(KernelError::from_kern("pid_for_task", KERN_FAILURE))
        );
        assert!(child.allocate_receive().is_err());
    }
}
