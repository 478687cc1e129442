// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Two-process rendezvous fixture over Mach ports
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + tests/handshake.rs (fake kernel)
//!                + tests/darwin_fork.rs (macOS)
//!
//! The parent registers a receive right under a random bootstrap name and splits off a
//! child. The child sends one hello carrying a reply right and its task port; the parent
//! checks the message shape, the sender's audit identity and the task's pid before either
//! side runs its workload. A two-pipe barrier keeps the parent alive until the child has
//! released everything, and carries the child's success marker.
//!
//! PUBLIC API:
//!   - MachMultiprocess::run(splitter, workload) -> RunReport
//!   - Workload: on_parent_ready / on_child_ready hooks
//!   - ProcessSplitter / ProcessPair: how the child is created and reached
//!   - ParentRendezvous / ChildRendezvous: the two halves of the handshake
//!
//! SPLITTERS:
//!   - host::ThreadSplitter (feature `backend-host`): scoped thread over the fake kernel
//!   - fork::ForkSplitter (unix): `fork(2)` with pipes

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod barrier;
pub mod child;
pub mod config;
pub mod error;
mod fixture;
pub mod guard;
pub mod name;
pub mod parent;
pub mod split;

#[cfg(feature = "backend-host")]
pub mod host;

#[cfg(unix)]
#[allow(unsafe_code)]
pub mod fork;

pub use config::Config;
pub use error::{Error, Failure, FailureLog, IdentityMismatches};
pub use fixture::{ChildContext, MachMultiprocess, NoWorkload, ParentContext, RunReport, Workload};
pub use name::RendezvousName;
pub use split::{ChildExit, ProcessPair, ProcessSplitter, Split};
