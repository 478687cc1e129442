// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixture errors and the log of non-fatal failures.

use core::fmt;
use std::io;

use nexus_mach_abi::{DecodeError, FieldMismatch, IdentityMismatch};
use nexus_mach_ipc::KernelError;

use crate::split::ChildExit;

/// Every identity field that disagreed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityMismatches(pub Vec<IdentityMismatch>);

impl fmt::Display for IdentityMismatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, mismatch) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{mismatch}")?;
        }
        Ok(())
    }
}

/// Errors produced by the rendezvous fixture.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registration, lookup or right allocation failed before anything was exchanged.
    #[error("setup failed: {0}")]
    Setup(#[source] KernelError),
    /// The hello message is malformed; decoding stopped.
    #[error("structural protocol violation: {0}")]
    Structural(#[from] DecodeError),
    /// The audit trailer names someone other than the expected child.
    #[error("identity mismatch: {0}")]
    Identity(IdentityMismatches),
    /// The transferred task port belongs to another process.
    #[error("task port names pid {actual}, expected child pid {expected}")]
    TaskMismatch {
        /// Pid reported by process creation.
        expected: i32,
        /// Pid `pid_for_task` returned.
        actual: i32,
    },
    /// A kernel call failed after setup.
    #[error("kernel call failed: {0}")]
    Kernel(#[source] KernelError),
    /// Rights were requested before a hello was verified.
    #[error("no verified hello to release")]
    NotVerified,
    /// Creating the child failed.
    #[error("process split failed: {0}")]
    Split(#[source] io::Error),
    /// The shutdown barrier pipe failed.
    #[error("shutdown barrier: {0}")]
    Barrier(#[from] io::Error),
    /// A workload hook returned an error.
    #[error("workload failed: {0:#}")]
    Workload(anyhow::Error),
    /// The child did not finish cleanly.
    #[error("child aborted (no success marker, exit {0:?})")]
    ChildAbort(ChildExit),
    /// Non-fatal failures were recorded during an otherwise complete run.
    #[error("{0} non-fatal failure(s) recorded")]
    Recorded(usize),
}

/// One recorded failure.
#[derive(Debug)]
pub enum Failure {
    /// A header or trailer field disagreed with its expected constant.
    Field(FieldMismatch),
    /// A failure that did not stop the run.
    Error(Error),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(mismatch) => write!(f, "{mismatch}"),
            Self::Error(err) => write!(f, "{err}"),
        }
    }
}

/// Failures recorded without stopping the run.
#[derive(Debug, Default)]
pub struct FailureLog {
    failures: Vec<Failure>,
}

impl FailureLog {
    /// Records a field mismatch.
    pub fn record_field(&mut self, mismatch: FieldMismatch) {
        log::warn!("hello field mismatch: {mismatch}");
        self.failures.push(Failure::Field(mismatch));
    }

    /// Records a non-fatal error.
    pub fn record(&mut self, err: Error) {
        log::error!("{err}");
        self.failures.push(Failure::Error(err));
    }

    /// Whether anything was recorded.
    pub fn has_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Recorded failures, oldest first.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
