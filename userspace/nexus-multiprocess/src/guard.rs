// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! No-return zone for the child routine.
//!
//! The child must never fall back into code the parent would have run. [`ForbidReturn`]
//! is armed for the whole child routine and terminates the process when dropped armed,
//! including while a panic unwinds through it.

use std::thread;

/// Abrupt termination of the current child.
#[derive(Clone, Copy)]
pub struct Terminator {
    label: &'static str,
    exit: fn() -> !,
    unwinds: bool,
}

impl Terminator {
    /// Terminator that calls `exit`, which must end the child without unwinding.
    pub const fn new(label: &'static str, exit: fn() -> !) -> Self {
        Self { label, exit, unwinds: false }
    }

    /// Terminator whose `exit` panics to unwind the child.
    ///
    /// A panic already unwinding the child ends it the same way, so this terminator
    /// stands aside while [`thread::panicking`] is set.
    pub const fn unwinding(label: &'static str, exit: fn() -> !) -> Self {
        Self { label, exit, unwinds: true }
    }

    fn stands_aside(&self) -> bool {
        self.unwinds && thread::panicking()
    }

    /// `abort(3)`: the parent observes a signal exit.
    pub const fn abort() -> Self {
        Self::new("abort", std::process::abort)
    }

    /// Terminates; never returns.
    pub fn terminate(self) -> ! {
        log::error!("child terminating via {}", self.label);
        (self.exit)()
    }
}

impl core::fmt::Debug for Terminator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Terminator")
            .field("label", &self.label)
            .field("unwinds", &self.unwinds)
            .finish()
    }
}

/// Scope guard that terminates unless disarmed.
#[must_use = "the guard terminates when dropped"]
#[derive(Debug)]
pub struct ForbidReturn {
    terminator: Terminator,
    armed: bool,
}

impl ForbidReturn {
    /// Arms a guard that calls `terminator` on drop.
    pub fn arm(terminator: Terminator) -> Self {
        Self { terminator, armed: true }
    }

    /// Whether the guard will terminate when dropped.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Lets the scope return normally.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ForbidReturn {
    fn drop(&mut self) {
        if self.armed && !self.terminator.stands_aside() {
            self.terminator.terminate();
        }
    }
}
