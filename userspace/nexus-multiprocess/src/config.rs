// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime knobs of the fixture.

use core::time::Duration;

use nexus_mach_ipc::Wait;

use crate::name::DEFAULT_PREFIX;

/// Fixture configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Prefix of every generated rendezvous name.
    pub service_prefix: String,
    /// How the parent waits for the hello message. Blocking unless a caller opts in.
    pub receive_wait: Wait,
}

impl Default for Config {
    fn default() -> Self {
        Self { service_prefix: DEFAULT_PREFIX.to_owned(), receive_wait: Wait::Blocking }
    }
}

impl Config {
    /// Replaces the service prefix.
    pub fn with_service_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.service_prefix = prefix.into();
        self
    }

    /// Bounds the parent's wait for the hello message.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_wait = Wait::Timeout(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_blocks_forever() {
        let config = Config::default();
        assert_eq!(config.receive_wait, Wait::Blocking);
        assert_eq!(config.service_prefix, DEFAULT_PREFIX);
    }

    #[test]
    fn builders_override() {
        let config = Config::default()
            .with_service_prefix("org.example.")
            .with_receive_timeout(Duration::from_millis(5));
        assert_eq!(config.service_prefix, "org.example.");
        assert_eq!(config.receive_wait, Wait::Timeout(Duration::from_millis(5)));
    }
}
