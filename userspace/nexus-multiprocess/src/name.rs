// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rendezvous names: a fixed prefix plus a random uppercase suffix, generated once per
//! process pair before the split.

use core::fmt;

use rand::Rng;

/// Prefix used when no other is configured.
pub const DEFAULT_PREFIX: &str = "org.opennexus.test.mach_multiprocess.";

/// Length of the random suffix.
pub const SUFFIX_LEN: usize = 16;

/// Bootstrap service name shared by one parent/child pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RendezvousName(String);

impl RendezvousName {
    /// Generates a name under [`DEFAULT_PREFIX`] from the thread-local generator.
    pub fn generate() -> Self {
        Self::generate_with(DEFAULT_PREFIX, &mut rand::thread_rng())
    }

    /// Generates a name under `prefix` from `rng`.
    pub fn generate_with<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> Self {
        let mut name = String::with_capacity(prefix.len() + SUFFIX_LEN);
        name.push_str(prefix);
        name.extend((0..SUFFIX_LEN).map(|_| char::from(rng.gen_range(b'A'..=b'Z'))));
        Self(name)
    }

    /// Full service name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Random part of the name.
    pub fn suffix(&self) -> &str {
        &self.0[self.0.len() - SUFFIX_LEN..]
    }
}

impl fmt::Display for RendezvousName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RendezvousName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn default_prefix_is_applied() {
        let name = RendezvousName::generate();
        assert!(name.as_str().starts_with(DEFAULT_PREFIX));
        assert_eq!(name.as_str().len(), DEFAULT_PREFIX.len() + SUFFIX_LEN);
    }

    #[test]
    fn same_seed_same_name() {
        let a = RendezvousName::generate_with("p.", &mut StdRng::seed_from_u64(7));
        let b = RendezvousName::generate_with("p.", &mut StdRng::seed_from_u64(7));
        let c = RendezvousName::generate_with("p.", &mut StdRng::seed_from_u64(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    proptest! {
        #[test]
        fn suffix_is_sixteen_uppercase_letters(seed in any::<u64>(), prefix in "[a-z.]{0,24}") {
            let name = RendezvousName::generate_with(&prefix, &mut StdRng::seed_from_u64(seed));
            prop_assert!(name.as_str().starts_with(prefix.as_str()));
            prop_assert_eq!(name.suffix().len(), SUFFIX_LEN);
            prop_assert!(name.suffix().bytes().all(|b| b.is_ascii_uppercase()));
        }
    }
}
