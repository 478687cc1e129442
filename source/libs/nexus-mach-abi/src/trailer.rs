// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel-appended message trailers and the sender identity they carry.
//!
//! The kernel writes `mach_msg_audit_trailer_t` directly after the message body when the
//! receiver asks for `MACH_RCV_TRAILER_AUDIT`. The audit token inside it is the only
//! tamper-proof statement of who sent the message.

use core::fmt;

use crate::le_u32;

/// `MACH_MSG_TRAILER_FORMAT_0`.
pub const TRAILER_FORMAT_0: u32 = 0;

/// Size of `mach_msg_audit_trailer_t`.
pub const AUDIT_TRAILER_SIZE: usize = 52;

/// `audit_token_t`: `{auid, euid, egid, ruid, rgid, pid, asid, pidversion}`.
#[repr(C, align(4))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuditToken {
    /// Raw token words.
    pub val: [u32; 8],
}

impl AuditToken {
    /// Builds a token for `record` with the given pid version.
    pub const fn new(record: &IdentityRecord, pidversion: i32) -> Self {
        Self {
            val: [
                record.auid,
                record.euid,
                record.egid,
                record.ruid,
                record.rgid,
                record.pid as u32,
                record.asid as u32,
                pidversion as u32,
            ],
        }
    }

    /// Pid version (bumped by exec); not part of [`IdentityRecord`].
    pub const fn pidversion(&self) -> i32 {
        self.val[7] as i32
    }

    /// Decodes the identity fields, as `audit_token_to_au32` does.
    pub const fn identity(&self) -> IdentityRecord {
        IdentityRecord {
            auid: self.val[0],
            euid: self.val[1],
            egid: self.val[2],
            ruid: self.val[3],
            rgid: self.val[4],
            pid: self.val[5] as i32,
            asid: self.val[6] as i32,
        }
    }
}

/// `mach_msg_audit_trailer_t`.
#[repr(C, align(4))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuditTrailer {
    /// `msgh_trailer_type`.
    pub trailer_type: u32,
    /// `msgh_trailer_size`.
    pub trailer_size: u32,
    /// `msgh_seqno`.
    pub seqno: u32,
    /// `msgh_sender` security token (`{uid, gid}`).
    pub sender: [u32; 2],
    /// `msgh_audit`.
    pub audit: AuditToken,
}

impl AuditTrailer {
    /// Builds a well-formed format-0 audit trailer.
    pub const fn new(seqno: u32, audit: AuditToken) -> Self {
        let identity = audit.identity();
        Self {
            trailer_type: TRAILER_FORMAT_0,
            trailer_size: AUDIT_TRAILER_SIZE as u32,
            seqno,
            sender: [identity.euid, identity.egid],
            audit,
        }
    }

    /// Serialises the trailer to a little-endian byte array.
    pub fn to_le_bytes(&self) -> [u8; AUDIT_TRAILER_SIZE] {
        let mut buf = [0_u8; AUDIT_TRAILER_SIZE];
        buf[0..4].copy_from_slice(&self.trailer_type.to_le_bytes());
        buf[4..8].copy_from_slice(&self.trailer_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seqno.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sender[0].to_le_bytes());
        buf[16..20].copy_from_slice(&self.sender[1].to_le_bytes());
        for (index, word) in self.audit.val.iter().enumerate() {
            let at = 20 + index * 4;
            buf[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Reads a trailer from the front of `bytes`, or `None` if it is too short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < AUDIT_TRAILER_SIZE {
            return None;
        }
        let mut audit = AuditToken::default();
        for (index, word) in audit.val.iter_mut().enumerate() {
            *word = le_u32(bytes, 20 + index * 4);
        }
        Some(Self {
            trailer_type: le_u32(bytes, 0),
            trailer_size: le_u32(bytes, 4),
            seqno: le_u32(bytes, 8),
            sender: [le_u32(bytes, 12), le_u32(bytes, 16)],
            audit,
        })
    }
}

/// Authenticated sender identity decoded from an audit token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Audit user id.
    pub auid: u32,
    /// Effective user id.
    pub euid: u32,
    /// Effective group id.
    pub egid: u32,
    /// Real user id.
    pub ruid: u32,
    /// Real group id.
    pub rgid: u32,
    /// Process id.
    pub pid: i32,
    /// Audit session id.
    pub asid: i32,
}

/// Values the receiver independently knows the sender must present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpectedIdentity {
    /// Receiver's own audit user id.
    pub auid: u32,
    /// Receiver's own effective user id.
    pub euid: u32,
    /// Receiver's own effective group id.
    pub egid: u32,
    /// Receiver's own real user id.
    pub ruid: u32,
    /// Receiver's own real group id.
    pub rgid: u32,
    /// Pid of the child as reported by process creation.
    pub pid: i32,
    /// Receiver's own audit session id.
    pub asid: i32,
}

/// Identity field named in an [`IdentityMismatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityField {
    /// Audit user id.
    Auid,
    /// Effective user id.
    Euid,
    /// Effective group id.
    Egid,
    /// Real user id.
    Ruid,
    /// Real group id.
    Rgid,
    /// Process id.
    Pid,
    /// Audit session id.
    Asid,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auid => "auid",
            Self::Euid => "euid",
            Self::Egid => "egid",
            Self::Ruid => "ruid",
            Self::Rgid => "rgid",
            Self::Pid => "pid",
            Self::Asid => "asid",
        };
        f.write_str(name)
    }
}

/// One identity field that disagrees with the expected value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityMismatch {
    /// Field that disagrees.
    pub field: IdentityField,
    /// Value the receiver expected.
    pub expected: i64,
    /// Value carried by the audit token.
    pub actual: i64,
}

impl fmt::Display for IdentityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is {} (expected {})", self.field, self.actual, self.expected)
    }
}

impl IdentityRecord {
    /// Yields every field that disagrees with `expected`, in token order.
    pub fn mismatches(
        &self,
        expected: &ExpectedIdentity,
    ) -> impl Iterator<Item = IdentityMismatch> {
        let pairs = [
            (IdentityField::Auid, i64::from(expected.auid), i64::from(self.auid)),
            (IdentityField::Euid, i64::from(expected.euid), i64::from(self.euid)),
            (IdentityField::Egid, i64::from(expected.egid), i64::from(self.egid)),
            (IdentityField::Ruid, i64::from(expected.ruid), i64::from(self.ruid)),
            (IdentityField::Rgid, i64::from(expected.rgid), i64::from(self.rgid)),
            (IdentityField::Pid, i64::from(expected.pid), i64::from(self.pid)),
            (IdentityField::Asid, i64::from(expected.asid), i64::from(self.asid)),
        ];
        pairs
            .into_iter()
            .filter(|(_, expected, actual)| expected != actual)
            .map(|(field, expected, actual)| IdentityMismatch { field, expected, actual })
    }

    /// Returns `true` when every field matches `expected`.
    pub fn matches(&self, expected: &ExpectedIdentity) -> bool {
        self.mismatches(expected).next().is_none()
    }
}
