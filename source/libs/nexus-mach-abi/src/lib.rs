// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Darwin Mach message ABI consumed by the multiprocess rendezvous fixture
//! OWNERS: @runtime
//! PUBLIC API: MsgHeader, MsgBody, PortDescriptor, Disposition, MsgOptions, HelloMessage,
//!   decode_received, AuditTrailer, IdentityRecord, kern::*
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Header is 24 bytes LE; hello message is 40 bytes; audit trailer is 52 bytes;
//!   offsets mirror <mach/message.h> under `#pragma pack(4)` on 64-bit Darwin
//!
//! Every Darwin target is little-endian, so the `*_le_bytes` codecs below produce the exact
//! in-memory image `mach_msg` reads and writes.

pub mod hello;
pub mod kern;
pub mod trailer;

pub use hello::{
    decode_received, DecodeError, FieldMismatch, HelloExpectations, HelloField, HelloMessage,
    ReceivedHello, HELLO_RECEIVE_SIZE, HELLO_SIZE,
};
pub use trailer::{
    AuditToken, AuditTrailer, ExpectedIdentity, IdentityField, IdentityMismatch, IdentityRecord,
    AUDIT_TRAILER_SIZE, TRAILER_FORMAT_0,
};

/// Port name as seen from one task's name space (`mach_port_name_t`).
pub type PortName = u32;

/// `MACH_PORT_NULL`.
pub const PORT_NULL: PortName = 0;

/// Size of `mach_msg_header_t`.
pub const HEADER_SIZE: usize = 24;
/// Size of `mach_msg_body_t`.
pub const BODY_SIZE: usize = 4;
/// Size of `mach_msg_port_descriptor_t`.
pub const PORT_DESCRIPTOR_SIZE: usize = 12;
/// Size of the minimal `mach_msg_trailer_t` the kernel always appends.
pub const TRAILER_MIN_SIZE: usize = 8;

/// Port right dispositions (`MACH_MSG_TYPE_*`).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// `MACH_MSG_TYPE_MOVE_RECEIVE`, also reported as `MACH_MSG_TYPE_PORT_RECEIVE`.
    MoveReceive = 16,
    /// `MACH_MSG_TYPE_MOVE_SEND`, also reported as `MACH_MSG_TYPE_PORT_SEND`.
    MoveSend = 17,
    /// `MACH_MSG_TYPE_MOVE_SEND_ONCE`.
    MoveSendOnce = 18,
    /// `MACH_MSG_TYPE_COPY_SEND`: the sender keeps its own send right.
    CopySend = 19,
    /// `MACH_MSG_TYPE_MAKE_SEND`: a send right is minted from the sender's receive right.
    MakeSend = 20,
    /// `MACH_MSG_TYPE_MAKE_SEND_ONCE`.
    MakeSendOnce = 21,
    /// `MACH_MSG_TYPE_COPY_RECEIVE`.
    CopyReceive = 22,
}

impl Disposition {
    /// Decodes a raw disposition byte.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            16 => Some(Self::MoveReceive),
            17 => Some(Self::MoveSend),
            18 => Some(Self::MoveSendOnce),
            19 => Some(Self::CopySend),
            20 => Some(Self::MakeSend),
            21 => Some(Self::MakeSendOnce),
            22 => Some(Self::CopyReceive),
            _ => None,
        }
    }

    /// Returns the raw disposition byte.
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Disposition the receiver observes once the kernel has copied the right in.
    pub const fn received(self) -> Self {
        match self {
            Self::MoveReceive | Self::CopyReceive => Self::MoveReceive,
            Self::MoveSend | Self::CopySend | Self::MakeSend => Self::MoveSend,
            Self::MoveSendOnce | Self::MakeSendOnce => Self::MoveSendOnce,
        }
    }

    /// Returns `true` when the receiver ends up holding a (multi-use) send right.
    pub const fn yields_send(self) -> bool {
        matches!(self.received(), Self::MoveSend)
    }
}

bitflags::bitflags! {
    /// Flag bits of `msgh_bits` outside the disposition fields.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MsghFlags: u32 {
        /// `MACH_MSGH_BITS_COMPLEX`: a body with descriptors follows the header.
        const COMPLEX = 0x8000_0000;
    }
}

bitflags::bitflags! {
    /// `mach_msg` option word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MsgOptions: i32 {
        /// `MACH_SEND_MSG`.
        const SEND_MSG = 0x0000_0001;
        /// `MACH_RCV_MSG`.
        const RCV_MSG = 0x0000_0002;
        /// `MACH_SEND_TIMEOUT`.
        const SEND_TIMEOUT = 0x0000_0010;
        /// `MACH_RCV_TIMEOUT`.
        const RCV_TIMEOUT = 0x0000_0100;
        /// `MACH_RCV_TRAILER_TYPE(MACH_MSG_TRAILER_FORMAT_0) |
        /// MACH_RCV_TRAILER_ELEMENTS(MACH_RCV_TRAILER_AUDIT)`.
        const RCV_TRAILER_AUDIT = 3 << 24;
    }
}

/// `MACH_MSG_TIMEOUT_NONE`.
pub const MSG_TIMEOUT_NONE: u32 = 0;

/// Descriptor type tags (`MACH_MSG_*_DESCRIPTOR`).
pub mod descriptor_type {
    /// `MACH_MSG_PORT_DESCRIPTOR`.
    pub const PORT: u8 = 0;
    /// `MACH_MSG_OOL_DESCRIPTOR`: raw out-of-line data.
    pub const OOL: u8 = 1;
}

/// Packs remote and local dispositions the way `MACH_MSGH_BITS` does.
pub const fn msgh_bits(remote: Disposition, local: Disposition) -> u32 {
    remote as u32 | ((local as u32) << 8)
}

/// Extracts the remote-port disposition (`MACH_MSGH_BITS_REMOTE`).
pub const fn msgh_bits_remote(bits: u32) -> u8 {
    (bits & 0x1f) as u8
}

/// Extracts the local-port disposition (`MACH_MSGH_BITS_LOCAL`).
pub const fn msgh_bits_local(bits: u32) -> u8 {
    ((bits >> 8) & 0x1f) as u8
}

pub(crate) fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// `mach_msg_header_t`.
#[repr(C, align(4))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgHeader {
    /// Dispositions of the two header ports plus [`MsghFlags`].
    pub bits: u32,
    /// Total message size, header included, trailer excluded.
    pub size: u32,
    /// Destination on send; reply port on receive.
    pub remote_port: PortName,
    /// Reply port on send; destination on receive.
    pub local_port: PortName,
    /// Voucher port (unused here).
    pub voucher_port: PortName,
    /// Message id.
    pub id: i32,
}

impl MsgHeader {
    /// Returns the flag portion of `bits`.
    pub const fn flags(&self) -> MsghFlags {
        MsghFlags::from_bits_truncate(self.bits)
    }

    /// Returns `true` when the header announces a descriptor body.
    pub const fn is_complex(&self) -> bool {
        self.bits & MsghFlags::COMPLEX.bits() != 0
    }

    /// Serialises the header to a little-endian byte array.
    pub fn to_le_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0_u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.bits.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.remote_port.to_le_bytes());
        buf[12..16].copy_from_slice(&self.local_port.to_le_bytes());
        buf[16..20].copy_from_slice(&self.voucher_port.to_le_bytes());
        buf[20..24].copy_from_slice(&self.id.to_le_bytes());
        buf
    }

    /// Reads a header from the front of `bytes`, or `None` if it is too short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            bits: le_u32(bytes, 0),
            size: le_u32(bytes, 4),
            remote_port: le_u32(bytes, 8),
            local_port: le_u32(bytes, 12),
            voucher_port: le_u32(bytes, 16),
            id: le_u32(bytes, 20) as i32,
        })
    }
}

/// `mach_msg_body_t`.
#[repr(C, align(4))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgBody {
    /// Number of descriptors that follow.
    pub descriptor_count: u32,
}

impl MsgBody {
    /// Serialises the body to a little-endian byte array.
    pub fn to_le_bytes(&self) -> [u8; BODY_SIZE] {
        self.descriptor_count.to_le_bytes()
    }

    /// Reads a body from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BODY_SIZE {
            return None;
        }
        Some(Self { descriptor_count: le_u32(bytes, 0) })
    }
}

/// `mach_msg_port_descriptor_t`.
///
/// The C definition packs `pad2:16, disposition:8, type:8` into the last word; on a
/// little-endian target that is two bytes of padding followed by one byte each.
#[repr(C, align(4))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Port name carried by the descriptor.
    pub name: PortName,
    /// Padding word.
    pub pad1: u32,
    /// Padding half-word.
    pub pad2: u16,
    /// Raw [`Disposition`].
    pub disposition: u8,
    /// Descriptor type tag, see [`descriptor_type`].
    pub ty: u8,
}

impl PortDescriptor {
    /// Creates a port descriptor carrying `name` with `disposition`.
    pub const fn new(name: PortName, disposition: Disposition) -> Self {
        Self { name, pad1: 0, pad2: 0, disposition: disposition as u8, ty: descriptor_type::PORT }
    }

    /// Serialises the descriptor to a little-endian byte array.
    pub fn to_le_bytes(&self) -> [u8; PORT_DESCRIPTOR_SIZE] {
        let mut buf = [0_u8; PORT_DESCRIPTOR_SIZE];
        buf[0..4].copy_from_slice(&self.name.to_le_bytes());
        buf[4..8].copy_from_slice(&self.pad1.to_le_bytes());
        buf[8..10].copy_from_slice(&self.pad2.to_le_bytes());
        buf[10] = self.disposition;
        buf[11] = self.ty;
        buf
    }

    /// Reads a descriptor from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PORT_DESCRIPTOR_SIZE {
            return None;
        }
        Some(Self {
            name: le_u32(bytes, 0),
            pad1: le_u32(bytes, 4),
            pad2: u16::from_le_bytes([bytes[8], bytes[9]]),
            disposition: bytes[10],
            ty: bytes[11],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};

    #[test]
    fn header_layout() {
        assert_eq!(size_of::<MsgHeader>(), HEADER_SIZE);
        assert_eq!(align_of::<MsgHeader>(), 4);
        assert_eq!(offset_of!(MsgHeader, bits), 0);
        assert_eq!(offset_of!(MsgHeader, size), 4);
        assert_eq!(offset_of!(MsgHeader, remote_port), 8);
        assert_eq!(offset_of!(MsgHeader, local_port), 12);
        assert_eq!(offset_of!(MsgHeader, voucher_port), 16);
        assert_eq!(offset_of!(MsgHeader, id), 20);
    }

    #[test]
    fn descriptor_layout() {
        assert_eq!(size_of::<MsgBody>(), BODY_SIZE);
        assert_eq!(size_of::<PortDescriptor>(), PORT_DESCRIPTOR_SIZE);
        assert_eq!(offset_of!(PortDescriptor, pad2), 8);
        assert_eq!(offset_of!(PortDescriptor, disposition), 10);
        assert_eq!(offset_of!(PortDescriptor, ty), 11);
    }

    #[test]
    fn header_golden_vector() {
        // bits=bits(COPY_SEND, MAKE_SEND)|COMPLEX, size=40, remote=0x1103, local=0x2207
        const VECTOR: [u8; HEADER_SIZE] = [
            0x13, 0x14, 0x00, 0x80, 0x28, 0x00, 0x00, 0x00, 0x03, 0x11, 0x00, 0x00, 0x07, 0x22,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let header = MsgHeader {
            bits: msgh_bits(Disposition::CopySend, Disposition::MakeSend)
                | MsghFlags::COMPLEX.bits(),
            size: 40,
            remote_port: 0x1103,
            local_port: 0x2207,
            voucher_port: PORT_NULL,
            id: 0,
        };
        assert_eq!(
            header.to_le_bytes(),
            VECTOR,
            "golden vector out of date; expected bytes: {:02x?}",
            header.to_le_bytes()
        );
        assert_eq!(MsgHeader::parse(&VECTOR), Some(header));
        assert!(header.is_complex());
    }

    #[test]
    fn bits_accessors() {
        let bits = msgh_bits(Disposition::MoveSend, Disposition::MakeSend);
        assert_eq!(msgh_bits_remote(bits), Disposition::MoveSend.raw());
        assert_eq!(msgh_bits_local(bits), Disposition::MakeSend.raw());
    }

    #[test]
    fn received_dispositions() {
        assert_eq!(Disposition::CopySend.received(), Disposition::MoveSend);
        assert_eq!(Disposition::MakeSend.received(), Disposition::MoveSend);
        assert_eq!(Disposition::MakeSendOnce.received(), Disposition::MoveSendOnce);
        assert!(!Disposition::MoveReceive.yields_send());
        assert_eq!(Disposition::from_raw(23), None);
    }

    #[test]
    fn short_input_is_rejected() {
        assert_eq!(MsgHeader::parse(&[0u8; HEADER_SIZE - 1]), None);
        assert_eq!(PortDescriptor::parse(&[0u8; 4]), None);
    }
}
