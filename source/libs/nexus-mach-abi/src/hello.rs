// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: "Hello" message exchanged once per process pair by the rendezvous handshake
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (layout is fixed by the kernel)
//! TEST_COVERAGE: Unit tests below + tests/hello_codec.rs
//!
//! WIRE (send, 40 bytes):
//!   header { bits = bits(COPY_SEND, MAKE_SEND) | COMPLEX, size = 40, remote = destination,
//!            local = child's receive port }
//!   body   { descriptor_count = 1 }
//!   port descriptor { name = child task port, disposition = COPY_SEND, type = PORT }
//!
//! WIRE (receive, 92 bytes): the kernel swaps the header ports, reports every send right as
//! MOVE_SEND and appends a 52-byte audit trailer.
//!
//! DECODE ORDER: header present → size → descriptor count → descriptor type →
//! disposition → (non-fatal) bits and local port → non-null reply and task ports →
//! trailer type/size → (non-fatal) seqno. Structural checks stop decoding before any
//! later field is read.

use core::fmt;

use crate::trailer::{AuditTrailer, IdentityRecord, AUDIT_TRAILER_SIZE, TRAILER_FORMAT_0};
use crate::{
    descriptor_type, le_u32, msgh_bits, Disposition, MsgBody, MsgHeader, MsghFlags,
    PortDescriptor, PortName, BODY_SIZE, HEADER_SIZE, PORT_DESCRIPTOR_SIZE, PORT_NULL,
    TRAILER_MIN_SIZE,
};

/// Exact size of the hello message as sent (header + body + one port descriptor).
pub const HELLO_SIZE: usize = HEADER_SIZE + BODY_SIZE + PORT_DESCRIPTOR_SIZE;

/// Receive buffer size: the hello message plus an audit trailer.
pub const HELLO_RECEIVE_SIZE: usize = HELLO_SIZE + AUDIT_TRAILER_SIZE;

const BODY_OFFSET: usize = HEADER_SIZE;
const DESCRIPTOR_OFFSET: usize = HEADER_SIZE + BODY_SIZE;

/// Hello message in its send-side shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelloMessage {
    /// Message header.
    pub header: MsgHeader,
    /// Descriptor count.
    pub body: MsgBody,
    /// Descriptor carrying the sender's task port.
    pub descriptor: PortDescriptor,
}

impl HelloMessage {
    /// Builds the hello message a freshly split child sends to `destination`.
    ///
    /// `reply` must name a receive right held by the sender; the kernel mints a send right
    /// from it for the receiver. `task` is copied, so the sender keeps its own task port.
    pub const fn new(destination: PortName, reply: PortName, task: PortName) -> Self {
        Self {
            header: MsgHeader {
                bits: msgh_bits(Disposition::CopySend, Disposition::MakeSend)
                    | MsghFlags::COMPLEX.bits(),
                size: HELLO_SIZE as u32,
                remote_port: destination,
                local_port: reply,
                voucher_port: PORT_NULL,
                id: 0,
            },
            body: MsgBody { descriptor_count: 1 },
            descriptor: PortDescriptor::new(task, Disposition::CopySend),
        }
    }

    /// Serialises the message to its exact wire image.
    pub fn to_le_bytes(&self) -> [u8; HELLO_SIZE] {
        let mut buf = [0_u8; HELLO_SIZE];
        buf[..BODY_OFFSET].copy_from_slice(&self.header.to_le_bytes());
        buf[BODY_OFFSET..DESCRIPTOR_OFFSET].copy_from_slice(&self.body.to_le_bytes());
        buf[DESCRIPTOR_OFFSET..].copy_from_slice(&self.descriptor.to_le_bytes());
        buf
    }
}

/// Header bits a receiver observes for a well-formed hello message.
pub const fn received_bits() -> u32 {
    msgh_bits(Disposition::MoveSend, Disposition::MoveSend) | MsghFlags::COMPLEX.bits()
}

/// What the receiver knows before looking at the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelloExpectations {
    /// Receive right the message was dequeued from.
    pub local_port: PortName,
    /// Whether an audit trailer was requested and must be present.
    pub audit_trailer: bool,
}

/// Header or trailer field checked against a fixed expectation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HelloField {
    /// `msgh_bits`.
    Bits,
    /// `msgh_local_port`.
    LocalPort,
    /// `msgh_seqno` of the trailer.
    Seqno,
}

impl fmt::Display for HelloField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bits => "msgh_bits",
            Self::LocalPort => "msgh_local_port",
            Self::Seqno => "msgh_seqno",
        })
    }
}

/// Non-fatal disagreement between a field and its expected constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldMismatch {
    /// Field that disagrees.
    pub field: HelloField,
    /// Expected value.
    pub expected: u32,
    /// Received value.
    pub actual: u32,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is {:#x} (expected {:#x})", self.field, self.actual, self.expected)
    }
}

/// Structural violations; decoding stops at the first one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer is shorter than the part being read.
    Truncated {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// `msgh_size` differs from [`HELLO_SIZE`].
    Size {
        /// Expected size.
        expected: u32,
        /// Received size.
        actual: u32,
    },
    /// Descriptor count differs from one.
    DescriptorCount(u32),
    /// Descriptor is not a port descriptor.
    DescriptorType(u8),
    /// Descriptor disposition differs from `MOVE_SEND`.
    Disposition(u8),
    /// The reply port arrived as `MACH_PORT_NULL`; nothing could answer the sender.
    NullReplyPort,
    /// The descriptor carried `MACH_PORT_NULL` instead of a task port.
    NullTaskPort,
    /// Trailer type is not format 0.
    TrailerType(u32),
    /// Trailer size is not that of an audit trailer.
    TrailerSize(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "message truncated: need {needed} bytes, have {available}")
            }
            Self::Size { expected, actual } => {
                write!(f, "msgh_size is {actual} (expected {expected})")
            }
            Self::DescriptorCount(count) => write!(f, "descriptor count is {count} (expected 1)"),
            Self::DescriptorType(ty) => write!(f, "descriptor type is {ty} (expected port)"),
            Self::Disposition(raw) => {
                let expected = Disposition::MoveSend.raw();
                write!(f, "descriptor disposition is {raw} (expected {expected})")
            }
            Self::NullReplyPort => f.write_str("reply port is MACH_PORT_NULL"),
            Self::NullTaskPort => f.write_str("task port descriptor is MACH_PORT_NULL"),
            Self::TrailerType(ty) => write!(f, "trailer type is {ty} (expected format 0)"),
            Self::TrailerSize(size) => {
                write!(f, "trailer size is {size} (expected {AUDIT_TRAILER_SIZE})")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Hello message as received and structurally verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceivedHello {
    /// Received header (ports already swapped by the kernel).
    pub header: MsgHeader,
    /// Received body.
    pub body: MsgBody,
    /// Received port descriptor.
    pub descriptor: PortDescriptor,
    /// Audit trailer, present when it was requested.
    pub trailer: Option<AuditTrailer>,
}

impl ReceivedHello {
    /// Send right to the sender's receive port.
    pub const fn reply_port(&self) -> PortName {
        self.header.remote_port
    }

    /// Send right to the sender's task.
    pub const fn task_port(&self) -> PortName {
        self.descriptor.name
    }

    /// Authenticated sender identity, if a trailer was requested.
    pub fn identity(&self) -> Option<IdentityRecord> {
        self.trailer.map(|trailer| trailer.audit.identity())
    }
}

fn require(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated { needed, available: bytes.len() });
    }
    Ok(())
}

/// Decodes and verifies a received hello message.
///
/// Structural problems return an error before any dependent field is read. Field mismatches
/// are passed to `report` and decoding carries on.
pub fn decode_received<F>(
    bytes: &[u8],
    expect: &HelloExpectations,
    mut report: F,
) -> Result<ReceivedHello, DecodeError>
where
    F: FnMut(FieldMismatch),
{
    let header = MsgHeader::parse(bytes).ok_or(DecodeError::Truncated {
        needed: HEADER_SIZE,
        available: bytes.len(),
    })?;
    if header.size != HELLO_SIZE as u32 {
        return Err(DecodeError::Size { expected: HELLO_SIZE as u32, actual: header.size });
    }
    require(bytes, HELLO_SIZE)?;

    let body = MsgBody { descriptor_count: le_u32(bytes, BODY_OFFSET) };
    if body.descriptor_count != 1 {
        return Err(DecodeError::DescriptorCount(body.descriptor_count));
    }
    let descriptor = PortDescriptor::parse(&bytes[DESCRIPTOR_OFFSET..HELLO_SIZE]).ok_or(
        DecodeError::Truncated { needed: HELLO_SIZE, available: bytes.len() },
    )?;
    if descriptor.ty != descriptor_type::PORT {
        return Err(DecodeError::DescriptorType(descriptor.ty));
    }
    if descriptor.disposition != Disposition::MoveSend.raw() {
        return Err(DecodeError::Disposition(descriptor.disposition));
    }

    if header.bits != received_bits() {
        report(FieldMismatch {
            field: HelloField::Bits,
            expected: received_bits(),
            actual: header.bits,
        });
    }
    if header.local_port != expect.local_port {
        report(FieldMismatch {
            field: HelloField::LocalPort,
            expected: expect.local_port,
            actual: header.local_port,
        });
    }
    if header.remote_port == PORT_NULL {
        return Err(DecodeError::NullReplyPort);
    }
    if descriptor.name == PORT_NULL {
        return Err(DecodeError::NullTaskPort);
    }

    let trailer = if expect.audit_trailer {
        let tail = &bytes[HELLO_SIZE..];
        require(tail, TRAILER_MIN_SIZE).map_err(|_| DecodeError::Truncated {
            needed: HELLO_SIZE + TRAILER_MIN_SIZE,
            available: bytes.len(),
        })?;
        let trailer_type = le_u32(tail, 0);
        if trailer_type != TRAILER_FORMAT_0 {
            return Err(DecodeError::TrailerType(trailer_type));
        }
        let trailer_size = le_u32(tail, 4);
        if trailer_size != AUDIT_TRAILER_SIZE as u32 {
            return Err(DecodeError::TrailerSize(trailer_size));
        }
        let trailer = AuditTrailer::parse(tail).ok_or(DecodeError::Truncated {
            needed: HELLO_RECEIVE_SIZE,
            available: bytes.len(),
        })?;
        if trailer.seqno != 0 {
            report(FieldMismatch { field: HelloField::Seqno, expected: 0, actual: trailer.seqno });
        }
        Some(trailer)
    } else {
        None
    };

    Ok(ReceivedHello { header, body, descriptor, trailer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trailer::AuditToken;

    const LOCAL: PortName = 0x0a03;
    const REPLY: PortName = 0x1b07;
    const TASK: PortName = 0x2c0b;

    const RECORD: IdentityRecord =
        IdentityRecord { auid: 501, euid: 501, egid: 20, ruid: 501, rgid: 20, pid: 77, asid: 9 };

    fn received_image() -> [u8; HELLO_RECEIVE_SIZE] {
        let mut message = HelloMessage::new(LOCAL, REPLY, TASK);
        message.header.bits = received_bits();
        message.header.remote_port = REPLY;
        message.header.local_port = LOCAL;
        message.descriptor.disposition = Disposition::MoveSend.raw();
        let mut buf = [0_u8; HELLO_RECEIVE_SIZE];
        buf[..HELLO_SIZE].copy_from_slice(&message.to_le_bytes());
        buf[HELLO_SIZE..]
            .copy_from_slice(&AuditTrailer::new(0, AuditToken::new(&RECORD, 0)).to_le_bytes());
        buf
    }

    fn expect() -> HelloExpectations {
        HelloExpectations { local_port: LOCAL, audit_trailer: true }
    }

    fn decode(bytes: &[u8]) -> (Result<ReceivedHello, DecodeError>, Vec<FieldMismatch>) {
        let mut found = Vec::new();
        let result = decode_received(bytes, &expect(), |m| found.push(m));
        (result, found)
    }

    #[test]
    fn hello_golden_vector() {
        const GOLDEN: [u8; HELLO_SIZE] = [
            0x13, 0x14, 0x00, 0x80, // bits(COPY_SEND, MAKE_SEND) | COMPLEX
            0x28, 0x00, 0x00, 0x00, // size 40
            0x03, 0x0a, 0x00, 0x00, // remote (destination)
            0x07, 0x1b, 0x00, 0x00, // local (reply)
            0x00, 0x00, 0x00, 0x00, // voucher
            0x00, 0x00, 0x00, 0x00, // id
            0x01, 0x00, 0x00, 0x00, // descriptor count
            0x0b, 0x2c, 0x00, 0x00, // task port
            0x00, 0x00, 0x00, 0x00, // pad1
            0x00, 0x00, 0x13, 0x00, // pad2, COPY_SEND, PORT
        ];
        let bytes = HelloMessage::new(LOCAL, REPLY, TASK).to_le_bytes();
        assert_eq!(bytes, GOLDEN, "golden vector out of date; expected bytes: {bytes:02x?}");
    }

    #[test]
    fn well_formed_message_decodes_cleanly() {
        let (result, found) = decode(&received_image());
        let hello = result.expect("decodes");
        assert!(found.is_empty(), "unexpected mismatches: {found:?}");
        assert_eq!(hello.reply_port(), REPLY);
        assert_eq!(hello.task_port(), TASK);
        assert_eq!(hello.identity(), Some(RECORD));
    }

    #[test]
    fn zero_descriptors_halt_before_descriptor() {
        let mut image = received_image();
        image[BODY_OFFSET..DESCRIPTOR_OFFSET].copy_from_slice(&0u32.to_le_bytes());
        // Garbage where the descriptor would be must never be looked at.
        image[DESCRIPTOR_OFFSET + 11] = 0xff;
        let (result, found) = decode(&image);
        assert_eq!(result, Err(DecodeError::DescriptorCount(0)));
        assert!(found.is_empty());
    }

    #[test]
    fn wrong_size_is_structural() {
        let mut image = received_image();
        image[4..8].copy_from_slice(&28u32.to_le_bytes());
        let (result, _) = decode(&image);
        assert_eq!(result, Err(DecodeError::Size { expected: 40, actual: 28 }));
    }

    #[test]
    fn raw_data_descriptor_is_rejected() {
        let mut image = received_image();
        image[DESCRIPTOR_OFFSET + 11] = descriptor_type::OOL;
        assert_eq!(decode(&image).0, Err(DecodeError::DescriptorType(descriptor_type::OOL)));
    }

    #[test]
    fn unexpected_disposition_is_rejected() {
        let mut image = received_image();
        image[DESCRIPTOR_OFFSET + 10] = Disposition::MoveSendOnce.raw();
        assert_eq!(decode(&image).0, Err(DecodeError::Disposition(18)));
    }

    #[test]
    fn null_ports_are_structural() {
        let mut image = received_image();
        image[0..4].copy_from_slice(&(MsghFlags::COMPLEX.bits() | 0x1100).to_le_bytes());
        image[8..12].copy_from_slice(&PORT_NULL.to_le_bytes());
        let (result, found) = decode(&image);
        assert_eq!(result, Err(DecodeError::NullReplyPort));
        assert_eq!(found.iter().map(|m| m.field).collect::<Vec<_>>(), [HelloField::Bits]);

        let mut image = received_image();
        image[DESCRIPTOR_OFFSET..DESCRIPTOR_OFFSET + 4].copy_from_slice(&PORT_NULL.to_le_bytes());
        let (result, found) = decode(&image);
        assert_eq!(result, Err(DecodeError::NullTaskPort));
        assert!(found.is_empty());
    }

    #[test]
    fn trailer_tags_are_checked() {
        let mut image = received_image();
        image[HELLO_SIZE + 4..HELLO_SIZE + 8].copy_from_slice(&8u32.to_le_bytes());
        assert_eq!(decode(&image).0, Err(DecodeError::TrailerSize(8)));

        let mut image = received_image();
        image[HELLO_SIZE..HELLO_SIZE + 4].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(decode(&image).0, Err(DecodeError::TrailerType(1)));
    }

    #[test]
    fn field_mismatches_are_reported_and_decoding_continues() {
        let mut image = received_image();
        let plain = msgh_bits(Disposition::MoveSend, Disposition::MoveSend);
        image[0..4].copy_from_slice(&plain.to_le_bytes());
        image[12..16].copy_from_slice(&0x9999u32.to_le_bytes());
        image[HELLO_SIZE + 8..HELLO_SIZE + 12].copy_from_slice(&4u32.to_le_bytes());
        let (result, found) = decode(&image);
        assert!(result.is_ok());
        let fields: Vec<HelloField> = found.iter().map(|m| m.field).collect();
        assert_eq!(fields, [HelloField::Bits, HelloField::LocalPort, HelloField::Seqno]);
        assert_eq!(found[1].actual, 0x9999);
    }

    #[test]
    fn trailer_is_optional_when_not_requested() {
        let image = received_image();
        let expect = HelloExpectations { local_port: LOCAL, audit_trailer: false };
        let hello = decode_received(&image[..HELLO_SIZE], &expect, |_| {}).expect("decodes");
        assert_eq!(hello.trailer, None);
        assert_eq!(hello.identity(), None);
    }

    #[test]
    fn short_buffer_is_truncated() {
        let image = received_image();
        assert_eq!(
            decode(&image[..HEADER_SIZE - 2]).0,
            Err(DecodeError::Truncated { needed: HEADER_SIZE, available: HEADER_SIZE - 2 })
        );
        assert_eq!(
            decode(&image[..HELLO_SIZE]).0,
            Err(DecodeError::Truncated {
                needed: HELLO_SIZE + TRAILER_MIN_SIZE,
                available: HELLO_SIZE
            })
        );
    }
}
