//! Wire Protocol
//!
//! Framing for the request/acknowledge exchange. Two wire profiles exist:
//!
//! - **raw**: the full 8-byte header is the whole IP payload
//!   (`group | seq | type | pad`), carried over a custom IP protocol number.
//! - **udp**: only the 2-byte sequence number travels in-band. The group is
//!   whatever multicast membership the socket holds, and the message kind is
//!   implied by the port the datagram arrived on.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Size of the full raw-profile header
pub const HEADER_SIZE: usize = 8;

/// Size of the in-band part of a udp-profile frame
pub const SEQ_ONLY_SIZE: usize = 2;

/// Opaque application bytes appended to udp-profile ACKs
pub const ACK_TRAILER: &[u8] = b"ACK";

/// Smallest legal IPv4 header
const MIN_IPV4_HEADER: usize = 20;

/// Message type carried in the header's type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Ack,
}

impl MessageKind {
    /// Wire value of the type byte
    pub fn wire_value(self) -> u8 {
        match self {
            MessageKind::Request => 0,
            MessageKind::Ack => 1,
        }
    }

    /// Parse a type byte; anything other than 0 or 1 is rejected
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageKind::Request),
            1 => Some(MessageKind::Ack),
            _ => None,
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(self) -> &'static str {
        match self {
            MessageKind::Request => "REQ",
            MessageKind::Ack => "ACK",
        }
    }
}

/// A decoded protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    /// Multicast group scoping the round
    pub group: Ipv4Addr,
    /// Round sequence number
    pub seq: u16,
    /// Request or acknowledgment
    pub kind: MessageKind,
}

impl Message {
    pub fn request(group: Ipv4Addr, seq: u16) -> Self {
        Self { group, seq, kind: MessageKind::Request }
    }

    pub fn ack(group: Ipv4Addr, seq: u16) -> Self {
        Self { group, seq, kind: MessageKind::Ack }
    }

    /// Build the acknowledgment answering this message
    pub fn ack_reply(&self) -> Self {
        Self::ack(self.group, self.seq)
    }

    /// Whether this message belongs to the round identified by (group, seq)
    pub fn is_for_round(&self, group: Ipv4Addr, seq: u16) -> bool {
        self.group == group && self.seq == seq
    }
}

/// Encode the full 8-byte header
pub fn encode_header(message: &Message) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    let mut buf = &mut bytes[..];
    buf.put_slice(&message.group.octets());
    buf.put_u16(message.seq);
    buf.put_u8(message.kind.wire_value());
    buf.put_u8(0);
    bytes
}

/// Decode the full 8-byte header. Trailing bytes are ignored; the pad byte is
/// not checked.
pub fn decode_header(bytes: &[u8]) -> Option<Message> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }

    let mut buf = bytes;
    let group = Ipv4Addr::from(buf.get_u32());
    let seq = buf.get_u16();
    let kind = MessageKind::from_wire(buf.get_u8())?;

    Some(Message { group, seq, kind })
}

/// Remove a leading IPv4 header if one is present.
///
/// Raw sockets on some kernels hand back the IP header along with the
/// payload, others do not. The input is returned untouched unless the first
/// byte announces version 4 and an IHL between 20 bytes and the buffer length.
pub fn strip_ipv4_header(packet: &[u8]) -> &[u8] {
    let Some(&first) = packet.first() else {
        return packet;
    };

    if first >> 4 != 4 {
        return packet;
    }

    let ihl = usize::from(first & 0x0f) * 4;
    if (MIN_IPV4_HEADER..=packet.len()).contains(&ihl) {
        &packet[ihl..]
    } else {
        packet
    }
}

/// Wire profile selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProfile {
    /// Custom IP protocol number, full header in-band
    Raw,
    /// UDP multicast/unicast, sequence number only
    Udp,
}

impl WireProfile {
    pub fn name(self) -> &'static str {
        match self {
            WireProfile::Raw => "raw",
            WireProfile::Udp => "udp",
        }
    }
}

impl std::str::FromStr for WireProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(WireProfile::Raw),
            "udp" => Ok(WireProfile::Udp),
            other => Err(format!("unknown wire profile '{}' (expected raw or udp)", other)),
        }
    }
}

/// Frame codec for one engine's binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCodec {
    /// Full header, group and type carried in-band
    Full,
    /// Sequence number only. `group` and `inbound` describe what the
    /// receiving socket is bound to, since neither is on the wire.
    SeqOnly { group: Ipv4Addr, inbound: MessageKind },
}

impl FrameCodec {
    /// Codec for a profile. `inbound` is the kind of message the engine expects
    /// to receive; only the udp profile needs it.
    pub fn for_profile(profile: WireProfile, group: Ipv4Addr, inbound: MessageKind) -> Self {
        match profile {
            WireProfile::Raw => FrameCodec::Full,
            WireProfile::Udp => FrameCodec::SeqOnly { group, inbound },
        }
    }

    pub fn profile(&self) -> WireProfile {
        match self {
            FrameCodec::Full => WireProfile::Raw,
            FrameCodec::SeqOnly { .. } => WireProfile::Udp,
        }
    }

    /// Serialize a message for the wire
    pub fn encode(&self, message: &Message) -> Vec<u8> {
        match self {
            FrameCodec::Full => encode_header(message).to_vec(),
            FrameCodec::SeqOnly { .. } => {
                let mut buf = Vec::with_capacity(SEQ_ONLY_SIZE + ACK_TRAILER.len());
                buf.put_u16(message.seq);
                if message.kind == MessageKind::Ack {
                    buf.put_slice(ACK_TRAILER);
                }
                buf
            }
        }
    }

    /// Deserialize a frame. Returns `None` for anything malformed.
    pub fn decode(&self, bytes: &[u8]) -> Option<Message> {
        match *self {
            FrameCodec::Full => decode_header(bytes),
            FrameCodec::SeqOnly { group, inbound } => {
                if bytes.len() < SEQ_ONLY_SIZE {
                    return None;
                }
                let seq = (&bytes[..SEQ_ONLY_SIZE]).get_u16();
                Some(Message { group, seq, kind: inbound })
            }
        }
    }

    /// Decode a payload exactly as the transport delivered it. Raw sockets may
    /// include the IPv4 header, so the full codec strips it first.
    pub fn read_datagram(&self, payload: &[u8]) -> Option<Message> {
        match self {
            FrameCodec::Full => self.decode(strip_ipv4_header(payload)),
            FrameCodec::SeqOnly { .. } => self.decode(payload),
        }
    }
}

/// Hex dump of the first `limit` bytes, one space between bytes, for trace logging
pub fn hexdump(bytes: &[u8], limit: usize) -> String {
    let encoded = hex::encode(&bytes[..limit.min(bytes.len())]);
    encoded
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);

    fn ipv4_header(ihl_words: u8) -> Vec<u8> {
        let mut hdr = vec![0u8; usize::from(ihl_words) * 4];
        hdr[0] = 0x40 | ihl_words;
        hdr[9] = 253;
        hdr
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode_header(&Message::request(GROUP, 42));
        assert_eq!(bytes, [239, 1, 1, 1, 0x00, 0x2a, 0, 0]);

        let bytes = encode_header(&Message::ack(GROUP, 0xbeef));
        assert_eq!(bytes, [239, 1, 1, 1, 0xbe, 0xef, 1, 0]);
    }

    #[test]
    fn test_header_round_trip() {
        for kind in [MessageKind::Request, MessageKind::Ack] {
            for seq in [0u16, 1, 42, u16::MAX] {
                let msg = Message { group: Ipv4Addr::new(224, 0, 0, 251), seq, kind };
                assert_eq!(decode_header(&encode_header(&msg)), Some(msg));
            }
        }
    }

    #[test]
    fn test_decode_rejects_short_and_bad_type() {
        let full = encode_header(&Message::ack(GROUP, 7));
        for len in 0..HEADER_SIZE {
            assert_eq!(decode_header(&full[..len]), None);
        }

        let mut bad = full;
        bad[6] = 2;
        assert_eq!(decode_header(&bad), None);
        bad[6] = 0xff;
        assert_eq!(decode_header(&bad), None);
    }

    #[test]
    fn test_decode_ignores_pad_and_trailer() {
        let mut bytes = encode_header(&Message::ack(GROUP, 9)).to_vec();
        bytes[7] = 0x5a;
        bytes.extend_from_slice(b"extra");
        assert_eq!(decode_header(&bytes), Some(Message::ack(GROUP, 9)));
    }

    #[test]
    fn test_strip_ipv4_header() {
        let payload = encode_header(&Message::request(GROUP, 42));

        let mut packet = ipv4_header(5);
        packet.extend_from_slice(&payload);
        assert_eq!(strip_ipv4_header(&packet), &payload[..]);

        // IHL with options
        let mut packet = ipv4_header(6);
        packet.extend_from_slice(&payload);
        assert_eq!(strip_ipv4_header(&packet), &payload[..]);

        // Header that fills the whole buffer leaves nothing behind
        let packet = ipv4_header(5);
        assert!(strip_ipv4_header(&packet).is_empty());
    }

    #[test]
    fn test_strip_leaves_non_ip_input_alone() {
        // A bare header starting with 239 (0xef) is not version 4
        let payload = encode_header(&Message::request(GROUP, 42));
        assert_eq!(strip_ipv4_header(&payload), &payload[..]);

        // Version 4 but IHL below the minimum
        let packet = [0x44u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2];
        assert_eq!(strip_ipv4_header(&packet), &packet[..]);

        // Version 4, IHL longer than the buffer
        let packet = [0x4fu8; 24];
        assert_eq!(strip_ipv4_header(&packet), &packet[..]);

        assert!(strip_ipv4_header(&[]).is_empty());
    }

    #[test]
    fn test_full_codec_reads_with_and_without_ip_header() {
        let codec = FrameCodec::Full;
        let msg = Message::ack(GROUP, 42);
        let payload = codec.encode(&msg);
        assert_eq!(payload.len(), HEADER_SIZE);
        assert_eq!(codec.read_datagram(&payload), Some(msg));

        let mut packet = ipv4_header(5);
        packet.extend_from_slice(&payload);
        assert_eq!(codec.read_datagram(&packet), Some(msg));

        // An IP header followed by a truncated frame is rejected
        let mut packet = ipv4_header(5);
        packet.extend_from_slice(&payload[..5]);
        assert_eq!(codec.read_datagram(&packet), None);
    }

    #[test]
    fn test_seq_only_codec() {
        let codec = FrameCodec::for_profile(WireProfile::Udp, GROUP, MessageKind::Request);
        assert_eq!(codec.profile(), WireProfile::Udp);

        let req = codec.encode(&Message::request(GROUP, 42));
        assert_eq!(req, vec![0x00, 0x2a]);
        assert_eq!(codec.decode(&req), Some(Message::request(GROUP, 42)));

        let ack = codec.encode(&Message::ack(GROUP, 42));
        assert_eq!(ack, b"\x00\x2aACK".to_vec());

        assert_eq!(codec.decode(&[0x01]), None);
        assert_eq!(codec.decode(&[]), None);
    }

    #[test]
    fn test_seq_only_implies_group_and_kind() {
        let leader_side = FrameCodec::for_profile(WireProfile::Udp, GROUP, MessageKind::Ack);
        let decoded = leader_side.read_datagram(b"\x00\x2aACK").unwrap();
        assert_eq!(decoded, Message::ack(GROUP, 42));

        // No stripping in the udp profile: 0x45.. is just a sequence number
        let decoded = leader_side.read_datagram(&[0x45, 0x00]).unwrap();
        assert_eq!(decoded.seq, 0x4500);
    }

    #[test]
    fn test_wire_profile_parse() {
        assert_eq!("raw".parse::<WireProfile>().unwrap(), WireProfile::Raw);
        assert_eq!("UDP".parse::<WireProfile>().unwrap(), WireProfile::Udp);
        assert!("tcp".parse::<WireProfile>().is_err());
    }

    #[test]
    fn test_hexdump() {
        assert_eq!(hexdump(&[0xef, 0x01, 0x00], 32), "ef 01 00");
        assert_eq!(hexdump(&[1, 2, 3, 4], 2), "01 02");
        assert_eq!(hexdump(&[], 8), "");
    }
}
