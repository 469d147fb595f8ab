// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Frame codec for carrying APDUs over packet transports
//!
//! Messages (commands or responses) are split into fixed size packets,
//! each tagged with a channel identifier and sequence index so the receiver
//! can reassemble them from possibly padded transport reads.
//!
//! ## Packet encoding:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            CHANNEL            |      TAG      |   SEQUENCE    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   SEQUENCE    |  TOTAL_LENGTH (first packet)  |               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               +
//! /                    DATA (zero padded)                         /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A reassembled response carries a trailing big-endian status word,
//! see [split_status].

use alloc::vec::Vec;

use byteorder::{BigEndian, ByteOrder};

use crate::{ApduHeader, StatusCode, MAX_APDU_DATA};

/// Default channel identifier
pub const DEFAULT_CHANNEL: u16 = 0x0101;

/// Default transport packet size
pub const DEFAULT_PACKET_SIZE: usize = 64;

/// Tag marking APDU data packets
pub const TAG_APDU: u8 = 0x05;

/// Per-packet header length (channel, tag, sequence)
const PACKET_HEADER_LEN: usize = 5;

/// Additional header length for the first packet (total length)
const LENGTH_LEN: usize = 2;

/// APDU command header length (CLA, INS, P1, P2, LC)
pub const COMMAND_HEADER_LEN: usize = 5;

/// Frame encode / decode errors
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum::Display)]
pub enum FrameError {
    /// Packet size too small to carry data
    InvalidPacketSize,
    /// Message exceeds the maximum framed length
    MessageTooLong,
    /// APDU payload exceeds [MAX_APDU_DATA]
    PayloadTooLong,
    /// Packet shorter than the frame header
    ShortPacket,
    /// Packet received on an unexpected channel
    InvalidChannel(u16),
    /// Packet with an unexpected tag
    InvalidTag(u8),
    /// Out of order packet
    InvalidSequence { expected: u16, actual: u16 },
    /// Command length field does not match payload
    LengthMismatch,
    /// Response missing status word
    MissingStatus,
}

/// Frame codec, splits messages into transport-sized packets
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FrameCodec {
    channel: u16,
    packet_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL, DEFAULT_PACKET_SIZE)
    }
}

impl FrameCodec {
    /// Create a new codec with the provided channel and packet size
    pub const fn new(channel: u16, packet_size: usize) -> Self {
        Self {
            channel,
            packet_size,
        }
    }

    /// Fetch the configured channel identifier
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Fetch the configured packet size
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Encode an APDU command (header and payload) into packets
    pub fn encode_command(
        &self,
        header: &ApduHeader,
        payload: &[u8],
    ) -> Result<Vec<Vec<u8>>, FrameError> {
        if payload.len() > MAX_APDU_DATA {
            return Err(FrameError::PayloadTooLong);
        }

        let mut msg = Vec::with_capacity(COMMAND_HEADER_LEN + payload.len());
        msg.extend_from_slice(&[
            header.cla,
            header.ins,
            header.p1,
            header.p2,
            payload.len() as u8,
        ]);
        msg.extend_from_slice(payload);

        self.frame(&msg)
    }

    /// Encode a response (payload and status word) into packets
    pub fn encode_response(&self, payload: &[u8], status: u16) -> Result<Vec<Vec<u8>>, FrameError> {
        let mut msg = Vec::with_capacity(payload.len() + 2);
        msg.extend_from_slice(payload);
        msg.extend_from_slice(&status.to_be_bytes());

        self.frame(&msg)
    }

    /// Split an arbitrary message into packets
    pub fn frame(&self, msg: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        if self.packet_size <= PACKET_HEADER_LEN + LENGTH_LEN {
            return Err(FrameError::InvalidPacketSize);
        }
        if msg.len() > u16::MAX as usize {
            return Err(FrameError::MessageTooLong);
        }

        let mut packets = Vec::new();
        let mut index = 0;
        let mut seq = 0u16;

        loop {
            let mut p = alloc::vec![0u8; self.packet_size];

            BigEndian::write_u16(&mut p[0..], self.channel);
            p[2] = TAG_APDU;
            BigEndian::write_u16(&mut p[3..], seq);

            let mut offset = PACKET_HEADER_LEN;
            if seq == 0 {
                BigEndian::write_u16(&mut p[offset..], msg.len() as u16);
                offset += LENGTH_LEN;
            }

            let n = (self.packet_size - offset).min(msg.len() - index);
            p[offset..][..n].copy_from_slice(&msg[index..][..n]);
            index += n;

            packets.push(p);
            seq += 1;

            if index >= msg.len() {
                break;
            }
        }

        Ok(packets)
    }

    /// Create a decoder for reassembling a message on this codec's channel
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder {
            channel: self.channel,
            seq: 0,
            expected: 0,
            buff: Vec::new(),
        }
    }
}

/// Reassembles messages from a sequence of packets
#[derive(Clone, PartialEq, Debug)]
pub struct FrameDecoder {
    channel: u16,
    seq: u16,
    expected: usize,
    buff: Vec<u8>,
}

impl FrameDecoder {
    /// Push a packet, returning the reassembled message once complete
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        if packet.len() < PACKET_HEADER_LEN {
            return Err(FrameError::ShortPacket);
        }

        let channel = BigEndian::read_u16(&packet[0..]);
        if channel != self.channel {
            return Err(FrameError::InvalidChannel(channel));
        }

        if packet[2] != TAG_APDU {
            return Err(FrameError::InvalidTag(packet[2]));
        }

        let seq = BigEndian::read_u16(&packet[3..]);
        if seq != self.seq {
            let expected = self.seq;
            self.reset();
            return Err(FrameError::InvalidSequence {
                expected,
                actual: seq,
            });
        }

        let mut data = &packet[PACKET_HEADER_LEN..];

        // First packet carries the total message length
        if seq == 0 {
            if data.len() < LENGTH_LEN {
                return Err(FrameError::ShortPacket);
            }
            self.expected = BigEndian::read_u16(data) as usize;
            self.buff = Vec::with_capacity(self.expected);
            data = &data[LENGTH_LEN..];
        }

        // Drop padding beyond the declared length
        let n = data.len().min(self.expected - self.buff.len());
        self.buff.extend_from_slice(&data[..n]);
        self.seq = self.seq.wrapping_add(1);

        if self.buff.len() < self.expected {
            return Ok(None);
        }

        let msg = core::mem::take(&mut self.buff);
        self.reset();

        Ok(Some(msg))
    }

    /// Reset decoder state
    pub fn reset(&mut self) {
        self.seq = 0;
        self.expected = 0;
        self.buff.clear();
    }
}

/// Split a reassembled response into payload and status word
pub fn split_status(mut msg: Vec<u8>) -> Result<(Vec<u8>, u16), FrameError> {
    if msg.len() < 2 {
        return Err(FrameError::MissingStatus);
    }

    let status = BigEndian::read_u16(&msg[msg.len() - 2..]);
    msg.truncate(msg.len() - 2);

    Ok((msg, status))
}

/// Parse a reassembled command into header and payload (device side)
pub fn parse_command(msg: &[u8]) -> Result<(ApduHeader, &[u8]), FrameError> {
    if msg.len() < COMMAND_HEADER_LEN {
        return Err(FrameError::ShortPacket);
    }

    let header = ApduHeader {
        cla: msg[0],
        ins: msg[1],
        p1: msg[2],
        p2: msg[3],
    };

    let data = &msg[COMMAND_HEADER_LEN..];
    if data.len() != msg[4] as usize {
        return Err(FrameError::LengthMismatch);
    }

    Ok((header, data))
}

/// Check whether a status word indicates success
pub fn is_ok(status: u16) -> bool {
    matches!(StatusCode::try_from(status), Ok(StatusCode::Ok))
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use super::*;

    fn reassemble(codec: &FrameCodec, packets: &[Vec<u8>]) -> Vec<u8> {
        let mut d = codec.decoder();
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(p.len(), codec.packet_size());

            match d.push(p).expect("decode failed") {
                Some(m) => {
                    assert_eq!(i, packets.len() - 1, "message completed early");
                    return m;
                }
                None => assert!(i < packets.len() - 1, "message incomplete"),
            }
        }
        panic!("no message reassembled");
    }

    #[test]
    fn response_round_trip() {
        let codec = FrameCodec::default();

        // Single, double, and many packet responses
        for (len, packets) in [(10, 1), (80, 2), (1000, 18)] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();

            let p = codec.encode_response(&payload, 0x9000).unwrap();
            assert_eq!(p.len(), packets, "unexpected packet count for {len} bytes");

            let msg = reassemble(&codec, &p);
            let (data, status) = split_status(msg).unwrap();

            assert_eq!(data, payload);
            assert_eq!(status, 0x9000);
        }
    }

    #[test]
    fn command_round_trip() {
        let codec = FrameCodec::default();
        let header = ApduHeader {
            cla: 0xe0,
            ins: 0x44,
            p1: 0x80,
            p2: 0x00,
        };
        let payload = [0xab; MAX_APDU_DATA];

        let p = codec.encode_command(&header, &payload).unwrap();
        assert_eq!(p.len(), 5);

        let msg = reassemble(&codec, &p);
        let (h, data) = parse_command(&msg).unwrap();

        assert_eq!((h.cla, h.ins, h.p1, h.p2), (0xe0, 0x44, 0x80, 0x00));
        assert_eq!(data, &payload[..]);
    }

    #[test]
    fn first_packet_layout() {
        let codec = FrameCodec::default();
        let p = codec.encode_response(&[], 0x6985).unwrap();

        assert_eq!(p.len(), 1);
        assert_eq!(&p[0][..9], &[0x01, 0x01, 0x05, 0x00, 0x00, 0x00, 0x02, 0x69, 0x85]);
        assert!(p[0][9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_payload_rejected() {
        let codec = FrameCodec::default();
        let header = ApduHeader {
            cla: 0xe0,
            ins: 0x44,
            p1: 0x00,
            p2: 0x00,
        };
        let r = codec.encode_command(&header, &[0u8; MAX_APDU_DATA + 1]);
        assert_eq!(r, Err(FrameError::PayloadTooLong));
    }

    #[test]
    fn malformed_packets_rejected() {
        let codec = FrameCodec::default();
        let p = codec.encode_response(&[0u8; 100], 0x9000).unwrap();

        // Wrong channel
        let mut bad = p[0].clone();
        bad[1] = 0x02;
        assert_eq!(
            codec.decoder().push(&bad),
            Err(FrameError::InvalidChannel(0x0102))
        );

        // Wrong tag
        let mut bad = p[0].clone();
        bad[2] = 0x02;
        assert_eq!(codec.decoder().push(&bad), Err(FrameError::InvalidTag(0x02)));

        // Skipped packet
        let mut d = codec.decoder();
        assert_eq!(d.push(&p[0]), Ok(None));
        assert_eq!(
            d.push(&vec![0x01, 0x01, 0x05, 0x00, 0x02]),
            Err(FrameError::InvalidSequence {
                expected: 1,
                actual: 2
            })
        );

        // Truncated
        assert_eq!(codec.decoder().push(&[0x01, 0x01]), Err(FrameError::ShortPacket));
    }

    #[test]
    fn missing_status() {
        assert_eq!(split_status(vec![0x90]), Err(FrameError::MissingStatus));
    }

    #[test]
    fn success_status() {
        assert!(is_ok(0x9000));
        assert!(!is_ok(0x6985));
        assert!(!is_ok(0x1234));
    }
}
