// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for Bitcoin hardware wallet communication
//!
//! This module provides the command / response objects used to talk to the
//! Bitcoin application on a ledger device, as well as the [frame] codec used
//! to carry APDUs over packet based transports.
//!
//! Requests and responses implement [encdec::Encode] and [encdec::DecodeOwned],
//! with requests providing headers via [ApduStatic] (and thus [ApduReq]).
//! Requests also implement [ApduParse] to recover header parameters, so the
//! same definitions are usable from both the host and (simulated) device sides.
//!
//! Unlike most of the application protocol, multi-byte integers in request
//! headers (derivation path elements, output indices, lock times) are
//! big-endian, while transaction fragments streamed to the device retain
//! their (little-endian) consensus encoding.
//!

#![no_std]

extern crate alloc;

use num_enum::TryFromPrimitive;

pub use ledger_proto::{ApduError, ApduHeader, ApduReq, ApduStatic, StatusCode};

pub mod firmware;
pub mod frame;
pub mod hash;
pub mod prelude;
pub mod public_key;
pub mod trusted_input;

mod helpers;

/// Bitcoin application APDU class
pub const BTC_APDU_CLA: u8 = 0xe0;

/// Maximum payload length for a single APDU
pub const MAX_APDU_DATA: usize = 255;

/// Maximum derivation path depth supported by the device
pub const MAX_PATH_DEPTH: usize = 10;

/// Bitcoin application instruction codes
#[derive(Copy, Clone, Debug, PartialEq, TryFromPrimitive, strum::Display)]
#[repr(u8)]
pub enum Instruction {
    /// Fetch a public key (and address / chain code) for a derivation path
    GetWalletPublicKey = 0x40,

    /// Stream a previous transaction to obtain a trusted input token
    GetTrustedInput = 0x42,

    /// Start (or continue) hashing the inputs of a transaction
    HashInputStart = 0x44,

    /// Sign the transaction hash accumulated on the device
    HashSign = 0x48,

    /// Stream transaction outputs to finalise the running hash
    HashInputFinalizeFull = 0x4a,

    /// Fetch firmware / application version
    GetFirmwareVersion = 0xc4,
}

/// Parse a request from header parameters and payload (device side).
///
/// [DecodeOwned][encdec::DecodeOwned] recovers the payload fields, parameters
/// carried in `P1` / `P2` are applied from the header.
pub trait ApduParse: Sized {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError>;
}

/// Check an APDU header matches the expected class and instruction
pub(crate) fn check_header<T: ApduStatic>(header: &ApduHeader) -> Result<(), ApduError> {
    if header.cla != T::CLA || header.ins != T::INS {
        return Err(ApduError::InvalidEncoding);
    }
    Ok(())
}

/// Decode a `P1` / `P2` flag, `set` and `clear` being the only valid values
pub(crate) fn param_flag(v: u8, set: u8, clear: u8) -> Result<bool, ApduError> {
    match v {
        v if v == set => Ok(true),
        v if v == clear => Ok(false),
        _ => Err(ApduError::InvalidEncoding),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use core::fmt::Debug;

    use encdec::{DecodeOwned, Encode};

    use super::*;

    /// Helper for response encode / decode tests
    pub fn encode_decode_apdu<A>(buff: &mut [u8], apdu: &A) -> usize
    where
        A: Encode<Error = ApduError> + DecodeOwned<Output = A, Error = ApduError> + PartialEq + Debug,
    {
        // Encode APDU
        let n = apdu.encode(buff).expect("encode failed");

        // Ensure encoded data fits maximum APDU payload
        assert!(
            n <= MAX_APDU_DATA,
            "encoded length {n} exceeds maximum APDU payload {MAX_APDU_DATA}"
        );

        // Check encoded length matches expected length
        let expected_n = apdu.encode_len().expect("get length failed");
        assert_eq!(n, expected_n, "encode length mismatch");

        // Decode APDU
        let (decoded, decoded_n) = A::decode_owned(&buff[..n]).expect("decode failed");

        // Check decoded object and length match
        assert_eq!(apdu, &decoded);
        assert_eq!(expected_n, decoded_n);

        n
    }

    /// Helper for request encode / parse tests
    pub fn encode_parse_apdu<A>(buff: &mut [u8], apdu: &A) -> usize
    where
        A: for<'a> ApduReq<'a> + ApduParse + PartialEq + Debug,
    {
        let n = apdu.encode(buff).expect("encode failed");
        assert!(n <= MAX_APDU_DATA);
        assert_eq!(n, apdu.encode_len().expect("get length failed"));

        let parsed = A::parse(&apdu.header(), &buff[..n]).expect("parse failed");
        assert_eq!(apdu, &parsed);

        n
    }
}
