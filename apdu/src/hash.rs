// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction hashing and signing APDUs
//!
//! Signing a transaction input is executed as a sequence of:
//! - [HashInputStartReq] chunks, streaming the transaction version and inputs
//! - [HashFinalizeReq] chunks, streaming the transaction outputs
//! - a [HashSignReq], returning a [HashSignResp] signature
//!
//! The device retains the running hash between these commands.

use alloc::vec::Vec;

use byteorder::{BigEndian, ByteOrder};
use encdec::{DecodeOwned, Encode};
use num_enum::TryFromPrimitive;

use crate::{
    check_header,
    helpers::{copy_raw, path},
    param_flag, ApduError, ApduHeader, ApduParse, ApduStatic, Instruction, BTC_APDU_CLA, MAX_APDU_DATA,
};

/// Hashing mode, provided in `P2` of [HashInputStartReq]
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive, strum::Display)]
#[repr(u8)]
pub enum HashMode {
    /// Begin hashing a new (legacy) transaction
    NewLegacy = 0x00,
    /// Begin hashing a new segwit transaction
    NewSegwit = 0x02,
    /// Continue hashing the current transaction
    Continue = 0x80,
}

impl HashMode {
    /// Select the mode for a hashing pass
    pub fn select(new: bool, segwit: bool) -> Self {
        match (new, segwit) {
            (true, false) => HashMode::NewLegacy,
            (true, true) => HashMode::NewSegwit,
            (false, _) => HashMode::Continue,
        }
    }
}

/// Input reference kind, prefixing each input streamed in a hashing pass
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive, strum::Display)]
#[repr(u8)]
pub enum InputKind {
    /// Raw outpoint (txid, index)
    Untrusted = 0x00,
    /// Length-prefixed trusted input token
    Trusted = 0x01,
    /// Raw outpoint followed by the spent amount
    Witness = 0x02,
}

/// Hash input start request APDU, one chunk of a hashing pass
///
/// `P1` is `0x00` for the first chunk and `0x80` for subsequent chunks,
/// `P2` is the [HashMode].
#[derive(Clone, PartialEq, Debug)]
pub struct HashInputStartReq {
    /// Set for the first chunk of a pass
    pub first: bool,
    /// Hashing mode
    pub mode: HashMode,
    /// Transaction fragment
    pub data: Vec<u8>,
}

impl HashInputStartReq {
    /// Create a new [HashInputStartReq] chunk
    pub fn new(first: bool, mode: HashMode, data: &[u8]) -> Self {
        Self {
            first,
            mode,
            data: data.to_vec(),
        }
    }
}

impl ApduStatic for HashInputStartReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::HashInputStart as u8;

    fn p1(&self) -> u8 {
        match self.first {
            true => 0x00,
            false => 0x80,
        }
    }

    fn p2(&self) -> u8 {
        self.mode as u8
    }
}

impl Encode for HashInputStartReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        if self.data.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        self.encode_len()?;
        copy_raw(&self.data, buff)
    }
}

/// Decodes the transaction fragment, chunk position and mode are carried in the header
impl DecodeOwned for HashInputStartReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }
        Ok((Self::new(true, HashMode::NewLegacy, buff), buff.len()))
    }
}

impl ApduParse for HashInputStartReq {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError> {
        check_header::<Self>(header)?;

        let (mut req, _n) = Self::decode_owned(data)?;
        req.first = param_flag(header.p1, 0x00, 0x80)?;
        req.mode = HashMode::try_from(header.p2).map_err(|_| ApduError::InvalidEncoding)?;

        Ok(req)
    }
}

/// Hash input finalize request APDU, one chunk of the streamed outputs
///
/// `P1` is `0x80` for the last chunk and `0x00` otherwise.
#[derive(Clone, PartialEq, Debug)]
pub struct HashFinalizeReq {
    /// Set for the last chunk
    pub last: bool,
    /// Output fragment
    pub data: Vec<u8>,
}

impl HashFinalizeReq {
    /// Create a new [HashFinalizeReq] chunk
    pub fn new(last: bool, data: &[u8]) -> Self {
        Self {
            last,
            data: data.to_vec(),
        }
    }
}

impl ApduStatic for HashFinalizeReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::HashInputFinalizeFull as u8;

    fn p1(&self) -> u8 {
        match self.last {
            true => 0x80,
            false => 0x00,
        }
    }
}

impl Encode for HashFinalizeReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        if self.data.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        self.encode_len()?;
        copy_raw(&self.data, buff)
    }
}

impl DecodeOwned for HashFinalizeReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }
        Ok((Self::new(false, buff), buff.len()))
    }
}

impl ApduParse for HashFinalizeReq {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError> {
        check_header::<Self>(header)?;

        let (mut req, _n) = Self::decode_owned(data)?;
        req.last = param_flag(header.p1, 0x80, 0x00)?;

        Ok(req)
    }
}

/// Hash input finalize response APDU
///
/// Empty for intermediate chunks, the final chunk returns user
/// validation information which is not interpreted here.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct HashFinalizeResp {
    pub validation: Vec<u8>,
}

impl Encode for HashFinalizeResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(self.validation.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        copy_raw(&self.validation, buff)
    }
}

impl DecodeOwned for HashFinalizeResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((
            Self {
                validation: buff.to_vec(),
            },
            buff.len(),
        ))
    }
}

/// Hash sign request APDU, signs the transaction hash accumulated on the device
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   PATH_LEN    |          PATH[0..N] (u32, big-endian)         /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  USER_CODE=0  |        LOCK_TIME (u32, big-endian)            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   LOCK_TIME   | SIGHASH_TYPE  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct HashSignReq {
    /// Derivation path of the signing key
    pub path: Vec<u32>,
    /// Transaction lock time
    pub lock_time: u32,
    /// Signature hash type
    pub sighash: u8,
}

impl HashSignReq {
    /// Create a new [HashSignReq] APDU
    pub fn new(path: &[u32], lock_time: u32, sighash: u8) -> Self {
        Self {
            path: path.to_vec(),
            lock_time,
            sighash,
        }
    }
}

impl ApduStatic for HashSignReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::HashSign as u8;
}

impl Encode for HashSignReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(path::enc_len(&self.path)? + 1 + 4 + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        let mut index = path::enc(&self.path, buff)?;

        // No user validation code
        buff[index] = 0x00;
        index += 1;

        BigEndian::write_u32(&mut buff[index..], self.lock_time);
        index += 4;

        buff[index] = self.sighash;
        index += 1;

        Ok(index)
    }
}

impl DecodeOwned for HashSignReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(data: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, mut index) = path::dec(data)?;

        // Skip user validation code
        let code_len = *data.get(index).ok_or(ApduError::InvalidLength)? as usize;
        index += 1 + code_len;

        if data.len() != index + 5 {
            return Err(ApduError::InvalidLength);
        }

        let lock_time = BigEndian::read_u32(&data[index..]);
        let sighash = data[index + 4];

        Ok((
            Self {
                path,
                lock_time,
                sighash,
            },
            data.len(),
        ))
    }
}

impl ApduParse for HashSignReq {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError> {
        check_header::<Self>(header)?;
        let (req, _n) = Self::decode_owned(data)?;
        Ok(req)
    }
}

/// Hash sign response APDU
///
/// DER encoded signature, optionally followed by the sighash type. Devices
/// may report the parity of `R` in the first byte (`0x31`), this is
/// normalised to the DER sequence tag on decode.
#[derive(Clone, PartialEq, Debug)]
pub struct HashSignResp {
    /// DER encoded signature
    pub signature: Vec<u8>,
    /// Trailing sighash type, if provided
    pub sighash: Option<u8>,
}

/// DER sequence tag
const DER_SEQUENCE: u8 = 0x30;

impl Encode for HashSignResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(self.signature.len() + self.sighash.map(|_| 1).unwrap_or(0))
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        let mut index = copy_raw(&self.signature, buff)?;
        if let Some(s) = self.sighash {
            buff[index] = s;
            index += 1;
        }

        Ok(index)
    }
}

impl DecodeOwned for HashSignResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let mut signature = buff.to_vec();

        // Clear parity marker
        if signature[0] & 0xfe == DER_SEQUENCE {
            signature[0] = DER_SEQUENCE;
        } else {
            return Err(ApduError::InvalidEncoding);
        }

        // Strip sighash if present
        let der_len = signature[1] as usize + 2;
        let sighash = match signature.len() {
            n if n == der_len => None,
            n if n == der_len + 1 => signature.pop(),
            _ => return Err(ApduError::InvalidLength),
        };

        Ok((Self { signature, sighash }, buff.len()))
    }
}
