// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trusted input APDUs
//!
//! A previous transaction is streamed to the device over a sequence of
//! [TrustedInputReq] commands, the final response carrying a device-issued
//! token binding one of its outputs.
//!
//! The first command carries the output index (big-endian) followed by the
//! transaction version and input count, subsequent commands carry each input,
//! then each output, in consensus encoding.

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use crate::{
    check_header, helpers::copy_raw, param_flag, ApduError, ApduHeader, ApduParse, ApduStatic, Instruction,
    BTC_APDU_CLA, MAX_APDU_DATA,
};

/// Length of a trusted input token
pub const TRUSTED_INPUT_LEN: usize = 56;

/// Magic byte prefixing trusted input tokens
pub const TRUSTED_INPUT_MAGIC: u8 = 0x32;

/// Trusted input request APDU, one chunk of the streamed previous transaction
///
/// `P1` is `0x00` for the first chunk and `0x80` for subsequent chunks.
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInputReq {
    /// Set for the first chunk of a transaction
    pub first: bool,
    /// Transaction fragment
    pub data: Vec<u8>,
}

impl TrustedInputReq {
    /// Create a new [TrustedInputReq] chunk
    pub fn new(first: bool, data: &[u8]) -> Self {
        Self {
            first,
            data: data.to_vec(),
        }
    }
}

impl ApduStatic for TrustedInputReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::GetTrustedInput as u8;

    fn p1(&self) -> u8 {
        match self.first {
            true => 0x00,
            false => 0x80,
        }
    }
}

impl Encode for TrustedInputReq {
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

/// Decodes the transaction fragment, the chunk position is carried in the header
impl DecodeOwned for TrustedInputReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }
        Ok((Self::new(true, buff), buff.len()))
    }
}

impl ApduParse for TrustedInputReq {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError> {
        check_header::<Self>(header)?;

        let (mut req, _n) = Self::decode_owned(data)?;
        req.first = param_flag(header.p1, 0x00, 0x80)?;

        Ok(req)
    }
}

/// Trusted input response APDU
///
/// Returned (non-empty) only in response to the final chunk.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     MAGIC     |     0x00      |            NONCE              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                   TXID (32-byte, internal order)              /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  OUTPUT_INDEX (u32, little-endian)            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                 AMOUNT (u64, little-endian)                   /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                        MAC (8-byte)                           /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInputResp {
    /// Opaque trusted input token
    pub token: [u8; TRUSTED_INPUT_LEN],
}

impl TrustedInputResp {
    /// Fetch the output index bound by this token
    pub fn output_index(&self) -> u32 {
        u32::from_le_bytes([self.token[36], self.token[37], self.token[38], self.token[39]])
    }
}

impl Encode for TrustedInputResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(TRUSTED_INPUT_LEN)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        copy_raw(&self.token, buff)
    }
}

impl DecodeOwned for TrustedInputResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() != TRUSTED_INPUT_LEN {
            return Err(ApduError::InvalidLength);
        }
        if buff[0] != TRUSTED_INPUT_MAGIC {
            return Err(ApduError::InvalidEncoding);
        }

        let mut token = [0u8; TRUSTED_INPUT_LEN];
        token.copy_from_slice(buff);

        Ok((Self { token }, TRUSTED_INPUT_LEN))
    }
}

#[cfg(test)]
mod test {
    use rand::random;

    use super::*;
    use crate::test::{encode_decode_apdu, encode_parse_apdu};

    #[test]
    fn trusted_input_req_apdu() {
        let data: [u8; 32] = random();

        for first in [true, false] {
            let apdu = TrustedInputReq::new(first, &data);

            let mut buff = [0u8; 256];
            encode_parse_apdu(&mut buff, &apdu);
        }
    }

    #[test]
    fn trusted_input_resp_apdu() {
        let mut token = [0u8; TRUSTED_INPUT_LEN];
        token[0] = TRUSTED_INPUT_MAGIC;
        token[36..40].copy_from_slice(&3u32.to_le_bytes());

        let apdu = TrustedInputResp { token };
        assert_eq!(apdu.output_index(), 3);

        let mut buff = [0u8; 256];
        encode_decode_apdu(&mut buff, &apdu);
    }

    #[test]
    fn trusted_input_resp_invalid() {
        assert!(matches!(
            TrustedInputResp::decode_owned(&[TRUSTED_INPUT_MAGIC; 12]),
            Err(ApduError::InvalidLength)
        ));
        assert!(matches!(
            TrustedInputResp::decode_owned(&[0u8; TRUSTED_INPUT_LEN]),
            Err(ApduError::InvalidEncoding)
        ));
    }
}
