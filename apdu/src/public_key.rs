// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wallet public key APDUs, for fetching public keys by derivation path

use alloc::{string::String, vec::Vec};

use encdec::{DecodeOwned, Encode};

use crate::{
    check_header,
    helpers::{bytes, path},
    param_flag,
    ApduError, ApduHeader, ApduParse, ApduStatic, Instruction, BTC_APDU_CLA,
};

bitflags::bitflags! {
    /// Address / display options for public key requests
    pub struct AddressFlags: u8 {
        /// Display the address on the device for confirmation
        const DISPLAY = 1 << 0;
        /// Return a P2SH-wrapped segwit address
        const NESTED_SEGWIT = 1 << 1;
        /// Return a native (bech32) segwit address
        const NATIVE_SEGWIT = 1 << 2;
    }
}

impl Default for AddressFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Wallet public key request APDU.
///
/// Requests the public key, address and chain code for a derivation path.
/// Display and address format are carried in `P1` / `P2`.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   PATH_LEN    |          PATH[0] (u32, big-endian)            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               |          PATH[N] ...                          /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyReq {
    /// Derivation path (hardened elements have the top bit set)
    pub path: Vec<u32>,
    /// Address options
    pub flags: AddressFlags,
}

impl WalletPublicKeyReq {
    /// Create a new [WalletPublicKeyReq] APDU
    pub fn new(path: &[u32], flags: AddressFlags) -> Self {
        Self {
            path: path.to_vec(),
            flags,
        }
    }
}

impl ApduStatic for WalletPublicKeyReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::GetWalletPublicKey as u8;

    fn p1(&self) -> u8 {
        match self.flags.contains(AddressFlags::DISPLAY) {
            true => 0x01,
            false => 0x00,
        }
    }

    fn p2(&self) -> u8 {
        if self.flags.contains(AddressFlags::NATIVE_SEGWIT) {
            0x02
        } else if self.flags.contains(AddressFlags::NESTED_SEGWIT) {
            0x01
        } else {
            0x00
        }
    }
}

impl Encode for WalletPublicKeyReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        path::enc_len(&self.path)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        path::enc(&self.path, buff)
    }
}

/// Decodes the derivation path, address flags are carried in the header
impl DecodeOwned for WalletPublicKeyReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, n) = path::dec(buff)?;

        Ok((
            Self {
                path,
                flags: AddressFlags::empty(),
            },
            n,
        ))
    }
}

impl ApduParse for WalletPublicKeyReq {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError> {
        check_header::<Self>(header)?;

        let (mut req, _n) = Self::decode_owned(data)?;

        if param_flag(header.p1, 0x01, 0x00)? {
            req.flags |= AddressFlags::DISPLAY;
        }
        match header.p2 {
            0x00 => (),
            0x01 => req.flags |= AddressFlags::NESTED_SEGWIT,
            0x02 => req.flags |= AddressFlags::NATIVE_SEGWIT,
            _ => return Err(ApduError::InvalidEncoding),
        }

        Ok(req)
    }
}

/// Wallet public key response APDU
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    KEY_LEN    |                                               |
/// +-+-+-+-+-+-+-+-+                                               +
/// /                  PUBLIC_KEY (65-byte, uncompressed)           /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ADDR_LEN    |                ADDRESS (ascii)                /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                     CHAIN_CODE (32-byte)                      /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyResp {
    /// Public key as returned by the device
    pub public_key: Vec<u8>,
    /// Encoded address (empty if not provided)
    pub address: String,
    /// BIP32 chain code
    pub chain_code: [u8; 32],
}

impl Encode for WalletPublicKeyResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(1 + self.public_key.len() + 1 + self.address.len() + 32)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        let mut index = bytes::enc(&self.public_key, buff)?;
        index += bytes::enc(self.address.as_bytes(), &mut buff[index..])?;

        buff[index..][..32].copy_from_slice(&self.chain_code);
        index += 32;

        Ok(index)
    }
}

impl DecodeOwned for WalletPublicKeyResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (public_key, mut index) = bytes::dec(buff)?;

        let (address, n) = bytes::dec(&buff[index..])?;
        let address = String::from_utf8(address).map_err(|_| ApduError::InvalidUtf8)?;
        index += n;

        if buff.len() < index + 32 {
            return Err(ApduError::InvalidLength);
        }

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&buff[index..][..32]);
        index += 32;

        Ok((
            Self {
                public_key,
                address,
                chain_code,
            },
            index,
        ))
    }
}
