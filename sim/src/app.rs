// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bitcoin application responder

use bitcoin::{consensus::deserialize, Transaction};
use encdec::Encode;
use log::{debug, trace};

use ledger_btc_apdu::{
    prelude::*,
    trusted_input::{TRUSTED_INPUT_LEN, TRUSTED_INPUT_MAGIC},
    BTC_APDU_CLA,
};

use crate::status;

/// Uncompressed secp256k1 generator point, used as the default public key
const DEFAULT_PUBLIC_KEY: &str = concat!(
    "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8"
);

/// Address for the default public key
const DEFAULT_ADDRESS: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

/// Simulated bitcoin application
#[derive(Clone, Debug)]
pub struct App {
    /// Public key returned for all derivation paths
    pub public_key: Vec<u8>,
    /// Chain code returned for all derivation paths
    pub chain_code: [u8; 32],
    /// Address returned for all derivation paths
    pub address: String,
    /// Pending trusted input stream (output index, transaction data)
    trusted: Option<(u32, Vec<u8>)>,
    /// Number of signatures issued
    signatures: u8,
}

impl Default for App {
    fn default() -> Self {
        Self {
            public_key: hex::decode(DEFAULT_PUBLIC_KEY).unwrap_or_default(),
            chain_code: [0x5a; 32],
            address: DEFAULT_ADDRESS.to_string(),
            trusted: None,
            signatures: 0,
        }
    }
}

impl App {
    /// Handle a command, returning the response payload or an error status word
    pub fn handle(&mut self, header: &ApduHeader, data: &[u8]) -> Result<Vec<u8>, u16> {
        if header.cla != BTC_APDU_CLA {
            return Err(status::CLA_NOT_SUPPORTED);
        }

        let ins = Instruction::try_from(header.ins).map_err(|_| status::INS_NOT_SUPPORTED)?;

        match ins {
            Instruction::GetFirmwareVersion => {
                FirmwareVersionReq::parse(header, data).map_err(invalid)?;
                encode(&FirmwareVersion {
                    flags: FirmwareFlags::COMPRESSED | FirmwareFlags::SCREEN_AND_BUTTONS,
                    architecture: 0x30,
                    version: (2, 1, 0),
                    loader: None,
                })
            }
            Instruction::GetWalletPublicKey => {
                let req = WalletPublicKeyReq::parse(header, data).map_err(invalid)?;
                debug!("Public key request for path: {:08x?}", req.path);

                encode(&WalletPublicKeyResp {
                    public_key: self.public_key.clone(),
                    address: self.address.clone(),
                    chain_code: self.chain_code,
                })
            }
            Instruction::GetTrustedInput => {
                let req = TrustedInputReq::parse(header, data).map_err(invalid)?;
                self.trusted_input(req)
            }
            Instruction::HashInputStart => {
                let req = HashInputStartReq::parse(header, data).map_err(invalid)?;
                trace!("Hash input ({}, first: {})", req.mode, req.first);
                Ok(vec![])
            }
            Instruction::HashInputFinalizeFull => {
                let req = HashFinalizeReq::parse(header, data).map_err(invalid)?;
                match req.last {
                    true => Ok(vec![0x00, 0x00]),
                    false => Ok(vec![]),
                }
            }
            Instruction::HashSign => {
                let req = HashSignReq::parse(header, data).map_err(invalid)?;
                debug!("Sign request for path: {:08x?}", req.path);

                self.signatures = self.signatures.wrapping_add(1);
                Ok(signature(self.signatures, req.sighash))
            }
        }
    }

    /// Accumulate a trusted input stream, returning the token once the
    /// full transaction has been received
    fn trusted_input(&mut self, req: TrustedInputReq) -> Result<Vec<u8>, u16> {
        if req.first {
            if req.data.len() < 4 {
                return Err(status::INVALID_DATA);
            }
            let index = u32::from_be_bytes([req.data[0], req.data[1], req.data[2], req.data[3]]);
            self.trusted = Some((index, req.data[4..].to_vec()));
        } else {
            match &mut self.trusted {
                Some((_, d)) => d.extend_from_slice(&req.data),
                None => return Err(status::CONDITIONS_NOT_SATISFIED),
            }
        }

        let (index, tx) = match &self.trusted {
            Some((index, d)) => match deserialize::<Transaction>(d) {
                Ok(tx) => (*index, tx),
                Err(_) => return Ok(vec![]),
            },
            None => return Ok(vec![]),
        };
        self.trusted = None;

        let output = tx
            .output
            .get(index as usize)
            .ok_or(status::INVALID_DATA)?;

        debug!("Trusted input for output {index} of {}", tx.compute_txid());

        let mut token = Vec::with_capacity(TRUSTED_INPUT_LEN);
        token.extend_from_slice(&[TRUSTED_INPUT_MAGIC, 0x00, 0xa5, 0x5a]);
        token.extend_from_slice(&bitcoin::consensus::serialize(&tx.compute_txid()));
        token.extend_from_slice(&index.to_le_bytes());
        token.extend_from_slice(&output.value.to_sat().to_le_bytes());
        token.extend_from_slice(&[0xee; 8]);

        Ok(token)
    }
}

/// Build a DER signature with the `R` parity marker and trailing sighash
fn signature(n: u8, sighash: u8) -> Vec<u8> {
    let mut s = vec![0x31, 0x44, 0x02, 0x20];
    s.extend_from_slice(&[0x11; 31]);
    s.push(n);
    s.extend_from_slice(&[0x02, 0x20]);
    s.extend_from_slice(&[0x22; 32]);
    s.push(sighash);
    s
}

fn encode<E: Encode<Error = ApduError>>(e: &E) -> Result<Vec<u8>, u16> {
    let mut buff = vec![0u8; e.encode_len().map_err(invalid)?];
    let n = e.encode(&mut buff).map_err(invalid)?;
    buff.truncate(n);
    Ok(buff)
}

fn invalid(e: ApduError) -> u16 {
    debug!("Invalid command: {:?}", e);
    status::INVALID_DATA
}

#[cfg(test)]
mod test {
    use encdec::DecodeOwned;

    use super::*;

    fn header(ins: Instruction, p1: u8, p2: u8) -> ApduHeader {
        ApduHeader {
            cla: BTC_APDU_CLA,
            ins: ins as u8,
            p1,
            p2,
        }
    }

    #[test]
    fn signature_normalised() {
        let mut app = App::default();

        let req = HashSignReq::new(&[0x8000_002c, 0], 0, 0x01);
        let data = encode(&req).unwrap();
        let r = app
            .handle(&header(Instruction::HashSign, 0, 0), &data)
            .unwrap();

        let (resp, _) = HashSignResp::decode_owned(&r).unwrap();
        assert_eq!(resp.signature[0], 0x30);
        assert_eq!(resp.signature.len(), 70);
        assert_eq!(resp.sighash, Some(0x01));
    }

    #[test]
    fn unknown_instruction() {
        let mut app = App::default();

        let h = ApduHeader {
            cla: BTC_APDU_CLA,
            ins: 0x02,
            p1: 0,
            p2: 0,
        };
        assert_eq!(app.handle(&h, &[]), Err(status::INS_NOT_SUPPORTED));

        let h = ApduHeader { cla: 0xb0, ..h };
        assert_eq!(app.handle(&h, &[]), Err(status::CLA_NOT_SUPPORTED));
    }

    #[test]
    fn trusted_input_without_header() {
        let mut app = App::default();

        let r = app.handle(&header(Instruction::GetTrustedInput, 0x80, 0), &[0u8; 8]);
        assert_eq!(r, Err(status::CONDITIONS_NOT_SATISFIED));
    }
}
