// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol driver, translating transaction level operations into
//! sequences of bitcoin application APDUs.
//!
//! Transaction components are serialised with the consensus encoder and
//! streamed in chunks of at most [MAX_APDU_DATA] bytes. The device keeps
//! the running hash between commands, so a [Driver] must only be used
//! while holding exclusive access to the underlying [Connection].

use std::collections::HashMap;

use bitcoin::{
    bip32::DerivationPath,
    consensus::encode::{serialize, VarInt},
    sighash::EcdsaSighashType,
    PublicKey, Script, Transaction, TxIn,
};
use encdec::DecodeOwned;
use log::debug;

use ledger_btc_apdu::{
    prelude::*,
    trusted_input::TRUSTED_INPUT_LEN,
    MAX_APDU_DATA,
};

use crate::{
    input::{Coin, OutPointKey},
    transport::{Connection, Transport},
    DeviceConfig, Error,
};

/// Public key information returned by the device
#[derive(Clone, Debug, PartialEq)]
pub struct WalletPublicKey {
    /// Compressed public key
    pub public_key: PublicKey,
    /// BIP32 chain code
    pub chain_code: [u8; 32],
    /// Address string, as displayed by the device
    pub address: String,
}

/// Trusted input token, binding an outpoint and amount to a device MAC
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct TrustedInput([u8; TRUSTED_INPUT_LEN]);

impl TrustedInput {
    pub fn as_bytes(&self) -> &[u8; TRUSTED_INPUT_LEN] {
        &self.0
    }

    /// Output index bound by this token
    pub fn output_index(&self) -> u32 {
        TrustedInputResp { token: self.0 }.output_index()
    }
}

/// Per-input data required for hashing passes, keyed by outpoint
#[derive(Clone, Debug, Default)]
pub struct InputContext {
    /// Trusted input tokens for legacy inputs
    pub trusted: HashMap<OutPointKey, TrustedInput>,
    /// Spent coins, required for witness inputs
    pub coins: HashMap<OutPointKey, Coin>,
}

/// Script presented for each input in a hashing pass
#[derive(Copy, Clone, Debug)]
enum Scripts<'a> {
    /// Use the transaction's current script-sigs
    Current,
    /// Empty scripts for all inputs
    Empty,
    /// Empty scripts except for the target input
    Nullify(&'a OutPointKey, &'a Script),
}

/// Protocol driver for the bitcoin application
pub struct Driver<'c, T: Transport> {
    c: &'c mut Connection<T>,
    config: &'c DeviceConfig,
}

impl<'c, T: Transport> Driver<'c, T> {
    /// Create a driver over an exclusively held connection
    pub fn new(c: &'c mut Connection<T>, config: &'c DeviceConfig) -> Self {
        Self { c, config }
    }

    /// Fetch application / firmware version
    pub async fn firmware_version(&mut self) -> Result<FirmwareVersion, Error> {
        self.c
            .exchange(FirmwareVersionReq, self.config.request_timeout)
            .await
    }

    /// Fetch the public key for a derivation path, compressing the
    /// device response
    pub async fn get_public_key(
        &mut self,
        path: &DerivationPath,
        flags: AddressFlags,
    ) -> Result<WalletPublicKey, Error> {
        let p = path_elements(path);
        debug!("Fetch public key for path: {path}");

        let timeout = match flags.contains(AddressFlags::DISPLAY) {
            true => self.config.user_timeout,
            false => self.config.request_timeout,
        };

        let resp: WalletPublicKeyResp = self
            .c
            .exchange(WalletPublicKeyReq::new(&p, flags), timeout)
            .await?;

        let k = PublicKey::from_slice(&resp.public_key).map_err(|_| Error::InvalidKey)?;

        Ok(WalletPublicKey {
            public_key: PublicKey::new(k.inner),
            chain_code: resp.chain_code,
            address: resp.address,
        })
    }

    /// Stream output `index` of `tx` to the device, returning a trusted input
    pub async fn get_trusted_input(
        &mut self,
        tx: &Transaction,
        index: u32,
    ) -> Result<TrustedInput, Error> {
        debug!("Fetch trusted input for output {index} of {}", tx.compute_txid());

        let mut parts = vec![];

        // Header: output index (BE), version, input count
        let mut header = index.to_be_bytes().to_vec();
        header.extend_from_slice(&tx.version.0.to_le_bytes());
        header.extend_from_slice(&serialize(&VarInt(tx.input.len() as u64)));
        parts.push(header);

        for i in &tx.input {
            let mut p = serialize(&i.previous_output);
            p.extend_from_slice(&serialize(&i.script_sig));
            p.extend_from_slice(&i.sequence.0.to_le_bytes());
            parts.push(p);
        }

        // Output count with the first output, lock time with the last
        let count = serialize(&VarInt(tx.output.len() as u64));
        let lock_time = tx.lock_time.to_consensus_u32().to_le_bytes().to_vec();
        match tx.output.len() {
            0 => parts.push([count, lock_time].concat()),
            n => {
                for (i, o) in tx.output.iter().enumerate() {
                    let mut p = match i {
                        0 => count.clone(),
                        _ => vec![],
                    };
                    p.extend_from_slice(&serialize(o));
                    if i == n - 1 {
                        p.extend_from_slice(&lock_time);
                    }
                    parts.push(p);
                }
            }
        }

        let timeout = self.config.request_timeout;
        let mut first = true;
        let mut resp = vec![];

        for chunk in parts.iter().flat_map(|p| p.chunks(MAX_APDU_DATA)) {
            resp = self
                .c
                .request(TrustedInputReq::new(first, chunk), timeout)
                .await?;
            first = false;
        }

        let (t, _) = TrustedInputResp::decode_owned(&resp)?;

        if t.output_index() != index {
            return Err(Error::UnexpectedResponse);
        }

        Ok(TrustedInput(t.token))
    }

    /// Start hashing a transaction, presenting each input's current script
    /// (or empty scripts for witness passes)
    pub async fn hash_transaction_start(
        &mut self,
        tx: &Transaction,
        ctx: &InputContext,
        new: bool,
        witness: bool,
    ) -> Result<(), Error> {
        let scripts = match witness {
            true => Scripts::Empty,
            false => Scripts::Current,
        };
        self.hash_inputs(tx, ctx, scripts, new, witness).await
    }

    /// Start hashing a transaction with all scripts emptied except the
    /// target input, which presents `script_code`
    pub async fn hash_transaction_start_nullify(
        &mut self,
        tx: &Transaction,
        target: &OutPointKey,
        script_code: &Script,
        ctx: &InputContext,
        new: bool,
        witness: bool,
    ) -> Result<(), Error> {
        if !tx.input.iter().any(|i| OutPointKey::from(&i.previous_output) == *target) {
            return Err(Error::InputNotFound(find_outpoint(ctx, target)));
        }

        let scripts = Scripts::Nullify(target, script_code);
        self.hash_inputs(tx, ctx, scripts, new, witness).await
    }

    /// Stream the outputs of `tx`, finalising the running hash
    pub async fn hash_output_finalize(&mut self, tx: &Transaction) -> Result<(), Error> {
        let mut data = serialize(&VarInt(tx.output.len() as u64));
        for o in &tx.output {
            data.extend_from_slice(&serialize(o));
        }

        let chunks: Vec<_> = data.chunks(MAX_APDU_DATA).collect();
        debug!("Finalize {} outputs ({} chunks)", tx.output.len(), chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let last = i == chunks.len() - 1;

            // User confirmation happens on the last chunk
            let timeout = match last {
                true => self.config.user_timeout,
                false => self.config.request_timeout,
            };

            let _resp: HashFinalizeResp = self
                .c
                .exchange(HashFinalizeReq::new(last, chunk), timeout)
                .await?;
        }

        Ok(())
    }

    /// Continue a witness hash with the single target input
    pub async fn hash_transaction_start_segwit(
        &mut self,
        tx: &Transaction,
        target: &OutPointKey,
        script_code: &Script,
        ctx: &InputContext,
    ) -> Result<(), Error> {
        let input = tx
            .input
            .iter()
            .find(|i| OutPointKey::from(&i.previous_output) == *target)
            .ok_or_else(|| Error::InputNotFound(find_outpoint(ctx, target)))?;

        debug!("Hash witness input {target}");

        let mut header = tx.version.0.to_le_bytes().to_vec();
        header.extend_from_slice(&serialize(&VarInt(1)));

        let parts = [
            header,
            encode_input(input, ctx, script_code, true)?,
        ];

        self.stream_inputs(&parts, HashMode::Continue).await
    }

    /// Sign the accumulated transaction hash with the key at `path`,
    /// returning the DER encoded signature
    pub async fn hash_sign(
        &mut self,
        tx: &Transaction,
        path: &DerivationPath,
        sighash: EcdsaSighashType,
    ) -> Result<Vec<u8>, Error> {
        let sighash = sighash.to_u32();
        if sighash != EcdsaSighashType::All.to_u32() {
            return Err(Error::InvalidSighash(sighash));
        }

        debug!("Request signature for path: {path}");

        let req = HashSignReq::new(
            &path_elements(path),
            tx.lock_time.to_consensus_u32(),
            sighash as u8,
        );
        let resp: HashSignResp = self.c.exchange(req, self.config.user_timeout).await?;

        Ok(resp.signature)
    }

    /// Stream the transaction header and all inputs
    async fn hash_inputs(
        &mut self,
        tx: &Transaction,
        ctx: &InputContext,
        scripts: Scripts<'_>,
        new: bool,
        witness: bool,
    ) -> Result<(), Error> {
        debug!(
            "Hash {} inputs (new: {new}, witness: {witness}, scripts: {scripts:?})",
            tx.input.len()
        );

        let mut header = tx.version.0.to_le_bytes().to_vec();
        header.extend_from_slice(&serialize(&VarInt(tx.input.len() as u64)));

        let mut parts = vec![header];

        for i in &tx.input {
            let script = match scripts {
                Scripts::Current => i.script_sig.as_script(),
                Scripts::Empty => Script::new(),
                Scripts::Nullify(k, s) if OutPointKey::from(&i.previous_output) == *k => s,
                Scripts::Nullify(..) => Script::new(),
            };
            parts.push(encode_input(i, ctx, script, witness)?);
        }

        self.stream_inputs(&parts, HashMode::select(new, witness))
            .await
    }

    /// Stream hash input parts, `P1` marks the first chunk of the pass
    async fn stream_inputs(&mut self, parts: &[Vec<u8>], mode: HashMode) -> Result<(), Error> {
        let timeout = self.config.request_timeout;
        let mut first = true;

        for chunk in parts.iter().flat_map(|p| p.chunks(MAX_APDU_DATA)) {
            self.c
                .request(HashInputStartReq::new(first, mode, chunk), timeout)
                .await?;
            first = false;
        }

        Ok(())
    }
}

/// Encode a single input for a hashing pass
fn encode_input(
    i: &TxIn,
    ctx: &InputContext,
    script: &Script,
    witness: bool,
) -> Result<Vec<u8>, Error> {
    let key = OutPointKey::from(&i.previous_output);

    let mut p = match (witness, ctx.trusted.get(&key)) {
        (true, _) => {
            let coin = ctx
                .coins
                .get(&key)
                .ok_or(Error::MissingCoin(i.previous_output))?;

            let mut p = vec![InputKind::Witness as u8];
            p.extend_from_slice(&serialize(&i.previous_output));
            p.extend_from_slice(&coin.value.to_sat().to_le_bytes());
            p
        }
        (false, Some(t)) => {
            let mut p = vec![InputKind::Trusted as u8, TRUSTED_INPUT_LEN as u8];
            p.extend_from_slice(t.as_bytes());
            p
        }
        (false, None) => {
            let mut p = vec![InputKind::Untrusted as u8];
            p.extend_from_slice(&serialize(&i.previous_output));
            p
        }
    };

    p.extend_from_slice(&serialize(&VarInt(script.len() as u64)));
    p.extend_from_slice(script.as_bytes());
    p.extend_from_slice(&i.sequence.0.to_le_bytes());

    Ok(p)
}

/// Convert a derivation path to raw elements
fn path_elements(path: &DerivationPath) -> Vec<u32> {
    path.into_iter().map(|c| u32::from(*c)).collect()
}

/// Resolve the outpoint for a key, for error reporting
fn find_outpoint(ctx: &InputContext, key: &OutPointKey) -> bitcoin::OutPoint {
    ctx.coins
        .get(key)
        .map(|c| c.outpoint)
        .unwrap_or_else(bitcoin::OutPoint::null)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Txid, Witness};

    use super::*;

    fn input(vout: u32) -> TxIn {
        TxIn {
            previous_output: OutPoint::new(Txid::from_str(&"ab".repeat(32)).unwrap(), vout),
            script_sig: ScriptBuf::from_bytes(vec![0x51]),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }
    }

    #[test]
    fn encode_untrusted_input() {
        let i = input(3);
        let p = encode_input(&i, &InputContext::default(), Script::new(), false).unwrap();

        assert_eq!(p.len(), 1 + 36 + 1 + 4);
        assert_eq!(p[0], InputKind::Untrusted as u8);
        assert_eq!(&p[33..37], &[3, 0, 0, 0]);
        assert_eq!(p[37], 0);
        assert_eq!(&p[38..], &[0xff; 4]);
    }

    #[test]
    fn encode_trusted_input() {
        let i = input(0);
        let mut ctx = InputContext::default();
        let mut token = [0u8; TRUSTED_INPUT_LEN];
        token[0] = 0x32;
        ctx.trusted
            .insert(OutPointKey::from(&i.previous_output), TrustedInput(token));

        let script = ScriptBuf::from_bytes(vec![0xac; 25]);
        let p = encode_input(&i, &ctx, &script, false).unwrap();

        assert_eq!(&p[..2], &[InputKind::Trusted as u8, 56]);
        assert_eq!(&p[2..58], &token[..]);
        assert_eq!(p[58], 25);
        assert_eq!(p.len(), 2 + 56 + 1 + 25 + 4);
    }

    #[test]
    fn encode_witness_input() {
        let i = input(1);
        let mut ctx = InputContext::default();

        // Coins are required for witness inputs
        let r = encode_input(&i, &ctx, Script::new(), true);
        assert!(matches!(r, Err(Error::MissingCoin(_))));

        ctx.coins.insert(
            OutPointKey::from(&i.previous_output),
            Coin {
                outpoint: i.previous_output,
                value: Amount::from_sat(0x0102),
                script_pubkey: ScriptBuf::new(),
            },
        );

        let p = encode_input(&i, &ctx, Script::new(), true).unwrap();
        assert_eq!(p[0], InputKind::Witness as u8);
        assert_eq!(&p[37..45], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn path_conversion() {
        let p = DerivationPath::from_str("m/44'/0'/0'/0/7").unwrap();
        assert_eq!(
            path_elements(&p),
            vec![0x8000_002c, 0x8000_0000, 0x8000_0000, 0, 7]
        );
    }
}
