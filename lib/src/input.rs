// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Input descriptors, binding a transaction input to the previous output
//! it spends and the key required to sign it.

use std::{fmt::Display, str::FromStr};

use bitcoin::{
    bip32::DerivationPath, consensus::encode::serialize, sighash::EcdsaSighashType, Amount,
    OutPoint, PublicKey, Script, ScriptBuf, Transaction,
};
use once_cell::sync::OnceCell;

use crate::{keyring::KeyRing, Error};

/// Length of a serialized outpoint (txid + output index)
pub const OUTPOINT_LEN: usize = 36;

/// Serialized outpoint, used to key per-input state
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPointKey([u8; OUTPOINT_LEN]);

impl OutPointKey {
    /// Fetch raw key bytes
    pub fn as_bytes(&self) -> &[u8; OUTPOINT_LEN] {
        &self.0
    }
}

impl From<&OutPoint> for OutPointKey {
    fn from(o: &OutPoint) -> Self {
        let mut k = [0u8; OUTPOINT_LEN];
        k.copy_from_slice(&serialize(o));
        Self(k)
    }
}

impl Display for OutPointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for OutPointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutPointKey({self})")
    }
}

/// Previous output being spent
#[derive(Clone, Debug, PartialEq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
}

/// Lazily derived input values, cleared by [LedgerInput::refresh]
#[derive(Default)]
struct Derived {
    outpoint: OnceCell<OutPoint>,
    key: OnceCell<OutPointKey>,
    coin: OnceCell<Coin>,
    keyring: OnceCell<KeyRing>,
}

/// Describes an input to be signed by the device
pub struct LedgerInput {
    path: DerivationPath,
    source: Transaction,
    index: u32,
    redeem: Option<ScriptBuf>,
    public_key: Option<PublicKey>,
    sighash: EcdsaSighashType,
    witness: bool,
    derived: Derived,
}

impl LedgerInput {
    /// Create a descriptor for the output `index` of `source`, signed
    /// with the key at `path`.
    ///
    /// Witness spending is inferred for native witness outputs, nested
    /// outputs require [LedgerInput::with_witness].
    pub fn new(path: DerivationPath, source: Transaction, index: u32) -> Result<Self, Error> {
        let output = source
            .output
            .get(index as usize)
            .ok_or(Error::OutputIndex(index, source.output.len()))?;

        let witness = output.script_pubkey.is_p2wpkh() || output.script_pubkey.is_p2wsh();

        Ok(Self {
            path,
            source,
            index,
            redeem: None,
            public_key: None,
            sighash: EcdsaSighashType::All,
            witness,
            derived: Derived::default(),
        })
    }

    /// Create a descriptor using a textual derivation path (`m/44'/0'/0'/0/0`)
    pub fn from_path_str(path: &str, source: Transaction, index: u32) -> Result<Self, Error> {
        let path = DerivationPath::from_str(path)?;
        Self::new(path, source, index)
    }

    /// Set the redeem script (or witness script) for script hash outputs
    pub fn with_redeem(mut self, redeem: ScriptBuf) -> Self {
        self.redeem = Some(redeem);
        self.refresh();
        self
    }

    /// Set the public key, skipping the device lookup
    pub fn with_public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = Some(public_key);
        self.refresh();
        self
    }

    /// Override witness detection
    pub fn with_witness(mut self, witness: bool) -> Self {
        self.witness = witness;
        self.refresh();
        self
    }

    /// Set the signature hash type, only [EcdsaSighashType::All] is supported
    pub fn with_sighash_type(mut self, sighash: EcdsaSighashType) -> Result<Self, Error> {
        if sighash != EcdsaSighashType::All {
            return Err(Error::InvalidSighash(sighash.to_u32()));
        }
        self.sighash = sighash;
        Ok(self)
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn source_transaction(&self) -> &Transaction {
        &self.source
    }

    pub fn output_index(&self) -> u32 {
        self.index
    }

    pub fn redeem(&self) -> Option<&Script> {
        self.redeem.as_deref()
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    pub fn sighash_type(&self) -> EcdsaSighashType {
        self.sighash
    }

    pub fn is_witness(&self) -> bool {
        self.witness
    }

    /// Set the public key for this input, may only be called once
    pub fn set_public_key(&mut self, public_key: PublicKey) -> Result<(), Error> {
        if self.public_key.is_some() {
            return Err(Error::PublicKeyAlreadySet);
        }

        self.public_key = Some(public_key);
        self.refresh();

        Ok(())
    }

    /// Clear derived values
    pub fn refresh(&mut self) {
        self.derived = Derived::default();
    }

    /// Outpoint spent by this input
    pub fn outpoint(&self) -> OutPoint {
        *self
            .derived
            .outpoint
            .get_or_init(|| OutPoint::new(self.source.compute_txid(), self.index))
    }

    /// Serialized outpoint key
    pub fn key(&self) -> &OutPointKey {
        self.derived
            .key
            .get_or_init(|| OutPointKey::from(&self.outpoint()))
    }

    /// Previous output spent by this input
    pub fn coin(&self) -> &Coin {
        self.derived.coin.get_or_init(|| {
            // Index checked on construction
            let output = &self.source.output[self.index as usize];
            Coin {
                outpoint: self.outpoint(),
                value: output.value,
                script_pubkey: output.script_pubkey.clone(),
            }
        })
    }

    /// Locking script of the previous output
    pub fn prev_script(&self) -> &Script {
        &self.coin().script_pubkey
    }

    /// Keyring for templating, requires the public key to be set
    pub fn keyring(&self) -> Result<&KeyRing, Error> {
        self.derived.keyring.get_or_try_init(|| {
            let public_key = self.public_key.ok_or(Error::MissingPublicKey)?;
            Ok(KeyRing::new(public_key, self.redeem.clone(), self.witness))
        })
    }
}

impl std::fmt::Debug for LedgerInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerInput")
            .field("path", &self.path)
            .field("outpoint", &self.outpoint())
            .field("witness", &self.witness)
            .field("redeem", &self.redeem)
            .field("public_key", &self.public_key)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use bitcoin::{
        absolute::LockTime, transaction::Version, Sequence, TxIn, TxOut, Witness,
    };

    use super::*;

    pub(crate) const PUBKEY: &str =
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    /// Build a source transaction paying to the provided scripts
    pub(crate) fn source_tx(scripts: &[ScriptBuf]) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: scripts
                .iter()
                .enumerate()
                .map(|(i, s)| TxOut {
                    value: Amount::from_sat(10_000 * (i as u64 + 1)),
                    script_pubkey: s.clone(),
                })
                .collect(),
        }
    }

    fn public_key() -> PublicKey {
        PublicKey::from_str(PUBKEY).unwrap()
    }

    #[test]
    fn derived_values() {
        let pk = public_key();
        let p2pkh = ScriptBuf::new_p2pkh(&pk.pubkey_hash());
        let tx = source_tx(&[ScriptBuf::new(), p2pkh.clone()]);

        let i = LedgerInput::from_path_str("m/44'/0'/0'/0/0", tx.clone(), 1).unwrap();

        assert_eq!(i.outpoint(), OutPoint::new(tx.compute_txid(), 1));
        assert_eq!(i.coin().value, Amount::from_sat(20_000));
        assert_eq!(i.prev_script(), p2pkh.as_script());
        assert!(!i.is_witness());

        // Key is the serialized outpoint, txid followed by LE index
        let key = i.key();
        assert_eq!(&key.as_bytes()[32..], &[1, 0, 0, 0]);
        assert_eq!(key.to_string().len(), OUTPOINT_LEN * 2);
    }

    #[test]
    fn output_index_out_of_range() {
        let tx = source_tx(&[ScriptBuf::new()]);

        let r = LedgerInput::from_path_str("m/0", tx, 1);
        assert!(matches!(r, Err(Error::OutputIndex(1, 1))));
    }

    #[test]
    fn invalid_path() {
        let tx = source_tx(&[ScriptBuf::new()]);

        let r = LedgerInput::from_path_str("m/not/a/path", tx, 0);
        assert!(matches!(r, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn witness_inferred_from_native_outputs() {
        let pk = public_key();
        let wpkh = KeyRing::new(pk, None, true).program().unwrap();
        let tx = source_tx(&[wpkh]);

        let i = LedgerInput::from_path_str("m/84'/0'/0'/0/0", tx, 0).unwrap();
        assert!(i.is_witness());

        let i = i.with_witness(false);
        assert!(!i.is_witness());
    }

    #[test]
    fn public_key_set_once() {
        let tx = source_tx(&[ScriptBuf::new()]);
        let mut i = LedgerInput::from_path_str("m/0", tx, 0).unwrap();

        assert!(matches!(i.keyring(), Err(Error::MissingPublicKey)));

        i.set_public_key(public_key()).unwrap();
        assert_eq!(i.keyring().unwrap().public_key(), &public_key());

        assert!(matches!(
            i.set_public_key(public_key()),
            Err(Error::PublicKeyAlreadySet)
        ));
    }

    #[test]
    fn keyring_tracks_redeem() {
        let pk = public_key();
        let redeem = ScriptBuf::new_p2pkh(&pk.pubkey_hash());
        let tx = source_tx(&[ScriptBuf::new_p2sh(&redeem.script_hash())]);

        let i = LedgerInput::from_path_str("m/0", tx, 0)
            .unwrap()
            .with_public_key(pk)
            .with_redeem(redeem.clone());

        assert_eq!(i.keyring().unwrap().redeem(), Some(redeem.as_script()));
    }

    #[test]
    fn only_sighash_all() {
        let tx = source_tx(&[ScriptBuf::new()]);
        let i = LedgerInput::from_path_str("m/0", tx, 0).unwrap();

        assert!(matches!(
            i.with_sighash_type(EcdsaSighashType::None),
            Err(Error::InvalidSighash(2))
        ));
    }
}
