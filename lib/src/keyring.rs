// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Key / script bundle used to template unlocking scripts

use bitcoin::{hashes::Hash, PubkeyHash, PublicKey, Script, ScriptBuf, WPubkeyHash};

use crate::Error;

/// Public key with the optional redeem script and witness flag
/// required to build unlocking scripts for an input
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRing {
    public_key: PublicKey,
    redeem: Option<ScriptBuf>,
    witness: bool,
}

impl KeyRing {
    /// Create a new [KeyRing]
    pub fn new(public_key: PublicKey, redeem: Option<ScriptBuf>, witness: bool) -> Self {
        Self {
            public_key,
            redeem,
            witness,
        }
    }

    /// Fetch the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Fetch the redeem (or witness) script, if set
    pub fn redeem(&self) -> Option<&Script> {
        self.redeem.as_deref()
    }

    /// Check whether this keyring spends witness outputs
    pub fn is_witness(&self) -> bool {
        self.witness
    }

    /// Hash160 of the public key
    pub fn pubkey_hash(&self) -> PubkeyHash {
        self.public_key.pubkey_hash()
    }

    /// Witness public key hash, compressed keys only
    pub fn wpubkey_hash(&self) -> Result<WPubkeyHash, Error> {
        if !self.public_key.compressed {
            return Err(Error::InvalidKey);
        }
        Ok(WPubkeyHash::hash(&self.public_key.to_bytes()))
    }

    /// Witness program for this keyring, P2WSH when a redeem script
    /// is set, otherwise P2WPKH
    pub fn program(&self) -> Result<ScriptBuf, Error> {
        match &self.redeem {
            Some(r) => Ok(ScriptBuf::new_p2wsh(&r.wscript_hash())),
            None => Ok(ScriptBuf::new_p2wpkh(&self.wpubkey_hash()?)),
        }
    }

    /// Locking script for outputs spendable by this keyring
    pub fn script_pubkey(&self, nested: bool) -> Result<ScriptBuf, Error> {
        let s = match (&self.redeem, self.witness) {
            (None, false) => ScriptBuf::new_p2pkh(&self.pubkey_hash()),
            (Some(r), false) => ScriptBuf::new_p2sh(&r.script_hash()),
            (_, true) if nested => ScriptBuf::new_p2sh(&self.program()?.script_hash()),
            (_, true) => self.program()?,
        };
        Ok(s)
    }
}
