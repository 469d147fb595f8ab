// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Script classification and unlocking script templating
//!
//! Each input is classified once against the previous output script and
//! its [KeyRing], the resulting [ScriptClass] selects the script code
//! presented to the device and how a returned signature is written back
//! into the input's script-sig / witness.

use bitcoin::{
    hashes::Hash,
    opcodes::all::OP_CHECKMULTISIG,
    script::{Builder, Instruction, PushBytesBuf},
    PubkeyHash, Script, ScriptBuf, TxIn, WPubkeyHash, Witness,
};
use log::trace;

use crate::{keyring::KeyRing, Error};

/// `OP_1`, small integers `1..=16` are `OP_1 + n - 1`
const OP_PUSHNUM_BASE: u8 = 0x50;

/// Classification of the script guarding an input
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptClass {
    /// Bare output script (P2PKH, P2PK, bare multisig)
    Plain { script: ScriptBuf },
    /// Pay to script hash, with resolved redeem script
    ScriptHash { redeem: ScriptBuf },
    /// Pay to witness script hash, optionally nested in P2SH
    WitnessScriptHash { witness_script: ScriptBuf, nested: bool },
    /// Pay to witness public key hash, optionally nested in P2SH
    WitnessPubkeyHash { pubkey_hash: WPubkeyHash, nested: bool },
}

impl ScriptClass {
    /// Classify an input spending `prev`.
    ///
    /// Script hash outputs are resolved using the keyring redeem script if
    /// set, otherwise via the last element of the input's existing
    /// script-sig (P2SH) or witness (P2WSH).
    pub fn classify(prev: &Script, ring: &KeyRing, input: &TxIn) -> Result<Self, Error> {
        if prev.is_p2sh() {
            let redeem = match ring.redeem() {
                Some(r) => Some(r.to_owned()),
                None => discover_redeem(&input.script_sig),
            };

            if let Some(redeem) = redeem {
                // Nested witness program provided directly as the redeem script
                if redeem.is_p2wpkh() && ScriptBuf::new_p2sh(&redeem.script_hash()) == *prev {
                    return Ok(ScriptClass::WitnessPubkeyHash {
                        pubkey_hash: program_hash(&redeem)?,
                        nested: true,
                    });
                }

                if ScriptBuf::new_p2sh(&redeem.script_hash()) == *prev {
                    return Ok(ScriptClass::ScriptHash { redeem });
                }

                let program = ScriptBuf::new_p2wsh(&redeem.wscript_hash());
                if ScriptBuf::new_p2sh(&program.script_hash()) == *prev {
                    return Ok(ScriptClass::WitnessScriptHash {
                        witness_script: redeem,
                        nested: true,
                    });
                }

                return Err(Error::MissingRedeemScript);
            }

            // Nested P2WPKH owned by the keyring
            if ring.is_witness() && ring.script_pubkey(true)? == *prev {
                return Ok(ScriptClass::WitnessPubkeyHash {
                    pubkey_hash: ring.wpubkey_hash()?,
                    nested: true,
                });
            }

            return Err(Error::MissingRedeemScript);
        }

        if prev.is_p2wsh() {
            let witness_script = match ring.redeem() {
                Some(r) => r.to_owned(),
                None => input
                    .witness
                    .last()
                    .map(|w| ScriptBuf::from_bytes(w.to_vec()))
                    .ok_or(Error::MissingRedeemScript)?,
            };

            if ScriptBuf::new_p2wsh(&witness_script.wscript_hash()) != *prev {
                return Err(Error::MissingRedeemScript);
            }

            return Ok(ScriptClass::WitnessScriptHash {
                witness_script,
                nested: false,
            });
        }

        if prev.is_p2wpkh() {
            return Ok(ScriptClass::WitnessPubkeyHash {
                pubkey_hash: program_hash(prev)?,
                nested: false,
            });
        }

        Ok(ScriptClass::Plain {
            script: prev.to_owned(),
        })
    }

    /// Script code presented to the device when hashing this input
    pub fn script_code(&self) -> ScriptBuf {
        match self {
            ScriptClass::Plain { script } => script.clone(),
            ScriptClass::ScriptHash { redeem } => redeem.clone(),
            ScriptClass::WitnessScriptHash { witness_script, .. } => witness_script.clone(),
            ScriptClass::WitnessPubkeyHash { pubkey_hash, .. } => {
                let h = PubkeyHash::from_byte_array(pubkey_hash.to_byte_array());
                ScriptBuf::new_p2pkh(&h)
            }
        }
    }

    /// Check whether this input is signed with the witness (BIP143) digest
    pub fn is_witness(&self) -> bool {
        matches!(
            self,
            ScriptClass::WitnessScriptHash { .. } | ScriptClass::WitnessPubkeyHash { .. }
        )
    }

    /// P2SH-wrapped witness program, for nested witness classes
    pub fn nested_program(&self) -> Option<ScriptBuf> {
        match self {
            ScriptClass::WitnessScriptHash {
                witness_script,
                nested: true,
            } => Some(ScriptBuf::new_p2wsh(&witness_script.wscript_hash())),
            ScriptClass::WitnessPubkeyHash {
                pubkey_hash,
                nested: true,
            } => Some(ScriptBuf::new_p2wpkh(pubkey_hash)),
            _ => None,
        }
    }

    /// Write a signature (including the sighash byte) into `input`
    pub fn apply(&self, input: &mut TxIn, signature: &[u8], ring: &KeyRing) -> Result<(), Error> {
        match self {
            ScriptClass::Plain { script } => {
                let stack = script_to_stack(&input.script_sig)?;
                let stack = sign_vector(script, stack, signature, ring)?;
                input.script_sig = stack_to_script(&stack)?;
            }
            ScriptClass::ScriptHash { redeem } => {
                let mut stack = script_to_stack(&input.script_sig)?;
                strip_suffix(&mut stack, redeem);

                let mut stack = sign_vector(redeem, stack, signature, ring)?;
                stack.push(redeem.to_bytes());

                input.script_sig = stack_to_script(&stack)?;
            }
            ScriptClass::WitnessScriptHash { witness_script, .. } => {
                let mut stack = input.witness.to_vec();
                strip_suffix(&mut stack, witness_script);

                let mut stack = sign_vector(witness_script, stack, signature, ring)?;
                stack.push(witness_script.to_bytes());

                input.witness = Witness::from_slice(&stack);
            }
            ScriptClass::WitnessPubkeyHash { .. } => {
                let stack = input.witness.to_vec();
                let stack = sign_vector(&self.script_code(), stack, signature, ring)?;

                input.witness = Witness::from_slice(&stack);
            }
        }

        if let Some(program) = self.nested_program() {
            input.script_sig = stack_to_script(&[program.to_bytes()])?;
        }

        trace!("Applied signature, script_sig: {:?}", input.script_sig);

        Ok(())
    }
}

/// Insert `signature` into the unlocking stack for `script`.
///
/// - P2PK: `[sig]`
/// - P2PKH: `[sig, pubkey]`
/// - m-of-n multisig: `[OP_0, sig_1..sig_n]`, with unfilled slots removed
///   once `m` signatures are present
pub fn sign_vector(
    script: &Script,
    stack: Vec<Vec<u8>>,
    signature: &[u8],
    ring: &KeyRing,
) -> Result<Vec<Vec<u8>>, Error> {
    let public_key = ring.public_key().to_bytes();

    if script.is_p2pkh() {
        if script.as_bytes()[3..23] != ring.pubkey_hash().to_byte_array()[..] {
            return Err(Error::Template("public key hash mismatch"));
        }
        return Ok(vec![signature.to_vec(), public_key]);
    }

    if script.is_p2pk() {
        match script.instructions().next() {
            Some(Ok(Instruction::PushBytes(k))) if k.as_bytes() == &public_key[..] => (),
            _ => return Err(Error::Template("public key mismatch")),
        }
        return Ok(vec![signature.to_vec()]);
    }

    if let Some((m, keys)) = parse_multisig(script) {
        let n = keys.len();
        let slot = keys
            .iter()
            .position(|k| k == &public_key)
            .ok_or(Error::Template("public key not in multisig"))?;

        let mut stack = match stack.len() {
            0 => vec![vec![]; n + 1],
            l if l == n + 1 => stack,
            _ => return Err(Error::Template("unexpected multisig stack")),
        };
        stack[slot + 1] = signature.to_vec();

        let count = stack[1..].iter().filter(|s| !s.is_empty()).count();
        if count >= m {
            let mut complete = vec![vec![]];
            complete.extend(stack.drain(1..).filter(|s| !s.is_empty()).take(m));
            return Ok(complete);
        }

        return Ok(stack);
    }

    Err(Error::Template("unsupported script type"))
}

/// Parse a push-only script into stack elements
pub fn script_to_stack(script: &Script) -> Result<Vec<Vec<u8>>, Error> {
    script
        .instructions()
        .map(|i| match i {
            Ok(Instruction::PushBytes(b)) => Ok(b.as_bytes().to_vec()),
            _ => Err(Error::Template("script is not push only")),
        })
        .collect()
}

/// Build a push-only script from stack elements
pub fn stack_to_script(stack: &[Vec<u8>]) -> Result<ScriptBuf, Error> {
    let mut b = Builder::new();
    for s in stack {
        let p = PushBytesBuf::try_from(s.clone())
            .map_err(|_| Error::Template("stack element too large"))?;
        b = b.push_slice(p);
    }
    Ok(b.into_script())
}

/// Parse `OP_m <key>.. OP_n OP_CHECKMULTISIG`
fn parse_multisig(script: &Script) -> Option<(usize, Vec<Vec<u8>>)> {
    let ins = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    if ins.len() < 4 || ins[ins.len() - 1] != Instruction::Op(OP_CHECKMULTISIG) {
        return None;
    }

    let m = small_int(&ins[0])?;
    let n = small_int(&ins[ins.len() - 2])?;

    let keys = ins[1..ins.len() - 2]
        .iter()
        .map(|i| match i {
            Instruction::PushBytes(k) => Some(k.as_bytes().to_vec()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    if keys.len() != n || m == 0 || m > n {
        return None;
    }

    Some((m, keys))
}

fn small_int(i: &Instruction) -> Option<usize> {
    match i {
        Instruction::Op(op) => match op.to_u8() {
            v @ 0x51..=0x60 => Some((v - OP_PUSHNUM_BASE) as usize),
            _ => None,
        },
        _ => None,
    }
}

/// Resolve a redeem script from the last push of a script-sig
fn discover_redeem(script_sig: &Script) -> Option<ScriptBuf> {
    let stack = script_to_stack(script_sig).ok()?;
    stack.last().filter(|s| !s.is_empty()).cloned().map(ScriptBuf::from_bytes)
}

/// Drop a trailing redeem / witness script from an existing stack
fn strip_suffix(stack: &mut Vec<Vec<u8>>, script: &Script) {
    if stack.last().map(|s| &s[..]) == Some(script.as_bytes()) {
        stack.pop();
    }
}

/// Extract the hash from a P2WPKH program
fn program_hash(program: &Script) -> Result<WPubkeyHash, Error> {
    let mut h = [0u8; 20];
    h.copy_from_slice(
        program
            .as_bytes()
            .get(2..22)
            .ok_or(Error::Template("invalid witness program"))?,
    );
    Ok(WPubkeyHash::from_byte_array(h))
}
