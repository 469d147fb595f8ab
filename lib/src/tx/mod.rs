// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction signing
//!
//! Signs each described input of a transaction in turn:
//! - public keys are fetched for inputs without one
//! - trusted inputs are fetched for legacy inputs
//! - witness inputs share a single priming pass over the transaction
//! - each input is hashed (nullified legacy pass or witness pass) and
//!   signed, with the signature templated into a staged transaction
//!
//! The caller's transaction is only updated once every input is signed.

use std::collections::HashSet;

use bitcoin::Transaction;
use log::{debug, info};

use ledger_btc_apdu::public_key::AddressFlags;

use crate::{
    input::{LedgerInput, OutPointKey},
    protocol::{Driver, InputContext},
    script::ScriptClass,
    transport::Transport,
    Error, Phase,
};

mod state;
pub use state::SessionState;
pub(crate) use state::Session;

/// Sign the inputs of `tx` described by `inputs`
pub(crate) async fn sign_transaction<T: Transport>(
    d: &mut Driver<'_, T>,
    tx: &mut Transaction,
    inputs: &mut [LedgerInput],
) -> Result<(), Error> {
    let positions = locate_inputs(tx, inputs)?;

    debug!(
        "Signing {} of {} inputs for tx {}",
        inputs.len(),
        tx.input.len(),
        tx.compute_txid()
    );

    // Fetch missing public keys
    for input in inputs.iter_mut() {
        if input.public_key().is_some() {
            continue;
        }

        let k = d
            .get_public_key(input.path(), AddressFlags::empty())
            .await
            .map_err(|e| e.during(Phase::PublicKey))?;

        input.set_public_key(k.public_key)?;
    }

    // Classify inputs
    let mut classes = Vec::with_capacity(inputs.len());
    for (input, &pos) in inputs.iter().zip(positions.iter()) {
        let c = ScriptClass::classify(input.prev_script(), input.keyring()?, &tx.input[pos])
            .map_err(|e| e.during(Phase::Templating))?;
        debug!("Input {pos} ({}) classified as {c:?}", input.key());
        classes.push(c);
    }

    // Fetch trusted inputs for legacy inputs, collect coins
    let mut ctx = InputContext::default();
    for (input, class) in inputs.iter().zip(classes.iter()) {
        ctx.coins.insert(*input.key(), input.coin().clone());

        if class.is_witness() || input.redeem().is_some() || ctx.trusted.contains_key(input.key())
        {
            continue;
        }

        let t = d
            .get_trusted_input(input.source_transaction(), input.output_index())
            .await
            .map_err(|e| e.during(Phase::TrustedInput))?;

        ctx.trusted.insert(*input.key(), t);
    }

    let mut staged = tx.clone();
    let mut session = Session::new();

    // Prime witness hashing
    if classes.iter().any(|c| c.is_witness()) {
        session.prime().map_err(|e| e.during(Phase::Hashing))?;

        prime(d, tx, &ctx)
            .await
            .map_err(|e| e.during(Phase::Hashing))?;
    }

    for (i, ((input, class), &pos)) in inputs
        .iter()
        .zip(classes.iter())
        .zip(positions.iter())
        .enumerate()
    {
        let script_code = class.script_code();

        // Hash input
        let hashed = async {
            if class.is_witness() {
                session.segwit(i)?;
                d.hash_transaction_start_segwit(tx, input.key(), &script_code, &ctx)
                    .await
            } else {
                let first = session.nullify(i)?;
                d.hash_transaction_start_nullify(tx, input.key(), &script_code, &ctx, first, false)
                    .await?;

                session.finalize(i)?;
                d.hash_output_finalize(tx).await
            }
        };
        hashed.await.map_err(|e| e.during(Phase::Hashing))?;

        // Request signature
        session.sign(i).map_err(|e| e.during(Phase::Signature))?;

        let mut sig = d
            .hash_sign(tx, input.path(), input.sighash_type())
            .await
            .map_err(|e| e.during(Phase::Signature))?;
        sig.push(input.sighash_type().to_u32() as u8);

        // Apply signature to staged transaction
        class
            .apply(&mut staged.input[pos], &sig, input.keyring()?)
            .map_err(|e| e.during(Phase::Templating))?;

        info!("Signed input {pos} ({})", input.outpoint());
    }

    debug!("Signing complete (state: {})", session.state());

    *tx = staged;

    Ok(())
}

/// Witness priming pass, all inputs with empty scripts followed by outputs
async fn prime<T: Transport>(
    d: &mut Driver<'_, T>,
    tx: &Transaction,
    ctx: &InputContext,
) -> Result<(), Error> {
    d.hash_transaction_start(tx, ctx, true, true).await?;
    d.hash_output_finalize(tx).await
}

/// Resolve the transaction position of each described input
fn locate_inputs(tx: &Transaction, inputs: &[LedgerInput]) -> Result<Vec<usize>, Error> {
    let mut seen = HashSet::new();

    inputs
        .iter()
        .map(|input| {
            let key = *input.key();
            if !seen.insert(key) {
                return Err(Error::DuplicateInput(input.outpoint()));
            }

            tx.input
                .iter()
                .position(|i| OutPointKey::from(&i.previous_output) == key)
                .ok_or(Error::InputNotFound(input.outpoint()))
        })
        .collect()
}
