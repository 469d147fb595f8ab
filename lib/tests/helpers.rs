// Copyright (c) 2022-2023 The MobileCoin Foundation

#![allow(dead_code)]

use std::str::FromStr;

use log::LevelFilter;
use simplelog::SimpleLogger;

use ledger_btc::{
    apdu::Instruction,
    bitcoin::{
        absolute::LockTime, opcodes::all::OP_CHECKMULTISIG, script::Builder,
        transaction::Version, Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction,
        TxIn, TxOut, Witness,
    },
    DeviceHandle,
};
use ledger_btc_sim::{Command, SimTransport, Simulator};

/// Compressed form of the simulator's default public key
pub const SIM_PUBKEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// Other keys for multisig scripts
pub const OTHER_PUBKEYS: [&str; 2] = [
    "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
    "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9",
];

/// Setup logging, simulator and device handle
pub fn setup() -> (Simulator, DeviceHandle<SimTransport>) {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());

    let sim = Simulator::new();
    let handle = DeviceHandle::from(sim.transport());

    (sim, handle)
}

pub fn sim_pubkey() -> PublicKey {
    PublicKey::from_str(SIM_PUBKEY).unwrap()
}

pub fn other_pubkey(i: usize) -> PublicKey {
    PublicKey::from_str(OTHER_PUBKEYS[i]).unwrap()
}

/// 2-of-3 multisig including the simulator key in the first slot
pub fn multisig_2_of_3() -> ScriptBuf {
    Builder::new()
        .push_int(2)
        .push_key(&sim_pubkey())
        .push_key(&other_pubkey(0))
        .push_key(&other_pubkey(1))
        .push_int(3)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

fn txin(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

/// Build a source transaction with `inputs` inputs, paying to `scripts`
pub fn source_tx(inputs: usize, scripts: &[ScriptBuf]) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: (0..inputs)
            .map(|i| {
                let mut t = txin(OutPoint::null());
                t.previous_output.vout = i as u32;
                t.script_sig = ScriptBuf::from_bytes(vec![0x51]);
                t
            })
            .collect(),
        output: scripts
            .iter()
            .enumerate()
            .map(|(i, s)| TxOut {
                value: Amount::from_sat(50_000 + i as u64),
                script_pubkey: s.clone(),
            })
            .collect(),
    }
}

/// Build an unsigned transaction spending `prevouts` to two outputs
pub fn spending_tx(prevouts: &[OutPoint]) -> Transaction {
    let dest = ScriptBuf::new_p2pkh(&other_pubkey(0).pubkey_hash());
    let change = ScriptBuf::new_p2pkh(&sim_pubkey().pubkey_hash());

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(700_000),
        input: prevouts.iter().map(|o| txin(*o)).collect(),
        output: vec![
            TxOut {
                value: Amount::from_sat(30_000),
                script_pubkey: dest,
            },
            TxOut {
                value: Amount::from_sat(19_000),
                script_pubkey: change,
            },
        ],
    }
}

/// Filter recorded commands by instruction
pub fn filter(commands: &[Command], ins: Instruction) -> Vec<Command> {
    commands.iter().filter(|c| c.is(ins)).cloned().collect()
}

/// Hash input start commands beginning a pass (`P1 = 0x00`)
pub fn hash_passes(commands: &[Command]) -> Vec<Command> {
    filter(commands, Instruction::HashInputStart)
        .into_iter()
        .filter(|c| c.header.p1 == 0x00)
        .collect()
}

/// Parse a push-only script into stack elements
pub fn stack(script: &ScriptBuf) -> Vec<Vec<u8>> {
    ledger_btc::script::script_to_stack(script).unwrap()
}
