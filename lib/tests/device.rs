// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{str::FromStr, time::Duration};

use ledger_btc::{
    apdu::{firmware::FirmwareFlags, frame::FrameCodec, public_key::AddressFlags, Instruction},
    bitcoin::{bip32::DerivationPath, OutPoint, ScriptBuf},
    protocol::Driver,
    Connection, DeviceConfig, DeviceHandle, Error, LedgerInput,
};

use ledger_btc_sim::status;

mod helpers;
use helpers::*;

#[tokio::test]
async fn app_info() {
    let (sim, handle) = setup();

    handle.open().await.unwrap();
    assert_eq!(sim.opened(), 1);

    let info = handle.app_info().await.unwrap();
    assert_eq!(info.version, (2, 1, 0));
    assert!(info.flags.contains(FirmwareFlags::COMPRESSED));

    handle.close().await.unwrap();
}

#[tokio::test]
async fn public_key_path_encoding() {
    let (sim, handle) = setup();

    let path = DerivationPath::from_str("m/44'/0'/0'/0/0").unwrap();
    let k = handle
        .get_public_key(&path, AddressFlags::empty())
        .await
        .unwrap();

    // Returned keys are compressed
    assert_eq!(k.public_key, sim_pubkey());
    assert_eq!(k.public_key.to_bytes().len(), 33);
    assert_eq!(k.address, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
    assert_eq!(k.chain_code, [0x5a; 32]);

    let c = sim.commands();
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].header.p1, 0x00);
    assert_eq!(c[0].header.p2, 0x00);
    assert_eq!(
        c[0].data,
        vec![
            5, 0x80, 0x00, 0x00, 0x2c, 0x80, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00
        ]
    );
}

#[tokio::test]
async fn public_key_display() {
    let (sim, handle) = setup();

    let path = DerivationPath::from_str("m/84'/0'/0'/0/3").unwrap();
    handle
        .get_public_key(&path, AddressFlags::DISPLAY | AddressFlags::NATIVE_SEGWIT)
        .await
        .unwrap();

    let c = sim.commands();
    assert_eq!(c[0].header.p1, 0x01);
    assert_eq!(c[0].header.p2, 0x02);
}

#[tokio::test]
async fn device_errors_are_reported() {
    let (sim, handle) = setup();

    sim.fail_on(Instruction::GetWalletPublicKey, status::SECURITY_STATUS_NOT_SATISFIED);

    let path = DerivationPath::from_str("m/0").unwrap();
    let e = handle
        .get_public_key(&path, AddressFlags::empty())
        .await
        .unwrap_err();

    assert!(matches!(e, Error::Status(0x6982)));
    assert_eq!(e.phase(), None);
}

#[tokio::test]
async fn trusted_input_streaming() {
    let (sim, _handle) = setup();

    // Three inputs and two outputs
    let p2pkh = ScriptBuf::new_p2pkh(&sim_pubkey().pubkey_hash());
    let source = source_tx(3, &[p2pkh.clone(), p2pkh]);

    let config = DeviceConfig::default();
    let mut c = Connection::new(sim.transport(), config.channel, config.packet_size);
    let mut d = Driver::new(&mut c, &config);

    let t = d.get_trusted_input(&source, 1).await.unwrap();
    assert_eq!(t.output_index(), 1);
    assert_eq!(t.as_bytes()[0], 0x32);

    // Header, one command per input, one per output
    let cmds = filter(&sim.commands(), Instruction::GetTrustedInput);
    assert_eq!(cmds.len(), 6);
    assert_eq!(cmds[0].header.p1, 0x00);
    assert!(cmds[1..].iter().all(|c| c.header.p1 == 0x80));

    // Header carries the big-endian output index, version and input count
    assert_eq!(&cmds[0].data, &[0, 0, 0, 1, 1, 0, 0, 0, 3]);

    // Output count is sent with the first output, lock time with the last
    assert_eq!(cmds[4].data[0], 2);
    assert_eq!(cmds[4].data.len(), 1 + 8 + 1 + 25);
    assert_eq!(cmds[5].data.len(), 8 + 1 + 25 + 4);
}

#[tokio::test]
async fn large_components_are_split() {
    let (sim, handle) = setup();

    // Source transaction with an oversized script-sig
    let p2pkh = ScriptBuf::new_p2pkh(&sim_pubkey().pubkey_hash());
    let mut source = source_tx(1, &[p2pkh]);
    source.input[0].script_sig = ScriptBuf::from_bytes(vec![0x51; 300]);

    let mut tx = spending_tx(&[OutPoint::new(source.compute_txid(), 0)]);
    let mut inputs = [LedgerInput::from_path_str("m/44'/0'/0'/0/0", source, 0).unwrap()];

    handle.sign_transaction(&mut tx, &mut inputs).await.unwrap();

    let cmds = filter(&sim.commands(), Instruction::GetTrustedInput);

    // Header, input of 36 + 3 + 300 + 4 bytes split in two, output
    assert_eq!(cmds.len(), 4);
    assert_eq!(cmds[1].data.len(), 255);
    assert_eq!(cmds[2].data.len(), 343 - 255);

    assert!(sim.commands().iter().all(|c| c.data.len() <= 255));
}

#[tokio::test]
async fn write_acknowledgements() {
    let (sim, handle) = setup();
    sim.set_acknowledge(true);

    // Oversized script-sig forces multi-packet commands
    let p2pkh = ScriptBuf::new_p2pkh(&sim_pubkey().pubkey_hash());
    let mut source = source_tx(1, &[p2pkh]);
    source.input[0].script_sig = ScriptBuf::from_bytes(vec![0x51; 300]);

    let mut tx = spending_tx(&[OutPoint::new(source.compute_txid(), 0)]);
    let mut inputs = [LedgerInput::from_path_str("m/44'/0'/0'/0/0", source, 0).unwrap()];

    handle.sign_transaction(&mut tx, &mut inputs).await.unwrap();
    assert!(!tx.input[0].script_sig.is_empty());

    // One acknowledgement consumed per non-final command packet
    let codec = FrameCodec::default();
    let expected: usize = sim.commands().iter().map(|c| c.packets(&codec) - 1).sum();

    assert!(expected > 0);
    assert_eq!(sim.acks(), expected);

    // No acknowledgements left unread
    let k = handle
        .get_public_key(&DerivationPath::from_str("m/0").unwrap(), AddressFlags::empty())
        .await
        .unwrap();
    assert_eq!(k.public_key, sim_pubkey());
}

#[tokio::test]
async fn request_timeout() {
    let (sim, _handle) = setup();

    sim.set_latency(Duration::from_millis(200));

    let config = DeviceConfig {
        request_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let handle = DeviceHandle::new(sim.transport(), config);

    let e = handle.app_info().await.unwrap_err();
    assert!(matches!(e, Error::RequestTimeout));
}
