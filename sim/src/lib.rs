// Copyright (c) 2022-2023 The MobileCoin Foundation

//! In-process simulator for the ledger bitcoin application
//!
//! Provides a [SimTransport] implementing [ledger_btc::Transport], decoding
//! framed APDUs and responding as the bitcoin application would. Commands
//! are recorded for inspection and faults may be injected per instruction.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ledger_btc::Error> {
//! use ledger_btc::DeviceHandle;
//! use ledger_btc_sim::Simulator;
//!
//! let sim = Simulator::new();
//! let handle = DeviceHandle::from(sim.transport());
//!
//! let info = handle.app_info().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{debug, warn};

use ledger_btc_apdu::{frame::FrameCodec, ApduHeader, Instruction};

mod app;
pub use app::App;

mod transport;
pub use transport::{SimError, SimTransport};

/// Status words returned by the simulated application
pub mod status {
    /// Command completed successfully
    pub const OK: u16 = 0x9000;
    /// Device locked or PIN not validated
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    /// Operation rejected by the user, or out of sequence
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    /// Invalid command data or parameters
    pub const INVALID_DATA: u16 = 0x6a80;
    /// Instruction not supported
    pub const INS_NOT_SUPPORTED: u16 = 0x6d00;
    /// Class not supported
    pub const CLA_NOT_SUPPORTED: u16 = 0x6e00;
}

/// Command received by the simulator
#[derive(Clone, Debug)]
pub struct Command {
    pub header: ApduHeader,
    pub data: Vec<u8>,
}

impl Command {
    /// Number of packets required to frame this command
    pub fn packets(&self, codec: &FrameCodec) -> usize {
        codec
            .encode_command(&self.header, &self.data)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// Resolve the command instruction
    pub fn instruction(&self) -> Option<Instruction> {
        Instruction::try_from(self.header.ins).ok()
    }

    /// Check whether this command matches an instruction
    pub fn is(&self, ins: Instruction) -> bool {
        self.header.ins == ins as u8
    }
}

/// Simulated device, clones share state
#[derive(Clone, Default)]
pub struct Simulator {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    app: App,
    log: Vec<Command>,
    faults: HashMap<u8, u16>,
    latency: Duration,
    opened: usize,
    acknowledge: bool,
    acks: usize,
}

impl Simulator {
    /// Create a new simulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport connected to this simulator
    pub fn transport(&self) -> SimTransport {
        SimTransport::new(self.clone())
    }

    /// Set per-packet latency
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Acknowledge each non-final command packet, as flow controlled transports do
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state().acknowledge = acknowledge;
    }

    /// Number of packet acknowledgements issued
    pub fn acks(&self) -> usize {
        self.state().acks
    }

    /// Respond to `ins` with the provided status word
    pub fn fail_on(&self, ins: Instruction, status: u16) {
        self.state().faults.insert(ins as u8, status);
    }

    /// Clear injected faults
    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Fetch recorded commands
    pub fn commands(&self) -> Vec<Command> {
        self.state().log.clone()
    }

    /// Clear recorded commands
    pub fn clear_commands(&self) {
        self.state().log.clear();
    }

    /// Number of times the transport has been opened
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    /// Override the (uncompressed) public key returned by the app
    pub fn set_public_key(&self, public_key: &[u8]) {
        self.state().app.public_key = public_key.to_vec();
    }

    pub(crate) fn latency(&self) -> Duration {
        self.state().latency
    }

    pub(crate) fn on_open(&self) {
        self.state().opened += 1;
    }

    pub(crate) fn acknowledges(&self) -> bool {
        self.state().acknowledge
    }

    pub(crate) fn on_ack(&self) {
        self.state().acks += 1;
    }

    /// Handle a reassembled command, returning response payload and status
    pub(crate) fn handle(&self, header: ApduHeader, data: &[u8]) -> (Vec<u8>, u16) {
        let mut s = self.state();

        debug!(
            "Command INS: {:#04x} P1: {:#04x} P2: {:#04x} data: {}",
            header.ins,
            header.p1,
            header.p2,
            hex::encode(data)
        );

        s.log.push(Command {
            header,
            data: data.to_vec(),
        });

        if let Some(sw) = s.faults.get(&header.ins) {
            warn!("Injected fault {:#06x} for INS {:#04x}", sw, header.ins);
            return (vec![], *sw);
        }

        match s.app.handle(&header, data) {
            Ok(r) => (r, status::OK),
            Err(sw) => (vec![], sw),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Recover state if a test panicked while holding the lock
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
