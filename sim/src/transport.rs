// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Packet transport connected to a [Simulator]

use std::collections::VecDeque;

use async_trait::async_trait;
use log::trace;

use ledger_btc::Transport;
use ledger_btc_apdu::frame::{self, FrameCodec, FrameDecoder, FrameError};

use crate::Simulator;

/// Simulator transport errors
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Read without a pending response
    #[error("No response pending")]
    NoResponse,

    /// Transport used while closed
    #[error("Transport closed")]
    Closed,

    /// Malformed command framing
    #[error("Framing error: {0}")]
    Frame(FrameError),
}

impl From<FrameError> for SimError {
    fn from(e: FrameError) -> Self {
        SimError::Frame(e)
    }
}

/// Transport delivering packets to a [Simulator]
pub struct SimTransport {
    sim: Simulator,
    codec: FrameCodec,
    decoder: FrameDecoder,
    pending: VecDeque<Vec<u8>>,
    open: bool,
}

impl SimTransport {
    pub(crate) fn new(sim: Simulator) -> Self {
        let codec = FrameCodec::default();
        Self {
            sim,
            decoder: codec.decoder(),
            codec,
            pending: VecDeque::new(),
            open: true,
        }
    }

    /// Flow control acknowledgement, an empty packet on the command channel
    fn ack(&self) -> Vec<u8> {
        let mut p = vec![0u8; self.codec.packet_size()];
        p[..2].copy_from_slice(&self.codec.channel().to_be_bytes());
        p[2] = frame::TAG_APDU;
        p
    }

    async fn delay(&self) {
        let latency = self.sim.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Error = SimError;

    async fn open(&mut self) -> Result<(), SimError> {
        self.sim.on_open();
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SimError> {
        self.open = false;
        self.pending.clear();
        self.decoder.reset();
        Ok(())
    }

    async fn write(&mut self, packet: &[u8]) -> Result<(), SimError> {
        if !self.open {
            return Err(SimError::Closed);
        }

        self.delay().await;

        let msg = match self.decoder.push(packet)? {
            Some(m) => m,
            None => {
                if self.sim.acknowledges() {
                    trace!("Acknowledge command packet");
                    self.sim.on_ack();
                    self.pending.push_back(self.ack());
                }
                return Ok(());
            }
        };

        let (header, data) = frame::parse_command(&msg)?;
        let (resp, status) = self.sim.handle(header, data);

        let packets = self.codec.encode_response(&resp, status)?;
        trace!("Queue {} response packets", packets.len());
        self.pending.extend(packets);

        Ok(())
    }

    fn acknowledges_writes(&self) -> bool {
        self.sim.acknowledges()
    }

    async fn read(&mut self) -> Result<Vec<u8>, SimError> {
        if !self.open {
            return Err(SimError::Closed);
        }

        self.delay().await;

        self.pending.pop_front().ok_or(SimError::NoResponse)
    }
}
