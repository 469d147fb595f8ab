// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transport abstraction and framed APDU exchange

use std::time::Duration;

use async_trait::async_trait;
use encdec::DecodeOwned;
use log::{debug, trace, warn};

use ledger_btc_apdu::{
    frame::{self, FrameCodec},
    ApduError, ApduReq,
};

use crate::Error;

/// Packet transport to a physical (or simulated) device.
///
/// Discovery / enumeration happens before a [Transport] is created,
/// framing and APDU handling is provided by [Connection].
#[async_trait]
pub trait Transport: Send {
    /// Transport error type
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the underlying device
    async fn open(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Close the underlying device
    async fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Write a single packet
    async fn write(&mut self, packet: &[u8]) -> Result<(), Self::Error>;

    /// Read a single packet
    async fn read(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Whether the transport acknowledges each packet written
    fn acknowledges_writes(&self) -> bool {
        false
    }
}

/// Framed APDU connection over a [Transport]
pub struct Connection<T: Transport> {
    t: T,
    codec: FrameCodec,
}

impl<T: Transport> Connection<T> {
    /// Create a new connection using the provided frame channel and packet size
    pub fn new(t: T, channel: u16, packet_size: usize) -> Self {
        let codec = FrameCodec::new(channel, packet_size);
        Self { t, codec }
    }

    /// Open the underlying transport
    pub async fn open(&mut self) -> Result<(), Error> {
        self.t.open().await.map_err(transport_err)
    }

    /// Close the underlying transport
    pub async fn close(&mut self) -> Result<(), Error> {
        self.t.close().await.map_err(transport_err)
    }

    /// Execute an APDU exchange, decoding the response payload
    pub async fn exchange<'a, RESP>(
        &mut self,
        req: impl ApduReq<'a> + Send,
        timeout: Duration,
    ) -> Result<RESP, Error>
    where
        RESP: DecodeOwned<Output = RESP, Error = ApduError>,
    {
        let data = self.request(req, timeout).await?;

        let (resp, _n) = RESP::decode_owned(&data)?;

        Ok(resp)
    }

    /// Execute an APDU exchange, returning the raw response payload
    pub async fn request<'a>(
        &mut self,
        req: impl ApduReq<'a> + Send,
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        // Encode request payload
        let mut buff = vec![0u8; req.encode_len()?];
        let n = req.encode(&mut buff)?;

        let header = req.header();
        debug!(
            "Request INS: {:#04x} P1: {:#04x} P2: {:#04x} ({} bytes)",
            header.ins, header.p1, header.p2, n
        );

        // Write framed command
        let packets = self.codec.encode_command(&header, &buff[..n])?;
        let count = packets.len();

        for (i, p) in packets.iter().enumerate() {
            trace!("Write packet {}/{}: {:02x?}", i + 1, count, p);

            tokio::time::timeout(timeout, self.t.write(p))
                .await?
                .map_err(transport_err)?;

            // Consume flow control acknowledgements
            if self.t.acknowledges_writes() && i + 1 < count {
                tokio::time::timeout(timeout, self.t.read())
                    .await?
                    .map_err(transport_err)?;
            }
        }

        // Read and reassemble response
        let mut decoder = self.codec.decoder();
        let msg = loop {
            let p = tokio::time::timeout(timeout, self.t.read())
                .await?
                .map_err(transport_err)?;

            trace!("Read packet: {:02x?}", p);

            if let Some(m) = decoder.push(&p)? {
                break m;
            }
        };

        let (data, status) = frame::split_status(msg)?;

        if !frame::is_ok(status) {
            let e = Error::Status(status);
            warn!("{} for INS {:#04x}", e, header.ins);
            return Err(e);
        }

        debug!("Response: {} bytes", data.len());

        Ok(data)
    }
}

/// Wrap a transport error
fn transport_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> Error {
    Error::Transport(anyhow::Error::new(e))
}
