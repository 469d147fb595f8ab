// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Handle for connected ledger devices
//!
//! This provides methods for interacting with the bitcoin application
//! and is generic over [Transport] types

use std::sync::Arc;

use bitcoin::{bip32::DerivationPath, Transaction};
use log::debug;
use tokio::sync::Mutex;

use ledger_btc_apdu::{firmware::FirmwareVersion, public_key::AddressFlags};

use crate::{
    input::LedgerInput,
    protocol::{Driver, WalletPublicKey},
    transport::{Connection, Transport},
    tx, DeviceConfig, Error,
};

/// Bitcoin handle for a connected ledger device.
///
/// Clones share the underlying connection, operations are serialised
/// in the order they are issued and a signing session holds the
/// connection until every input is signed.
pub struct DeviceHandle<T: Transport> {
    /// Connection for device communication
    t: Arc<Mutex<Connection<T>>>,
    /// Device configuration
    config: DeviceConfig,
}

impl<T: Transport> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            config: self.config.clone(),
        }
    }
}

/// Create a [DeviceHandle] wrapper from a type implementing [Transport]
impl<T: Transport> From<T> for DeviceHandle<T> {
    fn from(t: T) -> Self {
        Self::new(t, DeviceConfig::default())
    }
}

impl<T: Transport> DeviceHandle<T> {
    /// Create a new handle with the provided configuration
    pub fn new(t: T, config: DeviceConfig) -> Self {
        let c = Connection::new(t, config.channel, config.packet_size);

        Self {
            t: Arc::new(Mutex::new(c)),
            config,
        }
    }

    /// Fetch device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Open the underlying transport
    pub async fn open(&self) -> Result<(), Error> {
        self.t.lock().await.open().await
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<(), Error> {
        self.t.lock().await.close().await
    }

    /// Fetch bitcoin application / firmware information
    pub async fn app_info(&self) -> Result<FirmwareVersion, Error> {
        debug!("Requesting app info");

        let mut c = self.t.lock().await;
        Driver::new(&mut c, &self.config).firmware_version().await
    }

    /// Fetch the public key for a derivation path
    pub async fn get_public_key(
        &self,
        path: &DerivationPath,
        flags: AddressFlags,
    ) -> Result<WalletPublicKey, Error> {
        let mut c = self.t.lock().await;
        Driver::new(&mut c, &self.config)
            .get_public_key(path, flags)
            .await
    }

    /// Sign the inputs of `tx` described by `inputs`.
    ///
    /// Script-sigs and witnesses are written to `tx` only once every input
    /// has been signed, on failure `tx` is unchanged and the returned error
    /// carries the [Phase][crate::Phase] that failed.
    pub async fn sign_transaction(
        &self,
        tx: &mut Transaction,
        inputs: &mut [LedgerInput],
    ) -> Result<(), Error> {
        // Hold the connection for the full signing session
        let mut c = self.t.lock().await;

        debug!("Starting signing session");

        let mut d = Driver::new(&mut c, &self.config);
        tx::sign_transaction(&mut d, tx, inputs).await
    }
}
