// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger Bitcoin API Library
//!
//! Provides a [DeviceHandle] for fetching public keys and signing
//! transactions using the bitcoin application on a ledger device,
//! over any packet [Transport].
//!

/// Re-export `ledger-btc-apdu` for consumers
pub use ledger_btc_apdu::{self as apdu};

/// Re-export `bitcoin` for consumers
pub use bitcoin;

mod config;
pub use config::DeviceConfig;

mod error;
pub use error::{Error, Phase};

mod handle;
pub use handle::DeviceHandle;

mod input;
pub use input::{Coin, LedgerInput, OutPointKey};

mod keyring;
pub use keyring::KeyRing;

pub mod protocol;
pub use protocol::{TrustedInput, WalletPublicKey};

pub mod script;
pub use script::ScriptClass;

pub mod transport;
pub use transport::{Connection, Transport};

pub mod tx;
