// Copyright (c) 2022-2023 The MobileCoin Foundation

use bitcoin::OutPoint;
use tokio::time::error::Elapsed;

use ledger_btc_apdu::{frame::FrameError, ApduError, StatusCode};

use crate::tx::SessionState;

/// Signing phase, attached to errors returned from
/// [DeviceHandle::sign_transaction][crate::DeviceHandle::sign_transaction]
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum::Display)]
pub enum Phase {
    /// Fetching public keys for inputs
    PublicKey,
    /// Fetching trusted input tokens
    TrustedInput,
    /// Streaming the transaction for hashing
    Hashing,
    /// Requesting a signature
    Signature,
    /// Applying a signature to the transaction
    Templating,
}

/// Ledger Bitcoin API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(anyhow::Error),

    /// Malformed or incomplete frame
    #[error("Framing error: {0}")]
    Frame(FrameError),

    /// Request timeout
    #[error("Timeout waiting for device response")]
    RequestTimeout,

    /// APDU encode / decode error
    #[error("APDU error: {0:?}")]
    Apdu(ApduError),

    /// Unexpected APDU response
    #[error("Unexpected APDU response")]
    UnexpectedResponse,

    /// Device returned a non-success status word
    #[error("Device returned status {0:#06x} ({})", status_name(*.0))]
    Status(u16),

    /// Invalid signing session state
    #[error("Invalid session state (actual: {0}, expected: {1})")]
    InvalidState(SessionState, SessionState),

    /// Unsupported signature hash type
    #[error("Unsupported sighash type {0:#04x} (only SIGHASH_ALL is supported)")]
    InvalidSighash(u32),

    /// Output index outside the source transaction
    #[error("Output index {0} out of range (source transaction has {1} outputs)")]
    OutputIndex(u32, usize),

    /// Invalid derivation path
    #[error("Invalid derivation path: {0}")]
    InvalidPath(#[from] bitcoin::bip32::Error),

    /// Public key may only be set once
    #[error("Public key already set")]
    PublicKeyAlreadySet,

    /// Public key required before deriving a keyring
    #[error("Public key not available")]
    MissingPublicKey,

    /// Input not present in transaction
    #[error("Input {0} not found in transaction")]
    InputNotFound(OutPoint),

    /// Input described more than once
    #[error("Input {0} provided more than once")]
    DuplicateInput(OutPoint),

    /// Spent coin not available for a witness input
    #[error("Coin for input {0} not available")]
    MissingCoin(OutPoint),

    /// Script hash output without a resolvable redeem script
    #[error("Redeem script not available")]
    MissingRedeemScript,

    /// Signature could not be applied to the script template
    #[error("Script templating failed: {0}")]
    Template(&'static str),

    /// Invalid key in response
    #[error("Invalid public key")]
    InvalidKey,

    /// Failure during a signing phase
    #[error("{0} failed: {1}")]
    Signing(Phase, #[source] Box<Error>),
}

impl Error {
    /// Fetch the signing phase in which this error occurred, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Signing(p, _) => Some(*p),
            _ => None,
        }
    }

    /// Fetch the device status word associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status(sw) => Some(*sw),
            Error::Signing(_, e) => e.status(),
            _ => None,
        }
    }

    /// Tag an error with the signing phase in which it occurred
    pub(crate) fn during(self, phase: Phase) -> Self {
        match self {
            Error::Signing(..) => self,
            _ => Error::Signing(phase, Box::new(self)),
        }
    }
}

/// Resolve a human readable name for a status word
fn status_name(sw: u16) -> String {
    match StatusCode::try_from(sw) {
        Ok(s) => s.to_string(),
        Err(_) => "Unknown".to_string(),
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::RequestTimeout
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

impl From<ApduError> for Error {
    fn from(e: ApduError) -> Self {
        Error::Apdu(e)
    }
}
