//! Prelude to simplify downstream use of APDU objects
//!

pub use crate::{
    firmware::{FirmwareFlags, FirmwareVersion, FirmwareVersionReq},
    frame::{FrameCodec, FrameDecoder, FrameError},
    hash::{
        HashFinalizeReq, HashFinalizeResp, HashInputStartReq, HashMode, HashSignReq, HashSignResp,
        InputKind,
    },
    public_key::{AddressFlags, WalletPublicKeyReq, WalletPublicKeyResp},
    trusted_input::{TrustedInputReq, TrustedInputResp},
    ApduError, ApduHeader, ApduParse, ApduReq, ApduStatic, Instruction, StatusCode,
};
