// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Firmware version APDUs

use encdec::{DecodeOwned, Encode};

use crate::{
    check_header, ApduError, ApduHeader, ApduParse, ApduStatic, Instruction, BTC_APDU_CLA,
};

/// Fetch firmware version APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct FirmwareVersionReq;

impl ApduStatic for FirmwareVersionReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::GetFirmwareVersion as u8;
}

impl Encode for FirmwareVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

impl DecodeOwned for FirmwareVersionReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(_buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((Self, 0))
    }
}

impl ApduParse for FirmwareVersionReq {
    fn parse(header: &ApduHeader, data: &[u8]) -> Result<Self, ApduError> {
        check_header::<Self>(header)?;
        let (r, _n) = Self::decode_owned(data)?;
        Ok(r)
    }
}

bitflags::bitflags! {
    /// Firmware feature flags
    pub struct FirmwareFlags: u8 {
        /// Device returns compressed public keys
        const COMPRESSED = 1 << 0;
        /// Device has its own screen and buttons
        const SCREEN_AND_BUTTONS = 1 << 1;
        /// Device takes user input externally
        const EXTERNAL_SCREEN_AND_BUTTONS = 1 << 2;
        /// NFC / payment extensions supported
        const NFC_PAYMENT_EXT = 1 << 3;
        /// BLE / low power extensions supported
        const BLE_LOW_POWER_EXT = 1 << 4;
        /// Running in a trusted execution environment
        const TEE = 1 << 5;
    }
}

/// Firmware version response APDU
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |     ARCH      |     MAJOR     |     MINOR     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     PATCH     | LOADER_MAJOR  | LOADER_MINOR  |  (RESERVED)   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Loader version and the trailing reserved byte are optional.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FirmwareVersion {
    /// Feature flags
    pub flags: FirmwareFlags,
    /// Architecture identifier
    pub architecture: u8,
    /// Application version (major, minor, patch)
    pub version: (u8, u8, u8),
    /// Loader version (major, minor), if reported
    pub loader: Option<(u8, u8)>,
}

impl Encode for FirmwareVersion {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(match self.loader {
            Some(_) => 7,
            None => 5,
        })
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.flags.bits();
        buff[1] = self.architecture;
        buff[2] = self.version.0;
        buff[3] = self.version.1;
        buff[4] = self.version.2;

        if let Some((major, minor)) = self.loader {
            buff[5] = major;
            buff[6] = minor;
        }

        Ok(n)
    }
}

impl DecodeOwned for FirmwareVersion {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        // Some devices append a vestigial byte, accept up to 8
        if buff.len() < 5 || buff.len() > 8 {
            return Err(ApduError::InvalidLength);
        }

        let loader = match buff.len() >= 7 {
            true => Some((buff[5], buff[6])),
            false => None,
        };

        Ok((
            Self {
                flags: FirmwareFlags::from_bits_truncate(buff[0]),
                architecture: buff[1],
                version: (buff[2], buff[3], buff[4]),
                loader,
            },
            buff.len(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn firmware_version_resp_apdu() {
        let apdu = FirmwareVersion {
            flags: FirmwareFlags::COMPRESSED | FirmwareFlags::SCREEN_AND_BUTTONS,
            architecture: 0x30,
            version: (2, 1, 0),
            loader: Some((1, 6)),
        };

        let mut buff = [0u8; 16];
        encode_decode_apdu(&mut buff, &apdu);
    }

    #[test]
    fn firmware_version_vestigial_byte() {
        let (v, n) = FirmwareVersion::decode_owned(&[0x01, 0x30, 2, 1, 0, 1, 6, 0]).unwrap();
        assert_eq!(n, 8);
        assert_eq!(v.version, (2, 1, 0));
        assert_eq!(v.loader, Some((1, 6)));
        assert!(v.flags.contains(FirmwareFlags::COMPRESSED));
    }
}
