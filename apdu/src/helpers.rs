// Copyright (c) 2022-2023 The MobileCoin Foundation

/// Encoding helpers for derivation paths
/// (element count followed by big-endian `u32` elements)
pub(crate) mod path {
    use alloc::vec::Vec;

    use byteorder::{BigEndian, ByteOrder};

    use crate::{ApduError, MAX_PATH_DEPTH};

    pub fn enc(p: &[u32], buff: &mut [u8]) -> Result<usize, ApduError> {
        let n = enc_len(p)?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = p.len() as u8;
        for (i, v) in p.iter().enumerate() {
            BigEndian::write_u32(&mut buff[1 + i * 4..], *v);
        }

        Ok(n)
    }

    pub fn enc_len(p: &[u32]) -> Result<usize, ApduError> {
        if p.is_empty() || p.len() > MAX_PATH_DEPTH {
            return Err(ApduError::InvalidLength);
        }
        Ok(1 + p.len() * 4)
    }

    pub fn dec(buff: &[u8]) -> Result<(Vec<u32>, usize), ApduError> {
        let count = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        if count == 0 || count > MAX_PATH_DEPTH {
            return Err(ApduError::InvalidLength);
        }

        let n = 1 + count * 4;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let p = buff[1..n].chunks_exact(4).map(BigEndian::read_u32).collect();

        Ok((p, n))
    }
}

/// Encoding helpers for length-prefixed byte fields
pub(crate) mod bytes {
    use alloc::vec::Vec;

    use crate::ApduError;

    pub fn enc(d: &[u8], buff: &mut [u8]) -> Result<usize, ApduError> {
        if d.len() > u8::MAX as usize || buff.len() < d.len() + 1 {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = d.len() as u8;
        buff[1..][..d.len()].copy_from_slice(d);

        Ok(d.len() + 1)
    }

    pub fn dec(buff: &[u8]) -> Result<(Vec<u8>, usize), ApduError> {
        let n = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        if buff.len() < n + 1 {
            return Err(ApduError::InvalidLength);
        }

        Ok((buff[1..][..n].to_vec(), n + 1))
    }
}

/// Copy a raw payload into an output buffer
pub(crate) fn copy_raw(d: &[u8], buff: &mut [u8]) -> Result<usize, crate::ApduError> {
    if buff.len() < d.len() {
        return Err(crate::ApduError::InvalidLength);
    }
    buff[..d.len()].copy_from_slice(d);
    Ok(d.len())
}
