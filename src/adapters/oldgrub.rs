//! Legacy grub2 blob adapter (`oldgrub` target, §6).
//!
//! The sealed-secret container is nothing but a marshalled `TPM2B_PUBLIC`
//! immediately followed by a marshalled `TPM2B_PRIVATE` — both already in
//! TSS MU wire form inside [`crate::policy::SealedObject`]. The signed-
//! policy container is a bare marshalled `TPMT_SIGNATURE`. Every TPM2B
//! structure self-describes its length in a big-endian `u16` prefix, so
//! splitting the concatenation back apart needs no external bookkeeping.

use std::path::Path;

use crate::error::{PredictError, Result};
use crate::policy::SealedObject;

/// Writes `sealed` as `TPM2B_PUBLIC ++ TPM2B_PRIVATE`.
pub fn write_sealed(path: &Path, sealed: &SealedObject) -> Result<()> {
    let mut bytes = Vec::with_capacity(sealed.public.len() + sealed.private.len());
    bytes.extend_from_slice(&sealed.public);
    bytes.extend_from_slice(&sealed.private);
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Reads back a blob written by [`write_sealed`], splitting at the first
/// TPM2B's self-declared length.
pub fn read_sealed(path: &Path) -> Result<SealedObject> {
    let bytes = std::fs::read(path)?;
    let (public, private) = split_first_tpm2b(&bytes)?;
    Ok(SealedObject {
        public: public.to_vec(),
        private: private.to_vec(),
    })
}

/// Splits `bytes` after the first marshalled `TPM2B_*` structure: a
/// `u16` big-endian size, followed by that many bytes of payload.
fn split_first_tpm2b(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.len() < 2 {
        return Err(PredictError::Truncated(
            "sealed blob shorter than a TPM2B size prefix".to_string(),
        ));
    }
    let size = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let total = 2 + size;
    if bytes.len() < total {
        return Err(PredictError::Truncated(format!(
            "sealed blob declares {size} bytes of public area but only {} remain",
            bytes.len() - 2
        )));
    }
    Ok(bytes.split_at(total))
}

/// Writes a raw marshalled `TPMT_SIGNATURE` as the standalone signature
/// file this target pairs with an authorized-policy seal.
pub fn write_signature(path: &Path, signature: &[u8]) -> Result<()> {
    std::fs::write(path, signature)?;
    Ok(())
}

pub fn read_signature(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fake_tpm2b(payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn round_trips_concatenated_public_and_private() {
        let sealed = SealedObject {
            public: fake_tpm2b(b"public-area"),
            private: fake_tpm2b(b"private-area"),
        };
        let file = NamedTempFile::new().unwrap();
        write_sealed(file.path(), &sealed).unwrap();
        let read_back = read_sealed(file.path()).unwrap();
        assert_eq!(read_back.public, sealed.public);
        assert_eq!(read_back.private, sealed.private);
    }

    #[test]
    fn truncated_blob_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0u8, 5, 1, 2]).unwrap();
        assert!(read_sealed(file.path()).is_err());
    }
}
